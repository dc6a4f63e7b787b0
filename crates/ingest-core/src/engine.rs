//! Chain Engine (C5): the single entry point every source calls with one
//! inbound payload. Resolves which chains the source feeds, runs each
//! chain's steps in declared order, then fans out to targets.

use std::sync::Arc;

use ingest_domain::envelope::{coerce_to_rows, decode_raw_payload, wrap_broker, wrap_trigger_message};
use ingest_domain::{Chain, Step, TargetBinding};

use crate::freshness::FreshnessGate;
use crate::loader::StepLoader;
use crate::registry::{ChainRegistry, Client, ClientRegistry};

/// Shape the source delivered the raw payload under, used to pick the
/// envelope-wrapping convention (spec §4.7 step 1).
pub enum SourceShape<'a> {
    Broker { topic: &'a str },
    RelationalPoll,
    RelationalTrigger,
}

pub struct ChainEngine {
    clients: Arc<ClientRegistry>,
    chains: Arc<ChainRegistry>,
    loader: Arc<dyn StepLoader>,
    freshness: Arc<FreshnessGate>,
}

impl ChainEngine {
    pub fn new(clients: Arc<ClientRegistry>, chains: Arc<ChainRegistry>, loader: Arc<dyn StepLoader>, freshness: Arc<FreshnessGate>) -> Self {
        Self { clients, chains, loader, freshness }
    }

    /// The entry point every adapter's source loop calls with one inbound
    /// message. Never returns an error: every failure mode short of a
    /// missing chain registration is logged and absorbed, per spec §7.
    pub async fn handle(&self, raw_payload: &str, client_id: &str, shape: SourceShape<'_>) {
        let decoded = decode_raw_payload(raw_payload);
        let envelope = match shape {
            SourceShape::Broker { topic } => wrap_broker(topic, decoded),
            SourceShape::RelationalTrigger => wrap_trigger_message(decoded),
            SourceShape::RelationalPoll => decoded,
        };

        let chain_ids = self.chains.chains_for_source(client_id);
        if chain_ids.is_empty() {
            log::warn!("no chain registered for source client '{client_id}'");
            return;
        }

        for chain_id in chain_ids {
            let Some(chain) = self.chains.get_chain(&chain_id) else {
                continue;
            };
            self.run_chain(chain, envelope.clone()).await;
        }
    }

    async fn run_chain(&self, chain: &Chain, mut envelope: serde_json::Value) {
        for step in &chain.steps {
            envelope = self.run_step(chain, step, envelope).await;
        }
        self.fan_out(chain, envelope).await;
    }

    async fn run_step(&self, chain: &Chain, step: &Step, envelope: serde_json::Value) -> serde_json::Value {
        match step {
            Step::SqlQuery { client_id, query } => self.run_sql_query_step(chain, client_id, query, envelope).await,
            Step::Script { script_path, client_access } => {
                let (subset, missing) = self.clients.resolve_subset(client_access);
                if !missing.is_empty() {
                    log::warn!("chain '{}' script step '{}' references unknown clients: {:?}", chain.id, script_path, missing);
                }
                self.loader.process_message(script_path, envelope, &subset).await
            }
        }
    }

    /// Freshness-gated SQL step: skips re-execution when the signal for
    /// this `(client_id, query)` pair is unchanged since it was last seen
    /// (spec §9 Open Question 1). The default `SystemClockFreshness`
    /// always reports "now", so this degenerates to "always execute".
    async fn run_sql_query_step(&self, chain: &Chain, client_id: &str, query: &str, envelope: serde_json::Value) -> serde_json::Value {
        if self.freshness.should_skip(client_id, query) {
            return envelope;
        }

        let Some(Client::Relational(relational)) = self.clients.resolve(client_id) else {
            log::error!("chain '{}' sql_query step references non-relational or unknown client '{}'", chain.id, client_id);
            return envelope;
        };

        match relational.execute_query(query).await {
            Ok(rows) => serde_json::Value::Array(rows),
            Err(err) => {
                log::error!("chain '{}' sql_query step on client '{}' failed: {}", chain.id, client_id, err);
                envelope
            }
        }
    }

    /// Dispatches to every target in declared order. Best-effort: a failed
    /// target is logged and the remaining targets in the same fan-out are
    /// still attempted (spec §4.8).
    async fn fan_out(&self, chain: &Chain, envelope: serde_json::Value) {
        for target in &chain.targets {
            let client_id = target.client_id();
            match target {
                TargetBinding::Broker { topic, .. } => {
                    let Some(Client::Broker(broker)) = self.clients.resolve(client_id) else {
                        log::error!("chain '{}' broker target '{}' unresolved", chain.id, client_id);
                        continue;
                    };
                    let payload = match serde_json::to_vec(&envelope) {
                        Ok(bytes) => bytes,
                        Err(err) => {
                            log::error!("chain '{}' target '{}' failed to encode envelope: {}", chain.id, client_id, err);
                            continue;
                        }
                    };
                    if let Err(err) = broker.publish(topic, payload).await {
                        log::error!("chain '{}' broker target '{}' failed: {}", chain.id, client_id, err);
                    }
                }
                TargetBinding::RelationalInsert { insert_statement, batch_size, .. } => {
                    let Some(Client::Relational(relational)) = self.clients.resolve(client_id) else {
                        log::error!("chain '{}' relational target '{}' unresolved", chain.id, client_id);
                        continue;
                    };
                    let rows = coerce_to_rows(&envelope);
                    if let Err(err) = relational.bulk_insert(insert_statement, rows, *batch_size).await {
                        log::error!("chain '{}' relational target '{}' failed: {}", chain.id, client_id, err);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ingest_domain::{ClientDescriptor, SourceBinding};
    use std::sync::Mutex;

    use crate::errors::CoreError;
    use crate::registry::BrokerClient;

    struct RecordingBroker {
        published: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl BrokerClient for RecordingBroker {
        fn client_id(&self) -> &str {
            "mq-out"
        }
        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), CoreError> {
            self.published.lock().unwrap().push((topic.to_string(), payload));
            Ok(())
        }
    }

    struct NoopLoader;
    #[async_trait]
    impl StepLoader for NoopLoader {
        async fn initialize(&self, _script_path: &str) {}
        async fn process_message(&self, _script_path: &str, envelope: serde_json::Value, _clients: &crate::registry::ClientSubset) -> serde_json::Value {
            envelope
        }
    }

    fn build_chain() -> Chain {
        Chain { id: "c1".to_string(),
                sources: vec![SourceBinding::Broker { client_id: "mq-in".to_string(), topic: "in/x".to_string() }],
                steps: vec![],
                targets: vec![TargetBinding::Broker { client_id: "mq-out".to_string(), topic: "out/x".to_string() }] }
    }

    #[tokio::test]
    async fn handle_fans_out_broker_to_broker() {
        let clients = Arc::new(ClientRegistry::new());
        let broker_out = Arc::new(RecordingBroker { published: Mutex::new(vec![]) });
        clients.register(ClientDescriptor::new_broker("mq-out", "localhost", 1883, None, None), Client::Broker(broker_out.clone())).unwrap();

        let chains = Arc::new(ChainRegistry::build(vec![build_chain()]));
        let loader = Arc::new(NoopLoader);
        let freshness = Arc::new(FreshnessGate::new(Box::new(crate::freshness::SystemClockFreshness)));
        let engine = ChainEngine::new(clients, chains, loader, freshness);

        engine.handle(r#"{"name":"alice"}"#, "mq-in", SourceShape::Broker { topic: "in/x" }).await;

        let published = broker_out.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "out/x");
    }

    #[tokio::test]
    async fn handle_is_a_noop_when_no_chain_matches_source() {
        let clients = Arc::new(ClientRegistry::new());
        let chains = Arc::new(ChainRegistry::build(vec![]));
        let loader = Arc::new(NoopLoader);
        let freshness = Arc::new(FreshnessGate::new(Box::new(crate::freshness::SystemClockFreshness)));
        let engine = ChainEngine::new(clients, chains, loader, freshness);

        engine.handle("{}", "ghost-source", SourceShape::Broker { topic: "in/x" }).await;
    }
}
