//! End-to-end Chain Engine scenarios, against fake `Broker`/`Relational`
//! clients and a fake step loader — the scenarios spec.md §8 names as S1,
//! S2, and S6.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ingest_core::engine::{ChainEngine, SourceShape};
use ingest_core::errors::CoreError;
use ingest_core::freshness::{FreshnessGate, SystemClockFreshness};
use ingest_core::loader::StepLoader;
use ingest_core::registry::{BrokerClient, ChainRegistry, Client, ClientRegistry, ClientSubset, RelationalClient};
use ingest_domain::envelope::Envelope;
use ingest_domain::{Chain, ClientDescriptor, SourceBinding, Step, TargetBinding};

struct RecordingBroker {
    id: String,
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

#[async_trait]
impl BrokerClient for RecordingBroker {
    fn client_id(&self) -> &str {
        &self.id
    }
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), CoreError> {
        self.published.lock().unwrap().push((topic.to_string(), payload));
        Ok(())
    }
}

struct RecordingRelational {
    id: String,
    inserted: Mutex<Vec<Vec<Envelope>>>,
}

#[async_trait]
impl RelationalClient for RecordingRelational {
    fn client_id(&self) -> &str {
        &self.id
    }
    async fn execute_query(&self, _query: &str) -> Result<Vec<Envelope>, CoreError> {
        Ok(vec![])
    }
    async fn bulk_insert(&self, _statement: &str, rows: Vec<Envelope>, batch_size: usize) -> Result<(), CoreError> {
        for batch in rows.chunks(batch_size) {
            self.inserted.lock().unwrap().push(batch.to_vec());
        }
        Ok(())
    }
}

/// A step loader with exactly one script: uppercases `data.name`. Stands in
/// for a real `libloading`-backed module in a scenario test that has no
/// compiled shared object to load.
struct UppercaseNameLoader;

#[async_trait]
impl StepLoader for UppercaseNameLoader {
    async fn initialize(&self, _script_path: &str) {}

    async fn process_message(&self, _script_path: &str, envelope: Envelope, _clients: &ClientSubset) -> Envelope {
        let mut envelope = envelope;
        if let Some(name) = envelope.pointer("/data/name").and_then(|v| v.as_str()).map(str::to_string) {
            if let Some(obj) = envelope.pointer_mut("/data") {
                if let Some(map) = obj.as_object_mut() {
                    map.insert("name".to_string(), serde_json::Value::String(name.to_uppercase()));
                }
            }
        }
        envelope
    }
}

fn build_engine(chain: Chain, clients: Arc<ClientRegistry>, loader: Arc<dyn StepLoader>) -> ChainEngine {
    let chains = Arc::new(ChainRegistry::build(vec![chain]));
    ChainEngine::new(clients, chains, loader, Arc::new(FreshnessGate::new(Box::new(SystemClockFreshness))))
}

/// S1 — broker-to-broker, single script step: uppercase `data.name`.
#[tokio::test]
async fn s1_broker_to_broker_with_script_step() {
    let clients = Arc::new(ClientRegistry::new());
    let broker_out = Arc::new(RecordingBroker { id: "mq-out".to_string(), published: Mutex::new(vec![]) });
    clients.register(ClientDescriptor::new_broker("mq-out", "localhost", 1883, None, None), Client::Broker(broker_out.clone())).unwrap();

    let chain = Chain { id: "c1".to_string(),
                         sources: vec![SourceBinding::Broker { client_id: "mq-in".to_string(), topic: "in/x".to_string() }],
                         steps: vec![Step::Script { script_path: "/scripts/uppercase.so".to_string(), client_access: vec![] }],
                         targets: vec![TargetBinding::Broker { client_id: "mq-out".to_string(), topic: "out/x".to_string() }] };

    let engine = build_engine(chain, clients, Arc::new(UppercaseNameLoader));
    engine.handle(r#"{"name":"alice"}"#, "mq-in", SourceShape::Broker { topic: "in/x" }).await;

    let published = broker_out.published.lock().unwrap();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "out/x");
    let body: serde_json::Value = serde_json::from_slice(&published[0].1).unwrap();
    assert_eq!(body["topic"], "in/x");
    assert_eq!(body["data"]["name"], "ALICE");
}

/// S2 — ingest source, relational-insert target with batch size 2: three
/// rows produce two committed batches (2 + 1), and every row ends up
/// recorded regardless of the batch split. Delivered as a poll-shaped
/// source so the envelope is the bare list (spec.md §4.7 step 2: "if a
/// poll row, the row mapping is the envelope" — no topic wrapping).
#[tokio::test]
async fn s2_ingest_source_relational_insert_target_batches() {
    let clients = Arc::new(ClientRegistry::new());
    let relational = Arc::new(RecordingRelational { id: "pg1".to_string(), inserted: Mutex::new(vec![]) });
    clients.register(ClientDescriptor::new_relational("pg1", "postgres://x"), Client::Relational(relational.clone())).unwrap();

    let chain = Chain { id: "c2".to_string(),
                         sources: vec![SourceBinding::RelationalPoll { client_id: "db-in".to_string(), query: "SELECT * FROM src".to_string(), polling_interval_seconds: 30 }],
                         steps: vec![],
                         targets: vec![TargetBinding::RelationalInsert { client_id: "pg1".to_string(),
                                                                          insert_statement: "INSERT INTO t(v) VALUES(:v)".to_string(),
                                                                          batch_size: 2 }] };

    let engine = build_engine(chain, clients, Arc::new(UppercaseNameLoader));
    engine.handle(r#"[{"v":1},{"v":2},{"v":3}]"#, "db-in", SourceShape::RelationalPoll).await;

    let inserted = relational.inserted.lock().unwrap();
    assert_eq!(inserted.len(), 2, "3 rows at batch size 2 must commit in 2 transactions");
    assert_eq!(inserted[0].len(), 2);
    assert_eq!(inserted[1].len(), 1);
    let all_values: Vec<i64> = inserted.iter().flatten().map(|row| row["v"].as_i64().unwrap()).collect();
    assert_eq!(all_values, vec![1, 2, 3]);
}

/// S6 — a script step's `client_access` names a client the registry has
/// never heard of: the step still runs (with an empty client subset) and
/// the envelope still flows through to the target.
#[tokio::test]
async fn s6_missing_client_access_warns_but_still_flows() {
    struct AssertEmptySubsetLoader;
    #[async_trait]
    impl StepLoader for AssertEmptySubsetLoader {
        async fn initialize(&self, _script_path: &str) {}
        async fn process_message(&self, _script_path: &str, envelope: Envelope, clients: &ClientSubset) -> Envelope {
            assert!(clients.is_empty(), "unresolved client_access ids must not appear in the subset");
            envelope
        }
    }

    let clients = Arc::new(ClientRegistry::new());
    let broker_out = Arc::new(RecordingBroker { id: "mq-out".to_string(), published: Mutex::new(vec![]) });
    clients.register(ClientDescriptor::new_broker("mq-out", "localhost", 1883, None, None), Client::Broker(broker_out.clone())).unwrap();

    let chain = Chain { id: "c3".to_string(),
                         sources: vec![SourceBinding::Broker { client_id: "mq-in".to_string(), topic: "in/x".to_string() }],
                         steps: vec![Step::Script { script_path: "/scripts/noop.so".to_string(), client_access: vec!["ghost".to_string()] }],
                         targets: vec![TargetBinding::Broker { client_id: "mq-out".to_string(), topic: "out/x".to_string() }] };

    let engine = build_engine(chain, clients, Arc::new(AssertEmptySubsetLoader));
    engine.handle(r#"{"name":"bob"}"#, "mq-in", SourceShape::Broker { topic: "in/x" }).await;

    assert_eq!(broker_out.published.lock().unwrap().len(), 1, "fan-out still runs after a step with unresolved client_access");
}

/// A no-op script step must be observationally equivalent to no step at
/// all (spec.md §8 round-trip law).
#[tokio::test]
async fn noop_script_step_is_equivalent_to_no_step() {
    struct IdentityLoader;
    #[async_trait]
    impl StepLoader for IdentityLoader {
        async fn initialize(&self, _script_path: &str) {}
        async fn process_message(&self, _script_path: &str, envelope: Envelope, _clients: &ClientSubset) -> Envelope {
            envelope
        }
    }

    let clients = Arc::new(ClientRegistry::new());
    let broker_out = Arc::new(RecordingBroker { id: "mq-out".to_string(), published: Mutex::new(vec![]) });
    clients.register(ClientDescriptor::new_broker("mq-out", "localhost", 1883, None, None), Client::Broker(broker_out.clone())).unwrap();

    let with_step = Chain { id: "with".to_string(),
                             sources: vec![SourceBinding::Broker { client_id: "mq-in".to_string(), topic: "in/x".to_string() }],
                             steps: vec![Step::Script { script_path: "/scripts/identity.so".to_string(), client_access: vec![] }],
                             targets: vec![TargetBinding::Broker { client_id: "mq-out".to_string(), topic: "out/x".to_string() }] };
    let engine = build_engine(with_step, clients.clone(), Arc::new(IdentityLoader));
    engine.handle(r#"{"name":"carol"}"#, "mq-in", SourceShape::Broker { topic: "in/x" }).await;

    let without_step = Chain { id: "without".to_string(),
                                sources: vec![SourceBinding::Broker { client_id: "mq-in".to_string(), topic: "in/x".to_string() }],
                                steps: vec![],
                                targets: vec![TargetBinding::Broker { client_id: "mq-out".to_string(), topic: "out/x".to_string() }] };
    let engine2 = build_engine(without_step, clients, Arc::new(IdentityLoader));
    engine2.handle(r#"{"name":"carol"}"#, "mq-in", SourceShape::Broker { topic: "in/x" }).await;

    let published = broker_out.published.lock().unwrap();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].1, published[1].1, "with an identity step vs. no step, the published payload must be identical");
}
