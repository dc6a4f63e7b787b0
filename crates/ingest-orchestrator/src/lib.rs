//! Ingestion Orchestrator (C7): the concurrent supervision of broker
//! subscriptions, database change listeners, and polling loops, plus the
//! phased startup sequence spec §4.9 requires (clients, then step
//! modules, then sources, then wait-for-shutdown).

pub mod supervised;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ingest_adapters::{RedisCache, RumqttcBroker, SqlxRelational};
use ingest_core::engine::ChainEngine;
use ingest_core::errors::CoreError;
use ingest_core::loader::StepLoader;
use ingest_core::registry::{ChainRegistry, Client, ClientRegistry};
use ingest_domain::{ClientDescriptor, ClientId, ClientKind, Endpoint, SourceBinding};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_VERIFY_INTERVAL: Duration = Duration::from_secs(10);
const INFINITE_RETRY: i64 = -1;

pub struct Orchestrator {
    clients: Arc<ClientRegistry>,
    chains: Arc<ChainRegistry>,
    step_loader: Arc<dyn StepLoader>,
    brokers: HashMap<ClientId, (Arc<RumqttcBroker>, rumqttc::EventLoop)>,
    relationals: HashMap<ClientId, Arc<SqlxRelational>>,
    shutdown: CancellationToken,
    /// Every supervised task spawned during bootstrap/start_sources, so
    /// shutdown can drain them before closing clients (spec §4.9/§5).
    tasks: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    /// Phase 1: construct the Client Registry. Relational and cache
    /// clients establish their connection and start their background
    /// verifier immediately; broker clients are constructed but connect
    /// lazily — their event loop is not driven until `start_sources`
    /// subscribes them. The Chain Engine is built by the caller from
    /// `client_registry()` once this returns, then handed to
    /// `start_sources` — it cannot be built before the Client Registry
    /// exists, and sources cannot start before the engine exists.
    pub async fn bootstrap(
        descriptors: Vec<ClientDescriptor>,
        chains: Arc<ChainRegistry>,
        step_loader: Arc<dyn StepLoader>,
        shutdown: CancellationToken,
    ) -> Result<Self, CoreError> {
        let clients = Arc::new(ClientRegistry::new());
        let mut brokers = HashMap::new();
        let mut relationals = HashMap::new();
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        for descriptor in descriptors {
            match (&descriptor.kind, &descriptor.endpoint) {
                (ClientKind::Relational, Endpoint::Relational { connection_string }) => {
                    let relational = Arc::new(
                        SqlxRelational::connect_and_verify(descriptor.client_id.clone(), connection_string, INFINITE_RETRY, DEFAULT_RETRY_INTERVAL).await?,
                    );
                    clients
                        .register(descriptor.clone(), Client::Relational(relational.clone()))
                        .map_err(|_| CoreError::ConnectFailed { client_id: descriptor.client_id.clone() })?;
                    relationals.insert(descriptor.client_id.clone(), relational.clone());
                    let verifier = relational.clone();
                    let shutdown = shutdown.clone();
                    tasks.push(tokio::spawn(async move { verifier.periodic_verify(DEFAULT_VERIFY_INTERVAL, shutdown).await }));
                }
                (ClientKind::Cache, Endpoint::Cache { host, port, db }) => {
                    let cache = Arc::new(
                        RedisCache::new(descriptor.client_id.clone(), host, *port, *db, descriptor.credentials.password.as_deref())
                            .map_err(|err| CoreError::TransportError { client_id: descriptor.client_id.clone(), message: err.to_string() })?,
                    );
                    clients
                        .register(descriptor.clone(), Client::Cache(cache.clone()))
                        .map_err(|_| CoreError::ConnectFailed { client_id: descriptor.client_id.clone() })?;
                    let supervised = cache.clone();
                    let shutdown = shutdown.clone();
                    tasks.push(tokio::spawn(async move { supervised.run_supervised(DEFAULT_VERIFY_INTERVAL, shutdown).await }));
                }
                (ClientKind::Broker, Endpoint::Broker { server, port }) => {
                    let (broker, eventloop) = RumqttcBroker::new(
                        descriptor.client_id.clone(),
                        server,
                        *port,
                        descriptor.credentials.username.as_deref(),
                        descriptor.credentials.password.as_deref(),
                    );
                    let broker = Arc::new(broker);
                    clients
                        .register(descriptor.clone(), Client::Broker(broker.clone()))
                        .map_err(|_| CoreError::ConnectFailed { client_id: descriptor.client_id.clone() })?;
                    brokers.insert(descriptor.client_id.clone(), (broker, eventloop));
                }
                _ => {
                    log::error!("client '{}' has a kind/endpoint mismatch; skipping", descriptor.client_id);
                }
            }
        }

        Ok(Self { clients, chains, step_loader, brokers, relationals, shutdown, tasks })
    }

    /// Phase 2: initialize every distinct script module referenced by any
    /// chain's `script` step, once per distinct `script_path`.
    pub async fn bootstrap_steps(&self) {
        let mut seen = std::collections::HashSet::new();
        for chain in self.chains.list_chains() {
            for step in &chain.steps {
                if let ingest_domain::Step::Script { script_path, .. } = step {
                    if seen.insert(script_path.clone()) {
                        self.step_loader.initialize(script_path).await;
                    }
                }
            }
        }
    }

    /// Phase 3: start one supervised task per source — broker
    /// subscriptions (one per client, covering the union of its topics),
    /// relational-trigger listeners, and relational-poll loops. Broker
    /// clients referenced only as targets still get their event loop
    /// driven so they can subscribe to the keep-alive topic.
    pub async fn start_sources(&mut self, engine: Arc<ChainEngine>) {
        let mut topics_by_broker: HashMap<ClientId, Vec<String>> = HashMap::new();
        for broker_id in self.brokers.keys() {
            topics_by_broker.entry(broker_id.clone()).or_default();
        }

        for chain in self.chains.list_chains() {
            for source in &chain.sources {
                match source {
                    SourceBinding::Broker { client_id, topic } => {
                        topics_by_broker.entry(client_id.clone()).or_default().push(topic.clone());
                    }
                    SourceBinding::RelationalTrigger { client_id, trigger_name, table, condition_sql } => {
                        if let Some(handle) = self.start_relational_trigger(client_id, trigger_name, table, condition_sql, engine.clone()).await {
                            self.tasks.push(handle);
                        }
                    }
                    SourceBinding::RelationalPoll { client_id, query, polling_interval_seconds } => {
                        if let Some(handle) = self.start_relational_poll(client_id, query, *polling_interval_seconds, engine.clone()) {
                            self.tasks.push(handle);
                        }
                    }
                }
            }
        }

        for (broker_id, (broker, eventloop)) in self.brokers.drain() {
            let topics = topics_by_broker.remove(&broker_id).unwrap_or_default();
            broker.subscribe(&topics).await;
            let engine = engine.clone();
            let shutdown = self.shutdown.clone();
            let handle = tokio::spawn(async move { broker.run(eventloop, engine, shutdown).await });
            self.tasks.push(handle);
        }
    }

    async fn start_relational_trigger(&self, client_id: &str, trigger_name: &str, table: &str, condition_sql: &str, engine: Arc<ChainEngine>) -> Option<JoinHandle<()>> {
        let Some(relational) = self.relationals.get(client_id).cloned() else {
            log::error!("relational-trigger source references unknown client '{client_id}'");
            return None;
        };
        if let Err(err) = relational.install_trigger(trigger_name, table, condition_sql).await {
            log::error!("failed to install trigger '{trigger_name}' on client '{client_id}': {err}");
            return None;
        }
        let shutdown = self.shutdown.clone();
        let name = format!("listen:{client_id}:{trigger_name}");
        let trigger_name = trigger_name.to_string();
        Some(tokio::spawn(async move {
            supervised::run_supervised(&name, shutdown.clone(), move || {
                let relational = relational.clone();
                let engine = engine.clone();
                let shutdown = shutdown.clone();
                let trigger_name = trigger_name.clone();
                async move { relational.listen(&trigger_name, engine, shutdown).await }
            })
            .await;
        }))
    }

    fn start_relational_poll(&self, client_id: &str, query: &str, polling_interval_seconds: u64, engine: Arc<ChainEngine>) -> Option<JoinHandle<()>> {
        let Some(relational) = self.relationals.get(client_id).cloned() else {
            log::error!("relational-poll source references unknown client '{client_id}'");
            return None;
        };
        let shutdown = self.shutdown.clone();
        let query = query.to_string();
        Some(tokio::spawn(async move { relational.start_polling(query, Duration::from_secs(polling_interval_seconds), engine, shutdown).await }))
    }

    /// Phase 4: block until shutdown is requested.
    pub async fn wait_for_shutdown(&self) {
        self.shutdown.cancelled().await;
    }

    /// Phase 5: cancels every supervised task's shutdown token, awaits
    /// each spawned task to completion (draining in-flight work rather
    /// than abandoning it), then closes every registered client in
    /// reverse registration order (spec §4.9/§5).
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        log::info!("shutdown requested; draining {} supervised task(s)", self.tasks.len());
        for handle in self.tasks.drain(..) {
            if let Err(err) = handle.await {
                log::error!("supervised task panicked during shutdown: {err}");
            }
        }
        log::info!("closing clients in reverse registration order");
        self.clients.close_all_reverse().await;
    }

    pub fn client_registry(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    pub fn chain_registry(&self) -> Arc<ChainRegistry> {
        self.chains.clone()
    }
}
