//! Client Registry (C1): owns one live capability per `client_id`, exposes
//! uniform resolution plus typed narrow views.
//!
//! Concrete connection lifecycles (reconnect loops, subscription state
//! machines, periodic verification) live in the adapter implementations in
//! `ingest-adapters`; this module only defines the capability surface those
//! adapters must satisfy, and the map that owns them by id.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use ingest_domain::envelope::Envelope;
use ingest_domain::{ClientDescriptor, ClientId, ClientKind};

use crate::errors::CoreError;

#[async_trait]
pub trait BrokerClient: Send + Sync {
    fn client_id(&self) -> &str;
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), CoreError>;
    /// Closes the underlying connection. Default no-op; adapters holding a
    /// real connection override it (spec §4.9/§5 shutdown sequence).
    async fn close(&self) {}
}

#[async_trait]
pub trait RelationalClient: Send + Sync {
    fn client_id(&self) -> &str;
    async fn execute_query(&self, query: &str) -> Result<Vec<Envelope>, CoreError>;
    async fn bulk_insert(&self, statement: &str, rows: Vec<Envelope>, batch_size: usize) -> Result<(), CoreError>;
    /// Closes the underlying connection. Default no-op; adapters holding a
    /// real connection override it (spec §4.9/§5 shutdown sequence).
    async fn close(&self) {}
}

#[async_trait]
pub trait CacheClient: Send + Sync {
    fn client_id(&self) -> &str;
    async fn get(&self, key: &str) -> Option<Vec<u8>>;
    async fn set(&self, key: &str, value: Vec<u8>);
    async fn delete(&self, key: &str);
    /// Closes the underlying connection. Default no-op; adapters holding a
    /// real connection override it (spec §4.9/§5 shutdown sequence).
    async fn close(&self) {}
}

/// One registered capability, narrowed by kind.
#[derive(Clone)]
pub enum Client {
    Broker(Arc<dyn BrokerClient>),
    Relational(Arc<dyn RelationalClient>),
    Cache(Arc<dyn CacheClient>),
}

impl Client {
    pub fn kind(&self) -> ClientKind {
        match self {
            Client::Broker(_) => ClientKind::Broker,
            Client::Relational(_) => ClientKind::Relational,
            Client::Cache(_) => ClientKind::Cache,
        }
    }

    pub fn as_broker(&self) -> Option<&Arc<dyn BrokerClient>> {
        match self {
            Client::Broker(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_relational(&self) -> Option<&Arc<dyn RelationalClient>> {
        match self {
            Client::Relational(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_cache(&self) -> Option<&Arc<dyn CacheClient>> {
        match self {
            Client::Cache(c) => Some(c),
            _ => None,
        }
    }

    pub async fn close(&self) {
        match self {
            Client::Broker(c) => c.close().await,
            Client::Relational(c) => c.close().await,
            Client::Cache(c) => c.close().await,
        }
    }
}

/// Narrowed subset of clients handed to a script step per `client_access`.
pub type ClientSubset = std::collections::HashMap<ClientId, Client>;

/// Owns every live client by id. The sole entity allowed to close a client;
/// every other component holds a non-owning `Arc` clone (or a plain lookup
/// against this map), so lifetime equals registry lifetime.
#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<ClientId, Client>,
    descriptors: DashMap<ClientId, ClientDescriptor>,
    order: std::sync::Mutex<Vec<ClientId>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent on `client_id`. Fails with `ConfigConflict` if the same id
    /// is already registered with a different kind.
    pub fn register(&self, descriptor: ClientDescriptor, client: Client) -> Result<(), ingest_domain::DomainError> {
        if let Some(existing) = self.descriptors.get(&descriptor.client_id) {
            if existing.kind != descriptor.kind {
                return Err(ingest_domain::DomainError::ConfigConflict { client_id: descriptor.client_id.clone(),
                                                                        existing: existing.kind,
                                                                        requested: descriptor.kind });
            }
            return Ok(());
        }
        self.descriptors.insert(descriptor.client_id.clone(), descriptor.clone());
        self.clients.insert(descriptor.client_id.clone(), client);
        self.order.lock().unwrap().push(descriptor.client_id);
        Ok(())
    }

    /// The order clients were first registered in.
    pub fn registration_order(&self) -> Vec<ClientId> {
        self.order.lock().unwrap().clone()
    }

    /// Closes every registered client in the reverse of its registration
    /// order (spec §4.9/§5: shutdown closes clients in reverse
    /// registration order).
    pub async fn close_all_reverse(&self) {
        for client_id in self.registration_order().into_iter().rev() {
            if let Some(client) = self.resolve(&client_id) {
                client.close().await;
                log::info!("closed client '{client_id}'");
            }
        }
    }

    pub fn resolve(&self, client_id: &str) -> Option<Client> {
        self.clients.get(client_id).map(|entry| entry.value().clone())
    }

    pub fn descriptor(&self, client_id: &str) -> Option<ClientDescriptor> {
        self.descriptors.get(client_id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        self.clients.iter().map(|e| e.key().clone()).collect()
    }

    /// Resolve a `client_access` list into a narrowed subset, warning (via
    /// the caller) about ids that don't resolve rather than failing.
    pub fn resolve_subset(&self, client_access: &[ClientId]) -> (ClientSubset, Vec<ClientId>) {
        let mut subset = ClientSubset::new();
        let mut missing = Vec::new();
        for id in client_access {
            match self.resolve(id) {
                Some(c) => {
                    subset.insert(id.clone(), c);
                }
                None => missing.push(id.clone()),
            }
        }
        (subset, missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_domain::ClientKind;

    struct DummyCache;
    #[async_trait]
    impl CacheClient for DummyCache {
        fn client_id(&self) -> &str {
            "cache1"
        }
        async fn get(&self, _key: &str) -> Option<Vec<u8>> {
            None
        }
        async fn set(&self, _key: &str, _value: Vec<u8>) {}
        async fn delete(&self, _key: &str) {}
    }

    #[test]
    fn register_is_idempotent_on_same_kind() {
        let registry = ClientRegistry::new();
        let desc = ClientDescriptor::new_cache("cache1", "localhost", 6379, 0, None);
        registry.register(desc.clone(), Client::Cache(Arc::new(DummyCache))).unwrap();
        registry.register(desc, Client::Cache(Arc::new(DummyCache))).unwrap();
        assert!(registry.contains("cache1"));
    }

    #[test]
    fn register_rejects_kind_conflict() {
        let registry = ClientRegistry::new();
        let desc1 = ClientDescriptor::new_cache("c1", "localhost", 6379, 0, None);
        registry.register(desc1, Client::Cache(Arc::new(DummyCache))).unwrap();
        let desc2 = ClientDescriptor::new_broker("c1", "localhost", 1883, None, None);
        let err = registry.register(desc2, Client::Cache(Arc::new(DummyCache))).unwrap_err();
        match err {
            ingest_domain::DomainError::ConfigConflict { existing, requested, .. } => {
                assert_eq!(existing, ClientKind::Cache);
                assert_eq!(requested, ClientKind::Broker);
            }
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn resolve_subset_reports_missing_ids() {
        let registry = ClientRegistry::new();
        let desc = ClientDescriptor::new_cache("cache1", "localhost", 6379, 0, None);
        registry.register(desc, Client::Cache(Arc::new(DummyCache))).unwrap();
        let (subset, missing) = registry.resolve_subset(&["cache1".to_string(), "ghost".to_string()]);
        assert_eq!(subset.len(), 1);
        assert_eq!(missing, vec!["ghost".to_string()]);
    }

    struct RecordingCache {
        id: &'static str,
        closed: Arc<std::sync::Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl CacheClient for RecordingCache {
        fn client_id(&self) -> &str {
            self.id
        }
        async fn get(&self, _key: &str) -> Option<Vec<u8>> {
            None
        }
        async fn set(&self, _key: &str, _value: Vec<u8>) {}
        async fn delete(&self, _key: &str) {}
        async fn close(&self) {
            self.closed.lock().unwrap().push(self.id);
        }
    }

    #[tokio::test]
    async fn close_all_reverse_closes_in_the_opposite_order_clients_were_registered_in() {
        let registry = ClientRegistry::new();
        let closed = Arc::new(std::sync::Mutex::new(Vec::new()));

        for id in ["first", "second", "third"] {
            let desc = ClientDescriptor::new_cache(id, "localhost", 6379, 0, None);
            registry.register(desc, Client::Cache(Arc::new(RecordingCache { id, closed: closed.clone() }))).unwrap();
        }

        registry.close_all_reverse().await;

        assert_eq!(*closed.lock().unwrap(), vec!["third", "second", "first"]);
    }

    #[test]
    fn repeated_registration_of_the_same_id_does_not_duplicate_its_slot_in_registration_order() {
        let registry = ClientRegistry::new();
        let desc = ClientDescriptor::new_cache("cache1", "localhost", 6379, 0, None);
        registry.register(desc.clone(), Client::Cache(Arc::new(DummyCache))).unwrap();
        registry.register(desc, Client::Cache(Arc::new(DummyCache))).unwrap();
        assert_eq!(registry.registration_order(), vec!["cache1".to_string()]);
    }
}
