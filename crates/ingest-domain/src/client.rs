//! Client descriptor: the immutable identity of one live capability.
//!
//! `client_id` is unique process-wide; uniqueness is enforced by whatever
//! registry consumes these descriptors (see `ingest-core::registry::client`).

use serde::{Deserialize, Serialize};

pub type ClientId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientKind {
    Broker,
    Relational,
    Cache,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

/// Connection parameters for one client, as read from configuration.
///
/// Immutable after construction: nothing in this crate or its consumers
/// mutates a `ClientDescriptor` in place. Live connection state
/// (`ClientState`) is tracked separately by the adapter that owns the
/// underlying connection, not on this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientDescriptor {
    pub client_id: ClientId,
    pub kind: ClientKind,
    pub endpoint: Endpoint,
    pub credentials: Credentials,
}

/// Connection endpoint, shaped differently per client kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Endpoint {
    Broker { server: String, port: u16 },
    Relational { connection_string: String },
    Cache { host: String, port: u16, db: u32 },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ClientDescriptor {
    pub fn new_broker(client_id: impl Into<String>, server: impl Into<String>, port: u16, username: Option<String>, password: Option<String>) -> Self {
        Self { client_id: client_id.into(),
               kind: ClientKind::Broker,
               endpoint: Endpoint::Broker { server: server.into(), port },
               credentials: Credentials { username, password } }
    }

    pub fn new_relational(client_id: impl Into<String>, connection_string: impl Into<String>) -> Self {
        Self { client_id: client_id.into(),
               kind: ClientKind::Relational,
               endpoint: Endpoint::Relational { connection_string: connection_string.into() },
               credentials: Credentials::default() }
    }

    pub fn new_cache(client_id: impl Into<String>, host: impl Into<String>, port: u16, db: u32, password: Option<String>) -> Self {
        Self { client_id: client_id.into(),
               kind: ClientKind::Cache,
               endpoint: Endpoint::Cache { host: host.into(), port, db },
               credentials: Credentials { username: None, password } }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_descriptor_round_trips_through_json() {
        let d = ClientDescriptor::new_broker("mq1", "localhost", 1883, Some("u".into()), Some("p".into()));
        let json = serde_json::to_string(&d).unwrap();
        let back: ClientDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back.client_id, "mq1");
        assert_eq!(back.kind, ClientKind::Broker);
    }
}
