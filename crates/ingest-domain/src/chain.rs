//! Chain, SourceBinding, TargetBinding, and Step — the declarative shape of
//! one processing pipeline (spec §3).

use serde::{Deserialize, Serialize};

use crate::client::ClientId;

pub type ChainId = String;

/// An ordered pipeline from sources through steps to targets.
///
/// Invariant: a chain with empty `sources` or empty `targets` is rejected at
/// load time — see `ingest-core::registry::chains::ChainRegistry::build`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chain {
    pub id: ChainId,
    pub sources: Vec<SourceBinding>,
    pub steps: Vec<Step>,
    pub targets: Vec<TargetBinding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceBinding {
    Broker { client_id: ClientId, topic: String },
    #[serde(rename = "relational-poll")]
    RelationalPoll { client_id: ClientId, query: String, polling_interval_seconds: u64 },
    #[serde(rename = "relational-trigger")]
    RelationalTrigger { client_id: ClientId, trigger_name: String, table: String, condition_sql: String },
}

impl SourceBinding {
    pub fn client_id(&self) -> &ClientId {
        match self {
            SourceBinding::Broker { client_id, .. } => client_id,
            SourceBinding::RelationalPoll { client_id, .. } => client_id,
            SourceBinding::RelationalTrigger { client_id, .. } => client_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetBinding {
    Broker { client_id: ClientId, topic: String },
    #[serde(rename = "relational-insert")]
    RelationalInsert { client_id: ClientId, insert_statement: String, #[serde(default = "default_batch_size")] batch_size: usize },
}

fn default_batch_size() -> usize {
    100
}

impl TargetBinding {
    pub fn client_id(&self) -> &ClientId {
        match self {
            TargetBinding::Broker { client_id, .. } => client_id,
            TargetBinding::RelationalInsert { client_id, .. } => client_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    SqlQuery { client_id: ClientId, query: String },
    Script { script_path: String, #[serde(default)] client_access: Vec<ClientId> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relational_poll_source_deserializes() {
        let json = r#"{"kind":"relational-poll","client_id":"db1","query":"SELECT 1","polling_interval_seconds":30}"#;
        let src: SourceBinding = serde_json::from_str(json).unwrap();
        match src {
            SourceBinding::RelationalPoll { client_id, polling_interval_seconds, .. } => {
                assert_eq!(client_id, "db1");
                assert_eq!(polling_interval_seconds, 30);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn target_batch_size_defaults_to_100() {
        let json = r#"{"kind":"relational-insert","client_id":"db1","insert_statement":"INSERT INTO t(v) VALUES(:v)"}"#;
        let tgt: TargetBinding = serde_json::from_str(json).unwrap();
        match tgt {
            TargetBinding::RelationalInsert { batch_size, .. } => assert_eq!(batch_size, 100),
            _ => panic!("wrong variant"),
        }
    }
}
