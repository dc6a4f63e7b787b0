//! Loads and validates the chain configuration file into the typed inputs
//! the Client Registry and Chain Registry need.
//!
//! Follows the `dotenvy`-then-`env::var` convention used throughout the
//! teacher repo's config loaders: `.env` is loaded once, lazily, then a
//! single env var names the path to read.

use std::env;
use std::fs;

use dotenvy::dotenv;
use ingest_domain::{Chain, ClientDescriptor, DomainError, SourceBinding};
use once_cell::sync::Lazy;
use serde::Deserialize;

static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv();
});

const DEFAULT_CONFIG_PATH: &str = "./configs/chain_config.json";

#[derive(Debug, Deserialize)]
struct RawDocument {
    chain_config: RawChainConfig,
}

#[derive(Debug, Deserialize)]
struct RawChainConfig {
    #[serde(default)]
    broker_clients: Vec<RawBrokerClient>,
    #[serde(default)]
    relational_clients: Vec<RawRelationalClient>,
    #[serde(default)]
    cache_clients: Vec<RawCacheClient>,
    #[serde(default)]
    data_processing_chains: Vec<RawChain>,
}

#[derive(Debug, Deserialize)]
struct RawBrokerClient {
    id: String,
    server: String,
    port: u16,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRelationalClient {
    id: String,
    connection_string: String,
}

#[derive(Debug, Deserialize)]
struct RawCacheClient {
    id: String,
    host: String,
    port: u16,
    #[serde(default)]
    db: u32,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawChain {
    id: String,
    sources: Vec<RawSource>,
    #[serde(default, rename = "processing_steps")]
    steps: Vec<RawStep>,
    targets: Vec<RawTarget>,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    client_id: String,
    client_type: String,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    polling_interval: Option<u64>,
    #[serde(default)]
    triggers: Vec<RawTrigger>,
}

#[derive(Debug, Deserialize)]
struct RawTrigger {
    trigger_name: String,
    table: String,
    condition: String,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    script_path: Option<String>,
    #[serde(default)]
    client_access: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawTarget {
    client_id: String,
    client_type: String,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    insert_statement: Option<String>,
    #[serde(default)]
    batch_size: Option<usize>,
}

pub struct LoadedConfig {
    pub client_descriptors: Vec<ClientDescriptor>,
    pub chains: Vec<Chain>,
}

/// Reads `CHAIN_CONFIG_PATH` (default `./configs/chain_config.json`),
/// parses it, and performs the structural admission checks spec.md
/// assigns to the core: a chain needs at least one source and one target,
/// and a `relational-poll` source needs both `query` and
/// `polling_interval`. Full JSON-Schema validation stays out of scope —
/// this is the boundary the core actually consumes.
pub fn load() -> Result<LoadedConfig, DomainError> {
    Lazy::force(&DOTENV_LOADED);
    let path = env::var("CHAIN_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let raw_text = fs::read_to_string(&path).map_err(|e| DomainError::ConfigInvalid(format!("cannot read '{path}': {e}")))?;
    let document: RawDocument = serde_json::from_str(&raw_text).map_err(|e| DomainError::ConfigInvalid(format!("invalid JSON in '{path}': {e}")))?;

    let mut client_descriptors = Vec::new();
    for client in document.chain_config.broker_clients {
        client_descriptors.push(ClientDescriptor::new_broker(client.id, client.server, client.port, client.username, client.password));
    }
    for client in document.chain_config.relational_clients {
        client_descriptors.push(ClientDescriptor::new_relational(client.id, client.connection_string));
    }
    for client in document.chain_config.cache_clients {
        client_descriptors.push(ClientDescriptor::new_cache(client.id, client.host, client.port, client.db, client.password));
    }

    let mut chains = Vec::new();
    for raw_chain in document.chain_config.data_processing_chains {
        let chain_id = raw_chain.id.clone();
        match build_chain(raw_chain) {
            Ok(chain) => chains.push(chain),
            Err(err) => log::warn!("chain '{chain_id}' dropped during admission: {err}"),
        }
    }

    Ok(LoadedConfig { client_descriptors, chains })
}

/// A single misconfigured chain (no sources, no targets, or nothing left
/// after per-binding validation) is reported to the caller, which logs it
/// and moves on — it must never abort the rest of the file (spec §6 is
/// per-chain admission filtering, not whole-file validation).
fn build_chain(raw: RawChain) -> Result<Chain, DomainError> {
    if raw.sources.is_empty() {
        return Err(DomainError::ConfigInvalid(format!("chain '{}' has no sources", raw.id)));
    }
    if raw.targets.is_empty() {
        return Err(DomainError::ConfigInvalid(format!("chain '{}' has no targets", raw.id)));
    }

    let mut sources = Vec::new();
    for raw_source in raw.sources {
        match build_source(&raw.id, raw_source) {
            Some(source) => sources.push(source),
            None => continue,
        }
    }
    if sources.is_empty() {
        return Err(DomainError::ConfigInvalid(format!("chain '{}' has no valid sources after validation", raw.id)));
    }

    let steps = raw.steps.into_iter().filter_map(|s| build_step(&raw.id, s)).collect();
    let targets: Vec<_> = raw.targets.into_iter().filter_map(|t| build_target(&raw.id, t)).collect();
    if targets.is_empty() {
        return Err(DomainError::ConfigInvalid(format!("chain '{}' has no valid targets after validation", raw.id)));
    }

    Ok(Chain { id: raw.id, sources, steps, targets })
}

fn build_source(chain_id: &str, raw: RawSource) -> Option<SourceBinding> {
    match raw.client_type.as_str() {
        "broker" => {
            let topic = raw.topic?;
            Some(SourceBinding::Broker { client_id: raw.client_id, topic })
        }
        "relational-poll" => {
            let (query, interval) = (raw.query, raw.polling_interval);
            match (query, interval) {
                (Some(query), Some(interval)) if interval > 0 => {
                    Some(SourceBinding::RelationalPoll { client_id: raw.client_id, query, polling_interval_seconds: interval })
                }
                _ => {
                    log::warn!("chain '{chain_id}' relational-poll source on '{}' missing query/polling_interval; skipped", raw.client_id);
                    None
                }
            }
        }
        "relational-trigger" => {
            let trigger = raw.triggers.into_iter().next()?;
            Some(SourceBinding::RelationalTrigger { client_id: raw.client_id, trigger_name: trigger.trigger_name, table: trigger.table, condition_sql: trigger.condition })
        }
        other => {
            log::warn!("chain '{chain_id}' source has unknown client_type '{other}'; skipped");
            None
        }
    }
}

fn build_step(chain_id: &str, raw: RawStep) -> Option<ingest_domain::Step> {
    match raw.kind.as_str() {
        "sql_query" => {
            let (client_id, query) = (raw.client_id, raw.query);
            match (client_id, query) {
                (Some(client_id), Some(query)) => Some(ingest_domain::Step::SqlQuery { client_id, query }),
                _ => {
                    log::warn!("chain '{chain_id}' sql_query step missing client_id/query; skipped");
                    None
                }
            }
        }
        "script" => {
            let script_path = raw.script_path?;
            Some(ingest_domain::Step::Script { script_path, client_access: raw.client_access })
        }
        other => {
            log::warn!("chain '{chain_id}' step has unknown type '{other}'; skipped");
            None
        }
    }
}

fn build_target(chain_id: &str, raw: RawTarget) -> Option<ingest_domain::TargetBinding> {
    match raw.client_type.as_str() {
        "broker" => {
            let topic = raw.topic?;
            Some(ingest_domain::TargetBinding::Broker { client_id: raw.client_id, topic })
        }
        "relational-insert" => {
            let insert_statement = raw.insert_statement?;
            Some(ingest_domain::TargetBinding::RelationalInsert { client_id: raw.client_id, insert_statement, batch_size: raw.batch_size.unwrap_or(100) })
        }
        other => {
            log::warn!("chain '{chain_id}' target has unknown client_type '{other}'; skipped");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_chain_rejects_empty_sources() {
        let raw = RawChain { id: "c1".to_string(), sources: vec![], steps: vec![], targets: vec![] };
        assert!(build_chain(raw).is_err());
    }

    #[test]
    fn build_source_skips_relational_poll_missing_interval() {
        let raw = RawSource { client_id: "db1".to_string(), client_type: "relational-poll".to_string(), topic: None, query: Some("SELECT 1".to_string()), polling_interval: None, triggers: vec![] };
        assert!(build_source("c1", raw).is_none());
    }

    #[test]
    fn build_chain_accepts_a_minimal_valid_chain() {
        let raw = RawChain {
            id: "c1".to_string(),
            sources: vec![RawSource { client_id: "mq1".to_string(), client_type: "broker".to_string(), topic: Some("in/x".to_string()), query: None, polling_interval: None, triggers: vec![] }],
            steps: vec![],
            targets: vec![RawTarget { client_id: "mq2".to_string(), client_type: "broker".to_string(), topic: Some("out/x".to_string()), insert_statement: None, batch_size: None }],
        };
        let chain = build_chain(raw).unwrap();
        assert_eq!(chain.sources.len(), 1);
        assert_eq!(chain.targets.len(), 1);
    }
}
