//! Dynamic Step Loader (C6): resolves `script_path` to a cached
//! `ScriptModule` and drives its `initialize`/`process_message` entry
//! points behind the `StepLoader` seam `ingest-core` defines.
//!
//! Grounded on spec §9's "embedded registry, compiled-in table, or small
//! embedded scripting VM" note, read as a systems-Rust instruction to load
//! a compiled plugin unit by path — the closest analogue to the original
//! Python implementation's ability to `import` an arbitrary module at
//! runtime.

pub mod abi;
pub mod host;
pub mod module;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use ingest_core::loader::StepLoader;
use ingest_core::registry::{Client, ClientSubset};
use ingest_domain::envelope::Envelope;
use module::ScriptModule;
use serde_json::Value;
use tokio::runtime::Handle;

const INITIALIZE_TIMEOUT: Duration = Duration::from_secs(10);

/// Caches resolved modules by canonicalized absolute path; re-loading at
/// runtime is not supported, matching spec §4.6's "Loader caches resolved
/// modules by absolute path" invariant.
#[derive(Default)]
pub struct ScriptLoader {
    modules: DashMap<PathBuf, Arc<ScriptModule>>,
}

impl ScriptLoader {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve(&self, script_path: &str) -> Result<Arc<ScriptModule>, String> {
        let canonical = Path::new(script_path).canonicalize().map_err(|e| e.to_string())?;
        if let Some(existing) = self.modules.get(&canonical) {
            return Ok(existing.clone());
        }
        let module = Arc::new(ScriptModule::load(script_path).map_err(|e| e.to_string())?);
        self.modules.insert(canonical, module.clone());
        Ok(module)
    }
}

/// Descriptive id-to-kind map a module can use for introspection; actually
/// exercising a client goes through the `HostCallbacks` table built
/// alongside this, not this JSON.
fn client_subset_to_json(clients: &ClientSubset) -> Vec<u8> {
    let mut map = serde_json::Map::new();
    for (client_id, client) in clients {
        let kind = match client {
            Client::Broker(_) => "broker",
            Client::Relational(_) => "relational",
            Client::Cache(_) => "cache",
        };
        map.insert(client_id.clone(), Value::String(kind.to_string()));
    }
    serde_json::to_vec(&Value::Object(map)).unwrap_or_default()
}

#[async_trait]
impl StepLoader for ScriptLoader {
    async fn initialize(&self, script_path: &str) {
        let module = match self.resolve(script_path) {
            Ok(module) => module,
            Err(err) => {
                log::error!("step module '{script_path}' could not be loaded: {err}");
                return;
            }
        };
        if !module.has_initialize() {
            return;
        }

        let empty_clients = serde_json::to_vec(&Value::Object(serde_json::Map::new())).unwrap_or_default();
        let module_for_blocking = module.clone();
        let runtime = Handle::current();
        let result = tokio::time::timeout(
            INITIALIZE_TIMEOUT,
            tokio::task::spawn_blocking(move || {
                let host = host::build(ClientSubset::new(), runtime);
                let outcome = module_for_blocking.initialize(&empty_clients, &host);
                host::free(host);
                outcome
            }),
        )
        .await;

        match result {
            Ok(Ok(Ok(()))) => log::info!("step module '{script_path}' initialized"),
            Ok(Ok(Err(code))) => log::error!("step module '{script_path}' initialize() returned code {code}"),
            Ok(Err(join_err)) => log::error!("step module '{script_path}' initialize() panicked: {join_err}"),
            Err(_) => log::error!("step module '{script_path}' initialize() timed out after {INITIALIZE_TIMEOUT:?}"),
        }
    }

    async fn process_message(&self, script_path: &str, envelope: Envelope, clients: &ClientSubset) -> Envelope {
        let module = match self.resolve(script_path) {
            Ok(module) => module,
            Err(err) => {
                log::error!("step '{script_path}' misconfigured: {err}");
                return envelope;
            }
        };

        let envelope_json = match serde_json::to_vec(&envelope) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::error!("step '{script_path}' failed to encode envelope: {err}");
                return envelope;
            }
        };
        let clients_json = client_subset_to_json(clients);
        let granted = clients.clone();

        let module_for_blocking = module.clone();
        let runtime = Handle::current();
        let result = tokio::task::spawn_blocking(move || {
            let host = host::build(granted, runtime);
            let outcome = module_for_blocking.process_message(&envelope_json, &clients_json, &host);
            host::free(host);
            outcome
        })
        .await;

        match result {
            Ok(Ok(bytes)) => serde_json::from_slice(&bytes).unwrap_or(envelope),
            Ok(Err(code)) => {
                log::error!("step '{script_path}' failed with code {code}");
                envelope
            }
            Err(join_err) => {
                log::error!("step '{script_path}' panicked: {join_err}");
                envelope
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_subset_to_json_encodes_kind_per_client() {
        let clients = ClientSubset::new();
        let json = client_subset_to_json(&clients);
        assert_eq!(json, b"{}".to_vec());
    }

    #[tokio::test]
    async fn resolve_reports_missing_file_without_panicking() {
        let loader = ScriptLoader::new();
        let err = loader.resolve("/nonexistent/path/to/a/script.so");
        assert!(err.is_err());
    }
}
