//! The seam between the Chain Engine and the Dynamic Step Loader (C6).
//!
//! `ingest-loader` implements this trait against `libloading`; it lives
//! here rather than there so `ChainEngine` can depend on the trait without
//! `ingest-core` depending on the loader crate.

use async_trait::async_trait;
use ingest_domain::envelope::Envelope;

use crate::registry::ClientSubset;

/// A script step never surfaces an error upward: a missing module, a bad
/// symbol, or a panic inside the script all collapse to "pass the envelope
/// through unchanged" at the implementation's boundary (spec §4.7 step 3b),
/// so `ChainEngine` never branches on step failure.
#[async_trait]
pub trait StepLoader: Send + Sync {
    /// Load and initialize the module at `script_path`, caching it for
    /// reuse. Called once per distinct path during orchestrator bootstrap.
    async fn initialize(&self, script_path: &str);

    /// Run the module's `process_message` entry point against `envelope`,
    /// with `clients` narrowed to the step's declared `client_access`.
    async fn process_message(&self, script_path: &str, envelope: Envelope, clients: &ClientSubset) -> Envelope;
}
