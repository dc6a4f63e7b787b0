//! Entry point: load configuration, bootstrap the Client Registry and
//! step modules, start every source's supervised task, then block until
//! the process receives a shutdown signal.
//!
//! Grounded on `chem-cli/src/main.rs`'s "construct engine, run, report"
//! shape, extended with the phased bootstrap spec.md §4.9 requires.

mod config;

use std::process::ExitCode;
use std::sync::Arc;

use ingest_core::engine::ChainEngine;
use ingest_core::freshness::{FreshnessGate, SystemClockFreshness};
use ingest_core::registry::ChainRegistry;
use ingest_loader::ScriptLoader;
use ingest_orchestrator::Orchestrator;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("fatal startup error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let loaded = config::load()?;
    log::info!(
        "loaded {} client(s) and {} chain(s)",
        loaded.client_descriptors.len(),
        loaded.chains.len()
    );

    let chains = Arc::new(ChainRegistry::build(loaded.chains));
    let unused = chains.unused_clients(loaded.client_descriptors.iter().map(|d| &d.client_id));
    for client_id in &unused {
        log::warn!("client '{client_id}' is configured but referenced by no chain");
    }

    let step_loader = Arc::new(ScriptLoader::new());
    let shutdown = CancellationToken::new();

    let mut orchestrator = Orchestrator::bootstrap(loaded.client_descriptors, chains, step_loader.clone(), shutdown.clone()).await?;

    orchestrator.bootstrap_steps().await;

    let engine = Arc::new(ChainEngine::new(
        orchestrator.client_registry().clone(),
        orchestrator.chain_registry(),
        step_loader,
        Arc::new(FreshnessGate::new(Box::new(SystemClockFreshness))),
    ));

    orchestrator.start_sources(engine).await;

    log::info!("ingestion engine running; press Ctrl+C to shut down");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("shutdown signal received");
        }
        _ = orchestrator.wait_for_shutdown() => {}
    }
    orchestrator.shutdown().await;

    Ok(())
}
