//! Core error taxonomy (spec §7). Startup errors are fatal; runtime errors
//! are never fatal — they are logged by the caller and absorbed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("connection retries exhausted for client '{client_id}'")]
    ConnectFailed { client_id: String },

    #[error("transport error on client '{client_id}': {message}")]
    TransportError { client_id: String, message: String },

    #[error("query failed on client '{client_id}': {message}")]
    QueryFailed { client_id: String, message: String },

    #[error("bulk insert failed on client '{client_id}': {message}")]
    InsertFailed { client_id: String, message: String },

    #[error("listen failed on client '{client_id}', channel '{channel}': {message}")]
    ListenFailed { client_id: String, channel: String, message: String },

    #[error("step at '{script_path}' is misconfigured: {message}")]
    StepMisconfigured { script_path: String, message: String },

    #[error("step at '{script_path}' failed: {message}")]
    StepFailed { script_path: String, message: String },

    #[error("target '{client_id}' in chain '{chain_id}' failed: {message}")]
    TargetFailed { chain_id: String, client_id: String, message: String },
}
