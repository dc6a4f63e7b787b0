//! Domain-level errors: malformed or contradictory configuration.
//!
//! These are the only error kinds that are fatal at startup (see spec §7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("client '{client_id}' already registered with kind {existing:?}, cannot re-register as {requested:?}")]
    ConfigConflict { client_id: String, existing: crate::client::ClientKind, requested: crate::client::ClientKind },
}
