//! ingest-domain: the immutable data model shared by every other crate.
//!
//! Nothing in this crate talks to a broker, a database, or the filesystem —
//! it only describes the shapes those components exchange.

pub mod chain;
pub mod client;
pub mod encoding;
pub mod envelope;
pub mod errors;

pub use chain::{Chain, SourceBinding, Step, TargetBinding};
pub use client::{ClientDescriptor, ClientId, ClientKind, ClientState, Credentials, Endpoint};
pub use envelope::Envelope;
pub use errors::DomainError;
