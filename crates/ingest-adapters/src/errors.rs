//! Maps each underlying client library's native error onto `CoreError`.
//! There is no adapter-owned error enum: the traits these adapters
//! implement are declared in `ingest-core` and already name the error type
//! the Chain Engine expects.

use ingest_core::errors::CoreError;

pub fn from_sqlx(client_id: &str, err: sqlx::Error) -> CoreError {
    CoreError::QueryFailed { client_id: client_id.to_string(), message: err.to_string() }
}

pub fn from_sqlx_insert(client_id: &str, err: sqlx::Error) -> CoreError {
    CoreError::InsertFailed { client_id: client_id.to_string(), message: err.to_string() }
}

pub fn from_sqlx_listen(client_id: &str, channel: &str, err: sqlx::Error) -> CoreError {
    CoreError::ListenFailed { client_id: client_id.to_string(), channel: channel.to_string(), message: err.to_string() }
}

pub fn from_rumqttc_client(client_id: &str, err: rumqttc::ClientError) -> CoreError {
    CoreError::TransportError { client_id: client_id.to_string(), message: err.to_string() }
}
