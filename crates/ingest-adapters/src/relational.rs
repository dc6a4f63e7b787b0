//! Relational Adapter (C3): sessionful SQL capability plus the
//! LISTEN/NOTIFY change-notification bridge, on top of `sqlx`'s async
//! Postgres pool.
//!
//! Grounded on `original_source/db_client.py`: `connect_and_verify` /
//! `verify_connection_async` (finite-vs-infinite retry budget),
//! `create_trigger` (drop-then-recreate trigger function), `listen_to_notifications`
//! (dedicated long-lived connection), `execute_bulk_insert` (batched
//! transactions), `start_polling_query` (forever loop, log-and-continue on
//! error).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use ingest_core::engine::{ChainEngine, SourceShape};
use ingest_core::errors::CoreError;
use ingest_core::registry::RelationalClient;
use ingest_domain::encoding::{to_envelope_value, TypedValue};
use ingest_domain::envelope::Envelope;
use serde_json::{Map, Value};
use sqlx::postgres::{PgListener, PgPoolOptions, PgRow};
use sqlx::{Column, PgPool, Row, TypeInfo};
use tokio_util::sync::CancellationToken;

pub struct SqlxRelational {
    client_id: String,
    connection_string: String,
    pool: PgPool,
}

impl SqlxRelational {
    /// Establishes the pool and issues `SELECT 1` with the spec's retry
    /// policy: `retry_limit = -1` retries forever; any other value retries
    /// that many times before failing with `ConnectFailed`.
    pub async fn connect_and_verify(client_id: impl Into<String>, connection_string: &str, retry_limit: i64, retry_interval: Duration) -> Result<Self, CoreError> {
        let client_id = client_id.into();
        let mut attempt: i64 = 0;
        loop {
            match PgPoolOptions::new().max_connections(10).connect(connection_string).await {
                Ok(pool) => match sqlx::query("SELECT 1").execute(&pool).await {
                    Ok(_) => {
                        log::info!("relational client '{client_id}' connection verified");
                        return Ok(Self { client_id, connection_string: connection_string.to_string(), pool });
                    }
                    Err(err) => {
                        log::error!("relational client '{client_id}' verification query failed: {err}");
                    }
                },
                Err(err) => {
                    log::error!("relational client '{client_id}' failed to connect: {err}");
                }
            }
            attempt += 1;
            if retry_limit != -1 && attempt >= retry_limit {
                return Err(CoreError::ConnectFailed { client_id });
            }
            tokio::time::sleep(retry_interval).await;
        }
    }

    /// Background loop: runs `SELECT 1` every `interval`, logging failures
    /// but never returning (spec §4.3 `periodic_verify`). Intended to be
    /// spawned and supervised by the orchestrator.
    pub async fn periodic_verify(&self, interval: Duration, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            if let Err(err) = sqlx::query("SELECT 1").execute(&self.pool).await {
                log::error!("relational client '{}' periodic verification failed: {}", self.client_id, err);
            }
        }
    }

    /// Idempotently (re)creates the notify function and row trigger.
    /// Existing definitions are dropped and recreated, matching
    /// `create_trigger`'s `CREATE OR REPLACE FUNCTION` / `DROP TRIGGER IF
    /// EXISTS` pair in the original.
    pub async fn install_trigger(&self, trigger_name: &str, table: &str, condition_sql: &str) -> Result<(), CoreError> {
        let function_sql = format!(
            "CREATE OR REPLACE FUNCTION notify_{trigger_name}() RETURNS TRIGGER AS $$ \
             BEGIN IF ({condition_sql}) THEN PERFORM pg_notify('{trigger_name}', row_to_json(NEW)::text); END IF; \
             RETURN NEW; END; $$ LANGUAGE plpgsql;"
        );
        let trigger_sql = format!(
            "DROP TRIGGER IF EXISTS {trigger_name}_trigger ON {table}; \
             CREATE TRIGGER {trigger_name}_trigger AFTER INSERT OR UPDATE ON {table} \
             FOR EACH ROW EXECUTE FUNCTION notify_{trigger_name}();"
        );
        let mut tx = self.pool.begin().await.map_err(|e| crate::errors::from_sqlx(&self.client_id, e))?;
        sqlx::query(&function_sql).execute(&mut *tx).await.map_err(|e| crate::errors::from_sqlx(&self.client_id, e))?;
        sqlx::query(&trigger_sql).execute(&mut *tx).await.map_err(|e| crate::errors::from_sqlx(&self.client_id, e))?;
        tx.commit().await.map_err(|e| crate::errors::from_sqlx(&self.client_id, e))?;
        log::info!("relational client '{}' installed trigger '{trigger_name}' on '{table}'", self.client_id);
        Ok(())
    }

    /// Opens a dedicated `PgListener` connection and forwards every
    /// notification payload to `engine.handle`, wrapped under
    /// `trigger_message`, until `shutdown` fires or the connection fails.
    pub async fn listen(&self, channel: &str, engine: Arc<ChainEngine>, shutdown: CancellationToken) -> Result<(), CoreError> {
        let mut listener = PgListener::connect(&self.connection_string).await.map_err(|e| crate::errors::from_sqlx_listen(&self.client_id, channel, e))?;
        listener.listen(channel).await.map_err(|e| crate::errors::from_sqlx_listen(&self.client_id, channel, e))?;
        log::info!("relational client '{}' listening on channel '{channel}'", self.client_id);

        loop {
            let notification = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                notification = listener.recv() => notification,
            };
            match notification {
                Ok(notification) => {
                    let payload = notification.payload().to_string();
                    let engine = engine.clone();
                    let client_id = self.client_id.clone();
                    tokio::spawn(async move {
                        engine.handle(&payload, &client_id, SourceShape::RelationalTrigger).await;
                    });
                }
                Err(err) => {
                    return Err(crate::errors::from_sqlx_listen(&self.client_id, channel, err));
                }
            }
        }
    }

    /// Forever loop: executes `query`, forwards each resulting row to
    /// `engine.handle` tagged with this client's id, sleeps `interval`.
    /// Failures are logged and never terminate the loop (spec §4.3
    /// `start_polling`).
    pub async fn start_polling(&self, query: String, interval: Duration, engine: Arc<ChainEngine>, shutdown: CancellationToken) {
        loop {
            match self.execute_query(&query).await {
                Ok(rows) => {
                    for row in rows {
                        let raw = row.to_string();
                        engine.handle(&raw, &self.client_id, SourceShape::RelationalPoll).await;
                    }
                    log::info!("relational client '{}' polling query completed: {}", self.client_id, query);
                }
                Err(err) => {
                    log::error!("relational client '{}' polling query failed: {}", self.client_id, err);
                }
            }
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    fn row_to_envelope(row: &PgRow) -> Envelope {
        let mut map = Map::new();
        for column in row.columns() {
            let name = column.name().to_string();
            let value = pg_value_to_json(row, column.ordinal(), column.type_info().name());
            map.insert(name, value);
        }
        Value::Object(map)
    }
}

/// Reads one column off a row into a `TypedValue` and hands it to the
/// centralized encoding convention (`ingest_domain::encoding`) rather than
/// reimplementing the JSON coercion here — the same function the spec
/// describes as shared with every other typed-value site.
fn pg_value_to_json(row: &PgRow, index: usize, type_name: &str) -> Value {
    let typed = match type_name {
        "INT2" | "INT4" | "INT8" => row.try_get::<i64, _>(index).map(TypedValue::Int).unwrap_or(TypedValue::Null),
        "FLOAT4" | "FLOAT8" => row.try_get::<f64, _>(index).map(TypedValue::Float).unwrap_or(TypedValue::Null),
        "BOOL" => row.try_get::<bool, _>(index).map(TypedValue::Bool).unwrap_or(TypedValue::Null),
        "NUMERIC" => row.try_get::<rust_decimal::Decimal, _>(index).map(TypedValue::Decimal).unwrap_or(TypedValue::Null),
        "TIMESTAMPTZ" | "TIMESTAMP" => row.try_get::<chrono::DateTime<chrono::Utc>, _>(index).map(TypedValue::Timestamp).unwrap_or(TypedValue::Null),
        "DATE" => row.try_get::<chrono::NaiveDate, _>(index).map(TypedValue::Date).unwrap_or(TypedValue::Null),
        "TIME" => row.try_get::<chrono::NaiveTime, _>(index).map(TypedValue::Time).unwrap_or(TypedValue::Null),
        "JSON" | "JSONB" => row.try_get::<Value, _>(index).map(TypedValue::Json).unwrap_or(TypedValue::Null),
        _ => row.try_get::<String, _>(index).map(TypedValue::Text).unwrap_or(TypedValue::Null),
    };
    to_envelope_value(typed)
}

#[async_trait]
impl RelationalClient for SqlxRelational {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn execute_query(&self, query: &str) -> Result<Vec<Envelope>, CoreError> {
        let mut stream = sqlx::query(query).fetch(&self.pool);
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await {
            let row = row.map_err(|e| crate::errors::from_sqlx(&self.client_id, e))?;
            rows.push(Self::row_to_envelope(&row));
        }
        Ok(rows)
    }

    async fn bulk_insert(&self, statement: &str, rows: Vec<Envelope>, batch_size: usize) -> Result<(), CoreError> {
        let (rewritten, param_names) = rewrite_named_placeholders(statement);
        let batch_size = batch_size.max(1);
        for batch in rows.chunks(batch_size) {
            let mut tx = self.pool.begin().await.map_err(|e| crate::errors::from_sqlx_insert(&self.client_id, e))?;
            for record in batch {
                let mut query = sqlx::query(&rewritten);
                let object = record.as_object();
                for name in &param_names {
                    let value = object.and_then(|map| map.get(name));
                    query = match value {
                        Some(value) => bind_json_value(query, value),
                        None => query.bind(Option::<String>::None),
                    };
                }
                query.execute(&mut *tx).await.map_err(|e| crate::errors::from_sqlx_insert(&self.client_id, e))?;
            }
            tx.commit().await.map_err(|e| crate::errors::from_sqlx_insert(&self.client_id, e))?;
            log::info!("relational client '{}' bulk insert completed for {} records", self.client_id, batch.len());
        }
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
        log::info!("relational client '{}' pool closed", self.client_id);
    }
}

fn bind_json_value<'q>(query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>, value: &'q Value) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    match value {
        Value::String(s) => query.bind(s.as_str()),
        Value::Number(n) if n.is_i64() => query.bind(n.as_i64()),
        Value::Number(n) => query.bind(n.as_f64()),
        Value::Bool(b) => query.bind(*b),
        Value::Null => query.bind(Option::<String>::None),
        other => query.bind(other.to_string()),
    }
}

/// Rewrites a `:name`-style named placeholder statement into sqlx's
/// positional `$1, $2, ...` syntax, returning the rewritten statement and
/// the column name to bind at each position in order. Binding by the
/// parsed name (rather than a `serde_json::Map`'s alphabetical iteration
/// order) is what lets an insert statement's column order differ from its
/// row object's key order. A `::` is left alone — Postgres's type-cast
/// operator, not a placeholder.
fn rewrite_named_placeholders(statement: &str) -> (String, Vec<String>) {
    let chars: Vec<char> = statement.chars().collect();
    let mut rewritten = String::with_capacity(statement.len());
    let mut names: Vec<String> = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let starts_name = chars.get(i + 1).map(|c| c.is_ascii_alphabetic() || *c == '_').unwrap_or(false);
        if c == ':' && chars.get(i + 1) != Some(&':') && starts_name {
            let mut j = i + 1;
            while j < chars.len() && (chars[j].is_ascii_alphanumeric() || chars[j] == '_') {
                j += 1;
            }
            names.push(chars[i + 1..j].iter().collect());
            rewritten.push('$');
            rewritten.push_str(&names.len().to_string());
            i = j;
        } else {
            rewritten.push(c);
            i += 1;
        }
    }
    (rewritten, names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_named_placeholders_in_order() {
        let (sql, names) = rewrite_named_placeholders("INSERT INTO t (a, b) VALUES (:b, :a)");
        assert_eq!(sql, "INSERT INTO t (a, b) VALUES ($1, $2)");
        assert_eq!(names, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn leaves_postgres_type_casts_alone() {
        let (sql, names) = rewrite_named_placeholders("SELECT :amount::numeric");
        assert_eq!(sql, "SELECT $1::numeric");
        assert_eq!(names, vec!["amount".to_string()]);
    }

    #[test]
    fn statement_without_placeholders_is_unchanged() {
        let (sql, names) = rewrite_named_placeholders("SELECT 1");
        assert_eq!(sql, "SELECT 1");
        assert!(names.is_empty());
    }

    #[test]
    fn repeated_name_binds_at_every_occurrence() {
        let (sql, names) = rewrite_named_placeholders("UPDATE t SET a = :v WHERE a <> :v");
        assert_eq!(sql, "UPDATE t SET a = $1 WHERE a <> $2");
        assert_eq!(names, vec!["v".to_string(), "v".to_string()]);
    }
}
