//! The message envelope threaded between steps: a dynamically-shaped
//! mapping from string keys to JSON-representable values.
//!
//! We carry it as a plain `serde_json::Value` rather than a bespoke wrapper
//! type — it already models the six JSON variants, and key lookups against
//! `Value::Object` are already missing-key-safe (`.get` returns `Option`).

use serde_json::{Map, Value};

pub type Envelope = Value;

/// Decode a raw inbound payload as JSON; fall back to a plain string
/// envelope if it doesn't parse (spec §4.7 step 1).
pub fn decode_raw_payload(raw: &str) -> Envelope {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Wrap a decoded payload under the broker shape: `{topic, data}`.
pub fn wrap_broker(topic: &str, data: Envelope) -> Envelope {
    let mut map = Map::new();
    map.insert("topic".to_string(), Value::String(topic.to_string()));
    map.insert("data".to_string(), data);
    Value::Object(map)
}

/// Wrap a decoded payload under the relational-trigger shape:
/// `{trigger_message: ...}`.
pub fn wrap_trigger_message(data: Envelope) -> Envelope {
    let mut map = Map::new();
    map.insert("trigger_message".to_string(), data);
    Value::Object(map)
}

/// Coerce an envelope into a list of row mappings for bulk insert (spec
/// §4.8): wrap a non-list envelope in a single-element list.
pub fn coerce_to_rows(envelope: &Envelope) -> Vec<Envelope> {
    match envelope {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_raw_payload_falls_back_to_string() {
        let env = decode_raw_payload("not json at all {");
        assert_eq!(env, Value::String("not json at all {".to_string()));
    }

    #[test]
    fn decode_raw_payload_parses_object() {
        let env = decode_raw_payload(r#"{"name":"alice"}"#);
        assert_eq!(env["name"], "alice");
    }

    #[test]
    fn wrap_broker_nests_under_topic_and_data() {
        let env = wrap_broker("in/x", serde_json::json!({"name": "alice"}));
        assert_eq!(env["topic"], "in/x");
        assert_eq!(env["data"]["name"], "alice");
    }

    #[test]
    fn coerce_to_rows_wraps_scalars() {
        let rows = coerce_to_rows(&serde_json::json!({"v": 1}));
        assert_eq!(rows.len(), 1);
        let rows = coerce_to_rows(&serde_json::json!([{"v": 1}, {"v": 2}]));
        assert_eq!(rows.len(), 2);
    }
}
