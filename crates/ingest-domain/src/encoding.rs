//! Centralized JSON encoding convention (spec §6): `timestamp` values become
//! ISO-8601 strings, `date`/`time` values their ISO-8601 date/time form, and
//! arbitrary-precision decimals become decimal-preserving strings.
//!
//! The original implementation scattered this logic across a bespoke JSON
//! encoder and ad hoc `json.dumps(..., default=...)` calls at every
//! publish/insert site; here it is one function the Relational Adapter's
//! row decoder and the Broker Adapter's publish path both call.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

/// A typed column/field value as read off the wire, prior to JSON encoding.
pub enum TypedValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    Decimal(Decimal),
    Json(Value),
}

/// Convert one typed value into its envelope (JSON) representation,
/// applying the documented type coercions.
pub fn to_envelope_value(value: TypedValue) -> Value {
    match value {
        TypedValue::Null => Value::Null,
        TypedValue::Bool(b) => Value::Bool(b),
        TypedValue::Int(i) => Value::Number(i.into()),
        TypedValue::Float(f) => serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        TypedValue::Text(s) => Value::String(s),
        TypedValue::Timestamp(ts) => Value::String(ts.to_rfc3339()),
        TypedValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
        TypedValue::Time(t) => Value::String(t.format("%H:%M:%S%.f").to_string()),
        TypedValue::Decimal(d) => Value::String(d.to_string()),
        TypedValue::Json(v) => v,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn decimal_preserves_precision_as_string() {
        let d = Decimal::from_str("19.9900").unwrap();
        let v = to_envelope_value(TypedValue::Decimal(d));
        assert_eq!(v, Value::String("19.9900".to_string()));
    }

    #[test]
    fn timestamp_encodes_as_rfc3339() {
        let ts = DateTime::parse_from_rfc3339("2026-07-27T00:00:00Z").unwrap().with_timezone(&Utc);
        let v = to_envelope_value(TypedValue::Timestamp(ts));
        assert_eq!(v, Value::String("2026-07-27T00:00:00+00:00".to_string()));
    }

    #[test]
    fn date_encodes_as_iso_date() {
        let d = NaiveDate::from_ymd_opt(2026, 7, 27).unwrap();
        let v = to_envelope_value(TypedValue::Date(d));
        assert_eq!(v, Value::String("2026-07-27".to_string()));
    }
}
