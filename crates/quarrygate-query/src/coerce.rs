//! Value coercion for filter operands (component C2).
//!
//! A filter operand arrives as a bare string (from a query string or a
//! JSON scalar). This module guesses its intended type using the rules
//! above the Filter Parser, never the declared property type — the
//! filter parser runs before (and independently of) schema validation.

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static HEX24: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{24}$").unwrap());
static INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+$").unwrap());
static FLOAT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+\.\d+$").unwrap());
static DATE_ONLY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

/// Coerce a raw operand string to its best-guess JSON representation.
///
/// Order matters: `null`/boolean literals are checked before numeric
/// patterns, a 24-hex string is deliberately kept as a string (callers
/// needing an id type re-cast it themselves), and datetime parsing is
/// attempted last since it is the most expensive check.
pub fn coerce(raw: &str) -> Value {
    if raw == "null" {
        return Value::Null;
    }
    if raw == "true" {
        return Value::Bool(true);
    }
    if raw == "false" {
        return Value::Bool(false);
    }
    if HEX24.is_match(raw) {
        return Value::String(raw.to_string());
    }
    if INTEGER.is_match(raw) {
        if let Ok(n) = raw.parse::<i64>() {
            return Value::Number(n.into());
        }
    }
    if FLOAT.is_match(raw) {
        if let Ok(f) = raw.parse::<f64>() {
            if let Some(num) = serde_json::Number::from_f64(f) {
                return Value::Number(num);
            }
        }
    }
    if let Some(ts) = coerce_timestamp(raw) {
        return Value::String(ts.to_rfc3339());
    }
    Value::String(raw.to_string())
}

fn coerce_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if DATE_ONLY.is_match(raw) {
        let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
        return Some(DateTime::from_naive_utc_and_offset(date.and_hms_opt(0, 0, 0)?, Utc));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerces_literals() {
        assert_eq!(coerce("null"), Value::Null);
        assert_eq!(coerce("true"), Value::Bool(true));
        assert_eq!(coerce("false"), Value::Bool(false));
    }

    #[test]
    fn coerces_numbers() {
        assert_eq!(coerce("42"), Value::Number(42.into()));
        assert_eq!(coerce("-7"), Value::Number((-7).into()));
        assert_eq!(coerce("3.14"), serde_json::json!(3.14));
    }

    #[test]
    fn keeps_hex24_as_string() {
        let id = "507f1f77bcf86cd799439011";
        assert_eq!(coerce(id), Value::String(id.to_string()));
    }

    #[test]
    fn coerces_dates() {
        let coerced = coerce("2024-12-01");
        assert!(matches!(coerced, Value::String(s) if s.starts_with("2024-12-01")));
    }

    #[test]
    fn falls_back_to_string() {
        assert_eq!(coerce("delivered"), Value::String("delivered".to_string()));
    }
}
