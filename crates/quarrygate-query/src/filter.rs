//! Parses `field=op.value` query-string filters into MongoDB match
//! expressions.

use crate::coerce::coerce;
use regex::escape;
use serde_json::Value;
use std::collections::HashMap;

const RESERVED_KEYS: &[&str] = &["select", "sort", "order", "page", "limit", "offset", "search", "searchFields"];

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    /// Case-insensitive glob, `*` already rewritten to `.*` and the
    /// rest regex-escaped. `like` and `ilike` are both case-insensitive
    /// per the operator table; only kept as distinct variants to
    /// preserve which spelling the caller used.
    Like(String),
    ILike(String),
    Regex(String),
    Exists(bool),
    IsNull(bool),
    Empty(bool),
}

/// Result of parsing one request's filter keys.
#[derive(Debug, Clone, Default)]
pub struct ParsedFilters {
    pub direct_filters: HashMap<String, Condition>,
    pub relationship_filters: HashMap<String, HashMap<String, Condition>>,
    pub special_filters: HashMap<String, String>,
    pub has_relationship_filters: bool,
    unknown_operators: Vec<(String, String)>,
}

impl ParsedFilters {
    /// Surface unknown-operator diagnostics deferred from parse time.
    pub fn validate(&self) -> Vec<String> {
        self.unknown_operators
            .iter()
            .map(|(key, op)| format!("unknown filter operator '{op}' on '{key}'"))
            .collect()
    }
}

/// Parse a flat key/value map (request query string or filter body).
pub fn parse(params: &[(String, String)]) -> ParsedFilters {
    let mut result = ParsedFilters::default();

    for (key, value) in params {
        if key.starts_with('$') || RESERVED_KEYS.contains(&key.as_str()) {
            result.special_filters.insert(key.clone(), value.clone());
            continue;
        }

        let (condition, unknown_op) = parse_operand(value);
        if let Some(op) = unknown_op {
            result.unknown_operators.push((key.clone(), op));
        }

        if let Some((alias, field)) = key.split_once('.') {
            result
                .relationship_filters
                .entry(alias.to_string())
                .or_default()
                .insert(field.to_string(), condition);
        } else {
            result.direct_filters.insert(key.clone(), condition);
        }
    }

    result.has_relationship_filters = !result.relationship_filters.is_empty();
    result
}

fn parse_operand(value: &str) -> (Condition, Option<String>) {
    if let Some((op, operand)) = value.split_once('.') {
        if let Some(condition) = dispatch_known(op, operand) {
            return (condition, None);
        }
        if looks_like_operator_prefix(op) {
            return (Condition::Eq(coerce(value)), Some(op.to_string()));
        }
    }
    (Condition::Eq(coerce(value)), None)
}

fn looks_like_operator_prefix(candidate: &str) -> bool {
    !candidate.is_empty() && candidate.chars().all(|c| c.is_ascii_lowercase())
}

fn dispatch_known(op: &str, operand: &str) -> Option<Condition> {
    Some(match op {
        "eq" => Condition::Eq(coerce(operand)),
        "ne" | "neq" => Condition::Ne(coerce(operand)),
        "gt" => Condition::Gt(coerce(operand)),
        "gte" => Condition::Gte(coerce(operand)),
        "lt" => Condition::Lt(coerce(operand)),
        "lte" => Condition::Lte(coerce(operand)),
        "in" => Condition::In(parse_list(operand)),
        "nin" => Condition::Nin(parse_list(operand)),
        "like" => Condition::Like(glob_to_regex(operand)),
        "ilike" => Condition::ILike(glob_to_regex(operand)),
        "regex" => Condition::Regex(operand.to_string()),
        "exists" => Condition::Exists(operand == "true"),
        "null" => Condition::IsNull(operand == "true"),
        "empty" => Condition::Empty(operand == "true"),
        _ => return None,
    })
}

fn parse_list(operand: &str) -> Vec<Value> {
    let trimmed = operand.strip_prefix('(').unwrap_or(operand);
    let trimmed = trimmed.strip_suffix(')').unwrap_or(trimmed);
    trimmed.split(',').map(|part| coerce(part.trim())).collect()
}

fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::new();
    for c in pattern.chars() {
        if c == '*' {
            out.push_str(".*");
        } else {
            out.push_str(&escape(&c.to_string()));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn routes_direct_relationship_and_special_keys() {
        let parsed = parse(&params(&[
            ("name", "like.John*"),
            ("orders.totalAmount", "gte.100"),
            ("search", "acme"),
            ("$comment", "ignored"),
        ]));
        assert!(parsed.direct_filters.contains_key("name"));
        assert!(parsed.relationship_filters.get("orders").unwrap().contains_key("totalAmount"));
        assert!(parsed.has_relationship_filters);
        assert!(parsed.special_filters.contains_key("search"));
        assert!(parsed.special_filters.contains_key("$comment"));
    }

    #[test]
    fn like_is_case_insensitive_glob() {
        let parsed = parse(&params(&[("name", "like.John*")]));
        match parsed.direct_filters.get("name") {
            Some(Condition::Like(pattern)) => assert_eq!(pattern, "John.*"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn in_operator_parses_operand_list() {
        let parsed = parse(&params(&[("status", "in.(pending,delivered)")]));
        match parsed.direct_filters.get("status") {
            Some(Condition::In(values)) => {
                assert_eq!(values, &vec![Value::String("pending".into()), Value::String("delivered".into())]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unrecognized_prefix_falls_back_to_eq_and_is_flagged() {
        let parsed = parse(&params(&[("status", "bogus.delivered")]));
        match parsed.direct_filters.get("status") {
            Some(Condition::Eq(Value::String(s))) => assert_eq!(s, "bogus.delivered"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(parsed.validate(), vec!["unknown filter operator 'bogus' on 'status'".to_string()]);
    }

    #[test]
    fn plain_float_value_is_not_mistaken_for_an_operator() {
        let parsed = parse(&params(&[("totalAmount", "3.14")]));
        assert_eq!(parsed.direct_filters.get("totalAmount"), Some(&Condition::Eq(serde_json::json!(3.14))));
        assert!(parsed.validate().is_empty());
    }

    #[test]
    fn no_prefix_defaults_to_eq() {
        let parsed = parse(&params(&[("status", "delivered")]));
        assert_eq!(parsed.direct_filters.get("status"), Some(&Condition::Eq(Value::String("delivered".into()))));
    }
}
