//! Grammar: `db.<collection>.<operation>(<args>)[.chain(...)]*` (spec
//! §4.7/§6.4). The shell script is a convenience surface over the same
//! operations the pipeline builder and CRUD routes already speak.

use crate::jsonish::JsonishParser;
use quarrygate_common::GatewayError;
use quarrygate_query::complexity;
use serde_json::Value;

const READ_OPS: &[&str] = &["find", "findOne", "aggregate", "countDocuments", "distinct"];
const WRITE_OPS: &[&str] =
    &["insertOne", "insertMany", "updateOne", "updateMany", "replaceOne", "deleteOne", "deleteMany"];

fn known_operations() -> Vec<&'static str> {
    READ_OPS.iter().chain(WRITE_OPS.iter()).copied().collect()
}

/// Canonical positional parameter names for each operation, in the
/// order arguments appear inside the call's parentheses.
fn param_names(operation: &str) -> Result<&'static [&'static str], GatewayError> {
    match operation {
        "find" | "findOne" | "deleteOne" | "deleteMany" | "countDocuments" => Ok(&["filter"]),
        "insertOne" => Ok(&["document"]),
        "insertMany" => Ok(&["documents"]),
        "updateOne" | "updateMany" => Ok(&["filter", "update"]),
        "replaceOne" => Ok(&["filter", "replacement"]),
        "aggregate" => Ok(&["pipeline"]),
        "distinct" => Ok(&["field", "query"]),
        other => Err(GatewayError::ScriptParse(format!("unknown operation '{other}'"))),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedScript {
    pub collection: String,
    pub operation: String,
    pub params: serde_json::Map<String, Value>,
    pub meta: ScriptMeta,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptMeta {
    pub warnings: Vec<String>,
    pub complexity: f64,
    pub is_write: bool,
}

struct Cursor<'a> {
    chars: Vec<char>,
    pos: usize,
    source: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(source: &'a str) -> Self {
        Self { chars: source.chars().collect(), pos: 0, source }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect_literal(&mut self, lit: &str) -> Result<(), GatewayError> {
        self.skip_ws();
        for expected in lit.chars() {
            if self.peek() != Some(expected) {
                return Err(GatewayError::ScriptParse(format!(
                    "expected '{lit}' at position {} in '{}'",
                    self.pos, self.source
                )));
            }
            self.pos += 1;
        }
        Ok(())
    }

    fn read_ident(&mut self) -> Result<String, GatewayError> {
        self.skip_ws();
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(GatewayError::ScriptParse(format!(
                "expected identifier at position {} in '{}'",
                self.pos, self.source
            )));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    /// Consumes a balanced `(...)` group starting at the current `(`
    /// and returns its inner text (without the parens).
    fn read_balanced_parens(&mut self) -> Result<String, GatewayError> {
        self.skip_ws();
        if self.peek() != Some('(') {
            return Err(GatewayError::ScriptParse(format!(
                "expected '(' at position {} in '{}'",
                self.pos, self.source
            )));
        }
        let start = self.pos + 1;
        let mut depth: i32 = 0;
        loop {
            match self.peek() {
                None => return Err(GatewayError::ScriptParse("unterminated argument list".into())),
                Some('(' | '[' | '{') => {
                    depth += 1;
                    self.pos += 1;
                }
                Some(')' | ']' | '}') => {
                    depth -= 1;
                    self.pos += 1;
                    if depth == 0 {
                        break;
                    }
                }
                Some(_) => self.pos += 1,
            }
        }
        let end = self.pos - 1;
        Ok(self.chars[start..end].iter().collect())
    }
}

/// Splits a comma-separated argument list at top-level (depth-0)
/// commas only, so commas nested inside objects/arrays/strings are
/// left alone.
fn split_top_level_args(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in input.chars() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' => {
                    quote = Some(c);
                    current.push(c);
                }
                '(' | '[' | '{' => {
                    depth += 1;
                    current.push(c);
                }
                ')' | ']' | '}' => {
                    depth -= 1;
                    current.push(c);
                }
                ',' if depth == 0 => {
                    parts.push(current.trim().to_string());
                    current = String::new();
                }
                _ => current.push(c),
            },
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

fn parse_args(raw: &str, warnings: &mut Vec<String>) -> Result<Vec<Value>, GatewayError> {
    split_top_level_args(raw)
        .into_iter()
        .map(|piece| {
            let mut parser = JsonishParser::new(&piece);
            let value = parser.parse_value()?;
            warnings.extend(parser.warnings);
            Ok(value)
        })
        .collect()
}

fn json_depth(value: &Value) -> usize {
    match value {
        Value::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        Value::Array(arr) => 1 + arr.iter().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}

fn json_leaf_count(value: &Value) -> usize {
    match value {
        Value::Object(map) => map.values().map(json_leaf_count).sum::<usize>().max(1),
        Value::Array(arr) => arr.iter().map(json_leaf_count).sum::<usize>().max(1),
        _ => 1,
    }
}

/// Parses a `db.<collection>.<operation>(<args>)[.chain(...)]*`
/// script. Rejects calls that embed a dangerous MongoDB operator
/// unless `allow_dangerous_operators` is set.
pub fn parse_script(input: &str, allow_dangerous_operators: bool) -> Result<ParsedScript, GatewayError> {
    let trimmed = input.trim();
    let mut cursor = Cursor::new(trimmed);
    let mut warnings = Vec::new();

    cursor.expect_literal("db.")?;
    let collection = cursor.read_ident()?;
    cursor.expect_literal(".")?;
    let operation = cursor.read_ident()?;

    if !known_operations().contains(&operation.as_str()) {
        return Err(GatewayError::ScriptParse(format!(
            "unknown operation '{operation}'; expected one of {:?}",
            known_operations()
        )));
    }

    let names = param_names(&operation)?;
    let raw_args = cursor.read_balanced_parens()?;
    let arg_values = parse_args(&raw_args, &mut warnings)?;
    if arg_values.len() > names.len() {
        return Err(GatewayError::ScriptParse(format!(
            "'{operation}' takes at most {} argument(s), found {}",
            names.len(),
            arg_values.len()
        )));
    }

    let mut params = serde_json::Map::new();
    for (name, value) in names.iter().zip(arg_values.iter()) {
        params.insert((*name).to_string(), value.clone());
    }

    cursor.skip_ws();
    while cursor.peek() == Some('.') {
        cursor.pos += 1;
        let chain_op = cursor.read_ident()?;
        let raw_chain_args = cursor.read_balanced_parens()?;
        let chain_args = parse_args(&raw_chain_args, &mut warnings)?;
        match chain_op.as_str() {
            "sort" | "project" => {
                let value = chain_args.into_iter().next().ok_or_else(|| {
                    GatewayError::ScriptParse(format!("'.{chain_op}(...)' requires one object argument"))
                })?;
                params.insert(chain_op, value);
            }
            "limit" | "skip" => {
                let value = chain_args.into_iter().next().ok_or_else(|| {
                    GatewayError::ScriptParse(format!("'.{chain_op}(...)' requires one numeric argument"))
                })?;
                params.insert(chain_op, value);
            }
            other => {
                return Err(GatewayError::ScriptParse(format!("unsupported chained call '.{other}(...)'")));
            }
        }
        cursor.skip_ws();
    }

    if cursor.pos != cursor.chars.len() {
        return Err(GatewayError::ScriptParse(format!(
            "unexpected trailing input at position {} in '{}'",
            cursor.pos, trimmed
        )));
    }

    let all_values: Vec<Value> = params.values().cloned().collect();
    let dangerous = complexity::dangerous_operator_count(&all_values);
    if dangerous > 0 && !allow_dangerous_operators {
        return Err(GatewayError::ScriptSecurity(format!(
            "script uses a disallowed operator ({dangerous} occurrence(s) of {:?})",
            complexity::DANGEROUS_OPERATORS
        )));
    }

    let is_write = WRITE_OPS.contains(&operation.as_str());
    let cost = compute_script_cost(&all_values, params.len(), dangerous);

    Ok(ParsedScript {
        collection,
        operation,
        params,
        meta: ScriptMeta { warnings, complexity: cost, is_write },
    })
}

/// Same unified formula the pipeline builder uses, with argument leaf
/// count standing in for selected fields, chained calls standing in
/// for joined relationships, and JSON nesting depth standing in for
/// selection depth.
fn compute_script_cost(args: &[Value], stage_count: usize, dangerous_count: usize) -> f64 {
    let fields: f64 = args.iter().map(json_leaf_count).sum::<usize>() as f64;
    let depth = args.iter().map(json_depth).max().unwrap_or(0) as f64;

    complexity::BASE_COST
        + complexity::FIELD_WEIGHT * fields
        + complexity::RELATIONSHIP_WEIGHT * stage_count as f64
        + complexity::DEPTH_WEIGHT * depth
        + complexity::DANGEROUS_OPERATOR_PENALTY * dangerous_count as f64
}

/// Converts a parsed script back into the shape the pipeline builder's
/// `PipelineRequest`/raw-aggregate path expects: a bare `(collection,
/// operation, params)` tuple it can route on.
pub fn into_pipeline_shape(script: &ParsedScript) -> (String, String, serde_json::Map<String, Value>) {
    (script.collection.clone(), script.operation.clone(), script.params.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn find_with_sort_and_limit_chain_parses_each_stage() {
        let parsed = parse_script(r#"db.users.find({age:{$gte:18}}).sort({name:1}).limit(10)"#, false).unwrap();
        assert_eq!(parsed.collection, "users");
        assert_eq!(parsed.operation, "find");
        assert_eq!(parsed.params["filter"], json!({"age": {"$gte": 18}}));
        assert_eq!(parsed.params["sort"], json!({"name": 1}));
        assert_eq!(parsed.params["limit"], json!(10));
        assert!(!parsed.meta.is_write);
    }

    #[test]
    fn unquoted_keys_and_trailing_commas_emit_warnings_not_errors() {
        let parsed = parse_script(r#"db.orders.find({status: "open",})"#, false).unwrap();
        assert_eq!(parsed.params["filter"], json!({"status": "open"}));
        assert!(parsed.meta.warnings.iter().any(|w| w.contains("unquoted key")));
        assert!(parsed.meta.warnings.iter().any(|w| w.contains("trailing comma")));
    }

    #[test]
    fn update_one_maps_filter_and_update_positionally() {
        let parsed = parse_script(r#"db.users.updateOne({_id: "507f1f77bcf86cd799439011"}, {$set: {active: true}})"#, false).unwrap();
        assert_eq!(parsed.operation, "updateOne");
        assert_eq!(parsed.params["filter"]["_id"], json!("507f1f77bcf86cd799439011"));
        assert_eq!(parsed.params["update"], json!({"$set": {"active": true}}));
        assert!(parsed.meta.is_write);
    }

    #[test]
    fn dangerous_operator_rejected_unless_explicitly_allowed() {
        let err = parse_script(r#"db.users.find({$where: "this.x > 1"})"#, false).unwrap_err();
        assert_eq!(err.kind().as_str(), "scriptSecurity");

        let allowed = parse_script(r#"db.users.find({$where: "this.x > 1"})"#, true).unwrap();
        assert_eq!(allowed.operation, "find");
    }

    #[test]
    fn unknown_operation_is_rejected() {
        let err = parse_script("db.users.dropCollection()", false).unwrap_err();
        assert_eq!(err.kind().as_str(), "scriptParse");
    }

    #[test]
    fn distinct_takes_field_and_optional_query() {
        let parsed = parse_script(r#"db.orders.distinct("status", {active: true})"#, false).unwrap();
        assert_eq!(parsed.params["field"], json!("status"));
        assert_eq!(parsed.params["query"], json!({"active": true}));
    }

    #[test]
    fn too_many_arguments_is_rejected() {
        let err = parse_script(r#"db.users.find({}, {}, {})"#, false).unwrap_err();
        assert_eq!(err.kind().as_str(), "scriptParse");
    }
}
