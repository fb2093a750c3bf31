//! Typed `{{path}}` interpolation.
//!
//! Each `{{...}}` is parsed once into a [`TemplatePath`] and rendering
//! walks the execution context directly, so a malformed path is a
//! parse-time fact rather than something that only shows up once a
//! regex fails to match at render time.

use crate::context::ExecutionContext;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// A parsed `{{...}}` path, e.g. `steps.fetchUser.output.addresses[0].city`.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplatePath {
    pub raw: String,
    pub segments: Vec<PathSegment>,
}

impl TemplatePath {
    pub fn parse(raw: &str) -> Self {
        let mut segments = Vec::new();
        for part in raw.split('.') {
            let rest = part;
            match rest.find('[') {
                None => {
                    if !rest.is_empty() {
                        segments.push(PathSegment::Field(rest.to_string()));
                    }
                }
                Some(bracket) => {
                    let (ident, mut tail) = rest.split_at(bracket);
                    if !ident.is_empty() {
                        segments.push(PathSegment::Field(ident.to_string()));
                    }
                    while let Some(stripped) = tail.strip_prefix('[') {
                        if let Some(close) = stripped.find(']') {
                            if let Ok(idx) = stripped[..close].parse::<usize>() {
                                segments.push(PathSegment::Index(idx));
                            }
                            tail = &stripped[close + 1..];
                        } else {
                            break;
                        }
                    }
                }
            }
        }
        Self { raw: raw.to_string(), segments }
    }

    /// Walks `params.*`, `steps.<id>.output.*`, `user.*`, `config.*`,
    /// or the bare `now` root through the context. `None` means the
    /// lookup failed (spec: leave the token verbatim, log, not fatal).
    pub fn resolve(&self, ctx: &ExecutionContext) -> Option<Value> {
        let (root, rest) = self.segments.split_first()?;
        let PathSegment::Field(root_name) = root else { return None };
        match root_name.as_str() {
            "now" if rest.is_empty() => Some(Value::String(ctx.now.clone())),
            "params" => walk(&ctx.params, rest),
            "user" => walk(&ctx.user, rest),
            "config" => walk(&ctx.config, rest),
            "steps" => {
                let (step_id, after_id) = rest.split_first()?;
                let PathSegment::Field(step_id) = step_id else { return None };
                let record = ctx.steps.get(step_id)?;
                let (output_field, after_output) = after_id.split_first()?;
                match output_field {
                    PathSegment::Field(f) if f == "output" => walk(&record.output, after_output),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

fn walk(value: &Value, segments: &[PathSegment]) -> Option<Value> {
    let mut current = value;
    for segment in segments {
        current = match (segment, current) {
            (PathSegment::Field(f), Value::Object(map)) => map.get(f)?,
            (PathSegment::Index(i), Value::Array(arr)) => arr.get(*i)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(String),
    Path(TemplatePath),
}

fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut rest = input;
    while let Some(open) = rest.find("{{") {
        if open > 0 {
            tokens.push(Token::Literal(rest[..open].to_string()));
        }
        let after_open = &rest[open + 2..];
        match after_open.find("}}") {
            Some(close) => {
                let path_src = after_open[..close].trim();
                tokens.push(Token::Path(TemplatePath::parse(path_src)));
                rest = &after_open[close + 2..];
            }
            None => {
                tokens.push(Token::Literal(rest[open..].to_string()));
                rest = "";
                break;
            }
        }
    }
    if !rest.is_empty() {
        tokens.push(Token::Literal(rest.to_string()));
    }
    tokens
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Renders one string: if it is exactly one `{{path}}` token with no
/// surrounding literal text, the resolved value's type is preserved;
/// otherwise the result is always a string.
pub fn render_string(raw: &str, ctx: &ExecutionContext) -> Value {
    let tokens = tokenize(raw);
    if let [Token::Path(path)] = tokens.as_slice() {
        return match path.resolve(ctx) {
            Some(value) => value,
            None => {
                tracing::warn!(path = %path.raw, "template path did not resolve; leaving token verbatim");
                Value::String(raw.to_string())
            }
        };
    }

    let mut out = String::new();
    for token in &tokens {
        match token {
            Token::Literal(text) => out.push_str(text),
            Token::Path(path) => match path.resolve(ctx) {
                Some(value) => out.push_str(&stringify(&value)),
                None => {
                    tracing::warn!(path = %path.raw, "template path did not resolve; leaving token verbatim");
                    out.push_str("{{");
                    out.push_str(&path.raw);
                    out.push_str("}}");
                }
            },
        }
    }
    Value::String(out)
}

/// Recursively renders every string in a JSON tree, honoring `[n]`
/// array indexing inside paths.
pub fn render_tree(value: &Value, ctx: &ExecutionContext) -> Value {
    match value {
        Value::String(s) => render_string(s, ctx),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_tree(v, ctx)).collect()),
        Value::Object(map) => {
            Value::Object(map.iter().map(|(k, v)| (k.clone(), render_tree(v, ctx))).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StepRecord;
    use serde_json::json;
    use std::collections::HashMap;

    fn ctx() -> ExecutionContext {
        let mut steps = HashMap::new();
        steps.insert(
            "fetchUser".to_string(),
            StepRecord { output: json!({"name": "Ada", "addresses": [{"city": "Paris"}]}), execution_time_ms: 3, timestamp: "t".into() },
        );
        ExecutionContext {
            params: json!({"age": 30}),
            steps,
            user: json!({"role": "admin"}),
            config: json!({"region": "eu"}),
            now: "2026-07-27T00:00:00Z".into(),
        }
    }

    #[test]
    fn whole_string_template_preserves_value_type() {
        let rendered = render_string("{{params.age}}", &ctx());
        assert_eq!(rendered, json!(30));
    }

    #[test]
    fn nested_step_output_and_array_indexing() {
        let rendered = render_string("City: {{steps.fetchUser.output.addresses[0].city}}", &ctx());
        assert_eq!(rendered, json!("City: Paris"));
    }

    #[test]
    fn missing_path_leaves_token_verbatim() {
        let rendered = render_string("{{params.missing}}", &ctx());
        assert_eq!(rendered, json!("{{params.missing}}"));
    }

    #[test]
    fn render_tree_walks_nested_objects_and_arrays() {
        let template = json!({"greeting": "Hi {{params.age}}", "tags": ["{{user.role}}"]});
        let rendered = render_tree(&template, &ctx());
        assert_eq!(rendered, json!({"greeting": "Hi 30", "tags": ["admin"]}));
    }
}
