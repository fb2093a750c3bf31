//! Bounded condition grammar for `condition` steps: a fixed
//! comparison/boolean/property-access grammar with no code evaluation
//! path at all, so a procedure author can never smuggle in arbitrary
//! host-language `eval`.
//!
//! `expr := or_expr`
//! `or_expr := and_expr ('||' and_expr)*`
//! `and_expr := unary ('&&' unary)*`
//! `unary := '!' unary | comparison`
//! `comparison := operand (('==' | '!=' | '>=' | '<=' | '>' | '<') operand)?`
//! `operand := literal | path | '(' expr ')'`

use crate::context::ExecutionContext;
use crate::template::TemplatePath;
use quarrygate_common::GatewayError;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Path(TemplatePath),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, CmpOp, Box<Expr>),
}

struct Tokenizer<'a> {
    chars: Vec<char>,
    pos: usize,
    source: &'a str,
}

impl<'a> Tokenizer<'a> {
    fn new(source: &'a str) -> Self {
        Self { chars: source.chars().collect(), pos: 0, source }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn starts_with(&self, lit: &str) -> bool {
        lit.chars().enumerate().all(|(i, c)| self.peek_at(i) == Some(c))
    }

    fn consume(&mut self, n: usize) {
        self.pos += n;
    }

    fn fail(&self, msg: &str) -> GatewayError {
        GatewayError::ScriptParse(format!("{msg} at position {} in condition '{}'", self.pos, self.source))
    }
}

fn parse_expr(t: &mut Tokenizer) -> Result<Expr, GatewayError> {
    parse_or(t)
}

fn parse_or(t: &mut Tokenizer) -> Result<Expr, GatewayError> {
    let mut left = parse_and(t)?;
    loop {
        t.skip_ws();
        if t.starts_with("||") {
            t.consume(2);
            let right = parse_and(t)?;
            left = Expr::Or(Box::new(left), Box::new(right));
        } else {
            break;
        }
    }
    Ok(left)
}

fn parse_and(t: &mut Tokenizer) -> Result<Expr, GatewayError> {
    let mut left = parse_unary(t)?;
    loop {
        t.skip_ws();
        if t.starts_with("&&") {
            t.consume(2);
            let right = parse_unary(t)?;
            left = Expr::And(Box::new(left), Box::new(right));
        } else {
            break;
        }
    }
    Ok(left)
}

fn parse_unary(t: &mut Tokenizer) -> Result<Expr, GatewayError> {
    t.skip_ws();
    if t.peek() == Some('!') && t.peek_at(1) != Some('=') {
        t.consume(1);
        return Ok(Expr::Not(Box::new(parse_unary(t)?)));
    }
    parse_comparison(t)
}

fn parse_comparison(t: &mut Tokenizer) -> Result<Expr, GatewayError> {
    let left = parse_operand(t)?;
    t.skip_ws();
    let op = if t.starts_with("==") {
        t.consume(2);
        Some(CmpOp::Eq)
    } else if t.starts_with("!=") {
        t.consume(2);
        Some(CmpOp::Ne)
    } else if t.starts_with(">=") {
        t.consume(2);
        Some(CmpOp::Gte)
    } else if t.starts_with("<=") {
        t.consume(2);
        Some(CmpOp::Lte)
    } else if t.peek() == Some('>') {
        t.consume(1);
        Some(CmpOp::Gt)
    } else if t.peek() == Some('<') {
        t.consume(1);
        Some(CmpOp::Lt)
    } else {
        None
    };
    match op {
        Some(op) => {
            let right = parse_operand(t)?;
            Ok(Expr::Compare(Box::new(left), op, Box::new(right)))
        }
        None => Ok(left),
    }
}

fn parse_operand(t: &mut Tokenizer) -> Result<Expr, GatewayError> {
    t.skip_ws();
    match t.peek() {
        Some('(') => {
            t.consume(1);
            let inner = parse_expr(t)?;
            t.skip_ws();
            if t.peek() != Some(')') {
                return Err(t.fail("expected ')'"));
            }
            t.consume(1);
            Ok(inner)
        }
        Some('"') | Some('\'') => parse_string_literal(t),
        Some(c) if c.is_ascii_digit() || c == '-' => parse_number_literal(t),
        Some(c) if c.is_alphabetic() || c == '_' => parse_ident_or_path(t),
        _ => Err(t.fail("expected an operand")),
    }
}

fn parse_string_literal(t: &mut Tokenizer) -> Result<Expr, GatewayError> {
    let quote = t.peek().unwrap();
    t.consume(1);
    let start = t.pos;
    while t.peek().is_some() && t.peek() != Some(quote) {
        t.consume(1);
    }
    if t.peek() != Some(quote) {
        return Err(t.fail("unterminated string literal"));
    }
    let text: String = t.chars[start..t.pos].iter().collect();
    t.consume(1);
    Ok(Expr::Literal(Value::String(text)))
}

fn parse_number_literal(t: &mut Tokenizer) -> Result<Expr, GatewayError> {
    let start = t.pos;
    if t.peek() == Some('-') {
        t.consume(1);
    }
    while matches!(t.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
        t.consume(1);
    }
    let text: String = t.chars[start..t.pos].iter().collect();
    let number: f64 = text.parse().map_err(|_| t.fail("invalid number literal"))?;
    Ok(Expr::Literal(serde_json::json!(number)))
}

fn parse_ident_or_path(t: &mut Tokenizer) -> Result<Expr, GatewayError> {
    let start = t.pos;
    while matches!(t.peek(), Some(c) if c.is_alphanumeric() || c == '_' || c == '.' || c == '[' || c == ']') {
        t.consume(1);
    }
    let text: String = t.chars[start..t.pos].iter().collect();
    match text.as_str() {
        "true" => Ok(Expr::Literal(Value::Bool(true))),
        "false" => Ok(Expr::Literal(Value::Bool(false))),
        "null" => Ok(Expr::Literal(Value::Null)),
        _ => Ok(Expr::Path(TemplatePath::parse(&text))),
    }
}

fn resolve(expr: &Expr, ctx: &ExecutionContext) -> Value {
    match expr {
        Expr::Literal(v) => v.clone(),
        Expr::Path(p) => p.resolve(ctx).unwrap_or(Value::Null),
        Expr::Not(inner) => Value::Bool(!to_bool(&resolve(inner, ctx))),
        Expr::And(l, r) => Value::Bool(to_bool(&resolve(l, ctx)) && to_bool(&resolve(r, ctx))),
        Expr::Or(l, r) => Value::Bool(to_bool(&resolve(l, ctx)) || to_bool(&resolve(r, ctx))),
        Expr::Compare(l, op, r) => Value::Bool(compare(op, &resolve(l, ctx), &resolve(r, ctx))),
    }
}

fn to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn compare(op: &CmpOp, left: &Value, right: &Value) -> bool {
    if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
        return match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Gt => a > b,
            CmpOp::Gte => a >= b,
            CmpOp::Lt => a < b,
            CmpOp::Lte => a <= b,
        };
    }
    if let (Value::String(a), Value::String(b)) = (left, right) {
        return match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Gt => a > b,
            CmpOp::Gte => a >= b,
            CmpOp::Lt => a < b,
            CmpOp::Lte => a <= b,
        };
    }
    match op {
        CmpOp::Eq => left == right,
        CmpOp::Ne => left != right,
        _ => false,
    }
}

/// Parses and immediately evaluates a condition expression against
/// the context. Parsing a fresh grammar tree per call keeps the
/// evaluator free of any cached closures or compiled code objects.
pub fn evaluate(expression: &str, ctx: &ExecutionContext) -> Result<bool, GatewayError> {
    let mut tokenizer = Tokenizer::new(expression.trim());
    let expr = parse_expr(&mut tokenizer)?;
    tokenizer.skip_ws();
    if tokenizer.pos != tokenizer.chars.len() {
        return Err(tokenizer.fail("unexpected trailing input"));
    }
    Ok(to_bool(&resolve(&expr, ctx)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            params: json!({"age": 21, "name": "Ada"}),
            steps: HashMap::new(),
            user: json!({"role": "admin"}),
            config: json!({}),
            now: "t".into(),
        }
    }

    #[test]
    fn comparison_over_params() {
        assert!(evaluate("params.age >= 18", &ctx()).unwrap());
        assert!(!evaluate("params.age < 18", &ctx()).unwrap());
    }

    #[test]
    fn boolean_combination_with_parens() {
        assert!(evaluate("(params.age >= 18 && user.role == \"admin\") || false", &ctx()).unwrap());
    }

    #[test]
    fn negation_of_equality() {
        assert!(evaluate("!(params.name == \"Bob\")", &ctx()).unwrap());
    }

    #[test]
    fn missing_path_resolves_falsy() {
        assert!(!evaluate("params.missing == true", &ctx()).unwrap());
    }

    #[test]
    fn malformed_expression_is_rejected() {
        assert!(evaluate("params.age >=", &ctx()).is_err());
    }
}
