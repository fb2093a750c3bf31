//! A tolerant JSON-ish value parser: permits unquoted identifier keys
//! and trailing commas, emitting a warning for each instead of
//! failing.

use quarrygate_common::GatewayError;
use quarrygate_query::coerce_value;
use serde_json::{Map, Value};

pub struct JsonishParser<'a> {
    chars: Vec<char>,
    pos: usize,
    source: &'a str,
    pub warnings: Vec<String>,
}

impl<'a> JsonishParser<'a> {
    pub fn new(source: &'a str) -> Self {
        Self { chars: source.chars().collect(), pos: 0, source, warnings: Vec::new() }
    }

    pub fn parse_value(&mut self) -> Result<Value, GatewayError> {
        self.skip_ws();
        match self.peek() {
            Some('{') => self.parse_object(),
            Some('[') => self.parse_array(),
            Some('"') | Some('\'') => self.parse_string().map(Value::String),
            Some(_) => self.parse_bare(),
            None => Err(GatewayError::ScriptParse(format!("unexpected end of input in '{}'", self.source))),
        }
    }

    fn parse_object(&mut self) -> Result<Value, GatewayError> {
        self.expect('{')?;
        let mut map = Map::new();
        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.pos += 1;
                break;
            }
            let key = self.parse_key()?;
            self.skip_ws();
            self.expect(':')?;
            let value = self.parse_value()?;
            map.insert(key, value);
            self.skip_ws();
            match self.peek() {
                Some(',') => {
                    self.pos += 1;
                    self.skip_ws();
                    if self.peek() == Some('}') {
                        self.warnings.push("trailing comma in object".to_string());
                        self.pos += 1;
                        break;
                    }
                }
                Some('}') => {
                    self.pos += 1;
                    break;
                }
                other => return Err(GatewayError::ScriptParse(format!("expected ',' or '}}', found {other:?}"))),
            }
        }
        Ok(Value::Object(map))
    }

    fn parse_array(&mut self) -> Result<Value, GatewayError> {
        self.expect('[')?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(']') {
                self.pos += 1;
                break;
            }
            items.push(self.parse_value()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => {
                    self.pos += 1;
                    self.skip_ws();
                    if self.peek() == Some(']') {
                        self.warnings.push("trailing comma in array".to_string());
                        self.pos += 1;
                        break;
                    }
                }
                Some(']') => {
                    self.pos += 1;
                    break;
                }
                other => return Err(GatewayError::ScriptParse(format!("expected ',' or ']', found {other:?}"))),
            }
        }
        Ok(Value::Array(items))
    }

    fn parse_key(&mut self) -> Result<String, GatewayError> {
        match self.peek() {
            Some('"') | Some('\'') => self.parse_string(),
            Some(c) if c.is_alphabetic() || c == '_' => {
                let key = self.read_ident();
                self.warnings.push(format!("unquoted key '{key}'"));
                Ok(key)
            }
            other => Err(GatewayError::ScriptParse(format!("expected object key, found {other:?}"))),
        }
    }

    fn parse_string(&mut self) -> Result<String, GatewayError> {
        let quote = self.peek().unwrap();
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(GatewayError::ScriptParse("unterminated string".into())),
                Some('\\') => {
                    self.pos += 1;
                    if let Some(escaped) = self.peek() {
                        out.push(escaped);
                        self.pos += 1;
                    }
                }
                Some(c) if c == quote => {
                    self.pos += 1;
                    break;
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
        Ok(out)
    }

    fn parse_bare(&mut self) -> Result<Value, GatewayError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == ',' || c == '}' || c == ']' || c == ')' || c.is_whitespace() {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            return Err(GatewayError::ScriptParse(format!("unexpected character '{:?}' in '{}'", self.peek(), self.source)));
        }
        let token: String = self.chars[start..self.pos].iter().collect();
        Ok(coerce_value(&token))
    }

    fn read_ident(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn expect(&mut self, c: char) -> Result<(), GatewayError> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(GatewayError::ScriptParse(format!("expected '{c}', found {:?} in '{}'", self.peek(), self.source)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strict_json() {
        let mut parser = JsonishParser::new(r#"{"age": {"$gte": 18}}"#);
        let value = parser.parse_value().unwrap();
        assert_eq!(value, serde_json::json!({"age": {"$gte": 18}}));
        assert!(parser.warnings.is_empty());
    }

    #[test]
    fn tolerates_unquoted_keys_with_a_warning() {
        let mut parser = JsonishParser::new("{name: 1}");
        let value = parser.parse_value().unwrap();
        assert_eq!(value, serde_json::json!({"name": 1}));
        assert_eq!(parser.warnings.len(), 1);
    }

    #[test]
    fn tolerates_trailing_comma_with_a_warning() {
        let mut parser = JsonishParser::new(r#"{"name": 1,}"#);
        let value = parser.parse_value().unwrap();
        assert_eq!(value, serde_json::json!({"name": 1}));
        assert_eq!(parser.warnings.len(), 1);
    }

    #[test]
    fn bare_hex24_stays_a_string() {
        let mut parser = JsonishParser::new("507f1f77bcf86cd799439011");
        let value = parser.parse_value().unwrap();
        assert_eq!(value, Value::String("507f1f77bcf86cd799439011".to_string()));
    }
}
