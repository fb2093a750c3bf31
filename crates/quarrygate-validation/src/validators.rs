//! Compiling [`PropertySchema`] trees into memoized validators and
//! running them against `serde_json::Value` documents.

use crate::errors::{ValidationError, ValidationErrors};
use crate::types::{PropertySchema, PropertyType};
use regex::Regex;
use std::collections::HashMap;

/// Whether a document is validated as a full replacement (all
/// `required` fields must be present) or an additive patch (only
/// present fields are checked).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    Replace,
    Additive,
}

/// A schema with its regex patterns pre-compiled, so repeated document
/// validation never re-parses a pattern string.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    property_type: Option<PropertyType>,
    pattern: Option<Regex>,
    minimum: Option<f64>,
    maximum: Option<f64>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    enum_values: Option<Vec<serde_json::Value>>,
    properties: Option<HashMap<String, CompiledSchema>>,
    required: Vec<String>,
    items: Option<Box<CompiledSchema>>,
    additional_properties: bool,
}

/// A compiled, reusable document validator. Build once at Schema
/// Registry load time with [`Validator::compile`]; call
/// [`Validator::validate`] per request.
#[derive(Debug, Clone)]
pub struct Validator {
    root: CompiledSchema,
}

impl Validator {
    /// Compile a top-level object schema. Returns validation errors if
    /// a `pattern` string fails to parse as a regex (a descriptor bug,
    /// caught at load time per the registry's failure semantics).
    pub fn compile(
        properties: &HashMap<String, PropertySchema>,
        required: &[String],
        additional_properties: bool,
    ) -> Result<Self, ValidationErrors> {
        let mut compiled_props = HashMap::with_capacity(properties.len());
        let mut errors = ValidationErrors::new();
        for (name, schema) in properties {
            match compile_node(schema) {
                Ok(node) => {
                    compiled_props.insert(name.clone(), node);
                }
                Err(e) => errors.push(ValidationError::new(name.clone(), e, "schema_error")),
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(Self {
            root: CompiledSchema {
                property_type: Some(PropertyType::Object),
                pattern: None,
                minimum: None,
                maximum: None,
                min_length: None,
                max_length: None,
                enum_values: None,
                properties: Some(compiled_props),
                required: required.to_vec(),
                items: None,
                additional_properties,
            },
        })
    }

    /// Validate a document against the compiled schema.
    pub fn validate(&self, value: &serde_json::Value, mode: ValidationMode) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        validate_node(&self.root, value, "", mode, &mut errors);
        errors
    }
}

fn compile_node(schema: &PropertySchema) -> Result<CompiledSchema, String> {
    let pattern = match &schema.pattern {
        Some(p) => Some(Regex::new(p).map_err(|e| format!("invalid pattern '{p}': {e}"))?),
        None => None,
    };
    let properties = match &schema.properties {
        Some(props) => {
            let mut out = HashMap::with_capacity(props.len());
            for (name, sub) in props {
                out.insert(name.clone(), compile_node(sub)?);
            }
            Some(out)
        }
        None => None,
    };
    let items = match &schema.items {
        Some(item) => Some(Box::new(compile_node(item)?)),
        None => None,
    };
    Ok(CompiledSchema {
        property_type: schema.property_type,
        pattern,
        minimum: schema.minimum,
        maximum: schema.maximum,
        min_length: schema.min_length,
        max_length: schema.max_length,
        enum_values: schema.enum_values.clone(),
        properties,
        required: schema.required.clone(),
        items,
        additional_properties: true,
    })
}

fn validate_node(
    node: &CompiledSchema,
    value: &serde_json::Value,
    path: &str,
    mode: ValidationMode,
    errors: &mut ValidationErrors,
) {
    if value.is_null() {
        return;
    }

    if let Some(expected) = node.property_type {
        if !type_matches(expected, value) {
            errors.push(ValidationError::type_error(path, expected.as_str()));
            return;
        }
    }

    if let Some(enum_values) = &node.enum_values {
        if !enum_values.contains(value) {
            errors.push(ValidationError::new(path, format!("value not in enum for '{path}'"), "value_error"));
        }
    }

    match value {
        serde_json::Value::String(s) => {
            if let Some(min) = node.min_length {
                if s.chars().count() < min {
                    errors.push(ValidationError::new(path, format!("'{path}' shorter than {min}"), "value_error"));
                }
            }
            if let Some(max) = node.max_length {
                if s.chars().count() > max {
                    errors.push(ValidationError::new(path, format!("'{path}' longer than {max}"), "value_error"));
                }
            }
            if let Some(re) = &node.pattern {
                if !re.is_match(s) {
                    errors.push(ValidationError::new(path, format!("'{path}' does not match pattern"), "value_error"));
                }
            }
        }
        serde_json::Value::Number(n) => {
            let as_f64 = n.as_f64().unwrap_or(f64::NAN);
            if let Some(min) = node.minimum {
                if as_f64 < min {
                    errors.push(ValidationError::new(path, format!("'{path}' below minimum {min}"), "value_error"));
                }
            }
            if let Some(max) = node.maximum {
                if as_f64 > max {
                    errors.push(ValidationError::new(path, format!("'{path}' above maximum {max}"), "value_error"));
                }
            }
        }
        serde_json::Value::Array(items) => {
            if let Some(item_schema) = &node.items {
                for (i, item) in items.iter().enumerate() {
                    let child_path = if path.is_empty() { i.to_string() } else { format!("{path}.{i}") };
                    validate_node(item_schema, item, &child_path, mode, errors);
                }
            }
        }
        serde_json::Value::Object(map) => {
            if let Some(props) = &node.properties {
                for name in &node.required {
                    let present = map.contains_key(name);
                    if !present && mode == ValidationMode::Replace {
                        let child_path = if path.is_empty() { name.clone() } else { format!("{path}.{name}") };
                        errors.push(ValidationError::missing(child_path));
                    }
                }
                for (key, child_value) in map {
                    let child_path = if path.is_empty() { key.clone() } else { format!("{path}.{key}") };
                    match props.get(key) {
                        Some(child_schema) => validate_node(child_schema, child_value, &child_path, mode, errors),
                        None => {
                            if !node.additional_properties {
                                errors.push(ValidationError::new(
                                    child_path,
                                    format!("unexpected property '{key}'"),
                                    "additional_property",
                                ));
                            }
                        }
                    }
                }
            }
        }
        _ => {}
    }
}

fn type_matches(expected: PropertyType, value: &serde_json::Value) -> bool {
    match expected {
        PropertyType::String => value.is_string(),
        PropertyType::Integer => value.as_i64().is_some() || value.as_u64().is_some(),
        PropertyType::Number => value.is_number(),
        PropertyType::Boolean => value.is_boolean(),
        PropertyType::Array => value.is_array(),
        PropertyType::Object => value.is_object(),
        PropertyType::Null => value.is_null(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user_schema() -> HashMap<String, PropertySchema> {
        let mut props = HashMap::new();
        props.insert("name".to_string(), PropertySchema::string());
        let mut email = PropertySchema::string();
        email.pattern = Some(r"^[^@]+@[^@]+$".to_string());
        props.insert("email".to_string(), email);
        let mut age = PropertySchema::integer();
        age.minimum = Some(0.0);
        props.insert("age".to_string(), age);
        props
    }

    #[test]
    fn replace_mode_requires_declared_fields() {
        let validator = Validator::compile(&user_schema(), &["name".to_string(), "email".to_string()], true).unwrap();
        let errors = validator.validate(&json!({"name": "Ada"}), ValidationMode::Replace);
        assert!(!errors.is_empty());
        assert!(errors.errors.iter().any(|e| e.path == "email"));
    }

    #[test]
    fn additive_mode_skips_missing_required() {
        let validator = Validator::compile(&user_schema(), &["name".to_string(), "email".to_string()], true).unwrap();
        let errors = validator.validate(&json!({"age": 5}), ValidationMode::Additive);
        assert!(errors.is_empty());
    }

    #[test]
    fn pattern_mismatch_is_reported() {
        let validator = Validator::compile(&user_schema(), &[], true).unwrap();
        let errors = validator.validate(&json!({"email": "not-an-email"}), ValidationMode::Additive);
        assert!(errors.errors.iter().any(|e| e.path == "email"));
    }

    #[test]
    fn numeric_bounds_are_enforced() {
        let validator = Validator::compile(&user_schema(), &[], true).unwrap();
        let errors = validator.validate(&json!({"age": -1}), ValidationMode::Additive);
        assert!(errors.errors.iter().any(|e| e.path == "age"));
    }

    #[test]
    fn additional_properties_false_rejects_unknown_fields() {
        let validator = Validator::compile(&user_schema(), &[], false).unwrap();
        let errors = validator.validate(&json!({"nickname": "Ace"}), ValidationMode::Additive);
        assert!(errors.errors.iter().any(|e| e.error_type == "additional_property"));
    }

    #[test]
    fn invalid_pattern_fails_at_compile_time() {
        let mut props = HashMap::new();
        let mut bad = PropertySchema::string();
        bad.pattern = Some("(unterminated".to_string());
        props.insert("bad".to_string(), bad);
        assert!(Validator::compile(&props, &[], true).is_err());
    }
}
