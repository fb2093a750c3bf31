//! JSON-schema-like property descriptors.
//!
//! A [`PropertySchema`] is the declarative shape one property of a
//! collection document (or one field of a procedure's input/output)
//! takes. It mirrors the subset of JSON Schema the registry's
//! meta-schema recognizes: type, format, pattern, numeric/length
//! bounds, enum, nested object properties, and array item schema.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Primitive JSON type tags a property can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Null,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::String => "string",
            PropertyType::Integer => "integer",
            PropertyType::Number => "number",
            PropertyType::Boolean => "boolean",
            PropertyType::Array => "array",
            PropertyType::Object => "object",
            PropertyType::Null => "null",
        }
    }
}

/// Declarative schema for a single property.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub property_type: Option<PropertyType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(rename = "minLength", skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(rename = "maxLength", skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<serde_json::Value>>,
    /// Nested properties, present when `property_type == Object`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<HashMap<String, PropertySchema>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    /// Item schema, present when `property_type == Array`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<PropertySchema>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PropertySchema {
    pub fn new(property_type: PropertyType) -> Self {
        Self { property_type: Some(property_type), ..Default::default() }
    }

    pub fn string() -> Self {
        Self::new(PropertyType::String)
    }

    pub fn integer() -> Self {
        Self::new(PropertyType::Integer)
    }

    pub fn object(properties: HashMap<String, PropertySchema>) -> Self {
        Self { property_type: Some(PropertyType::Object), properties: Some(properties), ..Default::default() }
    }

    pub fn array(items: PropertySchema) -> Self {
        Self { property_type: Some(PropertyType::Array), items: Some(Box::new(items)), ..Default::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_set_expected_type() {
        assert_eq!(PropertySchema::string().property_type, Some(PropertyType::String));
        assert_eq!(PropertySchema::integer().property_type, Some(PropertyType::Integer));
    }

    #[test]
    fn round_trips_through_json() {
        let schema = PropertySchema::string();
        let json = serde_json::to_string(&schema).unwrap();
        let back: PropertySchema = serde_json::from_str(&json).unwrap();
        assert_eq!(back.property_type, Some(PropertyType::String));
    }
}
