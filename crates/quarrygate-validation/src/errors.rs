//! Validation error collection.

use std::fmt;

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `address.zip`.
    pub path: String,
    /// Human-readable message.
    pub message: String,
    /// Coarse error category: "type_error", "value_error", "missing", "additional_property".
    pub error_type: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self { path: path.into(), message: message.into(), error_type: error_type.into() }
    }

    pub fn missing(path: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(path.clone(), format!("field '{path}' is required"), "missing")
    }

    pub fn type_error(path: impl Into<String>, expected: &str) -> Self {
        let path = path.into();
        Self::new(path.clone(), format!("field '{path}' must be of type {expected}"), "type_error")
    }
}

/// Ordered collection of [`ValidationError`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    pub errors: Vec<ValidationError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn push(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn extend(&mut self, other: ValidationErrors) {
        self.errors.extend(other.errors);
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} validation error(s)", self.errors.len())
    }
}

impl std::error::Error for ValidationErrors {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_error_names_the_field() {
        let err = ValidationError::missing("email");
        assert_eq!(err.error_type, "missing");
        assert!(err.message.contains("email"));
    }

    #[test]
    fn collection_tracks_emptiness() {
        let mut errors = ValidationErrors::new();
        assert!(errors.is_empty());
        errors.push(ValidationError::missing("name"));
        assert!(!errors.is_empty());
    }
}
