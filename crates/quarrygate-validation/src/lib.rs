//! Unified document validation for quarrygate — a JSON-Schema-like
//! validator compiled once per collection/procedure descriptor and
//! reused across every request.

pub mod errors;
pub mod types;
pub mod validators;

pub use errors::{ValidationError, ValidationErrors};
pub use types::{PropertySchema, PropertyType};
pub use validators::{CompiledSchema, ValidationMode, Validator};
