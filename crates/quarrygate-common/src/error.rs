//! Unified error type for the gateway.
//!
//! Every error that can cross a request boundary is a [`GatewayError`]
//! with a wire-stable `kind()` (spec-visible identifiers) and a
//! `status_code()` mapping to the HTTP status the request pipeline must
//! answer with.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias used throughout the gateway.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Wire-stable error kind, exactly the identifiers named in the error
/// handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authentication,
    Authorization,
    NotFound,
    SchemaValidation,
    QueryParse,
    MethodOperationMismatch,
    RelationshipDepth,
    ComplexityExceeded,
    RateLimit,
    DuplicateKey,
    Timeout,
    Internal,
    ScriptParse,
    ScriptSecurity,
    ProcedureStep,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::Authorization => "authorization",
            ErrorKind::NotFound => "notFound",
            ErrorKind::SchemaValidation => "schemaValidation",
            ErrorKind::QueryParse => "queryParse",
            ErrorKind::MethodOperationMismatch => "methodOperationMismatch",
            ErrorKind::RelationshipDepth => "relationshipDepth",
            ErrorKind::ComplexityExceeded => "complexityExceeded",
            ErrorKind::RateLimit => "rateLimit",
            ErrorKind::DuplicateKey => "duplicateKey",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
            ErrorKind::ScriptParse => "scriptParse",
            ErrorKind::ScriptSecurity => "scriptSecurity",
            ErrorKind::ProcedureStep => "procedureStep",
        }
    }
}

/// Unified error type for all gateway operations.
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization denied: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Schema validation failed: {0}")]
    SchemaValidation(String),

    #[error("Query parse error: {0}")]
    QueryParse(String),

    /// Method/operation mismatch; `suggestion` is the method that would
    /// have produced the requested operation.
    #[error("Method/operation mismatch: {message}")]
    MethodOperationMismatch { message: String, suggestion: Option<String> },

    #[error("Relationship depth exceeded: {0}")]
    RelationshipDepth(String),

    #[error("Complexity budget exceeded: {0}")]
    ComplexityExceeded(String),

    /// Rate limit exhausted; `retry_after_secs` is the hint to return.
    #[error("Rate limit exceeded: {message}")]
    RateLimit { message: String, retry_after_secs: u64 },

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Timeout inside a procedure step; `partial_steps` is a JSON
    /// rendering of the context's steps map at the point of failure, so
    /// callers can diagnose.
    #[error("Timeout: {message}")]
    Timeout { message: String, partial_steps: Option<serde_json::Value> },

    /// Invariant violation; always carries a stable correlation id.
    #[error("Internal error ({correlation_id}): {message}")]
    Internal { message: String, correlation_id: String },

    #[error("Script parse error: {0}")]
    ScriptParse(String),

    #[error("Script security violation: {0}")]
    ScriptSecurity(String),

    #[error("Procedure step failed: {0}")]
    ProcedureStep(String),
}

impl GatewayError {
    /// Build an `Internal` error, minting a fresh correlation id.
    pub fn internal(message: impl Into<String>) -> Self {
        GatewayError::Internal {
            message: message.into(),
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Authentication(_) => ErrorKind::Authentication,
            GatewayError::Authorization(_) => ErrorKind::Authorization,
            GatewayError::NotFound(_) => ErrorKind::NotFound,
            GatewayError::SchemaValidation(_) => ErrorKind::SchemaValidation,
            GatewayError::QueryParse(_) => ErrorKind::QueryParse,
            GatewayError::MethodOperationMismatch { .. } => ErrorKind::MethodOperationMismatch,
            GatewayError::RelationshipDepth(_) => ErrorKind::RelationshipDepth,
            GatewayError::ComplexityExceeded(_) => ErrorKind::ComplexityExceeded,
            GatewayError::RateLimit { .. } => ErrorKind::RateLimit,
            GatewayError::DuplicateKey(_) => ErrorKind::DuplicateKey,
            GatewayError::Timeout { .. } => ErrorKind::Timeout,
            GatewayError::Internal { .. } => ErrorKind::Internal,
            GatewayError::ScriptParse(_) => ErrorKind::ScriptParse,
            GatewayError::ScriptSecurity(_) => ErrorKind::ScriptSecurity,
            GatewayError::ProcedureStep(_) => ErrorKind::ProcedureStep,
        }
    }

    /// HTTP status code this error must surface as.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Authentication(_) => 401,
            GatewayError::Authorization(_) => 403,
            GatewayError::NotFound(_) => 404,
            GatewayError::SchemaValidation(_)
            | GatewayError::QueryParse(_)
            | GatewayError::MethodOperationMismatch { .. }
            | GatewayError::RelationshipDepth(_)
            | GatewayError::ScriptParse(_) => 400,
            GatewayError::ComplexityExceeded(_) | GatewayError::RateLimit { .. } => 429,
            GatewayError::DuplicateKey(_) => 409,
            GatewayError::Timeout { .. } => 504,
            GatewayError::ScriptSecurity(_) => 400,
            GatewayError::ProcedureStep(_) => 500,
            GatewayError::Internal { .. } => 500,
        }
    }

    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            GatewayError::Internal { correlation_id, .. } => Some(correlation_id),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::SchemaValidation(err.to_string())
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<mongodb::error::Error> for GatewayError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind as MongoKind;
        match err.kind.as_ref() {
            MongoKind::Write(mongodb::error::WriteFailure::WriteError(we)) if we.code == 11000 => {
                GatewayError::DuplicateKey(we.message.clone())
            }
            _ => GatewayError::internal(format!("MongoDB error: {err}")),
        }
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::ser::Error> for GatewayError {
    fn from(err: bson::ser::Error) -> Self {
        GatewayError::internal(format!("BSON serialization error: {err}"))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::de::Error> for GatewayError {
    fn from(err: bson::de::Error) -> Self {
        GatewayError::internal(format!("BSON deserialization error: {err}"))
    }
}
