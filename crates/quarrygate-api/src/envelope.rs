//! Response envelope and the `GatewayError -> HTTP` mapping used at
//! the request boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use quarrygate_common::GatewayError;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct ResponseMeta {
    #[serde(rename = "executionTime")]
    pub execution_time_ms: u64,
    #[serde(rename = "pipelineStages", skip_serializing_if = "Option::is_none")]
    pub pipeline_stages: Option<usize>,
    #[serde(rename = "hasRelationships", skip_serializing_if = "Option::is_none")]
    pub has_relationships: Option<bool>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Envelope {
    Success { success: bool, data: Value, meta: ResponseMeta },
    Failure { success: bool, error: String, message: String, #[serde(skip_serializing_if = "Option::is_none")] details: Option<Value>, #[serde(skip_serializing_if = "Option::is_none")] suggestion: Option<String> },
}

impl Envelope {
    pub fn success(data: Value, meta: ResponseMeta) -> Self {
        Envelope::Success { success: true, data, meta }
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        match &self {
            Envelope::Success { .. } => (StatusCode::OK, Json(self)).into_response(),
            Envelope::Failure { .. } => (StatusCode::OK, Json(self)).into_response(),
        }
    }
}

/// Maps a `GatewayError` to the failure envelope and its status code.
/// `partial_steps`, when present, rides in `details` so callers can
/// diagnose a mid-procedure timeout.
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let (suggestion, details) = match &err {
            GatewayError::MethodOperationMismatch { suggestion, .. } => (suggestion.clone(), None),
            GatewayError::Timeout { partial_steps, .. } => (None, partial_steps.clone()),
            GatewayError::Internal { correlation_id, .. } => (None, Some(serde_json::json!({"correlationId": correlation_id}))),
            _ => (None, None),
        };

        let body = Envelope::Failure {
            success: false,
            error: err.kind().as_str().to_string(),
            message: err.to_string(),
            details,
            suggestion,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_mismatch_carries_its_suggestion_through() {
        let err = GatewayError::MethodOperationMismatch {
            message: "x".into(),
            suggestion: Some("PATCH".into()),
        };
        let response: ApiError = err.into();
        assert_eq!(response.0.status_code(), 400);
    }
}
