//! `<METHOD> /functions/:name` — procedure invocation.
//!
//! One route matches any method; the procedure descriptor's own
//! `method` is the source of truth, and a mismatch is reported the
//! same shape as a CRUD method/operation mismatch.

use crate::authorize::authorize_procedure;
use crate::envelope::{ApiError, Envelope, ResponseMeta};
use crate::rate_limit::RateLimitPolicy;
use crate::routes::authenticate;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::any;
use axum::{Json, Router};
use chrono::Utc;
use quarrygate_common::{GatewayError, HttpMethod};
use quarrygate_procedures::{DatabaseExecutor, ExecutionContext, HookRegistry, HttpClient, ProcedureOutput};
use quarrygate_validation::ValidationErrors;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

pub fn router<D, H, K>() -> Router<AppState<D, H, K>>
where
    D: DatabaseExecutor + 'static,
    H: HttpClient + 'static,
    K: HookRegistry + 'static,
{
    Router::new().route("/functions/:name", any(invoke))
}

fn format_errors(errors: &ValidationErrors) -> String {
    errors.errors.iter().map(|e| format!("{}: {}", e.path, e.message)).collect::<Vec<_>>().join("; ")
}

async fn invoke<D, H, K>(
    State(state): State<AppState<D, H, K>>,
    Path(name): Path<String>,
    method: axum::http::Method,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    body: Option<Json<Value>>,
) -> Result<Json<Envelope>, ApiError>
where
    D: DatabaseExecutor + 'static,
    H: HttpClient + 'static,
    K: HookRegistry + 'static,
{
    let subject = authenticate(&state, &headers)?;
    let started = std::time::Instant::now();

    let registry = state.registry();
    let descriptor = registry
        .get_procedure(&name)
        .ok_or_else(|| GatewayError::NotFound(format!("unknown procedure '{name}'")))?;

    let called_with = HttpMethod::from_str(method.as_str()).map_err(GatewayError::QueryParse)?;
    if called_with != descriptor.method {
        return Err(GatewayError::MethodOperationMismatch {
            message: format!("procedure '{name}' is bound to {}", descriptor.method),
            suggestion: Some(descriptor.method.to_string()),
        }
        .into());
    }

    authorize_procedure(&subject, &descriptor.permissions)?;

    let policy = match &descriptor.rate_limits {
        Some(p) => RateLimitPolicy { max_requests: p.requests, window: Duration::from_secs(p.window_secs) },
        None => state.config.rate_limit_policy_for(&subject.role),
    };
    state.rate_limiter.acquire(&subject.id, &policy)?;

    let params_value = match body {
        Some(Json(v)) => v,
        None => Value::Object(params.into_iter().map(|(k, v)| (k, Value::String(v))).collect()),
    };

    let input_errors = registry.validate_procedure_input(&name, &params_value)?;
    if !input_errors.is_empty() {
        return Err(GatewayError::SchemaValidation(format_errors(&input_errors)).into());
    }

    let user_value = serde_json::json!({"id": subject.id, "role": subject.role});
    let ctx = ExecutionContext::new(params_value, user_value, Value::Object(Default::default()), Utc::now().to_rfc3339());

    let output = state.executor.execute(descriptor, ctx).await?;
    let data = match output {
        ProcedureOutput::LastStep(v) => v,
        ProcedureOutput::StepMap(map) => Value::Object(map.into_iter().collect()),
    };

    let output_errors = registry.validate_procedure_output(&name, &data);
    if !output_errors.is_empty() {
        tracing::warn!(procedure = %name, errors = %format_errors(&output_errors), "procedure output failed its declared schema");
    }

    let response_meta = ResponseMeta {
        execution_time_ms: started.elapsed().as_millis() as u64,
        pipeline_stages: None,
        has_relationships: None,
        timestamp: Utc::now().to_rfc3339(),
    };
    Ok(Json(Envelope::success(data, response_meta)))
}
