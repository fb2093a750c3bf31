//! Route handlers, grouped by surface: CRUD, procedures, scripts, and
//! introspection/health (meta).

pub mod crud;
pub mod meta;
pub mod procedures;
pub mod scripts;

use crate::auth::{extract_bearer, Subject};
use crate::state::AppState;
use axum::http::HeaderMap;
use quarrygate_common::GatewayError;
use quarrygate_procedures::{DatabaseExecutor, HookRegistry, HttpClient};

/// Pulls the bearer token out of the `Authorization` header and
/// verifies it, the first thing every authenticated route does.
pub fn authenticate<D, H, K>(state: &AppState<D, H, K>, headers: &HeaderMap) -> Result<Subject, GatewayError>
where
    D: DatabaseExecutor + 'static,
    H: HttpClient + 'static,
    K: HookRegistry + 'static,
{
    let raw = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| GatewayError::Authentication("missing Authorization header".into()))?;
    let token = extract_bearer(raw)?;
    state.verifier.verify(token)
}
