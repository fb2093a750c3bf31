//! Introspection and health endpoints: `/healthz`, `/readyz`,
//! `/collections`, `/collections/:name/relationships`, `/procedures`.
//! Unauthenticated — these describe the gateway's own shape, not
//! document data.

use crate::state::AppState;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use quarrygate_procedures::{DatabaseExecutor, HookRegistry, HttpClient};
use serde::Serialize;
use utoipa::openapi::OpenApi;

pub fn router<D, H, K>() -> Router<AppState<D, H, K>>
where
    D: DatabaseExecutor + 'static,
    H: HttpClient + 'static,
    K: HookRegistry + 'static,
{
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/collections", get(list_collections))
        .route("/collections/:name/relationships", get(relationships))
        .route("/procedures", get(list_procedures))
        .route("/openapi.json", get(openapi_document))
}

#[derive(Serialize)]
struct Healthz {
    status: &'static str,
    #[serde(rename = "uptimeSeconds")]
    uptime_seconds: u64,
}

async fn healthz<D, H, K>(State(state): State<AppState<D, H, K>>) -> Json<Healthz>
where
    D: DatabaseExecutor + 'static,
    H: HttpClient + 'static,
    K: HookRegistry + 'static,
{
    Json(Healthz { status: "ok", uptime_seconds: state.started_at.elapsed().as_secs() })
}

#[derive(Serialize)]
struct Readyz {
    ready: bool,
    collections: usize,
    procedures: usize,
}

async fn readyz<D, H, K>(State(state): State<AppState<D, H, K>>) -> Json<Readyz>
where
    D: DatabaseExecutor + 'static,
    H: HttpClient + 'static,
    K: HookRegistry + 'static,
{
    let registry = state.registry();
    Json(Readyz {
        ready: true,
        collections: registry.collection_names().count(),
        procedures: registry.procedure_names().count(),
    })
}

#[derive(Serialize)]
struct CollectionSummary {
    name: String,
    relationships: Vec<String>,
}

async fn list_collections<D, H, K>(State(state): State<AppState<D, H, K>>) -> Json<Vec<CollectionSummary>>
where
    D: DatabaseExecutor + 'static,
    H: HttpClient + 'static,
    K: HookRegistry + 'static,
{
    let registry = state.registry();
    let mut out: Vec<CollectionSummary> = registry
        .collection_names()
        .filter_map(|name| {
            registry.get_collection(name).map(|desc| CollectionSummary {
                name: desc.name.clone(),
                relationships: desc.relationships.keys().cloned().collect(),
            })
        })
        .collect();
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Json(out)
}

#[derive(Serialize)]
struct IncomingRelationshipView {
    #[serde(rename = "owningCollection")]
    owning_collection: String,
    alias: String,
}

async fn relationships<D, H, K>(
    State(state): State<AppState<D, H, K>>,
    Path(name): Path<String>,
) -> Json<Vec<IncomingRelationshipView>>
where
    D: DatabaseExecutor + 'static,
    H: HttpClient + 'static,
    K: HookRegistry + 'static,
{
    let registry = state.registry();
    let incoming = registry
        .incoming_relationships(&name)
        .iter()
        .map(|rel| IncomingRelationshipView { owning_collection: rel.owning_collection.clone(), alias: rel.alias.clone() })
        .collect();
    Json(incoming)
}

#[derive(Serialize)]
struct ProcedureSummary {
    name: String,
    method: String,
    endpoint: String,
}

async fn list_procedures<D, H, K>(State(state): State<AppState<D, H, K>>) -> Json<Vec<ProcedureSummary>>
where
    D: DatabaseExecutor + 'static,
    H: HttpClient + 'static,
    K: HookRegistry + 'static,
{
    let registry = state.registry();
    let mut out: Vec<ProcedureSummary> = registry
        .procedure_names()
        .filter_map(|name| {
            registry.get_procedure(name).map(|desc| ProcedureSummary {
                name: desc.name.clone(),
                method: desc.method.to_string(),
                endpoint: desc.endpoint.clone(),
            })
        })
        .collect();
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Json(out)
}

async fn openapi_document<D, H, K>(State(state): State<AppState<D, H, K>>) -> Json<OpenApi>
where
    D: DatabaseExecutor + 'static,
    H: HttpClient + 'static,
    K: HookRegistry + 'static,
{
    Json(crate::openapi::build(&state.registry()))
}
