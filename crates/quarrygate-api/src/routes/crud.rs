//! `/crud/:collection[/...]` — the relational query surface (spec
//! §6.1). Each handler authenticates the caller, assembles a
//! [`CrudRequest`] from the path/query/body, and hands it to
//! [`pipeline::run`] for the rest of the state machine.

use crate::envelope::{ApiError, Envelope, ResponseMeta};
use crate::pipeline::{self, CrudRequest};
use crate::routes::authenticate;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use quarrygate_common::HttpMethod;
use quarrygate_procedures::{DatabaseExecutor, HookRegistry, HttpClient};
use quarrygate_schema::Operation;
use serde_json::Value;
use std::collections::HashMap;

pub fn router<D, H, K>() -> Router<AppState<D, H, K>>
where
    D: DatabaseExecutor + 'static,
    H: HttpClient + 'static,
    K: HookRegistry + 'static,
{
    Router::new()
        .route("/crud/:collection", get(list).post(create))
        .route("/crud/:collection/aggregate", get(aggregate_via_query).post(aggregate_via_body))
        .route(
            "/crud/:collection/:id",
            get(get_one).put(replace_one).patch(update_one).delete(delete_one),
        )
}

fn operation_override(params: &HashMap<String, String>) -> Option<Operation> {
    match params.get("operation").map(String::as_str) {
        Some("find") => Some(Operation::Find),
        Some("findOne") => Some(Operation::FindOne),
        Some("insertOne") => Some(Operation::InsertOne),
        Some("insertMany") => Some(Operation::InsertMany),
        Some("replaceOne") => Some(Operation::ReplaceOne),
        Some("updateOne") => Some(Operation::UpdateOne),
        Some("updateMany") => Some(Operation::UpdateMany),
        Some("deleteOne") => Some(Operation::DeleteOne),
        Some("deleteMany") => Some(Operation::DeleteMany),
        Some("countDocuments") => Some(Operation::CountDocuments),
        Some("distinct") => Some(Operation::Distinct),
        Some("explain") => Some(Operation::Explain),
        _ => None,
    }
}

fn filter_pairs(params: &HashMap<String, String>) -> Vec<(String, String)> {
    params.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

fn meta(started: std::time::Instant, outcome: &pipeline::CrudOutcome) -> ResponseMeta {
    ResponseMeta {
        execution_time_ms: started.elapsed().as_millis() as u64,
        pipeline_stages: outcome.pipeline_stages,
        has_relationships: Some(outcome.has_relationships),
        timestamp: Utc::now().to_rfc3339(),
    }
}

async fn list<D, H, K>(
    State(state): State<AppState<D, H, K>>,
    Path(collection): Path<String>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Envelope>, ApiError>
where
    D: DatabaseExecutor + 'static,
    H: HttpClient + 'static,
    K: HookRegistry + 'static,
{
    let subject = authenticate(&state, &headers)?;
    let started = std::time::Instant::now();
    let req = CrudRequest {
        method: HttpMethod::Get,
        collection: &collection,
        id: None,
        is_aggregate_path: false,
        select: params.get("select").map(String::as_str),
        sort: params.get("sort").map(String::as_str),
        page: params.get("page").and_then(|v| v.parse().ok()),
        limit: params.get("limit").and_then(|v| v.parse().ok()),
        filter_params: filter_pairs(&params),
        raw_pipeline: None,
        body: None,
        distinct_field: params.get("field").map(String::as_str),
        operation_override: operation_override(&params),
    };
    let outcome = pipeline::run(state.executor.db(), &state.registry(), &state.config, &state.rate_limiter, &subject, req).await?;
    let response_meta = meta(started, &outcome);
    Ok(Json(Envelope::success(outcome.data, response_meta)))
}

async fn create<D, H, K>(
    State(state): State<AppState<D, H, K>>,
    Path(collection): Path<String>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Result<Json<Envelope>, ApiError>
where
    D: DatabaseExecutor + 'static,
    H: HttpClient + 'static,
    K: HookRegistry + 'static,
{
    let subject = authenticate(&state, &headers)?;
    let started = std::time::Instant::now();
    let req = CrudRequest {
        method: HttpMethod::Post,
        collection: &collection,
        id: None,
        is_aggregate_path: false,
        select: None,
        sort: None,
        page: None,
        limit: None,
        filter_params: filter_pairs(&params),
        raw_pipeline: None,
        body: Some(body),
        distinct_field: None,
        operation_override: operation_override(&params),
    };
    let outcome = pipeline::run(state.executor.db(), &state.registry(), &state.config, &state.rate_limiter, &subject, req).await?;
    let response_meta = meta(started, &outcome);
    Ok(Json(Envelope::success(outcome.data, response_meta)))
}

async fn get_one<D, H, K>(
    State(state): State<AppState<D, H, K>>,
    Path((collection, id)): Path<(String, String)>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Envelope>, ApiError>
where
    D: DatabaseExecutor + 'static,
    H: HttpClient + 'static,
    K: HookRegistry + 'static,
{
    let subject = authenticate(&state, &headers)?;
    let started = std::time::Instant::now();
    let req = CrudRequest {
        method: HttpMethod::Get,
        collection: &collection,
        id: Some(&id),
        is_aggregate_path: false,
        select: params.get("select").map(String::as_str),
        sort: None,
        page: None,
        limit: None,
        filter_params: filter_pairs(&params),
        raw_pipeline: None,
        body: None,
        distinct_field: None,
        operation_override: operation_override(&params),
    };
    let outcome = pipeline::run(state.executor.db(), &state.registry(), &state.config, &state.rate_limiter, &subject, req).await?;
    let response_meta = meta(started, &outcome);
    Ok(Json(Envelope::success(outcome.data, response_meta)))
}

async fn replace_one<D, H, K>(
    State(state): State<AppState<D, H, K>>,
    Path((collection, id)): Path<(String, String)>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Result<Json<Envelope>, ApiError>
where
    D: DatabaseExecutor + 'static,
    H: HttpClient + 'static,
    K: HookRegistry + 'static,
{
    let subject = authenticate(&state, &headers)?;
    let started = std::time::Instant::now();
    let req = CrudRequest {
        method: HttpMethod::Put,
        collection: &collection,
        id: Some(&id),
        is_aggregate_path: false,
        select: None,
        sort: None,
        page: None,
        limit: None,
        filter_params: filter_pairs(&params),
        raw_pipeline: None,
        body: Some(body),
        distinct_field: None,
        operation_override: operation_override(&params),
    };
    let outcome = pipeline::run(state.executor.db(), &state.registry(), &state.config, &state.rate_limiter, &subject, req).await?;
    let response_meta = meta(started, &outcome);
    Ok(Json(Envelope::success(outcome.data, response_meta)))
}

async fn update_one<D, H, K>(
    State(state): State<AppState<D, H, K>>,
    Path((collection, id)): Path<(String, String)>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Result<Json<Envelope>, ApiError>
where
    D: DatabaseExecutor + 'static,
    H: HttpClient + 'static,
    K: HookRegistry + 'static,
{
    let subject = authenticate(&state, &headers)?;
    let started = std::time::Instant::now();
    let req = CrudRequest {
        method: HttpMethod::Patch,
        collection: &collection,
        id: Some(&id),
        is_aggregate_path: false,
        select: None,
        sort: None,
        page: None,
        limit: None,
        filter_params: filter_pairs(&params),
        raw_pipeline: None,
        body: Some(body),
        distinct_field: None,
        operation_override: operation_override(&params),
    };
    let outcome = pipeline::run(state.executor.db(), &state.registry(), &state.config, &state.rate_limiter, &subject, req).await?;
    let response_meta = meta(started, &outcome);
    Ok(Json(Envelope::success(outcome.data, response_meta)))
}

async fn delete_one<D, H, K>(
    State(state): State<AppState<D, H, K>>,
    Path((collection, id)): Path<(String, String)>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Envelope>, ApiError>
where
    D: DatabaseExecutor + 'static,
    H: HttpClient + 'static,
    K: HookRegistry + 'static,
{
    let subject = authenticate(&state, &headers)?;
    let started = std::time::Instant::now();
    let req = CrudRequest {
        method: HttpMethod::Delete,
        collection: &collection,
        id: Some(&id),
        is_aggregate_path: false,
        select: None,
        sort: None,
        page: None,
        limit: None,
        filter_params: filter_pairs(&params),
        raw_pipeline: None,
        body: None,
        distinct_field: None,
        operation_override: operation_override(&params),
    };
    let outcome = pipeline::run(state.executor.db(), &state.registry(), &state.config, &state.rate_limiter, &subject, req).await?;
    let response_meta = meta(started, &outcome);
    Ok(Json(Envelope::success(outcome.data, response_meta)))
}

async fn aggregate_via_query<D, H, K>(
    State(state): State<AppState<D, H, K>>,
    Path(collection): Path<String>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Envelope>, ApiError>
where
    D: DatabaseExecutor + 'static,
    H: HttpClient + 'static,
    K: HookRegistry + 'static,
{
    let subject = authenticate(&state, &headers)?;
    let started = std::time::Instant::now();
    let req = CrudRequest {
        method: HttpMethod::Get,
        collection: &collection,
        id: None,
        is_aggregate_path: true,
        select: params.get("select").map(String::as_str),
        sort: params.get("sort").map(String::as_str),
        page: params.get("page").and_then(|v| v.parse().ok()),
        limit: params.get("limit").and_then(|v| v.parse().ok()),
        filter_params: filter_pairs(&params),
        raw_pipeline: None,
        body: None,
        distinct_field: None,
        operation_override: None,
    };
    let outcome = pipeline::run(state.executor.db(), &state.registry(), &state.config, &state.rate_limiter, &subject, req).await?;
    let response_meta = meta(started, &outcome);
    Ok(Json(Envelope::success(outcome.data, response_meta)))
}

async fn aggregate_via_body<D, H, K>(
    State(state): State<AppState<D, H, K>>,
    Path(collection): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Envelope>, ApiError>
where
    D: DatabaseExecutor + 'static,
    H: HttpClient + 'static,
    K: HookRegistry + 'static,
{
    let subject = authenticate(&state, &headers)?;
    let started = std::time::Instant::now();
    let raw_pipeline = body
        .get("pipeline")
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| quarrygate_common::GatewayError::QueryParse("body must contain a 'pipeline' array".into()))?;
    let req = CrudRequest {
        method: HttpMethod::Post,
        collection: &collection,
        id: None,
        is_aggregate_path: true,
        select: None,
        sort: None,
        page: None,
        limit: None,
        filter_params: vec![],
        raw_pipeline: Some(raw_pipeline),
        body: None,
        distinct_field: None,
        operation_override: None,
    };
    let outcome = pipeline::run(state.executor.db(), &state.registry(), &state.config, &state.rate_limiter, &subject, req).await?;
    let response_meta = meta(started, &outcome);
    Ok(Json(Envelope::success(outcome.data, response_meta)))
}
