//! `POST /scripts/execute` — the shell-script surface over the same
//! operations CRUD and procedures use.
//!
//! The body may name its source under `script`, `mongoScript`, or
//! `query`; whichever is present first wins.

use crate::envelope::{ApiError, Envelope, ResponseMeta};
use crate::routes::authenticate;
use crate::state::AppState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use quarrygate_common::GatewayError;
use quarrygate_procedures::{DatabaseExecutor, HookRegistry, HttpClient};
use quarrygate_query::pipeline::contains_write_stage;
use quarrygate_schema::Operation;
use quarrygate_script::parse_script;
use serde::Deserialize;
use serde_json::Value;

pub fn router<D, H, K>() -> Router<AppState<D, H, K>>
where
    D: DatabaseExecutor + 'static,
    H: HttpClient + 'static,
    K: HookRegistry + 'static,
{
    Router::new().route("/scripts/execute", post(execute))
}

#[derive(Debug, Deserialize)]
struct ExecuteBody {
    script: Option<String>,
    #[serde(rename = "mongoScript")]
    mongo_script: Option<String>,
    query: Option<String>,
}

impl ExecuteBody {
    fn source(&self) -> Result<&str, GatewayError> {
        self.script
            .as_deref()
            .or(self.mongo_script.as_deref())
            .or(self.query.as_deref())
            .ok_or_else(|| GatewayError::ScriptParse("body must set 'script', 'mongoScript', or 'query'".into()))
    }
}

fn to_operation(op: &str) -> Result<Operation, GatewayError> {
    match op {
        "find" => Ok(Operation::Find),
        "findOne" => Ok(Operation::FindOne),
        "aggregate" => Ok(Operation::Aggregate),
        "countDocuments" => Ok(Operation::CountDocuments),
        "distinct" => Ok(Operation::Distinct),
        "insertOne" => Ok(Operation::InsertOne),
        "insertMany" => Ok(Operation::InsertMany),
        "updateOne" => Ok(Operation::UpdateOne),
        "updateMany" => Ok(Operation::UpdateMany),
        "replaceOne" => Ok(Operation::ReplaceOne),
        "deleteOne" => Ok(Operation::DeleteOne),
        "deleteMany" => Ok(Operation::DeleteMany),
        other => Err(GatewayError::ScriptParse(format!("unsupported operation '{other}'"))),
    }
}

fn require(params: &serde_json::Map<String, Value>, key: &str) -> Result<Value, GatewayError> {
    params.get(key).cloned().ok_or_else(|| GatewayError::ScriptParse(format!("'{key}' is required for this operation")))
}

fn find_stages(params: &serde_json::Map<String, Value>) -> Vec<Value> {
    let mut stages = Vec::new();
    let filter = params.get("filter").cloned().unwrap_or_else(|| Value::Object(Default::default()));
    stages.push(serde_json::json!({"$match": filter}));
    if let Some(sort) = params.get("sort") {
        stages.push(serde_json::json!({"$sort": sort}));
    }
    if let Some(skip) = params.get("skip") {
        stages.push(serde_json::json!({"$skip": skip}));
    }
    if let Some(limit) = params.get("limit") {
        stages.push(serde_json::json!({"$limit": limit}));
    }
    if let Some(project) = params.get("project") {
        stages.push(serde_json::json!({"$project": project}));
    }
    stages
}

async fn execute<D, H, K>(
    State(state): State<AppState<D, H, K>>,
    headers: HeaderMap,
    Json(body): Json<ExecuteBody>,
) -> Result<Json<Envelope>, ApiError>
where
    D: DatabaseExecutor + 'static,
    H: HttpClient + 'static,
    K: HookRegistry + 'static,
{
    let subject = authenticate(&state, &headers)?;
    let started = std::time::Instant::now();

    let parsed = parse_script(body.source()?, state.config.allow_dangerous_operators)?;
    let operation = to_operation(&parsed.operation)?;

    let registry = state.registry();
    let collection = registry
        .get_collection(&parsed.collection)
        .ok_or_else(|| GatewayError::NotFound(format!("unknown collection '{}'", parsed.collection)))?;
    crate::authorize::authorize_operation(&subject, collection, operation)?;

    let ceilings = state.config.complexity_ceilings();
    ceilings.check(&subject.role, parsed.meta.complexity)?;

    let policy = state.config.rate_limit_policy_for(&subject.role);
    state.rate_limiter.acquire(&subject.id, &policy)?;

    let db = state.executor.db();
    let params = &parsed.params;
    let data = match operation {
        Operation::Find => {
            let stages = find_stages(params);
            db.aggregate(&parsed.collection, Value::Array(stages)).await?
        }
        Operation::FindOne => {
            let mut stages = find_stages(params);
            stages.push(serde_json::json!({"$limit": 1}));
            let result = db.aggregate(&parsed.collection, Value::Array(stages)).await?;
            match result {
                Value::Array(mut items) if !items.is_empty() => items.remove(0),
                Value::Array(_) => return Err(GatewayError::NotFound(format!("no document matched in '{}'", parsed.collection)).into()),
                other => other,
            }
        }
        Operation::Aggregate => {
            let stages = require(params, "pipeline")?;
            let stage_vec = stages.as_array().cloned().ok_or_else(|| GatewayError::ScriptParse("'pipeline' must be an array".into()))?;
            if contains_write_stage(&stage_vec) {
                return Err(GatewayError::MethodOperationMismatch {
                    message: "aggregate scripts may not carry a $merge/$out stage".into(),
                    suggestion: None,
                }
                .into());
            }
            db.aggregate(&parsed.collection, Value::Array(stage_vec)).await?
        }
        Operation::CountDocuments => {
            let filter = params.get("filter").cloned().unwrap_or_else(|| Value::Object(Default::default()));
            db.count_documents(&parsed.collection, filter).await?
        }
        Operation::Distinct => {
            let field = require(params, "field")?;
            let field = field.as_str().ok_or_else(|| GatewayError::ScriptParse("'field' must be a string".into()))?;
            let query = params.get("query").cloned().unwrap_or_else(|| Value::Object(Default::default()));
            db.distinct(&parsed.collection, field, query).await?
        }
        Operation::InsertOne => db.insert_one(&parsed.collection, require(params, "document")?).await?,
        Operation::InsertMany => db.insert_many(&parsed.collection, require(params, "documents")?).await?,
        Operation::UpdateOne => {
            db.update_one(&parsed.collection, require(params, "filter")?, require(params, "update")?).await?
        }
        Operation::ReplaceOne => {
            // Folded onto the same executor call as `updateOne`; see
            // the CRUD dispatcher for why.
            db.update_one(&parsed.collection, require(params, "filter")?, require(params, "replacement")?).await?
        }
        Operation::UpdateMany => {
            db.update_many(&parsed.collection, require(params, "filter")?, require(params, "update")?).await?
        }
        Operation::DeleteOne => db.delete_one(&parsed.collection, require(params, "filter")?).await?,
        Operation::DeleteMany => db.delete_many(&parsed.collection, require(params, "filter")?).await?,
        Operation::Explain => unreachable!("scripts never parse to 'explain'"),
    };

    let response_meta = ResponseMeta {
        execution_time_ms: started.elapsed().as_millis() as u64,
        pipeline_stages: None,
        has_relationships: None,
        timestamp: Utc::now().to_rfc3339(),
    };
    let payload = if parsed.meta.warnings.is_empty() {
        data
    } else {
        serde_json::json!({"result": data, "warnings": parsed.meta.warnings})
    };
    Ok(Json(Envelope::success(payload, response_meta)))
}
