//! The state machine every `/crud` request runs through once it has an
//! authenticated [`Subject`]: method/operation guard, authorize,
//! complexity governor, rate limiter, dispatch. Authentication itself
//! happens one layer up, in the route handler, where the bearer token
//! actually lives.

use crate::auth::Subject;
use crate::authorize::authorize_selection;
use crate::config::GatewayConfig;
use crate::method_guard::{body_is_array, enforce_strict_mode, infer_operation, PathShape};
use crate::rate_limit::RateLimiter;
use quarrygate_common::{GatewayError, HttpMethod};
use quarrygate_procedures::DatabaseExecutor;
use quarrygate_query::complexity::compute_cost;
use quarrygate_query::filter::{self, Condition};
use quarrygate_query::pipeline::{build as build_pipeline, contains_write_stage, PipelineRequest};
use quarrygate_query::select::{self, SelectionAst, SortDirection};
use quarrygate_schema::{CollectionDescriptor, Operation, SchemaRegistry};
use serde_json::Value;

/// Everything a CRUD route handler has already pulled off the
/// incoming HTTP request, before any gateway policy has run.
pub struct CrudRequest<'a> {
    pub method: HttpMethod,
    pub collection: &'a str,
    pub id: Option<&'a str>,
    pub is_aggregate_path: bool,
    pub select: Option<&'a str>,
    pub sort: Option<&'a str>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub filter_params: Vec<(String, String)>,
    /// A caller-supplied aggregation pipeline, from the body of a
    /// `POST /crud/:collection/aggregate` request.
    pub raw_pipeline: Option<Vec<Value>>,
    pub body: Option<Value>,
    pub distinct_field: Option<&'a str>,
    /// An explicit `?operation=` override. Lets a caller ask for an
    /// operation other than the one the method+shape combination would
    /// infer (e.g. a partial `updateOne` under `PUT`); still subject to
    /// `enforce_strict_mode` against the method actually used.
    pub operation_override: Option<Operation>,
}

/// What `run` hands back to the route handler to fold into the
/// response envelope.
pub struct CrudOutcome {
    pub data: Value,
    pub operation: Operation,
    pub pipeline_stages: Option<usize>,
    pub has_relationships: bool,
}

/// Runs the full state machine for one request. Authentication has
/// already produced `subject` by the time this is called.
pub async fn run<D: DatabaseExecutor>(
    db: &D,
    registry: &SchemaRegistry,
    config: &GatewayConfig,
    rate_limiter: &RateLimiter,
    subject: &Subject,
    req: CrudRequest<'_>,
) -> Result<CrudOutcome, GatewayError> {
    let shape = if req.is_aggregate_path {
        PathShape::Aggregate
    } else if req.id.is_some() {
        PathShape::CollectionWithId
    } else {
        PathShape::Collection
    };
    let array_body = req.body.as_ref().map(body_is_array).unwrap_or(false);
    let operation = match req.operation_override {
        Some(op) => op,
        None => infer_operation(req.method, shape, array_body)?,
    };
    enforce_strict_mode(req.method, operation, config.strict_methods)?;

    let collection = registry
        .get_collection(req.collection)
        .ok_or_else(|| GatewayError::NotFound(format!("unknown collection '{}'", req.collection)))?;

    if let Some(pipeline) = &req.raw_pipeline {
        if operation.is_read() && contains_write_stage(pipeline) {
            return Err(GatewayError::MethodOperationMismatch {
                message: "a read-verb request may not carry a $merge/$out stage".into(),
                suggestion: None,
            });
        }
    }

    let selection: Vec<SelectionAst> = match req.select {
        Some(s) => select::parse(s)?,
        None => Vec::new(),
    };
    check_selection(&selection, collection, registry, config.max_relationship_depth)?;

    authorize_selection(subject, req.collection, &selection, operation, registry)?;

    let cost = compute_cost(&selection, req.raw_pipeline.as_deref());
    config.complexity_ceilings().check(&subject.role, cost)?;

    let policy = config.rate_limit_policy_for(&subject.role);
    rate_limiter.acquire(&subject.id, &policy)?;

    dispatch(db, registry, collection, operation, selection, req).await
}

fn check_selection(
    selection: &[SelectionAst],
    collection: &CollectionDescriptor,
    registry: &SchemaRegistry,
    max_depth: usize,
) -> Result<(), GatewayError> {
    let errors = select::validate(selection, collection, registry, max_depth);
    if errors.is_empty() {
        return Ok(());
    }
    if errors.iter().any(|e| e.contains("relationship depth exceeds")) {
        return Err(GatewayError::RelationshipDepth(errors.join("; ")));
    }
    Err(GatewayError::QueryParse(errors.join("; ")))
}

fn parse_sort(raw: &str) -> Result<Vec<(String, SortDirection)>, GatewayError> {
    raw.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            let (field, dir) = part
                .trim()
                .rsplit_once('.')
                .ok_or_else(|| GatewayError::QueryParse(format!("malformed sort term '{part}'")))?;
            let direction = match dir {
                "asc" => SortDirection::Asc,
                "desc" => SortDirection::Desc,
                other => return Err(GatewayError::QueryParse(format!("unknown sort direction '{other}'"))),
            };
            Ok((field.to_string(), direction))
        })
        .collect()
}

async fn dispatch<D: DatabaseExecutor>(
    db: &D,
    registry: &SchemaRegistry,
    collection: &CollectionDescriptor,
    operation: Operation,
    selection: Vec<SelectionAst>,
    req: CrudRequest<'_>,
) -> Result<CrudOutcome, GatewayError> {
    let has_relationships = !selection.is_empty()
        && selection
            .iter()
            .any(|n| matches!(n, SelectionAst::Relationship(_) | SelectionAst::Aggregate(_)));

    match operation {
        Operation::Find | Operation::FindOne | Operation::Aggregate | Operation::Explain => {
            let mut parsed_filters = filter::parse(&req.filter_params);
            let validation = parsed_filters.validate();
            if !validation.is_empty() {
                return Err(GatewayError::QueryParse(validation.join("; ")));
            }
            if let Some(id) = req.id {
                parsed_filters.direct_filters.insert("_id".to_string(), Condition::Eq(Value::String(id.to_string())));
            }
            let sort = req.sort.map(|s| parse_sort(s)).transpose()?;

            let pipeline_req = PipelineRequest {
                collection: req.collection,
                selection: &selection,
                direct_filters: &parsed_filters.direct_filters,
                relationship_filters: &parsed_filters.relationship_filters,
                special_filters: &parsed_filters.special_filters,
                sort: sort.as_deref(),
                page: req.page,
                limit: req.limit,
            };

            let stages = match &req.raw_pipeline {
                Some(caller_pipeline) => caller_pipeline.clone(),
                None => build_pipeline(&pipeline_req, registry)?,
            };

            if operation == Operation::Explain {
                return Ok(CrudOutcome {
                    data: Value::Array(stages.clone()),
                    operation,
                    pipeline_stages: Some(stages.len()),
                    has_relationships,
                });
            }

            let data = db.aggregate(req.collection, Value::Array(stages.clone())).await?;
            let data = if operation == Operation::FindOne { first_or_not_found(data, req.collection)? } else { data };
            Ok(CrudOutcome { data, operation, pipeline_stages: Some(stages.len()), has_relationships })
        }
        Operation::CountDocuments => {
            let parsed_filters = filter::parse(&req.filter_params);
            let filter_doc = direct_filters_to_doc(&parsed_filters.direct_filters);
            let data = db.count_documents(req.collection, filter_doc).await?;
            Ok(CrudOutcome { data, operation, pipeline_stages: None, has_relationships: false })
        }
        Operation::Distinct => {
            let field = req
                .distinct_field
                .ok_or_else(|| GatewayError::QueryParse("distinct requires a 'field' parameter".into()))?;
            let parsed_filters = filter::parse(&req.filter_params);
            let filter_doc = direct_filters_to_doc(&parsed_filters.direct_filters);
            let data = db.distinct(req.collection, field, filter_doc).await?;
            Ok(CrudOutcome { data, operation, pipeline_stages: None, has_relationships: false })
        }
        Operation::InsertOne => {
            let document = req.body.unwrap_or(Value::Null);
            let data = db.insert_one(req.collection, document).await?;
            Ok(CrudOutcome { data, operation, pipeline_stages: None, has_relationships: false })
        }
        Operation::InsertMany => {
            let documents = req.body.unwrap_or(Value::Array(Vec::new()));
            let data = db.insert_many(req.collection, documents).await?;
            Ok(CrudOutcome { data, operation, pipeline_stages: None, has_relationships: false })
        }
        Operation::UpdateOne | Operation::ReplaceOne => {
            let id = req.id.ok_or_else(|| GatewayError::QueryParse("this operation requires a document id".into()))?;
            let filter_doc = serde_json::json!({"_id": id});
            let update = req.body.unwrap_or(Value::Null);
            // The executor surface folds `replaceOne` into `updateOne`:
            // a host implementation distinguishes the two by whether
            // `update` carries `$`-prefixed operator keys.
            let data = db.update_one(req.collection, filter_doc, update).await?;
            Ok(CrudOutcome { data, operation, pipeline_stages: None, has_relationships: false })
        }
        Operation::UpdateMany => {
            let parsed_filters = filter::parse(&req.filter_params);
            let filter_doc = direct_filters_to_doc(&parsed_filters.direct_filters);
            let update = req.body.unwrap_or(Value::Null);
            let data = db.update_many(req.collection, filter_doc, update).await?;
            Ok(CrudOutcome { data, operation, pipeline_stages: None, has_relationships: false })
        }
        Operation::DeleteOne => {
            let id = req.id.ok_or_else(|| GatewayError::QueryParse("deleteOne requires a document id".into()))?;
            let data = db.delete_one(req.collection, serde_json::json!({"_id": id})).await?;
            Ok(CrudOutcome { data, operation, pipeline_stages: None, has_relationships: false })
        }
        Operation::DeleteMany => {
            let parsed_filters = filter::parse(&req.filter_params);
            let filter_doc = direct_filters_to_doc(&parsed_filters.direct_filters);
            let data = db.delete_many(req.collection, filter_doc).await?;
            Ok(CrudOutcome { data, operation, pipeline_stages: None, has_relationships: false })
        }
    }
}

fn direct_filters_to_doc(filters: &std::collections::HashMap<String, Condition>) -> Value {
    let mut keys: Vec<&String> = filters.keys().collect();
    keys.sort();
    let mut obj = serde_json::Map::new();
    for key in keys {
        obj.insert(key.clone(), condition_value(&filters[key]));
    }
    Value::Object(obj)
}

fn condition_value(condition: &Condition) -> Value {
    match condition {
        Condition::Eq(v) => v.clone(),
        Condition::Ne(v) => serde_json::json!({"$ne": v}),
        Condition::Gt(v) => serde_json::json!({"$gt": v}),
        Condition::Gte(v) => serde_json::json!({"$gte": v}),
        Condition::Lt(v) => serde_json::json!({"$lt": v}),
        Condition::Lte(v) => serde_json::json!({"$lte": v}),
        Condition::In(vs) => serde_json::json!({"$in": vs}),
        Condition::Nin(vs) => serde_json::json!({"$nin": vs}),
        Condition::Like(p) | Condition::ILike(p) => serde_json::json!({"$regex": p, "$options": "i"}),
        Condition::Regex(p) => serde_json::json!({"$regex": p}),
        Condition::Exists(b) => serde_json::json!({"$exists": b}),
        Condition::IsNull(true) => Value::Null,
        Condition::IsNull(false) => serde_json::json!({"$ne": null}),
        Condition::Empty(true) => serde_json::json!({"$in": [null, "", []]}),
        Condition::Empty(false) => serde_json::json!({"$nin": [null, "", []]}),
    }
}

fn first_or_not_found(data: Value, collection: &str) -> Result<Value, GatewayError> {
    match data {
        Value::Array(mut items) if !items.is_empty() => Ok(items.remove(0)),
        Value::Array(_) => Err(GatewayError::NotFound(format!("no document matched in '{collection}'"))),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use quarrygate_schema::HookBindings;
    use std::collections::HashMap;

    struct FakeDb;

    #[async_trait]
    impl DatabaseExecutor for FakeDb {
        async fn find(&self, _c: &str, _f: Value, _s: Option<String>, _so: Option<Value>, _l: Option<i64>) -> Result<Value, GatewayError> {
            Ok(serde_json::json!([]))
        }
        async fn find_one(&self, _c: &str, _f: Value) -> Result<Value, GatewayError> {
            Ok(Value::Null)
        }
        async fn insert_one(&self, _c: &str, document: Value) -> Result<Value, GatewayError> {
            Ok(document)
        }
        async fn insert_many(&self, _c: &str, documents: Value) -> Result<Value, GatewayError> {
            Ok(documents)
        }
        async fn update_one(&self, _c: &str, _f: Value, update: Value) -> Result<Value, GatewayError> {
            Ok(update)
        }
        async fn update_many(&self, _c: &str, _f: Value, update: Value) -> Result<Value, GatewayError> {
            Ok(update)
        }
        async fn delete_one(&self, _c: &str, _f: Value) -> Result<Value, GatewayError> {
            Ok(serde_json::json!({"deletedCount": 1}))
        }
        async fn delete_many(&self, _c: &str, _f: Value) -> Result<Value, GatewayError> {
            Ok(serde_json::json!({"deletedCount": 1}))
        }
        async fn aggregate(&self, _c: &str, _p: Value) -> Result<Value, GatewayError> {
            Ok(serde_json::json!([{"_id": "abc", "name": "Ada"}]))
        }
        async fn count_documents(&self, _c: &str, _f: Value) -> Result<Value, GatewayError> {
            Ok(serde_json::json!(3))
        }
        async fn distinct(&self, _c: &str, _field: &str, _f: Value) -> Result<Value, GatewayError> {
            Ok(serde_json::json!(["a", "b"]))
        }
    }

    fn bare(name: &str) -> CollectionDescriptor {
        CollectionDescriptor {
            name: name.into(),
            title: None,
            description: None,
            properties: HashMap::new(),
            required: vec![],
            additional_properties: true,
            indexes: vec![],
            relationships: HashMap::new(),
            permissions: HashMap::new(),
            rate_limits: HashMap::new(),
            search_fields: vec![],
            default_sort: None,
            default_limit: 20,
            max_limit: 200,
            hooks: HookBindings::default(),
        }
    }

    fn permissive(name: &str) -> CollectionDescriptor {
        let mut desc = bare(name);
        desc.permissions.insert(Operation::Find, vec!["*".to_string()]);
        desc.permissions.insert(Operation::FindOne, vec!["*".to_string()]);
        desc.permissions.insert(Operation::InsertOne, vec!["*".to_string()]);
        desc
    }

    fn subject() -> Subject {
        Subject { id: "u1".into(), role: "editor".into(), permissions: Default::default() }
    }

    #[tokio::test]
    async fn get_without_id_runs_find_through_the_pipeline_builder() {
        let registry = SchemaRegistry::build(vec![permissive("users")], vec![]).unwrap();
        let config = GatewayConfig::default();
        let limiter = RateLimiter::new(crate::rate_limit::RateLimitAlgorithm::SlidingWindow);
        let req = CrudRequest {
            method: HttpMethod::Get,
            collection: "users",
            id: None,
            is_aggregate_path: false,
            select: None,
            sort: None,
            page: None,
            limit: None,
            filter_params: vec![],
            raw_pipeline: None,
            body: None,
            distinct_field: None,
            operation_override: None,
        };
        let outcome = run(&FakeDb, &registry, &config, &limiter, &subject(), req).await.unwrap();
        assert_eq!(outcome.operation, Operation::Find);
        assert!(outcome.pipeline_stages.unwrap() > 0);
    }

    #[tokio::test]
    async fn get_with_id_unwraps_the_single_document() {
        let registry = SchemaRegistry::build(vec![permissive("users")], vec![]).unwrap();
        let config = GatewayConfig::default();
        let limiter = RateLimiter::new(crate::rate_limit::RateLimitAlgorithm::SlidingWindow);
        let req = CrudRequest {
            method: HttpMethod::Get,
            collection: "users",
            id: Some("abc"),
            is_aggregate_path: false,
            select: None,
            sort: None,
            page: None,
            limit: None,
            filter_params: vec![],
            raw_pipeline: None,
            body: None,
            distinct_field: None,
            operation_override: None,
        };
        let outcome = run(&FakeDb, &registry, &config, &limiter, &subject(), req).await.unwrap();
        assert_eq!(outcome.operation, Operation::FindOne);
        assert_eq!(outcome.data["name"], serde_json::json!("Ada"));
    }

    #[tokio::test]
    async fn missing_permission_is_rejected_before_dispatch() {
        let registry = SchemaRegistry::build(vec![bare("users")], vec![]).unwrap();
        let config = GatewayConfig::default();
        let limiter = RateLimiter::new(crate::rate_limit::RateLimitAlgorithm::SlidingWindow);
        let req = CrudRequest {
            method: HttpMethod::Get,
            collection: "users",
            id: None,
            is_aggregate_path: false,
            select: None,
            sort: None,
            page: None,
            limit: None,
            filter_params: vec![],
            raw_pipeline: None,
            body: None,
            distinct_field: None,
            operation_override: None,
        };
        let err = run(&FakeDb, &registry, &config, &limiter, &subject(), req).await.unwrap_err();
        assert_eq!(err.kind().as_str(), "authorization");
    }

    #[tokio::test]
    async fn strict_mode_rejects_put_update_one() {
        let registry = SchemaRegistry::build(vec![permissive("users")], vec![]).unwrap();
        let config = GatewayConfig::default();
        let limiter = RateLimiter::new(crate::rate_limit::RateLimitAlgorithm::SlidingWindow);
        let req = CrudRequest {
            method: HttpMethod::Put,
            collection: "users",
            id: Some("abc"),
            is_aggregate_path: false,
            select: None,
            sort: None,
            page: None,
            limit: None,
            filter_params: vec![],
            raw_pipeline: None,
            body: Some(serde_json::json!({"name": "Ada"})),
            distinct_field: None,
            operation_override: Some(Operation::UpdateOne),
        };
        let err = run(&FakeDb, &registry, &config, &limiter, &subject(), req).await.unwrap_err();
        assert_eq!(err.kind().as_str(), "methodOperationMismatch");
        match err {
            GatewayError::MethodOperationMismatch { suggestion, .. } => assert_eq!(suggestion, Some("PATCH".to_string())),
            _ => panic!("expected MethodOperationMismatch"),
        }
    }
}
