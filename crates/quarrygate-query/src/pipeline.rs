//! Compiles a selection AST plus parsed filters into an ordered
//! MongoDB aggregation pipeline.

use crate::filter::Condition;
use crate::select::{
    AggregateFunction, AggregateNode, Modifiers, RelationshipNode, SelectionAst, SortDirection, DEFAULT_MAX_DEPTH,
};
use quarrygate_common::GatewayError;
use quarrygate_schema::{CollectionDescriptor, RelationshipDescriptor, SchemaRegistry};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// MongoDB stage keys that redirect output to storage rather than
/// shaping a read result. A caller-supplied aggregate pipeline may
/// never contain one on a read-verb request.
const WRITE_STAGE_KEYS: &[&str] = &["$merge", "$out"];

/// A ceiling on relationship nesting tracked independently of the
/// selection parser's own depth check, so a `SelectionAst` built by any
/// future caller that skips `select::validate` still can't make the
/// builder recurse without bound.
const MAX_BUILD_DEPTH: usize = DEFAULT_MAX_DEPTH;

/// Everything the Pipeline Builder needs, already parsed by the
/// Selection and Filter parsers.
pub struct PipelineRequest<'a> {
    pub collection: &'a str,
    pub selection: &'a [SelectionAst],
    pub direct_filters: &'a HashMap<String, Condition>,
    pub relationship_filters: &'a HashMap<String, HashMap<String, Condition>>,
    pub special_filters: &'a HashMap<String, String>,
    pub sort: Option<&'a [(String, SortDirection)]>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Compile a request into a deterministic, ordered aggregation
/// pipeline.
pub fn build(req: &PipelineRequest, registry: &SchemaRegistry) -> Result<Vec<Value>, GatewayError> {
    let collection = registry
        .get_collection(req.collection)
        .ok_or_else(|| GatewayError::NotFound(format!("unknown collection '{}'", req.collection)))?;

    let mut stages = Vec::new();

    if !req.direct_filters.is_empty() {
        stages.push(json!({"$match": match_doc(req.direct_filters)}));
    }

    if let Some(search_stage) = build_search_stage(req, collection)? {
        stages.push(search_stage);
    }

    emit_selection_stages(&mut stages, req.selection, collection, registry, req.relationship_filters, 1)?;

    if let Some(sort_doc) = build_top_sort(req, collection) {
        stages.push(json!({"$sort": sort_doc}));
    }

    let effective_limit = req.limit.unwrap_or(collection.default_limit).min(collection.max_limit).max(0);
    let page = req.page.unwrap_or(1).max(1);
    let skip = (page - 1) * effective_limit;
    stages.push(json!({"$skip": skip}));
    stages.push(json!({"$limit": effective_limit}));

    if let Some(projection) = build_projection(req.selection) {
        stages.push(json!({"$project": projection}));
    }

    Ok(stages)
}

/// True if any stage in a caller-supplied pipeline would redirect
/// output to storage rather than shape a read result.
pub fn contains_write_stage(pipeline: &[Value]) -> bool {
    pipeline.iter().any(|stage| {
        stage
            .as_object()
            .map(|obj| obj.keys().any(|k| WRITE_STAGE_KEYS.contains(&k.as_str())))
            .unwrap_or(false)
    })
}

fn emit_selection_stages(
    stages: &mut Vec<Value>,
    nodes: &[SelectionAst],
    owner: &CollectionDescriptor,
    registry: &SchemaRegistry,
    relationship_filters: &HashMap<String, HashMap<String, Condition>>,
    depth: usize,
) -> Result<(), GatewayError> {
    for node in nodes {
        match node {
            SelectionAst::Field(_) => {}
            SelectionAst::Relationship(rel) => {
                let filter = relationship_filters.get(&rel.alias);
                emit_relationship(stages, rel, owner, registry, filter, depth)?;
            }
            SelectionAst::Aggregate(agg) => {
                let filter = relationship_filters.get(&agg.alias);
                emit_aggregate(stages, agg, owner, registry, filter, depth)?;
            }
        }
    }
    Ok(())
}

fn check_depth(depth: usize, alias: &str) -> Result<(), GatewayError> {
    if depth > MAX_BUILD_DEPTH {
        return Err(GatewayError::QueryParse(format!(
            "relationship nesting at '{alias}' exceeds the pipeline builder's own depth ceiling of {MAX_BUILD_DEPTH}"
        )));
    }
    Ok(())
}

fn emit_relationship(
    stages: &mut Vec<Value>,
    rel: &RelationshipNode,
    owner: &CollectionDescriptor,
    registry: &SchemaRegistry,
    filter: Option<&HashMap<String, Condition>>,
    depth: usize,
) -> Result<(), GatewayError> {
    check_depth(depth, &rel.alias)?;

    let descriptor = owner
        .relationships
        .get(&rel.relation)
        .ok_or_else(|| GatewayError::QueryParse(format!("unknown relationship '{}' on '{}'", rel.relation, owner.name)))?;

    match descriptor {
        RelationshipDescriptor::BelongsTo { common } => {
            let target = target_collection(registry, &common.collection)?;
            let sub_pipeline = build_join_sub_pipeline(rel, target, registry, filter, depth)?;
            stages.push(lookup_stage(&common.collection, &common.local_field, &common.foreign_field, sub_pipeline, &rel.alias));
            let alias = rel.alias.clone();
            let mut add_fields = Map::new();
            add_fields.insert(alias.clone(), json!({"$arrayElemAt": [format!("${alias}"), 0]}));
            stages.push(json!({"$addFields": Value::Object(add_fields)}));
            if filter.is_some() {
                let mut not_null = Map::new();
                not_null.insert(alias, json!({"$ne": Value::Null}));
                stages.push(json!({"$match": Value::Object(not_null)}));
            }
        }
        RelationshipDescriptor::HasMany { common } => {
            let target = target_collection(registry, &common.collection)?;
            let sub_pipeline = build_join_sub_pipeline(rel, target, registry, filter, depth)?;
            stages.push(lookup_stage(&common.collection, &common.local_field, &common.foreign_field, sub_pipeline, &rel.alias));
        }
        RelationshipDescriptor::ManyToMany { common, through, through_local_field, through_foreign_field } => {
            let junction_alias = format!("{}_junction", rel.alias);
            stages.push(lookup_stage(through, &common.local_field, through_local_field, Vec::new(), &junction_alias));
            let target = target_collection(registry, &common.collection)?;
            let sub_pipeline = build_join_sub_pipeline(rel, target, registry, filter, depth)?;
            stages.push(second_hop_lookup_stage(
                &common.collection,
                &junction_alias,
                through_foreign_field,
                &common.foreign_field,
                sub_pipeline,
                &rel.alias,
            ));
            stages.push(json!({"$project": {junction_alias: 0}}));
        }
    }
    Ok(())
}

fn emit_aggregate(
    stages: &mut Vec<Value>,
    agg: &AggregateNode,
    owner: &CollectionDescriptor,
    registry: &SchemaRegistry,
    filter: Option<&HashMap<String, Condition>>,
    depth: usize,
) -> Result<(), GatewayError> {
    check_depth(depth, &agg.alias)?;

    let descriptor = owner
        .relationships
        .get(&agg.relation)
        .ok_or_else(|| GatewayError::QueryParse(format!("unknown relationship '{}' on '{}'", agg.relation, owner.name)))?;
    let common = descriptor.common();
    let target = target_collection(registry, &common.collection)?;

    let synthetic = RelationshipNode {
        alias: agg.alias.clone(),
        relation: agg.relation.clone(),
        wildcard: true,
        fields: Vec::new(),
        modifiers: Modifiers::default(),
    };

    match descriptor {
        RelationshipDescriptor::ManyToMany { through, through_local_field, through_foreign_field, .. } => {
            let junction_alias = format!("{}_junction", agg.alias);
            stages.push(lookup_stage(through, &common.local_field, through_local_field, Vec::new(), &junction_alias));
            let sub_pipeline = build_join_sub_pipeline(&synthetic, target, registry, filter, depth)?;
            stages.push(second_hop_lookup_stage(
                &common.collection,
                &junction_alias,
                through_foreign_field,
                &common.foreign_field,
                sub_pipeline,
                &agg.alias,
            ));
            stages.push(json!({"$project": {junction_alias: 0}}));
        }
        _ => {
            let sub_pipeline = build_join_sub_pipeline(&synthetic, target, registry, filter, depth)?;
            stages.push(lookup_stage(&common.collection, &common.local_field, &common.foreign_field, sub_pipeline, &agg.alias));
        }
    }

    let mut add_fields = Map::new();
    add_fields.insert(agg.alias.clone(), aggregate_expression(agg));
    stages.push(json!({"$addFields": Value::Object(add_fields)}));
    Ok(())
}

fn aggregate_expression(agg: &AggregateNode) -> Value {
    let array_ref = format!("${}", agg.alias);
    match agg.function {
        AggregateFunction::Count => json!({"$size": array_ref}),
        AggregateFunction::Sum => json!({"$sum": format!("{array_ref}.{}", agg.field.as_deref().unwrap_or_default())}),
        AggregateFunction::Avg => json!({"$avg": format!("{array_ref}.{}", agg.field.as_deref().unwrap_or_default())}),
        AggregateFunction::Min => json!({"$min": format!("{array_ref}.{}", agg.field.as_deref().unwrap_or_default())}),
        AggregateFunction::Max => json!({"$max": format!("{array_ref}.{}", agg.field.as_deref().unwrap_or_default())}),
    }
}

/// Build the sub-pipeline embedded in a `$lookup`: relationship filter
/// first (runs before any reduction the caller performs afterward),
/// then nested relationship stages, then modifiers, then a trailing
/// projection if the caller asked for specific sub-fields.
fn build_join_sub_pipeline(
    rel: &RelationshipNode,
    target: &CollectionDescriptor,
    registry: &SchemaRegistry,
    filter: Option<&HashMap<String, Condition>>,
    depth: usize,
) -> Result<Vec<Value>, GatewayError> {
    let mut sub = Vec::new();

    if let Some(filter) = filter {
        if !filter.is_empty() {
            sub.push(json!({"$match": match_doc(filter)}));
        }
    }

    emit_selection_stages(&mut sub, &rel.fields, target, registry, &HashMap::new(), depth + 1)?;

    if !rel.modifiers.order.is_empty() {
        sub.push(json!({"$sort": sort_doc_from_order(&rel.modifiers.order)}));
    }
    if let Some(skip) = rel.modifiers.skip {
        sub.push(json!({"$skip": skip}));
    }
    if let Some(limit) = rel.modifiers.limit {
        sub.push(json!({"$limit": limit}));
    }

    if !rel.wildcard {
        if let Some(projection) = build_projection(&rel.fields) {
            sub.push(json!({"$project": projection}));
        }
    }

    Ok(sub)
}

fn lookup_stage(from: &str, local_field: &str, foreign_field: &str, pipeline: Vec<Value>, as_alias: &str) -> Value {
    let join_match = json!({"$match": {"$expr": {"$eq": [format!("${foreign_field}"), "$$localVal"]}}});
    let mut full = vec![join_match];
    full.extend(pipeline);
    json!({
        "$lookup": {
            "from": from,
            "let": {"localVal": format!("${local_field}")},
            "pipeline": full,
            "as": as_alias,
        }
    })
}

/// Second hop of a many-to-many join: the join condition matches
/// against the *array* of foreign ids collected from the junction
/// documents rather than a single scalar.
fn second_hop_lookup_stage(
    from: &str,
    junction_alias: &str,
    through_foreign_field: &str,
    foreign_field: &str,
    pipeline: Vec<Value>,
    as_alias: &str,
) -> Value {
    let ids_expr = json!({
        "$map": {
            "input": format!("${junction_alias}"),
            "as": "j",
            "in": format!("$$j.{through_foreign_field}"),
        }
    });
    let join_match = json!({"$match": {"$expr": {"$in": [format!("${foreign_field}"), "$$ids"]}}});
    let mut full = vec![join_match];
    full.extend(pipeline);
    json!({
        "$lookup": {
            "from": from,
            "let": {"ids": ids_expr},
            "pipeline": full,
            "as": as_alias,
        }
    })
}

fn target_collection<'a>(registry: &'a SchemaRegistry, name: &str) -> Result<&'a CollectionDescriptor, GatewayError> {
    registry.get_collection(name).ok_or_else(|| GatewayError::NotFound(format!("unknown collection '{name}'")))
}

fn match_doc(filters: &HashMap<String, Condition>) -> Value {
    let mut keys: Vec<&String> = filters.keys().collect();
    keys.sort();
    let mut obj = Map::new();
    for key in keys {
        obj.insert(key.clone(), condition_to_mongo(&filters[key]));
    }
    Value::Object(obj)
}

fn condition_to_mongo(condition: &Condition) -> Value {
    match condition {
        Condition::Eq(v) => v.clone(),
        Condition::Ne(v) => json!({"$ne": v}),
        Condition::Gt(v) => json!({"$gt": v}),
        Condition::Gte(v) => json!({"$gte": v}),
        Condition::Lt(v) => json!({"$lt": v}),
        Condition::Lte(v) => json!({"$lte": v}),
        Condition::In(vs) => json!({"$in": vs}),
        Condition::Nin(vs) => json!({"$nin": vs}),
        Condition::Like(p) | Condition::ILike(p) => json!({"$regex": p, "$options": "i"}),
        Condition::Regex(p) => json!({"$regex": p}),
        Condition::Exists(b) => json!({"$exists": b}),
        Condition::IsNull(true) => Value::Null,
        Condition::IsNull(false) => json!({"$ne": null}),
        Condition::Empty(true) => json!({"$in": [null, "", []]}),
        Condition::Empty(false) => json!({"$nin": [null, "", []]}),
    }
}

fn build_search_stage(req: &PipelineRequest, collection: &CollectionDescriptor) -> Result<Option<Value>, GatewayError> {
    let Some(term) = req.special_filters.get("search") else {
        return Ok(None);
    };

    if let Some(raw_fields) = req.special_filters.get("searchFields") {
        let fields: Vec<&str> = raw_fields.split(',').map(|f| f.trim()).filter(|f| !f.is_empty()).collect();
        let pattern = regex::escape(term);
        let clauses: Vec<Value> = fields.iter().map(|f| json!({*f: {"$regex": pattern, "$options": "i"}})).collect();
        return Ok(Some(json!({"$match": {"$or": clauses}})));
    }

    if collection.indexes.iter().any(|idx| idx.text) {
        return Ok(Some(json!({"$match": {"$text": {"$search": term}}})));
    }

    Err(GatewayError::QueryParse(format!(
        "collection '{}' has no text index and no searchFields provided",
        collection.name
    )))
}

fn build_top_sort(req: &PipelineRequest, collection: &CollectionDescriptor) -> Option<Value> {
    if let Some(sort) = req.sort {
        if !sort.is_empty() {
            return Some(sort_doc_from_order(sort));
        }
    }
    collection.default_sort.as_ref().map(|default_sort| {
        let mut keys: Vec<&String> = default_sort.keys().collect();
        keys.sort();
        let mut obj = Map::new();
        for key in keys {
            obj.insert(key.clone(), json!(default_sort[key]));
        }
        Value::Object(obj)
    })
}

fn sort_doc_from_order(order: &[(String, SortDirection)]) -> Value {
    let mut obj = Map::new();
    for (field, direction) in order {
        let n = match direction {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        };
        obj.insert(field.clone(), json!(n));
    }
    Value::Object(obj)
}

fn build_projection(nodes: &[SelectionAst]) -> Option<Value> {
    if nodes.is_empty() {
        return None;
    }
    let mut keys: Vec<String> = nodes
        .iter()
        .map(|node| match node {
            SelectionAst::Field(name) => name.clone(),
            SelectionAst::Relationship(rel) => rel.alias.clone(),
            SelectionAst::Aggregate(agg) => agg.alias.clone(),
        })
        .collect();
    keys.sort();
    keys.dedup();
    let mut obj = Map::new();
    for key in keys {
        obj.insert(key, json!(1));
    }
    Some(Value::Object(obj))
}
