//! Pipeline builder shape tests: exact aggregation stages for a fixed
//! set of relationship/filter inputs.

use quarrygate_query::filter::Condition;
use quarrygate_query::pipeline::{build, PipelineRequest};
use quarrygate_query::select::parse as parse_selection;
use quarrygate_schema::{CollectionDescriptor, HookBindings, RelationshipCommon, RelationshipDescriptor, SchemaRegistry};
use serde_json::json;
use std::collections::HashMap;

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

fn common(collection: &str, local_field: &str, foreign_field: &str) -> RelationshipCommon {
    RelationshipCommon {
        local_field: local_field.into(),
        foreign_field: foreign_field.into(),
        collection: collection.into(),
        default_filters: None,
        default_sort: None,
        pagination: Default::default(),
        permissions: None,
    }
}

/// `select=orderNumber,customer(name,email)` emits a belongsTo
/// join from `orders` into `users` reduced to a single element.
#[test]
fn belongs_to_join_reduces_to_single_subdocument() {
    let mut orders = bare("orders");
    orders.relationships.insert(
        "customer".to_string(),
        RelationshipDescriptor::BelongsTo { common: common("users", "customerId", "_id") },
    );
    let users = bare("users");
    let registry = SchemaRegistry::build(vec![orders, users], vec![]).unwrap();

    let selection = parse_selection("orderNumber,customer(name,email)").unwrap();
    let req = PipelineRequest {
        collection: "orders",
        selection: &selection,
        direct_filters: &HashMap::new(),
        relationship_filters: &HashMap::new(),
        special_filters: &HashMap::new(),
        sort: None,
        page: None,
        limit: None,
    };
    let pipeline = build(&req, &registry).unwrap();

    let lookup_idx = pipeline.iter().position(|s| s.get("$lookup").is_some()).unwrap();
    assert_eq!(pipeline[lookup_idx]["$lookup"]["as"], json!("customer"));
    let reduce_idx = pipeline.iter().position(|s| s.get("$addFields").is_some()).unwrap();
    assert!(reduce_idx > lookup_idx);
    assert_eq!(pipeline[reduce_idx]["$addFields"]["customer"]["$arrayElemAt"][1], json!(0));

    let projection = pipeline.last().unwrap();
    assert_eq!(projection["$project"], json!({"customer": 1, "orderNumber": 1}));
}

/// A hasMany relationship filter is embedded in the join's
/// sub-pipeline, ahead of the array being returned.
#[test]
fn has_many_relationship_filter_narrows_the_join() {
    let mut users = bare("users");
    users.relationships.insert(
        "orders".to_string(),
        RelationshipDescriptor::HasMany { common: common("orders", "_id", "customerId") },
    );
    let orders = bare("orders");
    let registry = SchemaRegistry::build(vec![users, orders], vec![]).unwrap();

    let selection = parse_selection("name,orders(orderNumber)").unwrap();
    let mut relationship_filters = HashMap::new();
    let mut orders_filter = HashMap::new();
    orders_filter.insert("status".to_string(), Condition::Eq(json!("delivered")));
    relationship_filters.insert("orders".to_string(), orders_filter);

    let req = PipelineRequest {
        collection: "users",
        selection: &selection,
        direct_filters: &HashMap::new(),
        relationship_filters: &relationship_filters,
        special_filters: &HashMap::new(),
        sort: None,
        page: None,
        limit: None,
    };
    let pipeline = build(&req, &registry).unwrap();

    let lookup = pipeline.iter().find(|s| s.get("$lookup").is_some()).unwrap();
    let sub = lookup["$lookup"]["pipeline"].as_array().unwrap();
    assert_eq!(sub[1], json!({"$match": {"status": "delivered"}}));
    assert_eq!(sub.last().unwrap(), &json!({"$project": {"orderNumber": 1}}));
}

/// A manyToMany join drops the intermediate junction array and
/// never surfaces it to the caller.
#[test]
fn many_to_many_hides_the_junction_array() {
    let mut products = bare("products");
    products.relationships.insert(
        "categories".to_string(),
        RelationshipDescriptor::ManyToMany {
            common: common("categories", "_id", "_id"),
            through: "product_categories".into(),
            through_local_field: "productId".into(),
            through_foreign_field: "categoryId".into(),
        },
    );
    let categories = bare("categories");
    let junction = bare("product_categories");
    let registry = SchemaRegistry::build(vec![products, categories, junction], vec![]).unwrap();

    let selection = parse_selection("name,categories(name,slug)").unwrap();
    let req = PipelineRequest {
        collection: "products",
        selection: &selection,
        direct_filters: &HashMap::new(),
        relationship_filters: &HashMap::new(),
        special_filters: &HashMap::new(),
        sort: None,
        page: None,
        limit: None,
    };
    let pipeline = build(&req, &registry).unwrap();

    let lookups: Vec<&serde_json::Value> = pipeline.iter().filter(|s| s.get("$lookup").is_some()).collect();
    assert_eq!(lookups.len(), 2);
    assert_eq!(lookups[0]["$lookup"]["as"], json!("categories_junction"));
    assert_eq!(lookups[1]["$lookup"]["as"], json!("categories"));

    let drop_junction = pipeline.iter().find(|s| s.get("$project").and_then(|p| p.get("categories_junction")).is_some());
    assert!(drop_junction.is_some());

    let final_projection = pipeline.last().unwrap();
    assert!(final_projection["$project"].get("categories_junction").is_none());
}

/// The direct-filter match stage uses a case-insensitive regex for
/// `like`, and the relationship filter is the sub-pipeline's first
/// stage after the join condition.
#[test]
fn like_filter_and_relationship_filter_shapes() {
    let mut users = bare("users");
    users.relationships.insert(
        "orders".to_string(),
        RelationshipDescriptor::HasMany { common: common("orders", "_id", "customerId") },
    );
    let orders = bare("orders");
    let registry = SchemaRegistry::build(vec![users, orders], vec![]).unwrap();

    let selection = parse_selection("name,orders(totalAmount)").unwrap();
    let mut direct = HashMap::new();
    direct.insert("name".to_string(), Condition::Like("John.*".to_string()));
    let mut relationship_filters = HashMap::new();
    let mut orders_filter = HashMap::new();
    orders_filter.insert("totalAmount".to_string(), Condition::Gte(json!(100)));
    relationship_filters.insert("orders".to_string(), orders_filter);

    let req = PipelineRequest {
        collection: "users",
        selection: &selection,
        direct_filters: &direct,
        relationship_filters: &relationship_filters,
        special_filters: &HashMap::new(),
        sort: None,
        page: None,
        limit: None,
    };
    let pipeline = build(&req, &registry).unwrap();

    assert_eq!(pipeline[0], json!({"$match": {"name": {"$regex": "John.*", "$options": "i"}}}));

    let lookup = pipeline.iter().find(|s| s.get("$lookup").is_some()).unwrap();
    let sub = lookup["$lookup"]["pipeline"].as_array().unwrap();
    assert_eq!(sub[1], json!({"$match": {"totalAmount": {"$gte": 100}}}));
}
