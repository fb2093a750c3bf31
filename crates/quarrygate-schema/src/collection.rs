//! Collection descriptors — the authoritative description of one stored
//! collection.

use crate::relationship::RelationshipDescriptor;
use quarrygate_validation::PropertySchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Database operations a permission or rate-limit policy can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Find,
    FindOne,
    InsertOne,
    InsertMany,
    ReplaceOne,
    UpdateOne,
    UpdateMany,
    DeleteOne,
    DeleteMany,
    Aggregate,
    CountDocuments,
    Distinct,
    Explain,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Find => "find",
            Operation::FindOne => "findOne",
            Operation::InsertOne => "insertOne",
            Operation::InsertMany => "insertMany",
            Operation::ReplaceOne => "replaceOne",
            Operation::UpdateOne => "updateOne",
            Operation::UpdateMany => "updateMany",
            Operation::DeleteOne => "deleteOne",
            Operation::DeleteMany => "deleteMany",
            Operation::Aggregate => "aggregate",
            Operation::CountDocuments => "countDocuments",
            Operation::Distinct => "distinct",
            Operation::Explain => "explain",
        }
    }

    /// True for operations that only ever read data; used by the
    /// write-stage rule in the pipeline builder.
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            Operation::Find
                | Operation::FindOne
                | Operation::Aggregate
                | Operation::CountDocuments
                | Operation::Distinct
                | Operation::Explain
        )
    }
}

/// Rate limit ceiling for one operation on one collection/procedure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub requests: u32,
    pub window_secs: u64,
}

/// Index descriptor; validated against `properties` at registry load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub fields: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub text: bool,
}

/// Lifecycle hook names, resolved against a host-provided registry at
/// call time; unknown names are logged and skipped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookBindings {
    #[serde(default, rename = "beforeCreate")]
    pub before_create: Option<String>,
    #[serde(default, rename = "afterCreate")]
    pub after_create: Option<String>,
    #[serde(default, rename = "beforeUpdate")]
    pub before_update: Option<String>,
    #[serde(default, rename = "afterUpdate")]
    pub after_update: Option<String>,
    #[serde(default, rename = "beforeDelete")]
    pub before_delete: Option<String>,
    #[serde(default, rename = "afterDelete")]
    pub after_delete: Option<String>,
}

/// The authoritative description of one stored collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionDescriptor {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub properties: HashMap<String, PropertySchema>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default = "default_true", rename = "additionalProperties")]
    pub additional_properties: bool,
    #[serde(default)]
    pub indexes: Vec<IndexDescriptor>,
    #[serde(default)]
    pub relationships: HashMap<String, RelationshipDescriptor>,
    #[serde(default)]
    pub permissions: HashMap<Operation, Vec<String>>,
    #[serde(default)]
    pub rate_limits: HashMap<Operation, RateLimitPolicy>,
    #[serde(default, rename = "searchFields")]
    pub search_fields: Vec<String>,
    #[serde(default, rename = "defaultSort")]
    pub default_sort: Option<HashMap<String, i32>>,
    #[serde(default = "default_limit", rename = "defaultLimit")]
    pub default_limit: i64,
    #[serde(default = "default_max_limit", rename = "maxLimit")]
    pub max_limit: i64,
    #[serde(default)]
    pub hooks: HookBindings,
}

fn default_true() -> bool {
    true
}

fn default_limit() -> i64 {
    20
}

fn default_max_limit() -> i64 {
    200
}

impl CollectionDescriptor {
    /// True if `field` is a declared property or the implicit `_id`.
    pub fn has_field(&self, field: &str) -> bool {
        field == "_id" || self.properties.contains_key(field)
    }

    pub fn permission_for(&self, operation: Operation, role: &str) -> bool {
        self.permissions
            .get(&operation)
            .map(|roles| roles.iter().any(|r| r == role || r == "*"))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> CollectionDescriptor {
        CollectionDescriptor {
            name: "users".into(),
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

    #[test]
    fn id_field_is_always_present() {
        let desc = minimal();
        assert!(desc.has_field("_id"));
        assert!(!desc.has_field("missing"));
    }

    #[test]
    fn wildcard_role_grants_permission() {
        let mut desc = minimal();
        desc.permissions.insert(Operation::Find, vec!["*".to_string()]);
        assert!(desc.permission_for(Operation::Find, "anyone"));
        assert!(!desc.permission_for(Operation::InsertOne, "anyone"));
    }

    #[test]
    fn operation_is_read_matches_spec_table() {
        assert!(Operation::Find.is_read());
        assert!(Operation::Aggregate.is_read());
        assert!(!Operation::InsertOne.is_read());
        assert!(!Operation::UpdateMany.is_read());
    }
}
