//! Relationship descriptors — declared navigations from one collection
//! to another.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Pagination defaults scoped to one relationship.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipPagination {
    #[serde(default, rename = "defaultLimit")]
    pub default_limit: Option<i64>,
    #[serde(default, rename = "maxLimit")]
    pub max_limit: Option<i64>,
}

/// Fields shared by every relationship kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipCommon {
    #[serde(rename = "localField")]
    pub local_field: String,
    #[serde(rename = "foreignField")]
    pub foreign_field: String,
    pub collection: String,
    #[serde(default, rename = "defaultFilters")]
    pub default_filters: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, rename = "defaultSort")]
    pub default_sort: Option<HashMap<String, i32>>,
    #[serde(default)]
    pub pagination: RelationshipPagination,
    #[serde(default)]
    pub permissions: Option<Vec<String>>,
}

/// One declared navigation from a collection to another.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RelationshipDescriptor {
    /// Local -> remote, cardinality one. Result is a single subdocument
    /// or null, never an array.
    BelongsTo {
        #[serde(flatten)]
        common: RelationshipCommon,
    },
    /// Local -> remote, cardinality many. Result is always an array.
    HasMany {
        #[serde(flatten)]
        common: RelationshipCommon,
    },
    /// Local -> junction -> remote. Result is always an array.
    ManyToMany {
        #[serde(flatten)]
        common: RelationshipCommon,
        through: String,
        #[serde(rename = "throughLocalField")]
        through_local_field: String,
        #[serde(rename = "throughForeignField")]
        through_foreign_field: String,
    },
}

impl RelationshipDescriptor {
    pub fn common(&self) -> &RelationshipCommon {
        match self {
            RelationshipDescriptor::BelongsTo { common }
            | RelationshipDescriptor::HasMany { common }
            | RelationshipDescriptor::ManyToMany { common, .. } => common,
        }
    }

    pub fn target_collection(&self) -> &str {
        &self.common().collection
    }

    /// True for relationships whose result must be a single subdocument
    /// or null.
    pub fn is_singular(&self) -> bool {
        matches!(self, RelationshipDescriptor::BelongsTo { .. })
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            RelationshipDescriptor::BelongsTo { .. } => "belongsTo",
            RelationshipDescriptor::HasMany { .. } => "hasMany",
            RelationshipDescriptor::ManyToMany { .. } => "manyToMany",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn common(collection: &str) -> RelationshipCommon {
        RelationshipCommon {
            local_field: "id".into(),
            foreign_field: "_id".into(),
            collection: collection.into(),
            default_filters: None,
            default_sort: None,
            pagination: RelationshipPagination::default(),
            permissions: None,
        }
    }

    #[test]
    fn belongs_to_is_singular() {
        let rel = RelationshipDescriptor::BelongsTo { common: common("users") };
        assert!(rel.is_singular());
        assert_eq!(rel.kind_str(), "belongsTo");
    }

    #[test]
    fn has_many_and_many_to_many_are_plural() {
        let has_many = RelationshipDescriptor::HasMany { common: common("orders") };
        assert!(!has_many.is_singular());

        let m2m = RelationshipDescriptor::ManyToMany {
            common: common("categories"),
            through: "product_categories".into(),
            through_local_field: "productId".into(),
            through_foreign_field: "categoryId".into(),
        };
        assert!(!m2m.is_singular());
        assert_eq!(m2m.target_collection(), "categories");
    }
}
