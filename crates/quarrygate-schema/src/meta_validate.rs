//! Meta-schema validation run once, at registry load time. Any
//! failure here is fatal: the process must refuse to serve.

use crate::collection::CollectionDescriptor;
use crate::procedure::ProcedureDescriptor;
use crate::relationship::RelationshipDescriptor;
use std::collections::{HashMap, HashSet};

/// Validate one collection descriptor against the others already
/// known.
pub fn validate_collection(
    desc: &CollectionDescriptor,
    all: &HashMap<String, CollectionDescriptor>,
) -> Vec<String> {
    let mut errors = Vec::new();

    for field in &desc.required {
        if !desc.has_field(field) {
            errors.push(format!(
                "{}: required field '{field}' is not declared in properties",
                desc.name
            ));
        }
    }

    for idx in &desc.indexes {
        for field in &idx.fields {
            if !desc.has_field(field) {
                errors.push(format!("{}: index references unknown field '{field}'", desc.name));
            }
        }
    }

    let mut seen_aliases = HashSet::new();
    for (alias, rel) in &desc.relationships {
        if !seen_aliases.insert(alias.clone()) {
            errors.push(format!("{}: duplicate relationship alias '{alias}'", desc.name));
        }

        let common = rel.common();
        if !desc.has_field(&common.local_field) {
            errors.push(format!(
                "{}: relationship '{alias}' localField '{}' is not a declared property",
                desc.name, common.local_field
            ));
        }

        match all.get(&common.collection) {
            Some(target) => {
                if !target.has_field(&common.foreign_field) {
                    errors.push(format!(
                        "{}: relationship '{alias}' foreignField '{}' does not exist on target collection '{}'",
                        desc.name, common.foreign_field, common.collection
                    ));
                }
            }
            None => {
                errors.push(format!(
                    "{}: relationship '{alias}' targets unknown collection '{}'",
                    desc.name, common.collection
                ));
            }
        }

        if let RelationshipDescriptor::ManyToMany { through, .. } = rel {
            if !all.contains_key(through) {
                errors.push(format!(
                    "{}: relationship '{alias}' junction collection '{through}' does not exist",
                    desc.name
                ));
            }
        }
    }

    errors
}

/// Validate a procedure descriptor: step ids unique, rollback targets
/// resolvable.
pub fn validate_procedure(desc: &ProcedureDescriptor) -> Vec<String> {
    let mut errors = Vec::new();

    if desc.has_duplicate_step_ids() {
        errors.push(format!("{}: duplicate step id in procedure", desc.name));
    }

    if let crate::procedure::ErrorHandling::Rollback { rollback_steps } = &desc.error_handling {
        for id in rollback_steps {
            if desc.step(id).is_none() {
                errors.push(format!(
                    "{}: rollbackSteps references unknown step id '{id}'",
                    desc.name
                ));
            }
        }
    }

    for field in &desc.input.as_ref().map(|i| i.required.clone()).unwrap_or_default() {
        let declared = desc
            .input
            .as_ref()
            .map(|i| i.properties.contains_key(field))
            .unwrap_or(false);
        if !declared {
            errors.push(format!(
                "{}: input required field '{field}' is not declared in input.properties",
                desc.name
            ));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relationship::{RelationshipCommon, RelationshipDescriptor};
    use quarrygate_validation::PropertySchema;
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
            hooks: Default::default(),
        }
    }

    #[test]
    fn required_field_must_be_declared() {
        let mut desc = bare("users");
        desc.required.push("email".to_string());
        let all = HashMap::from([("users".to_string(), desc.clone())]);
        let errors = validate_collection(&desc, &all);
        assert!(errors.iter().any(|e| e.contains("email")));
    }

    #[test]
    fn relationship_target_must_exist() {
        let mut users = bare("users");
        users.properties.insert("orderId".to_string(), PropertySchema::string());
        users.relationships.insert(
            "orders".to_string(),
            RelationshipDescriptor::BelongsTo {
                common: RelationshipCommon {
                    local_field: "orderId".into(),
                    foreign_field: "_id".into(),
                    collection: "orders".into(),
                    default_filters: None,
                    default_sort: None,
                    pagination: Default::default(),
                    permissions: None,
                },
            },
        );
        let all = HashMap::from([("users".to_string(), users.clone())]);
        let errors = validate_collection(&users, &all);
        assert!(errors.iter().any(|e| e.contains("unknown collection")));
    }

    #[test]
    fn many_to_many_requires_junction_collection() {
        let mut products = bare("products");
        products.properties.insert("id".to_string(), PropertySchema::string());
        products.relationships.insert(
            "categories".to_string(),
            RelationshipDescriptor::ManyToMany {
                common: RelationshipCommon {
                    local_field: "id".into(),
                    foreign_field: "_id".into(),
                    collection: "categories".into(),
                    default_filters: None,
                    default_sort: None,
                    pagination: Default::default(),
                    permissions: None,
                },
                through: "product_categories".into(),
                through_local_field: "productId".into(),
                through_foreign_field: "categoryId".into(),
            },
        );
        let mut categories = bare("categories");
        categories.properties.insert("_id".to_string(), PropertySchema::string());
        let all = HashMap::from([
            ("products".to_string(), products.clone()),
            ("categories".to_string(), categories),
        ]);
        let errors = validate_collection(&products, &all);
        assert!(errors.iter().any(|e| e.contains("junction collection")));
    }
}
