//! Authorization: collection/procedure/relationship permission checks.

use crate::auth::Subject;
use quarrygate_common::GatewayError;
use quarrygate_query::select::SelectionAst;
use quarrygate_schema::{CollectionDescriptor, Operation, SchemaRegistry};

/// Every collection the caller touches: the root plus the target of
/// every relationship alias in the selection AST.
pub fn touched_collections(root: &str, selection: &[SelectionAst], registry: &SchemaRegistry) -> Result<Vec<String>, GatewayError> {
    let mut out = vec![root.to_string()];
    collect_relationship_targets(root, selection, registry, &mut out)?;
    Ok(out)
}

fn collect_relationship_targets(
    collection: &str,
    nodes: &[SelectionAst],
    registry: &SchemaRegistry,
    out: &mut Vec<String>,
) -> Result<(), GatewayError> {
    let desc = registry
        .get_collection(collection)
        .ok_or_else(|| GatewayError::NotFound(format!("unknown collection '{collection}'")))?;
    for node in nodes {
        match node {
            SelectionAst::Field(_) => {}
            SelectionAst::Aggregate(agg) => {
                if let Some(rel) = desc.relationships.get(&agg.relation) {
                    out.push(rel.target_collection().to_string());
                }
            }
            SelectionAst::Relationship(rel_node) => {
                if let Some(rel) = desc.relationships.get(&rel_node.relation) {
                    let target = rel.target_collection().to_string();
                    out.push(target.clone());
                    collect_relationship_targets(&target, &rel_node.fields, registry, out)?;
                }
            }
        }
    }
    Ok(())
}

/// Checks that `subject` has `operation` permission on `collection`,
/// per the collection's own `permissions` table.
pub fn authorize_operation(subject: &Subject, collection: &CollectionDescriptor, operation: Operation) -> Result<(), GatewayError> {
    if collection.permission_for(operation, &subject.role) {
        return Ok(());
    }
    Err(GatewayError::Authorization(format!(
        "role '{}' lacks '{}' on collection '{}'",
        subject.role,
        operation.as_str(),
        collection.name
    )))
}

/// Checks every collection touched by a selection in one pass.
pub fn authorize_selection(
    subject: &Subject,
    root: &str,
    selection: &[SelectionAst],
    operation: Operation,
    registry: &SchemaRegistry,
) -> Result<(), GatewayError> {
    for collection in touched_collections(root, selection, registry)? {
        let desc = registry
            .get_collection(&collection)
            .ok_or_else(|| GatewayError::NotFound(format!("unknown collection '{collection}'")))?;
        authorize_operation(subject, desc, if collection == root { operation } else { Operation::Find })?;
    }
    Ok(())
}

/// Execute permission on a procedure: `"procedures:<name>"` or a
/// wildcard must be present in the procedure's own allowlist.
pub fn authorize_procedure(subject: &Subject, permissions: &[String]) -> Result<(), GatewayError> {
    if permissions.is_empty() || permissions.iter().any(|p| p == &subject.role || p == "*") {
        return Ok(());
    }
    Err(GatewayError::Authorization(format!("role '{}' may not execute this procedure", subject.role)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarrygate_query::select::parse as parse_selection;
    use quarrygate_schema::{HookBindings, RelationshipCommon, RelationshipDescriptor};
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

    #[test]
    fn touched_collections_includes_relationship_targets() {
        let mut orders = bare("orders");
        orders.relationships.insert(
            "customer".to_string(),
            RelationshipDescriptor::BelongsTo {
                common: RelationshipCommon {
                    local_field: "customerId".into(),
                    foreign_field: "_id".into(),
                    collection: "users".into(),
                    default_filters: None,
                    default_sort: None,
                    pagination: Default::default(),
                    permissions: None,
                },
            },
        );
        let users = bare("users");
        let registry = SchemaRegistry::build(vec![orders, users], vec![]).unwrap();
        let selection = parse_selection("orderNumber,customer(name)").unwrap();

        let touched = touched_collections("orders", &selection, &registry).unwrap();
        assert_eq!(touched, vec!["orders".to_string(), "users".to_string()]);
    }

    #[test]
    fn authorize_operation_rejects_missing_permission() {
        let subject = Subject { id: "u1".into(), role: "viewer".into(), permissions: Default::default() };
        let desc = bare("users");
        assert!(authorize_operation(&subject, &desc, Operation::Find).is_err());
    }
}
