//! The Schema Registry: an in-memory, validated catalog of collection
//! and procedure descriptors.

use crate::collection::CollectionDescriptor;
use crate::meta_validate::{validate_collection, validate_procedure};
use crate::procedure::ProcedureDescriptor;
use quarrygate_common::GatewayError;
use quarrygate_validation::{ValidationErrors, ValidationMode, Validator};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Describes one relationship pointing *into* a collection, for the
/// `/collections/:name/relationships` introspection endpoint.
#[derive(Debug, Clone)]
pub struct IncomingRelationship {
    pub owning_collection: String,
    pub alias: String,
}

/// Holds every descriptor for the process lifetime. Load-once,
/// read-many; never mutated in place after [`SchemaRegistry::load`]
/// returns. `hotReload` rebuilds a fresh registry and swaps it in
/// rather than mutating this one (see the CLI binary's reload
/// watcher, which publishes rebuilt registries behind an `ArcSwap`).
#[derive(Debug)]
pub struct SchemaRegistry {
    collections: HashMap<String, CollectionDescriptor>,
    procedures: HashMap<String, ProcedureDescriptor>,
    document_validators: HashMap<String, Validator>,
    procedure_input_validators: HashMap<String, Validator>,
    procedure_output_validators: HashMap<String, Validator>,
    reverse_index: HashMap<String, Vec<IncomingRelationship>>,
}

impl SchemaRegistry {
    /// Build a registry from already-parsed descriptors. Fails fatally
    /// (returns `Err`) if any descriptor violates the meta-schema.
    pub fn build(
        collections: Vec<CollectionDescriptor>,
        procedures: Vec<ProcedureDescriptor>,
    ) -> Result<Self, GatewayError> {
        let collection_map: HashMap<String, CollectionDescriptor> =
            collections.into_iter().map(|c| (c.name.clone(), c)).collect();

        let mut errors = Vec::new();
        for desc in collection_map.values() {
            errors.extend(validate_collection(desc, &collection_map));
        }

        let procedure_map: HashMap<String, ProcedureDescriptor> =
            procedures.into_iter().map(|p| (p.name.clone(), p)).collect();
        for desc in procedure_map.values() {
            errors.extend(validate_procedure(desc));
        }

        if !errors.is_empty() {
            return Err(GatewayError::SchemaValidation(errors.join("; ")));
        }

        let mut document_validators = HashMap::with_capacity(collection_map.len());
        for desc in collection_map.values() {
            let validator = Validator::compile(&desc.properties, &desc.required, desc.additional_properties)
                .map_err(|e| GatewayError::SchemaValidation(format!("{}: {e}", desc.name)))?;
            document_validators.insert(desc.name.clone(), validator);
        }

        let mut procedure_input_validators = HashMap::with_capacity(procedure_map.len());
        let mut procedure_output_validators = HashMap::with_capacity(procedure_map.len());
        for desc in procedure_map.values() {
            if let Some(input) = &desc.input {
                let validator = Validator::compile(&input.properties, &input.required, input.additional_properties)
                    .map_err(|e| GatewayError::SchemaValidation(format!("{}: input {e}", desc.name)))?;
                procedure_input_validators.insert(desc.name.clone(), validator);
            }
            if let Some(output) = &desc.output {
                let validator = Validator::compile(&output.properties, &output.required, output.additional_properties)
                    .map_err(|e| GatewayError::SchemaValidation(format!("{}: output {e}", desc.name)))?;
                procedure_output_validators.insert(desc.name.clone(), validator);
            }
        }

        let mut reverse_index: HashMap<String, Vec<IncomingRelationship>> = HashMap::new();
        for desc in collection_map.values() {
            for (alias, rel) in &desc.relationships {
                reverse_index
                    .entry(rel.target_collection().to_string())
                    .or_default()
                    .push(IncomingRelationship { owning_collection: desc.name.clone(), alias: alias.clone() });
            }
        }

        info!(
            collections = collection_map.len(),
            procedures = procedure_map.len(),
            "schema registry loaded"
        );

        Ok(Self {
            collections: collection_map,
            procedures: procedure_map,
            document_validators,
            procedure_input_validators,
            procedure_output_validators,
            reverse_index,
        })
    }

    /// Load every `*.json`/`*.yaml`/`*.yml` descriptor under
    /// `collections_dir` and `procedures_dir`.
    pub fn load_from_dirs(collections_dir: &Path, procedures_dir: &Path) -> Result<Self, GatewayError> {
        let collections = load_descriptors::<CollectionDescriptor>(collections_dir)?;
        let procedures = if procedures_dir.exists() {
            load_descriptors::<ProcedureDescriptor>(procedures_dir)?
        } else {
            warn!(path = %procedures_dir.display(), "procedures directory does not exist, skipping");
            Vec::new()
        };
        Self::build(collections, procedures)
    }

    pub fn get_collection(&self, name: &str) -> Option<&CollectionDescriptor> {
        self.collections.get(name)
    }

    pub fn get_procedure(&self, name: &str) -> Option<&ProcedureDescriptor> {
        self.procedures.get(name)
    }

    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(|s| s.as_str())
    }

    pub fn procedure_names(&self) -> impl Iterator<Item = &str> {
        self.procedures.keys().map(|s| s.as_str())
    }

    pub fn incoming_relationships(&self, collection: &str) -> &[IncomingRelationship] {
        self.reverse_index.get(collection).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Validate a document against a collection's compiled validator.
    pub fn validate_document(
        &self,
        collection: &str,
        value: &serde_json::Value,
        mode: ValidationMode,
    ) -> Result<ValidationErrors, GatewayError> {
        let validator = self
            .document_validators
            .get(collection)
            .ok_or_else(|| GatewayError::NotFound(format!("unknown collection '{collection}'")))?;
        Ok(validator.validate(value, mode))
    }

    pub fn validate_procedure_input(
        &self,
        name: &str,
        params: &serde_json::Value,
    ) -> Result<ValidationErrors, GatewayError> {
        self.procedures
            .get(name)
            .ok_or_else(|| GatewayError::NotFound(format!("unknown procedure '{name}'")))?;
        match self.procedure_input_validators.get(name) {
            Some(validator) => Ok(validator.validate(params, ValidationMode::Replace)),
            None => Ok(ValidationErrors::new()),
        }
    }

    pub fn validate_procedure_output(
        &self,
        name: &str,
        value: &serde_json::Value,
    ) -> ValidationErrors {
        match self.procedure_output_validators.get(name) {
            Some(validator) => validator.validate(value, ValidationMode::Additive),
            None => ValidationErrors::new(),
        }
    }
}

fn load_descriptors<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>, GatewayError> {
    let mut out = Vec::new();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| GatewayError::internal(format!("cannot read descriptor dir {}: {e}", dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| GatewayError::internal(e.to_string()))?;
        let path = entry.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else { continue };
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| GatewayError::internal(format!("cannot read {}: {e}", path.display())))?;
        let parsed = match ext {
            "json" => serde_json::from_str::<T>(&contents)
                .map_err(|e| GatewayError::SchemaValidation(format!("{}: {e}", path.display())))?,
            "yaml" | "yml" => serde_yaml::from_str::<T>(&contents)
                .map_err(|e| GatewayError::SchemaValidation(format!("{}: {e}", path.display())))?,
            _ => continue,
        };
        out.push(parsed);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::HookBindings;
    use std::collections::HashMap as Map;

    fn bare(name: &str) -> CollectionDescriptor {
        CollectionDescriptor {
            name: name.into(),
            title: None,
            description: None,
            properties: Map::new(),
            required: vec![],
            additional_properties: true,
            indexes: vec![],
            relationships: Map::new(),
            permissions: Map::new(),
            rate_limits: Map::new(),
            search_fields: vec![],
            default_sort: None,
            default_limit: 20,
            max_limit: 200,
            hooks: HookBindings::default(),
        }
    }

    #[test]
    fn build_rejects_invalid_descriptors() {
        let mut users = bare("users");
        users.required.push("email".to_string());
        let result = SchemaRegistry::build(vec![users], vec![]);
        assert!(result.is_err());
    }

    #[test]
    fn build_succeeds_and_answers_lookups() {
        let registry = SchemaRegistry::build(vec![bare("users"), bare("orders")], vec![]).unwrap();
        assert!(registry.get_collection("users").is_some());
        assert!(registry.get_collection("missing").is_none());
        assert_eq!(registry.collection_names().count(), 2);
    }

    #[test]
    fn reverse_index_tracks_incoming_relationships() {
        use crate::relationship::{RelationshipCommon, RelationshipDescriptor};
        use quarrygate_validation::PropertySchema;

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
        let orders = bare("orders");
        let registry = SchemaRegistry::build(vec![users, orders], vec![]).unwrap();
        let incoming = registry.incoming_relationships("orders");
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].owning_collection, "users");
        assert_eq!(incoming[0].alias, "orders");
    }
}
