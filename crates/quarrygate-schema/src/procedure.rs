//! Procedure descriptors — declarative multi-step workflows.

use quarrygate_common::HttpMethod;
use quarrygate_validation::PropertySchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Object schema shape shared by procedure `input`/`output` blocks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentSchema {
    #[serde(default)]
    pub properties: HashMap<String, PropertySchema>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default = "default_true", rename = "additionalProperties")]
    pub additional_properties: bool,
}

fn default_true() -> bool {
    true
}

/// One step in a procedure, discriminated by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StepKind {
    Find {
        collection: String,
        #[serde(default)]
        filter: serde_json::Value,
        #[serde(default)]
        select: Option<String>,
        #[serde(default)]
        sort: Option<serde_json::Value>,
        #[serde(default)]
        limit: Option<i64>,
    },
    FindOne {
        collection: String,
        #[serde(default)]
        filter: serde_json::Value,
    },
    InsertOne {
        collection: String,
        document: serde_json::Value,
    },
    InsertMany {
        collection: String,
        documents: serde_json::Value,
    },
    UpdateOne {
        collection: String,
        filter: serde_json::Value,
        update: serde_json::Value,
    },
    UpdateMany {
        collection: String,
        filter: serde_json::Value,
        update: serde_json::Value,
    },
    DeleteOne {
        collection: String,
        filter: serde_json::Value,
    },
    DeleteMany {
        collection: String,
        filter: serde_json::Value,
    },
    Aggregate {
        collection: String,
        pipeline: serde_json::Value,
    },
    CountDocuments {
        collection: String,
        #[serde(default)]
        filter: serde_json::Value,
    },
    Distinct {
        collection: String,
        field: String,
        #[serde(default)]
        filter: serde_json::Value,
    },
    /// Pure data reshaping step: renders `template` against the
    /// execution context and stores the rendered value as output.
    Transform {
        template: serde_json::Value,
    },
    /// Evaluated with the bounded condition grammar, no host-language
    /// evaluation. `then_step`/`else_step` name the step id execution
    /// jumps to next; `None` falls through to the following step.
    Condition {
        expression: String,
        #[serde(default, rename = "thenStep")]
        then_step: Option<String>,
        #[serde(default, rename = "elseStep")]
        else_step: Option<String>,
    },
    Http {
        method: String,
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        body: Option<serde_json::Value>,
    },
    Delay {
        ms: u64,
    },
}

/// A single procedure step: a stable id plus its type-specific kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    #[serde(flatten)]
    pub kind: StepKind,
    /// Per-step timeout override, in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// What to do when a step fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "camelCase")]
pub enum ErrorHandling {
    Rollback {
        #[serde(default, rename = "rollbackSteps")]
        rollback_steps: Vec<String>,
    },
    Retry {
        #[serde(default = "default_retry_count", rename = "retryCount")]
        retry_count: u32,
    },
    Ignore,
}

fn default_retry_count() -> u32 {
    1
}

impl Default for ErrorHandling {
    fn default() -> Self {
        ErrorHandling::Ignore
    }
}

/// Lifecycle hooks for a procedure invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcedureHooks {
    #[serde(default, rename = "beforeExecution")]
    pub before_execution: Option<String>,
    #[serde(default, rename = "afterExecution")]
    pub after_execution: Option<String>,
    #[serde(default, rename = "onError")]
    pub on_error: Option<String>,
}

/// A declarative multi-step workflow, bound to one HTTP method+endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcedureDescriptor {
    pub name: String,
    #[serde(with = "method_as_str")]
    pub method: HttpMethod,
    pub endpoint: String,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub input: Option<DocumentSchema>,
    #[serde(default)]
    pub output: Option<DocumentSchema>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default, rename = "rateLimits")]
    pub rate_limits: Option<super::collection::RateLimitPolicy>,
    #[serde(default)]
    pub hooks: ProcedureHooks,
    #[serde(default, rename = "errorHandling")]
    pub error_handling: ErrorHandling,
    #[serde(default, rename = "timeout")]
    pub timeout_ms: Option<u64>,
}

impl ProcedureDescriptor {
    /// Every step id must be unique within the procedure (data model
    /// invariant).
    pub fn has_duplicate_step_ids(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        self.steps.iter().any(|step| !seen.insert(step.id.clone()))
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Position of a step by id, for resolving a `condition` step's
    /// branch target to a cursor the executor can jump to.
    pub fn step_index(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }
}

mod method_as_str {
    use quarrygate_common::HttpMethod;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(method: &HttpMethod, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(method.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<HttpMethod, D::Error> {
        let s = String::deserialize(de)?;
        HttpMethod::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str) -> Step {
        Step {
            id: id.to_string(),
            kind: StepKind::Delay { ms: 1 },
            timeout_ms: None,
        }
    }

    #[test]
    fn detects_duplicate_step_ids() {
        let proc = ProcedureDescriptor {
            name: "p".into(),
            method: HttpMethod::Post,
            endpoint: "/functions/p".into(),
            steps: vec![step("a"), step("a")],
            input: None,
            output: None,
            permissions: vec![],
            rate_limits: None,
            hooks: ProcedureHooks::default(),
            error_handling: ErrorHandling::default(),
            timeout_ms: None,
        };
        assert!(proc.has_duplicate_step_ids());
    }

    #[test]
    fn unique_step_ids_pass() {
        let proc = ProcedureDescriptor {
            name: "p".into(),
            method: HttpMethod::Post,
            endpoint: "/functions/p".into(),
            steps: vec![step("a"), step("b")],
            input: None,
            output: None,
            permissions: vec![],
            rate_limits: None,
            hooks: ProcedureHooks::default(),
            error_handling: ErrorHandling::default(),
            timeout_ms: None,
        };
        assert!(!proc.has_duplicate_step_ids());
        assert!(proc.step("b").is_some());
    }
}
