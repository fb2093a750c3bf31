//! The execution context a procedure invocation accumulates as its
//! steps run.

use serde_json::Value;
use std::collections::HashMap;

/// What a completed step left behind.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub output: Value,
    pub execution_time_ms: u64,
    pub timestamp: String,
}

/// Mutable state threaded through one procedure invocation. Steps run
/// one at a time, so no synchronization is needed here; the request
/// layer owns one context per invocation.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub params: Value,
    pub steps: HashMap<String, StepRecord>,
    pub user: Value,
    pub config: Value,
    /// ISO-8601 timestamp stamped once when the context was built.
    pub now: String,
}

impl ExecutionContext {
    pub fn new(params: Value, user: Value, config: Value, now: String) -> Self {
        Self { params, steps: HashMap::new(), user, config, now }
    }

    pub fn record_step(&mut self, step_id: &str, record: StepRecord) {
        self.steps.insert(step_id.to_string(), record);
    }

    /// Renders the `steps` map as a JSON value so a failed procedure's
    /// error can carry whatever steps had already completed.
    pub fn partial_steps_json(&self) -> Value {
        let map: serde_json::Map<String, Value> = self
            .steps
            .iter()
            .map(|(id, record)| {
                (
                    id.clone(),
                    serde_json::json!({
                        "output": record.output,
                        "executionTime": record.execution_time_ms,
                        "timestamp": record.timestamp,
                    }),
                )
            })
            .collect();
        Value::Object(map)
    }
}
