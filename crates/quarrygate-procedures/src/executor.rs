//! Executes a [`ProcedureDescriptor`]'s steps, following `condition`
//! branches instead of always running the next step in declaration
//! order.
//!
//! The database step kinds are dispatched through the
//! [`DatabaseExecutor`] trait rather than a `Map<string, handler>`
//! built at construction time: the table of "known step kinds" is the
//! `StepKind` enum itself, fixed at compile time, and the match in
//! [`ProcedureExecutor::run_step`] is the whole dispatcher.

use crate::condition;
use crate::context::{ExecutionContext, StepRecord};
use crate::template::render_tree;
use async_trait::async_trait;
use quarrygate_common::GatewayError;
use quarrygate_schema::{ErrorHandling, ProcedureDescriptor, Step, StepKind};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Host-provided database operations. A real binary backs this with
/// the MongoDB driver; tests back it with an in-memory fake.
#[async_trait]
pub trait DatabaseExecutor: Send + Sync {
    async fn find(&self, collection: &str, filter: Value, select: Option<String>, sort: Option<Value>, limit: Option<i64>) -> Result<Value, GatewayError>;
    async fn find_one(&self, collection: &str, filter: Value) -> Result<Value, GatewayError>;
    async fn insert_one(&self, collection: &str, document: Value) -> Result<Value, GatewayError>;
    async fn insert_many(&self, collection: &str, documents: Value) -> Result<Value, GatewayError>;
    async fn update_one(&self, collection: &str, filter: Value, update: Value) -> Result<Value, GatewayError>;
    async fn update_many(&self, collection: &str, filter: Value, update: Value) -> Result<Value, GatewayError>;
    async fn delete_one(&self, collection: &str, filter: Value) -> Result<Value, GatewayError>;
    async fn delete_many(&self, collection: &str, filter: Value) -> Result<Value, GatewayError>;
    async fn aggregate(&self, collection: &str, pipeline: Value) -> Result<Value, GatewayError>;
    async fn count_documents(&self, collection: &str, filter: Value) -> Result<Value, GatewayError>;
    async fn distinct(&self, collection: &str, field: &str, filter: Value) -> Result<Value, GatewayError>;

    /// Best-effort undo of a previously-executed step. Inverse
    /// semantics are host-defined; the default does nothing, which is
    /// always a safe (if unhelpful) "rollback".
    async fn rollback_step(&self, _kind: &StepKind, _record: &StepRecord) -> Result<(), GatewayError> {
        Ok(())
    }
}

/// The outbound HTTP step's host.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn request(&self, method: &str, url: &str, headers: HashMap<String, String>, body: Option<Value>) -> Result<Value, GatewayError>;
}

/// Lifecycle hooks are identifiers resolved from a registry of
/// host-provided functions; unknown names are logged and skipped,
/// never an error.
pub trait HookRegistry: Send + Sync {
    fn contains(&self, name: &str) -> bool;
    fn invoke(&self, name: &str, ctx: &mut ExecutionContext) -> Result<(), GatewayError>;
}

/// A `HookRegistry` with nothing registered; every name is logged and
/// skipped. Useful as a default when a deployment defines no hooks.
pub struct NoopHooks;

impl HookRegistry for NoopHooks {
    fn contains(&self, _name: &str) -> bool {
        false
    }
    fn invoke(&self, _name: &str, _ctx: &mut ExecutionContext) -> Result<(), GatewayError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    pub default_step_timeout_ms: u64,
    pub retry_backoff_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { default_step_timeout_ms: 10_000, retry_backoff_ms: 200 }
    }
}

/// Final shape returned to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcedureOutput {
    LastStep(Value),
    StepMap(HashMap<String, Value>),
}

pub struct ProcedureExecutor<D: DatabaseExecutor, H: HttpClient, K: HookRegistry> {
    db: D,
    http: H,
    hooks: K,
    config: ExecutorConfig,
}

impl<D: DatabaseExecutor, H: HttpClient, K: HookRegistry> ProcedureExecutor<D, H, K> {
    pub fn new(db: D, http: H, hooks: K, config: ExecutorConfig) -> Self {
        Self { db, http, hooks, config }
    }

    /// The database executor this instance dispatches steps through,
    /// for callers (e.g. the CRUD routes) that want to reuse the same
    /// connection rather than holding a second handle to it.
    pub fn db(&self) -> &D {
        &self.db
    }

    pub async fn execute(&self, descriptor: &ProcedureDescriptor, mut ctx: ExecutionContext) -> Result<ProcedureOutput, GatewayError> {
        if let Some(name) = &descriptor.hooks.before_execution {
            self.run_hook(name, &mut ctx);
        }

        let mut cursor = 0usize;
        // A well-formed procedure visits each step at most once; this bounds
        // a thenStep/elseStep cycle instead of looping forever.
        let guard = descriptor.steps.len().saturating_mul(2).max(1);
        let mut hops = 0usize;

        while cursor < descriptor.steps.len() {
            if hops > guard {
                return Err(GatewayError::ProcedureStep(format!(
                    "procedure '{}' looped past its step-jump guard; check thenStep/elseStep for a cycle",
                    descriptor.name
                )));
            }
            hops += 1;

            let step = &descriptor.steps[cursor];
            let branch = match self.execute_step(descriptor, step, &mut ctx).await {
                Ok(branch) => branch,
                Err(err) => {
                    if let Some(name) = &descriptor.hooks.on_error {
                        self.run_hook(name, &mut ctx);
                    }
                    return Err(err);
                }
            };

            cursor = match branch {
                Some(next_id) => descriptor.step_index(&next_id).ok_or_else(|| {
                    GatewayError::ProcedureStep(format!("step '{}' branches to unknown step '{next_id}'", step.id))
                })?,
                None => cursor + 1,
            };
        }

        if let Some(name) = &descriptor.hooks.after_execution {
            self.run_hook(name, &mut ctx);
        }

        Ok(self.frame_output(descriptor, &ctx))
    }

    fn run_hook(&self, name: &str, ctx: &mut ExecutionContext) {
        if !self.hooks.contains(name) {
            tracing::warn!(hook = name, "unknown hook name; skipping");
            return;
        }
        if let Err(err) = self.hooks.invoke(name, ctx) {
            tracing::warn!(hook = name, error = %err, "hook invocation failed");
        }
    }

    /// Runs one step, applying its `errorHandling` strategy on failure.
    /// Returns the branch target a `condition` step resolved to, if any,
    /// so `execute` can jump the cursor instead of continuing sequentially.
    async fn execute_step(
        &self,
        descriptor: &ProcedureDescriptor,
        step: &Step,
        ctx: &mut ExecutionContext,
    ) -> Result<Option<String>, GatewayError> {
        let timeout = Duration::from_millis(
            step.timeout_ms.or(descriptor.timeout_ms).unwrap_or(self.config.default_step_timeout_ms),
        );

        let attempts = match &descriptor.error_handling {
            ErrorHandling::Retry { retry_count } => 1 + *retry_count,
            _ => 1,
        };

        let mut last_err = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.retry_backoff_ms)).await;
            }
            match tokio::time::timeout(timeout, self.run_step(step, ctx)).await {
                Ok(Ok(record)) => {
                    let branch = branch_target(&step.kind, &record.output);
                    ctx.record_step(&step.id, record);
                    return Ok(branch);
                }
                Ok(Err(err)) => last_err = Some(err),
                Err(_) => {
                    last_err = Some(GatewayError::Timeout {
                        message: format!("step '{}' exceeded its {timeout:?} timeout", step.id),
                        partial_steps: Some(ctx.partial_steps_json()),
                    });
                }
            }
        }

        let err = last_err.unwrap_or_else(|| GatewayError::ProcedureStep(format!("step '{}' failed", step.id)));

        if let ErrorHandling::Rollback { rollback_steps } = &descriptor.error_handling {
            for id in rollback_steps.iter().rev() {
                let Some(rollback_step) = descriptor.step(id) else { continue };
                let Some(record) = ctx.steps.get(id).cloned() else { continue };
                if let Err(rollback_err) = self.db.rollback_step(&rollback_step.kind, &record).await {
                    tracing::error!(step = id, error = %rollback_err, "rollback failed; continuing best-effort");
                }
            }
        }

        Err(err)
    }

    async fn run_step(&self, step: &Step, ctx: &ExecutionContext) -> Result<StepRecord, GatewayError> {
        let started = std::time::Instant::now();
        let rendered = render_tree(&step_params_as_value(&step.kind), ctx);
        let output = self.dispatch(&step.kind, rendered, ctx).await?;
        Ok(StepRecord {
            output,
            execution_time_ms: started.elapsed().as_millis() as u64,
            timestamp: ctx.now.clone(),
        })
    }

    async fn dispatch(&self, kind: &StepKind, rendered: Value, ctx: &ExecutionContext) -> Result<Value, GatewayError> {
        match kind {
            StepKind::Find { collection, select, sort, limit, .. } => {
                self.db
                    .find(collection, rendered["filter"].clone(), select.clone(), sort.clone(), *limit)
                    .await
            }
            StepKind::FindOne { collection, .. } => self.db.find_one(collection, rendered["filter"].clone()).await,
            StepKind::InsertOne { collection, .. } => self.db.insert_one(collection, rendered["document"].clone()).await,
            StepKind::InsertMany { collection, .. } => self.db.insert_many(collection, rendered["documents"].clone()).await,
            StepKind::UpdateOne { collection, .. } => {
                self.db.update_one(collection, rendered["filter"].clone(), rendered["update"].clone()).await
            }
            StepKind::UpdateMany { collection, .. } => {
                self.db.update_many(collection, rendered["filter"].clone(), rendered["update"].clone()).await
            }
            StepKind::DeleteOne { collection, .. } => self.db.delete_one(collection, rendered["filter"].clone()).await,
            StepKind::DeleteMany { collection, .. } => self.db.delete_many(collection, rendered["filter"].clone()).await,
            StepKind::Aggregate { collection, .. } => self.db.aggregate(collection, rendered["pipeline"].clone()).await,
            StepKind::CountDocuments { collection, .. } => {
                self.db.count_documents(collection, rendered["filter"].clone()).await
            }
            StepKind::Distinct { collection, field, .. } => {
                self.db.distinct(collection, field, rendered["filter"].clone()).await
            }
            StepKind::Transform { .. } => Ok(rendered["template"].clone()),
            StepKind::Condition { expression, then_step, else_step } => {
                let matched = condition::evaluate(expression, ctx)?;
                Ok(serde_json::json!({
                    "matched": matched,
                    "branch": if matched { then_step.clone() } else { else_step.clone() },
                }))
            }
            StepKind::Http { method, headers, .. } => {
                let url = rendered["url"].as_str().unwrap_or_default().to_string();
                self.http.request(method, &url, headers.clone(), rendered.get("body").cloned()).await
            }
            StepKind::Delay { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                Ok(Value::Null)
            }
        }
    }

    fn frame_output(&self, descriptor: &ProcedureDescriptor, ctx: &ExecutionContext) -> ProcedureOutput {
        if descriptor.output.is_some() {
            if let Some(last) = descriptor.steps.last() {
                if let Some(record) = ctx.steps.get(&last.id) {
                    return ProcedureOutput::LastStep(record.output.clone());
                }
            }
        }
        let map = ctx.steps.iter().map(|(id, record)| (id.clone(), record.output.clone())).collect();
        ProcedureOutput::StepMap(map)
    }
}

/// Pulls the next-step id out of a `condition` step's own output, if
/// it resolved one. Every other step kind has nothing to branch to.
fn branch_target(kind: &StepKind, output: &Value) -> Option<String> {
    if !matches!(kind, StepKind::Condition { .. }) {
        return None;
    }
    output.get("branch").and_then(|v| v.as_str()).map(|s| s.to_string())
}

/// Converts a step's static fields into the JSON shape `render_tree`
/// walks, under the same keys `dispatch` reads back out.
fn step_params_as_value(kind: &StepKind) -> Value {
    match kind {
        StepKind::Find { filter, select, sort, limit, .. } => serde_json::json!({
            "filter": filter, "select": select, "sort": sort, "limit": limit,
        }),
        StepKind::FindOne { filter, .. } => serde_json::json!({"filter": filter}),
        StepKind::InsertOne { document, .. } => serde_json::json!({"document": document}),
        StepKind::InsertMany { documents, .. } => serde_json::json!({"documents": documents}),
        StepKind::UpdateOne { filter, update, .. } => serde_json::json!({"filter": filter, "update": update}),
        StepKind::UpdateMany { filter, update, .. } => serde_json::json!({"filter": filter, "update": update}),
        StepKind::DeleteOne { filter, .. } => serde_json::json!({"filter": filter}),
        StepKind::DeleteMany { filter, .. } => serde_json::json!({"filter": filter}),
        StepKind::Aggregate { pipeline, .. } => serde_json::json!({"pipeline": pipeline}),
        StepKind::CountDocuments { filter, .. } => serde_json::json!({"filter": filter}),
        StepKind::Distinct { filter, .. } => serde_json::json!({"filter": filter}),
        StepKind::Transform { template } => serde_json::json!({"template": template}),
        StepKind::Condition { .. } => Value::Null,
        StepKind::Http { url, body, .. } => serde_json::json!({"url": url, "body": body}),
        StepKind::Delay { .. } => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarrygate_schema::{ErrorHandling, ProcedureHooks};
    use quarrygate_common::HttpMethod;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeDb {
        find_one_calls: Arc<AtomicUsize>,
        fail_first_n: usize,
    }

    #[async_trait]
    impl DatabaseExecutor for FakeDb {
        async fn find(&self, _c: &str, _f: Value, _s: Option<String>, _so: Option<Value>, _l: Option<i64>) -> Result<Value, GatewayError> {
            Ok(json!([]))
        }
        async fn find_one(&self, _c: &str, filter: Value) -> Result<Value, GatewayError> {
            let call = self.find_one_calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first_n {
                return Err(GatewayError::ProcedureStep("transient".into()));
            }
            Ok(json!({"_id": filter["_id"], "name": "Ada"}))
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
            Ok(json!({"deletedCount": 1}))
        }
        async fn delete_many(&self, _c: &str, _f: Value) -> Result<Value, GatewayError> {
            Ok(json!({"deletedCount": 1}))
        }
        async fn aggregate(&self, _c: &str, _p: Value) -> Result<Value, GatewayError> {
            Ok(json!([]))
        }
        async fn count_documents(&self, _c: &str, _f: Value) -> Result<Value, GatewayError> {
            Ok(json!(0))
        }
        async fn distinct(&self, _c: &str, _field: &str, _f: Value) -> Result<Value, GatewayError> {
            Ok(json!([]))
        }
    }

    struct FakeHttp;
    #[async_trait]
    impl HttpClient for FakeHttp {
        async fn request(&self, _m: &str, _u: &str, _h: HashMap<String, String>, _b: Option<Value>) -> Result<Value, GatewayError> {
            Ok(json!({"status": 200}))
        }
    }

    fn descriptor(steps: Vec<Step>, error_handling: ErrorHandling) -> ProcedureDescriptor {
        ProcedureDescriptor {
            name: "p".into(),
            method: HttpMethod::Post,
            endpoint: "/functions/p".into(),
            steps,
            input: None,
            output: None,
            permissions: vec![],
            rate_limits: None,
            hooks: ProcedureHooks::default(),
            error_handling,
            timeout_ms: Some(500),
        }
    }

    fn find_one_step(id: &str) -> Step {
        Step {
            id: id.into(),
            kind: StepKind::FindOne { collection: "users".into(), filter: json!({"_id": "{{params.id}}"}) },
            timeout_ms: None,
        }
    }

    #[tokio::test]
    async fn template_is_rendered_before_dispatch() {
        let executor = ProcedureExecutor::new(
            FakeDb { find_one_calls: Arc::new(AtomicUsize::new(0)), fail_first_n: 0 },
            FakeHttp,
            NoopHooks,
            ExecutorConfig::default(),
        );
        let desc = descriptor(vec![find_one_step("fetch")], ErrorHandling::Ignore);
        let ctx = ExecutionContext::new(json!({"id": "abc"}), json!({}), json!({}), "2026-07-27T00:00:00Z".into());
        let output = executor.execute(&desc, ctx).await.unwrap();
        match output {
            ProcedureOutput::StepMap(map) => assert_eq!(map["fetch"]["_id"], json!("abc")),
            _ => panic!("expected step map output"),
        }
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let executor = ProcedureExecutor::new(
            FakeDb { find_one_calls: Arc::new(AtomicUsize::new(0)), fail_first_n: 2 },
            FakeHttp,
            NoopHooks,
            ExecutorConfig { default_step_timeout_ms: 1000, retry_backoff_ms: 1 },
        );
        let desc = descriptor(vec![find_one_step("fetch")], ErrorHandling::Retry { retry_count: 3 });
        let ctx = ExecutionContext::new(json!({"id": "abc"}), json!({}), json!({}), "t".into());
        assert!(executor.execute(&desc, ctx).await.is_ok());
    }

    #[tokio::test]
    async fn ignore_strategy_surfaces_the_error() {
        let executor = ProcedureExecutor::new(
            FakeDb { find_one_calls: Arc::new(AtomicUsize::new(0)), fail_first_n: 99 },
            FakeHttp,
            NoopHooks,
            ExecutorConfig { default_step_timeout_ms: 1000, retry_backoff_ms: 1 },
        );
        let desc = descriptor(vec![find_one_step("fetch")], ErrorHandling::Ignore);
        let ctx = ExecutionContext::new(json!({"id": "abc"}), json!({}), json!({}), "t".into());
        let err = executor.execute(&desc, ctx).await.unwrap_err();
        assert_eq!(err.kind().as_str(), "procedureStep");
    }

    fn transform_step(id: &str, value: serde_json::Value) -> Step {
        Step { id: id.into(), kind: StepKind::Transform { template: value }, timeout_ms: None }
    }

    fn gate_step(expression: &str, then_step: &str, else_step: &str) -> Step {
        Step {
            id: "gate".into(),
            kind: StepKind::Condition {
                expression: expression.into(),
                then_step: Some(then_step.into()),
                else_step: Some(else_step.into()),
            },
            timeout_ms: None,
        }
    }

    #[tokio::test]
    async fn condition_step_jumps_to_the_matched_branch_and_skips_the_other() {
        let executor = ProcedureExecutor::new(
            FakeDb { find_one_calls: Arc::new(AtomicUsize::new(0)), fail_first_n: 0 },
            FakeHttp,
            NoopHooks,
            ExecutorConfig::default(),
        );
        let desc = descriptor(
            vec![
                gate_step("params.age >= 18", "adult", "minor"),
                transform_step("minor", json!("needs a guardian")),
                transform_step("adult", json!("granted")),
            ],
            ErrorHandling::Ignore,
        );
        let ctx = ExecutionContext::new(json!({"age": 21}), json!({}), json!({}), "t".into());
        let output = executor.execute(&desc, ctx).await.unwrap();
        match output {
            ProcedureOutput::StepMap(map) => {
                assert_eq!(map["gate"]["branch"], json!("adult"));
                assert_eq!(map["adult"], json!("granted"));
                assert!(!map.contains_key("minor"), "the untaken branch must not have run");
            }
            _ => panic!("expected step map output"),
        }
    }

    #[tokio::test]
    async fn condition_step_without_a_matching_step_id_errors() {
        let executor = ProcedureExecutor::new(
            FakeDb { find_one_calls: Arc::new(AtomicUsize::new(0)), fail_first_n: 0 },
            FakeHttp,
            NoopHooks,
            ExecutorConfig::default(),
        );
        let desc = descriptor(vec![gate_step("params.age >= 18", "adult", "minor")], ErrorHandling::Ignore);
        let ctx = ExecutionContext::new(json!({"age": 21}), json!({}), json!({}), "t".into());
        let err = executor.execute(&desc, ctx).await.unwrap_err();
        assert_eq!(err.kind().as_str(), "procedureStep");
    }
}
