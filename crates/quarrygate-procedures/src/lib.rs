//! Procedure executor: runs a `ProcedureDescriptor`'s steps against a
//! host-provided database/HTTP/hook surface, with typed template
//! interpolation and a bounded condition grammar.

pub mod condition;
pub mod context;
pub mod executor;
pub mod template;

pub use context::{ExecutionContext, StepRecord};
pub use executor::{DatabaseExecutor, ExecutorConfig, HookRegistry, HttpClient, NoopHooks, ProcedureExecutor, ProcedureOutput};
pub use template::{render_string, render_tree, TemplatePath};
