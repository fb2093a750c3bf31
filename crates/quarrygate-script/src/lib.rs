//! Shell script grammar parser: `db.<collection>.<operation>(<args>)`.
//!
//! A convenience surface over the same read/write operations the CRUD
//! routes and pipeline builder expose, tolerant of the informality of
//! a hand-typed script (unquoted keys, trailing commas) while still
//! rejecting operators that would let a caller run arbitrary code.

mod jsonish;
mod parser;

pub use parser::{into_pipeline_shape, parse_script, ParsedScript, ScriptMeta};
