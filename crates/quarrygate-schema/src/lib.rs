//! Schema descriptors and the registry that loads, validates, and
//! serves them.

pub mod collection;
pub mod meta_validate;
pub mod procedure;
pub mod registry;
pub mod relationship;

pub use collection::{CollectionDescriptor, HookBindings, IndexDescriptor, Operation, RateLimitPolicy};
pub use procedure::{DocumentSchema, ErrorHandling, ProcedureDescriptor, ProcedureHooks, Step, StepKind};
pub use registry::{IncomingRelationship, SchemaRegistry};
pub use relationship::{RelationshipCommon, RelationshipDescriptor, RelationshipPagination};
