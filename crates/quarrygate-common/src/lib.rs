//! Shared error types and HTTP primitives used by every quarrygate crate.

pub mod error;
pub mod http;

pub use error::{ErrorKind, GatewayError, Result};
pub use http::{HttpMethod, HttpStatus};
