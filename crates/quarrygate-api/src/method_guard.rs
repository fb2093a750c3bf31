//! Method/operation inference and the strict-mode allowlist.

use quarrygate_common::{GatewayError, HttpMethod};
use quarrygate_schema::Operation;
use serde_json::Value;

/// The shape of a `/crud/:collection[...]` path, inferred from the
/// method and whether an id/sub-path is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathShape {
    Collection,
    CollectionWithId,
    Aggregate,
}

/// Infers the intended database operation from method + path shape.
/// `body_is_array` only matters for `POST /crud/:collection`, which
/// is `insertMany` for an array body and `insertOne` otherwise.
pub fn infer_operation(method: HttpMethod, shape: PathShape, body_is_array: bool) -> Result<Operation, GatewayError> {
    use HttpMethod::*;
    use PathShape::*;
    match (method, shape) {
        (Get, Collection) => Ok(Operation::Find),
        (Get, CollectionWithId) => Ok(Operation::FindOne),
        (Get, Aggregate) => Ok(Operation::Aggregate),
        (Post, Collection) => Ok(if body_is_array { Operation::InsertMany } else { Operation::InsertOne }),
        (Post, Aggregate) => Ok(Operation::Aggregate),
        (Put, CollectionWithId) => Ok(Operation::ReplaceOne),
        (Patch, CollectionWithId) => Ok(Operation::UpdateOne),
        (Delete, CollectionWithId) => Ok(Operation::DeleteOne),
        (method, shape) => Err(GatewayError::MethodOperationMismatch {
            message: format!("no operation is defined for {method} against this path shape ({shape:?})"),
            suggestion: None,
        }),
    }
}

/// The method → allowed-operations table, checked only when
/// `strictMethods` is on.
fn allowed_operations(method: HttpMethod) -> &'static [Operation] {
    use HttpMethod::*;
    use Operation::*;
    match method {
        Get => &[Find, FindOne, CountDocuments, Distinct, Aggregate, Explain],
        Post => &[InsertOne, InsertMany, Aggregate],
        Put => &[ReplaceOne, UpdateOne],
        Patch => &[UpdateOne, UpdateMany],
        Delete => &[DeleteOne, DeleteMany],
        _ => &[],
    }
}

/// The method that would have allowed `operation`, used to build the
/// `suggestion` field on a strict-mode rejection.
fn method_suggesting(operation: Operation) -> Option<HttpMethod> {
    [HttpMethod::Get, HttpMethod::Post, HttpMethod::Put, HttpMethod::Patch, HttpMethod::Delete]
        .into_iter()
        .find(|m| allowed_operations(*m).contains(&operation))
}

/// Rejects `operation` under `method` when strict mode is on and the
/// operation is not in that method's allowlist.
pub fn enforce_strict_mode(method: HttpMethod, operation: Operation, strict: bool) -> Result<(), GatewayError> {
    if !strict || allowed_operations(method).contains(&operation) {
        return Ok(());
    }
    Err(GatewayError::MethodOperationMismatch {
        message: format!("{method} does not permit '{}' under strict method checking", operation.as_str()),
        suggestion: method_suggesting(operation).map(|m| m.to_string()),
    })
}

pub fn body_is_array(body: &Value) -> bool {
    body.is_array()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_update_one_is_rejected_suggesting_patch() {
        let err = enforce_strict_mode(HttpMethod::Put, Operation::UpdateOne, true).unwrap_err();
        assert_eq!(err.kind().as_str(), "methodOperationMismatch");
        match err {
            GatewayError::MethodOperationMismatch { suggestion, .. } => {
                assert_eq!(suggestion, Some("PATCH".to_string()));
            }
            _ => panic!("expected MethodOperationMismatch"),
        }
    }

    #[test]
    fn non_strict_mode_allows_anything() {
        assert!(enforce_strict_mode(HttpMethod::Put, Operation::UpdateOne, false).is_ok());
    }

    #[test]
    fn post_with_array_body_infers_insert_many() {
        let op = infer_operation(HttpMethod::Post, PathShape::Collection, true).unwrap();
        assert_eq!(op, Operation::InsertMany);
        let op = infer_operation(HttpMethod::Post, PathShape::Collection, false).unwrap();
        assert_eq!(op, Operation::InsertOne);
    }

    #[test]
    fn get_aggregate_is_read_only_shape() {
        assert_eq!(infer_operation(HttpMethod::Get, PathShape::Aggregate, false).unwrap(), Operation::Aggregate);
    }
}
