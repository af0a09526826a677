//! Error types for the Grove engine.

use crate::{RecordId, TypeName};
use thiserror::Error;

/// Broad category of an [`Error`].
///
/// Embedders usually map these onto their own status codes; the variants
/// of [`Error`] carry the detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The schema is malformed or was changed after it froze.
    Configuration,
    /// A referenced record does not exist.
    NotFound,
    /// The operation is not allowed on an existing record.
    UnsupportedOperation,
    /// The engine was misused or found its own state inconsistent.
    Internal,
    /// A record does not match its type's schema.
    InvalidRecord,
    /// A backing key-value store failed.
    Backend,
}

/// All possible errors from the Grove engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    // Schema errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("cyclic reference: {cycle}")]
    CyclicReference { cycle: String },

    #[error("multiple root types: {}", .0.join(", "))]
    MultipleRoots(Vec<TypeName>),

    #[error("type registry is frozen, cannot define type '{0}'")]
    RegistryFrozen(TypeName),

    // Lookup errors
    #[error("{type_name} not found: {id}")]
    NotFound { type_name: TypeName, id: RecordId },

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    // Engine errors
    #[error("type not defined: {0}")]
    TypeNotDefined(TypeName),

    #[error("query on '{0}' requires an index")]
    IndexRequired(TypeName),

    #[error("index inconsistency: {0}")]
    Inconsistent(String),

    #[error("corrupt document {key}: {reason}")]
    CorruptDocument { key: String, reason: String },

    // Record validation errors
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("unknown field '{field}' on type '{type_name}'")]
    UnknownField { type_name: TypeName, field: String },

    // Backend errors
    #[error("backend error: {0}")]
    Backend(String),
}

impl Error {
    /// The category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_)
            | Error::CyclicReference { .. }
            | Error::MultipleRoots(_)
            | Error::RegistryFrozen(_) => ErrorKind::Configuration,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::UnsupportedOperation(_) => ErrorKind::UnsupportedOperation,
            Error::TypeNotDefined(_)
            | Error::IndexRequired(_)
            | Error::Inconsistent(_)
            | Error::CorruptDocument { .. } => ErrorKind::Internal,
            Error::InvalidRecord(_)
            | Error::MissingRequiredField(_)
            | Error::TypeMismatch { .. }
            | Error::UnknownField { .. } => ErrorKind::InvalidRecord,
            Error::Backend(_) => ErrorKind::Backend,
        }
    }

    pub(crate) fn not_found(type_name: &str, id: &str) -> Self {
        Error::NotFound {
            type_name: type_name.to_string(),
            id: id.to_string(),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::TypeNotDefined("users".into());
        assert_eq!(err.to_string(), "type not defined: users");

        let err = Error::MultipleRoots(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "multiple root types: a, b");

        let err = Error::not_found("child", "c-1");
        assert_eq!(err.to_string(), "child not found: c-1");

        let err = Error::TypeMismatch {
            field: "age".into(),
            expected: "number".into(),
            got: "string".into(),
        };
        assert_eq!(
            err.to_string(),
            "type mismatch for field 'age': expected number, got string"
        );
    }

    #[test]
    fn error_kinds() {
        assert_eq!(
            Error::CyclicReference { cycle: "a -> b -> a".into() }.kind(),
            ErrorKind::Configuration
        );
        assert_eq!(Error::RegistryFrozen("a".into()).kind(), ErrorKind::Configuration);
        assert_eq!(Error::not_found("a", "1").kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::UnsupportedOperation("x".into()).kind(),
            ErrorKind::UnsupportedOperation
        );
        assert_eq!(Error::IndexRequired("a".into()).kind(), ErrorKind::Internal);
        assert_eq!(
            Error::MissingRequiredField("name".into()).kind(),
            ErrorKind::InvalidRecord
        );
        assert_eq!(Error::Backend("io".into()).kind(), ErrorKind::Backend);
    }
}
