//! Shared error type across netseg crates.

use thiserror::Error;

/// Caller-facing error codes (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Reference to a missing tenant/network/group/policy/rule/endpoint.
    NotFound,
    /// Identifier reused within its scope.
    DuplicateId,
    /// Malformed or contradictory input.
    Validation,
    /// Delete of an entity still referenced elsewhere.
    ReferentialIntegrity,
    /// Unsupported config version.
    UnsupportedVersion,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    /// String representation used in API responses and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::DuplicateId => "DUPLICATE_ID",
            ErrorCode::Validation => "VALIDATION",
            ErrorCode::ReferentialIntegrity => "REFERENTIAL_INTEGRITY",
            ErrorCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, NetSegError>;

/// Unified error type used by core and engine.
#[derive(Debug, Error)]
pub enum NetSegError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("duplicate id: {0}")]
    DuplicateId(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("still referenced: {0}")]
    ReferentialIntegrity(String),
    #[error("unsupported config version")]
    UnsupportedVersion,
    #[error("internal: {0}")]
    Internal(String),
}

impl NetSegError {
    /// Map an error to its stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            NetSegError::NotFound(_) => ErrorCode::NotFound,
            NetSegError::DuplicateId(_) => ErrorCode::DuplicateId,
            NetSegError::Validation(_) => ErrorCode::Validation,
            NetSegError::ReferentialIntegrity(_) => ErrorCode::ReferentialIntegrity,
            NetSegError::UnsupportedVersion => ErrorCode::UnsupportedVersion,
            NetSegError::Internal(_) => ErrorCode::Internal,
        }
    }
}
