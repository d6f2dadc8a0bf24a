//! Domain errors

use thiserror::Error;

/// Domain result type
pub type Result<T> = std::result::Result<T, DomainError>;

/// Error taxonomy shared by every operation of the service.
///
/// `Unauthenticated` and `Forbidden` together form the authorization kind:
/// the first for a missing or unverifiable bearer credential, the second for
/// a verified caller who is not allowed to act on the requested call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DomainError {
    /// Stable machine-readable code used in API envelopes
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "VALIDATION_ERROR",
            DomainError::NotFound(_) => "NOT_FOUND",
            DomainError::Conflict(_) => "CONFLICT",
            DomainError::Unauthenticated(_) => "UNAUTHENTICATED",
            DomainError::Forbidden(_) => "FORBIDDEN",
            DomainError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            DomainError::Configuration(_) => "CONFIGURATION_ERROR",
            DomainError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Errors whose message may carry diagnostic detail
    pub fn is_sensitive(&self) -> bool {
        matches!(self, DomainError::Configuration(_) | DomainError::Internal(_))
    }
}
