//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Nothing usable was left after sanitizing a requested display name.
    #[error("Display name {raw:?} is empty after sanitizing")]
    EmptyDisplayName { raw: String },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
