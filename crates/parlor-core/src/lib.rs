//! parlor Core - Shared types for the parlor chat daemon
//!
//! This crate provides the domain values shared between the wire
//! protocol (parlor-protocol) and the daemon (parlord): participant
//! identity, display names and the name sanitizer.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod name;
pub mod participant;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use name::{sanitize_name, DISALLOWED_NAME_CHARS};
pub use participant::{DisplayName, ParticipantId};
