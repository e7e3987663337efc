//! Participant identity and display names.

use std::fmt;

use tracing::debug;

use crate::error::{DomainError, DomainResult};
use crate::name::sanitize_name;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Unique identifier for a connected participant.
///
/// Assigned by the session registry at join time from a monotonically
/// increasing counter. An id is never handed out twice during a registry's
/// lifetime, so it stays unique among connected participants even after
/// others leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParticipantId(u64);

impl ParticipantId {
    /// Creates a participant id from its raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ParticipantId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

// ============================================================================
// Display Name
// ============================================================================

/// A sanitized, non-empty display name.
///
/// The only way to build one is [`DisplayName::parse`], which runs the
/// name sanitizer, so every `DisplayName` is free of the characters in
/// [`DISALLOWED_NAME_CHARS`](crate::DISALLOWED_NAME_CHARS). Names are not
/// unique: only [`ParticipantId`] identifies a participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DisplayName(String);

impl DisplayName {
    /// Sanitizes a requested name.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::EmptyDisplayName` when nothing usable is left
    /// after sanitizing; the caller should prompt again.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let sanitized = sanitize_name(raw);
        if sanitized.is_empty() {
            return Err(DomainError::EmptyDisplayName {
                raw: raw.to_string(),
            });
        }

        if sanitized.len() != raw.len() {
            debug!(requested = ?raw, sanitized = %sanitized, "Display name sanitized");
        }

        Ok(Self(sanitized))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DisplayName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for DisplayName {
    type Error = DomainError;

    fn try_from(raw: &str) -> DomainResult<Self> {
        Self::parse(raw)
    }
}
