//! Error types for the moderation scheduler
//!
//! Every public scheduler operation reports failures through [`ModerationError`],
//! and each variant carries a stable, machine-checkable reason code.

use thiserror::Error;

/// Errors that can occur during moderation operations
#[derive(Debug, Error)]
pub enum ModerationError {
    /// No active restriction or counter exists for the subject
    #[error("Not found: {0}")]
    NotFound(String),

    /// The subject already carries an active restriction of the same kind
    #[error("Already restricted: {0}")]
    AlreadyRestricted(String),

    /// The external membership service rejected or failed the call
    #[error("External action failed: {0}")]
    ExternalActionFailed(String),

    /// Reading or writing persisted state failed
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// A persisted collection could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    /// Generic error
    #[error("Moderation error: {0}")]
    Other(String),
}

impl ModerationError {
    /// Stable reason code for callers that branch on the failure kind
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::AlreadyRestricted(_) => "already_restricted",
            Self::ExternalActionFailed(_) => "external_action_failed",
            Self::Storage(_) => "storage",
            Self::Serialization(_) => "serialization",
            Self::Other(_) => "other",
        }
    }

    /// Whether a later attempt of the same call could succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ExternalActionFailed(_))
    }
}

impl From<poise::serenity_prelude::Error> for ModerationError {
    fn from(error: poise::serenity_prelude::Error) -> Self {
        Self::ExternalActionFailed(error.to_string())
    }
}

/// Convert a string into a `ModerationError`
impl From<String> for ModerationError {
    fn from(message: String) -> Self {
        Self::Other(message)
    }
}

/// Result type for moderation operations
pub type ModerationResult<T> = Result<T, ModerationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ModerationError::NotFound("mute 42 in 7".to_string());
        assert_eq!(error.to_string(), "Not found: mute 42 in 7");

        let error = ModerationError::AlreadyRestricted("42".to_string());
        assert_eq!(error.to_string(), "Already restricted: 42");

        let error = ModerationError::from("Something went wrong".to_string());
        assert_eq!(error.to_string(), "Moderation error: Something went wrong");
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(ModerationError::NotFound(String::new()).reason(), "not_found");
        assert_eq!(
            ModerationError::AlreadyRestricted(String::new()).reason(),
            "already_restricted"
        );
        assert_eq!(
            ModerationError::ExternalActionFailed(String::new()).reason(),
            "external_action_failed"
        );
        let io = std::io::Error::other("disk full");
        assert_eq!(ModerationError::from(io).reason(), "storage");
    }

    #[test]
    fn test_only_external_failures_are_transient() {
        assert!(ModerationError::ExternalActionFailed("timeout".into()).is_transient());
        assert!(!ModerationError::NotFound("x".into()).is_transient());
        assert!(!ModerationError::AlreadyRestricted("x".into()).is_transient());
    }
}
