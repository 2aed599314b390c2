use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type SealboxResult<T> = Result<T, SealboxError>;

#[derive(Debug, Error)]
pub enum SealboxError {
    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Failure(#[from] Failure),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Classification of a failed attempt, shared by both workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Missing password, file, or token. Never reaches a collaborator.
    Validation,
    /// Codec-internal failure while sealing a payload
    EncryptionFailure,
    /// Envelope failed structural parsing (magic, length, encoding)
    MalformedEnvelope,
    /// Bad padding, empty output, or tag mismatch. The only wrong-password signal.
    WrongPasswordOrCorruptData,
    /// The share service refused to resolve the token (expired, exhausted, unknown)
    AccessDenied,
    /// The blob could not be retrieved from its transfer location
    TransferFailure,
    /// Any other upstream failure; message is passed through verbatim
    CollaboratorError,
    /// A local worker stopped before producing a result
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Validation => "validation",
            FailureKind::EncryptionFailure => "encryption_failure",
            FailureKind::MalformedEnvelope => "malformed_envelope",
            FailureKind::WrongPasswordOrCorruptData => "wrong_password_or_corrupt_data",
            FailureKind::AccessDenied => "access_denied",
            FailureKind::TransferFailure => "transfer_failure",
            FailureKind::CollaboratorError => "collaborator_error",
            FailureKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A terminal failure for one attempt: a kind plus a short human-readable message.
///
/// Stored inside workflow `Error` states, so it is `Clone` and serializable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Validation, message)
    }

    pub fn access_denied(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::AccessDenied, reason)
    }

    pub fn transfer(message: impl Into<String>) -> Self {
        Self::new(FailureKind::TransferFailure, message)
    }

    pub fn collaborator(message: impl Into<String>) -> Self {
        Self::new(FailureKind::CollaboratorError, message)
    }

    pub fn wrong_password() -> Self {
        Self::new(
            FailureKind::WrongPasswordOrCorruptData,
            "wrong password or corrupt data",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_display_is_message_only() {
        let f = Failure::access_denied("Link Expired");
        assert_eq!(f.to_string(), "Link Expired");
        assert_eq!(f.kind, FailureKind::AccessDenied);
    }

    #[test]
    fn test_failure_serializes_kind_snake_case() {
        let f = Failure::wrong_password();
        let json = serde_json::to_string(&f).unwrap();
        assert!(json.contains("\"wrong_password_or_corrupt_data\""), "{json}");
        let back: Failure = serde_json::from_str(&json).unwrap();
        assert_eq!(back, f);
    }
}
