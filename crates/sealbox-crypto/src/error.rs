use thiserror::Error;

/// Envelope codec failures.
///
/// Messages never say which part of the input was wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(&'static str),

    #[error("wrong password or corrupt data")]
    WrongPasswordOrCorruptData,

    #[error("encryption failed: {0}")]
    EncryptionFailure(String),
}
