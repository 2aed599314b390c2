//! Envelope work on tokio's blocking pool

use sealbox_core::{Failure, FailureKind};
use sealbox_crypto::{EnvelopeError, EnvelopeOptions};
use secrecy::SecretString;
use tokio::task;

pub(crate) fn envelope_failure(err: EnvelopeError) -> Failure {
    let kind = match err {
        EnvelopeError::Malformed(_) => FailureKind::MalformedEnvelope,
        EnvelopeError::WrongPasswordOrCorruptData => FailureKind::WrongPasswordOrCorruptData,
        EnvelopeError::EncryptionFailure(_) => FailureKind::EncryptionFailure,
    };
    Failure::new(kind, err.to_string())
}

fn join_failure(err: task::JoinError) -> Failure {
    Failure::new(FailureKind::Internal, format!("crypto worker stopped: {err}"))
}

pub(crate) async fn seal(
    plaintext: Vec<u8>,
    password: SecretString,
    options: EnvelopeOptions,
) -> Result<Vec<u8>, Failure> {
    task::spawn_blocking(move || sealbox_crypto::encrypt_with(&plaintext, &password, &options))
        .await
        .map_err(join_failure)?
        .map_err(envelope_failure)
}

pub(crate) async fn open(envelope: Vec<u8>, password: SecretString) -> Result<Vec<u8>, Failure> {
    task::spawn_blocking(move || sealbox_crypto::decrypt(&envelope, &password))
        .await
        .map_err(join_failure)?
        .map_err(envelope_failure)
}
