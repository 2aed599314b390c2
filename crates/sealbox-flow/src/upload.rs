//! Upload workflow
//!
//! ```text
//! Idle ──Submit──▶ Encrypting ──Encrypted──▶ Uploading ──Uploaded──▶ Success
//!   │                  │                         │
//!   └─Submit (plain)───┼────────────────────────▶┤
//!                      └─EncryptFailed─▶ Error ◀─┘ UploadFailed
//! Error ──Reset──▶ Idle        Error ──Submit──▶ (as from Idle)
//! ```

use std::sync::Arc;

use chrono::NaiveDateTime;
use sealbox_client::{build_share_link, ShareService};
use sealbox_core::{
    encrypted_filename, Failure, FailureKind, SharePolicy, ShareReceipt, ShareToken,
    UploadPayload, ENCRYPTED_SUFFIX,
};
use sealbox_crypto::EnvelopeOptions;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::compute;
use crate::error::{FlowError, ValidationError};
use crate::rollback::Rollback;
use crate::TransitionObserver;

/// What the sender wants to share
pub struct UploadRequest {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub policy: SharePolicy,
    /// `None` uploads the file as-is
    pub password: Option<SecretString>,
    pub envelope: EnvelopeOptions,
    pub encrypted_suffix: String,
}

impl UploadRequest {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>, policy: SharePolicy) -> Self {
        Self {
            filename: filename.into(),
            bytes,
            policy,
            password: None,
            envelope: EnvelopeOptions::default(),
            encrypted_suffix: ENCRYPTED_SUFFIX.into(),
        }
    }

    pub fn with_password(mut self, password: SecretString) -> Self {
        self.password = Some(password);
        self
    }

    pub fn with_envelope(mut self, options: EnvelopeOptions) -> Self {
        self.envelope = options;
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.encrypted_suffix = suffix.into();
        self
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.filename.trim().is_empty() {
            return Err(ValidationError::MissingFile);
        }
        if self.bytes.is_empty() {
            return Err(ValidationError::EmptyFile);
        }
        if let Some(pw) = &self.password {
            if pw.expose_secret().is_empty() {
                return Err(ValidationError::EmptyPassword);
            }
        }
        self.policy
            .validate()
            .map_err(|f| ValidationError::Policy(f.message))
    }
}

impl std::fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadRequest")
            .field("filename", &self.filename)
            .field("bytes", &format_args!("[{} bytes]", self.bytes.len()))
            .field("policy", &self.policy)
            .field("encrypted", &self.password.is_some())
            .field("envelope", &self.envelope)
            .finish()
    }
}

/// Result of a completed upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub token: ShareToken,
    pub expires_at: Option<NaiveDateTime>,
    /// Name the blob was stored under
    pub filename: String,
    pub encrypted: bool,
    pub share_link: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UploadState {
    #[default]
    Idle,
    Encrypting {
        upload_name: String,
        policy: SharePolicy,
    },
    Uploading {
        upload_name: String,
        encrypted: bool,
    },
    Success(UploadOutcome),
    Error(Failure),
}

impl UploadState {
    pub fn name(&self) -> &'static str {
        match self {
            UploadState::Idle => "idle",
            UploadState::Encrypting { .. } => "encrypting",
            UploadState::Uploading { .. } => "uploading",
            UploadState::Success(_) => "success",
            UploadState::Error(_) => "error",
        }
    }

    /// True while a command is outstanding
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            UploadState::Encrypting { .. } | UploadState::Uploading { .. }
        )
    }
}

#[derive(Debug)]
pub enum UploadEvent {
    Submit(UploadRequest),
    Encrypted(Vec<u8>),
    EncryptFailed(String),
    Uploaded {
        receipt: ShareReceipt,
        share_link: Option<String>,
    },
    UploadFailed(Failure),
    Reset,
}

impl UploadEvent {
    pub fn name(&self) -> &'static str {
        match self {
            UploadEvent::Submit(_) => "submit",
            UploadEvent::Encrypted(_) => "encrypted",
            UploadEvent::EncryptFailed(_) => "encrypt_failed",
            UploadEvent::Uploaded { .. } => "uploaded",
            UploadEvent::UploadFailed(_) => "upload_failed",
            UploadEvent::Reset => "reset",
        }
    }
}

/// Work the driver must perform after a transition
pub enum UploadCommand {
    Encrypt {
        plaintext: Vec<u8>,
        password: SecretString,
        options: EnvelopeOptions,
    },
    Upload(UploadPayload),
}

impl std::fmt::Debug for UploadCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadCommand::Encrypt {
                plaintext, options, ..
            } => f
                .debug_struct("Encrypt")
                .field("plaintext", &format_args!("[{} bytes]", plaintext.len()))
                .field("options", options)
                .finish(),
            UploadCommand::Upload(payload) => f.debug_tuple("Upload").field(payload).finish(),
        }
    }
}

/// Pure upload state machine.
///
/// Validation failures and unexpected events return `Err` and leave the caller's
/// state untouched; they never emit a command.
pub fn transition(
    state: &UploadState,
    event: UploadEvent,
) -> Result<(UploadState, Option<UploadCommand>), FlowError> {
    use UploadEvent as E;
    use UploadState as S;

    match (state, event) {
        (S::Idle | S::Error(_), E::Submit(request)) => {
            request.validate()?;
            let UploadRequest {
                filename,
                bytes,
                policy,
                password,
                envelope,
                encrypted_suffix,
            } = request;

            match password {
                Some(password) => Ok((
                    S::Encrypting {
                        upload_name: encrypted_filename(&filename, &encrypted_suffix),
                        policy,
                    },
                    Some(UploadCommand::Encrypt {
                        plaintext: bytes,
                        password,
                        options: envelope,
                    }),
                )),
                None => Ok((
                    S::Uploading {
                        upload_name: filename.clone(),
                        encrypted: false,
                    },
                    Some(UploadCommand::Upload(UploadPayload {
                        bytes,
                        filename,
                        policy,
                    })),
                )),
            }
        }

        (
            S::Encrypting {
                upload_name,
                policy,
            },
            E::Encrypted(envelope),
        ) => Ok((
            S::Uploading {
                upload_name: upload_name.clone(),
                encrypted: true,
            },
            Some(UploadCommand::Upload(UploadPayload {
                bytes: envelope,
                filename: upload_name.clone(),
                policy: policy.clone(),
            })),
        )),

        (S::Encrypting { .. }, E::EncryptFailed(message)) => Ok((
            S::Error(Failure::new(FailureKind::EncryptionFailure, message)),
            None,
        )),

        (
            S::Uploading {
                upload_name,
                encrypted,
            },
            E::Uploaded {
                receipt,
                share_link,
            },
        ) => Ok((
            S::Success(UploadOutcome {
                token: receipt.token,
                expires_at: receipt.expires_at,
                filename: upload_name.clone(),
                encrypted: *encrypted,
                share_link,
            }),
            None,
        )),

        (S::Uploading { .. }, E::UploadFailed(failure)) => Ok((S::Error(failure), None)),

        (S::Error(_), E::Reset) => Ok((S::Idle, None)),

        (state, event) => Err(FlowError::InvalidTransition {
            state: state.name(),
            event: event.name(),
        }),
    }
}

struct LinkSettings {
    origin: String,
    param: String,
}

/// Async driver for the upload workflow
pub struct UploadFlow<S: ?Sized> {
    service: Arc<S>,
    state: UploadState,
    observer: Option<TransitionObserver<UploadState>>,
    links: Option<LinkSettings>,
}

impl<S: ShareService + ?Sized> UploadFlow<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self {
            service,
            state: UploadState::Idle,
            observer: None,
            links: None,
        }
    }

    pub fn with_observer(mut self, observer: impl Fn(&UploadState) + Send + Sync + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Attach a share link (`{origin}?{param}={token}`) to successful outcomes.
    pub fn with_share_links(mut self, origin: impl Into<String>, param: impl Into<String>) -> Self {
        self.links = Some(LinkSettings {
            origin: origin.into(),
            param: param.into(),
        });
        self
    }

    pub fn state(&self) -> &UploadState {
        &self.state
    }

    /// Run one upload attempt to completion.
    ///
    /// Dropping the returned future before it completes restores the state
    /// held before the call.
    pub async fn submit(&mut self, request: UploadRequest) -> Result<UploadOutcome, FlowError> {
        let observer = &self.observer;
        let notify = |state: &UploadState| {
            if let Some(observe) = observer {
                observe(state);
            }
        };

        let mut state = Rollback::new(&mut self.state);
        let (next, mut command) = transition(state.get(), UploadEvent::Submit(request))?;
        state.set(next);
        notify(state.get());

        while let Some(cmd) = command.take() {
            debug!(command = ?cmd, "upload command");
            let event = match cmd {
                UploadCommand::Encrypt {
                    plaintext,
                    password,
                    options,
                } => match compute::seal(plaintext, password, options).await {
                    Ok(envelope) => UploadEvent::Encrypted(envelope),
                    Err(failure) => UploadEvent::EncryptFailed(failure.message),
                },
                UploadCommand::Upload(payload) => {
                    match self.service.submit_upload(payload).await {
                        Ok(receipt) => {
                            let share_link = self.links.as_ref().and_then(|links| {
                                build_share_link(&links.origin, &links.param, &receipt.token)
                                    .map_err(|e| warn!("cannot build share link: {e:#}"))
                                    .ok()
                            });
                            UploadEvent::Uploaded {
                                receipt,
                                share_link,
                            }
                        }
                        Err(e) => UploadEvent::UploadFailed(e.into()),
                    }
                }
            };

            let (next, follow_up) = transition(state.get(), event)?;
            state.set(next);
            notify(state.get());
            command = follow_up;
        }

        let outcome = match state.get() {
            UploadState::Success(outcome) => {
                info!(token = %outcome.token, encrypted = outcome.encrypted, "upload complete");
                Ok(outcome.clone())
            }
            UploadState::Error(failure) => {
                warn!(kind = %failure.kind, "upload failed: {failure}");
                Err(FlowError::Failed(failure.clone()))
            }
            other => Err(FlowError::InvalidTransition {
                state: other.name(),
                event: "submit",
            }),
        };
        state.commit();
        outcome
    }

    /// Return to `Idle` after a failed attempt.
    pub fn reset(&mut self) -> Result<(), FlowError> {
        let (next, _) = transition(&self.state, UploadEvent::Reset)?;
        self.state = next;
        if let Some(observe) = &self.observer {
            observe(&self.state);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(bytes: &[u8]) -> UploadRequest {
        UploadRequest::new("notes.txt", bytes.to_vec(), SharePolicy::new(1, 60))
    }

    fn receipt() -> ShareReceipt {
        ShareReceipt {
            token: ShareToken::new("abc123"),
            expires_at: None,
        }
    }

    #[test]
    fn test_submit_encrypted_goes_to_encrypting() {
        let req = request(b"HELLO WRLD").with_password(SecretString::from("p@ss"));
        let (next, cmd) = transition(&UploadState::Idle, UploadEvent::Submit(req)).unwrap();

        assert_eq!(
            next,
            UploadState::Encrypting {
                upload_name: "notes.txt.enc".into(),
                policy: SharePolicy::new(1, 60),
            }
        );
        assert!(matches!(cmd, Some(UploadCommand::Encrypt { .. })));
    }

    #[test]
    fn test_submit_plain_skips_encryption() {
        let (next, cmd) = transition(&UploadState::Idle, UploadEvent::Submit(request(b"x"))).unwrap();
        assert_eq!(
            next,
            UploadState::Uploading {
                upload_name: "notes.txt".into(),
                encrypted: false,
            }
        );
        match cmd {
            Some(UploadCommand::Upload(payload)) => {
                assert_eq!(payload.bytes, b"x");
                assert_eq!(payload.filename, "notes.txt");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            (request(b""), ValidationError::EmptyFile),
            (
                UploadRequest::new("  ", b"x".to_vec(), SharePolicy::default()),
                ValidationError::MissingFile,
            ),
            (
                request(b"x").with_password(SecretString::from("")),
                ValidationError::EmptyPassword,
            ),
            (
                UploadRequest::new("a", b"x".to_vec(), SharePolicy::new(0, 60)),
                ValidationError::Policy("max views must be at least 1".into()),
            ),
        ];
        for (req, expected) in cases {
            let err = transition(&UploadState::Idle, UploadEvent::Submit(req)).unwrap_err();
            assert_eq!(err, FlowError::Validation(expected));
        }
    }

    #[test]
    fn test_encrypted_upload_uses_suffix() {
        let state = UploadState::Encrypting {
            upload_name: "a.pdf.sealed".into(),
            policy: SharePolicy::new(2, 5),
        };
        let (next, cmd) = transition(&state, UploadEvent::Encrypted(b"Salted__".to_vec())).unwrap();

        assert_eq!(
            next,
            UploadState::Uploading {
                upload_name: "a.pdf.sealed".into(),
                encrypted: true,
            }
        );
        let Some(UploadCommand::Upload(payload)) = cmd else {
            panic!("expected upload command");
        };
        assert_eq!(payload.filename, "a.pdf.sealed");
        assert_eq!(payload.policy.max_views, 2);
    }

    #[test]
    fn test_failures_pass_message_through() {
        let uploading = UploadState::Uploading {
            upload_name: "n".into(),
            encrypted: false,
        };
        let (next, _) = transition(
            &uploading,
            UploadEvent::UploadFailed(Failure::collaborator("storage quota exceeded")),
        )
        .unwrap();
        assert_eq!(
            next,
            UploadState::Error(Failure::collaborator("storage quota exceeded"))
        );

        let encrypting = UploadState::Encrypting {
            upload_name: "n".into(),
            policy: SharePolicy::default(),
        };
        let (next, _) = transition(&encrypting, UploadEvent::EncryptFailed("boom".into())).unwrap();
        assert_eq!(
            next,
            UploadState::Error(Failure::new(FailureKind::EncryptionFailure, "boom"))
        );
    }

    #[test]
    fn test_success_is_terminal() {
        let uploading = UploadState::Uploading {
            upload_name: "n".into(),
            encrypted: true,
        };
        let (success, _) = transition(
            &uploading,
            UploadEvent::Uploaded {
                receipt: receipt(),
                share_link: None,
            },
        )
        .unwrap();
        assert!(matches!(success, UploadState::Success(_)));

        for event in [UploadEvent::Reset, UploadEvent::Submit(request(b"x"))] {
            assert!(matches!(
                transition(&success, event),
                Err(FlowError::InvalidTransition { state: "success", .. })
            ));
        }
    }

    #[test]
    fn test_error_resets_and_resubmits() {
        let error = UploadState::Error(Failure::collaborator("x"));
        let (idle, cmd) = transition(&error, UploadEvent::Reset).unwrap();
        assert_eq!(idle, UploadState::Idle);
        assert!(cmd.is_none());

        let (next, _) = transition(&error, UploadEvent::Submit(request(b"x"))).unwrap();
        assert_eq!(next.name(), "uploading");
    }

    #[test]
    fn test_busy_states_reject_submit() {
        let busy = UploadState::Uploading {
            upload_name: "n".into(),
            encrypted: false,
        };
        assert!(busy.is_busy());
        assert_eq!(
            transition(&busy, UploadEvent::Submit(request(b"x"))).unwrap_err(),
            FlowError::InvalidTransition {
                state: "uploading",
                event: "submit",
            }
        );
    }

    #[test]
    fn test_state_serializes_with_tag() {
        let json = serde_json::to_string(&UploadState::Error(Failure::collaborator("x"))).unwrap();
        assert!(json.contains("\"state\":\"error\""), "{json}");
    }

    #[test]
    fn test_request_debug_hides_bytes() {
        let req = request(b"top secret").with_password(SecretString::from("pw"));
        let dbg = format!("{req:?}");
        assert!(!dbg.contains("top secret"));
        assert!(!dbg.contains("pw\""));
        assert!(dbg.contains("[10 bytes]"));
    }
}
