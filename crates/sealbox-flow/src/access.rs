//! Access workflow
//!
//! ```text
//! Idle ──SubmitToken──▶ Checking ──Resolved──▶ PendingPassword ──Unlock──▶ Downloading
//!                          │                                                 │
//!                          └─ResolveFailed─▶ Error ◀──DownloadFailed─────────┤
//!                                             ▲                              ▼ Downloaded
//!                                             └──DecryptFailed── Decrypting ─┴─▶ Success
//! ```
//!
//! Whether resolving a token charges a view is decided by [`AccessPolicy`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDateTime;
use sealbox_client::ShareService;
use sealbox_core::config::{AccessConfig, ShareConfig, ViewAccounting};
use sealbox_core::{
    strip_encrypted_suffix, Failure, ShareGrant, ShareMetadata, ShareToken, ENCRYPTED_SUFFIX,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::compute;
use crate::error::{FlowError, ValidationError};
use crate::rollback::Rollback;
use crate::TransitionObserver;

/// Reason reported when a peek shows no views left
const EXHAUSTED: &str = "Max views reached";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    pub view_accounting: ViewAccounting,
    pub encrypted_suffix: String,
}

impl AccessPolicy {
    pub fn from_config(access: &AccessConfig, share: &ShareConfig) -> Self {
        Self {
            view_accounting: access.view_accounting,
            encrypted_suffix: share.encrypted_suffix.clone(),
        }
    }

    fn consume_on_resolve(&self) -> bool {
        self.view_accounting == ViewAccounting::ConsumeOnResolve
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            view_accounting: ViewAccounting::default(),
            encrypted_suffix: ENCRYPTED_SUFFIX.into(),
        }
    }
}

/// A resolved share waiting for the recipient to unlock it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingShare {
    pub token: ShareToken,
    pub filename: String,
    pub views_left: u32,
    pub expires_at: Option<NaiveDateTime>,
    /// Present when the view was already charged at resolve time
    pub transfer_url: Option<String>,
}

/// Downloaded (and possibly decrypted) share contents
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockedFile {
    pub filename: String,
    #[serde(skip)]
    pub contents: Vec<u8>,
    pub size: usize,
    pub views_left: u32,
    pub decrypted: bool,
}

impl std::fmt::Debug for UnlockedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockedFile")
            .field("filename", &self.filename)
            .field("contents", &format_args!("[{} bytes]", self.contents.len()))
            .field("views_left", &self.views_left)
            .field("decrypted", &self.decrypted)
            .finish()
    }
}

impl UnlockedFile {
    /// Write the contents into `dir` under a sanitised name.
    ///
    /// Never overwrites: an existing file gets a ` (n)` suffix before the extension.
    pub fn save_into(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let name = sanitize_filename(&self.filename);
        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{ext}")),
            _ => (name.clone(), String::new()),
        };

        let mut candidate = dir.join(&name);
        let mut n = 0u32;
        loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
            {
                Ok(mut file) => {
                    std::io::Write::write_all(&mut file, &self.contents)?;
                    return Ok(candidate);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    n += 1;
                    candidate = dir.join(format!("{stem} ({n}){ext}"));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Reduce a service-supplied name to a single safe path component.
pub fn sanitize_filename(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let cleaned: String = last
        .chars()
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    match cleaned.trim_start_matches('.') {
        "" => "download".into(),
        _ => cleaned,
    }
}

/// Outcome of resolving a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Metadata only; no view charged
    Peeked(ShareMetadata),
    /// A view was charged and a transfer URL issued
    Granted(ShareGrant),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AccessState {
    #[default]
    Idle,
    Checking {
        token: ShareToken,
    },
    PendingPassword(PendingShare),
    Downloading {
        share: PendingShare,
        decrypt: bool,
    },
    Decrypting {
        share: PendingShare,
    },
    Success(UnlockedFile),
    Error(Failure),
}

impl AccessState {
    pub fn name(&self) -> &'static str {
        match self {
            AccessState::Idle => "idle",
            AccessState::Checking { .. } => "checking",
            AccessState::PendingPassword(_) => "pending_password",
            AccessState::Downloading { .. } => "downloading",
            AccessState::Decrypting { .. } => "decrypting",
            AccessState::Success(_) => "success",
            AccessState::Error(_) => "error",
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            AccessState::Checking { .. }
                | AccessState::Downloading { .. }
                | AccessState::Decrypting { .. }
        )
    }
}

#[derive(Debug)]
pub enum AccessEvent {
    SubmitToken(String),
    Resolved(Resolution),
    ResolveFailed(Failure),
    /// `decrypt` is false when the recipient supplied no password
    Unlock {
        decrypt: bool,
    },
    Downloaded {
        bytes: Vec<u8>,
        /// Updated count when the view was charged during the download
        views_left: Option<u32>,
    },
    DownloadFailed(Failure),
    Decrypted(Vec<u8>),
    DecryptFailed(Failure),
    Reset,
}

impl AccessEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AccessEvent::SubmitToken(_) => "submit_token",
            AccessEvent::Resolved(_) => "resolved",
            AccessEvent::ResolveFailed(_) => "resolve_failed",
            AccessEvent::Unlock { .. } => "unlock",
            AccessEvent::Downloaded { .. } => "downloaded",
            AccessEvent::DownloadFailed(_) => "download_failed",
            AccessEvent::Decrypted(_) => "decrypted",
            AccessEvent::DecryptFailed(_) => "decrypt_failed",
            AccessEvent::Reset => "reset",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessCommand {
    /// `consume` selects `consume_share` over `peek_share`
    Resolve { token: ShareToken, consume: bool },
    /// With `consume`, charge a view first; otherwise fetch `transfer_url` directly
    Download {
        token: ShareToken,
        transfer_url: Option<String>,
        consume: bool,
    },
    /// The driver supplies the password it holds
    Decrypt { envelope: Vec<u8> },
}

/// Pure access state machine.
pub fn transition(
    state: &AccessState,
    event: AccessEvent,
    policy: &AccessPolicy,
) -> Result<(AccessState, Option<AccessCommand>), FlowError> {
    use AccessEvent as E;
    use AccessState as S;

    match (state, event) {
        (S::Idle | S::Error(_), E::SubmitToken(raw)) => {
            let token = raw.trim();
            if token.is_empty() {
                return Err(ValidationError::EmptyToken.into());
            }
            let token = ShareToken::new(token);
            Ok((
                S::Checking {
                    token: token.clone(),
                },
                Some(AccessCommand::Resolve {
                    token,
                    consume: policy.consume_on_resolve(),
                }),
            ))
        }

        (S::Checking { token }, E::Resolved(resolution)) => {
            let pending = match resolution {
                Resolution::Peeked(meta) => {
                    if meta.views_left == 0 {
                        return Ok((S::Error(Failure::access_denied(EXHAUSTED)), None));
                    }
                    PendingShare {
                        token: token.clone(),
                        filename: meta.filename,
                        views_left: meta.views_left,
                        expires_at: meta.expires_at,
                        transfer_url: None,
                    }
                }
                Resolution::Granted(grant) => PendingShare {
                    token: token.clone(),
                    filename: grant.filename,
                    views_left: grant.views_left,
                    expires_at: None,
                    transfer_url: Some(grant.transfer_url),
                },
            };
            Ok((S::PendingPassword(pending), None))
        }

        (S::Checking { .. }, E::ResolveFailed(failure)) => Ok((S::Error(failure), None)),

        (S::PendingPassword(share), E::Unlock { decrypt }) => {
            let command = AccessCommand::Download {
                token: share.token.clone(),
                transfer_url: share.transfer_url.clone(),
                consume: share.transfer_url.is_none(),
            };
            Ok((
                S::Downloading {
                    share: share.clone(),
                    decrypt,
                },
                Some(command),
            ))
        }

        (S::Downloading { share, decrypt }, E::Downloaded { bytes, views_left }) => {
            let mut share = share.clone();
            if let Some(views_left) = views_left {
                share.views_left = views_left;
            }
            if *decrypt {
                Ok((
                    S::Decrypting { share },
                    Some(AccessCommand::Decrypt { envelope: bytes }),
                ))
            } else {
                Ok((
                    S::Success(UnlockedFile {
                        filename: share.filename,
                        size: bytes.len(),
                        contents: bytes,
                        views_left: share.views_left,
                        decrypted: false,
                    }),
                    None,
                ))
            }
        }

        (S::Downloading { .. }, E::DownloadFailed(failure)) => Ok((S::Error(failure), None)),

        (S::Decrypting { share }, E::Decrypted(plaintext)) => Ok((
            S::Success(UnlockedFile {
                filename: strip_encrypted_suffix(&share.filename, &policy.encrypted_suffix)
                    .to_string(),
                size: plaintext.len(),
                contents: plaintext,
                views_left: share.views_left,
                decrypted: true,
            }),
            None,
        )),

        (S::Decrypting { .. }, E::DecryptFailed(failure)) => Ok((S::Error(failure), None)),

        (S::PendingPassword(_) | S::Success(_) | S::Error(_), E::Reset) => Ok((S::Idle, None)),

        (state, event) => Err(FlowError::InvalidTransition {
            state: state.name(),
            event: event.name(),
        }),
    }
}

/// Async driver for the access workflow
pub struct AccessFlow<S: ?Sized> {
    service: Arc<S>,
    policy: AccessPolicy,
    owner: Option<String>,
    state: AccessState,
    observer: Option<TransitionObserver<AccessState>>,
}

impl<S: ShareService + ?Sized> AccessFlow<S> {
    pub fn new(service: Arc<S>, policy: AccessPolicy) -> Self {
        Self {
            service,
            policy,
            owner: None,
            state: AccessState::Idle,
            observer: None,
        }
    }

    /// Identify the recipient to the service (audit scoping only).
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_observer(mut self, observer: impl Fn(&AccessState) + Send + Sync + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn state(&self) -> &AccessState {
        &self.state
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    /// Resolve a token. Ends in `PendingPassword` or `Error`.
    pub async fn check(&mut self, token: &str) -> Result<PendingShare, FlowError> {
        let mut runner = Runner::new(self);
        runner.step(AccessEvent::SubmitToken(token.to_string())).await?;
        let result = match runner.state.get() {
            AccessState::PendingPassword(share) => {
                info!(token = %share.token, views_left = share.views_left, "share resolved");
                Ok(share.clone())
            }
            other => Err(outcome_error(other, "submit_token")),
        };
        runner.state.commit();
        result
    }

    /// Download the pending share, decrypting it when a non-empty password is given.
    pub async fn unlock(
        &mut self,
        password: Option<SecretString>,
    ) -> Result<UnlockedFile, FlowError> {
        let password = password.filter(|pw| !pw.expose_secret().is_empty());
        let mut runner = Runner::new(self);
        runner.password = password;
        let decrypt = runner.password.is_some();
        runner.step(AccessEvent::Unlock { decrypt }).await?;

        let result = match runner.state.get() {
            AccessState::Success(file) => {
                if !file.decrypted && sealbox_crypto::looks_sealed(&file.contents) {
                    warn!(
                        filename = %file.filename,
                        "share looks encrypted but no password was given; saved as-is"
                    );
                }
                info!(filename = %file.filename, views_left = file.views_left, "share unlocked");
                Ok(file.clone())
            }
            other => Err(outcome_error(other, "unlock")),
        };
        runner.state.commit();
        result
    }

    /// Return to `Idle` from `PendingPassword`, `Success` or `Error`.
    pub fn reset(&mut self) -> Result<(), FlowError> {
        let (next, _) = transition(&self.state, AccessEvent::Reset, &self.policy)?;
        self.state = next;
        if let Some(observe) = &self.observer {
            observe(&self.state);
        }
        Ok(())
    }
}

fn outcome_error(state: &AccessState, event: &'static str) -> FlowError {
    match state {
        AccessState::Error(failure) => {
            warn!(kind = %failure.kind, "access failed: {failure}");
            FlowError::Failed(failure.clone())
        }
        other => FlowError::InvalidTransition {
            state: other.name(),
            event,
        },
    }
}

/// Runs one driver call: applies events and executes commands until none remain.
struct Runner<'a, S: ?Sized> {
    service: &'a S,
    policy: &'a AccessPolicy,
    owner: Option<&'a str>,
    observer: &'a Option<TransitionObserver<AccessState>>,
    state: Rollback<'a, AccessState>,
    password: Option<SecretString>,
}

impl<'a, S: ShareService + ?Sized> Runner<'a, S> {
    fn new(flow: &'a mut AccessFlow<S>) -> Self {
        Self {
            service: &*flow.service,
            policy: &flow.policy,
            owner: flow.owner.as_deref(),
            observer: &flow.observer,
            state: Rollback::new(&mut flow.state),
            password: None,
        }
    }

    fn apply(&mut self, event: AccessEvent) -> Result<Option<AccessCommand>, FlowError> {
        let (next, command) = transition(self.state.get(), event, self.policy)?;
        debug!(from = self.state.get().name(), to = next.name(), "access transition");
        self.state.set(next);
        if let Some(observe) = self.observer {
            observe(self.state.get());
        }
        Ok(command)
    }

    async fn step(&mut self, event: AccessEvent) -> Result<(), FlowError> {
        let mut command = self.apply(event)?;
        while let Some(cmd) = command.take() {
            let event = self.execute(cmd).await;
            command = self.apply(event)?;
        }
        Ok(())
    }

    async fn execute(&mut self, command: AccessCommand) -> AccessEvent {
        match command {
            AccessCommand::Resolve { token, consume } => {
                let resolved = if consume {
                    self.service
                        .consume_share(&token, self.owner)
                        .await
                        .map(Resolution::Granted)
                } else {
                    self.service
                        .peek_share(&token, self.owner)
                        .await
                        .map(Resolution::Peeked)
                };
                match resolved {
                    Ok(resolution) => AccessEvent::Resolved(resolution),
                    Err(e) => AccessEvent::ResolveFailed(e.into()),
                }
            }

            AccessCommand::Download {
                token,
                transfer_url,
                consume,
            } => {
                let (url, views_left) = match (consume, transfer_url) {
                    (false, Some(url)) => (url, None),
                    _ => match self.service.consume_share(&token, self.owner).await {
                        Ok(grant) => (grant.transfer_url, Some(grant.views_left)),
                        Err(e) => return AccessEvent::DownloadFailed(e.into()),
                    },
                };
                match self.service.fetch_blob(&url).await {
                    Ok(bytes) => AccessEvent::Downloaded { bytes, views_left },
                    Err(e) => AccessEvent::DownloadFailed(e.into()),
                }
            }

            AccessCommand::Decrypt { envelope } => match self.password.take() {
                Some(password) => match compute::open(envelope, password).await {
                    Ok(plaintext) => AccessEvent::Decrypted(plaintext),
                    Err(failure) => AccessEvent::DecryptFailed(failure),
                },
                None => AccessEvent::DecryptFailed(Failure::validation("password is empty")),
            },
        }
    }
}
