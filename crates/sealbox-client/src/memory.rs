//! In-process share service
//!
//! Honours view budgets and expiry the same way the HTTP service does, keeps
//! an audit trail, and counts calls so tests can assert which collaborator
//! operations ran.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime, Utc};
use sealbox_core::{
    AccessLogEntry, ShareGrant, ShareMetadata, ShareReceipt, ShareToken, StatsSnapshot,
    UploadPayload,
};
use tracing::{debug, info};

use crate::service::{ServiceError, ServiceResult, ShareService};

/// Lifetime of a transfer URL handed out by `consume_share`
pub const TRANSFER_URL_TTL_SECS: i64 = 60;

const NOT_FOUND: &str = "Link not found";
const EXPIRED: &str = "Link Expired";
const EXHAUSTED: &str = "Max views reached";

/// Number of calls made to each `ShareService` operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub submit_upload: usize,
    pub peek_share: usize,
    pub consume_share: usize,
    pub fetch_blob: usize,
    pub access_logs: usize,
    pub stats: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.submit_upload
            + self.peek_share
            + self.consume_share
            + self.fetch_blob
            + self.access_logs
            + self.stats
    }
}

#[derive(Debug, Clone)]
struct StoredShare {
    bytes: Option<Vec<u8>>,
    filename: String,
    owner_id: Option<String>,
    max_views: u32,
    current_views: u32,
    expires_at: NaiveDateTime,
}

impl StoredShare {
    fn views_left(&self) -> u32 {
        self.max_views.saturating_sub(self.current_views)
    }

    fn is_expired(&self, now: NaiveDateTime) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug)]
struct Grant {
    token: String,
    issued_at: NaiveDateTime,
}

impl Grant {
    fn is_expired(&self, now: NaiveDateTime) -> bool {
        now - self.issued_at > Duration::seconds(TRANSFER_URL_TTL_SECS)
    }
}

#[derive(Debug)]
struct LoggedAccess {
    owner_id: Option<String>,
    at: NaiveDateTime,
    entry: AccessLogEntry,
}

#[derive(Debug, Default)]
struct Inner {
    shares: HashMap<String, StoredShare>,
    grants: HashMap<String, Grant>,
    log: Vec<LoggedAccess>,
    tokens: VecDeque<String>,
    uploads: Vec<Option<String>>,
    calls: CallCounts,
    next_log_id: u64,
    next_grant_id: u64,
}

impl Inner {
    fn record(&mut self, token: &str, owner_id: Option<String>, status: String, now: NaiveDateTime) {
        self.next_log_id += 1;
        self.log.push(LoggedAccess {
            owner_id,
            at: now,
            entry: AccessLogEntry {
                id: self.next_log_id.to_string(),
                share_id: Some(token.to_string()),
                accessed_at: now.and_utc().to_rfc3339(),
                status,
                ip_address: Some("127.0.0.1".into()),
                user_agent: Some(concat!("sealbox-memory/", env!("CARGO_PKG_VERSION")).into()),
            },
        });
    }

    /// Policy check shared by peek and consume; `Ok` carries the share.
    fn active_share(&self, token: &str, now: NaiveDateTime) -> ServiceResult<&StoredShare> {
        let share = self
            .shares
            .get(token)
            .ok_or_else(|| ServiceError::AccessDenied(NOT_FOUND.into()))?;
        if share.is_expired(now) {
            return Err(ServiceError::AccessDenied(EXPIRED.into()));
        }
        Ok(share)
    }
}

fn owned_by(owner_id: Option<&str>, filter: Option<&str>) -> bool {
    filter.is_none() || owner_id == filter
}

/// `ShareService` kept entirely in memory
#[derive(Debug, Default)]
pub struct MemoryShareService {
    inner: Mutex<Inner>,
}

impl MemoryShareService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out these tokens, in order, before falling back to random UUIDs.
    pub fn with_tokens<I, T>(tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let svc = Self::default();
        svc.lock().tokens = tokens.into_iter().map(Into::into).collect();
        svc
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    /// Bytes stored for a share, exactly as uploaded
    pub fn stored_bytes(&self, token: &ShareToken) -> Option<Vec<u8>> {
        self.lock()
            .shares
            .get(token.as_str())
            .and_then(|s| s.bytes.clone())
    }

    pub fn views_left(&self, token: &ShareToken) -> Option<u32> {
        self.lock()
            .shares
            .get(token.as_str())
            .map(StoredShare::views_left)
    }

    /// Move a share's expiry into the past.
    pub fn expire(&self, token: &ShareToken) -> bool {
        let mut inner = self.lock();
        match inner.shares.get_mut(token.as_str()) {
            Some(share) => {
                share.expires_at = Utc::now().naive_utc() - Duration::seconds(1);
                true
            }
            None => false,
        }
    }

    /// Delete a share's blob while keeping its record, so transfers fail.
    pub fn drop_blob(&self, token: &ShareToken) -> bool {
        let mut inner = self.lock();
        match inner.shares.get_mut(token.as_str()) {
            Some(share) => share.bytes.take().is_some(),
            None => false,
        }
    }
}

#[async_trait]
impl ShareService for MemoryShareService {
    async fn submit_upload(&self, payload: UploadPayload) -> ServiceResult<ShareReceipt> {
        let mut inner = self.lock();
        inner.calls.submit_upload += 1;

        let token = inner
            .tokens
            .pop_front()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if inner.shares.contains_key(&token) {
            return Err(ServiceError::Collaborator(format!(
                "token {token} already in use"
            )));
        }

        let now = Utc::now().naive_utc();
        let expires_at = now + Duration::minutes(i64::from(payload.policy.expiry_mins));
        let filename = payload
            .policy
            .display_name
            .clone()
            .unwrap_or(payload.filename);
        let size = payload.bytes.len();

        inner.shares.insert(
            token.clone(),
            StoredShare {
                bytes: Some(payload.bytes),
                filename,
                owner_id: payload.policy.owner_id.clone(),
                max_views: payload.policy.max_views,
                current_views: 0,
                expires_at,
            },
        );
        inner.uploads.push(payload.policy.owner_id);

        info!(token = %token, bytes = size, "memory share stored");
        Ok(ShareReceipt {
            token: ShareToken::new(token),
            expires_at: Some(expires_at),
        })
    }

    async fn peek_share(
        &self,
        token: &ShareToken,
        _owner: Option<&str>,
    ) -> ServiceResult<ShareMetadata> {
        let mut inner = self.lock();
        inner.calls.peek_share += 1;

        let now = Utc::now().naive_utc();
        let share = inner.active_share(token.as_str(), now)?;
        Ok(ShareMetadata {
            filename: share.filename.clone(),
            views_left: share.views_left(),
            expires_at: Some(share.expires_at),
        })
    }

    async fn consume_share(
        &self,
        token: &ShareToken,
        _owner: Option<&str>,
    ) -> ServiceResult<ShareGrant> {
        let mut inner = self.lock();
        inner.calls.consume_share += 1;
        let now = Utc::now().naive_utc();

        let checked = inner
            .active_share(token.as_str(), now)
            .map(|s| (s.views_left(), s.owner_id.clone()));
        let owner_id = match checked {
            Ok((0, owner_id)) => {
                inner.record(token.as_str(), owner_id, format!("Denied: {EXHAUSTED}"), now);
                return Err(ServiceError::AccessDenied(EXHAUSTED.into()));
            }
            Ok((_, owner_id)) => owner_id,
            Err(err) => {
                if let ServiceError::AccessDenied(reason) = &err {
                    if reason != NOT_FOUND {
                        let owner_id = inner
                            .shares
                            .get(token.as_str())
                            .and_then(|s| s.owner_id.clone());
                        inner.record(token.as_str(), owner_id, format!("Denied: {reason}"), now);
                    }
                }
                return Err(err);
            }
        };

        let (filename, views_left) = match inner.shares.get_mut(token.as_str()) {
            Some(share) => {
                share.current_views += 1;
                (share.filename.clone(), share.views_left())
            }
            None => return Err(ServiceError::AccessDenied(NOT_FOUND.into())),
        };
        inner.record(token.as_str(), owner_id, "Granted".into(), now);

        inner.grants.retain(|_, grant| !grant.is_expired(now));
        inner.next_grant_id += 1;
        let transfer_url = format!("memory://{token}/{}", inner.next_grant_id);
        inner.grants.insert(
            transfer_url.clone(),
            Grant {
                token: token.as_str().to_string(),
                issued_at: now,
            },
        );

        debug!(token = %token, views_left, "memory share view consumed");
        Ok(ShareGrant {
            transfer_url,
            filename,
            views_left,
        })
    }

    async fn fetch_blob(&self, transfer_url: &str) -> ServiceResult<Vec<u8>> {
        let mut inner = self.lock();
        inner.calls.fetch_blob += 1;

        let now = Utc::now().naive_utc();
        if inner
            .grants
            .get(transfer_url)
            .is_some_and(|grant| grant.is_expired(now))
        {
            inner.grants.remove(transfer_url);
            return Err(ServiceError::TransferFailure("transfer URL expired".into()));
        }
        let grant = inner
            .grants
            .get(transfer_url)
            .ok_or_else(|| ServiceError::TransferFailure("unknown transfer URL".into()))?;

        inner
            .shares
            .get(&grant.token)
            .and_then(|s| s.bytes.clone())
            .ok_or_else(|| ServiceError::TransferFailure("object not found".into()))
    }

    async fn access_logs(&self, owner: Option<&str>) -> ServiceResult<Vec<AccessLogEntry>> {
        let mut inner = self.lock();
        inner.calls.access_logs += 1;

        Ok(inner
            .log
            .iter()
            .rev()
            .filter(|l| owned_by(l.owner_id.as_deref(), owner))
            .map(|l| l.entry.clone())
            .collect())
    }

    async fn stats(&self, owner: Option<&str>) -> ServiceResult<StatsSnapshot> {
        let mut inner = self.lock();
        inner.calls.stats += 1;
        let now = Utc::now().naive_utc();

        let total_uploads = inner
            .uploads
            .iter()
            .filter(|o| owned_by(o.as_deref(), owner))
            .count() as u64;
        let active_links = inner
            .shares
            .values()
            .filter(|s| owned_by(s.owner_id.as_deref(), owner))
            .filter(|s| !s.is_expired(now) && s.views_left() > 0)
            .count() as u64;

        let mut snapshot = StatsSnapshot {
            total_uploads,
            active_links,
            ..Default::default()
        };
        for access in inner
            .log
            .iter()
            .filter(|l| owned_by(l.owner_id.as_deref(), owner))
        {
            if !access.entry.is_granted() {
                snapshot.threats_blocked += 1;
            }
            let hours_ago = (now - access.at).num_hours();
            if (0..24).contains(&hours_ago) {
                snapshot.activity_graph[23 - hours_ago as usize] += 1;
            }
        }
        Ok(snapshot)
    }
}
