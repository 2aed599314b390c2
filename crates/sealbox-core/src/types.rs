use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Failure;

/// Opaque share identifier handed to a recipient
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShareToken(String);

impl ShareToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for ShareToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Access policy attached to a share at upload time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharePolicy {
    /// Number of times the share may be opened (>= 1)
    pub max_views: u32,
    /// Lifetime of the share in minutes (>= 1)
    pub expiry_mins: u32,
    /// Optional label shown instead of the filename
    pub display_name: Option<String>,
    /// Optional owner used for audit and statistics scoping
    pub owner_id: Option<String>,
}

impl SharePolicy {
    pub fn new(max_views: u32, expiry_mins: u32) -> Self {
        Self {
            max_views,
            expiry_mins,
            display_name: None,
            owner_id: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.display_name = (!name.trim().is_empty()).then_some(name);
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner_id = Some(owner.into());
        self
    }

    pub fn validate(&self) -> Result<(), Failure> {
        if self.max_views < 1 {
            return Err(Failure::validation("max views must be at least 1"));
        }
        if self.expiry_mins < 1 {
            return Err(Failure::validation("expiry must be at least 1 minute"));
        }
        Ok(())
    }
}

impl Default for SharePolicy {
    fn default() -> Self {
        Self::new(1, 60)
    }
}

/// Bytes handed to the share service for storage
#[derive(Clone)]
pub struct UploadPayload {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub policy: SharePolicy,
}

impl std::fmt::Debug for UploadPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadPayload")
            .field("bytes", &format_args!("[{} bytes]", self.bytes.len()))
            .field("filename", &self.filename)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Returned by the share service after a successful upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareReceipt {
    pub token: ShareToken,
    pub expires_at: Option<NaiveDateTime>,
}

/// Share metadata obtained without charging a view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareMetadata {
    pub filename: String,
    pub views_left: u32,
    pub expires_at: Option<NaiveDateTime>,
}

/// Result of consuming one view: where to fetch the blob from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareGrant {
    pub transfer_url: String,
    pub filename: String,
    /// Views remaining after this grant was charged
    pub views_left: u32,
}

/// One row of the service's access audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub id: String,
    #[serde(default)]
    pub share_id: Option<String>,
    pub accessed_at: String,
    /// `Granted` or `Denied: <reason>`
    pub status: String,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl AccessLogEntry {
    pub fn is_granted(&self) -> bool {
        self.status.contains("Granted")
    }

    /// Status without the reason suffix (`Denied: Link Expired` → `Denied`)
    pub fn status_label(&self) -> &str {
        self.status.split(':').next().unwrap_or_default().trim()
    }

    /// Client address with the last IPv4 octet hidden; loopback and IPv6 pass through
    pub fn masked_ip(&self) -> String {
        let Some(ip) = self.ip_address.as_deref().filter(|ip| !ip.is_empty()) else {
            return "Unknown".into();
        };
        if ip == "127.0.0.1" {
            return ip.to_string();
        }
        let parts: Vec<&str> = ip.split('.').collect();
        if parts.len() == 4 {
            format!("{}.{}.{}.***", parts[0], parts[1], parts[2])
        } else {
            ip.to_string()
        }
    }

    /// Parse `accessed_at`, accepting RFC 3339 or a naive UTC timestamp
    pub fn accessed_at_utc(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.accessed_at).map(|naive| naive.and_utc())
    }
}

/// Aggregate counters reported by the share service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_uploads: u64,
    pub active_links: u64,
    pub threats_blocked: u64,
    /// Accesses per hour over the last 24 hours, oldest first
    pub activity_graph: Vec<u64>,
}

impl Default for StatsSnapshot {
    fn default() -> Self {
        Self {
            total_uploads: 0,
            active_links: 0,
            threats_blocked: 0,
            activity_graph: vec![0; 24],
        }
    }
}

/// Parse a service timestamp into naive UTC.
///
/// Accepts RFC 3339 (any offset, converted to UTC) and offset-less ISO 8601
/// such as `2026-03-01T10:15:00.123456`, which services emit for UTC.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }
    raw.parse::<NaiveDateTime>().ok()
}

/// Append the encrypted-upload suffix to a filename
pub fn encrypted_filename(name: &str, suffix: &str) -> String {
    format!("{name}{suffix}")
}

/// Strip the encrypted-upload suffix, if present
pub fn strip_encrypted_suffix<'a>(name: &'a str, suffix: &str) -> &'a str {
    match name.strip_suffix(suffix) {
        Some(stripped) if !stripped.is_empty() => stripped,
        _ => name,
    }
}
