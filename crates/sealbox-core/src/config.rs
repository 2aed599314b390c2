use serde::{Deserialize, Serialize};

/// Top-level client configuration (loaded from sealbox.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SealboxConfig {
    pub server: ServerConfig,
    pub share: ShareConfig,
    pub access: AccessConfig,
    pub crypto: CryptoConfig,
    pub monitor: MonitorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Share service base URL (default: http://127.0.0.1:5000)
    pub endpoint: String,
    /// Refuse plaintext HTTP endpoints instead of warning
    pub enforce_tls: bool,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Owner id sent with uploads and used to scope logs/stats
    pub owner_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareConfig {
    /// Default view budget for new shares
    pub default_max_views: u32,
    /// Default lifetime for new shares, in minutes
    pub default_expiry_mins: u32,
    /// Origin that share links point at (the recipient-facing app)
    pub link_origin: String,
    /// Query parameter carrying the share token
    pub link_param: String,
    /// Filename suffix marking encrypted uploads
    pub encrypted_suffix: String,
}

/// When a share's view budget is charged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewAccounting {
    /// Resolving a token is a free peek; the view is charged when the blob is fetched
    #[default]
    ConsumeOnUnlock,
    /// Resolving a token charges the view (legacy coupling)
    ConsumeOnResolve,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    pub view_accounting: ViewAccounting,
}

/// Envelope settings for new uploads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Envelope mode: "legacy" (no tag) or "authenticated" (HMAC-SHA256 tag)
    pub mode: String,
    /// Upload the base64 text form instead of raw bytes
    pub armor: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Audit log poll interval in seconds
    pub logs_interval_secs: u64,
    /// Statistics poll interval in seconds
    pub stats_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:5000".into(),
            enforce_tls: false,
            timeout_secs: 30,
            owner_id: None,
        }
    }
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            default_max_views: 1,
            default_expiry_mins: 60,
            link_origin: "http://localhost:5173".into(),
            link_param: "shareId".into(),
            encrypted_suffix: crate::ENCRYPTED_SUFFIX.into(),
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            mode: "legacy".into(),
            armor: false,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            logs_interval_secs: 5,
            stats_interval_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl SealboxConfig {
    /// Parse a TOML document; missing sections and keys take their defaults.
    pub fn from_toml(content: &str) -> crate::SealboxResult<Self> {
        toml::from_str(content).map_err(|e| crate::SealboxError::Config(e.to_string()))
    }
}
