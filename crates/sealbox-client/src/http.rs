//! Share service over HTTP (reqwest)
//!
//! Routes, relative to the configured endpoint:
//! - `POST upload` (multipart: file, max_views, expiry_mins, custom_name, user_id)
//! - `GET peek/{token}` and `GET access/{token}`
//! - `GET logs` and `GET stats`, both with optional `user_id`
//!
//! Error responses carry `{"error": "..."}`. Other bodies are shown only when
//! they are short plain text. A peek that hits a bare 404 means the service has
//! no peek route and reports how to switch view accounting.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{multipart, Client, Response, StatusCode, Url};
use sealbox_core::config::ServerConfig;
use sealbox_core::{
    parse_timestamp, AccessLogEntry, ShareGrant, ShareMetadata, ShareReceipt, ShareToken,
    StatsSnapshot, UploadPayload,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::service::{ServiceError, ServiceResult, ShareService};

#[derive(Debug, Deserialize)]
struct UploadResponse {
    /// Bare token; the client builds the full link
    share_link: String,
    #[serde(default)]
    expires_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccessResponse {
    file_url: String,
    filename: String,
    views_left: i64,
}

#[derive(Debug, Deserialize)]
struct PeekResponse {
    filename: String,
    views_left: i64,
    #[serde(default)]
    expires_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StatsResponse {
    total_uploads: u64,
    active_links: u64,
    threats_blocked: u64,
    activity_graph: Vec<u64>,
}

/// `ShareService` backed by the sealbox HTTP API
#[derive(Debug, Clone)]
pub struct HttpShareService {
    client: Client,
    base: Url,
}

impl HttpShareService {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(endpoint.trim())
            .with_context(|| format!("invalid share service endpoint: {endpoint}"))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("share service endpoint cannot carry a path: {endpoint}");
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("sealbox/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building HTTP client")?;

        Ok(Self { client, base })
    }

    /// Build from the `[server]` config section, applying the TLS policy.
    pub fn from_config(server: &ServerConfig) -> Result<Self> {
        if server.endpoint.starts_with("http://") {
            if server.enforce_tls {
                anyhow::bail!(
                    "share service endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                     Use an HTTPS endpoint or set server.enforce_tls = false for local development.",
                    server.endpoint
                );
            }
            warn!(
                endpoint = %server.endpoint,
                "share service endpoint uses plaintext HTTP; tokens and blobs travel unencrypted. \
                 Set server.enforce_tls = true and use HTTPS in production."
            );
        }

        Self::new(&server.endpoint, Duration::from_secs(server.timeout_secs))
    }

    pub fn endpoint(&self) -> &Url {
        &self.base
    }

    fn route(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn with_owner(mut url: Url, owner: Option<&str>) -> Url {
        if let Some(owner) = owner {
            url.query_pairs_mut().append_pair("user_id", owner);
        }
        url
    }

    /// Resolve a transfer URL that may be relative to the endpoint.
    fn transfer_url(&self, raw: &str) -> ServiceResult<Url> {
        self.base
            .join(raw.trim())
            .map_err(|e| ServiceError::TransferFailure(format!("bad transfer URL: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> ServiceResult<T> {
        let resp = self.get(url).await?;
        decode(check_status(resp).await?).await
    }

    async fn get(&self, url: Url) -> ServiceResult<Response> {
        debug!(url = %url, "GET");
        self.client
            .get(url)
            .send()
            .await
            .map_err(|e| ServiceError::Collaborator(format!("request failed: {e}")))
    }
}

/// Longest plain-text error body shown verbatim
const MAX_PLAIN_ERROR: usize = 200;

/// Reported when a peek hits a service that only knows `upload` and `access`
const NO_PEEK_ENDPOINT: &str = "share service has no peek endpoint; \
     set access.view_accounting = \"consume_on_resolve\"";

/// A non-2xx response
#[derive(Debug)]
struct Rejection {
    status: StatusCode,
    message: String,
    /// The body was the service's own `{"error": ...}` reply
    from_service: bool,
}

impl From<Rejection> for ServiceError {
    fn from(r: Rejection) -> Self {
        match r.status {
            StatusCode::FORBIDDEN | StatusCode::NOT_FOUND | StatusCode::GONE => {
                ServiceError::AccessDenied(r.message)
            }
            _ => ServiceError::Collaborator(r.message),
        }
    }
}

/// Pass non-2xx responses on as a `Rejection`, keeping the server's message.
async fn check_status(resp: Response) -> Result<Response, Rejection> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(rejection(status, &body))
}

fn rejection(status: StatusCode, body: &str) -> Rejection {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        return Rejection {
            status,
            message: parsed.error,
            from_service: true,
        };
    }

    // HTML error pages and proxy bodies are replaced by the status line
    let text = body.trim();
    let plain = !text.is_empty()
        && text.len() <= MAX_PLAIN_ERROR
        && !text.contains('<')
        && !text.contains('\n');
    Rejection {
        status,
        message: if plain { text.to_string() } else { status.to_string() },
        from_service: false,
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> ServiceResult<T> {
    resp.json::<T>()
        .await
        .map_err(|e| ServiceError::Collaborator(format!("unexpected response body: {e}")))
}

fn views(raw: i64) -> u32 {
    u32::try_from(raw.max(0)).unwrap_or(u32::MAX)
}

#[async_trait]
impl ShareService for HttpShareService {
    async fn submit_upload(&self, payload: UploadPayload) -> ServiceResult<ShareReceipt> {
        let UploadPayload {
            bytes,
            filename,
            policy,
        } = payload;
        let size = bytes.len();

        let mut form = multipart::Form::new()
            .part("file", multipart::Part::bytes(bytes).file_name(filename.clone()))
            .text("max_views", policy.max_views.to_string())
            .text("expiry_mins", policy.expiry_mins.to_string());
        if let Some(name) = policy.display_name {
            form = form.text("custom_name", name);
        }
        if let Some(owner) = policy.owner_id {
            form = form.text("user_id", owner);
        }

        let url = self.route(&["upload"]);
        debug!(url = %url, filename = %filename, bytes = size, "POST upload");
        let resp = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ServiceError::Collaborator(format!("upload request failed: {e}")))?;
        let body: UploadResponse = decode(check_status(resp).await?).await?;

        if body.share_link.trim().is_empty() {
            return Err(ServiceError::Collaborator(
                "service returned an empty share token".into(),
            ));
        }

        let receipt = ShareReceipt {
            token: ShareToken::new(body.share_link.trim()),
            expires_at: body.expires_at.as_deref().and_then(parse_timestamp),
        };
        info!(token = %receipt.token, bytes = size, "upload accepted");
        Ok(receipt)
    }

    async fn peek_share(
        &self,
        token: &ShareToken,
        owner: Option<&str>,
    ) -> ServiceResult<ShareMetadata> {
        let url = Self::with_owner(self.route(&["peek", token.as_str()]), owner);
        let resp = match check_status(self.get(url).await?).await {
            Ok(resp) => resp,
            // a bare 404 means the route itself is missing, not the share
            Err(r) if r.status == StatusCode::NOT_FOUND && !r.from_service => {
                warn!(endpoint = %self.base, "share service does not support peeking");
                return Err(ServiceError::Collaborator(NO_PEEK_ENDPOINT.into()));
            }
            Err(r) => return Err(r.into()),
        };
        let body: PeekResponse = decode(resp).await?;
        Ok(ShareMetadata {
            filename: body.filename,
            views_left: views(body.views_left),
            expires_at: body.expires_at.as_deref().and_then(parse_timestamp),
        })
    }

    async fn consume_share(
        &self,
        token: &ShareToken,
        owner: Option<&str>,
    ) -> ServiceResult<ShareGrant> {
        let url = Self::with_owner(self.route(&["access", token.as_str()]), owner);
        let body: AccessResponse = self.get_json(url).await?;
        info!(token = %token, views_left = body.views_left, "share view consumed");
        Ok(ShareGrant {
            transfer_url: body.file_url,
            filename: body.filename,
            views_left: views(body.views_left),
        })
    }

    async fn fetch_blob(&self, transfer_url: &str) -> ServiceResult<Vec<u8>> {
        let url = self.transfer_url(transfer_url)?;
        debug!(host = url.host_str().unwrap_or_default(), "fetching blob");

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ServiceError::TransferFailure(format!("download failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ServiceError::TransferFailure(format!(
                "download failed: {status}"
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ServiceError::TransferFailure(format!("download interrupted: {e}")))?;
        Ok(bytes.to_vec())
    }

    async fn access_logs(&self, owner: Option<&str>) -> ServiceResult<Vec<AccessLogEntry>> {
        let url = Self::with_owner(self.route(&["logs"]), owner);
        self.get_json(url).await
    }

    async fn stats(&self, owner: Option<&str>) -> ServiceResult<StatsSnapshot> {
        let url = Self::with_owner(self.route(&["stats"]), owner);
        let body: StatsResponse = self.get_json(url).await?;

        let mut activity_graph = body.activity_graph;
        activity_graph.resize(24, 0);
        Ok(StatsSnapshot {
            total_uploads: body.total_uploads,
            active_links: body.active_links,
            threats_blocked: body.threats_blocked,
            activity_graph,
        })
    }
}
