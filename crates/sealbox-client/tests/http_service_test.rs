//! Integration test: HttpShareService against a local axum stub
//!
//! The stub mimics the share API's routes and error bodies so the client's
//! request encoding and error mapping can be checked without a live service.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use sealbox_client::{HttpShareService, ServiceError, ShareService};
use sealbox_core::{SharePolicy, ShareToken, UploadPayload};
use serde_json::json;

#[derive(Default)]
struct Recorded {
    fields: HashMap<String, String>,
    file_name: Option<String>,
    file_bytes: Vec<u8>,
    queries: Vec<HashMap<String, String>>,
}

type Shared = Arc<Mutex<Recorded>>;

async fn upload(State(rec): State<Shared>, mut multipart: Multipart) -> Response {
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let file_name = field.file_name().map(str::to_string);
            let bytes = field.bytes().await.unwrap();
            let mut rec = rec.lock().unwrap();
            rec.file_name = file_name;
            rec.file_bytes = bytes.to_vec();
        } else {
            let value = field.text().await.unwrap();
            rec.lock().unwrap().fields.insert(name, value);
        }
    }
    Json(json!({
        "message": "File secured successfully!",
        "share_link": "abc123",
        "expires_at": "2026-03-01T11:15:00.250000",
    }))
    .into_response()
}

fn error(status: StatusCode, msg: &str) -> Response {
    (status, Json(json!({ "error": msg }))).into_response()
}

async fn access(
    State(rec): State<Shared>,
    Path(id): Path<String>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    rec.lock().unwrap().queries.push(q);
    match id.as_str() {
        "abc123" => Json(json!({
            "file_url": "/blob/abc123",
            "filename": "report.pdf.enc",
            "views_left": 0,
        }))
        .into_response(),
        "spent" => error(StatusCode::FORBIDDEN, "Max views reached"),
        "broken" => error(StatusCode::INTERNAL_SERVER_ERROR, "ledger unavailable"),
        _ => error(StatusCode::NOT_FOUND, "Link not found"),
    }
}

async fn peek(Path(id): Path<String>) -> Response {
    match id.as_str() {
        "abc123" => Json(json!({
            "filename": "report.pdf.enc",
            "views_left": 2,
            "expires_at": "2026-03-01T11:15:00+00:00",
        }))
        .into_response(),
        "old" => error(StatusCode::GONE, "Link Expired"),
        _ => error(StatusCode::NOT_FOUND, "Link not found"),
    }
}

async fn blob(Path(id): Path<String>) -> Response {
    match id.as_str() {
        "abc123" => (StatusCode::OK, b"Salted__opaque".to_vec()).into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn logs() -> Response {
    Json(json!([
        {
            "id": "7",
            "accessed_at": "2026-03-01T10:15:00",
            "status": "Denied: Link Expired",
            "ip_address": "10.0.0.9",
            "user_agent": "curl/8.0"
        },
        {
            "id": "6",
            "accessed_at": "2026-03-01T10:14:00",
            "status": "Granted",
            "ip_address": "127.0.0.1",
            "user_agent": null
        }
    ]))
    .into_response()
}

async fn stats(Query(q): Query<HashMap<String, String>>) -> Response {
    if q.get("user_id").map(String::as_str) == Some("alice") {
        Json(json!({
            "total_uploads": 4,
            "active_links": 2,
            "threats_blocked": 1,
            "activity_graph": [0, 1, 2],
        }))
        .into_response()
    } else {
        (StatusCode::BAD_GATEWAY, "upstream down").into_response()
    }
}

async fn spawn_stub() -> (HttpShareService, Shared) {
    let rec: Shared = Arc::default();
    let app = Router::new()
        .route("/api/upload", post(upload))
        .route("/api/access/{id}", get(access))
        .route("/api/peek/{id}", get(peek))
        .route("/api/logs", get(logs))
        .route("/api/stats", get(stats))
        .route("/blob/{id}", get(blob))
        .with_state(rec.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let svc = HttpShareService::new(&format!("http://{addr}/api"), Duration::from_secs(5)).unwrap();
    (svc, rec)
}

#[tokio::test]
async fn upload_sends_policy_fields() {
    let (svc, rec) = spawn_stub().await;

    let receipt = svc
        .submit_upload(UploadPayload {
            bytes: b"Salted__ciphertext".to_vec(),
            filename: "report.pdf.enc".into(),
            policy: SharePolicy::new(3, 90)
                .with_display_name("ProjectAlpha")
                .with_owner("alice"),
        })
        .await
        .expect("upload should succeed");

    assert_eq!(receipt.token, ShareToken::new("abc123"));
    let expires = receipt.expires_at.expect("expiry is reported");
    assert_eq!(expires.to_string(), "2026-03-01 11:15:00.250");

    let rec = rec.lock().unwrap();
    assert_eq!(rec.file_name.as_deref(), Some("report.pdf.enc"));
    assert_eq!(rec.file_bytes, b"Salted__ciphertext");
    assert_eq!(rec.fields["max_views"], "3");
    assert_eq!(rec.fields["expiry_mins"], "90");
    assert_eq!(rec.fields["custom_name"], "ProjectAlpha");
    assert_eq!(rec.fields["user_id"], "alice");
}

#[tokio::test]
async fn consume_then_fetch_relative_url() {
    let (svc, rec) = spawn_stub().await;

    let grant = svc
        .consume_share(&ShareToken::new("abc123"), Some("bob"))
        .await
        .unwrap();
    assert_eq!(grant.filename, "report.pdf.enc");
    assert_eq!(grant.views_left, 0);
    assert_eq!(rec.lock().unwrap().queries[0]["user_id"], "bob");

    let bytes = svc.fetch_blob(&grant.transfer_url).await.unwrap();
    assert_eq!(bytes, b"Salted__opaque");
}

#[tokio::test]
async fn denials_keep_server_reason() {
    let (svc, _) = spawn_stub().await;

    assert_eq!(
        svc.consume_share(&ShareToken::new("spent"), None)
            .await
            .unwrap_err(),
        ServiceError::AccessDenied("Max views reached".into())
    );
    assert_eq!(
        svc.consume_share(&ShareToken::new("unknown"), None)
            .await
            .unwrap_err(),
        ServiceError::AccessDenied("Link not found".into())
    );
    assert_eq!(
        svc.peek_share(&ShareToken::new("old"), None).await.unwrap_err(),
        ServiceError::AccessDenied("Link Expired".into())
    );
}

#[tokio::test]
async fn server_errors_are_collaborator_errors() {
    let (svc, _) = spawn_stub().await;

    assert_eq!(
        svc.consume_share(&ShareToken::new("broken"), None)
            .await
            .unwrap_err(),
        ServiceError::Collaborator("ledger unavailable".into())
    );
    assert_eq!(
        svc.stats(None).await.unwrap_err(),
        ServiceError::Collaborator("upstream down".into())
    );
}

#[tokio::test]
async fn peek_reports_metadata() {
    let (svc, _) = spawn_stub().await;

    let meta = svc.peek_share(&ShareToken::new("abc123"), None).await.unwrap();
    assert_eq!(meta.views_left, 2);
    assert_eq!(meta.filename, "report.pdf.enc");
    assert!(meta.expires_at.is_some());
}

#[tokio::test]
async fn missing_blob_is_transfer_failure() {
    let (svc, _) = spawn_stub().await;

    let err = svc.fetch_blob("/blob/gone").await.unwrap_err();
    assert!(matches!(err, ServiceError::TransferFailure(_)), "{err:?}");
}

#[tokio::test]
async fn logs_and_stats_decode() {
    let (svc, _) = spawn_stub().await;

    let logs = svc.access_logs(None).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].status_label(), "Denied");
    assert_eq!(logs[0].masked_ip(), "10.0.0.***");
    assert!(logs[1].is_granted());
    assert_eq!(logs[1].user_agent, None);

    let stats = svc.stats(Some("alice")).await.unwrap();
    assert_eq!(stats.total_uploads, 4);
    assert_eq!(stats.active_links, 2);
    assert_eq!(stats.activity_graph.len(), 24);
    assert_eq!(&stats.activity_graph[..3], &[0, 1, 2]);
}

#[tokio::test]
async fn unreachable_service_is_collaborator_error() {
    let svc = HttpShareService::new("http://127.0.0.1:9/api", Duration::from_secs(2)).unwrap();
    let err = svc.access_logs(None).await.unwrap_err();
    assert!(matches!(err, ServiceError::Collaborator(_)), "{err:?}");
}

/// A service exposing only `upload` and `access`, with an HTML 404 page for
/// every other path.
async fn spawn_access_only_stub() -> HttpShareService {
    async fn html_not_found() -> Response {
        (
            StatusCode::NOT_FOUND,
            [("content-type", "text/html; charset=utf-8")],
            "<!doctype html>\n<title>404 Not Found</title>\n<h1>Not Found</h1>",
        )
            .into_response()
    }

    let rec: Shared = Arc::default();
    let app = Router::new()
        .route("/api/upload", post(upload))
        .route("/api/access/{id}", get(access))
        .route("/blob/{id}", get(blob))
        .fallback(html_not_found)
        .with_state(rec);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    HttpShareService::new(&format!("http://{addr}/api"), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn missing_peek_route_points_at_consume_on_resolve() {
    let svc = spawn_access_only_stub().await;

    let err = svc
        .peek_share(&ShareToken::new("abc123"), None)
        .await
        .unwrap_err();
    match err {
        ServiceError::Collaborator(msg) => {
            assert!(msg.contains("consume_on_resolve"), "{msg}");
            assert!(!msg.contains('<'), "{msg}");
        }
        other => panic!("expected a collaborator error, got {other:?}"),
    }
}

#[tokio::test]
async fn access_only_service_still_resolves_and_denies() {
    let svc = spawn_access_only_stub().await;

    let grant = svc
        .consume_share(&ShareToken::new("abc123"), None)
        .await
        .unwrap();
    assert_eq!(grant.filename, "report.pdf.enc");
    assert_eq!(svc.fetch_blob(&grant.transfer_url).await.unwrap(), b"Salted__opaque");

    // JSON 404 from the service itself stays a denial with its reason
    assert_eq!(
        svc.consume_share(&ShareToken::new("unknown"), None)
            .await
            .unwrap_err(),
        ServiceError::AccessDenied("Link not found".into())
    );
}

#[tokio::test]
async fn html_error_pages_are_not_passed_through() {
    let svc = spawn_access_only_stub().await;

    let err = svc.access_logs(None).await.unwrap_err();
    assert_eq!(err, ServiceError::AccessDenied("404 Not Found".into()));
}
