//! Access workflow against an HTTP service that only serves `upload` and
//! `access/{id}`, like the original share API.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use sealbox_client::HttpShareService;
use sealbox_core::config::ViewAccounting;
use sealbox_core::FailureKind;
use sealbox_flow::{AccessFlow, AccessPolicy, AccessState, FlowError};
use secrecy::SecretString;
use serde_json::json;

async fn access(Path(id): Path<String>) -> Response {
    match id.as_str() {
        // last view: the count reported is after this one was charged
        "abc123" => Json(json!({
            "file_url": "/blob/abc123",
            "filename": "report.txt.enc",
            "views_left": 0,
        }))
        .into_response(),
        _ => (StatusCode::NOT_FOUND, Json(json!({ "error": "Link not found" }))).into_response(),
    }
}

async fn blob(State(envelope): State<Arc<Vec<u8>>>) -> Vec<u8> {
    envelope.as_ref().clone()
}

async fn html_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        "<!doctype html>\n<title>404 Not Found</title>\n<h1>Not Found</h1>",
    )
        .into_response()
}

async fn spawn_service() -> Arc<HttpShareService> {
    let envelope =
        sealbox_crypto::encrypt(b"HELLO WRLD", &SecretString::from("p@ss")).unwrap();
    let app = Router::new()
        .route("/api/access/{id}", get(access))
        .route("/blob/{id}", get(blob))
        .fallback(html_not_found)
        .with_state(Arc::new(envelope));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Arc::new(
        HttpShareService::new(&format!("http://{addr}/api"), Duration::from_secs(5)).unwrap(),
    )
}

#[tokio::test]
async fn default_accounting_explains_missing_peek_route() {
    let svc = spawn_service().await;
    let mut flow = AccessFlow::new(svc, AccessPolicy::default());

    let err = flow.check("abc123").await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::CollaboratorError);
    let FlowError::Failed(failure) = err else {
        panic!("expected a failed attempt");
    };
    assert!(failure.message.contains("consume_on_resolve"), "{failure}");
    assert!(!failure.message.contains('<'), "{failure}");
    assert!(matches!(flow.state(), AccessState::Error(_)));
}

#[tokio::test]
async fn consume_on_resolve_opens_last_view() {
    let svc = spawn_service().await;
    let mut flow = AccessFlow::new(
        svc,
        AccessPolicy {
            view_accounting: ViewAccounting::ConsumeOnResolve,
            ..AccessPolicy::default()
        },
    );

    let pending = flow.check("abc123").await.unwrap();
    assert_eq!(pending.views_left, 0);
    assert!(matches!(flow.state(), AccessState::PendingPassword(_)));

    let file = flow.unlock(Some(SecretString::from("p@ss"))).await.unwrap();
    assert_eq!(file.contents, b"HELLO WRLD");
    assert_eq!(file.filename, "report.txt");
    assert!(file.decrypted);
}

#[tokio::test]
async fn consume_on_resolve_unknown_token_is_denied() {
    let svc = spawn_service().await;
    let mut flow = AccessFlow::new(
        svc,
        AccessPolicy {
            view_accounting: ViewAccounting::ConsumeOnResolve,
            ..AccessPolicy::default()
        },
    );

    let err = flow.check("nope").await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::AccessDenied);
}
