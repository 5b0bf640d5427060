//! Webhook endpoints for Git providers.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use matrixci_core::event::{PullRequestEvent, TriggerEvent};
use matrixci_scheduler::DispatchOutcome;
use serde_json::{Value, json};
use sha2::Sha256;
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/github", post(github_webhook))
}

/// Handle GitHub webhook events.
async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let event_type = header(&headers, "X-GitHub-Event").unwrap_or("unknown");
    let delivery = header(&headers, "X-GitHub-Delivery")
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if let Some(secret) = &state.webhook_secret {
        let signature = header(&headers, "X-Hub-Signature-256");
        if !verify_github_signature(secret, &body, signature) {
            warn!(%delivery, event = %event_type, "Invalid webhook signature");
            return Err(ApiError::Unauthorized("invalid signature".to_string()));
        }
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e)))?;

    info!(
        event = %event_type,
        %delivery,
        repo = ?payload.get("repository").and_then(|r| r.get("full_name")),
        "Received GitHub webhook"
    );

    let event = match event_type {
        "ping" => {
            info!("Ping event received - webhook is configured correctly");
            return Ok((StatusCode::OK, Json(json!({ "status": "pong" }))));
        }
        "pull_request" => {
            let pr = PullRequestEvent::from_github_payload(&payload).ok_or_else(|| {
                ApiError::BadRequest("malformed pull_request payload".to_string())
            })?;
            TriggerEvent::pull_request(delivery, pr)
        }
        other => TriggerEvent::other(delivery, other),
    };

    let response = match state.dispatcher.dispatch(event).await {
        DispatchOutcome::Started(handle) => (
            StatusCode::ACCEPTED,
            Json(json!({ "status": "started", "run_id": handle.run_id })),
        ),
        DispatchOutcome::Duplicate => (StatusCode::OK, Json(json!({ "status": "duplicate" }))),
        DispatchOutcome::Ignored => (StatusCode::OK, Json(json!({ "status": "ignored" }))),
    };

    Ok(response)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Verify GitHub webhook signature.
fn verify_github_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };

    // Signature format: "sha256=<hex>"
    let Some(sig_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    mac.verify_slice(&sig_bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use matrixci_config::default_workflow;
    use matrixci_executor::LocalProvider;
    use matrixci_scheduler::{JobExecutor, RunOrchestrator, RunRegistry, TriggerDispatcher, WorkerPool};
    use std::sync::Arc;
    use tower::ServiceExt;

    const SECRET: &str = "It's a Secret to Everybody";

    fn state() -> AppState {
        // No labels: every job fails to provision, nothing runs on the host.
        let provider = Arc::new(LocalProvider::new(Vec::<String>::new()));
        let orchestrator =
            RunOrchestrator::new(Arc::new(JobExecutor::new(provider)), WorkerPool::new(2));
        let dispatcher =
            TriggerDispatcher::new(default_workflow().unwrap(), orchestrator, RunRegistry::new());
        AppState::new(dispatcher).with_webhook_secret(SECRET)
    }

    fn sign(body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn pull_request_body(action: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "action": action,
            "number": 5,
            "pull_request": { "head": { "sha": "abc123", "ref": "topic" } },
            "repository": { "full_name": "octo/widgets" }
        }))
        .unwrap()
    }

    fn request(event: &str, delivery: &str, body: Vec<u8>, signature: Option<String>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhooks/github")
            .header("content-type", "application/json")
            .header("X-GitHub-Event", event)
            .header("X-GitHub-Delivery", delivery);
        if let Some(signature) = signature {
            builder = builder.header("X-Hub-Signature-256", signature);
        }
        builder.body(Body::from(body)).unwrap()
    }

    async fn status_of(response: axum::response::Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_signature_verification() {
        let body = b"Hello, World!";
        // Example from GitHub's webhook documentation.
        let signature = "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17";
        assert!(verify_github_signature(SECRET, body, Some(signature)));
        assert!(!verify_github_signature("other", body, Some(signature)));
        assert!(!verify_github_signature(SECRET, body, None));
        assert!(!verify_github_signature(SECRET, body, Some("sha1=abc")));
    }

    #[tokio::test]
    async fn test_rejects_bad_signature() {
        let app = routes::router(state());
        let body = pull_request_body("opened");
        let response = app
            .oneshot(request("pull_request", "d-1", body, Some("sha256=00".to_string())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_ping_is_answered() {
        let app = routes::router(state());
        let body = b"{\"zen\":\"Keep it logically awesome.\"}".to_vec();
        let signature = sign(&body);
        let response = app
            .oneshot(request("ping", "d-1", body, Some(signature)))
            .await
            .unwrap();
        let (status, json) = status_of(response).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "pong");
    }

    #[tokio::test]
    async fn test_push_event_is_ignored() {
        let app = routes::router(state());
        let body = b"{\"ref\":\"refs/heads/main\"}".to_vec();
        let signature = sign(&body);
        let response = app
            .oneshot(request("push", "d-1", body, Some(signature)))
            .await
            .unwrap();
        let (status, json) = status_of(response).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ignored");
    }

    #[tokio::test]
    async fn test_pull_request_starts_a_run_once() {
        let state = state();
        let app = routes::router(state.clone());

        let body = pull_request_body("opened");
        let signature = sign(&body);
        let response = app
            .clone()
            .oneshot(request("pull_request", "d-7", body.clone(), Some(signature.clone())))
            .await
            .unwrap();
        let (status, json) = status_of(response).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["status"], "started");

        let response = app
            .oneshot(request("pull_request", "d-7", body, Some(signature)))
            .await
            .unwrap();
        let (status, json) = status_of(response).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "duplicate");

        assert_eq!(state.registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_pull_request_is_ignored() {
        let app = routes::router(state());
        let body = pull_request_body("closed");
        let signature = sign(&body);
        let response = app
            .oneshot(request("pull_request", "d-1", body, Some(signature)))
            .await
            .unwrap();
        let (status, json) = status_of(response).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ignored");
    }
}
