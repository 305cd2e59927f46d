use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use super::{router, AppState};
use crate::controller::{Defaults, WorkspaceController};
use crate::orchestrator::FakeOrchestrator;
use crate::registry::MemoryRegistry;

fn test_state() -> AppState {
    AppState {
        controller: Arc::new(WorkspaceController::new(
            Arc::new(MemoryRegistry::new()),
            Arc::new(FakeOrchestrator::new()),
            Defaults::new("workspace-{id}.local".to_string()),
        )),
        version: "test".to_string(),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_reports_ok_without_envelope() {
    let app = router(test_state());
    let response = app
        .oneshot(Request::builder().uri("/api/v1/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], "test");
}

#[tokio::test]
async fn create_minimal_returns_201_with_running_status() {
    let app = router(test_state());
    let response = app
        .oneshot(json_request("POST", "/api/v1/workspaces", serde_json::json!({"name": "demo"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert!(body["error"].is_null());
    assert_eq!(body["data"]["name"], "demo");
    assert_eq!(body["data"]["status"], "running");
    let id = body["data"]["id"].as_str().unwrap();
    assert_eq!(body["data"]["namespace"], format!("workspace-{id}"));
    assert_eq!(body["data"]["helm_release_name"], format!("hld-{id}"));
}

#[tokio::test]
async fn create_with_empty_name_is_rejected() {
    let app = router(test_state());
    let response = app
        .oneshot(json_request("POST", "/api/v1/workspaces", serde_json::json!({"name": ""})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["data"].is_null());
    assert!(body["error"].as_str().unwrap().contains("empty"));
}

#[tokio::test]
async fn get_on_unknown_id_is_404() {
    let app = router(test_state());
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/workspaces/missing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn full_round_trip_through_http() {
    let app = router(test_state());

    let create_response = app
        .clone()
        .oneshot(json_request("POST", "/api/v1/workspaces", serde_json::json!({"name": "demo"})))
        .await
        .unwrap();
    let body = body_json(create_response).await;
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let stop_response = app
        .clone()
        .oneshot(json_request("POST", &format!("/api/v1/workspaces/{id}/stop"), serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(stop_response.status(), StatusCode::OK);
    assert_eq!(body_json(stop_response).await["data"]["status"], "stopped");

    let start_response = app
        .clone()
        .oneshot(json_request("POST", &format!("/api/v1/workspaces/{id}/start"), serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(body_json(start_response).await["data"]["status"], "running");

    let delete_response = app
        .clone()
        .oneshot(Request::builder().method("DELETE").uri(format!("/api/v1/workspaces/{id}")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(delete_response.status(), StatusCode::OK);

    let get_response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/workspaces/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(get_response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn secrets_never_leave_the_response_body() {
    let app = router(test_state());
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/workspaces",
            serde_json::json!({
                "name": "s",
                "secrets": {"humanlayer_api_key": "hl_x", "gh_token": "ghp_y"},
                "git_user_name": "n",
                "git_user_email": "e",
            }),
        ))
        .await
        .unwrap();

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(!text.contains("hl_x"));
    assert!(!text.contains("ghp_y"));
}

#[tokio::test]
async fn events_limit_must_be_numeric() {
    let app = router(test_state());
    let create_response = app
        .clone()
        .oneshot(json_request("POST", "/api/v1/workspaces", serde_json::json!({"name": "demo"})))
        .await
        .unwrap();
    let id = body_json(create_response).await["data"]["id"].as_str().unwrap().to_string();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/workspaces/{id}/events?limit=notanumber"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn list_orders_newest_created_first() {
    let app = router(test_state());
    app.clone()
        .oneshot(json_request("POST", "/api/v1/workspaces", serde_json::json!({"name": "A"})))
        .await
        .unwrap();
    app.clone()
        .oneshot(json_request("POST", "/api/v1/workspaces", serde_json::json!({"name": "B"})))
        .await
        .unwrap();

    let response = app
        .oneshot(Request::builder().uri("/api/v1/workspaces").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["data"][0]["name"], "B");
    assert_eq!(body["data"][1]["name"], "A");
}
