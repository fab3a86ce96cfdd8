use affina_core::api::{HealthStatus, StartSessionRequest, StopSessionRequest};
use affina_overlay::api::{ApiError, BackendApi, HttpBackend};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

async fn start_session(Json(request): Json<StartSessionRequest>) -> Response {
    if request.meeting_url.contains("missing") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "error": "Meeting not found"})),
        )
            .into_response();
    }
    if request.meeting_url.contains("broken") {
        return (StatusCode::BAD_GATEWAY, "upstream exploded").into_response();
    }
    Json(json!({
        "success": true,
        "session_id": format!("sess-{}", request.selected_emotions.len()),
    }))
    .into_response()
}

async fn stop_session(Json(request): Json<StopSessionRequest>) -> Json<Value> {
    Json(json!({"message": format!("Stopped {}", request.session_id)}))
}

async fn healthy() -> Json<Value> {
    Json(json!({"status": "ok", "bots": 2}))
}

async fn unhealthy() -> StatusCode {
    StatusCode::SERVICE_UNAVAILABLE
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

fn backend_at(addr: SocketAddr) -> HttpBackend {
    let base = Url::parse(&format!("http://{addr}")).expect("url");
    HttpBackend::new(base, Duration::from_secs(5))
}

fn request(meeting_url: &str) -> StartSessionRequest {
    StartSessionRequest {
        user_name: "Dana".to_string(),
        meeting_url: meeting_url.to_string(),
        meeting_objective: "Renewal".to_string(),
        selected_emotions: vec!["Joy".to_string(), "Doubt".to_string()],
    }
}

fn api_router() -> Router {
    Router::new()
        .route("/api/start-session", post(start_session))
        .route("/api/stop-session", post(stop_session))
        .route("/api/health", get(healthy))
}

#[tokio::test]
async fn start_session_returns_issued_id() {
    let backend = backend_at(serve(api_router()).await);
    let response = backend
        .start_session(&request("https://meet.example.com/ok"))
        .await
        .expect("start");
    assert_eq!(response.into_session_id(), Ok("sess-2".to_string()));
}

#[tokio::test]
async fn start_session_failure_body_is_kept() {
    let backend = backend_at(serve(api_router()).await);
    let response = backend
        .start_session(&request("https://meet.example.com/missing"))
        .await
        .expect("body parses despite status");
    assert!(!response.success);
    assert_eq!(response.into_session_id(), Err("Meeting not found".to_string()));
}

#[tokio::test]
async fn start_session_unparsable_error_maps_to_status() {
    let backend = backend_at(serve(api_router()).await);
    let err = backend
        .start_session(&request("https://meet.example.com/broken"))
        .await
        .expect_err("should fail");
    assert!(matches!(err, ApiError::Status(502)), "got {err:?}");
}

#[tokio::test]
async fn stop_session_returns_message() {
    let backend = backend_at(serve(api_router()).await);
    let response = backend
        .stop_session(&StopSessionRequest {
            session_id: "sess-7".to_string(),
        })
        .await
        .expect("stop");
    assert_eq!(response.message.as_deref(), Some("Stopped sess-7"));
}

#[tokio::test]
async fn health_reports_each_state() {
    let backend = backend_at(serve(api_router()).await);
    assert_eq!(
        backend.health().await,
        HealthStatus::Healthy {
            details: json!({"status": "ok", "bots": 2})
        }
    );

    let sick = backend_at(serve(Router::new().route("/api/health", get(unhealthy))).await);
    assert_eq!(sick.health().await, HealthStatus::Unhealthy { status: 503 });

    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let gone = backend_at(addr);
    assert!(matches!(
        gone.health().await,
        HealthStatus::Unreachable { .. }
    ));
}
