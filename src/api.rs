//! REST API server for the medical query orchestrator
//!
//! Exposes the chat surface over HTTP for the frontend UI.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::agent::QueryOrchestrator;
use crate::models::Resolution;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: Option<String>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<QueryOrchestrator>,
}

/// =============================
/// Helpers — Session Identity
/// =============================

fn stable_uuid_from_string(input: &str) -> uuid::Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    uuid::Uuid::from_bytes(bytes)
}

/// Map whatever session token the client sends onto a stable id, so
/// arbitrary frontend tokens and real UUIDs land in the same keyspace.
fn resolve_session_id(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => {
            match uuid::Uuid::parse_str(v.trim()) {
                Ok(parsed) => parsed.to_string(),
                Err(_) => stable_uuid_from_string(v.trim()).to_string(),
            }
        }
        _ => uuid::Uuid::new_v4().to_string(),
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    if req.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Message must not be empty".into())),
        );
    }

    let session_id = resolve_session_id(req.session_id.as_deref());
    info!(session_id = %session_id, message = %req.message, "Received chat request");

    let resolution = state
        .orchestrator
        .resolve(&req.message, Some(&session_id))
        .await;

    let (is_image, image_base64) = match &resolution {
        Resolution::Structured(s) if s.is_image => (
            true,
            s.image
                .as_ref()
                .map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes)),
        ),
        _ => (false, None),
    };

    let payload = serde_json::json!({
        "text": resolution.text(),
        "is_image": is_image,
        "image_base64": image_base64,
        "sources": resolution.sources(),
        "confidence": resolution.confidence(),
        "trace": resolution.trace(),
        "session_id": session_id,
    });

    (StatusCode::OK, Json(ApiResponse::success(payload)))
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<QueryOrchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", axum::routing::get(health))
        .route("/api/chat", post(chat_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<QueryOrchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
