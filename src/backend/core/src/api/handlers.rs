//! HTTP request handlers.

use axum::{
    extract::{Path, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use super::{ApiResponse, AppState, Participant};
use crate::error::QuorumError;
use crate::events::{EventId, QuestionId};
use crate::identity::{CanonicalIdentity, Reconciliation};

// ═══════════════════════════════════════════════════════════════════════════════
// Health & Metrics
// ═══════════════════════════════════════════════════════════════════════════════

/// Liveness plus a store probe.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (status, label) = match state.service.health().await {
        Ok(()) => (StatusCode::OK, "healthy"),
        Err(err) => {
            tracing::warn!(error = %err, store = state.service.store_name(), "Store probe failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
        }
    };

    (
        status,
        Json(serde_json::json!({
            "status": label,
            "store": state.service.store_name(),
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
}

/// Prometheus text exposition.
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render(),
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Identity
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
pub struct IdentityResponse {
    #[serde(flatten)]
    pub identity: CanonicalIdentity,
    pub authenticated: bool,
    pub decision: Reconciliation,
}

/// Reconcile the caller's headers and report the outcome.
pub async fn register_identity(participant: Participant) -> Result<impl IntoResponse, QuorumError> {
    let response = IdentityResponse {
        authenticated: participant.identity.is_authenticated(),
        identity: participant.identity,
        decision: participant.decision,
    };
    Ok(Json(ApiResponse::success(response)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Events
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    pub title: String,
    #[serde(default)]
    pub code: Option<String>,
}

pub async fn create_event(
    State(state): State<AppState>,
    participant: Participant,
    Json(req): Json<CreateEventRequest>,
) -> Result<impl IntoResponse, QuorumError> {
    let event = state.service.create_event(&req.title, req.code.as_deref()).await?;
    let view = state.service.project(&event, &participant.identity);
    Ok((StatusCode::CREATED, Json(ApiResponse::success(view))))
}

pub async fn get_event_by_code(
    State(state): State<AppState>,
    participant: Participant,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, QuorumError> {
    let event = state.service.lookup_event(&code).await?;
    let view = state.service.project(&event, &participant.identity);
    Ok(Json(ApiResponse::success(view)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Questions & Votes
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct AskQuestionRequest {
    pub text: String,
}

pub async fn add_question(
    State(state): State<AppState>,
    participant: Participant,
    Path(event_id): Path<EventId>,
    Json(req): Json<AskQuestionRequest>,
) -> Result<impl IntoResponse, QuorumError> {
    let event = state
        .service
        .add_question(event_id, &req.text, &participant.identity)
        .await?;
    let view = state.service.project(&event, &participant.identity);
    Ok((StatusCode::CREATED, Json(ApiResponse::success(view))))
}

pub async fn toggle_vote(
    State(state): State<AppState>,
    participant: Participant,
    Path((event_id, question_id)): Path<(EventId, QuestionId)>,
) -> Result<impl IntoResponse, QuorumError> {
    let event = state
        .service
        .toggle_vote(event_id, question_id, &participant.identity)
        .await?;
    let view = state.service.project(&event, &participant.identity);
    Ok(Json(ApiResponse::success(view)))
}
