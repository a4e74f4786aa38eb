//! HTTP adapter for the Quorum core.
//!
//! Authentication and session-cookie handling happen upstream. This layer receives the
//! caller's keys as headers, resolves them through [`Participant`], and always answers
//! with a projection personalized for that caller.
//!
//! # Headers
//!
//! - `x-device-key`: required, long-lived device key
//! - `x-session-key`: required, per-session key
//! - `x-account-id`: optional, set by the authentication layer once the caller signed in

mod handlers;
pub mod participant;
pub mod v1;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::service::QaService;
use crate::telemetry::MetricsRegistry;

pub use participant::{Participant, ACCOUNT_HEADER, DEVICE_HEADER, SESSION_HEADER};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<QaService>,
    pub metrics: MetricsRegistry,
}

impl AppState {
    pub fn new(service: Arc<QaService>, metrics: MetricsRegistry) -> Self {
        Self { service, metrics }
    }
}

/// Build the API router.
///
/// - `GET /health` and `GET /metrics` (unversioned)
/// - V1 routes under `/api/v1/`
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        .nest(v1::V1_PREFIX, v1::v1_router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Envelope for successful responses. Failures are rendered by `QuorumError`.
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self { success: true, data }
    }
}
