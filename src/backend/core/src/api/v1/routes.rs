//! V1 API routes.

use axum::{
    routing::{get, post},
    Router,
};

use crate::api::{handlers, AppState};

/// V1 API prefix.
pub const V1_PREFIX: &str = "/api/v1";

/// Build the V1 API router.
///
/// Every route resolves the caller from its key headers first. `:event` is a code on
/// the lookup route and an event id below it; the router wants one name per segment.
///
/// - `POST /api/v1/identity` - Reconcile keys and return the canonical identity
/// - `POST /api/v1/events` - Create an event, optionally with a vanity code
/// - `GET /api/v1/events/:event` - Look up an event by code
/// - `POST /api/v1/events/:event/questions` - Ask a question
/// - `POST /api/v1/events/:event/questions/:question/vote` - Toggle a vote
pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/identity", post(handlers::register_identity))
        .route("/events", post(handlers::create_event))
        .route("/events/:event", get(handlers::get_event_by_code))
        .route("/events/:event/questions", post(handlers::add_question))
        .route("/events/:event/questions/:question/vote", post(handlers::toggle_vote))
}

/// Route constants for clients and documentation.
pub mod paths {
    pub const IDENTITY: &str = "/api/v1/identity";
    pub const EVENTS: &str = "/api/v1/events";
    pub const EVENT_BY_CODE: &str = "/api/v1/events/:event";
    pub const QUESTIONS: &str = "/api/v1/events/:event/questions";
    pub const VOTE: &str = "/api/v1/events/:event/questions/:question/vote";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_share_prefix() {
        for path in [
            paths::IDENTITY,
            paths::EVENTS,
            paths::EVENT_BY_CODE,
            paths::QUESTIONS,
            paths::VOTE,
        ] {
            assert!(path.starts_with(V1_PREFIX), "{path}");
        }
    }
}
