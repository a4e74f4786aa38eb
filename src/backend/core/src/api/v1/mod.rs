//! V1 API: identity registration, events, questions and votes.

pub mod routes;

pub use routes::{v1_router, V1_PREFIX};
