#![allow(clippy::result_large_err)]
//! # Quorum Core
//!
//! Live audience Q&A: participants join an event by its short code, ask questions and
//! upvote the ones they care about.
//!
//! ## Architecture
//!
//! - **Identity**: Reconciles device keys, session keys and accounts into one canonical identity
//! - **Events**: Shareable event codes, questions and per-question voter sets
//! - **Ranking**: Race-free vote toggles, stable re-ranking and per-viewer projections
//! - **Store**: Atomic store primitives over memory or PostgreSQL
//! - **Telemetry**: Structured logging, OTLP tracing and Prometheus metrics

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod identity;
pub mod service;
pub mod store;
pub mod telemetry;

pub use error::{ErrorCode, ErrorDetails, ErrorSeverity, QuorumError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{ErrorCode, QuorumError, Result};
    pub use crate::events::{
        CodeAllocator, Event, EventCode, EventId, EventStore, PersonalizedEvent, PersonalizedQuestion, Question,
        QuestionId, VoteChange, VoteEngine,
    };
    pub use crate::identity::{
        AccountId, CanonicalIdentity, DeviceKey, Identity, IdentityId, IdentityStore, Reconciler, Reconciliation,
        Resolution, SessionKey,
    };
    pub use crate::service::QaService;
    pub use crate::store::MemoryStore;
}
