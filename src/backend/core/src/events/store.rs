//! Event store boundary.
//!
//! Every mutation here is a single atomic primitive at the store: set-add, set-remove,
//! conditional insert or a re-rank computed from the counts visible at that instant.
//! Nothing in the crate reads a whole event, edits it and writes it back.
//!
//! Primitives that record an identity id (voter, author, participant) record the live
//! head of that id, resolved in the same atomic step as the write. A caller holding an
//! identity that a concurrent merge has since retired therefore writes the survivor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Event, EventCode, EventId, Question, QuestionId};
use crate::error::Result;
use crate::identity::IdentityId;

/// Result of inserting a new event.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(Event),
    /// The uniqueness constraint on codes rejected the insert.
    CodeTaken,
}

/// Direction of a toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChange {
    Cast,
    Retracted,
}

impl VoteChange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cast => "cast",
            Self::Retracted => "retracted",
        }
    }
}

/// Result of a toggle at the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Applied(VoteChange),
    EventMissing,
    QuestionMissing,
}

/// Persistence for events, questions, voter sets and participant sets.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Whether an event already uses `code`.
    async fn code_exists(&self, code: &EventCode) -> Result<bool>;

    /// Insert a new event, enforcing code uniqueness.
    async fn insert_event(&self, event: Event) -> Result<InsertOutcome>;

    async fn get_event(&self, id: EventId) -> Result<Option<Event>>;

    async fn find_by_code(&self, code: &EventCode) -> Result<Option<Event>>;

    /// Append a question and join its author to the participant set. Returns false when
    /// the event does not exist.
    async fn push_question(&self, event: EventId, question: Question) -> Result<bool>;

    /// Atomically add `voter` to the question's voter set, or remove it if present. In the
    /// same step the voter joins the participant set and the event is re-ranked. Nothing
    /// is written unless the outcome is `Applied`.
    async fn toggle_voter(
        &self,
        event: EventId,
        question: QuestionId,
        voter: IdentityId,
    ) -> Result<ToggleOutcome>;

    /// Set-add into the event's participant set. Returns false when the event does not exist.
    async fn add_participant(&self, event: EventId, identity: IdentityId) -> Result<bool>;

    /// Re-sort the event's questions by descending vote count using the counts visible
    /// now. Equal counts keep their previous relative order. Returns the ranked event.
    async fn rerank(&self, event: EventId) -> Result<Option<Event>>;

    /// Rewrite every voter-set and participant-set membership of `from` to `to` and
    /// re-rank the affected events, all in one atomic step. Idempotent. Returns the
    /// affected event ids.
    async fn reassign_member(&self, from: IdentityId, to: IdentityId) -> Result<Vec<EventId>>;

    /// Cheap liveness probe for health checks.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}
