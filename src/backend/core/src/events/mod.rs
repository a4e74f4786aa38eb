//! Live Q&A events, their questions and voter sets.
//!
//! An [`Event`] owns an ordered list of [`Question`]s. Each question owns a voter set of
//! canonical identity ids; the vote count is always the size of that set and is never
//! stored on its own.

pub mod code;
pub mod ranking;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::error::{QuorumError, Result};
use crate::identity::IdentityId;

pub use code::{CodeAllocator, CodeSource, EventCode, RandomCodes, CODE_ALPHABET};
pub use ranking::{project, rank_questions, PersonalizedEvent, PersonalizedQuestion, VoteEngine};
pub use store::{EventStore, InsertOutcome, ToggleOutcome, VoteChange};

/// Maximum accepted length of an event title, in characters.
pub const MAX_TITLE_CHARS: usize = 200;

/// Maximum accepted length of a question, in characters.
pub const MAX_QUESTION_CHARS: usize = 500;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuestionId(pub Uuid);

impl QuestionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for QuestionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A question asked during an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub text: String,
    /// Identities that currently vote for this question.
    pub voters: BTreeSet<IdentityId>,
    pub author: Option<IdentityId>,
    pub created_at: DateTime<Utc>,
}

impl Question {
    /// Create a question with an empty voter set, validating its text.
    pub fn new(text: &str, author: Option<IdentityId>) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(QuorumError::validation("Question text cannot be empty"));
        }
        if text.chars().count() > MAX_QUESTION_CHARS {
            return Err(QuorumError::validation(format!(
                "Question text cannot exceed {} characters",
                MAX_QUESTION_CHARS
            )));
        }

        Ok(Self {
            id: QuestionId::new(),
            text: text.to_string(),
            voters: BTreeSet::new(),
            author,
            created_at: Utc::now(),
        })
    }

    /// Vote count, derived from the voter set.
    pub fn votes(&self) -> usize {
        self.voters.len()
    }

    pub fn has_voted(&self, identity: IdentityId) -> bool {
        self.voters.contains(&identity)
    }
}

/// A single live Q&A session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub title: String,
    /// Assigned once at creation; never changes afterwards.
    pub code: EventCode,
    /// Sorted by descending vote count at rest.
    pub questions: Vec<Question>,
    pub participants: BTreeSet<IdentityId>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn question(&self, id: QuestionId) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }

    pub fn question_mut(&mut self, id: QuestionId) -> Option<&mut Question> {
        self.questions.iter_mut().find(|q| q.id == id)
    }

    /// Whether the question list currently satisfies the ranking order.
    pub fn is_ranked(&self) -> bool {
        self.questions
            .windows(2)
            .all(|pair| pair[0].votes() >= pair[1].votes())
    }
}

/// An event that has not been persisted yet and may still lack its code.
#[derive(Debug, Clone)]
pub struct PendingEvent {
    pub id: EventId,
    pub title: String,
    pub code: Option<EventCode>,
    pub created_at: DateTime<Utc>,
}

impl PendingEvent {
    /// Validate the title and start an event draft.
    pub fn new(title: &str) -> Result<Self> {
        let title = title.trim();
        if title.is_empty() {
            return Err(QuorumError::validation("Event title cannot be empty"));
        }
        if title.chars().count() > MAX_TITLE_CHARS {
            return Err(QuorumError::validation(format!(
                "Event title cannot exceed {} characters",
                MAX_TITLE_CHARS
            )));
        }

        Ok(Self {
            id: EventId::new(),
            title: title.to_string(),
            code: None,
            created_at: Utc::now(),
        })
    }

    pub fn with_code(mut self, code: EventCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Materialize the event. Requires an assigned code.
    pub fn to_event(&self) -> Result<Event> {
        let code = self
            .code
            .clone()
            .ok_or_else(|| QuorumError::internal("event persisted before a code was allocated"))?;

        Ok(Event {
            id: self.id,
            title: self.title.clone(),
            code,
            questions: Vec::new(),
            participants: BTreeSet::new(),
            created_at: self.created_at,
        })
    }
}
