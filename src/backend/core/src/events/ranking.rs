//! Vote toggling, ranking and per-viewer projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use super::store::{EventStore, ToggleOutcome, VoteChange};
use super::{Event, EventCode, EventId, Question, QuestionId};
use crate::error::{QuorumError, Result};
use crate::identity::CanonicalIdentity;
use crate::store::bounded;
use crate::telemetry::{metrics as quorum_metrics, DomainEvent};

/// Sort questions by descending vote count.
///
/// The sort is stable: questions with equal counts keep the order they had in `questions`
/// before the call, so repeated re-ranking never shuffles ties.
pub fn rank_questions(questions: &mut [Question]) {
    questions.sort_by_key(|q| Reverse(q.votes()));
}

/// Stable ranking over arbitrary rows, for stores that rank by position columns.
pub fn rank_by<T>(rows: &mut [T], votes: impl Fn(&T) -> usize) {
    rows.sort_by_key(|row| Reverse(votes(row)));
}

/// A question as seen by one viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalizedQuestion {
    pub id: QuestionId,
    pub text: String,
    pub votes: usize,
    /// Whether the viewer is in this question's voter set.
    pub voted: bool,
    /// Whether the viewer asked this question.
    pub asked_by_viewer: bool,
    pub created_at: DateTime<Utc>,
}

/// An event as seen by one viewer. Never carries voter or participant ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalizedEvent {
    pub id: EventId,
    pub code: EventCode,
    pub title: String,
    pub questions: Vec<PersonalizedQuestion>,
    pub participant_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Annotate each question with the viewer's vote membership.
pub fn project(event: &Event, viewer: &CanonicalIdentity) -> PersonalizedEvent {
    let questions = event
        .questions
        .iter()
        .map(|q| PersonalizedQuestion {
            id: q.id,
            text: q.text.clone(),
            votes: q.votes(),
            voted: q.has_voted(viewer.id),
            asked_by_viewer: q.author == Some(viewer.id),
            created_at: q.created_at,
        })
        .collect();

    PersonalizedEvent {
        id: event.id,
        code: event.code.clone(),
        title: event.title.clone(),
        questions,
        participant_count: event.participants.len(),
        created_at: event.created_at,
    }
}

/// Result of a toggle, with the event as ranked after it.
#[derive(Debug, Clone)]
pub struct VoteReceipt {
    pub change: VoteChange,
    pub event: Event,
}

/// Applies vote toggles and keeps events ranked.
#[derive(Clone)]
pub struct VoteEngine {
    events: Arc<dyn EventStore>,
    timeout: Duration,
}

impl VoteEngine {
    pub fn new(events: Arc<dyn EventStore>, timeout: Duration) -> Self {
        Self { events, timeout }
    }

    /// Toggle `voter`'s membership in the question's voter set, then re-rank.
    ///
    /// The toggle, the voter's participant join and the re-rank are one atomic step at
    /// the store, so a dropped request leaves the event either untouched or ranked. The
    /// event returned is read back afterwards and reflects the counts current then.
    #[instrument(skip(self, voter), fields(identity_id = %voter.id))]
    pub async fn toggle_vote(
        &self,
        event_id: EventId,
        question_id: QuestionId,
        voter: &CanonicalIdentity,
    ) -> Result<VoteReceipt> {
        let outcome = bounded(
            self.timeout,
            "toggle_voter",
            self.events.toggle_voter(event_id, question_id, voter.id),
        )
        .await?;

        let change = match outcome {
            ToggleOutcome::Applied(change) => change,
            ToggleOutcome::EventMissing => return Err(QuorumError::event_not_found(event_id)),
            ToggleOutcome::QuestionMissing => return Err(QuorumError::question_not_found(question_id.0)),
        };

        let event = self.rerank(event_id).await?;

        quorum_metrics::record_vote(change);
        DomainEvent::VoteToggled {
            event_id: event_id.to_string(),
            question_id: question_id.to_string(),
            change: change.as_str(),
        }
        .log();

        Ok(VoteReceipt { change, event })
    }

    /// Recompute and persist the ranking for `event_id`.
    pub async fn rerank(&self, event_id: EventId) -> Result<Event> {
        let event = bounded(self.timeout, "rerank", self.events.rerank(event_id))
            .await?
            .ok_or_else(|| QuorumError::event_not_found(event_id))?;
        debug!(event_id = %event_id, questions = event.questions.len(), "Event re-ranked");
        Ok(event)
    }
}
