//! The operations offered to the transport layer.
//!
//! Every attributed call takes the caller's [`CanonicalIdentity`] explicitly. The service
//! keeps no per-request state.

use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::config::Config;
use crate::error::{QuorumError, Result};
use crate::events::{
    project, CodeAllocator, Event, EventCode, EventId, EventStore, PendingEvent, PersonalizedEvent, Question,
    QuestionId, VoteEngine,
};
use crate::identity::{AccountId, CanonicalIdentity, DeviceKey, Identity, IdentityId, IdentityStore, Reconciler, Resolution, SessionKey};
use crate::store::{bounded, MemoryStore};
use crate::telemetry::{metrics as quorum_metrics, DomainEvent};

/// Live Q&A core: identity reconciliation, events, questions and votes.
#[derive(Clone)]
pub struct QaService {
    identities: Arc<dyn IdentityStore>,
    events: Arc<dyn EventStore>,
    reconciler: Reconciler,
    allocator: CodeAllocator,
    votes: VoteEngine,
    timeout: Duration,
}

impl QaService {
    pub fn new(identities: Arc<dyn IdentityStore>, events: Arc<dyn EventStore>, config: &Config) -> Self {
        let timeout = config.store.operation_timeout;
        Self {
            reconciler: Reconciler::new(identities.clone(), events.clone(), timeout),
            allocator: CodeAllocator::new(config.allocator.clone(), timeout),
            votes: VoteEngine::new(events.clone(), timeout),
            identities,
            events,
            timeout,
        }
    }

    /// Service backed by a fresh [`MemoryStore`].
    pub fn in_memory(config: &Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::new(store.clone(), store, config)
    }

    /// Replace the code allocator.
    pub fn with_allocator(mut self, allocator: CodeAllocator) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn store_name(&self) -> &'static str {
        self.events.name()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Identity
    // ═══════════════════════════════════════════════════════════════════════════

    /// Reconcile the caller's keys into one canonical identity.
    pub async fn resolve(
        &self,
        device: &DeviceKey,
        session: &SessionKey,
        account: Option<&AccountId>,
    ) -> Result<Resolution> {
        self.reconciler.resolve(device, session, account).await
    }

    /// Load the live identity for `id`, following merges.
    pub async fn identity(&self, id: IdentityId) -> Result<Identity> {
        bounded(self.timeout, "get_identity", self.identities.get(id))
            .await?
            .ok_or_else(|| QuorumError::identity_not_found(id.0))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Events
    // ═══════════════════════════════════════════════════════════════════════════

    /// Create an event with a generated code, or with `explicit_code` if given.
    #[instrument(skip(self))]
    pub async fn create_event(&self, title: &str, explicit_code: Option<&str>) -> Result<Event> {
        let mut pending = PendingEvent::new(title)?;
        let vanity = explicit_code.is_some();
        if let Some(code) = explicit_code {
            pending = pending.with_code(EventCode::parse(code)?);
        }

        let event = self.allocator.persist(self.events.as_ref(), pending).await?;

        quorum_metrics::record_event_created(vanity);
        DomainEvent::EventCreated {
            event_id: event.id.to_string(),
            code: event.code.to_string(),
            vanity,
        }
        .log();
        Ok(event)
    }

    /// Find an event by its shareable code.
    pub async fn lookup_event(&self, code: &str) -> Result<Event> {
        // A malformed code can never have been issued.
        let Ok(parsed) = EventCode::parse(code) else {
            return Err(QuorumError::event_not_found(code));
        };
        bounded(self.timeout, "find_by_code", self.events.find_by_code(&parsed))
            .await?
            .ok_or_else(|| QuorumError::event_not_found(&parsed))
    }

    pub async fn get_event(&self, id: EventId) -> Result<Event> {
        bounded(self.timeout, "get_event", self.events.get_event(id))
            .await?
            .ok_or_else(|| QuorumError::event_not_found(id))
    }

    /// Add `identity` to the event's participants.
    pub async fn join_event(&self, event_id: EventId, identity: &CanonicalIdentity) -> Result<()> {
        let joined = bounded(
            self.timeout,
            "add_participant",
            self.events.add_participant(event_id, identity.id),
        )
        .await?;
        if joined {
            Ok(())
        } else {
            Err(QuorumError::event_not_found(event_id))
        }
    }

    /// Ask a question. The author joins the event in the same store step. Returns the
    /// re-ranked event.
    #[instrument(skip(self, text, author), fields(identity_id = %author.id))]
    pub async fn add_question(&self, event_id: EventId, text: &str, author: &CanonicalIdentity) -> Result<Event> {
        let question = Question::new(text, Some(author.id))?;
        let question_id = question.id;

        let pushed = bounded(self.timeout, "push_question", self.events.push_question(event_id, question)).await?;
        if !pushed {
            return Err(QuorumError::event_not_found(event_id));
        }

        quorum_metrics::record_question();
        DomainEvent::QuestionAsked {
            event_id: event_id.to_string(),
            question_id: question_id.to_string(),
        }
        .log();

        self.votes.rerank(event_id).await
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Votes
    // ═══════════════════════════════════════════════════════════════════════════

    /// Cast or retract `identity`'s vote. The voter joins the event only when the toggle
    /// is applied. Returns the re-ranked event.
    pub async fn toggle_vote(
        &self,
        event_id: EventId,
        question_id: QuestionId,
        identity: &CanonicalIdentity,
    ) -> Result<Event> {
        let receipt = self.votes.toggle_vote(event_id, question_id, identity).await?;
        Ok(receipt.event)
    }

    /// Per-viewer view of an event.
    pub fn project(&self, event: &Event, viewer: &CanonicalIdentity) -> PersonalizedEvent {
        project(event, viewer)
    }

    /// Probe the backing store.
    pub async fn health(&self) -> Result<()> {
        bounded(self.timeout, "ping", self.events.ping()).await
    }
}
