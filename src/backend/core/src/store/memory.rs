//! In-process store implementing both store traits.
//!
//! Identity tables share one mutex so key ownership and merges move together. Events live
//! in a `DashMap` keyed by id, with a second map enforcing code uniqueness. No lock is
//! held across an `.await`: every primitive runs to completion inside one critical
//! section, which makes it atomic and safe to cancel.
//!
//! Membership writes take the identity lock before the event shard, so the id they record
//! is live for the whole write. Nothing takes the two in the other order.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::error::{QuorumError, Result};
use crate::events::ranking::rank_questions;
use crate::events::{
    Event, EventCode, EventId, EventStore, InsertOutcome, Question, QuestionId, ToggleOutcome, VoteChange,
};
use crate::identity::{
    AccountId, AttachOutcome, CreateOutcome, DeviceKey, Identity, IdentityId, IdentityStatus, IdentityStore,
    LinkOutcome, MergeOutcome, SessionKey,
};

#[derive(Debug, Default)]
struct IdentityTables {
    records: HashMap<IdentityId, Identity>,
    devices: HashMap<DeviceKey, IdentityId>,
    sessions: HashMap<SessionKey, IdentityId>,
    accounts: HashMap<AccountId, IdentityId>,
}

impl IdentityTables {
    /// Follow retired pointers to the live head.
    fn head(&self, id: IdentityId) -> Option<IdentityId> {
        let mut current = id;
        for _ in 0..=self.records.len() {
            match self.records.get(&current)?.survivor() {
                Some(next) => current = next,
                None => return Some(current),
            }
        }
        None
    }

    /// The id a membership write should record: the live head of `id`, or `id` itself
    /// when no identity record exists for it.
    fn live_member(&self, id: IdentityId) -> IdentityId {
        self.head(id).unwrap_or(id)
    }

    fn head_or_missing(&self, id: IdentityId) -> Result<IdentityId> {
        self.head(id).ok_or_else(|| QuorumError::identity_not_found(id.0))
    }

    fn record(&self, id: IdentityId) -> Result<&Identity> {
        self.records.get(&id).ok_or_else(|| QuorumError::identity_not_found(id.0))
    }

    fn record_mut(&mut self, id: IdentityId) -> Result<&mut Identity> {
        self.records.get_mut(&id).ok_or_else(|| QuorumError::identity_not_found(id.0))
    }

    fn live_owner(&self, id: Option<&IdentityId>) -> Option<Identity> {
        id.and_then(|id| self.records.get(id))
            .filter(|identity| identity.is_live())
            .cloned()
    }
}

/// Store kept entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    identities: Mutex<IdentityTables>,
    events: DashMap<EventId, Event>,
    codes: DashMap<EventCode, EventId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity_count(&self) -> usize {
        self.identities.lock().records.len()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Identity Store
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn find_by_session(&self, session: &SessionKey) -> Result<Option<Identity>> {
        let tables = self.identities.lock();
        Ok(tables.live_owner(tables.sessions.get(session)))
    }

    async fn find_by_device(&self, device: &DeviceKey) -> Result<Option<Identity>> {
        let tables = self.identities.lock();
        Ok(tables.live_owner(tables.devices.get(device)))
    }

    async fn find_by_account(&self, account: &AccountId) -> Result<Option<Identity>> {
        let tables = self.identities.lock();
        Ok(tables.live_owner(tables.accounts.get(account)))
    }

    async fn get(&self, id: IdentityId) -> Result<Option<Identity>> {
        let tables = self.identities.lock();
        Ok(tables.head(id).and_then(|head| tables.records.get(&head)).cloned())
    }

    async fn create(&self, device: &DeviceKey, session: &SessionKey) -> Result<CreateOutcome> {
        let mut tables = self.identities.lock();

        if let Some(owner) = tables.sessions.get(session).copied() {
            return Ok(CreateOutcome::Existing(tables.record(owner)?.clone()));
        }

        if let Some(owner) = tables.devices.get(device).copied() {
            tables.sessions.insert(session.clone(), owner);
            let identity = tables.record_mut(owner)?;
            identity.session_keys.insert(session.clone());
            identity.last_seen_at = Utc::now();
            return Ok(CreateOutcome::AttachedToDevice(identity.clone()));
        }

        let identity = Identity::new(device.clone(), session.clone());
        tables.devices.insert(device.clone(), identity.id);
        tables.sessions.insert(session.clone(), identity.id);
        tables.records.insert(identity.id, identity.clone());
        Ok(CreateOutcome::Created(identity))
    }

    async fn attach(&self, id: IdentityId, device: &DeviceKey, session: &SessionKey) -> Result<AttachOutcome> {
        let mut tables = self.identities.lock();
        let head = tables.head_or_missing(id)?;

        if let Some(owner) = tables.sessions.get(session).copied() {
            if owner != head {
                return Ok(AttachOutcome::AlreadyOwned(tables.record(owner)?.clone()));
            }
        }

        let claim_session = !tables.sessions.contains_key(session);
        let claim_device = !tables.devices.contains_key(device);
        if claim_session {
            tables.sessions.insert(session.clone(), head);
        }
        if claim_device {
            tables.devices.insert(device.clone(), head);
        }

        let identity = tables.record_mut(head)?;
        if claim_session {
            identity.session_keys.insert(session.clone());
        }
        if claim_device {
            identity.device_keys.insert(device.clone());
        }

        Ok(AttachOutcome::Attached {
            identity: identity.clone(),
            changed: claim_session || claim_device,
        })
    }

    async fn link_account(&self, id: IdentityId, account: &AccountId) -> Result<LinkOutcome> {
        let mut tables = self.identities.lock();
        let head = tables.head_or_missing(id)?;

        let identity = tables.record(head)?;
        match &identity.account {
            Some(linked) if linked == account => return Ok(LinkOutcome::AlreadyLinked(identity.clone())),
            Some(linked) => return Ok(LinkOutcome::ConflictingAccount(linked.clone())),
            None => {}
        }

        if let Some(owner) = tables.accounts.get(account).copied() {
            return Ok(LinkOutcome::AccountTaken(tables.record(owner)?.clone()));
        }

        tables.accounts.insert(account.clone(), head);
        let identity = tables.record_mut(head)?;
        identity.account = Some(account.clone());
        Ok(LinkOutcome::Linked(identity.clone()))
    }

    async fn merge(&self, survivor: IdentityId, loser: IdentityId) -> Result<MergeOutcome> {
        let mut tables = self.identities.lock();
        let survivor = tables.head_or_missing(survivor)?;
        let loser = tables.head_or_missing(loser)?;

        if survivor == loser {
            return Ok(MergeOutcome::AlreadyMerged {
                survivor: tables.record(survivor)?.clone(),
            });
        }

        if let (Some(survivor_account), Some(loser_account)) =
            (&tables.record(survivor)?.account, &tables.record(loser)?.account)
        {
            if survivor_account != loser_account {
                return Ok(MergeOutcome::Conflict {
                    survivor_account: survivor_account.clone(),
                    loser_account: loser_account.clone(),
                });
            }
        }

        let retired = tables.record_mut(loser)?;
        let devices = std::mem::take(&mut retired.device_keys);
        let sessions = std::mem::take(&mut retired.session_keys);
        let account = retired.account.take();
        retired.status = IdentityStatus::Retired {
            survivor,
            votes_migrated: false,
        };

        for device in &devices {
            tables.devices.insert(device.clone(), survivor);
        }
        for session in &sessions {
            tables.sessions.insert(session.clone(), survivor);
        }

        let kept = tables.record_mut(survivor)?;
        kept.device_keys.extend(devices);
        kept.session_keys.extend(sessions);
        let moved_account = match account {
            Some(account) if kept.account.is_none() => {
                kept.account = Some(account.clone());
                Some(account)
            }
            _ => None,
        };
        kept.last_seen_at = Utc::now();
        let merged = kept.clone();

        if let Some(account) = moved_account {
            tables.accounts.insert(account, survivor);
        }

        // Identities retired into the loser now point straight at the survivor.
        for record in tables.records.values_mut() {
            if let IdentityStatus::Retired { survivor: target, .. } = &mut record.status {
                if *target == loser {
                    *target = survivor;
                }
            }
        }

        Ok(MergeOutcome::Merged { survivor: merged })
    }

    async fn pending_migrations(&self, survivor: IdentityId) -> Result<Vec<IdentityId>> {
        let tables = self.identities.lock();
        let mut pending: Vec<IdentityId> = tables
            .records
            .values()
            .filter(|record| {
                matches!(
                    record.status,
                    IdentityStatus::Retired { survivor: target, votes_migrated: false } if target == survivor
                )
            })
            .map(|record| record.id)
            .collect();
        pending.sort();
        Ok(pending)
    }

    async fn complete_migration(&self, loser: IdentityId) -> Result<()> {
        let mut tables = self.identities.lock();
        if let IdentityStatus::Retired { votes_migrated, .. } = &mut tables.record_mut(loser)?.status {
            *votes_migrated = true;
        }
        Ok(())
    }

    async fn touch(&self, id: IdentityId) -> Result<()> {
        let mut tables = self.identities.lock();
        let head = tables.head_or_missing(id)?;
        tables.record_mut(head)?.last_seen_at = Utc::now();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Event Store
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl EventStore for MemoryStore {
    async fn code_exists(&self, code: &EventCode) -> Result<bool> {
        Ok(self.codes.contains_key(code))
    }

    async fn insert_event(&self, event: Event) -> Result<InsertOutcome> {
        match self.codes.entry(event.code.clone()) {
            Entry::Occupied(_) => Ok(InsertOutcome::CodeTaken),
            Entry::Vacant(slot) => {
                self.events.insert(event.id, event.clone());
                slot.insert(event.id);
                Ok(InsertOutcome::Inserted(event))
            }
        }
    }

    async fn get_event(&self, id: EventId) -> Result<Option<Event>> {
        Ok(self.events.get(&id).map(|event| event.clone()))
    }

    async fn find_by_code(&self, code: &EventCode) -> Result<Option<Event>> {
        let id = match self.codes.get(code) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.events.get(&id).map(|event| event.clone()))
    }

    async fn push_question(&self, event: EventId, mut question: Question) -> Result<bool> {
        // Held until the event is written so a merge cannot retire the author in between.
        let tables = self.identities.lock();
        let author = question.author.map(|author| tables.live_member(author));
        question.author = author;

        match self.events.get_mut(&event) {
            Some(mut event) => {
                event.questions.push(question);
                if let Some(author) = author {
                    event.participants.insert(author);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn toggle_voter(&self, event: EventId, question: QuestionId, voter: IdentityId) -> Result<ToggleOutcome> {
        let tables = self.identities.lock();
        let voter = tables.live_member(voter);

        let mut event = match self.events.get_mut(&event) {
            Some(event) => event,
            None => return Ok(ToggleOutcome::EventMissing),
        };
        let question = match event.question_mut(question) {
            Some(question) => question,
            None => return Ok(ToggleOutcome::QuestionMissing),
        };

        let change = if question.voters.remove(&voter) {
            VoteChange::Retracted
        } else {
            question.voters.insert(voter);
            VoteChange::Cast
        };
        event.participants.insert(voter);
        rank_questions(&mut event.questions);
        Ok(ToggleOutcome::Applied(change))
    }

    async fn add_participant(&self, event: EventId, identity: IdentityId) -> Result<bool> {
        let tables = self.identities.lock();
        let identity = tables.live_member(identity);

        match self.events.get_mut(&event) {
            Some(mut event) => {
                event.participants.insert(identity);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn rerank(&self, event: EventId) -> Result<Option<Event>> {
        Ok(self.events.get_mut(&event).map(|mut event| {
            rank_questions(&mut event.questions);
            event.clone()
        }))
    }

    async fn reassign_member(&self, from: IdentityId, to: IdentityId) -> Result<Vec<EventId>> {
        let mut touched = Vec::new();
        for mut entry in self.events.iter_mut() {
            let event = entry.value_mut();
            let mut changed = false;

            for question in &mut event.questions {
                if question.voters.remove(&from) {
                    question.voters.insert(to);
                    changed = true;
                }
                if question.author == Some(from) {
                    question.author = Some(to);
                }
            }
            if event.participants.remove(&from) {
                event.participants.insert(to);
                changed = true;
            }

            if changed {
                rank_questions(&mut event.questions);
                touched.push(event.id);
            }
        }
        Ok(touched)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PendingEvent;

    fn event(code: &str) -> Event {
        PendingEvent::new("Demo")
            .unwrap()
            .with_code(EventCode::parse(code).unwrap())
            .to_event()
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_is_compare_and_create() {
        let store = MemoryStore::new();
        let device = DeviceKey::from("d1");
        let session = SessionKey::from("s1");

        let first = store.create(&device, &session).await.unwrap();
        assert!(matches!(first, CreateOutcome::Created(_)));

        let second = store.create(&device, &session).await.unwrap();
        assert!(matches!(second, CreateOutcome::Existing(_)));
        assert_eq!(first.identity().id, second.identity().id);

        let third = store.create(&device, &"s2".into()).await.unwrap();
        assert!(matches!(third, CreateOutcome::AttachedToDevice(_)));
        assert!(third.identity().owns_session(&"s2".into()));
        assert_eq!(store.identity_count(), 1);
    }

    #[tokio::test]
    async fn test_attach_respects_existing_owners() {
        let store = MemoryStore::new();
        let a = store.create(&"d1".into(), &"s1".into()).await.unwrap().into_identity();
        let b = store.create(&"d2".into(), &"s2".into()).await.unwrap().into_identity();

        match store.attach(a.id, &"d2".into(), &"s2".into()).await.unwrap() {
            AttachOutcome::AlreadyOwned(owner) => assert_eq!(owner.id, b.id),
            other => panic!("expected AlreadyOwned, got {:?}", other),
        }

        match store.attach(a.id, &"d2".into(), &"s9".into()).await.unwrap() {
            AttachOutcome::Attached { identity, changed } => {
                assert!(changed);
                assert!(identity.owns_session(&"s9".into()));
                assert!(!identity.owns_device(&"d2".into()));
            }
            other => panic!("expected Attached, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_merge_moves_keys_and_retires_loser() {
        let store = MemoryStore::new();
        let a = store.create(&"d1".into(), &"s1".into()).await.unwrap().into_identity();
        let b = store.create(&"d2".into(), &"s2".into()).await.unwrap().into_identity();
        store.link_account(b.id, &"u1".into()).await.unwrap();

        let merged = store.merge(b.id, a.id).await.unwrap();
        let survivor = match merged {
            MergeOutcome::Merged { survivor } => survivor,
            other => panic!("expected Merged, got {:?}", other),
        };
        assert!(survivor.owns_device(&"d1".into()));
        assert!(survivor.owns_session(&"s1".into()));

        let found = store.find_by_session(&"s1".into()).await.unwrap().unwrap();
        assert_eq!(found.id, b.id);
        assert_eq!(store.get(a.id).await.unwrap().unwrap().id, b.id);
        assert_eq!(store.pending_migrations(b.id).await.unwrap(), vec![a.id]);

        store.complete_migration(a.id).await.unwrap();
        assert!(store.pending_migrations(b.id).await.unwrap().is_empty());

        assert!(matches!(
            store.merge(b.id, a.id).await.unwrap(),
            MergeOutcome::AlreadyMerged { .. }
        ));
    }

    #[tokio::test]
    async fn test_merge_refuses_two_accounts() {
        let store = MemoryStore::new();
        let a = store.create(&"d1".into(), &"s1".into()).await.unwrap().into_identity();
        let b = store.create(&"d2".into(), &"s2".into()).await.unwrap().into_identity();
        store.link_account(a.id, &"u1".into()).await.unwrap();
        store.link_account(b.id, &"u2".into()).await.unwrap();

        assert!(matches!(
            store.merge(b.id, a.id).await.unwrap(),
            MergeOutcome::Conflict { .. }
        ));
        assert!(store.get(a.id).await.unwrap().unwrap().is_live());
    }

    #[tokio::test]
    async fn test_insert_enforces_code_uniqueness() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.insert_event(event("launch")).await.unwrap(),
            InsertOutcome::Inserted(_)
        ));
        assert!(matches!(
            store.insert_event(event("launch")).await.unwrap(),
            InsertOutcome::CodeTaken
        ));
        assert_eq!(store.event_count(), 1);
    }

    #[tokio::test]
    async fn test_reassign_collapses_duplicate_votes() {
        let store = MemoryStore::new();
        let event = match store.insert_event(event("merge")).await.unwrap() {
            InsertOutcome::Inserted(event) => event,
            InsertOutcome::CodeTaken => panic!("code taken"),
        };
        let question = Question::new("Q", None).unwrap();
        let qid = question.id;
        store.push_question(event.id, question).await.unwrap();

        let loser = IdentityId::new();
        let survivor = IdentityId::new();
        store.toggle_voter(event.id, qid, loser).await.unwrap();
        store.toggle_voter(event.id, qid, survivor).await.unwrap();

        let touched = store.reassign_member(loser, survivor).await.unwrap();
        assert_eq!(touched, vec![event.id]);

        let event = store.get_event(event.id).await.unwrap().unwrap();
        let question = event.question(qid).unwrap();
        assert_eq!(question.votes(), 1);
        assert!(question.has_voted(survivor));

        assert!(store.reassign_member(loser, survivor).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_membership_writes_record_live_head() {
        let store = MemoryStore::new();
        let a = store.create(&"d1".into(), &"s1".into()).await.unwrap().into_identity();
        let b = store.create(&"d2".into(), &"s2".into()).await.unwrap().into_identity();
        let event = match store.insert_event(event("stale")).await.unwrap() {
            InsertOutcome::Inserted(event) => event,
            InsertOutcome::CodeTaken => panic!("code taken"),
        };

        // Retired, with the membership rewrite still pending.
        store.merge(b.id, a.id).await.unwrap();

        let question = Question::new("Q", Some(a.id)).unwrap();
        let qid = question.id;
        assert!(store.push_question(event.id, question).await.unwrap());
        assert_eq!(
            store.toggle_voter(event.id, qid, a.id).await.unwrap(),
            ToggleOutcome::Applied(VoteChange::Cast)
        );
        assert!(store.add_participant(event.id, a.id).await.unwrap());

        let event = store.get_event(event.id).await.unwrap().unwrap();
        let question = event.question(qid).unwrap();
        assert_eq!(question.author, Some(b.id));
        assert!(question.has_voted(b.id));
        assert!(!question.has_voted(a.id));
        assert_eq!(event.participants.iter().copied().collect::<Vec<_>>(), vec![b.id]);
        assert!(store.reassign_member(a.id, b.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_question_toggle_writes_nothing() {
        let store = MemoryStore::new();
        let event = match store.insert_event(event("empty")).await.unwrap() {
            InsertOutcome::Inserted(event) => event,
            InsertOutcome::CodeTaken => panic!("code taken"),
        };
        let voter = IdentityId::new();

        assert_eq!(
            store.toggle_voter(event.id, QuestionId::new(), voter).await.unwrap(),
            ToggleOutcome::QuestionMissing
        );
        assert_eq!(
            store.toggle_voter(EventId::new(), QuestionId::new(), voter).await.unwrap(),
            ToggleOutcome::EventMissing
        );
        let event = store.get_event(event.id).await.unwrap().unwrap();
        assert!(event.participants.is_empty());
    }
}
