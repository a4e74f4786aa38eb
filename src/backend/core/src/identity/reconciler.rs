//! Identity reconciliation.
//!
//! `resolve` turns a (device, session, account) triple into one canonical identity. The
//! reconciler never reads a record and writes it back: every mutation is one of the
//! store's atomic primitives, and a lost race simply shows up as a different outcome of
//! that primitive.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::store::{AttachOutcome, CreateOutcome, IdentityStore, LinkOutcome, MergeOutcome};
use super::{AccountId, CanonicalIdentity, DeviceKey, Identity, IdentityId, SessionKey};
use crate::error::{QuorumError, Result};
use crate::events::EventStore;
use crate::store::bounded;
use crate::telemetry::{metrics as quorum_metrics, DomainEvent};

/// How old `last_seen_at` may get before a converged resolve refreshes it.
const LAST_SEEN_INTERVAL_SECS: i64 = 60;

fn is_stale(identity: &Identity) -> bool {
    Utc::now() - identity.last_seen_at >= chrono::Duration::seconds(LAST_SEEN_INTERVAL_SECS)
}

/// The case a resolve call took.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Reconciliation {
    /// The keys already resolved to a converged identity. Nothing was written.
    NoOp,
    /// A session or device key was attached to an existing identity.
    AttachKey { identity: IdentityId },
    /// An account was linked to the working identity.
    LinkAccount { identity: IdentityId, account: AccountId },
    /// A new identity was created.
    CreateNew { identity: IdentityId },
    /// `loser` was retired into `survivor`.
    Merge { survivor: IdentityId, loser: IdentityId },
}

impl Reconciliation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoOp => "no_op",
            Self::AttachKey { .. } => "attach_key",
            Self::LinkAccount { .. } => "link_account",
            Self::CreateNew { .. } => "create_new",
            Self::Merge { .. } => "merge",
        }
    }

    fn weight(&self) -> u8 {
        match self {
            Self::NoOp => 0,
            Self::LinkAccount { .. } => 1,
            Self::AttachKey { .. } => 2,
            Self::CreateNew { .. } => 3,
            Self::Merge { .. } => 4,
        }
    }

    /// Keep the most significant step taken during one resolve.
    fn escalate(self, next: Self) -> Self {
        if next.weight() > self.weight() {
            next
        } else {
            self
        }
    }
}

/// Output of [`Reconciler::resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub identity: CanonicalIdentity,
    pub decision: Reconciliation,
}

/// Folds device, session and account keys into canonical identities.
#[derive(Clone)]
pub struct Reconciler {
    identities: Arc<dyn IdentityStore>,
    events: Arc<dyn EventStore>,
    timeout: Duration,
}

impl Reconciler {
    pub fn new(identities: Arc<dyn IdentityStore>, events: Arc<dyn EventStore>, timeout: Duration) -> Self {
        Self {
            identities,
            events,
            timeout,
        }
    }

    /// Resolve a key triple to its canonical identity.
    ///
    /// Fails with `IdentityConflict` when the working identity and the requested account
    /// are bound to two different accounts.
    #[instrument(skip_all, fields(store = self.identities.name(), authenticated = account.is_some()))]
    pub async fn resolve(
        &self,
        device: &DeviceKey,
        session: &SessionKey,
        account: Option<&AccountId>,
    ) -> Result<Resolution> {
        let (mut working, mut decision) = self.working_identity(device, session).await?;

        if let Some(account) = account {
            if working.account.as_ref() != Some(account) {
                let (identity, step) = self.apply_account(working, account).await?;
                working = identity;
                decision = decision.escalate(step);
            }
        }

        self.finish_migrations(working.id).await?;
        if decision != Reconciliation::NoOp || is_stale(&working) {
            bounded(self.timeout, "touch", self.identities.touch(working.id)).await?;
        }

        quorum_metrics::record_resolve(decision.as_str());
        debug!(identity_id = %working.id, decision = decision.as_str(), "Identity resolved");

        Ok(Resolution {
            identity: working.canonical(),
            decision,
        })
    }

    /// Find or create the identity owning the anonymous keys.
    async fn working_identity(&self, device: &DeviceKey, session: &SessionKey) -> Result<(Identity, Reconciliation)> {
        if let Some(owner) = bounded(self.timeout, "find_by_session", self.identities.find_by_session(session)).await? {
            if owner.owns_device(device) {
                return Ok((owner, Reconciliation::NoOp));
            }
            // Claims the device only if nobody owns it yet.
            return self.attach(owner, device, session).await;
        }

        if let Some(owner) = bounded(self.timeout, "find_by_device", self.identities.find_by_device(device)).await? {
            return self.attach(owner, device, session).await;
        }

        let created = bounded(self.timeout, "create", self.identities.create(device, session)).await?;
        Ok(match created {
            CreateOutcome::Created(identity) => {
                DomainEvent::IdentityCreated {
                    identity_id: identity.id.to_string(),
                    device_key: device.to_string(),
                }
                .log();
                let decision = Reconciliation::CreateNew { identity: identity.id };
                (identity, decision)
            }
            CreateOutcome::AttachedToDevice(identity) => {
                let decision = Reconciliation::AttachKey { identity: identity.id };
                (identity, decision)
            }
            CreateOutcome::Existing(identity) => (identity, Reconciliation::NoOp),
        })
    }

    async fn attach(
        &self,
        owner: Identity,
        device: &DeviceKey,
        session: &SessionKey,
    ) -> Result<(Identity, Reconciliation)> {
        let outcome = bounded(self.timeout, "attach", self.identities.attach(owner.id, device, session)).await?;
        Ok(match outcome {
            AttachOutcome::Attached { identity, changed: true } => {
                let decision = Reconciliation::AttachKey { identity: identity.id };
                (identity, decision)
            }
            AttachOutcome::Attached { identity, changed: false } => (identity, Reconciliation::NoOp),
            // A concurrent resolve claimed the session first; its owner is the answer.
            AttachOutcome::AlreadyOwned(identity) => (identity, Reconciliation::NoOp),
        })
    }

    /// Link the account or merge into its owner.
    async fn apply_account(&self, working: Identity, account: &AccountId) -> Result<(Identity, Reconciliation)> {
        let owner = bounded(self.timeout, "find_by_account", self.identities.find_by_account(account)).await?;

        match owner {
            Some(owner) if owner.id != working.id => self.merge_into(owner.id, working.id).await,
            Some(owner) => Ok((owner, Reconciliation::NoOp)),
            None => {
                if let Some(linked) = &working.account {
                    return Err(self.conflict(working.id, linked, account));
                }
                let linked = bounded(self.timeout, "link_account", self.identities.link_account(working.id, account)).await?;
                match linked {
                    LinkOutcome::Linked(identity) => {
                        info!(identity_id = %identity.id, "Account linked");
                        let decision = Reconciliation::LinkAccount {
                            identity: identity.id,
                            account: account.clone(),
                        };
                        Ok((identity, decision))
                    }
                    LinkOutcome::AlreadyLinked(identity) => Ok((identity, Reconciliation::NoOp)),
                    LinkOutcome::ConflictingAccount(linked) => Err(self.conflict(working.id, &linked, account)),
                    // Lost the race to another identity linking the same account.
                    LinkOutcome::AccountTaken(owner) => self.merge_into(owner.id, working.id).await,
                }
            }
        }
    }

    async fn merge_into(&self, survivor: IdentityId, loser: IdentityId) -> Result<(Identity, Reconciliation)> {
        let outcome = bounded(self.timeout, "merge", self.identities.merge(survivor, loser)).await?;
        match outcome {
            MergeOutcome::Merged { survivor: identity } => {
                DomainEvent::IdentitiesMerged {
                    survivor: identity.id.to_string(),
                    loser: loser.to_string(),
                }
                .log();
                let decision = Reconciliation::Merge {
                    survivor: identity.id,
                    loser,
                };
                Ok((identity, decision))
            }
            MergeOutcome::AlreadyMerged { survivor } => Ok((survivor, Reconciliation::NoOp)),
            MergeOutcome::Conflict {
                survivor_account,
                loser_account,
            } => Err(self.conflict(loser, &loser_account, &survivor_account)),
        }
    }

    /// Rewrite vote and participant memberships of identities retired into `survivor`.
    async fn finish_migrations(&self, survivor: IdentityId) -> Result<()> {
        let pending = bounded(
            self.timeout,
            "pending_migrations",
            self.identities.pending_migrations(survivor),
        )
        .await?;

        for loser in pending {
            let touched = bounded(self.timeout, "reassign_member", self.events.reassign_member(loser, survivor)).await?;
            bounded(self.timeout, "complete_migration", self.identities.complete_migration(loser)).await?;
            DomainEvent::VotesMigrated {
                survivor: survivor.to_string(),
                loser: loser.to_string(),
                events: touched.len(),
            }
            .log();
        }
        Ok(())
    }

    fn conflict(&self, identity: IdentityId, linked: &AccountId, requested: &AccountId) -> QuorumError {
        warn!(identity_id = %identity, "Irreconcilable account link");
        quorum_metrics::record_resolve("conflict");
        QuorumError::identity_conflict(linked, requested).with_context("identity_id", identity.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalate_keeps_strongest_step() {
        let a = IdentityId::new();
        let b = IdentityId::new();
        let attach = Reconciliation::AttachKey { identity: a };
        let merge = Reconciliation::Merge { survivor: b, loser: a };

        assert_eq!(Reconciliation::NoOp.escalate(attach.clone()), attach);
        assert_eq!(attach.clone().escalate(merge.clone()), merge);
        assert_eq!(merge.clone().escalate(Reconciliation::NoOp), merge);
    }

    #[test]
    fn test_decision_serializes_tagged() {
        let json = serde_json::to_value(Reconciliation::NoOp).unwrap();
        assert_eq!(json["decision"], "no_op");
    }
}
