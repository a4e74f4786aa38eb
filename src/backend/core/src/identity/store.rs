//! Identity store boundary.
//!
//! Each method is one atomic step at the store. Ownership of a key is decided by the
//! store's uniqueness constraints, never by a read followed by a write in the caller.

use async_trait::async_trait;

use super::{AccountId, DeviceKey, Identity, IdentityId, SessionKey};
use crate::error::Result;

/// Result of a compare-and-create.
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    /// A new identity now owns both keys.
    Created(Identity),
    /// The device key was already owned; the session key was attached to its owner.
    AttachedToDevice(Identity),
    /// Another caller already claimed the session key. Nothing was written.
    Existing(Identity),
}

impl CreateOutcome {
    pub fn identity(&self) -> &Identity {
        match self {
            Self::Created(identity) | Self::AttachedToDevice(identity) | Self::Existing(identity) => identity,
        }
    }

    pub fn into_identity(self) -> Identity {
        match self {
            Self::Created(identity) | Self::AttachedToDevice(identity) | Self::Existing(identity) => identity,
        }
    }
}

/// Result of attaching keys to an identity.
#[derive(Debug, Clone)]
pub enum AttachOutcome {
    /// `changed` is false when the identity already owned every key offered.
    Attached { identity: Identity, changed: bool },
    /// The session key belongs to a different identity; nothing was written.
    AlreadyOwned(Identity),
}

/// Result of linking an account.
#[derive(Debug, Clone)]
pub enum LinkOutcome {
    Linked(Identity),
    /// The identity was already linked to this very account.
    AlreadyLinked(Identity),
    /// The identity is linked to a different account.
    ConflictingAccount(AccountId),
    /// Another identity owns the account.
    AccountTaken(Identity),
}

/// Result of a merge.
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    /// The loser is retired and its keys belong to the survivor.
    Merged { survivor: Identity },
    /// The loser was already retired into this survivor.
    AlreadyMerged { survivor: Identity },
    /// Both sides are linked to different accounts.
    Conflict {
        survivor_account: AccountId,
        loser_account: AccountId,
    },
}

/// Persistence for identities and their key indexes.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Live owner of a session key.
    async fn find_by_session(&self, session: &SessionKey) -> Result<Option<Identity>>;

    /// Live owner of a device key.
    async fn find_by_device(&self, device: &DeviceKey) -> Result<Option<Identity>>;

    /// Live owner of an account.
    async fn find_by_account(&self, account: &AccountId) -> Result<Option<Identity>>;

    /// Load an identity, following retired pointers to the live survivor.
    async fn get(&self, id: IdentityId) -> Result<Option<Identity>>;

    /// Compare-and-create keyed on the session key.
    ///
    /// If the session key is owned, returns its owner untouched. Otherwise, if the device
    /// key is owned, attaches the session key to that owner. Otherwise creates a fresh
    /// identity owning both keys.
    async fn create(&self, device: &DeviceKey, session: &SessionKey) -> Result<CreateOutcome>;

    /// Attach keys to the live head of `id`. The session key is claimed unless another
    /// identity owns it; the device key is claimed only when nobody owns it.
    async fn attach(&self, id: IdentityId, device: &DeviceKey, session: &SessionKey) -> Result<AttachOutcome>;

    /// Link an account to the live head of `id`.
    async fn link_account(&self, id: IdentityId, account: &AccountId) -> Result<LinkOutcome>;

    /// Retire `loser` into `survivor` in one atomic step: keys move, the account moves if
    /// the survivor has none, and the loser is marked retired with `votes_migrated = false`.
    async fn merge(&self, survivor: IdentityId, loser: IdentityId) -> Result<MergeOutcome>;

    /// Identities retired into `survivor` whose memberships have not been rewritten yet.
    async fn pending_migrations(&self, survivor: IdentityId) -> Result<Vec<IdentityId>>;

    /// Record that `loser`'s memberships now belong to its survivor.
    async fn complete_migration(&self, loser: IdentityId) -> Result<()>;

    /// Bump `last_seen_at`.
    async fn touch(&self, id: IdentityId) -> Result<()>;

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}
