//! Participant identities.
//!
//! A participant reaches the system through three kinds of keys:
//!
//! - **Device key**: long-lived, bound to a browser or device
//! - **Session key**: short-lived, bound to one browsing session
//! - **Account id**: present once the transport layer has authenticated the caller
//!
//! The [`Reconciler`] folds every combination of those keys into exactly one live
//! [`Identity`]. Identities are never deleted: a merged-away identity stays behind as a
//! retired pointer to its survivor so historical attribution keeps resolving.

pub mod reconciler;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

pub use reconciler::{Reconciler, Reconciliation, Resolution};
pub use store::{AttachOutcome, CreateOutcome, IdentityStore, LinkOutcome, MergeOutcome};

/// Unique identifier for a canonical identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(pub Uuid);

impl IdentityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for IdentityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

macro_rules! opaque_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

opaque_key!(
    /// Long-lived key bound to a browser or device.
    DeviceKey
);
opaque_key!(
    /// Short-lived key bound to one browsing session.
    SessionKey
);
opaque_key!(
    /// Registered account id, supplied by the authentication layer.
    AccountId
);

/// Lifecycle state of an identity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IdentityStatus {
    /// The identity is canonical and may own keys and votes.
    Live,
    /// The identity was merged away. It owns nothing and points at the survivor.
    Retired {
        survivor: IdentityId,
        /// Whether vote and participant memberships were rewritten to the survivor.
        votes_migrated: bool,
    },
}

/// Canonical participant record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub device_keys: BTreeSet<DeviceKey>,
    pub session_keys: BTreeSet<SessionKey>,
    /// Linked account. Once set it never changes.
    pub account: Option<AccountId>,
    pub status: IdentityStatus,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Identity {
    /// Create a fresh live identity owning one device key and one session key.
    pub fn new(device: DeviceKey, session: SessionKey) -> Self {
        let now = Utc::now();
        Self {
            id: IdentityId::new(),
            device_keys: BTreeSet::from([device]),
            session_keys: BTreeSet::from([session]),
            account: None,
            status: IdentityStatus::Live,
            created_at: now,
            last_seen_at: now,
        }
    }

    pub fn is_live(&self) -> bool {
        self.status == IdentityStatus::Live
    }

    /// Survivor this identity was merged into, if retired.
    pub fn survivor(&self) -> Option<IdentityId> {
        match self.status {
            IdentityStatus::Live => None,
            IdentityStatus::Retired { survivor, .. } => Some(survivor),
        }
    }

    pub fn owns_device(&self, device: &DeviceKey) -> bool {
        self.device_keys.contains(device)
    }

    pub fn owns_session(&self, session: &SessionKey) -> bool {
        self.session_keys.contains(session)
    }

    /// Read-only handle threaded through every attributed call.
    pub fn canonical(&self) -> CanonicalIdentity {
        CanonicalIdentity {
            id: self.id,
            account: self.account.clone(),
        }
    }
}

/// The reconciled identity handed to callers.
///
/// This value is the only voter key accepted by the vote engine; there is no ambient
/// per-request identity anywhere in the crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalIdentity {
    pub id: IdentityId,
    pub account: Option<AccountId>,
}

impl CanonicalIdentity {
    pub fn is_authenticated(&self) -> bool {
        self.account.is_some()
    }
}
