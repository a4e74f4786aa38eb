//! Event code allocation.
//!
//! Codes are short base62 strings drawn at random. The pre-insert existence check is only
//! a hint: two creators can draw the same code concurrently, so the store's uniqueness
//! constraint decides. A rejected insert counts as one more collision and the allocator
//! draws again, up to `max_attempts` draws in total.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

use super::store::{EventStore, InsertOutcome};
use super::{Event, PendingEvent};
use crate::config::AllocatorConfig;
use crate::error::{QuorumError, Result};
use crate::store::bounded;
use crate::telemetry::{metrics as quorum_metrics, DomainEvent};

/// Characters a code may contain.
pub const CODE_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Length bounds for explicitly requested codes.
pub const MIN_VANITY_LEN: usize = 3;
pub const MAX_VANITY_LEN: usize = 32;

/// A short, shareable event code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventCode(String);

impl EventCode {
    /// Validate a caller-supplied code.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let len = raw.chars().count();
        if !(MIN_VANITY_LEN..=MAX_VANITY_LEN).contains(&len) {
            return Err(QuorumError::validation(format!(
                "Event code must be between {} and {} characters",
                MIN_VANITY_LEN, MAX_VANITY_LEN
            )));
        }
        if !raw.bytes().all(|b| CODE_ALPHABET.contains(&b)) {
            return Err(QuorumError::validation(
                "Event code may only contain letters and digits",
            ));
        }
        Ok(Self(raw.to_string()))
    }

    /// Wrap a code produced by a [`CodeSource`]. Used by stores when loading rows.
    pub fn from_trusted(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of candidate codes.
pub trait CodeSource: Send + Sync {
    fn next_code(&self, length: usize) -> EventCode;
}

/// Uniform random codes over [`CODE_ALPHABET`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCodes;

impl CodeSource for RandomCodes {
    fn next_code(&self, length: usize) -> EventCode {
        let mut rng = rand::thread_rng();
        let code: String = (0..length)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        EventCode(code)
    }
}

/// Assigns a unique code to every event at creation.
#[derive(Clone)]
pub struct CodeAllocator {
    config: AllocatorConfig,
    source: Arc<dyn CodeSource>,
    timeout: Duration,
}

impl fmt::Debug for CodeAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeAllocator")
            .field("config", &self.config)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl CodeAllocator {
    pub fn new(config: AllocatorConfig, timeout: Duration) -> Self {
        Self::with_source(config, timeout, Arc::new(RandomCodes))
    }

    pub fn with_source(config: AllocatorConfig, timeout: Duration, source: Arc<dyn CodeSource>) -> Self {
        Self {
            config,
            source,
            timeout,
        }
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Ensure `pending` carries a code.
    ///
    /// An event that already has a code (vanity or previously allocated) is left as is.
    /// Otherwise draws candidates until one is not visible in the store.
    pub async fn allocate(&self, store: &dyn EventStore, pending: &mut PendingEvent) -> Result<EventCode> {
        if let Some(code) = &pending.code {
            return Ok(code.clone());
        }
        let mut draws = 0;
        let code = self.draw_unused(store, &mut draws).await?;
        pending.code = Some(code.clone());
        Ok(code)
    }

    /// Allocate a code and persist the event.
    ///
    /// A vanity code is checked for uniqueness and used as is; a clash surfaces as
    /// `DuplicateCode`. Generated codes are redrawn on any collision, including one
    /// reported by the store at insert time.
    #[instrument(skip(self, store, pending), fields(event_id = %pending.id, store = store.name()))]
    pub async fn persist(&self, store: &dyn EventStore, mut pending: PendingEvent) -> Result<Event> {
        if let Some(code) = pending.code.clone() {
            if bounded(self.timeout, "code_exists", store.code_exists(&code)).await? {
                return Err(QuorumError::duplicate_code(&code));
            }
            return match bounded(self.timeout, "insert_event", store.insert_event(pending.to_event()?)).await? {
                InsertOutcome::Inserted(event) => Ok(event),
                InsertOutcome::CodeTaken => Err(QuorumError::duplicate_code(&code)),
            };
        }

        let mut draws = 0;
        loop {
            let code = self.draw_unused(store, &mut draws).await?;
            pending.code = Some(code.clone());

            match bounded(self.timeout, "insert_event", store.insert_event(pending.to_event()?)).await? {
                InsertOutcome::Inserted(event) => {
                    debug!(code = %code, draws, "Event code allocated");
                    return Ok(event);
                }
                InsertOutcome::CodeTaken => {
                    quorum_metrics::record_code_collision("insert");
                    DomainEvent::CodeCollision {
                        code: code.to_string(),
                        stage: "insert",
                        draws,
                    }
                    .log();
                    pending.code = None;
                }
            }
        }
    }

    async fn draw_unused(&self, store: &dyn EventStore, draws: &mut u32) -> Result<EventCode> {
        while *draws < self.config.max_attempts {
            *draws += 1;
            let candidate = self.source.next_code(self.config.code_length);
            if !bounded(self.timeout, "code_exists", store.code_exists(&candidate)).await? {
                return Ok(candidate);
            }
            quorum_metrics::record_code_collision("precheck");
            warn!(code = %candidate, draws = *draws, "Event code collision");
        }

        error!(
            draws = *draws,
            code_length = self.config.code_length,
            "Event code space exhausted"
        );
        Err(QuorumError::code_space_exhausted(*draws, self.config.code_length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_codes_use_alphabet_and_length() {
        let source = RandomCodes;
        for _ in 0..100 {
            let code = source.next_code(8);
            assert_eq!(code.as_str().len(), 8);
            assert!(code.as_str().bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_parse_vanity_code() {
        assert_eq!(EventCode::parse(" launch2024 ").unwrap().as_str(), "launch2024");
        assert!(EventCode::parse("ab").is_err());
        assert!(EventCode::parse("has space").is_err());
        assert!(EventCode::parse("dash-code").is_err());
        assert!(EventCode::parse(&"a".repeat(MAX_VANITY_LEN + 1)).is_err());
    }

    #[test]
    fn test_alphabet_is_base62() {
        assert_eq!(CODE_ALPHABET.len(), 62);
    }
}
