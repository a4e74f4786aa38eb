//! Store backends and the deadline wrapper every store call goes through.

pub mod memory;

pub use memory::MemoryStore;

use std::future::Future;
use std::time::Duration;

use crate::error::{QuorumError, Result};
use crate::telemetry::metrics::StoreTimer;

/// Run one store operation under a deadline.
///
/// An elapsed deadline is reported as `StoreTimeout` and never retried here. Dropping the
/// inner future abandons the call; each store primitive is atomic, so it has either been
/// applied in full or not at all.
pub async fn bounded<T, F>(timeout: Duration, operation: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let timer = StoreTimer::start(operation);
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => {
            timer.finish(result.is_ok());
            result
        }
        Err(elapsed) => {
            timer.finish(false);
            tracing::warn!(operation, timeout_ms = timeout.as_millis() as u64, "Store operation timed out");
            Err(QuorumError::from(elapsed).with_context("operation", operation))
        }
    }
}
