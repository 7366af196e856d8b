//! Fail-open helpers for graceful degradation
//!
//! Some work is optional: the activity log, remote tool discovery, thread
//! cleanup. Failures there are logged and swallowed so the planning run
//! keeps going.
//!
//! Never use these for:
//! - Reasoning calls or tool execution (business logic)
//! - Checkpoint writes (resumability depends on them)
//! - State merges (correctness)

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::Result;

/// Run an optional operation, returning `None` on failure
///
/// The error is logged via `tracing::warn!`.
///
/// ```no_run
/// use scrumflow_core::fail_open::fail_open;
/// use scrumflow_core::Result;
///
/// async fn append_activity() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     // None if append_activity() failed
///     let _logged = fail_open("activity_logger", || append_activity()).await;
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}

/// Like [`fail_open`], retrying transient failures up to `attempts` times
///
/// Only [`ScrumError::is_transient`](crate::ScrumError::is_transient) errors
/// are retried, after `100ms * attempt`. Anything else gives up at once.
///
/// ```no_run
/// use scrumflow_core::fail_open::fail_open_retrying;
/// use scrumflow_core::Result;
///
/// async fn list_remote_tools() -> Result<Vec<String>> {
///     Ok(vec!["create_task".to_string()])
/// }
///
/// async fn example() {
///     let tools = fail_open_retrying("tool_discovery", 3, || list_remote_tools()).await;
///     let _ = tools.unwrap_or_default();
/// }
/// ```
pub async fn fail_open_retrying<F, Fut, T>(operation_name: &str, attempts: usize, mut f: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(val) => return Some(val),
            Err(e) if e.is_transient() && attempt < attempts => {
                debug!(
                    "{} failed (attempt {}/{}), retrying: {}",
                    operation_name, attempt, attempts, e
                );
                tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(
                    "{} failed after {} attempt(s) (fail-open): {}",
                    operation_name, attempt, e
                );
                return None;
            }
        }
    }
}
