//! Deadline races.
//!
//! The raced operation runs as its own task. When the deadline wins, the
//! caller stops waiting but the task keeps running; its eventual result can
//! still be collected through the returned handle, or is simply discarded.

use std::future::Future;
use std::time::Duration;

use intentmesh_core::{MeshError, MeshResult};
use tokio::task::JoinHandle;
use tracing::warn;

/// Outcome of [`race`].
pub enum Raced<T> {
    /// The operation settled before the deadline.
    Settled(MeshResult<T>),
    /// The deadline passed first. The operation is still running.
    Abandoned(JoinHandle<MeshResult<T>>),
}

/// Run `fut` against `deadline` without cancelling it on expiry.
pub async fn race<T, F>(deadline: Duration, fut: F) -> Raced<T>
where
    F: Future<Output = MeshResult<T>> + Send + 'static,
    T: Send + 'static,
{
    let mut handle = tokio::spawn(fut);
    match tokio::time::timeout(deadline, &mut handle).await {
        Ok(joined) => Raced::Settled(flatten(joined)),
        Err(_) => Raced::Abandoned(handle),
    }
}

/// Like [`race`], but an expired deadline becomes [`MeshError::Timeout`].
pub async fn with_deadline<T, F>(operation: &str, deadline: Duration, fut: F) -> MeshResult<T>
where
    F: Future<Output = MeshResult<T>> + Send + 'static,
    T: Send + 'static,
{
    match race(deadline, fut).await {
        Raced::Settled(result) => result,
        Raced::Abandoned(_) => {
            warn!(
                operation,
                deadline_ms = deadline.as_millis() as u64,
                "deadline exceeded, abandoning operation"
            );
            Err(timeout_error(operation, deadline))
        }
    }
}

/// The error reported when `operation` misses `deadline`.
pub fn timeout_error(operation: &str, deadline: Duration) -> MeshError {
    MeshError::Timeout(format!(
        "{operation} did not complete within {}ms",
        deadline.as_millis()
    ))
}

/// Collapse a task join result into the task's own result.
pub fn flatten<T>(joined: Result<MeshResult<T>, tokio::task::JoinError>) -> MeshResult<T> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(MeshError::Task(e.to_string())),
    }
}
