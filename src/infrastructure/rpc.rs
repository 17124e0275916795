use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::domain::DomainError;

type Reply<T> = oneshot::Sender<Result<T, DomainError>>;

/// Correlation table for request/response traffic over an async channel.
///
/// Each outbound request gets a locally increasing id; the reply slot is parked
/// here until a response with the same id arrives, the request times out, or
/// the peer goes away. Independent of payload shapes, so any worker protocol can
/// reuse it.
pub struct PendingRequests<T> {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, Reply<T>>>,
}

/// A registered request waiting for its reply.
pub struct PendingReply<T> {
    pub id: u64,
    rx: oneshot::Receiver<Result<T, DomainError>>,
}

impl<T> PendingRequests<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate an id and park a reply slot for it.
    pub fn register(&self) -> PendingReply<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.entries.lock().insert(id, tx);
        PendingReply { id, rx }
    }

    /// Complete request `id`. Returns false for unknown or already settled ids.
    pub fn resolve(&self, id: u64, result: Result<T, DomainError>) -> bool {
        match self.entries.lock().remove(&id) {
            Some(tx) => tx.send(result).is_ok(),
            None => {
                debug!(id, "Response for unknown or expired request");
                false
            }
        }
    }

    /// Forget request `id` without answering it.
    pub fn cancel(&self, id: u64) {
        self.entries.lock().remove(&id);
    }

    /// Reject every outstanding request with an error built by `make_err`.
    pub fn reject_all(&self, make_err: impl Fn() -> DomainError) -> usize {
        let drained: Vec<Reply<T>> = self.entries.lock().drain().map(|(_, tx)| tx).collect();
        let count = drained.len();
        for tx in drained {
            let _ = tx.send(Err(make_err()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Wait for the reply to `pending`, rejecting with a timeout error after `timeout`.
    pub async fn wait(
        &self,
        pending: PendingReply<T>,
        timeout: Duration,
        action: &str,
    ) -> Result<T, DomainError> {
        let PendingReply { id, rx } = pending;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped without an answer: the table was torn down.
            Ok(Err(_)) => Err(DomainError::CollectorExited),
            Err(_) => {
                self.cancel(id);
                Err(DomainError::CollectorTimeout {
                    action: action.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

impl<T> Default for PendingRequests<T> {
    fn default() -> Self {
        Self::new()
    }
}
