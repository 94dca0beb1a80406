//! Durable FIFO of mutations that failed against the remote service.
//!
//! Operations are enqueued when a mutation hits a transient network failure
//! and replayed later in FIFO order. An operation leaves the queue only on
//! confirmed remote success, or when replay reports it permanently
//! unresolvable (target deleted or conflicted server-side).

use crate::remote::RemoteError;
use crate::storage::{KvStore, StorageError};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

/// Storage namespace for queued operations. Zero-padded sequence numbers
/// keep lexicographic key order equal to enqueue order.
const QUEUE_PREFIX: &str = "queue/";

/// Mutation kind of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Create,
    Update,
    Delete,
}

/// One deferred mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub id: Uuid,
    pub resource: String,
    pub kind: OpKind,
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
    pub enqueued_at: i64,
}

/// Executes one queued operation against the remote service during replay.
/// [`crate::MutationCoordinator`] implements this per resource.
#[async_trait]
pub trait ReplayExecutor: Send + Sync {
    async fn execute(&self, op: &QueuedOperation) -> std::result::Result<(), RemoteError>;
}

/// Outcome of one [`OfflineQueue::replay`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    /// Operations confirmed by the remote service and removed.
    pub completed: usize,
    /// Operations dropped because the remote reported them unresolvable.
    pub dropped: usize,
    /// Operations that failed transiently and stay queued.
    pub retained: usize,
}

/// Durable FIFO queue over a [`KvStore`].
pub struct OfflineQueue {
    store: Arc<dyn KvStore>,
    next_seq: Mutex<u64>,
}

impl OfflineQueue {
    /// Open the queue, resuming the sequence counter from persisted keys.
    pub fn open(store: Arc<dyn KvStore>) -> Result<Self> {
        let keys = store.keys_with_prefix(QUEUE_PREFIX)?;
        let next_seq = keys
            .last()
            .and_then(|k| k.strip_prefix(QUEUE_PREFIX))
            .and_then(|s| s.parse::<u64>().ok())
            .map(|seq| seq + 1)
            .unwrap_or(0);

        Ok(Self {
            store,
            next_seq: Mutex::new(next_seq),
        })
    }

    /// Append an operation to the tail, stamped with the enqueue time.
    pub fn enqueue(
        &self,
        resource: &str,
        kind: OpKind,
        target_id: Option<String>,
        payload: Option<Value>,
    ) -> Result<QueuedOperation> {
        let op = QueuedOperation {
            id: Uuid::new_v4(),
            resource: resource.to_string(),
            kind,
            target_id,
            payload,
            enqueued_at: chrono::Utc::now().timestamp(),
        };

        let raw = serde_json::to_vec(&op)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let mut seq = self
            .next_seq
            .lock()
            .map_err(|_| StorageError::LockPoisoned("offline queue".to_string()))?;
        self.store.set(&seq_key(*seq), &raw)?;
        *seq += 1;

        debug!(resource, op_id = %op.id, kind = ?op.kind, "mutation queued for replay");
        Ok(op)
    }

    /// Queued operations in FIFO order.
    pub fn operations(&self) -> Result<Vec<QueuedOperation>> {
        Ok(self.entries()?.into_iter().map(|(_, op)| op).collect())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.store.keys_with_prefix(QUEUE_PREFIX)?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Replay every queued operation in FIFO order.
    ///
    /// Successes are removed. Transient failures stay queued in their
    /// original relative order for the next pass. A `NotFound` or `Conflict`
    /// response means the target changed server-side while the operation
    /// waited; it is dropped with a notice instead of retrying forever. No
    /// backoff is applied within a pass; scheduling repeated passes is the
    /// caller's concern.
    pub async fn replay(&self, executor: &dyn ReplayExecutor) -> Result<ReplayReport> {
        let mut report = ReplayReport::default();

        for (key, op) in self.entries()? {
            match executor.execute(&op).await {
                Ok(()) => {
                    self.store.remove(&key)?;
                    report.completed += 1;
                }
                Err(RemoteError::NotFound(_)) | Err(RemoteError::Conflict(_)) => {
                    warn!(
                        resource = %op.resource,
                        op_id = %op.id,
                        "queued mutation no longer applies, dropping"
                    );
                    self.store.remove(&key)?;
                    report.dropped += 1;
                }
                Err(e) => {
                    debug!(op_id = %op.id, error = %e, "replay failed, keeping queued");
                    report.retained += 1;
                }
            }
        }

        debug!(?report, "replay pass finished");
        Ok(report)
    }

    fn entries(&self) -> Result<Vec<(String, QueuedOperation)>> {
        let mut entries = Vec::new();
        for key in self.store.keys_with_prefix(QUEUE_PREFIX)? {
            let Some(raw) = self.store.get(&key)? else {
                continue;
            };
            match serde_json::from_slice(&raw) {
                Ok(op) => entries.push((key, op)),
                Err(e) => {
                    // An unreadable record can never replay; discard it
                    warn!(key, error = %e, "dropping corrupt queue record");
                    self.store.remove(&key)?;
                }
            }
        }
        Ok(entries)
    }
}

fn seq_key(seq: u64) -> String {
    format!("{}{:020}", QUEUE_PREFIX, seq)
}
