//! Optimistic mutations against one remote collection.
//!
//! Every mutation walks the same state machine: apply locally first
//! (optimistic pending), call the remote service, then either commit the
//! canonical server entity or roll the local state back to its snapshot
//! before returning. Local state is never left half-applied. Transient
//! network failures additionally land the mutation in the offline queue for
//! later replay; the error still reaches the caller so the UI can surface it.
//!
//! Remote confirmations may resolve out of caller order, so every response
//! is correlated to its originating mutation by entity id, never by
//! completion order.

use crate::cache::{cache_key, SyncCache};
use crate::queue::{OfflineQueue, OpKind, QueuedOperation, ReplayExecutor};
use crate::records::Record;
use crate::remote::{RemoteCollection, RemoteError};
use crate::storage::StorageError;
use crate::{LockspaceError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Prefix marking ids assigned locally before server confirmation.
pub const TEMP_ID_PREFIX: &str = "local-";

/// Default fast-tier TTL for list reads.
pub const DEFAULT_TTL_FAST: Duration = Duration::from_secs(60);

/// Default durable-tier TTL for list reads.
pub const DEFAULT_TTL_DURABLE: Duration = Duration::from_secs(300);

/// Coordinates optimistic create/update/delete for one entity kind.
pub struct MutationCoordinator<T: Record> {
    remote: Arc<dyn RemoteCollection>,
    cache: Arc<SyncCache>,
    queue: Arc<OfflineQueue>,
    state: Mutex<Vec<T>>,
    ttl_fast: Duration,
    ttl_durable: Duration,
}

impl<T: Record> MutationCoordinator<T> {
    pub fn new(
        remote: Arc<dyn RemoteCollection>,
        cache: Arc<SyncCache>,
        queue: Arc<OfflineQueue>,
    ) -> Self {
        Self {
            remote,
            cache,
            queue,
            state: Mutex::new(Vec::new()),
            ttl_fast: DEFAULT_TTL_FAST,
            ttl_durable: DEFAULT_TTL_DURABLE,
        }
    }

    /// Override the cache TTLs used by [`MutationCoordinator::list`].
    pub fn with_ttls(mut self, ttl_fast: Duration, ttl_durable: Duration) -> Self {
        self.ttl_fast = ttl_fast;
        self.ttl_durable = ttl_durable;
        self
    }

    /// Snapshot of the local entity list.
    pub fn entities(&self) -> Result<Vec<T>> {
        Ok(self.state_lock()?.clone())
    }

    /// Read the collection through the cache, hydrating local state.
    pub async fn list(&self, filter: &[(&str, &str)]) -> Result<Vec<T>> {
        let key = cache_key(T::RESOURCE, filter);
        let remote = Arc::clone(&self.remote);
        let filter_owned: Vec<(String, String)> = filter
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let items: Vec<T> = self
            .cache
            .get_or_fetch(&key, self.ttl_fast, self.ttl_durable, || async move {
                let values = remote.list(&filter_owned).await?;
                values.into_iter().map(decode::<T>).collect()
            })
            .await?;

        *self.state_lock()? = items.clone();
        Ok(items)
    }

    /// Create an entity optimistically.
    ///
    /// The payload appears in local state under a temporary id immediately;
    /// on success it is replaced by the canonical server entity, on failure
    /// it is removed. Transient failures enqueue the create for replay.
    pub async fn create(&self, mut payload: T) -> Result<T> {
        let temp_id = format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4());
        payload.set_id(temp_id.clone());
        self.state_lock()?.push(payload.clone());

        let body = wire_payload(&payload)?;
        match self.remote.create(&body).await {
            Ok(value) => match decode::<T>(value) {
                Ok(canonical) => {
                    self.replace_by_id(&temp_id, canonical.clone())?;
                    self.cache.invalidate(T::RESOURCE)?;
                    debug!(resource = T::RESOURCE, id = canonical.id(), "create committed");
                    Ok(canonical)
                }
                Err(e) => {
                    self.remove_by_id(&temp_id)?;
                    Err(e)
                }
            },
            Err(e) => {
                self.remove_by_id(&temp_id)?;
                if e.is_transient() {
                    warn!(resource = T::RESOURCE, error = %e, "create failed, queued for replay");
                    self.queue
                        .enqueue(T::RESOURCE, OpKind::Create, None, Some(body))?;
                }
                Err(e.into())
            }
        }
    }

    /// Update an entity optimistically.
    ///
    /// The prior entity is snapshotted and restored verbatim on failure.
    pub async fn update(&self, id: &str, mut payload: T) -> Result<T> {
        payload.set_id(id.to_string());

        let snapshot = {
            let mut state = self.state_lock()?;
            let Some(slot) = state.iter_mut().find(|e| e.id() == id) else {
                return Err(LockspaceError::NotFound(format!("{} {}", T::RESOURCE, id)));
            };
            let prior = slot.clone();
            *slot = payload.clone();
            prior
        };

        let body = encode(&payload)?;
        match self.remote.update(id, &body).await {
            Ok(value) => match decode::<T>(value) {
                Ok(canonical) => {
                    self.replace_by_id(id, canonical.clone())?;
                    self.cache.invalidate(T::RESOURCE)?;
                    debug!(resource = T::RESOURCE, id, "update committed");
                    Ok(canonical)
                }
                Err(e) => {
                    self.replace_by_id(id, snapshot)?;
                    Err(e)
                }
            },
            Err(e) => {
                self.replace_by_id(id, snapshot)?;
                if e.is_transient() {
                    warn!(resource = T::RESOURCE, id, error = %e, "update failed, queued for replay");
                    self.queue.enqueue(
                        T::RESOURCE,
                        OpKind::Update,
                        Some(id.to_string()),
                        Some(body),
                    )?;
                }
                Err(e.into())
            }
        }
    }

    /// Delete an entity optimistically.
    ///
    /// The entity is removed locally first and reinserted at its original
    /// position on failure.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let (index, snapshot) = {
            let mut state = self.state_lock()?;
            let Some(index) = state.iter().position(|e| e.id() == id) else {
                return Err(LockspaceError::NotFound(format!("{} {}", T::RESOURCE, id)));
            };
            (index, state.remove(index))
        };

        match self.remote.delete(id).await {
            Ok(()) => {
                self.cache.invalidate(T::RESOURCE)?;
                debug!(resource = T::RESOURCE, id, "delete committed");
                Ok(())
            }
            Err(e) => {
                {
                    let mut state = self.state_lock()?;
                    let index = index.min(state.len());
                    state.insert(index, snapshot);
                }
                if e.is_transient() {
                    warn!(resource = T::RESOURCE, id, error = %e, "delete failed, queued for replay");
                    self.queue
                        .enqueue(T::RESOURCE, OpKind::Delete, Some(id.to_string()), None)?;
                }
                Err(e.into())
            }
        }
    }

    fn state_lock(&self) -> Result<MutexGuard<'_, Vec<T>>> {
        Ok(self
            .state
            .lock()
            .map_err(|_| StorageError::LockPoisoned("coordinator state".to_string()))?)
    }

    fn replace_by_id(&self, id: &str, entity: T) -> Result<()> {
        let mut state = self.state_lock()?;
        if let Some(slot) = state.iter_mut().find(|e| e.id() == id) {
            *slot = entity;
        } else {
            state.push(entity);
        }
        Ok(())
    }

    fn remove_by_id(&self, id: &str) -> Result<()> {
        self.state_lock()?.retain(|e| e.id() != id);
        Ok(())
    }
}

/// Replay support: queued operations call the remote service directly, with
/// no optimistic phase and no re-enqueue (the queue itself decides retention
/// from the returned error).
#[async_trait]
impl<T: Record> ReplayExecutor for MutationCoordinator<T> {
    async fn execute(&self, op: &QueuedOperation) -> std::result::Result<(), RemoteError> {
        if op.resource != T::RESOURCE {
            return Err(RemoteError::Protocol(format!(
                "operation for '{}' routed to '{}' coordinator",
                op.resource,
                T::RESOURCE
            )));
        }

        match op.kind {
            OpKind::Create => {
                let payload = required_payload(op)?;
                let value = self.remote.create(payload).await?;
                if let Ok(canonical) = decode::<T>(value) {
                    let mut state = self.state_lock().map_err(into_remote)?;
                    if !state.iter().any(|e| e.id() == canonical.id()) {
                        state.push(canonical);
                    }
                }
            }
            OpKind::Update => {
                let id = required_target(op)?;
                let payload = required_payload(op)?;
                let value = self.remote.update(id, payload).await?;
                if let Ok(canonical) = decode::<T>(value) {
                    let mut state = self.state_lock().map_err(into_remote)?;
                    if let Some(slot) = state.iter_mut().find(|e| e.id() == id) {
                        *slot = canonical;
                    }
                }
            }
            OpKind::Delete => {
                let id = required_target(op)?;
                self.remote.delete(id).await?;
                self.state_lock().map_err(into_remote)?.retain(|e| e.id() != id);
            }
        }

        // The remote confirmed the mutation; a failed invalidation must not
        // keep the operation queued
        if let Err(e) = self.cache.invalidate(T::RESOURCE) {
            warn!(resource = T::RESOURCE, error = %e, "cache invalidation after replay failed");
        }
        Ok(())
    }
}

fn required_payload(op: &QueuedOperation) -> std::result::Result<&Value, RemoteError> {
    op.payload
        .as_ref()
        .ok_or_else(|| RemoteError::Protocol("queued operation is missing its payload".to_string()))
}

fn required_target(op: &QueuedOperation) -> std::result::Result<&str, RemoteError> {
    op.target_id
        .as_deref()
        .ok_or_else(|| RemoteError::Protocol("queued operation is missing its target id".to_string()))
}

fn into_remote(e: LockspaceError) -> RemoteError {
    RemoteError::Protocol(e.to_string())
}

fn encode<T: Record>(payload: &T) -> Result<Value> {
    Ok(serde_json::to_value(payload)
        .map_err(|e| StorageError::Serialization(e.to_string()))?)
}

/// Serialize a payload for `create`, clearing the local temp id so the
/// server assigns the canonical one.
fn wire_payload<T: Record>(payload: &T) -> Result<Value> {
    let mut clean = payload.clone();
    clean.set_id(String::new());
    encode(&clean)
}

fn decode<T: Record>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)
        .map_err(|e| StorageError::Serialization(e.to_string()))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::PasswordRecord;
    use crate::storage::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory stand-in for the remote collection. Each successful create
    /// assigns `srv-N`; failures are scripted one call at a time.
    struct MockRemote {
        next_failure: Mutex<Option<RemoteError>>,
        created: AtomicUsize,
        list_calls: AtomicUsize,
        list_result: Mutex<Vec<Value>>,
    }

    impl MockRemote {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                next_failure: Mutex::new(None),
                created: AtomicUsize::new(0),
                list_calls: AtomicUsize::new(0),
                list_result: Mutex::new(Vec::new()),
            })
        }

        fn fail_next(&self, error: RemoteError) {
            *self.next_failure.lock().unwrap() = Some(error);
        }

        fn take_failure(&self) -> Option<RemoteError> {
            self.next_failure.lock().unwrap().take()
        }
    }

    #[async_trait]
    impl RemoteCollection for MockRemote {
        async fn create(&self, payload: &Value) -> std::result::Result<Value, RemoteError> {
            if let Some(e) = self.take_failure() {
                return Err(e);
            }
            let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            let mut canonical = payload.clone();
            canonical["id"] = Value::String(format!("srv-{}", n));
            Ok(canonical)
        }

        async fn update(&self, id: &str, payload: &Value) -> std::result::Result<Value, RemoteError> {
            if let Some(e) = self.take_failure() {
                return Err(e);
            }
            let mut canonical = payload.clone();
            canonical["id"] = Value::String(id.to_string());
            Ok(canonical)
        }

        async fn delete(&self, _id: &str) -> std::result::Result<(), RemoteError> {
            match self.take_failure() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        async fn list(&self, _filter: &[(String, String)]) -> std::result::Result<Vec<Value>, RemoteError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.list_result.lock().unwrap().clone())
        }
    }

    struct Fixture {
        remote: Arc<MockRemote>,
        coordinator: MutationCoordinator<PasswordRecord>,
        queue: Arc<OfflineQueue>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::new();
        let cache = Arc::new(SyncCache::new(store.clone()));
        let queue = Arc::new(OfflineQueue::open(store).unwrap());
        let coordinator =
            MutationCoordinator::new(remote.clone(), cache, Arc::clone(&queue));
        Fixture {
            remote,
            coordinator,
            queue,
        }
    }

    fn password(title: &str) -> PasswordRecord {
        PasswordRecord {
            title: title.to_string(),
            ..Default::default()
        }
    }

    fn offline() -> RemoteError {
        RemoteError::Network("connection refused".to_string())
    }

    #[tokio::test]
    async fn test_create_commits_canonical_entity() {
        let f = fixture();
        let created = f.coordinator.create(password("mail")).await.unwrap();

        assert_eq!(created.id, "srv-1");
        let entities = f.coordinator.entities().unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].id, "srv-1");
        assert!(!entities[0].id.starts_with(TEMP_ID_PREFIX));
        assert!(f.queue.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_create_rollback_and_enqueue_on_network_failure() {
        let f = fixture();
        f.coordinator.create(password("existing")).await.unwrap();
        let before = f.coordinator.entities().unwrap().len();

        f.remote.fail_next(offline());
        let result = f.coordinator.create(password("unreachable")).await;

        assert!(result.is_err());
        // List length unchanged from before the failed call
        assert_eq!(f.coordinator.entities().unwrap().len(), before);
        // Exactly one new queue entry
        assert_eq!(f.queue.len().unwrap(), 1);
        let ops = f.queue.operations().unwrap();
        assert_eq!(ops[0].kind, OpKind::Create);
        assert_eq!(ops[0].resource, "passwords");
    }

    #[tokio::test]
    async fn test_create_validation_failure_is_not_enqueued() {
        let f = fixture();
        f.remote
            .fail_next(RemoteError::Protocol("422: title required".to_string()));

        assert!(f.coordinator.create(password("")).await.is_err());
        assert!(f.coordinator.entities().unwrap().is_empty());
        assert!(f.queue.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_update_commits_canonical_entity() {
        let f = fixture();
        let created = f.coordinator.create(password("mail")).await.unwrap();

        let mut edited = created.clone();
        edited.title = "mail (work)".to_string();
        let updated = f.coordinator.update(&created.id, edited).await.unwrap();

        assert_eq!(updated.title, "mail (work)");
        let entities = f.coordinator.entities().unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].title, "mail (work)");
    }

    #[tokio::test]
    async fn test_update_restores_snapshot_on_failure() {
        let f = fixture();
        let created = f.coordinator.create(password("mail")).await.unwrap();

        f.remote.fail_next(offline());
        let mut edited = created.clone();
        edited.title = "never lands".to_string();
        assert!(f.coordinator.update(&created.id, edited).await.is_err());

        let entities = f.coordinator.entities().unwrap();
        assert_eq!(entities[0].title, "mail");

        let ops = f.queue.operations().unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, OpKind::Update);
        assert_eq!(ops[0].target_id.as_deref(), Some(created.id.as_str()));
    }

    #[tokio::test]
    async fn test_update_unknown_id_is_not_found() {
        let f = fixture();
        let result = f.coordinator.update("missing", password("x")).await;
        assert!(matches!(result, Err(LockspaceError::NotFound(_))));
        assert!(f.queue.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_delete_restores_position_on_failure() {
        let f = fixture();
        f.coordinator.create(password("a")).await.unwrap();
        let b = f.coordinator.create(password("b")).await.unwrap();
        f.coordinator.create(password("c")).await.unwrap();

        f.remote.fail_next(offline());
        assert!(f.coordinator.delete(&b.id).await.is_err());

        let titles: Vec<_> = f
            .coordinator
            .entities()
            .unwrap()
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(titles, vec!["a", "b", "c"]);

        let ops = f.queue.operations().unwrap();
        assert_eq!(ops[0].kind, OpKind::Delete);
        assert_eq!(ops[0].target_id.as_deref(), Some(b.id.as_str()));
        assert_eq!(ops[0].payload, None);
    }

    #[tokio::test]
    async fn test_delete_success_removes_entity() {
        let f = fixture();
        let created = f.coordinator.create(password("gone")).await.unwrap();
        f.coordinator.delete(&created.id).await.unwrap();
        assert!(f.coordinator.entities().unwrap().is_empty());
        assert!(f.queue.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_list_reads_through_cache() {
        let f = fixture();
        *f.remote.list_result.lock().unwrap() = vec![
            serde_json::to_value(password("cached")).unwrap(),
        ];

        let first = f.coordinator.list(&[]).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(f.remote.list_calls.load(Ordering::SeqCst), 1);

        // Second read within the TTL is served from the cache
        let second = f.coordinator.list(&[]).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(f.remote.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mutation_invalidates_list_cache() {
        let f = fixture();
        f.coordinator.list(&[]).await.unwrap();
        assert_eq!(f.remote.list_calls.load(Ordering::SeqCst), 1);

        f.coordinator.create(password("new")).await.unwrap();

        f.coordinator.list(&[]).await.unwrap();
        assert_eq!(f.remote.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_queued_create_replays_into_state() {
        let f = fixture();

        f.remote.fail_next(offline());
        assert!(f.coordinator.create(password("deferred")).await.is_err());
        assert_eq!(f.queue.len().unwrap(), 1);

        // Connectivity is back; replay drains the queue into local state
        let report = f.queue.replay(&f.coordinator).await.unwrap();
        assert_eq!(report.completed, 1);
        assert!(f.queue.is_empty().unwrap());

        let entities = f.coordinator.entities().unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].title, "deferred");
        assert_eq!(entities[0].id, "srv-1");
    }

    #[tokio::test]
    async fn test_replay_keeps_op_queued_while_still_offline() {
        let f = fixture();

        f.remote.fail_next(offline());
        let _ = f.coordinator.create(password("deferred")).await;

        f.remote.fail_next(offline());
        let report = f.queue.replay(&f.coordinator).await.unwrap();
        assert_eq!(report.retained, 1);
        assert_eq!(f.queue.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_replay_rejects_foreign_resource() {
        let f = fixture();
        f.queue
            .enqueue("bills", OpKind::Delete, Some("b-1".to_string()), None)
            .unwrap();

        let report = f.queue.replay(&f.coordinator).await.unwrap();
        // Wrong coordinator: the operation stays queued for the right one
        assert_eq!(report.retained, 1);
        assert_eq!(f.queue.len().unwrap(), 1);
    }
}
