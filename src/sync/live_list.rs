//! Live list: the view-facing synchronization primitive.
//!
//! Mounting a `LiveList` on a scope opens the scope's channel, loads the
//! list, and spawns one consumer task that owns the cache. The consumer
//! selects over channel changes and refetch completions, runs each change
//! through the [`Reconciler`], and publishes a [`Snapshot`] on a `watch`
//! channel after every mutation.
//!
//! Refetches run as separate tasks and report back to the consumer, which
//! applies results in the order they *resolve*. There is no sequencing
//! guard: when two refetches race, the one that resolves last wins even if
//! it was issued first. In-flight refetches are not cancelled on unmount.
//!
//! Every mount starts a new generation. A consumer publishes under the
//! generation it was spawned with, and the publisher rejects snapshots and
//! toasts from any generation but the current one, so a consumer that is
//! still running after its abort was requested cannot overwrite the next
//! scope's list.
//!
//! A cache only ever holds rows of its own scope: a change whose new row
//! has left the scope removes the record, and single-record refetches are
//! filtered by scope.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc, watch};

use splitfair_common::{Record, RecordId, ScopeKey};

use super::cache::ListCache;
use super::change::ChangeEvent;
use super::manager::{SubscriptionManager, Switch};
use super::reconciler::{Reconciler, Reconciliation};
use crate::backend::{ChangeFeed, RawChange};
use crate::errors::{BackendError, SyncError};

/// Toasts buffered per list before slow listeners start missing them.
const TOAST_CAPACITY: usize = 16;

/// Where a live list loads its records from.
#[async_trait]
pub trait ListSource<R: Record>: Send + Sync {
    async fn fetch_all(&self, scope: &ScopeKey) -> Result<Vec<R>, BackendError>;

    async fn fetch_one(&self, scope: &ScopeKey, id: &RecordId) -> Result<R, BackendError>;
}

/// User-facing error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub scope: String,
    pub message: String,
}

/// What a view renders.
#[derive(Debug, Clone)]
pub struct Snapshot<R> {
    pub scope: Option<ScopeKey>,
    pub items: Vec<R>,
    pub unread: usize,
    /// Whether a channel is open for `scope`
    pub live: bool,
    /// Bumped on every publish
    pub version: u64,
}

impl<R> Snapshot<R> {
    fn empty() -> Self {
        Self {
            scope: None,
            items: Vec::new(),
            unread: 0,
            live: false,
            version: 0,
        }
    }
}

enum Refetched<R> {
    All {
        call: u64,
        result: Result<Vec<R>, BackendError>,
    },
    One {
        call: u64,
        id: RecordId,
        result: Result<R, BackendError>,
    },
}

/// Shared publishing state between the list and its consumer task.
#[derive(Clone)]
struct Publisher<R: Record> {
    reconciler: Arc<dyn Reconciler<R>>,
    snapshots: Arc<watch::Sender<Snapshot<R>>>,
    toasts: broadcast::Sender<Toast>,
    generation: Arc<AtomicU64>,
}

impl<R: Record> Publisher<R> {
    fn new(reconciler: Arc<dyn Reconciler<R>>) -> Self {
        let (snapshots, _) = watch::channel(Snapshot::empty());
        let (toasts, _) = broadcast::channel(TOAST_CAPACITY);
        Self {
            reconciler,
            snapshots: Arc::new(snapshots),
            toasts,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start a new generation, invalidating every earlier one.
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Publish a snapshot for `generation`. Returns false, leaving the
    /// current snapshot untouched, when `generation` is stale.
    fn publish(&self, generation: u64, scope: Option<&ScopeKey>, cache: &ListCache<R>, live: bool) -> bool {
        let unread = self.reconciler.unread(cache);
        let items = cache.to_vec();
        let scope = scope.cloned();
        // The generation is checked under the channel's write lock, so a
        // stale publish either lands before the new generation's first
        // snapshot or not at all.
        self.snapshots.send_if_modified(|current| {
            if !self.is_current(generation) {
                return false;
            }
            *current = Snapshot {
                scope,
                items,
                unread,
                live,
                version: current.version + 1,
            };
            true
        })
    }

    fn toast(&self, generation: u64, scope: &ScopeKey, message: String) {
        if !self.is_current(generation) {
            return;
        }
        // No listeners is fine; the error is logged by the caller.
        let _ = self.toasts.send(Toast {
            scope: scope.to_string(),
            message,
        });
    }

    fn admit_all(&self, records: Vec<R>) -> Vec<R> {
        records
            .into_iter()
            .filter(|r| self.reconciler.admit(r))
            .collect()
    }
}

struct Consumer<R: Record> {
    generation: u64,
    scope: ScopeKey,
    cache: ListCache<R>,
    source: Arc<dyn ListSource<R>>,
    publisher: Publisher<R>,
    next_call: u64,
    last_applied: u64,
    pending: usize,
    live: bool,
}

impl<R: Record> Consumer<R> {
    async fn run(mut self, mut changes: mpsc::Receiver<RawChange>) {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Refetched<R>>();
        loop {
            tokio::select! {
                change = changes.recv(), if self.live => match change {
                    Some(raw) => self.on_change(raw, &done_tx),
                    None => {
                        tracing::info!(scope = %self.scope, "channel ended");
                        self.live = false;
                        self.publish();
                        if self.pending == 0 {
                            break;
                        }
                    }
                },
                Some(done) = done_rx.recv() => {
                    self.on_refetched(done);
                    if !self.live && self.pending == 0 {
                        break;
                    }
                }
            }
        }
    }

    fn publish(&self) {
        if !self
            .publisher
            .publish(self.generation, Some(&self.scope), &self.cache, self.live)
        {
            tracing::debug!(scope = %self.scope, generation = self.generation, "stale consumer; snapshot dropped");
        }
    }

    fn on_change(&mut self, raw: RawChange, done: &mpsc::UnboundedSender<Refetched<R>>) {
        let kind = raw.kind;
        let event = match ChangeEvent::<R>::decode(raw) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(scope = %self.scope, error = %e, "dropping undecodable change");
                return;
            }
        };
        let id = event.id().clone();
        if !event.in_scope(&self.scope) {
            if self.cache.remove(&id).is_some() {
                tracing::debug!(scope = %self.scope, id = %id, "record left scope");
                self.publish();
            }
            return;
        }
        match self.publisher.reconciler.reconcile(&mut self.cache, event) {
            Reconciliation::Patched => {
                tracing::debug!(scope = %self.scope, kind = kind.as_str(), id = %id, "patched");
                self.publish();
            }
            Reconciliation::Ignored => {
                tracing::trace!(scope = %self.scope, kind = kind.as_str(), id = %id, "ignored");
            }
            Reconciliation::RefetchAll => self.spawn_refetch_all(done),
            Reconciliation::RefetchOne(id) => self.spawn_refetch_one(id, done),
        }
    }

    fn spawn_refetch_all(&mut self, done: &mpsc::UnboundedSender<Refetched<R>>) {
        self.next_call += 1;
        self.pending += 1;
        let call = self.next_call;
        let source = Arc::clone(&self.source);
        let scope = self.scope.clone();
        let done = done.clone();
        tracing::debug!(scope = %scope, call, "refetching list");
        tokio::spawn(async move {
            let result = source.fetch_all(&scope).await;
            if done.send(Refetched::All { call, result }).is_err() {
                tracing::debug!(scope = %scope, call, "refetch resolved after unmount; discarded");
            }
        });
    }

    fn spawn_refetch_one(&mut self, id: RecordId, done: &mpsc::UnboundedSender<Refetched<R>>) {
        self.next_call += 1;
        self.pending += 1;
        let call = self.next_call;
        let source = Arc::clone(&self.source);
        let scope = self.scope.clone();
        let done = done.clone();
        tracing::debug!(scope = %scope, call, id = %id, "refetching record");
        tokio::spawn(async move {
            let result = source.fetch_one(&scope, &id).await;
            if done.send(Refetched::One { call, id, result }).is_err() {
                tracing::debug!(scope = %scope, call, "refetch resolved after unmount; discarded");
            }
        });
    }

    fn on_refetched(&mut self, done: Refetched<R>) {
        self.pending = self.pending.saturating_sub(1);
        let call = match &done {
            Refetched::All { call, .. } | Refetched::One { call, .. } => *call,
        };
        if call < self.last_applied {
            tracing::debug!(
                scope = %self.scope,
                call,
                newer = self.last_applied,
                "older refetch resolved last; applying it"
            );
        }
        self.last_applied = call;

        match done {
            Refetched::All { result: Ok(records), .. } => {
                self.cache.replace_all(self.publisher.admit_all(records));
                self.publish();
            }
            Refetched::One { id, result: Ok(record), .. } => {
                let in_scope = record.scope_value() == Some(self.scope.value.as_str());
                if in_scope && self.publisher.reconciler.admit(&record) {
                    self.cache.upsert(record);
                } else {
                    self.cache.remove(&id);
                }
                self.publish();
            }
            Refetched::One {
                id,
                result: Err(BackendError::NotFound { .. }),
                ..
            } => {
                if self.cache.remove(&id).is_some() {
                    self.publish();
                }
            }
            Refetched::All { result: Err(source), .. } | Refetched::One { result: Err(source), .. } => {
                let err = SyncError::Refetch {
                    scope: self.scope.to_string(),
                    source,
                };
                tracing::warn!(error = %err, "refetch failed; keeping stale list");
                self.publisher.toast(self.generation, &self.scope, err.to_string());
            }
        }
    }
}

/// A live, reconciled list for one scope at a time.
pub struct LiveList<R: Record> {
    source: Arc<dyn ListSource<R>>,
    manager: SubscriptionManager,
    publisher: Publisher<R>,
}

impl<R: Record> LiveList<R> {
    pub fn new(
        source: Arc<dyn ListSource<R>>,
        feed: Arc<dyn ChangeFeed>,
        reconciler: Arc<dyn Reconciler<R>>,
    ) -> Self {
        Self {
            source,
            manager: SubscriptionManager::new(feed),
            publisher: Publisher::new(reconciler),
        }
    }

    /// Create and immediately mount on `scope`.
    pub async fn mount(
        source: Arc<dyn ListSource<R>>,
        feed: Arc<dyn ChangeFeed>,
        reconciler: Arc<dyn Reconciler<R>>,
        scope: ScopeKey,
    ) -> Self {
        let mut list = Self::new(source, feed, reconciler);
        list.set_scope(Some(scope)).await;
        list
    }

    pub fn watch(&self) -> watch::Receiver<Snapshot<R>> {
        self.publisher.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> Snapshot<R> {
        self.publisher.snapshots.borrow().clone()
    }

    pub fn toasts(&self) -> broadcast::Receiver<Toast> {
        self.publisher.toasts.subscribe()
    }

    pub fn scope(&self) -> Option<&ScopeKey> {
        self.manager.current_scope()
    }

    pub fn manager(&self) -> &SubscriptionManager {
        &self.manager
    }

    /// Move the list to `scope`.
    ///
    /// The previous channel and consumer are torn down first. The new
    /// channel is opened before the initial fetch so that changes landing
    /// during the fetch are buffered rather than lost. A failed fetch leaves
    /// an empty list and raises a toast; a failed subscribe leaves the
    /// fetched list in place without live updates.
    pub async fn set_scope(&mut self, scope: Option<ScopeKey>) {
        if scope.is_some() && self.manager.current_scope() == scope.as_ref() {
            return;
        }
        self.manager.teardown();
        let generation = self.publisher.next_generation();

        let Some(scope) = scope else {
            self.publisher.publish(generation, None, &ListCache::new(), false);
            return;
        };

        let changes = match self.manager.switch_to(Some(scope.clone())).await {
            Switch::Opened(changes) => Some(changes),
            Switch::Failed(_) | Switch::Closed | Switch::Unchanged => None,
        };

        let cache = match self.source.fetch_all(&scope).await {
            Ok(records) => ListCache::from_records(self.publisher.admit_all(records)),
            Err(source) => {
                let err = SyncError::InitialFetch {
                    scope: scope.to_string(),
                    source,
                };
                tracing::warn!(error = %err, "initial fetch failed");
                self.publisher.toast(generation, &scope, err.to_string());
                ListCache::new()
            }
        };

        let live = changes.is_some();
        self.publisher.publish(generation, Some(&scope), &cache, live);

        if let Some(changes) = changes {
            let consumer = Consumer {
                generation,
                scope,
                cache,
                source: Arc::clone(&self.source),
                publisher: self.publisher.clone(),
                next_call: 0,
                last_applied: 0,
                pending: 0,
                live: true,
            };
            let task = tokio::spawn(consumer.run(changes));
            self.manager.attach_consumer(task);
        }
    }

    /// Tear down the channel and consumer. Also happens on drop.
    pub fn unmount(&mut self) {
        self.manager.teardown();
        self.publisher.next_generation();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, Query, RecordStore};
    use crate::sync::reconciler::NotificationReconciler;
    use serde_json::json;
    use splitfair_common::{Notification, Resource, UserId};
    use std::time::Duration;

    struct MemorySource(MemoryBackend);

    #[async_trait]
    impl ListSource<Notification> for MemorySource {
        async fn fetch_all(&self, scope: &ScopeKey) -> Result<Vec<Notification>, BackendError> {
            let rows = self
                .0
                .select(Query::table("notifications").filter(crate::backend::Filter::eq("home_id", scope.value.clone())))
                .await?;
            rows.into_iter()
                .map(|r| {
                    serde_json::from_value(r).map_err(|e| BackendError::Decode {
                        table: "notifications".to_string(),
                        source: e,
                    })
                })
                .collect()
        }

        async fn fetch_one(&self, scope: &ScopeKey, id: &RecordId) -> Result<Notification, BackendError> {
            let query = Query::table("notifications").filter(crate::backend::Filter::eq("home_id", scope.value.clone()));
            let row = self.0.select_one(query, id.as_str()).await?;
            serde_json::from_value(row).map_err(|e| BackendError::Decode {
                table: "notifications".to_string(),
                source: e,
            })
        }
    }

    async fn mount(backend: &MemoryBackend) -> LiveList<Notification> {
        LiveList::mount(
            Arc::new(MemorySource(backend.clone())),
            Arc::new(backend.clone()),
            Arc::new(NotificationReconciler::new(UserId::from("userA"))),
            ScopeKey::new(Resource::Notifications, "h1"),
        )
        .await
    }

    #[tokio::test]
    async fn test_mount_loads_and_patches_live() {
        let backend = MemoryBackend::new();
        backend
            .seed(
                "notifications",
                vec![json!({"id": "n0", "home_id": "h1", "user_id": "userB", "created_at": "2024-01-01T00:00:00Z"})],
            )
            .unwrap();
        let list = mount(&backend).await;
        let snapshot = list.snapshot();
        assert!(snapshot.live);
        assert!(snapshot.items.is_empty(), "other user's notification is not admitted");

        let mut rx = list.watch();
        backend
            .insert(
                "notifications",
                json!({"id": "n1", "home_id": "h1", "user_id": null, "created_at": "2024-01-02T00:00:00Z"}),
            )
            .await
            .unwrap();
        let snapshot = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.unread == 1))
            .await
            .unwrap()
            .unwrap()
            .clone();
        assert_eq!(snapshot.items.len(), 1);
    }

    #[tokio::test]
    async fn test_initial_fetch_failure_toasts_and_starts_empty() {
        let backend = MemoryBackend::new();
        backend.set_fetch_failure(Some("offline")).unwrap();
        let mut list = LiveList::new(
            Arc::new(MemorySource(backend.clone())),
            Arc::new(backend.clone()),
            Arc::new(NotificationReconciler::new(UserId::from("userA"))),
        );
        let mut toasts = list.toasts();
        list.set_scope(Some(ScopeKey::new(Resource::Notifications, "h1"))).await;
        let toast = toasts.recv().await.unwrap();
        assert!(toast.message.contains("offline"));
        assert_eq!(toast.scope, "notifications:h1");
        assert!(list.snapshot().items.is_empty());
    }

    #[tokio::test]
    async fn test_unmount_closes_channel() {
        let backend = MemoryBackend::new();
        let mut list = mount(&backend).await;
        assert_eq!(backend.open_channels("notifications").unwrap(), 1);
        list.unmount();
        assert_eq!(backend.open_channels("notifications").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_scope_none_clears_snapshot() {
        let backend = MemoryBackend::new();
        let mut list = mount(&backend).await;
        list.set_scope(None).await;
        let snapshot = list.snapshot();
        assert!(snapshot.scope.is_none());
        assert!(!snapshot.live);
        assert_eq!(backend.open_channels("notifications").unwrap(), 0);
    }

    fn publisher() -> Publisher<Notification> {
        Publisher::new(Arc::new(NotificationReconciler::new(UserId::from("userA"))))
    }

    #[tokio::test]
    async fn test_stale_generation_cannot_publish_or_toast() {
        let publisher = publisher();
        let mut toasts = publisher.toasts.subscribe();
        let old_scope = ScopeKey::new(Resource::Notifications, "h1");
        let new_scope = ScopeKey::new(Resource::Notifications, "h2");
        let old = publisher.next_generation();
        let new = publisher.next_generation();

        assert!(publisher.publish(new, Some(&new_scope), &ListCache::new(), true));
        assert!(!publisher.publish(old, Some(&old_scope), &ListCache::new(), true));
        let snapshot = publisher.snapshots.borrow().clone();
        assert_eq!(snapshot.scope, Some(new_scope.clone()));
        assert_eq!(snapshot.version, 1);

        publisher.toast(old, &old_scope, "old".to_string());
        publisher.toast(new, &new_scope, "new".to_string());
        assert_eq!(toasts.try_recv().unwrap().message, "new");
        assert!(toasts.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publishes_bump_version_once_each() {
        let publisher = publisher();
        let generation = publisher.next_generation();
        let scope = ScopeKey::new(Resource::Notifications, "h1");
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let publisher = publisher.clone();
                let scope = scope.clone();
                tokio::spawn(async move {
                    for _ in 0..50 {
                        publisher.publish(generation, Some(&scope), &ListCache::new(), true);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(publisher.snapshots.borrow().version, 400);
    }

    #[tokio::test]
    async fn test_scope_change_fences_off_previous_consumer() {
        let backend = MemoryBackend::new();
        let mut list = mount(&backend).await;
        let previous = list.publisher.clone();
        let previous_generation = previous.generation.load(Ordering::SeqCst);

        let next = ScopeKey::new(Resource::Notifications, "h2");
        list.set_scope(Some(next.clone())).await;
        let version = list.snapshot().version;

        // A consumer from the first mount that is still running publishes late.
        let old_scope = ScopeKey::new(Resource::Notifications, "h1");
        assert!(!previous.publish(previous_generation, Some(&old_scope), &ListCache::new(), true));
        let snapshot = list.snapshot();
        assert_eq!(snapshot.scope, Some(next));
        assert_eq!(snapshot.version, version);
    }

    #[tokio::test]
    async fn test_unmount_fences_off_consumer() {
        let backend = MemoryBackend::new();
        let mut list = mount(&backend).await;
        let generation = list.publisher.generation.load(Ordering::SeqCst);
        list.unmount();
        let scope = ScopeKey::new(Resource::Notifications, "h1");
        assert!(!list.publisher.publish(generation, Some(&scope), &ListCache::new(), true));
    }
}
