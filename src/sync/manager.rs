//! Subscription lifecycle.
//!
//! A `SubscriptionManager` belongs to one view and holds at most one live
//! channel. Switching scope closes the previous channel before the next one
//! is opened, and the channel is closed on teardown or drop whatever the
//! reason the view goes away.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use splitfair_common::ScopeKey;

use crate::backend::{ChangeFeed, ChannelHandle, EventMask, Filter, RawChange, SubscribeRequest};
use crate::errors::SyncError;

struct ActiveChannel {
    scope: ScopeKey,
    handle: ChannelHandle,
    consumer: Option<JoinHandle<()>>,
}

/// Result of [`SubscriptionManager::switch_to`].
#[derive(Debug)]
pub enum Switch {
    /// Already subscribed to this scope.
    Unchanged,
    /// A new channel is open; the receiver delivers its changes.
    Opened(mpsc::Receiver<RawChange>),
    /// No scope; any previous channel was closed.
    Closed,
    /// Opening failed. Nothing is open and no retry is scheduled.
    Failed(SyncError),
}

pub struct SubscriptionManager {
    feed: Arc<dyn ChangeFeed>,
    mask: EventMask,
    active: Option<ActiveChannel>,
    opened: usize,
    closed: usize,
}

impl SubscriptionManager {
    pub fn new(feed: Arc<dyn ChangeFeed>) -> Self {
        Self::with_mask(feed, EventMask::all())
    }

    pub fn with_mask(feed: Arc<dyn ChangeFeed>, mask: EventMask) -> Self {
        Self {
            feed,
            mask,
            active: None,
            opened: 0,
            closed: 0,
        }
    }

    pub fn current_scope(&self) -> Option<&ScopeKey> {
        self.active.as_ref().map(|a| &a.scope)
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    /// Channels this manager has opened.
    pub fn opened(&self) -> usize {
        self.opened
    }

    /// Channels this manager has closed.
    pub fn closed(&self) -> usize {
        self.closed
    }

    /// Point the manager at `scope`.
    ///
    /// Same scope: nothing happens. Different scope: the old channel is
    /// closed first, then a new one is opened. `None`: the old channel is
    /// closed and nothing is opened.
    pub async fn switch_to(&mut self, scope: Option<ScopeKey>) -> Switch {
        let Some(scope) = scope else {
            self.teardown();
            return Switch::Closed;
        };
        if self.current_scope() == Some(&scope) {
            return Switch::Unchanged;
        }
        self.teardown();

        let request = SubscribeRequest {
            table: scope.resource.table().to_string(),
            filter: Filter::eq(scope.resource.scope_column(), scope.value.clone()),
            mask: self.mask,
        };
        match self.feed.subscribe(request).await {
            Ok(mut handle) => {
                let Some(events) = handle.take_events() else {
                    tracing::warn!(scope = %scope, "channel opened without an event stream");
                    return Switch::Failed(SyncError::ChangeDecode {
                        table: scope.resource.table().to_string(),
                        message: "channel has no event stream".to_string(),
                    });
                };
                self.opened += 1;
                tracing::debug!(scope = %scope, channel = handle.id(), "subscribed");
                self.active = Some(ActiveChannel {
                    scope,
                    handle,
                    consumer: None,
                });
                Switch::Opened(events)
            }
            Err(source) => {
                tracing::warn!(scope = %scope, error = %source, "failed to open channel; keeping last known list");
                Switch::Failed(SyncError::Subscribe {
                    scope: scope.to_string(),
                    source,
                })
            }
        }
    }

    /// Tie a consumer task to the active channel so it stops with it.
    pub fn attach_consumer(&mut self, consumer: JoinHandle<()>) {
        match &mut self.active {
            Some(active) => {
                if let Some(previous) = active.consumer.replace(consumer) {
                    previous.abort();
                }
            }
            None => consumer.abort(),
        }
    }

    /// Close the active channel, if any. Idempotent.
    pub fn teardown(&mut self) {
        if let Some(mut active) = self.active.take() {
            if let Some(consumer) = active.consumer.take() {
                consumer.abort();
            }
            if !active.handle.is_closed() {
                active.handle.close();
                self.closed += 1;
            }
            tracing::debug!(scope = %active.scope, "unsubscribed");
        }
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use splitfair_common::Resource;

    fn events(home: &str) -> Option<ScopeKey> {
        Some(ScopeKey::new(Resource::Events, home))
    }

    #[tokio::test]
    async fn test_same_scope_is_unchanged() {
        let backend = MemoryBackend::new();
        let mut manager = SubscriptionManager::new(Arc::new(backend.clone()));
        assert!(matches!(manager.switch_to(events("h1")).await, Switch::Opened(_)));
        assert!(matches!(manager.switch_to(events("h1")).await, Switch::Unchanged));
        assert_eq!(backend.stats().unwrap().opened, 1);
    }

    #[tokio::test]
    async fn test_switch_closes_previous_first() {
        let backend = MemoryBackend::new();
        let mut manager = SubscriptionManager::new(Arc::new(backend.clone()));
        for home in ["h1", "h2", "h1"] {
            assert!(matches!(manager.switch_to(events(home)).await, Switch::Opened(_)));
            assert_eq!(backend.open_scopes("events").unwrap(), vec![home.to_string()]);
        }
        let stats = backend.stats().unwrap();
        assert_eq!(stats.peak_open["events"], 1);
        assert_eq!(stats.opened, 3);
        assert_eq!(stats.closed, 2);
    }

    #[tokio::test]
    async fn test_none_scope_closes() {
        let backend = MemoryBackend::new();
        let mut manager = SubscriptionManager::new(Arc::new(backend.clone()));
        manager.switch_to(events("h1")).await;
        assert!(matches!(manager.switch_to(None).await, Switch::Closed));
        assert!(!manager.is_open());
        assert_eq!(backend.open_channels("events").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_open_leaves_nothing_open_and_does_not_retry() {
        let backend = MemoryBackend::new();
        let mut manager = SubscriptionManager::new(Arc::new(backend.clone()));
        manager.switch_to(events("h1")).await;
        backend.fail_next_subscribes(1).unwrap();
        assert!(matches!(manager.switch_to(events("h2")).await, Switch::Failed(_)));
        assert!(manager.current_scope().is_none());
        assert_eq!(backend.open_channels("events").unwrap(), 0);
        let stats = backend.stats().unwrap();
        assert_eq!(stats.opened, 1);
        assert_eq!(stats.closed, 1);
    }

    #[tokio::test]
    async fn test_drop_closes_channel_and_aborts_consumer() {
        let backend = MemoryBackend::new();
        let mut manager = SubscriptionManager::new(Arc::new(backend.clone()));
        manager.switch_to(events("h1")).await;
        let (alive_tx, alive_rx) = tokio::sync::oneshot::channel::<()>();
        let consumer = tokio::spawn(async move {
            let _alive = alive_tx;
            std::future::pending::<()>().await
        });
        manager.attach_consumer(consumer);
        drop(manager);
        assert_eq!(backend.open_channels("events").unwrap(), 0);
        // The sender is dropped only when the aborted task is torn down.
        assert!(alive_rx.await.is_err());
    }

    #[tokio::test]
    async fn test_counts_match_after_lifecycle() {
        let backend = MemoryBackend::new();
        let mut manager = SubscriptionManager::new(Arc::new(backend.clone()));
        manager.switch_to(events("a")).await;
        manager.switch_to(events("b")).await;
        manager.teardown();
        manager.teardown();
        assert_eq!(manager.opened(), 2);
        assert_eq!(manager.closed(), 2);
    }
}
