//! Change event → cache mutation policies.
//!
//! | Reconciler               | Insert                 | Update (known id) | Update (unknown) | Delete        |
//! |--------------------------|------------------------|-------------------|------------------|---------------|
//! | `NotificationReconciler` | patch if visible       | patch             | ignore           | patch         |
//! | `EventReconciler`        | refetch all            | refetch one       | refetch all      | refetch all   |
//! | `RefetchReconciler`      | refetch all            | refetch all       | refetch all      | refetch all   |
//!
//! Changes whose new row has left the list's scope never reach a reconciler;
//! the live list drops the record itself.

use splitfair_common::{Notification, Record, RecordId, UserId};

use super::cache::ListCache;
use super::change::ChangeEvent;

/// What the reconciler did, or what it wants done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// The cache was mutated in place.
    Patched,
    /// Nothing to do (not visible to this viewer, or unknown id).
    Ignored,
    /// Reload the whole scope.
    RefetchAll,
    /// Reload one record and splice it in by id.
    RefetchOne(RecordId),
}

pub trait Reconciler<R: Record>: Send + Sync + 'static {
    fn reconcile(&self, cache: &mut ListCache<R>, event: ChangeEvent<R>) -> Reconciliation;

    /// Badge count shown alongside the list.
    fn unread(&self, _cache: &ListCache<R>) -> usize {
        0
    }

    /// Drop records this viewer should not see from a fetch result.
    fn admit(&self, _record: &R) -> bool {
        true
    }
}

/// Patches the per-user notification feed in place.
///
/// A notification is visible when it targets the viewer or is a broadcast
/// (no owning user).
#[derive(Debug, Clone)]
pub struct NotificationReconciler {
    viewer: UserId,
}

impl NotificationReconciler {
    pub fn new(viewer: UserId) -> Self {
        Self { viewer }
    }

    pub fn viewer(&self) -> &UserId {
        &self.viewer
    }
}

impl Reconciler<Notification> for NotificationReconciler {
    fn reconcile(
        &self,
        cache: &mut ListCache<Notification>,
        event: ChangeEvent<Notification>,
    ) -> Reconciliation {
        match event {
            ChangeEvent::Inserted(record) => {
                if !record.is_visible_to(&self.viewer) {
                    return Reconciliation::Ignored;
                }
                cache.upsert(record);
                Reconciliation::Patched
            }
            ChangeEvent::Updated { new, .. } => {
                if !cache.contains(new.id()) {
                    return Reconciliation::Ignored;
                }
                if new.is_visible_to(&self.viewer) {
                    cache.replace(new);
                } else {
                    cache.remove(&new.id);
                }
                Reconciliation::Patched
            }
            ChangeEvent::Deleted { id } => match cache.remove(&id) {
                Some(_) => Reconciliation::Patched,
                None => Reconciliation::Ignored,
            },
        }
    }

    fn unread(&self, cache: &ListCache<Notification>) -> usize {
        cache.iter().filter(|n| !n.is_read).count()
    }

    fn admit(&self, record: &Notification) -> bool {
        record.is_visible_to(&self.viewer)
    }
}

/// Refetches events rather than merging nested attendee lists. An update to
/// an event already in the list reloads just that event.
#[derive(Debug, Clone, Default)]
pub struct EventReconciler;

impl<R: Record> Reconciler<R> for EventReconciler {
    fn reconcile(&self, cache: &mut ListCache<R>, event: ChangeEvent<R>) -> Reconciliation {
        match event {
            ChangeEvent::Updated { new, .. } if cache.contains(new.id()) => {
                Reconciliation::RefetchOne(new.id().clone())
            }
            _ => Reconciliation::RefetchAll,
        }
    }
}

/// Reloads the whole scope on any change.
#[derive(Debug, Clone, Default)]
pub struct RefetchReconciler;

impl<R: Record> Reconciler<R> for RefetchReconciler {
    fn reconcile(&self, _cache: &mut ListCache<R>, _event: ChangeEvent<R>) -> Reconciliation {
        Reconciliation::RefetchAll
    }
}
