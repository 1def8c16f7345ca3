//! Realtime list synchronization.
//!
//! Data flows one way: the backend's change feed delivers raw changes to a
//! [`SubscriptionManager`]-owned channel, a [`LiveList`] consumer decodes
//! them into [`ChangeEvent`]s, a [`Reconciler`] turns each event into a
//! cache patch or a refetch, and the resulting [`Snapshot`] is published to
//! the view.

pub mod cache;
pub mod change;
pub mod live_list;
pub mod manager;
pub mod reconciler;

pub use cache::ListCache;
pub use change::ChangeEvent;
pub use live_list::{ListSource, LiveList, Snapshot, Toast};
pub use manager::{SubscriptionManager, Switch};
pub use reconciler::{
    EventReconciler, NotificationReconciler, Reconciler, Reconciliation, RefetchReconciler,
};
