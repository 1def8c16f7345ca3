//! Backend boundary.
//!
//! The hosted backend (storage, RPC, realtime change feed) is an external
//! collaborator. This module defines the contract the rest of the crate
//! consumes, plus two implementations:
//!
//! | Type            | Storage                      | Change feed |
//! |-----------------|------------------------------|-------------|
//! | `MemoryBackend` | in-process tables            | yes         |
//! | `RestStore`     | PostgREST over HTTP          | no          |
//!
//! Rows cross the boundary as JSON objects; typed decoding happens in
//! `crate::repo`.

pub mod memory;
pub mod rest;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

use crate::errors::BackendError;

pub use memory::{ChannelStats, MemoryBackend};
pub use rest::RestStore;

/// A row as stored by the backend: a JSON object.
pub type Row = serde_json::Value;

/// Equality filter on one column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Whether `row[column]` equals the filter value. Non-string scalars are
    /// compared by their JSON text, so `home_id = 7` matches `"7"`.
    pub fn matches(&self, row: &Row) -> bool {
        match row.get(&self.column) {
            Some(serde_json::Value::String(s)) => *s == self.value,
            Some(serde_json::Value::Null) | None => false,
            Some(other) => other.to_string() == self.value,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

/// Sort instruction for a select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// A select against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub table: String,
    /// PostgREST column list, including embedded relations
    pub columns: String,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: "*".to_string(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn columns(mut self, columns: impl Into<String>) -> Self {
        self.columns = columns.into();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.into(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Row-level change kinds a channel can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Insert,
    Update,
    Delete,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

/// Subset of [`EventKind`]s a subscription wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMask {
    pub insert: bool,
    pub update: bool,
    pub delete: bool,
}

impl EventMask {
    pub fn all() -> Self {
        Self {
            insert: true,
            update: true,
            delete: true,
        }
    }

    pub fn only(kinds: &[EventKind]) -> Self {
        let mut mask = Self {
            insert: false,
            update: false,
            delete: false,
        };
        for kind in kinds {
            match kind {
                EventKind::Insert => mask.insert = true,
                EventKind::Update => mask.update = true,
                EventKind::Delete => mask.delete = true,
            }
        }
        mask
    }

    pub fn contains(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::Insert => self.insert,
            EventKind::Update => self.update,
            EventKind::Delete => self.delete,
        }
    }
}

impl Default for EventMask {
    fn default() -> Self {
        Self::all()
    }
}

/// Push payload: `(event_type, old_record?, new_record?)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    pub table: String,
    pub kind: EventKind,
    pub old: Option<Row>,
    pub new: Option<Row>,
}

/// What to subscribe to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub table: String,
    pub filter: Filter,
    pub mask: EventMask,
}

/// Handle to an open live channel.
///
/// Owns the receiving end of the feed and the means to close it. `close`
/// is idempotent and also runs on drop, so a channel is released on every
/// exit path of its owner.
pub struct ChannelHandle {
    id: u64,
    table: String,
    events: Option<mpsc::Receiver<RawChange>>,
    closer: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ChannelHandle {
    pub fn new(
        id: u64,
        table: impl Into<String>,
        events: mpsc::Receiver<RawChange>,
        closer: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            table: table.into(),
            events: Some(events),
            closer: Some(Box::new(closer)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Take the event stream out of the handle so a consumer task can own
    /// it. Returns `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<RawChange>> {
        self.events.take()
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_none()
    }

    /// Terminate the feed. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(closer) = self.closer.take() {
            closer();
            tracing::debug!(channel = self.id, table = %self.table, "channel closed");
        }
        self.events = None;
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("id", &self.id)
            .field("table", &self.table)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Relational storage and RPC.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn select(&self, query: Query) -> Result<Vec<Row>, BackendError>;

    /// Fetch one row by its `id` column.
    async fn select_one(&self, query: Query, id: &str) -> Result<Row, BackendError>;

    async fn insert(&self, table: &str, row: Row) -> Result<Row, BackendError>;

    async fn update(&self, table: &str, id: &str, patch: Row) -> Result<Row, BackendError>;

    async fn delete(&self, table: &str, id: &str) -> Result<(), BackendError>;

    async fn rpc(&self, function: &str, args: Row) -> Result<Row, BackendError>;
}

/// Realtime change feed.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, request: SubscribeRequest) -> Result<ChannelHandle, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_filter_matches_string_and_number_columns() {
        let f = Filter::eq("home_id", "7");
        assert!(f.matches(&json!({"home_id": "7"})));
        assert!(f.matches(&json!({"home_id": 7})));
        assert!(!f.matches(&json!({"home_id": null})));
        assert!(!f.matches(&json!({"other": "7"})));
        assert_eq!(f.to_string(), "home_id=eq.7");
    }

    #[test]
    fn test_event_mask_only() {
        let mask = EventMask::only(&[EventKind::Insert, EventKind::Delete]);
        assert!(mask.contains(EventKind::Insert));
        assert!(!mask.contains(EventKind::Update));
        assert!(mask.contains(EventKind::Delete));
        assert!(EventMask::default().contains(EventKind::Update));
    }

    #[test]
    fn test_raw_change_kind_serializes_uppercase() {
        let change = RawChange {
            table: "events".to_string(),
            kind: EventKind::Update,
            old: None,
            new: Some(json!({"id": "e1"})),
        };
        let value = serde_json::to_value(&change).unwrap();
        assert_eq!(value["kind"], "UPDATE");
    }

    #[test]
    fn test_channel_handle_close_is_idempotent_and_runs_on_drop() {
        let closes = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = mpsc::channel(1);
        let counter = closes.clone();
        let mut handle = ChannelHandle::new(1, "events", rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle.close();
        handle.close();
        assert!(handle.is_closed());
        drop(handle);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        let (_tx, rx) = mpsc::channel(1);
        let counter = closes.clone();
        let handle = ChannelHandle::new(2, "events", rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(handle);
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_take_events_only_once() {
        let (_tx, rx) = mpsc::channel(1);
        let mut handle = ChannelHandle::new(1, "events", rx, || {});
        assert!(handle.take_events().is_some());
        assert!(handle.take_events().is_none());
    }

    #[test]
    fn test_query_builder() {
        let q = Query::table("events")
            .columns("*,attendees:event_attendees(*)")
            .filter(Filter::eq("home_id", "h1"))
            .order_by("event_date", true)
            .limit(50);
        assert_eq!(q.filters.len(), 1);
        assert_eq!(q.order.as_ref().unwrap().column, "event_date");
        assert_eq!(q.limit, Some(50));
    }
}
