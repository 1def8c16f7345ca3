//! In-process backend.
//!
//! `MemoryBackend` implements both [`RecordStore`] and [`ChangeFeed`] over
//! plain tables of JSON rows. Every mutation is pushed to open channels whose
//! table, filter and event mask match, the way the hosted realtime service
//! would. It also keeps channel accounting and can inject failures, which is
//! what the sync tests and the `demo` command rely on.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::{ChangeFeed, ChannelHandle, EventKind, Query, RawChange, RecordStore, Row, SubscribeRequest};
use crate::errors::BackendError;

/// Buffered changes per channel unless configured otherwise.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Channel accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Channels ever opened
    pub opened: usize,
    /// Channels ever closed
    pub closed: usize,
    /// Highest number of simultaneously open channels seen per table
    pub peak_open: HashMap<String, usize>,
}

struct Subscriber {
    request: SubscribeRequest,
    tx: mpsc::Sender<RawChange>,
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<String, Vec<Row>>,
    channels: HashMap<u64, Subscriber>,
    next_channel: u64,
    stats: ChannelStats,
    fetch_failure: Option<String>,
    subscribe_failures: usize,
    rpc_disabled: bool,
    denied_inserts: HashSet<String>,
}

impl MemoryState {
    fn open_on(&self, table: &str) -> usize {
        self.channels
            .values()
            .filter(|s| s.request.table == table)
            .count()
    }

    fn publish(&mut self, change: RawChange) {
        let mut delivered = 0usize;
        for (id, sub) in &self.channels {
            let request = &sub.request;
            if request.table != change.table || !request.mask.contains(change.kind) {
                continue;
            }
            let in_scope = change.new.as_ref().is_some_and(|r| request.filter.matches(r))
                || change.old.as_ref().is_some_and(|r| request.filter.matches(r));
            if !in_scope {
                continue;
            }
            match sub.tx.try_send(change.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(channel = id, table = %change.table, "channel buffer full, change dropped");
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
        tracing::trace!(table = %change.table, kind = change.kind.as_str(), delivered, "change published");
    }

    fn check_insert(&self, table: &str) -> Result<(), BackendError> {
        if self.denied_inserts.contains(table) {
            return Err(BackendError::Status {
                endpoint: format!("insert:{}", table),
                status: 403,
                body: "new row violates row-level security policy".to_string(),
            });
        }
        Ok(())
    }

    fn insert(&mut self, table: &str, row: Row) -> Result<Row, BackendError> {
        self.check_insert(table)?;
        let mut object = into_object(table, row)?;
        if !object.contains_key("id") {
            object.insert("id".to_string(), Value::String(uuid::Uuid::new_v4().to_string()));
        }
        let row = Value::Object(object);
        self.tables
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        self.publish(RawChange {
            table: table.to_string(),
            kind: EventKind::Insert,
            old: None,
            new: Some(row.clone()),
        });
        Ok(row)
    }

    fn update(&mut self, table: &str, id: &str, patch: Row) -> Result<Row, BackendError> {
        let patch = into_object(table, patch)?;
        let rows = self.tables.entry(table.to_string()).or_default();
        let row = rows
            .iter_mut()
            .find(|r| row_id(r) == Some(id))
            .ok_or_else(|| BackendError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            })?;
        let old = row.clone();
        if let Value::Object(fields) = row {
            for (key, value) in patch {
                fields.insert(key, value);
            }
        }
        let new = row.clone();
        self.publish(RawChange {
            table: table.to_string(),
            kind: EventKind::Update,
            old: Some(old),
            new: Some(new.clone()),
        });
        Ok(new)
    }

    fn delete(&mut self, table: &str, id: &str) -> Result<(), BackendError> {
        let rows = self.tables.entry(table.to_string()).or_default();
        let position = rows
            .iter()
            .position(|r| row_id(r) == Some(id))
            .ok_or_else(|| BackendError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            })?;
        let old = rows.remove(position);
        self.publish(RawChange {
            table: table.to_string(),
            kind: EventKind::Delete,
            old: Some(old),
            new: None,
        });
        Ok(())
    }

    fn find(&self, table: &str, column: &str, value: &str) -> Option<&Row> {
        self.tables
            .get(table)?
            .iter()
            .find(|r| r.get(column).and_then(Value::as_str) == Some(value))
    }

    fn rpc_create_home_with_member(&mut self, args: &Row) -> Result<Row, BackendError> {
        let name = required_str(args, "name")?;
        let invite_code = required_str(args, "invite_code")?;
        let user_id = required_str(args, "user_id")?;
        // All or nothing: refuse before writing either row.
        self.check_insert("homes")?;
        self.check_insert("home_members")?;
        let home = self.insert(
            "homes",
            json!({"name": name, "invite_code": invite_code, "created_by": user_id}),
        )?;
        let home_id = home.get("id").cloned().unwrap_or(Value::Null);
        self.insert(
            "home_members",
            json!({"home_id": home_id, "user_id": user_id, "role": "owner"}),
        )?;
        Ok(home)
    }

    fn rpc_join_home_by_code(&mut self, args: &Row) -> Result<Row, BackendError> {
        let code = required_str(args, "invite_code")?;
        let user_id = required_str(args, "user_id")?;
        let home = self
            .find("homes", "invite_code", &code)
            .cloned()
            .ok_or_else(|| BackendError::NotFound {
                table: "homes".to_string(),
                id: code.clone(),
            })?;
        let home_id = home.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
        let already_member = self.tables.get("home_members").is_some_and(|rows| {
            rows.iter().any(|r| {
                r.get("home_id").and_then(Value::as_str) == Some(home_id.as_str())
                    && r.get("user_id").and_then(Value::as_str) == Some(user_id.as_str())
            })
        });
        if !already_member {
            self.insert(
                "home_members",
                json!({"home_id": home_id, "user_id": user_id, "role": "member"}),
            )?;
        }
        Ok(home)
    }

    fn rpc_create_profile(&mut self, args: &Row) -> Result<Row, BackendError> {
        required_str(args, "id")?;
        self.insert("profiles", args.clone())
    }
}

fn into_object(table: &str, row: Row) -> Result<Map<String, Value>, BackendError> {
    match row {
        Value::Object(map) => Ok(map),
        other => Err(BackendError::Status {
            endpoint: table.to_string(),
            status: 400,
            body: format!("expected a JSON object, got {}", other),
        }),
    }
}

fn required_str(args: &Row, key: &str) -> Result<String, BackendError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BackendError::Status {
            endpoint: "rpc".to_string(),
            status: 400,
            body: format!("missing argument '{}'", key),
        })
}

fn row_id(row: &Row) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        // NULLS LAST
        (Some(_), None | Some(Value::Null)) => Ordering::Less,
        (None | Some(Value::Null), Some(_)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

/// In-process [`RecordStore`] + [`ChangeFeed`].
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Mutex<MemoryState>>,
    channel_capacity: usize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_channel_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_channel_capacity(channel_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryState::default())),
            channel_capacity: channel_capacity.max(1),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, BackendError> {
        self.inner.lock().map_err(|_| BackendError::LockPoisoned)
    }

    /// Load rows without publishing changes.
    pub fn seed(&self, table: &str, rows: Vec<Row>) -> Result<(), BackendError> {
        let mut state = self.lock()?;
        state.tables.entry(table.to_string()).or_default().extend(rows);
        Ok(())
    }

    /// Current contents of `table`.
    pub fn rows(&self, table: &str) -> Result<Vec<Row>, BackendError> {
        Ok(self.lock()?.tables.get(table).cloned().unwrap_or_default())
    }

    /// Push a change to matching channels without touching storage.
    pub fn emit(&self, change: RawChange) -> Result<(), BackendError> {
        self.lock()?.publish(change);
        Ok(())
    }

    /// Make every select fail with `reason` until cleared with `None`.
    pub fn set_fetch_failure(&self, reason: Option<&str>) -> Result<(), BackendError> {
        self.lock()?.fetch_failure = reason.map(str::to_string);
        Ok(())
    }

    /// Refuse the next `count` subscribe calls.
    pub fn fail_next_subscribes(&self, count: usize) -> Result<(), BackendError> {
        self.lock()?.subscribe_failures = count;
        Ok(())
    }

    /// Enable or disable the built-in RPC functions.
    pub fn set_rpc_enabled(&self, enabled: bool) -> Result<(), BackendError> {
        self.lock()?.rpc_disabled = !enabled;
        Ok(())
    }

    /// Reject direct inserts into `table` as a row-level security policy would.
    pub fn deny_inserts(&self, table: &str) -> Result<(), BackendError> {
        self.lock()?.denied_inserts.insert(table.to_string());
        Ok(())
    }

    pub fn stats(&self) -> Result<ChannelStats, BackendError> {
        Ok(self.lock()?.stats.clone())
    }

    /// Channels currently open on `table`.
    pub fn open_channels(&self, table: &str) -> Result<usize, BackendError> {
        Ok(self.lock()?.open_on(table))
    }

    /// Filter values of the channels currently open on `table`.
    pub fn open_scopes(&self, table: &str) -> Result<Vec<String>, BackendError> {
        let state = self.lock()?;
        let mut scopes: Vec<String> = state
            .channels
            .values()
            .filter(|s| s.request.table == table)
            .map(|s| s.request.filter.value.clone())
            .collect();
        scopes.sort();
        Ok(scopes)
    }
}

#[async_trait]
impl RecordStore for MemoryBackend {
    async fn select(&self, query: Query) -> Result<Vec<Row>, BackendError> {
        tokio::task::yield_now().await;
        let state = self.lock()?;
        if let Some(reason) = &state.fetch_failure {
            return Err(BackendError::Injected(reason.clone()));
        }
        let mut rows: Vec<Row> = state
            .tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| query.filters.iter().all(|f| f.matches(r)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ord = compare_values(a.get(&order.column), b.get(&order.column));
                if order.ascending { ord } else { ord.reverse() }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn select_one(&self, query: Query, id: &str) -> Result<Row, BackendError> {
        tokio::task::yield_now().await;
        let state = self.lock()?;
        if let Some(reason) = &state.fetch_failure {
            return Err(BackendError::Injected(reason.clone()));
        }
        state
            .tables
            .get(&query.table)
            .and_then(|rows| {
                rows.iter()
                    .find(|r| row_id(r) == Some(id) && query.filters.iter().all(|f| f.matches(r)))
            })
            .cloned()
            .ok_or_else(|| BackendError::NotFound {
                table: query.table.clone(),
                id: id.to_string(),
            })
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row, BackendError> {
        tokio::task::yield_now().await;
        self.lock()?.insert(table, row)
    }

    async fn update(&self, table: &str, id: &str, patch: Row) -> Result<Row, BackendError> {
        tokio::task::yield_now().await;
        self.lock()?.update(table, id, patch)
    }

    async fn delete(&self, table: &str, id: &str) -> Result<(), BackendError> {
        tokio::task::yield_now().await;
        self.lock()?.delete(table, id)
    }

    async fn rpc(&self, function: &str, args: Row) -> Result<Row, BackendError> {
        tokio::task::yield_now().await;
        let mut state = self.lock()?;
        if state.rpc_disabled {
            return Err(BackendError::UnknownRpc(function.to_string()));
        }
        match function {
            "create_home_with_member" => state.rpc_create_home_with_member(&args),
            "join_home_by_code" => state.rpc_join_home_by_code(&args),
            "create_profile" => state.rpc_create_profile(&args),
            other => Err(BackendError::UnknownRpc(other.to_string())),
        }
    }
}

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn subscribe(&self, request: SubscribeRequest) -> Result<ChannelHandle, BackendError> {
        tokio::task::yield_now().await;
        let mut state = self.lock()?;
        if state.subscribe_failures > 0 {
            state.subscribe_failures -= 1;
            return Err(BackendError::SubscribeRefused {
                table: request.table.clone(),
                reason: "injected subscribe failure".to_string(),
            });
        }

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        state.next_channel += 1;
        let id = state.next_channel;
        let table = request.table.clone();
        tracing::debug!(channel = id, table = %table, filter = %request.filter, "channel opened");
        state.channels.insert(id, Subscriber { request, tx });
        state.stats.opened += 1;
        let open = state.open_on(&table);
        let peak = state.stats.peak_open.entry(table.clone()).or_insert(0);
        *peak = (*peak).max(open);

        let inner = Arc::clone(&self.inner);
        Ok(ChannelHandle::new(id, table, rx, move || {
            if let Ok(mut state) = inner.lock()
                && state.channels.remove(&id).is_some()
            {
                state.stats.closed += 1;
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{EventMask, Filter};

    fn request(table: &str, home: &str) -> SubscribeRequest {
        SubscribeRequest {
            table: table.to_string(),
            filter: Filter::eq("home_id", home),
            mask: EventMask::all(),
        }
    }

    #[tokio::test]
    async fn test_select_filters_orders_and_limits() {
        let backend = MemoryBackend::new();
        backend
            .seed(
                "events",
                vec![
                    json!({"id": "e2", "home_id": "h1", "event_date": "2024-02-01"}),
                    json!({"id": "e1", "home_id": "h1", "event_date": "2024-01-01"}),
                    json!({"id": "e3", "home_id": "h2", "event_date": "2024-01-15"}),
                ],
            )
            .unwrap();
        let rows = backend
            .select(
                Query::table("events")
                    .filter(Filter::eq("home_id", "h1"))
                    .order_by("event_date", true),
            )
            .await
            .unwrap();
        let ids: Vec<&str> = rows.iter().filter_map(row_id).collect();
        assert_eq!(ids, vec!["e1", "e2"]);

        let rows = backend
            .select(Query::table("events").order_by("event_date", false).limit(1))
            .await
            .unwrap();
        assert_eq!(row_id(&rows[0]), Some("e2"));
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_publishes_to_matching_channel() {
        let backend = MemoryBackend::new();
        let mut h1 = backend.subscribe(request("events", "h1")).await.unwrap();
        let mut h2 = backend.subscribe(request("events", "h2")).await.unwrap();
        let mut rx1 = h1.take_events().unwrap();
        let mut rx2 = h2.take_events().unwrap();

        let row = backend
            .insert("events", json!({"home_id": "h1", "title": "BBQ"}))
            .await
            .unwrap();
        assert!(row_id(&row).is_some());

        let change = rx1.recv().await.unwrap();
        assert_eq!(change.kind, EventKind::Insert);
        assert_eq!(change.new.unwrap()["title"], "BBQ");
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mask_excludes_unwanted_kinds() {
        let backend = MemoryBackend::new();
        let mut handle = backend
            .subscribe(SubscribeRequest {
                mask: EventMask::only(&[EventKind::Delete]),
                ..request("events", "h1")
            })
            .await
            .unwrap();
        let mut rx = handle.take_events().unwrap();
        backend
            .insert("events", json!({"id": "e1", "home_id": "h1"}))
            .await
            .unwrap();
        backend.delete("events", "e1").await.unwrap();
        let change = rx.recv().await.unwrap();
        assert_eq!(change.kind, EventKind::Delete);
        assert_eq!(change.old.unwrap()["id"], "e1");
    }

    #[tokio::test]
    async fn test_update_merges_patch_and_reports_old_and_new() {
        let backend = MemoryBackend::new();
        backend
            .seed("events", vec![json!({"id": "e1", "home_id": "h1", "title": "Old"})])
            .unwrap();
        let mut handle = backend.subscribe(request("events", "h1")).await.unwrap();
        let mut rx = handle.take_events().unwrap();
        let updated = backend
            .update("events", "e1", json!({"title": "New"}))
            .await
            .unwrap();
        assert_eq!(updated["home_id"], "h1");
        let change = rx.recv().await.unwrap();
        assert_eq!(change.old.unwrap()["title"], "Old");
        assert_eq!(change.new.unwrap()["title"], "New");
    }

    #[tokio::test]
    async fn test_update_missing_row_is_not_found() {
        let backend = MemoryBackend::new();
        let err = backend.update("events", "nope", json!({})).await.unwrap_err();
        assert!(matches!(err, BackendError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_channel_accounting() {
        let backend = MemoryBackend::new();
        let a = backend.subscribe(request("events", "h1")).await.unwrap();
        let mut b = backend.subscribe(request("events", "h2")).await.unwrap();
        assert_eq!(backend.open_channels("events").unwrap(), 2);
        assert_eq!(backend.open_scopes("events").unwrap(), vec!["h1", "h2"]);
        b.close();
        b.close();
        drop(a);
        let stats = backend.stats().unwrap();
        assert_eq!(stats.opened, 2);
        assert_eq!(stats.closed, 2);
        assert_eq!(stats.peak_open["events"], 2);
        assert_eq!(backend.open_channels("events").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let backend = MemoryBackend::new();
        backend.fail_next_subscribes(1).unwrap();
        assert!(backend.subscribe(request("events", "h1")).await.is_err());
        assert!(backend.subscribe(request("events", "h1")).await.is_ok());

        backend.set_fetch_failure(Some("offline")).unwrap();
        let err = backend.select(Query::table("events")).await.unwrap_err();
        assert!(err.to_string().contains("offline"));
        backend.set_fetch_failure(None).unwrap();
        assert!(backend.select(Query::table("events")).await.is_ok());
    }

    #[tokio::test]
    async fn test_rpc_create_and_join_home() {
        let backend = MemoryBackend::new();
        let home = backend
            .rpc(
                "create_home_with_member",
                json!({"name": "Flat 4", "invite_code": "ABCD2345", "user_id": "u1"}),
            )
            .await
            .unwrap();
        assert_eq!(home["name"], "Flat 4");

        backend
            .rpc("join_home_by_code", json!({"invite_code": "ABCD2345", "user_id": "u2"}))
            .await
            .unwrap();
        backend
            .rpc("join_home_by_code", json!({"invite_code": "ABCD2345", "user_id": "u2"}))
            .await
            .unwrap();
        assert_eq!(backend.rows("home_members").unwrap().len(), 2);

        let err = backend
            .rpc("join_home_by_code", json!({"invite_code": "ZZZZZZZZ", "user_id": "u3"}))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_rpc_disabled_and_denied_inserts() {
        let backend = MemoryBackend::new();
        backend.set_rpc_enabled(false).unwrap();
        let err = backend.rpc("create_profile", json!({"id": "u1"})).await.unwrap_err();
        assert!(matches!(err, BackendError::UnknownRpc(_)));

        backend.deny_inserts("homes").unwrap();
        let err = backend.insert("homes", json!({"name": "x"})).await.unwrap_err();
        assert!(matches!(err, BackendError::Status { status: 403, .. }));
    }

    #[test]
    fn test_compare_values_nulls_last() {
        let a = json!("a");
        assert_eq!(compare_values(Some(&a), None), Ordering::Less);
        assert_eq!(compare_values(Some(&Value::Null), Some(&a)), Ordering::Greater);
        assert_eq!(compare_values(Some(&json!(1)), Some(&json!(2))), Ordering::Less);
    }
}
