//! Typed data access.
//!
//! `HomeRepository` is where backend rows become domain records. Chore rows
//! resolve their assignment shape here, once, through serde.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;

use splitfair_common::{
    AvailabilitySlot, Chore, Event, Expense, ExpenseSplit, HomeId, HomeMember, HouseRule,
    Notification, Profile, Record, RecordId, Resource, ScopeKey, UserId,
};

use crate::backend::{Filter, Query, RecordStore, Row};
use crate::errors::BackendError;
use crate::sync::ListSource;

/// Events embed their attendee rows.
const EVENT_COLUMNS: &str = "*,attendees:event_attendees(user_id,status)";

fn decode<T: DeserializeOwned>(table: &str, row: Row) -> Result<T, BackendError> {
    serde_json::from_value(row).map_err(|source| BackendError::Decode {
        table: table.to_string(),
        source,
    })
}

fn decode_all<T: DeserializeOwned>(table: &str, rows: Vec<Row>) -> Result<Vec<T>, BackendError> {
    rows.into_iter().map(|row| decode(table, row)).collect()
}

/// Column list for a resource's list query.
pub fn columns(resource: Resource) -> &'static str {
    match resource {
        Resource::Events => EVENT_COLUMNS,
        _ => "*",
    }
}

/// Server-side order matching each record's display order.
fn list_order(resource: Resource) -> (&'static str, bool) {
    match resource {
        Resource::Events => ("event_date", true),
        Resource::Notifications => ("created_at", false),
        Resource::Chores => ("due_date", true),
        Resource::Expenses => ("created_at", false),
        Resource::HouseRules => ("created_at", true),
        Resource::Availability => ("date", true),
    }
}

/// The query that loads a scope's list.
pub fn list_query(scope: &ScopeKey) -> Query {
    let (column, ascending) = list_order(scope.resource);
    Query::table(scope.resource.table())
        .columns(columns(scope.resource))
        .filter(Filter::eq(scope.resource.scope_column(), scope.value.clone()))
        .order_by(column, ascending)
}

#[derive(Clone)]
pub struct HomeRepository {
    store: Arc<dyn RecordStore>,
}

impl HomeRepository {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub async fn fetch_list<R: Record>(&self, scope: &ScopeKey) -> Result<Vec<R>, BackendError> {
        let table = scope.resource.table();
        let rows = self.store.select(list_query(scope)).await?;
        tracing::debug!(scope = %scope, rows = rows.len(), "fetched list");
        decode_all(table, rows)
    }

    pub async fn fetch_one<R: Record>(&self, id: &RecordId) -> Result<R, BackendError> {
        let table = R::RESOURCE.table();
        let query = Query::table(table).columns(columns(R::RESOURCE));
        let row = self.store.select_one(query, id.as_str()).await?;
        decode(table, row)
    }

    /// One record, only if it still belongs to `scope`. A record that has
    /// moved to another scope is reported as not found.
    pub async fn fetch_in_scope<R: Record>(&self, scope: &ScopeKey, id: &RecordId) -> Result<R, BackendError> {
        let table = scope.resource.table();
        let query = Query::table(table)
            .columns(columns(scope.resource))
            .filter(Filter::eq(scope.resource.scope_column(), scope.value.clone()));
        let row = self.store.select_one(query, id.as_str()).await?;
        decode(table, row)
    }

    pub async fn events(&self, home: &HomeId) -> Result<Vec<Event>, BackendError> {
        self.fetch_list(&ScopeKey::new(Resource::Events, home.as_str()))
            .await
    }

    pub async fn event(&self, id: &RecordId) -> Result<Event, BackendError> {
        self.fetch_one(id).await
    }

    /// Notifications `viewer` can see in `home`: their own plus broadcasts.
    pub async fn notifications(
        &self,
        home: &HomeId,
        viewer: &UserId,
    ) -> Result<Vec<Notification>, BackendError> {
        let all: Vec<Notification> = self
            .fetch_list(&ScopeKey::new(Resource::Notifications, home.as_str()))
            .await?;
        Ok(all.into_iter().filter(|n| n.is_visible_to(viewer)).collect())
    }

    pub async fn chores(&self, home: &HomeId) -> Result<Vec<Chore>, BackendError> {
        self.fetch_list(&ScopeKey::new(Resource::Chores, home.as_str()))
            .await
    }

    pub async fn expenses(&self, home: &HomeId) -> Result<Vec<Expense>, BackendError> {
        self.fetch_list(&ScopeKey::new(Resource::Expenses, home.as_str()))
            .await
    }

    pub async fn expense_splits(&self, expense: &RecordId) -> Result<Vec<ExpenseSplit>, BackendError> {
        let rows = self
            .store
            .select(Query::table("expense_splits").filter(Filter::eq("expense_id", expense.as_str())))
            .await?;
        decode_all("expense_splits", rows)
    }

    pub async fn house_rules(&self, home: &HomeId) -> Result<Vec<HouseRule>, BackendError> {
        self.fetch_list(&ScopeKey::new(Resource::HouseRules, home.as_str()))
            .await
    }

    pub async fn availability(&self, home: &HomeId) -> Result<Vec<AvailabilitySlot>, BackendError> {
        self.fetch_list(&ScopeKey::new(Resource::Availability, home.as_str()))
            .await
    }

    pub async fn members(&self, home: &HomeId) -> Result<Vec<HomeMember>, BackendError> {
        let rows = self
            .store
            .select(Query::table("home_members").filter(Filter::eq("home_id", home.as_str())))
            .await?;
        decode_all("home_members", rows)
    }

    pub async fn profile(&self, user: &UserId) -> Result<Profile, BackendError> {
        let row = self
            .store
            .select_one(Query::table("profiles"), user.as_str())
            .await?;
        decode("profiles", row)
    }

    pub async fn mark_notification_read(&self, id: &RecordId) -> Result<Notification, BackendError> {
        let row = self
            .store
            .update("notifications", id.as_str(), json!({ "is_read": true }))
            .await?;
        decode("notifications", row)
    }

    /// Mark every unread notification `viewer` can see in `home` as read.
    /// Returns how many were updated.
    pub async fn mark_all_read(&self, home: &HomeId, viewer: &UserId) -> Result<usize, BackendError> {
        let unread: Vec<Notification> = self
            .notifications(home, viewer)
            .await?
            .into_iter()
            .filter(|n| !n.is_read)
            .collect();
        for notification in &unread {
            self.mark_notification_read(&notification.id).await?;
        }
        tracing::info!(home = %home, viewer = %viewer, count = unread.len(), "marked notifications read");
        Ok(unread.len())
    }
}

#[async_trait]
impl<R: Record> ListSource<R> for HomeRepository {
    async fn fetch_all(&self, scope: &ScopeKey) -> Result<Vec<R>, BackendError> {
        self.fetch_list(scope).await
    }

    async fn fetch_one(&self, scope: &ScopeKey, id: &RecordId) -> Result<R, BackendError> {
        self.fetch_in_scope(scope, id).await
    }
}
