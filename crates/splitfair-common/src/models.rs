use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;

use crate::assignment::Assignment;
use crate::ids::{HomeId, RecordId, UserId};
use crate::record::Record;
use crate::scope::Resource;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub id: UserId,
    pub full_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub home_id: Option<HomeId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Home {
    pub id: HomeId,
    pub name: String,
    pub invite_code: String,
    pub created_by: UserId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Owner,
    Member,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Member => "member",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HomeMember {
    pub home_id: HomeId,
    pub user_id: UserId,
    pub role: MemberRole,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttendeeStatus {
    Going,
    Maybe,
    NotGoing,
}

impl AttendeeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Going => "going",
            Self::Maybe => "maybe",
            Self::NotGoing => "not_going",
        }
    }
}

impl FromStr for AttendeeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "going" => Ok(Self::Going),
            "maybe" => Ok(Self::Maybe),
            "not_going" => Ok(Self::NotGoing),
            _ => Err(format!("Invalid attendee status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventAttendee {
    pub user_id: UserId,
    pub status: AttendeeStatus,
}

/// A household calendar event. `attendees` is a nested collection joined in
/// by the fetch and never delivered by the change feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: RecordId,
    pub home_id: HomeId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub event_date: NaiveDate,
    pub created_by: UserId,
    #[serde(default)]
    pub attendees: Vec<EventAttendee>,
}

impl Record for Event {
    const RESOURCE: Resource = Resource::Events;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn scope_value(&self) -> Option<&str> {
        Some(self.home_id.as_str())
    }

    fn cmp_order(&self, other: &Self) -> Ordering {
        self.event_date
            .cmp(&other.event_date)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// A notification. `user_id == None` is a broadcast to the whole home.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: RecordId,
    #[serde(default)]
    pub home_id: Option<HomeId>,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn is_broadcast(&self) -> bool {
        self.user_id.is_none()
    }

    pub fn is_visible_to(&self, viewer: &UserId) -> bool {
        match &self.user_id {
            None => true,
            Some(owner) => owner == viewer,
        }
    }
}

impl Record for Notification {
    const RESOURCE: Resource = Resource::Notifications;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn scope_value(&self) -> Option<&str> {
        self.home_id.as_ref().map(|h| h.as_str())
    }

    fn cmp_order(&self, other: &Self) -> Ordering {
        other
            .created_at
            .cmp(&self.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chore {
    pub id: RecordId,
    pub home_id: HomeId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub assignment: Assignment,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub points: u32,
}

impl Record for Chore {
    const RESOURCE: Resource = Resource::Chores;

    fn id(&self) -> &RecordId {
        &self.id
    }

    /// Dated chores first, soonest due first; undated chores last.
    fn scope_value(&self) -> Option<&str> {
        Some(self.home_id.as_str())
    }

    fn cmp_order(&self, other: &Self) -> Ordering {
        let by_due = match (self.due_date, other.due_date) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_due.then_with(|| self.id.cmp(&other.id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Expense {
    pub id: RecordId,
    pub home_id: HomeId,
    pub description: String,
    pub amount_cents: i64,
    pub paid_by: UserId,
    #[serde(default)]
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Record for Expense {
    const RESOURCE: Resource = Resource::Expenses;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn scope_value(&self) -> Option<&str> {
        Some(self.home_id.as_str())
    }

    fn cmp_order(&self, other: &Self) -> Ordering {
        other
            .created_at
            .cmp(&self.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpenseSplit {
    pub expense_id: RecordId,
    pub user_id: UserId,
    pub amount_cents: i64,
    #[serde(default)]
    pub settled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HouseRule {
    pub id: RecordId,
    pub home_id: HomeId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl Record for HouseRule {
    const RESOURCE: Resource = Resource::HouseRules;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn scope_value(&self) -> Option<&str> {
        Some(self.home_id.as_str())
    }

    fn cmp_order(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityStatus {
    Available,
    Busy,
    Away,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilitySlot {
    pub id: RecordId,
    pub home_id: HomeId,
    pub user_id: UserId,
    pub date: NaiveDate,
    pub status: AvailabilityStatus,
    #[serde(default)]
    pub note: Option<String>,
}

impl Record for AvailabilitySlot {
    const RESOURCE: Resource = Resource::Availability;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn scope_value(&self) -> Option<&str> {
        Some(self.home_id.as_str())
    }

    fn cmp_order(&self, other: &Self) -> Ordering {
        self.date
            .cmp(&other.date)
            .then_with(|| self.user_id.cmp(&other.user_id))
            .then_with(|| self.id.cmp(&other.id))
    }
}
