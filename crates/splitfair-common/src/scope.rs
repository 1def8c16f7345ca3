use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DomainError;

/// A synced collection, backed by one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Events,
    Notifications,
    Chores,
    Expenses,
    HouseRules,
    Availability,
}

impl Resource {
    pub fn table(&self) -> &'static str {
        match self {
            Self::Events => "events",
            Self::Notifications => "notifications",
            Self::Chores => "chores",
            Self::Expenses => "expenses",
            Self::HouseRules => "house_rules",
            Self::Availability => "availability",
        }
    }

    /// Column a scope value is matched against. Every household table is
    /// partitioned by home.
    pub fn scope_column(&self) -> &'static str {
        "home_id"
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

impl FromStr for Resource {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "events" => Ok(Self::Events),
            "notifications" => Ok(Self::Notifications),
            "chores" => Ok(Self::Chores),
            "expenses" => Ok(Self::Expenses),
            "house_rules" => Ok(Self::HouseRules),
            "availability" => Ok(Self::Availability),
            other => Err(DomainError::UnknownResource(other.to_string())),
        }
    }
}

/// Identifies which live channel and cache a view uses: a resource plus the
/// value its scope column must equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeKey {
    pub resource: Resource,
    pub value: String,
}

impl ScopeKey {
    pub fn new(resource: Resource, value: impl Into<String>) -> Self {
        Self {
            resource,
            value: value.into(),
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_key_display() {
        let key = ScopeKey::new(Resource::Events, "home-1");
        assert_eq!(key.to_string(), "events:home-1");
    }

    #[test]
    fn test_resource_table_roundtrips_through_from_str() {
        for resource in [
            Resource::Events,
            Resource::Notifications,
            Resource::Chores,
            Resource::Expenses,
            Resource::HouseRules,
            Resource::Availability,
        ] {
            assert_eq!(resource.table().parse::<Resource>().unwrap(), resource);
        }
        assert!("profiles".parse::<Resource>().is_err());
    }

    #[test]
    fn test_scope_keys_compare_by_resource_and_value() {
        let a = ScopeKey::new(Resource::Events, "h1");
        assert_eq!(a, ScopeKey::new(Resource::Events, "h1"));
        assert_ne!(a, ScopeKey::new(Resource::Notifications, "h1"));
        assert_ne!(a, ScopeKey::new(Resource::Events, "h2"));
    }
}
