//! Shared domain types for SplitFair.
//!
//! These are the records a household view renders (events, notifications,
//! chores, expenses, rules, availability) together with the identifiers and
//! scoping types the sync core uses to keep them live.

pub mod assignment;
pub mod error;
pub mod ids;
pub mod models;
pub mod record;
pub mod scope;

pub use assignment::Assignment;
pub use error::DomainError;
pub use ids::{HomeId, RecordId, UserId};
pub use models::*;
pub use record::Record;
pub use scope::{Resource, ScopeKey};
