use serde::Serialize;
use serde::de::DeserializeOwned;
use std::cmp::Ordering;

use crate::ids::RecordId;
use crate::scope::Resource;

/// A row that can be held in a live list.
///
/// `cmp_order` defines the list's display order and must be a total order:
/// implementations fall back to comparing ids when the domain key ties.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    const RESOURCE: Resource;

    fn id(&self) -> &RecordId;

    /// Value of the resource's scope column, `None` when the row has none.
    fn scope_value(&self) -> Option<&str>;

    fn cmp_order(&self, other: &Self) -> Ordering;
}
