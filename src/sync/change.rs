use serde_json::Value;
use splitfair_common::{Record, RecordId, ScopeKey};

use crate::backend::{EventKind, RawChange};
use crate::errors::SyncError;

/// A typed row-level change.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<R> {
    Inserted(R),
    Updated { old: Option<R>, new: R },
    Deleted { id: RecordId },
}

impl<R: Record> ChangeEvent<R> {
    pub fn id(&self) -> &RecordId {
        match self {
            ChangeEvent::Inserted(record) => record.id(),
            ChangeEvent::Updated { new, .. } => new.id(),
            ChangeEvent::Deleted { id } => id,
        }
    }

    /// Whether the changed row belongs to `scope` after the change. Deletes
    /// carry no row and always count as in scope.
    pub fn in_scope(&self, scope: &ScopeKey) -> bool {
        match self {
            ChangeEvent::Inserted(record) | ChangeEvent::Updated { new: record, .. } => {
                record.scope_value() == Some(scope.value.as_str())
            }
            ChangeEvent::Deleted { .. } => true,
        }
    }

    /// Decode a raw push payload.
    ///
    /// Delete payloads often carry only the primary key of the old row, so
    /// only `old.id` is required there. An update's old row is kept when it
    /// decodes and dropped otherwise.
    pub fn decode(raw: RawChange) -> Result<Self, SyncError> {
        let table = raw.table.clone();
        let decode_err = |message: String| SyncError::ChangeDecode {
            table: table.clone(),
            message,
        };
        match raw.kind {
            EventKind::Insert => {
                let new = raw
                    .new
                    .ok_or_else(|| decode_err("insert without a new record".to_string()))?;
                let record = serde_json::from_value(new).map_err(|e| decode_err(e.to_string()))?;
                Ok(ChangeEvent::Inserted(record))
            }
            EventKind::Update => {
                let new = raw
                    .new
                    .ok_or_else(|| decode_err("update without a new record".to_string()))?;
                let new = serde_json::from_value(new).map_err(|e| decode_err(e.to_string()))?;
                let old = raw.old.and_then(|old| serde_json::from_value(old).ok());
                Ok(ChangeEvent::Updated { old, new })
            }
            EventKind::Delete => {
                let id = raw
                    .old
                    .as_ref()
                    .and_then(|old| old.get("id"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| decode_err("delete without an old id".to_string()))?;
                Ok(ChangeEvent::Deleted {
                    id: RecordId::from(id),
                })
            }
        }
    }
}
