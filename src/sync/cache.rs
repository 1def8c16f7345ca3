use splitfair_common::{Record, RecordId};

/// Ordered, unique-by-id list of records.
///
/// Order is `Record::cmp_order`. Every mutation keeps the list sorted and
/// keyed by id, so applying the same change twice leaves one entry.
#[derive(Debug, Clone)]
pub struct ListCache<R: Record> {
    items: Vec<R>,
}

impl<R: Record> Default for ListCache<R> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<R: Record> ListCache<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an unordered fetch result. Later duplicates win.
    pub fn from_records(records: Vec<R>) -> Self {
        let mut cache = Self::new();
        cache.replace_all(records);
        cache
    }

    pub fn replace_all(&mut self, records: Vec<R>) {
        self.items.clear();
        for record in records {
            self.upsert(record);
        }
    }

    /// Replace the record with the same id, or insert it at its sorted
    /// position. Returns `true` if a record was replaced.
    pub fn upsert(&mut self, record: R) -> bool {
        let replaced = self.remove(record.id()).is_some();
        let position = self
            .items
            .partition_point(|existing| existing.cmp_order(&record).is_lt());
        self.items.insert(position, record);
        replaced
    }

    /// Replace the record with the same id only if it is already present.
    pub fn replace(&mut self, record: R) -> bool {
        if self.contains(record.id()) {
            self.upsert(record);
            true
        } else {
            false
        }
    }

    pub fn remove(&mut self, id: &RecordId) -> Option<R> {
        let position = self.items.iter().position(|r| r.id() == id)?;
        Some(self.items.remove(position))
    }

    pub fn get(&self, id: &RecordId) -> Option<&R> {
        self.items.iter().find(|r| r.id() == id)
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[R] {
        &self.items
    }

    pub fn to_vec(&self) -> Vec<R> {
        self.items.clone()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Whether the list is sorted and free of duplicate ids.
    pub fn is_consistent(&self) -> bool {
        let sorted = self
            .items
            .windows(2)
            .all(|pair| pair[0].cmp_order(&pair[1]).is_lt());
        let mut ids: Vec<&RecordId> = self.items.iter().map(|r| r.id()).collect();
        ids.sort();
        ids.dedup();
        sorted && ids.len() == self.items.len()
    }
}
