use crate::types::{MessageId, MessageRecord};

/// Stable union of `existing` and `incoming` by id, ascending.
///
/// Records already present win over incoming records with the same id.
pub fn merge_records(existing: &[MessageRecord], incoming: &[MessageRecord]) -> Vec<MessageRecord> {
    let mut timeline = Timeline::new(usize::MAX);
    timeline.merge(existing.iter().cloned());
    timeline.merge(incoming.iter().cloned());
    timeline.into_records()
}

/// Ordered, id-deduplicated message sequence with bounded retention.
#[derive(Debug, Clone)]
pub struct Timeline {
    records: Vec<MessageRecord>,
    max_items: usize,
}

impl Timeline {
    /// Create a timeline with an item cap (`max_items >= 1`).
    pub fn new(max_items: usize) -> Self {
        Self {
            records: Vec::new(),
            max_items: max_items.max(1),
        }
    }

    /// Current records ascending by id.
    pub fn records(&self) -> &[MessageRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last_id(&self) -> Option<MessageId> {
        self.records.last().map(|record| record.id)
    }

    /// Insert keeping ascending order. Returns `false` when the id is already
    /// present, in which case the existing record is kept unchanged.
    pub fn append(&mut self, record: MessageRecord) -> bool {
        let inserted = self.insert_sorted(record);
        if inserted {
            self.trim_to_max();
        }
        inserted
    }

    /// Merge a batch. Returns how many records were new.
    pub fn merge<I>(&mut self, incoming: I) -> usize
    where
        I: IntoIterator<Item = MessageRecord>,
    {
        let mut inserted = 0;
        for record in incoming {
            if self.insert_sorted(record) {
                inserted += 1;
            }
        }
        self.trim_to_max();
        inserted
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn into_records(self) -> Vec<MessageRecord> {
        self.records
    }

    fn insert_sorted(&mut self, record: MessageRecord) -> bool {
        // Fast path for live frames, which almost always arrive last.
        if self.last_id().is_none_or(|last| last < record.id) {
            self.records.push(record);
            return true;
        }

        match self.records.binary_search_by_key(&record.id, |it| it.id) {
            Ok(_) => false,
            Err(idx) => {
                self.records.insert(idx, record);
                true
            }
        }
    }

    fn trim_to_max(&mut self) {
        if self.records.len() <= self.max_items {
            return;
        }

        let excess = self.records.len() - self.max_items;
        self.records.drain(0..excess);
    }
}
