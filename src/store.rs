use std::collections::HashMap;

use crate::record::ContactRecord;

/// Records scraped during the current run.
#[derive(Debug, Default)]
pub struct RecordStore {
    records: Vec<ContactRecord>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a record. Records without an email are refused and `false` is returned.
    pub fn push(&mut self, record: ContactRecord) -> bool {
        if !record.has_email() || record.key().is_empty() {
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The run batch, one record per name. A later scrape of the same name
    /// replaces the earlier one but keeps the earlier position.
    pub fn batch(&self) -> Vec<ContactRecord> {
        dedup_last_wins(self.records.iter().cloned())
    }
}

pub fn dedup_last_wins(records: impl IntoIterator<Item = ContactRecord>) -> Vec<ContactRecord> {
    let mut out: Vec<ContactRecord> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();

    for record in records {
        match slots.get(record.key()) {
            Some(&i) => out[i] = record,
            None => {
                slots.insert(record.key().to_string(), out.len());
                out.push(record);
            }
        }
    }
    out
}
