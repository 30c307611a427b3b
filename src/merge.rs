use std::collections::HashSet;

use crate::record::{ContactRecord, Field};
use crate::store::dedup_last_wins;

/// Counts reported after reconciling a run batch with the dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// `None` when no dataset existed before this merge.
    pub before: Option<usize>,
    pub after: usize,
    pub updated: usize,
    pub new: usize,
}

impl MergeSummary {
    pub fn print(&self) {
        println!("---------------------- SUMMARY ----------------------");
        match self.before {
            None => {
                println!("-> No existing dataset; initialised with {} agents", self.after);
            }
            Some(before) => {
                println!("-> Agents BEFORE this run:   {}", before);
                println!("-> Agents AFTER this run:    {}", self.after);
                println!("-> EXISTING (maybe updated): {}", self.updated);
            }
        }
        println!("-> NEW agents found:         {}", self.new);
    }
}

/// Reconcile `incoming` against `existing` (or against nothing, when no
/// dataset has been written yet).
///
/// Matching is by trimmed name. A matched record only takes the incoming
/// values that are non-blank, so an empty scrape never erases known data.
pub fn merge(
    existing: Option<Vec<ContactRecord>>,
    incoming: Vec<ContactRecord>,
) -> (Vec<ContactRecord>, MergeSummary) {
    let incoming = dedup_last_wins(incoming);

    let Some(mut data) = existing else {
        let n = incoming.len();
        let summary = MergeSummary {
            before: None,
            after: n,
            updated: 0,
            new: n,
        };
        return (incoming, summary);
    };

    let before = data.len();
    let mut updated = 0;
    let mut new = 0;

    for record in incoming {
        match data.iter_mut().find(|d| d.key() == record.key()) {
            Some(target) => {
                updated += 1;
                overlay(target, &record);
            }
            None => {
                new += 1;
                data.push(record);
            }
        }
    }

    // Appended names are unique, so this only folds duplicates the dataset
    // already carried.
    let data = dedup_first_wins(data);
    let summary = MergeSummary {
        before: Some(before),
        after: data.len(),
        updated,
        new,
    };
    (data, summary)
}

fn overlay(target: &mut ContactRecord, source: &ContactRecord) {
    for field in Field::ALL {
        let value = source.get(field);
        if !value.trim().is_empty() {
            target.set(field, value.to_string());
        }
    }
}

fn dedup_first_wins(records: Vec<ContactRecord>) -> Vec<ContactRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(r.key().to_string()))
        .collect()
}
