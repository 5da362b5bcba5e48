//! Load-time record validation.
//!
//! Records loaded from the durable store are validated once, producing a
//! tagged `Valid`/`Invalid` result; invalid records are filtered before
//! they can enter a queue or a batch.

use crate::entity::{ActivityRecord, JournalEntry};

/// The result of validating a loaded record.
#[derive(Debug, Clone, PartialEq)]
pub enum Validated<T> {
    /// The record passed validation.
    Valid(T),
    /// The record failed validation and must not enter the queue.
    Invalid {
        /// Why the record was rejected.
        reason: String,
    },
}

impl<T> Validated<T> {
    /// Unwraps the valid record, if any.
    pub fn into_valid(self) -> Option<T> {
        match self {
            Validated::Valid(record) => Some(record),
            Validated::Invalid { .. } => None,
        }
    }

    /// Returns true for a valid record.
    pub fn is_valid(&self) -> bool {
        matches!(self, Validated::Valid(_))
    }
}

/// Validates an activity record loaded from storage.
pub fn validate_activity(record: ActivityRecord) -> Validated<ActivityRecord> {
    if record.id.is_empty() {
        return invalid("activity has an empty id");
    }
    if record.session_id.is_empty() {
        return invalid("activity has an empty session id");
    }
    if record.url.is_empty() {
        return invalid("activity has an empty url");
    }
    if record.start_time == 0 {
        return invalid("activity has no start time");
    }
    if let Some(end) = record.end_time {
        if end < record.start_time {
            return invalid("activity ends before it starts");
        }
    }
    Validated::Valid(record)
}

/// Validates a journal entry loaded from storage.
pub fn validate_entry(entry: JournalEntry) -> Validated<JournalEntry> {
    if entry.id.is_empty() {
        return invalid("entry has an empty id");
    }
    if entry.version == 0 {
        return invalid("entry version must start at 1");
    }
    if entry.parent_id.as_deref() == Some(entry.id.as_str()) {
        return invalid("entry is its own parent");
    }
    Validated::Valid(entry)
}

fn invalid<T>(reason: &str) -> Validated<T> {
    Validated::Invalid {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_activity_passes() {
        let a = ActivityRecord::open("s1", "https://a.example", "A", "a.example", 1_000);
        assert!(validate_activity(a).is_valid());
    }

    #[test]
    fn inverted_time_range_rejected() {
        let mut a = ActivityRecord::open("s1", "https://a.example", "A", "a.example", 5_000);
        a.end_time = Some(1_000);
        match validate_activity(a) {
            Validated::Invalid { reason } => assert!(reason.contains("ends before")),
            Validated::Valid(_) => panic!("expected invalid"),
        }
    }

    #[test]
    fn zero_version_entry_rejected() {
        let mut e = JournalEntry::new("text", 1_000);
        e.version = 0;
        assert!(!validate_entry(e).is_valid());
    }

    #[test]
    fn self_parent_rejected() {
        let mut e = JournalEntry::new("text", 1_000);
        e.parent_id = Some(e.id.clone());
        assert!(!validate_entry(e).is_valid());
    }

    #[test]
    fn into_valid_filters() {
        let good = ActivityRecord::open("s1", "https://a.example", "A", "a.example", 1_000);
        let mut bad = good.clone();
        bad.id.clear();

        let kept: Vec<_> = [good, bad]
            .into_iter()
            .map(validate_activity)
            .filter_map(Validated::into_valid)
            .collect();
        assert_eq!(kept.len(), 1);
    }
}
