//! Batch preparation.
//!
//! Turns the pending queue into a batch eligible for transmission. This
//! stage is pure: given the same queue, heartbeat, and `now`, it returns
//! the same output and never mutates the stored entities. Synthetic end
//! times exist only on the sync-local copies.

use crate::queue::SyncQueue;
use driftlog_protocol::{ActivityRecord, Queued, MAX_BATCH_SIZE};
use std::collections::HashMap;

/// Knobs for batch preparation, read from user settings each cycle.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Activities shorter than this are dropped.
    pub minimum_duration_secs: u64,
    /// Producer heartbeat interval.
    pub heartbeat_interval_secs: u64,
    /// Gap after which the device is presumed asleep.
    pub sleep_threshold_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            minimum_duration_secs: 5,
            heartbeat_interval_secs: 30,
            sleep_threshold_secs: 60,
        }
    }
}

impl BatchConfig {
    /// Idle threshold in millis: twice the heartbeat interval, floored by
    /// the sleep threshold.
    pub fn idle_threshold_ms(&self) -> u64 {
        (self.heartbeat_interval_secs * 2 * 1000).max(self.sleep_threshold_secs * 1000)
    }
}

/// A deduplicated, duration-filtered, time-ordered batch.
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    /// Records eligible for transmission, ordered by start time.
    pub records: Vec<ActivityRecord>,
    /// How many duplicates were collapsed, for observability.
    pub duplicates_removed: usize,
}

impl PreparedBatch {
    /// Returns true if there is nothing to send.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Produces the batch for one push cycle.
///
/// Steps, in order:
/// 1. Exclude stuck entries (unfinalized, stale, not current).
/// 2. For the current open entity, synthesize a temporary end time:
///    "now", or the last heartbeat when the gap since it exceeds the idle
///    threshold. The stored entity is untouched.
/// 3. Recompute duration for every candidate; drop records below the
///    configured minimum (and records that still have no end time).
/// 4. Deduplicate by logical key; a collision keeps the longer duration,
///    ties broken by the earlier start time.
pub fn prepare_batch(
    queue: &SyncQueue<ActivityRecord>,
    last_heartbeat_ms: Option<u64>,
    now_ms: u64,
    config: &BatchConfig,
) -> PreparedBatch {
    let current_id = queue.current_id();
    let mut candidates: Vec<ActivityRecord> = Vec::new();

    for entity in queue.iter() {
        if queue.is_stuck(entity, now_ms) {
            continue;
        }
        let mut copy = entity.clone();
        if copy.end_time.is_none() && Some(copy.id.as_str()) == current_id {
            copy.end_time = Some(synthetic_end(last_heartbeat_ms, now_ms, config));
        }
        copy.recompute_duration();
        candidates.push(copy);
    }

    let mut by_key: HashMap<String, ActivityRecord> = HashMap::new();
    let mut duplicates_removed = 0;
    for record in candidates {
        let Some(duration) = record.duration else {
            continue;
        };
        if duration < config.minimum_duration_secs {
            continue;
        }
        let key = record.logical_key().as_str().to_string();
        match by_key.get(&key) {
            Some(kept) => {
                // Key collision: one of the two is dropped either way.
                duplicates_removed += 1;
                if loses_tiebreak(kept, &record) {
                    by_key.insert(key, record);
                }
            }
            None => {
                by_key.insert(key, record);
            }
        }
    }

    let mut records: Vec<ActivityRecord> = by_key.into_values().collect();
    records.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));
    records.truncate(MAX_BATCH_SIZE);

    tracing::debug!(
        batch = records.len(),
        duplicates_removed,
        "prepared activity batch"
    );

    PreparedBatch {
        records,
        duplicates_removed,
    }
}

/// The temporary closing timestamp for the current open activity.
fn synthetic_end(last_heartbeat_ms: Option<u64>, now_ms: u64, config: &BatchConfig) -> u64 {
    match last_heartbeat_ms {
        Some(hb) if now_ms.saturating_sub(hb) > config.idle_threshold_ms() => hb,
        _ => now_ms,
    }
}

/// True if `kept` should yield its slot to `challenger`.
fn loses_tiebreak(kept: &ActivityRecord, challenger: &ActivityRecord) -> bool {
    let kept_d = kept.duration.unwrap_or(0);
    let challenger_d = challenger.duration.unwrap_or(0);
    challenger_d > kept_d || (challenger_d == kept_d && challenger.start_time < kept.start_time)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed(session: &str, url: &str, start: u64, end: u64) -> ActivityRecord {
        let mut r = ActivityRecord::open(session, url, "title", "example.com", start);
        r.end_time = Some(end);
        r.last_modified = start;
        r
    }

    #[test]
    fn short_activities_are_dropped() {
        let mut q = SyncQueue::new();
        q.enqueue(closed("s1", "https://short.example", 10_000, 12_000)); // 2s
        q.enqueue(closed("s1", "https://long.example", 20_000, 50_000)); // 30s

        let batch = prepare_batch(&q, None, 60_000, &BatchConfig::default());
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].url, "https://long.example");
    }

    #[test]
    fn stuck_entries_are_excluded() {
        let mut q = SyncQueue::new();
        let mut stale = ActivityRecord::open("s1", "https://stale.example", "t", "e", 10_000);
        stale.last_modified = 10_000;
        q.enqueue(stale);
        q.enqueue(closed("s1", "https://ok.example", 20_000, 50_000));

        let batch = prepare_batch(&q, None, 60_000, &BatchConfig::default());
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].url, "https://ok.example");
    }

    #[test]
    fn current_gets_synthetic_end_without_mutation() {
        let mut q = SyncQueue::new();
        let open = ActivityRecord::open("s1", "https://open.example", "t", "e", 10_000);
        let id = open.id.clone();
        q.enqueue(open);
        q.set_current(Some(&id));

        let now = 40_000;
        let batch = prepare_batch(&q, None, now, &BatchConfig::default());
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].end_time, Some(now));
        assert_eq!(batch.records[0].duration, Some(30));
        // The stored entity is untouched.
        assert_eq!(q.get(&id).unwrap().end_time, None);
    }

    #[test]
    fn idle_gap_uses_last_heartbeat() {
        // Start T, heartbeat T+90s, now T+200s,
        // heartbeat interval 30s, sleep threshold 60s -> threshold 60s;
        // gap 110s > 60s -> synthetic end = T+90s, duration 90s.
        let t = 1_000_000u64;
        let mut q = SyncQueue::new();
        let open = ActivityRecord::open("s1", "https://open.example", "t", "e", t);
        let id = open.id.clone();
        q.enqueue(open);
        q.set_current(Some(&id));

        let config = BatchConfig {
            minimum_duration_secs: 5,
            heartbeat_interval_secs: 30,
            sleep_threshold_secs: 60,
        };
        assert_eq!(config.idle_threshold_ms(), 60_000);

        let batch = prepare_batch(&q, Some(t + 90_000), t + 200_000, &config);
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].end_time, Some(t + 90_000));
        assert_eq!(batch.records[0].duration, Some(90));
    }

    #[test]
    fn duplicate_keeps_longer_duration() {
        // Same logical key can coexist in the sequence only via restore;
        // prepare_batch must still collapse them.
        let a = closed("s1", "https://dup.example", 10_000, 20_000); // 10s
        let mut b = closed("s1", "https://dup.example", 11_000, 41_000); // 30s, same bucket
        b.id = "b-id".to_string();
        let mut q: SyncQueue<ActivityRecord> = SyncQueue::new();
        q.restore(vec![a, b]);

        let batch = prepare_batch(&q, None, 60_000, &BatchConfig::default());
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].duration, Some(30));
        assert_eq!(batch.duplicates_removed, 1);
    }

    #[test]
    fn duration_filter_does_not_count_as_duplicate() {
        let mut q = SyncQueue::new();
        q.enqueue(closed("s1", "https://short.example", 10_000, 12_000)); // 2s, dropped
        q.enqueue(closed("s1", "https://long.example", 20_000, 50_000));

        let batch = prepare_batch(&q, None, 60_000, &BatchConfig::default());
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.duplicates_removed, 0);
    }

    #[test]
    fn duplicate_tie_breaks_on_earlier_start() {
        let a = closed("s1", "https://dup.example", 11_000, 31_000); // 20s
        let mut b = closed("s1", "https://dup.example", 10_000, 30_000); // 20s, earlier
        b.id = "b-id".to_string();

        let mut q: SyncQueue<ActivityRecord> = SyncQueue::new();
        q.restore(vec![a, b]);

        let batch = prepare_batch(&q, None, 60_000, &BatchConfig::default());
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].start_time, 10_000);
    }

    #[test]
    fn batch_is_deterministic_and_pure() {
        let mut q = SyncQueue::new();
        q.enqueue(closed("s1", "https://a.example", 20_000, 50_000));
        q.enqueue(closed("s1", "https://b.example", 10_000, 40_000));

        let first = prepare_batch(&q, None, 60_000, &BatchConfig::default());
        let second = prepare_batch(&q, None, 60_000, &BatchConfig::default());
        assert_eq!(first.records, second.records);
        // Time-ordered output.
        assert_eq!(first.records[0].url, "https://b.example");
    }
}
