use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Keys starting with this are reserved for store bookkeeping items.
pub const RESERVED_KEY_PREFIX: char = '#';

/// Name of a FIFO bucket. Derived from the interview category so that only
/// schedules of the same category ever meet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketKey(String);

impl BucketKey {
    /// Lowercases the category and collapses whitespace runs to `_`.
    /// Returns `None` for a blank category or one that lands on the reserved
    /// `#` prefix. Normalising an existing key is a no-op, so stored keys can
    /// be passed back through here.
    pub fn from_category(category: &str) -> Option<Self> {
        let normalized = category
            .split_whitespace()
            .map(|part| part.to_lowercase())
            .collect::<Vec<_>>()
            .join("_");

        if normalized.is_empty() || normalized.starts_with(RESERVED_KEY_PREFIX) {
            None
        } else {
            Some(BucketKey(normalized))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single user's pending request to be matched, tied to one schedule.
/// Identity is `(user_id, schedule_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct QueueEntry {
    pub user_id: String,
    pub schedule_id: String,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(user_id: &str, schedule_id: &str, enqueued_at: DateTime<Utc>) -> Self {
        QueueEntry {
            user_id: user_id.to_string(),
            schedule_id: schedule_id.to_string(),
            enqueued_at,
        }
    }

    /// `enqueued_at` survives re-queueing, so the budget counts from the
    /// original join.
    pub fn is_expired(&self, now: DateTime<Utc>, wait_budget: Duration) -> bool {
        self.enqueued_at + wait_budget <= now
    }
}

/// An entry handed to a single popper. It stays stored, hidden from other
/// poppers until its lease runs out, and leaves the queue only when the
/// holder acknowledges it. `position` locates the stored item and `receipt`
/// proves the claim is still the holder's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedEntry {
    pub bucket: BucketKey,
    pub entry: QueueEntry,
    pub position: String,
    pub receipt: String,
}
