//! The freshness gate's signal source (spec §9 Open Question 1) and the
//! cache that turns that signal into an actual skip decision.
//!
//! The original implementation's `get_last_update_time` hook always
//! returned `time.time()`, making the gate a permanent no-op (every run
//! looks "newer" than the last recorded check). Rather than guess at a real
//! signal source, this is an explicit, swappable seam: the Chain Engine
//! depends only on `FreshnessSource`, and a real deployment can supply one
//! backed by a table's audit column or a log-sequence number without
//! touching chain execution.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::hashing::freshness_key;

/// Supplies the last-modification time for a `(client_id, query)` pair.
pub trait FreshnessSource: Send + Sync {
    fn last_modified(&self, client_id: &str, query: &str) -> Option<DateTime<Utc>>;
}

/// Default source: always reports "now". Paired with `FreshnessGate` this
/// still runs the query on every invocation, since every "now" reads as
/// newer than the one seen last — it becomes a real gate only once a
/// `FreshnessSource` backed by an actual audit column or log-sequence
/// number is supplied.
pub struct SystemClockFreshness;

impl FreshnessSource for SystemClockFreshness {
    fn last_modified(&self, _client_id: &str, _query: &str) -> Option<DateTime<Utc>> {
        Some(Utc::now())
    }
}

/// Wraps a `FreshnessSource` with the `(client_id, query) -> last seen`
/// cache the gate needs to actually detect "unchanged since the last run"
/// (spec §4.7 step 3): the source alone only answers "what does the
/// signal read right now" — this remembers what it read the previous time
/// this exact pair ran and compares against that.
pub struct FreshnessGate {
    source: Box<dyn FreshnessSource>,
    seen: DashMap<String, DateTime<Utc>>,
}

impl FreshnessGate {
    pub fn new(source: Box<dyn FreshnessSource>) -> Self {
        Self { source, seen: DashMap::new() }
    }

    /// Returns `true` if the `sql_query` step should be skipped: the
    /// source reported a signal and it is unchanged (or not newer) than
    /// the one stored from this pair's last execution. A `None` signal
    /// means no freshness information is available, so the step always
    /// runs.
    pub fn should_skip(&self, client_id: &str, query: &str) -> bool {
        let Some(current) = self.source.last_modified(client_id, query) else {
            return false;
        };
        let key = freshness_key(client_id, query);
        let unchanged = self.seen.get(&key).map(|seen| *seen >= current).unwrap_or(false);
        if !unchanged {
            self.seen.insert(key, current);
        }
        unchanged
    }
}
