//! Self-enforced daily ceiling on outbound provider calls.
//!
//! The counter is scoped to the local calendar date. Whenever the stored date
//! differs from today the record is reset and persisted before anything else
//! looks at it. A missing or unreadable record is treated the same way.
//!
//! Each individual operation runs under a lock, but a `check_quota` followed
//! later by `consume` is not atomic: two fetches interleaving across an await
//! may both pass the check. The tracker is a best-effort local guard, not an
//! exact meter.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tracing::{debug, info, warn};

use crate::{
    clock::Clock,
    storage::{self, KeyValueStore},
};

pub const QUOTA_STORAGE_KEY: &str = "weather_api_quota";
pub const DAILY_LIMIT: u32 = 1000;

/// Persisted form: `{"count": 12, "date": "2024-05-01", "resetAt": 1714608000000}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaRecord {
    pub count: u32,
    pub date: NaiveDate,
    /// Next local midnight, in epoch milliseconds.
    pub reset_at: i64,
}

impl QuotaRecord {
    fn fresh(clock: &dyn Clock) -> Self {
        Self {
            count: 0,
            date: clock.today(),
            reset_at: clock.next_midnight().timestamp_millis(),
        }
    }
}

/// Read-only view for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaStatus {
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
    pub date: NaiveDate,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct QuotaTracker {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    daily_limit: u32,
    // Lazily loaded; once present it is authoritative for this process even
    // if persisting it failed.
    record: Mutex<Option<QuotaRecord>>,
}

impl QuotaTracker {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_limit(store, clock, DAILY_LIMIT)
    }

    pub fn with_limit(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        daily_limit: u32,
    ) -> Self {
        Self {
            store,
            clock,
            daily_limit,
            record: Mutex::new(None),
        }
    }

    /// True iff `n` more calls fit under today's ceiling.
    pub fn check_quota(&self, n: u32) -> bool {
        self.with_current(|record| record.count.saturating_add(n) <= self.daily_limit)
    }

    /// Records `n` calls against today's counter and persists it.
    pub fn consume(&self, n: u32) {
        let mut guard = self.record.lock().unwrap_or_else(PoisonError::into_inner);
        let record = self.resolve(&mut guard);
        record.count = record.count.saturating_add(n);
        debug!(count = record.count, limit = self.daily_limit, "quota consumed");
        self.persist(record);
    }

    pub fn remaining(&self) -> u32 {
        self.with_current(|record| self.daily_limit.saturating_sub(record.count))
    }

    pub fn is_exhausted(&self) -> bool {
        self.with_current(|record| record.count >= self.daily_limit)
    }

    /// Time left until the counter resets. A stored `resetAt` that is already
    /// behind the clock falls back to the next local midnight.
    pub fn time_until_reset(&self) -> Duration {
        let stored = self.with_current(|record| record.reset_at);
        let now = self.clock.now().timestamp_millis();
        let reset_at = if stored > now {
            stored
        } else {
            self.clock.next_midnight().timestamp_millis()
        };
        Duration::from_millis(u64::try_from(reset_at - now).unwrap_or(0))
    }

    pub fn status(&self) -> QuotaStatus {
        self.with_current(|record| QuotaStatus {
            used: record.count,
            limit: self.daily_limit,
            remaining: self.daily_limit.saturating_sub(record.count),
            date: record.date,
            reset_at: DateTime::from_timestamp_millis(record.reset_at)
                .unwrap_or_else(|| self.clock.next_midnight()),
        })
    }

    fn with_current<T>(&self, f: impl FnOnce(&QuotaRecord) -> T) -> T {
        let mut guard = self.record.lock().unwrap_or_else(PoisonError::into_inner);
        f(self.resolve(&mut guard))
    }

    /// Loads the record if needed and applies day rollover.
    fn resolve<'a>(&self, slot: &'a mut Option<QuotaRecord>) -> &'a mut QuotaRecord {
        let today = self.clock.today();

        if slot.is_none() {
            *slot = storage::load_json(self.store.as_ref(), QUOTA_STORAGE_KEY);
        }
        let needs_reset = slot.as_ref().is_none_or(|r| r.date != today);

        if needs_reset {
            if let Some(old) = slot.as_ref() {
                info!(previous_date = %old.date, previous_count = old.count, "quota day rollover");
            }
            let fresh = QuotaRecord::fresh(self.clock.as_ref());
            self.persist(&fresh);
            *slot = Some(fresh);
        }

        slot.get_or_insert_with(|| QuotaRecord::fresh(self.clock.as_ref()))
    }

    fn persist(&self, record: &QuotaRecord) {
        if let Err(e) = storage::save_json(self.store.as_ref(), QUOTA_STORAGE_KEY, record) {
            warn!(error = %e, "failed to persist quota record; keeping in-memory value");
        }
    }
}
