//! Time-bounded cache of seen signature values for replay detection.
//!
//! - A value is remembered for `window_secs` after it was first seen
//! - Expired values are garbage-collected periodically
//! - The cache never holds more than `max_cached_entries` values; the oldest is evicted first

use crate::config::ReplayConfig;
use crate::error::{Result, WsSecurityError};
use crate::timestamp::seconds;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::{debug, warn};

pub struct ReplayCache {
    /// value -> instant first seen
    seen: HashMap<Vec<u8>, DateTime<Utc>>,
    window: Duration,
    max_entries: usize,
    last_gc: DateTime<Utc>,
    gc_interval: Duration,
}

impl ReplayCache {
    /// Default garbage collection interval.
    pub const DEFAULT_GC_INTERVAL_SECS: i64 = 10;

    pub fn new(config: &ReplayConfig) -> Result<Self> {
        Ok(Self {
            seen: HashMap::new(),
            window: seconds(config.window_secs, "replay.window_secs")?,
            max_entries: config.max_cached_entries.max(1),
            last_gc: Utc::now(),
            gc_interval: Duration::seconds(Self::DEFAULT_GC_INTERVAL_SECS),
        })
    }

    /// Record `value`, failing with `ReplayDetected` if it is still remembered.
    pub fn check_and_insert(&mut self, value: &[u8], now: DateTime<Utc>) -> Result<()> {
        if now - self.last_gc > self.gc_interval {
            self.garbage_collect(now);
            self.last_gc = now;
        }

        if let Some(first_seen) = self.seen.get(value) {
            if now - *first_seen <= self.window {
                warn!(first_seen = %first_seen, "Replayed signature value rejected");
                return Err(WsSecurityError::ReplayDetected(
                    "signature value was already seen within the replay window".into(),
                ));
            }
        }

        if self.seen.len() >= self.max_entries && !self.seen.contains_key(value) {
            self.evict_oldest();
        }
        self.seen.insert(value.to_vec(), now);
        Ok(())
    }

    pub fn contains(&self, value: &[u8]) -> bool {
        self.seen.contains_key(value)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn garbage_collect(&mut self, now: DateTime<Utc>) {
        let before = self.seen.len();
        let window = self.window;
        self.seen.retain(|_, first_seen| now - *first_seen <= window);
        debug!(removed = before - self.seen.len(), "Replay cache garbage collected");
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .seen
            .iter()
            .min_by_key(|(_, first_seen)| **first_seen)
            .map(|(value, _)| value.clone());
        if let Some(value) = oldest {
            self.seen.remove(&value);
        }
    }
}
