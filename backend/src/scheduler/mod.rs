//! Scheduler (C10).
//!
//! Maintains a cached (timezone -> customer ids) map refreshed on startup
//! and every five minutes, and picks the next customer to drive a session
//! with a timezone-weighted draw.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::activity::ActivityCalculator;
use crate::burst::BurstManager;
use crate::db::{Database, OpResult, DEFAULT_OP_TIMEOUT};
use crate::model::{Customer, Id};
use crate::rng::RngManager;
use crate::timezone::TimezoneManager;

/// Floor applied to every timezone's weight so a quiet timezone is never
/// fully starved of selection (§4.10).
const MIN_TIMEZONE_WEIGHT: f64 = 0.1;
pub const CACHE_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Default)]
struct SchedulerCache {
    by_timezone: HashMap<String, Vec<Id>>,
}

pub struct Scheduler {
    db: Arc<Database>,
    tz_mgr: Arc<TimezoneManager>,
    activity: Arc<ActivityCalculator>,
    burst: Arc<BurstManager>,
    num_sessions: u32,
    cache: RwLock<SchedulerCache>,
}

impl Scheduler {
    pub fn new(
        db: Arc<Database>,
        tz_mgr: Arc<TimezoneManager>,
        activity: Arc<ActivityCalculator>,
        burst: Arc<BurstManager>,
        num_sessions: u32,
    ) -> Self {
        Self {
            db,
            tz_mgr,
            activity,
            burst,
            num_sessions,
            cache: RwLock::new(SchedulerCache::default()),
        }
    }

    /// Rebuilds the cache from a full scan of active customers (§4.10
    /// "refreshes on startup and every 5 minutes").
    pub async fn refresh_cache(&self, cancel: &CancellationToken) -> OpResult<()> {
        let rows = self.db.all_customer_timezones(DEFAULT_OP_TIMEOUT, cancel).await?;
        let mut by_timezone: HashMap<String, Vec<Id>> = HashMap::new();
        for (id, tz) in rows {
            by_timezone.entry(tz).or_default().push(id);
        }
        *self.cache.write() = SchedulerCache { by_timezone };
        Ok(())
    }

    /// Calls [`Scheduler::refresh_cache`] on [`CACHE_REFRESH_INTERVAL`] until
    /// cancelled. A failed refresh just logs and keeps the stale cache.
    pub async fn run_cache_refresh(&self, cancel: &CancellationToken) {
        let mut ticker = tokio::time::interval(CACHE_REFRESH_INTERVAL);
        ticker.tick().await; // first tick fires immediately; startup already refreshed.
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.refresh_cache(cancel).await {
                        warn!(error = %err, "scheduler cache refresh failed, keeping stale cache");
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    }

    /// Weighted pick of a customer (§4.10): falls back to a single "random
    /// active customer" read when the cache is empty.
    pub async fn pick_customer(&self, rng: &mut RngManager, cancel: &CancellationToken) -> OpResult<Customer> {
        let chosen_id = {
            let cache = self.cache.read();
            if cache.by_timezone.is_empty() {
                None
            } else {
                let weights = timezone_weights(&cache.by_timezone, |tz| self.tz_mgr.combined(tz));
                let draw = rng.float_unit() * weights.iter().map(|(_, w)| w).sum::<f64>();
                pick_timezone(&weights, draw).and_then(|tz| cache.by_timezone.get(&tz).map(|ids| *rng.pick(ids)))
            }
        };

        match chosen_id {
            Some(id) => self.db.customer_by_id(id, DEFAULT_OP_TIMEOUT, cancel).await,
            None => self.db.random_customer(DEFAULT_OP_TIMEOUT, cancel).await,
        }
    }

    pub fn should_execute_session(&self, customer: &Customer, rng: &mut RngManager) -> bool {
        self.activity.should_be_active(&self.tz_mgr, customer, rng)
    }

    /// `(1s / num_sessions) * think_time_multiplier(tz)`, divided by the
    /// active burst multiplier for `tz` when a burst is in effect (§4.10).
    pub fn session_pacing(&self, customer: &Customer) -> Duration {
        let base = Duration::from_secs(1).div_f64(self.num_sessions.max(1) as f64);
        let multiplier = self.activity.think_time_multiplier(&self.tz_mgr, &customer.timezone);
        let pacing = base.mul_f64(multiplier);
        let burst_multiplier = self.burst.active_multiplier(&customer.timezone);
        if burst_multiplier > 1.0 {
            pacing.div_f64(burst_multiplier)
        } else {
            pacing
        }
    }
}

/// Per-timezone weight, floored at [`MIN_TIMEZONE_WEIGHT`], sorted by
/// timezone name so the cumulative-weight draw is deterministic given a
/// seeded RNG regardless of hash-map iteration order.
fn timezone_weights(
    by_timezone: &HashMap<String, Vec<Id>>,
    combined_activity: impl Fn(&str) -> f64,
) -> Vec<(String, f64)> {
    let mut weights: Vec<(String, f64)> = by_timezone
        .iter()
        .map(|(tz, ids)| (tz.clone(), (combined_activity(tz) * ids.len() as f64).max(MIN_TIMEZONE_WEIGHT)))
        .collect();
    weights.sort_by(|a, b| a.0.cmp(&b.0));
    weights
}

/// First timezone whose cumulative weight is `> draw` (§4.10 step 3).
fn pick_timezone(weights: &[(String, f64)], draw: f64) -> Option<String> {
    let mut cumulative = 0.0;
    for (tz, weight) in weights {
        cumulative += weight;
        if draw < cumulative {
            return Some(tz.clone());
        }
    }
    weights.last().map(|(tz, _)| tz.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_are_floored_and_sorted() {
        let mut map = HashMap::new();
        map.insert("Zebra/Zone".to_string(), vec![1]);
        map.insert("Alpha/Zone".to_string(), vec![2, 3]);
        let weights = timezone_weights(&map, |_| 0.0);
        assert_eq!(weights[0].0, "Alpha/Zone");
        assert_eq!(weights[1].0, "Zebra/Zone");
        assert!(weights.iter().all(|(_, w)| *w >= MIN_TIMEZONE_WEIGHT));
    }

    #[test]
    fn pick_timezone_selects_by_cumulative_weight() {
        let weights = vec![("A".to_string(), 1.0), ("B".to_string(), 3.0)];
        assert_eq!(pick_timezone(&weights, 0.5), Some("A".to_string()));
        assert_eq!(pick_timezone(&weights, 1.5), Some("B".to_string()));
        assert_eq!(pick_timezone(&weights, 3.9), Some("B".to_string()));
    }

    #[test]
    fn pick_timezone_on_empty_weights_is_none() {
        assert_eq!(pick_timezone(&[], 0.0), None);
    }
}
