//! Burst providers + manager (C4).
//!
//! Each provider detects a time-bounded amplification of offered load (a
//! "burst") for a given timezone. The manager tracks which bursts are
//! currently active, composes their multipliers and extra-session counts,
//! and reaps expired events.

mod providers;

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

pub use providers::{LunchBurstProvider, ManualBurstProvider, PayrollBurstProvider, RandomBurstProvider};

use crate::rng::RngManager;
use crate::timezone::TimezoneManager;

/// The four burst kinds (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstKind {
    Lunch,
    Payroll,
    Random,
    Manual,
}

/// A time-bounded amplification of offered load for one timezone.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: BurstKind,
    pub timezone: String,
    pub multiplier: f64,
    pub extra_sessions: u32,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl Event {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.ends_at
    }
}

/// Tagged set of burst provider variants sharing one capability surface:
/// `check(tz, now)` against a stateful provider returns `Some(Event)` when
/// that provider's trigger condition fires for that timezone right now.
pub enum BurstProvider {
    Lunch(LunchBurstProvider),
    Payroll(PayrollBurstProvider),
    Random(RandomBurstProvider),
    Manual(ManualBurstProvider),
}

impl BurstProvider {
    pub fn kind(&self) -> BurstKind {
        match self {
            BurstProvider::Lunch(_) => BurstKind::Lunch,
            BurstProvider::Payroll(_) => BurstKind::Payroll,
            BurstProvider::Random(_) => BurstKind::Random,
            BurstProvider::Manual(_) => BurstKind::Manual,
        }
    }

    pub fn check(
        &self,
        tz_mgr: &TimezoneManager,
        tz: &str,
        now: DateTime<Utc>,
        rng: &mut RngManager,
    ) -> Option<Event> {
        match self {
            BurstProvider::Lunch(p) => p.check(tz_mgr, tz, now),
            BurstProvider::Payroll(p) => p.check(tz_mgr, tz, now),
            BurstProvider::Random(p) => p.check(tz, now, rng),
            BurstProvider::Manual(p) => p.check(tz, now),
        }
    }
}

/// Representative timezones the manager's background loop polls, one per
/// major region (§4.4 "run").
pub const REPRESENTATIVE_TIMEZONES: &[&str] = &[
    "America/New_York",
    "America/Chicago",
    "America/Los_Angeles",
    "Europe/London",
    "Europe/Berlin",
    "Asia/Tokyo",
    "Asia/Singapore",
    "Pacific/Auckland",
];

/// Holds the set of currently active burst [`Event`]s and composes them.
pub struct BurstManager {
    providers: Vec<BurstProvider>,
    active: Mutex<Vec<Event>>,
}

impl BurstManager {
    pub fn new(providers: Vec<BurstProvider>) -> Self {
        Self {
            providers,
            active: Mutex::new(Vec::new()),
        }
    }

    /// Queue a manual burst request (operator-triggered).
    pub fn trigger_manual(&self, tz: &str, multiplier: f64, duration: Duration, extra_sessions: u32) {
        let now = Utc::now();
        let mut active = self.active.lock();
        active.push(Event {
            kind: BurstKind::Manual,
            timezone: tz.to_string(),
            multiplier,
            extra_sessions,
            started_at: now,
            ends_at: now + chrono::Duration::from_std(duration).unwrap_or_default(),
        });
    }

    /// Poll every provider for `tz`; append a new event only if no event of
    /// that provider's kind is already active for this timezone (prevents
    /// re-entry), and reap anything that has expired.
    pub fn check_bursts(&self, tz_mgr: &TimezoneManager, tz: &str, rng: &mut RngManager) {
        let now = Utc::now();
        let mut active = self.active.lock();
        active.retain(|event| event.is_active(now));

        for provider in &self.providers {
            // Manual bursts are appended directly via `trigger_manual`, never
            // auto-detected here.
            if matches!(provider.kind(), BurstKind::Manual) {
                continue;
            }
            let already_active = active
                .iter()
                .any(|e| e.kind == provider.kind() && e.timezone == tz && e.is_active(now));
            if already_active {
                continue;
            }
            if let Some(event) = provider.check(tz_mgr, tz, now, rng) {
                active.push(event);
            }
        }
    }

    /// Product of the multipliers of every event currently active for `tz`.
    pub fn active_multiplier(&self, tz: &str) -> f64 {
        let now = Utc::now();
        self.active
            .lock()
            .iter()
            .filter(|e| e.timezone == tz && e.is_active(now))
            .map(|e| e.multiplier)
            .product()
    }

    /// Sum of extra-session counts across every event active for `tz`.
    pub fn extra_session_count(&self, tz: &str) -> u32 {
        let now = Utc::now();
        self.active
            .lock()
            .iter()
            .filter(|e| e.timezone == tz && e.is_active(now))
            .map(|e| e.extra_sessions)
            .sum()
    }

    pub fn active_events_snapshot(&self) -> Vec<Event> {
        self.active.lock().clone()
    }

    /// Poll `check_bursts` across [`REPRESENTATIVE_TIMEZONES`] every
    /// `interval`, invoking `on_burst` for each newly-discovered event, until
    /// `cancel` fires.
    pub async fn run<F>(
        &self,
        tz_mgr: &TimezoneManager,
        interval: Duration,
        cancel: &CancellationToken,
        rng: &mut RngManager,
        mut on_burst: F,
    ) where
        F: FnMut(&Event),
    {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for tz in REPRESENTATIVE_TIMEZONES {
                        let before = self.active.lock().len();
                        self.check_bursts(tz_mgr, tz, rng);
                        let active = self.active.lock();
                        if active.len() > before {
                            if let Some(newest) = active.last() {
                                on_burst(newest);
                            }
                        }
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    }
}

impl Clone for Event {
    fn clone(&self) -> Self {
        Event {
            kind: self.kind,
            timezone: self.timezone.clone(),
            multiplier: self.multiplier,
            extra_sessions: self.extra_sessions,
            started_at: self.started_at,
            ends_at: self.ends_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compounding_two_simultaneous_bursts_multiplies() {
        let manager = BurstManager::new(vec![]);
        manager.trigger_manual("UTC", 2.0, Duration::from_secs(300), 10);
        manager.trigger_manual("UTC", 1.5, Duration::from_secs(300), 5);
        assert!((manager.active_multiplier("UTC") - 3.0).abs() < 1e-9);
        assert_eq!(manager.extra_session_count("UTC"), 15);
    }

    #[test]
    fn expired_events_are_excluded_from_composition() {
        let manager = BurstManager::new(vec![]);
        manager.trigger_manual("UTC", 2.0, Duration::from_millis(1), 10);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(manager.active_multiplier("UTC"), 1.0);
        assert_eq!(manager.extra_session_count("UTC"), 0);
    }
}
