//! Timezone manager (C2).
//!
//! Caches IANA locations with insert-once, read-many semantics and exposes
//! the hour-of-day and weekday weighting that the activity calculator (C3)
//! composes into a per-customer probability.

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::str::FromStr;

/// Inclusive-start, exclusive-end local-hour window. `end < start` means the
/// window wraps past midnight (e.g. a 22:00–06:00 night-shift window).
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct ActiveWindow {
    pub start: u32,
    pub end: u32,
}

impl Default for ActiveWindow {
    fn default() -> Self {
        // A typical business day: peaks 08-10 and 12-13.
        Self { start: 7, end: 22 }
    }
}

impl ActiveWindow {
    /// Whether `hour` (0-23) falls inside this window, honoring wraparound.
    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            hour >= self.start && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

/// Default 24-element hour-of-day weight table: peaks at 08-10 and 12-13,
/// a long tail overnight.
fn default_hour_weights() -> [f64; 24] {
    [
        0.05, 0.03, 0.02, 0.02, 0.03, 0.08, 0.20, 0.45, // 0-7
        0.85, 0.95, 0.90, 0.70, // 8-11
        0.80, 0.75, 0.55, 0.50, // 12-15
        0.55, 0.60, 0.65, 0.55, // 16-19
        0.40, 0.25, 0.15, 0.08, // 20-23
    ]
}

/// Caches IANA timezone lookups and the shared hour/weekday weight tables.
///
/// Invalid/unknown timezone strings resolve to UTC without failing the
/// caller.
pub struct TimezoneManager {
    cache: DashMap<String, Tz>,
    hour_weights: RwLock<[f64; 24]>,
    active_window: ActiveWindow,
}

impl TimezoneManager {
    pub fn new(active_window: ActiveWindow) -> Self {
        Self {
            cache: DashMap::new(),
            hour_weights: RwLock::new(default_hour_weights()),
            active_window,
        }
    }

    /// Resolve an IANA name to a [`Tz`], caching the result. Unknown names
    /// resolve to UTC.
    pub fn resolve(&self, tz_name: &str) -> Tz {
        if let Some(found) = self.cache.get(tz_name) {
            return *found;
        }
        let resolved = Tz::from_str(tz_name).unwrap_or(Tz::UTC);
        self.cache.insert(tz_name.to_string(), resolved);
        resolved
    }

    /// Current local time in the given (possibly invalid) timezone.
    pub fn local_time(&self, tz_name: &str) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.resolve(tz_name))
    }

    /// Current local hour-of-day (0-23) in the given timezone.
    pub fn local_hour(&self, tz_name: &str) -> u32 {
        self.local_time(tz_name).hour()
    }

    /// Whether the current local time falls inside the configured active
    /// window, honoring wraparound when `end < start`.
    pub fn within_active_window(&self, tz_name: &str) -> bool {
        self.active_window.contains(self.local_hour(tz_name))
    }

    /// `hour_weight[hour] * (outside_active_window ? 0.1 : 1.0)`.
    pub fn activity_probability(&self, tz_name: &str) -> f64 {
        let hour = self.local_hour(tz_name) as usize;
        let weight = self.hour_weights.read()[hour];
        let penalty = if self.within_active_window(tz_name) {
            1.0
        } else {
            0.1
        };
        weight * penalty
    }

    /// `1.0` weekday, `0.4` Saturday, `0.25` Sunday.
    pub fn weekday_multiplier(&self, tz_name: &str) -> f64 {
        match self.local_time(tz_name).weekday() {
            chrono::Weekday::Sat => 0.4,
            chrono::Weekday::Sun => 0.25,
            _ => 1.0,
        }
    }

    /// `activity_probability(tz) * weekday_multiplier(tz)`.
    pub fn combined(&self, tz_name: &str) -> f64 {
        self.activity_probability(tz_name) * self.weekday_multiplier(tz_name)
    }

    /// Override a single hour's weight, clamped to `[0, 1]`.
    pub fn set_hour_weight(&self, hour: usize, weight: f64) {
        assert!(hour < 24, "hour out of range");
        self.hour_weights.write()[hour] = weight.clamp(0.0, 1.0);
    }

    /// Apply a multiplicative lunch-hour boost to hours 12-13, clamped to
    /// `[0, 1]` per hour.
    pub fn apply_lunch_boost(&self, multiplier: f64) {
        let mut weights = self.hour_weights.write();
        for hour in [12usize, 13] {
            weights[hour] = (weights[hour] * multiplier).clamp(0.0, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_timezone_resolves_to_utc() {
        let mgr = TimezoneManager::new(ActiveWindow::default());
        assert_eq!(mgr.resolve("Not/ARealZone"), Tz::UTC);
    }

    #[test]
    fn cache_is_insert_once() {
        let mgr = TimezoneManager::new(ActiveWindow::default());
        let first = mgr.resolve("America/New_York");
        let second = mgr.resolve("America/New_York");
        assert_eq!(first, second);
        assert_eq!(mgr.cache.len(), 1);
    }

    #[test]
    fn wraparound_window_contains_boundary_hours() {
        let window = ActiveWindow { start: 22, end: 6 };
        assert!(window.contains(23));
        assert!(window.contains(0));
        assert!(window.contains(5));
        assert!(!window.contains(6));
        assert!(!window.contains(21));
    }

    #[test]
    fn set_hour_weight_clamps_to_unit_interval() {
        let mgr = TimezoneManager::new(ActiveWindow::default());
        mgr.set_hour_weight(3, 5.0);
        assert_eq!(mgr.hour_weights.read()[3], 1.0);
        mgr.set_hour_weight(3, -5.0);
        assert_eq!(mgr.hour_weights.read()[3], 0.0);
    }

    #[test]
    fn lunch_boost_is_clamped() {
        let mgr = TimezoneManager::new(ActiveWindow::default());
        mgr.set_hour_weight(12, 0.9);
        mgr.apply_lunch_boost(3.0);
        assert_eq!(mgr.hour_weights.read()[12], 1.0);
    }

    #[test]
    fn combined_is_never_negative() {
        let mgr = TimezoneManager::new(ActiveWindow::default());
        assert!(mgr.combined("Asia/Tokyo") >= 0.0);
    }
}
