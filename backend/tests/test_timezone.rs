//! Timezone manager behavior that downstream modules (activity, scheduler)
//! depend on: insert-once caching, wraparound active windows, and composed
//! weights staying well-formed for every representative timezone the burst
//! manager polls.

use bankload_engine::burst::REPRESENTATIVE_TIMEZONES;
use bankload_engine::timezone::{ActiveWindow, TimezoneManager};
use chrono_tz::Tz;

#[test]
fn every_representative_timezone_resolves_to_a_real_iana_zone() {
    let mgr = TimezoneManager::new(ActiveWindow::default());
    for tz in REPRESENTATIVE_TIMEZONES {
        let resolved = mgr.resolve(tz);
        assert_ne!(resolved, Tz::UTC, "{tz} unexpectedly resolved to UTC");
    }
}

#[test]
fn combined_weight_is_always_within_unit_bounds_for_every_representative_zone() {
    let mgr = TimezoneManager::new(ActiveWindow::default());
    for tz in REPRESENTATIVE_TIMEZONES {
        let combined = mgr.combined(tz);
        assert!((0.0..=1.0).contains(&combined), "{tz} combined={combined}");
    }
}

#[test]
fn default_active_window_covers_the_documented_business_hours() {
    let window = ActiveWindow::default();
    assert!(window.contains(7));
    assert!(window.contains(21));
    assert!(!window.contains(22));
    assert!(!window.contains(6));
}

#[test]
fn night_shift_window_wraps_across_midnight() {
    let window = ActiveWindow { start: 22, end: 6 };
    for hour in [22, 23, 0, 1, 5] {
        assert!(window.contains(hour), "expected {hour} inside wraparound window");
    }
    for hour in [6, 12, 21] {
        assert!(!window.contains(hour), "expected {hour} outside wraparound window");
    }
}

#[test]
fn unknown_zone_names_never_panic_and_settle_on_utc() {
    let mgr = TimezoneManager::new(ActiveWindow::default());
    for bogus in ["Mars/Olympus_Mons", "", "not_a_zone"] {
        assert_eq!(mgr.resolve(bogus), Tz::UTC);
        let _ = mgr.combined(bogus); // must not panic
    }
}

#[test]
fn repeated_resolution_of_the_same_zone_is_cheap_and_stable() {
    let mgr = TimezoneManager::new(ActiveWindow::default());
    let first = mgr.resolve("Europe/Berlin");
    for _ in 0..50 {
        assert_eq!(mgr.resolve("Europe/Berlin"), first);
    }
}
