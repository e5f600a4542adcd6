//! Activity calculator (C3).
//!
//! Composes the timezone manager's combined weight with calendar, segment,
//! and per-customer scores into the final probability that a customer acts
//! on this scheduling tick (§4.3).

use serde::{Deserialize, Serialize};

use crate::model::{Customer, CustomerSegment};
use crate::rng::RngManager;
use crate::timezone::TimezoneManager;

/// The channel a scheduler should steer a session towards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionType {
    Atm,
    Online,
    Business,
}

/// Calendar and session-mix knobs the activity calculator needs beyond the
/// timezone manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityConfig {
    /// Local days-of-month that amplify activity the most (payroll runs).
    pub payroll_days: Vec<u32>,
    /// Local days-of-month that amplify activity moderately (common bill
    /// due dates). Not specified numerically by the source spec; chosen as
    /// a reasonable default and documented as an open-question decision.
    pub bill_days: Vec<u32>,
    pub payroll_modifier: f64,
    pub bill_modifier: f64,
    pub atm_session_ratio: f64,
    pub online_session_ratio: f64,
    pub business_session_ratio: f64,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            payroll_days: (25..=31).collect(),
            bill_days: vec![1, 15],
            payroll_modifier: 2.0,
            bill_modifier: 1.3,
            atm_session_ratio: 0.3,
            online_session_ratio: 0.5,
            business_session_ratio: 0.2,
        }
    }
}

/// The packaged result of [`ActivityCalculator::make_activity_decision`].
#[derive(Debug, Clone, Copy)]
pub struct ActivityDecision {
    pub should_execute: bool,
    pub probability: f64,
    pub think_time_multiplier: f64,
    pub is_payroll: bool,
    pub is_lunch: bool,
    pub recommended_type: SessionType,
}

pub struct ActivityCalculator {
    config: ActivityConfig,
}

impl ActivityCalculator {
    pub fn new(config: ActivityConfig) -> Self {
        Self { config }
    }

    /// `payroll_days → payroll_modifier (default 2.0); bill_days → 1.3; else 1.0`.
    pub fn monthly_modifier(&self, tz_mgr: &TimezoneManager, tz: &str) -> f64 {
        use chrono::Datelike;
        let day = tz_mgr.local_time(tz).day();
        if self.config.payroll_days.contains(&day) {
            self.config.payroll_modifier
        } else if self.config.bill_days.contains(&day) {
            self.config.bill_modifier
        } else {
            1.0
        }
    }

    pub fn is_payroll_period(&self, tz_mgr: &TimezoneManager, tz: &str) -> bool {
        use chrono::Datelike;
        self.config.payroll_days.contains(&tz_mgr.local_time(tz).day())
    }

    /// Hours 12-13 local, mirroring the lunch burst provider's window.
    pub fn is_lunch_hour(&self, tz_mgr: &TimezoneManager, tz: &str) -> bool {
        matches!(tz_mgr.local_hour(tz), 12 | 13)
    }

    /// 0.7 at the sharpest peaks (08-10, 12-13), 0.8 elsewhere in the active
    /// window, 1.0 (slowest pacing) outside it.
    pub fn think_time_multiplier(&self, tz_mgr: &TimezoneManager, tz: &str) -> f64 {
        let hour = tz_mgr.local_hour(tz);
        if matches!(hour, 8..=10 | 12..=13) {
            0.7
        } else if tz_mgr.within_active_window(tz) {
            0.8
        } else {
            1.0
        }
    }

    /// Final per-customer probability, clamped to `[0, 1]`.
    pub fn probability(&self, tz_mgr: &TimezoneManager, customer: &Customer) -> f64 {
        let combined = tz_mgr.combined(&customer.timezone);
        let monthly = self.monthly_modifier(tz_mgr, &customer.timezone);
        let segment = customer.segment.activity_modifier();
        let personal = 0.5 + 0.5 * customer.activity_score.clamp(0.0, 1.0);
        (combined * monthly * segment * personal).min(1.0)
    }

    pub fn should_be_active(
        &self,
        tz_mgr: &TimezoneManager,
        customer: &Customer,
        rng: &mut RngManager,
    ) -> bool {
        rng.float_unit() < self.probability(tz_mgr, customer)
    }

    /// Business/corporate customers always get Business; otherwise a prior
    /// towards ATM at lunch and Online at the morning peak, falling back to
    /// the configured session-type ratios.
    pub fn recommended_session_type(
        &self,
        tz_mgr: &TimezoneManager,
        customer: &Customer,
        rng: &mut RngManager,
    ) -> SessionType {
        if customer.segment.forces_business_channel() {
            return SessionType::Business;
        }

        let hour = tz_mgr.local_hour(&customer.timezone);
        if matches!(hour, 12 | 13) && rng.bool_with_probability(0.5) {
            return SessionType::Atm;
        }
        if matches!(hour, 8..=10) && rng.bool_with_probability(0.6) {
            return SessionType::Online;
        }

        let weights = [
            self.config.atm_session_ratio,
            self.config.online_session_ratio,
            self.config.business_session_ratio,
        ];
        match rng.weighted_pick(&weights) {
            0 => SessionType::Atm,
            1 => SessionType::Online,
            _ => SessionType::Business,
        }
    }

    pub fn make_activity_decision(
        &self,
        tz_mgr: &TimezoneManager,
        customer: &Customer,
        rng: &mut RngManager,
    ) -> ActivityDecision {
        let probability = self.probability(tz_mgr, customer);
        let should_execute = rng.float_unit() < probability;
        ActivityDecision {
            should_execute,
            probability,
            think_time_multiplier: self.think_time_multiplier(tz_mgr, &customer.timezone),
            is_payroll: self.is_payroll_period(tz_mgr, &customer.timezone),
            is_lunch: self.is_lunch_hour(tz_mgr, &customer.timezone),
            recommended_type: self.recommended_session_type(tz_mgr, customer, rng),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CustomerStatus;
    use chrono::Utc;

    fn customer(segment: CustomerSegment, activity_score: f64, tz: &str) -> Customer {
        Customer {
            id: 1,
            first_name: "A".into(),
            last_name: "B".into(),
            timezone: tz.to_string(),
            home_branch_id: 1,
            segment,
            status: CustomerStatus::Active,
            activity_score,
            username: "ab".into(),
            password_hash: "x".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn probability_is_always_in_unit_interval() {
        let calc = ActivityCalculator::new(ActivityConfig::default());
        let tz_mgr = TimezoneManager::new(Default::default());
        for segment in [
            CustomerSegment::Regular,
            CustomerSegment::Premium,
            CustomerSegment::Private,
            CustomerSegment::Business,
            CustomerSegment::Corporate,
        ] {
            for score in [0.0, 0.3, 0.7, 1.0] {
                let cust = customer(segment, score, "America/New_York");
                let p = calc.probability(&tz_mgr, &cust);
                assert!((0.0..=1.0).contains(&p), "p={p} out of range");
            }
        }
    }

    #[test]
    fn business_and_corporate_always_recommend_business() {
        let calc = ActivityCalculator::new(ActivityConfig::default());
        let tz_mgr = TimezoneManager::new(Default::default());
        let mut rng = RngManager::new(1);
        for segment in [CustomerSegment::Business, CustomerSegment::Corporate] {
            let cust = customer(segment, 0.5, "UTC");
            assert_eq!(
                calc.recommended_session_type(&tz_mgr, &cust, &mut rng),
                SessionType::Business
            );
        }
    }

    #[test]
    fn unknown_bill_and_payroll_days_default_to_unit_modifier() {
        let cfg = ActivityConfig {
            payroll_days: vec![],
            bill_days: vec![],
            ..ActivityConfig::default()
        };
        let calc = ActivityCalculator::new(cfg);
        let tz_mgr = TimezoneManager::new(Default::default());
        assert_eq!(calc.monthly_modifier(&tz_mgr, "UTC"), 1.0);
    }
}
