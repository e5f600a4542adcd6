//! Top-level configuration (§6).
//!
//! This module only defines the shape and validates it; `cli` layers a
//! config file, environment variables (`BANKLOAD_*`), and flags on top of
//! these defaults with the `config` crate before handing an [`EngineConfig`]
//! to [`crate::manager::SessionManager`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::activity::ActivityConfig;
use crate::audit::AuditWriterConfig;
use crate::db::PoolConfig;
use crate::error::EngineError;
use crate::load::LoadControllerConfig;

/// Tuning knobs for the four burst providers (§4.4), gathered here since the
/// providers themselves take bare constructor arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurstConfig {
    pub enable_lunch_burst: bool,
    pub lunch_multiplier: f64,
    pub lunch_duration: Duration,
    pub enable_payroll_burst: bool,
    pub payroll_multiplier: f64,
    pub payroll_duration: Duration,
    pub enable_random_burst: bool,
    pub random_check_interval: u32,
    pub random_probability: f64,
    pub random_min_multiplier: f64,
    pub random_max_multiplier: f64,
    pub random_min_duration: Duration,
    pub random_max_duration: Duration,
    pub random_cooldown: Duration,
    /// Legacy single-knob multiplier (§6 `burst_multiplier`), superseded by
    /// the per-kind multipliers above but still accepted.
    pub burst_multiplier: f64,
    /// How often the manager's background loop polls the representative
    /// timezones (§4.4 "run").
    pub poll_interval: Duration,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            enable_lunch_burst: true,
            lunch_multiplier: 3.0,
            lunch_duration: Duration::from_secs(2 * 3600),
            enable_payroll_burst: true,
            payroll_multiplier: 5.0,
            payroll_duration: Duration::from_secs(8 * 3600),
            enable_random_burst: true,
            random_check_interval: 20,
            random_probability: 0.05,
            random_min_multiplier: 1.5,
            random_max_multiplier: 4.0,
            random_min_duration: Duration::from_secs(600),
            random_max_duration: Duration::from_secs(3600),
            random_cooldown: Duration::from_secs(3600),
            burst_multiplier: 2.0,
            poll_interval: Duration::from_secs(60),
        }
    }
}

/// The full set of engine knobs (§6). Every field here is reachable from a
/// CLI flag or `BANKLOAD_`-prefixed environment variable; see `cli`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// `0` means "draw from OS entropy"; resolved once at startup via
    /// [`crate::rng::resolve_seed`] and logged so the run can be repeated.
    pub seed: u64,
    pub num_sessions: u32,
    pub min_think_time: Duration,
    pub max_think_time: Duration,
    pub metrics_interval: Duration,
    pub read_write_ratio: f64,
    pub failed_login_rate: f64,
    pub insufficient_funds_rate: f64,
    pub timeout_rate: f64,
    pub active_hour_start: u32,
    pub active_hour_end: u32,
    pub activity: ActivityConfig,
    pub load: LoadControllerConfig,
    pub burst: BurstConfig,
    pub pool: PoolConfig,
    pub audit: AuditWriterConfig,
    /// Bound on graceful worker shutdown once cancellation fires (§6).
    pub drain_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            num_sessions: 100,
            min_think_time: Duration::from_millis(500),
            max_think_time: Duration::from_secs(3),
            metrics_interval: Duration::from_secs(10),
            read_write_ratio: 2.0,
            failed_login_rate: 0.02,
            insufficient_funds_rate: 0.05,
            timeout_rate: 0.01,
            active_hour_start: 7,
            active_hour_end: 22,
            activity: ActivityConfig::default(),
            load: LoadControllerConfig::default(),
            burst: BurstConfig::default(),
            pool: PoolConfig {
                dsn: String::new(),
                driver: "postgres".into(),
                max_open_conns: 20,
                max_idle_conns: 5,
                conn_max_lifetime: Duration::from_secs(30 * 60),
                conn_max_idle_time: Duration::from_secs(5 * 60),
            },
            audit: AuditWriterConfig::default(),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Rejects configuration that would make the engine behave nonsensically
    /// rather than letting it start and misbehave at runtime.
    pub fn validate(&self) -> Result<(), EngineError> {
        for (name, rate) in [
            ("failed_login_rate", self.failed_login_rate),
            ("insufficient_funds_rate", self.insufficient_funds_rate),
            ("timeout_rate", self.timeout_rate),
            ("random burst probability", self.burst.random_probability),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(EngineError::InvalidConfig(format!("{name} must be within [0, 1], got {rate}")));
            }
        }
        if self.active_hour_start > 23 || self.active_hour_end > 23 {
            return Err(EngineError::InvalidConfig(format!(
                "active_hour_start/end must be within 0..=23, got {}/{}",
                self.active_hour_start, self.active_hour_end
            )));
        }
        if self.num_sessions == 0 {
            return Err(EngineError::InvalidConfig("num_sessions must be at least 1".into()));
        }
        if self.min_think_time > self.max_think_time {
            return Err(EngineError::InvalidConfig(
                "min_think_time must not exceed max_think_time".into(),
            ));
        }
        if self.pool.dsn.trim().is_empty() {
            return Err(EngineError::InvalidConfig("pool.dsn must not be empty".into()));
        }
        Ok(())
    }
}
