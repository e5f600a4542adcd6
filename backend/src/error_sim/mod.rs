//! Error simulator (C6).
//!
//! Owns the configurable injection rates for the three simulated business
//! failures that carry a dedicated rate (§4.6), classifies *any* error
//! (simulated or real) into the ten-way taxonomy from §7, tracks per-kind
//! counters, and provides the retryable-operation wrapper with exponential
//! backoff and jitter.

use std::future::Future;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::rng::RngManager;

/// The eight simulated/domain business errors (§4.6, §7). Never fatal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusinessError {
    #[error("authentication failed")]
    AuthFailed,
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("operation timed out")]
    SimulatedTimeout,
    #[error("rate limited")]
    RateLimited,
    #[error("account is locked")]
    AccountLocked,
    #[error("unknown or invalid beneficiary")]
    InvalidBeneficiary,
    #[error("daily limit exceeded")]
    DailyLimitExceeded,
    #[error("service temporarily unavailable")]
    ServiceUnavailable,
    #[error("no excess funds to sweep")]
    NoExcessFunds,
}

/// The full error taxonomy (§7). `Database` and `Unknown` are always
/// infrastructure (fatal); everything else is a business error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Auth,
    Funds,
    Timeout,
    RateLimit,
    AccountLock,
    Beneficiary,
    DailyLimit,
    Service,
    NoExcessFunds,
    Database,
    Unknown,
}

impl ErrorKind {
    /// Business errors are expected, counted, and never halt the process.
    pub fn is_business(self) -> bool {
        !matches!(self, ErrorKind::Database | ErrorKind::Unknown)
    }

    /// Default retryable set: timeout and service-unavailable only.
    pub fn is_retryable_by_default(self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::Service)
    }
}

impl BusinessError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BusinessError::AuthFailed => ErrorKind::Auth,
            BusinessError::InsufficientFunds => ErrorKind::Funds,
            BusinessError::SimulatedTimeout => ErrorKind::Timeout,
            BusinessError::RateLimited => ErrorKind::RateLimit,
            BusinessError::AccountLocked => ErrorKind::AccountLock,
            BusinessError::InvalidBeneficiary => ErrorKind::Beneficiary,
            BusinessError::DailyLimitExceeded => ErrorKind::DailyLimit,
            BusinessError::ServiceUnavailable => ErrorKind::Service,
            BusinessError::NoExcessFunds => ErrorKind::NoExcessFunds,
        }
    }
}

/// Classify an [`EngineError`] into the taxonomy. Any infrastructure error
/// not otherwise recognized classifies as `Unknown`.
pub fn classify_engine_error(err: &EngineError) -> ErrorKind {
    match err {
        EngineError::Database(_) => ErrorKind::Database,
        EngineError::Timeout(_) => ErrorKind::Timeout,
        EngineError::Infrastructure(_) | EngineError::SessionCreation(_) => ErrorKind::Unknown,
        EngineError::InvalidConfig(_) => ErrorKind::Unknown,
    }
}

/// Injection rates, counters, and the retry policy for simulated and
/// classified errors.
pub struct ErrorSimulator {
    failed_login_rate: f64,
    insufficient_funds_rate: f64,
    timeout_rate: f64,
    max_retries: u32,
    retry_base: Duration,
    retry_max: Duration,
    jitter_enabled: bool,
    error_counts: DashMap<ErrorKind, u64>,
    retry_counts: DashMap<ErrorKind, u64>,
}

impl ErrorSimulator {
    pub fn new(
        failed_login_rate: f64,
        insufficient_funds_rate: f64,
        timeout_rate: f64,
    ) -> Self {
        Self {
            failed_login_rate,
            insufficient_funds_rate,
            timeout_rate,
            max_retries: 3,
            retry_base: Duration::from_millis(100),
            retry_max: Duration::from_secs(5),
            jitter_enabled: true,
            error_counts: DashMap::new(),
            retry_counts: DashMap::new(),
        }
    }

    pub fn with_retry_policy(mut self, max_retries: u32, base: Duration, max: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base = base;
        self.retry_max = max;
        self
    }

    /// Fresh draw: should a login attempt be simulated as failed?
    pub fn should_fail_login(&self, rng: &mut RngManager) -> bool {
        rng.bool_with_probability(self.failed_login_rate)
    }

    /// Fresh draw: should this debit be simulated as insufficient funds?
    pub fn should_fail_insufficient_funds(&self, rng: &mut RngManager) -> bool {
        rng.bool_with_probability(self.insufficient_funds_rate)
    }

    /// Fresh draw: should this call be simulated as a timeout?
    pub fn should_timeout(&self, rng: &mut RngManager) -> bool {
        rng.bool_with_probability(self.timeout_rate)
    }

    /// Sleep 5-15s (honoring cancellation) then return a simulated timeout.
    pub async fn simulate_timeout(
        &self,
        rng: &mut RngManager,
        cancel: &CancellationToken,
    ) -> BusinessError {
        let sleep_for = rng.duration_in(Duration::from_secs(5), Duration::from_secs(15));
        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            _ = cancel.cancelled() => {}
        }
        self.record_error(ErrorKind::Timeout);
        BusinessError::SimulatedTimeout
    }

    pub fn record_error(&self, kind: ErrorKind) {
        *self.error_counts.entry(kind).or_insert(0) += 1;
    }

    pub fn record_retry(&self, kind: ErrorKind) {
        *self.retry_counts.entry(kind).or_insert(0) += 1;
    }

    pub fn error_count(&self, kind: ErrorKind) -> u64 {
        self.error_counts.get(&kind).map(|v| *v).unwrap_or(0)
    }

    pub fn retry_count(&self, kind: ErrorKind) -> u64 {
        self.retry_counts.get(&kind).map(|v| *v).unwrap_or(0)
    }

    pub fn error_counts_snapshot(&self) -> Vec<(ErrorKind, u64)> {
        self.error_counts
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    /// `delay(attempt) = min(base * 2^attempt, max) + uniform(0, delay/4)`
    /// jitter, when jitter is enabled.
    fn backoff_delay(&self, attempt: u32, rng: &mut RngManager) -> Duration {
        let exp = 2u64.saturating_pow(attempt);
        let scaled = self.retry_base.saturating_mul(exp as u32);
        let capped = scaled.min(self.retry_max);
        if !self.jitter_enabled {
            return capped;
        }
        let jitter_max = capped.as_nanos() as i64 / 4;
        if jitter_max <= 0 {
            return capped;
        }
        let jitter = rng.int_in_range(0, jitter_max.max(1));
        capped + Duration::from_nanos(jitter as u64)
    }

    /// Retry `op` with exponential backoff + jitter, but only for error
    /// kinds [`ErrorKind::is_retryable_by_default`] reports as retryable
    /// (by default: timeout and service-unavailable).
    pub async fn retry<F, Fut, T>(
        &self,
        rng: &mut RngManager,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let kind = classify_engine_error(&err);
                    self.record_error(kind);
                    if attempt >= self.max_retries || !kind.is_retryable_by_default() {
                        return Err(err);
                    }
                    self.record_retry(kind);
                    let delay = self.backoff_delay(attempt, rng);
                    attempt += 1;
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(err),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_errors_are_never_infrastructure() {
        for err in [
            BusinessError::AuthFailed,
            BusinessError::InsufficientFunds,
            BusinessError::SimulatedTimeout,
            BusinessError::RateLimited,
            BusinessError::AccountLocked,
            BusinessError::InvalidBeneficiary,
            BusinessError::DailyLimitExceeded,
            BusinessError::ServiceUnavailable,
            BusinessError::NoExcessFunds,
        ] {
            assert!(err.kind().is_business());
        }
    }

    #[test]
    fn database_and_unknown_are_infrastructure() {
        assert!(!ErrorKind::Database.is_business());
        assert!(!ErrorKind::Unknown.is_business());
    }

    #[test]
    fn default_retryable_set_is_timeout_and_service_only() {
        assert!(ErrorKind::Timeout.is_retryable_by_default());
        assert!(ErrorKind::Service.is_retryable_by_default());
        assert!(!ErrorKind::Auth.is_retryable_by_default());
        assert!(!ErrorKind::Funds.is_retryable_by_default());
    }

    #[test]
    fn error_counts_increment_per_kind() {
        let sim = ErrorSimulator::new(0.0, 0.0, 0.0);
        sim.record_error(ErrorKind::Auth);
        sim.record_error(ErrorKind::Auth);
        sim.record_error(ErrorKind::Funds);
        assert_eq!(sim.error_count(ErrorKind::Auth), 2);
        assert_eq!(sim.error_count(ErrorKind::Funds), 1);
        assert_eq!(sim.error_count(ErrorKind::Timeout), 0);
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_retries_on_timeout() {
        let sim = ErrorSimulator::new(0.0, 0.0, 0.0).with_retry_policy(
            2,
            Duration::from_millis(1),
            Duration::from_millis(5),
        );
        let mut rng = RngManager::new(1);
        let cancel = CancellationToken::new();
        let mut calls = 0;
        let result: Result<(), EngineError> = sim
            .retry(&mut rng, &cancel, || {
                calls += 1;
                async { Err(EngineError::Timeout(Duration::from_secs(1))) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls, 3); // initial + 2 retries
    }

    #[tokio::test]
    async fn retry_does_not_retry_non_retryable_kind() {
        let sim = ErrorSimulator::new(0.0, 0.0, 0.0);
        let mut rng = RngManager::new(1);
        let cancel = CancellationToken::new();
        let mut calls = 0;
        let result: Result<(), EngineError> = sim
            .retry(&mut rng, &cancel, || {
                calls += 1;
                async { Err(EngineError::InvalidConfig("bad".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
