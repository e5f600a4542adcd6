//! Session manager (C11).
//!
//! Owns the cancellation token everything else answers to, the worker pool,
//! and the lifecycle of every subservice: audit writer, scheduler cache
//! refresh, burst manager, load controller, and the metrics reporter (§4.11).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::activity::{ActivityCalculator, SessionType};
use crate::audit::{AuditStats, AuditWriter};
use crate::burst::{
    BurstManager, BurstProvider, LunchBurstProvider, ManualBurstProvider, PayrollBurstProvider, RandomBurstProvider,
};
use crate::config::EngineConfig;
use crate::db::{Database, OpError, OpResult, DEFAULT_OP_TIMEOUT};
use crate::error::EngineError;
use crate::error_sim::{ErrorKind, ErrorSimulator};
use crate::load::{LoadController, LoadPhase};
use crate::rng::{resolve_seed, RngManager, SharedRng};
use crate::scheduler::Scheduler;
use crate::session::{authenticate, run_atm_workflow, run_business_workflow, run_online_workflow, Session, SessionConfig, SessionServices, SessionState};
use crate::timezone::{ActiveWindow, TimezoneManager};

fn session_type_index(t: SessionType) -> usize {
    match t {
        SessionType::Atm => 0,
        SessionType::Online => 1,
        SessionType::Business => 2,
    }
}

const SESSION_TYPE_LABELS: [&str; 3] = ["atm", "online", "business"];

/// p50/p95/p99, in microseconds, for one op type.
#[derive(Debug, Clone, Copy)]
pub struct LatencyPercentiles {
    pub p50_micros: u64,
    pub p95_micros: u64,
    pub p99_micros: u64,
}

#[derive(Debug, Clone)]
pub struct FinalReport {
    pub elapsed: Duration,
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_failed_auth: u64,
    pub sessions_non_executing: u64,
    pub latency_by_session_type: Vec<(&'static str, LatencyPercentiles)>,
    pub error_counts: Vec<(ErrorKind, u64)>,
    pub burst_events: u64,
    pub audit: AuditStats,
    pub load_phase: LoadPhase,
    pub top_timezones: Vec<(String, u64)>,
}

/// Counters and per-session-type latency histograms the reporter and final
/// report read from. Latency is tracked per workflow type rather than per
/// individual database operation: the database layer already tracks
/// average per-call latency (`Database::stats`), and attributing full
/// percentile tracking to the coarser, audited unit (one workflow run) is
/// what the manager — not the database layer — owns per the module map.
struct Metrics {
    start: Instant,
    histograms: [Mutex<Histogram<u64>>; 3],
    sessions_started: AtomicU64,
    sessions_completed: AtomicU64,
    sessions_failed_auth: AtomicU64,
    sessions_non_executing: AtomicU64,
    sessions_since_tick: AtomicU64,
    burst_events: AtomicU64,
    timezone_counts: DashMap<String, u64>,
}

impl Metrics {
    fn new() -> Self {
        let make_histogram = || Mutex::new(Histogram::<u64>::new_with_bounds(1, 60_000_000, 3).expect("valid histogram bounds"));
        Self {
            start: Instant::now(),
            histograms: [make_histogram(), make_histogram(), make_histogram()],
            sessions_started: AtomicU64::new(0),
            sessions_completed: AtomicU64::new(0),
            sessions_failed_auth: AtomicU64::new(0),
            sessions_non_executing: AtomicU64::new(0),
            sessions_since_tick: AtomicU64::new(0),
            burst_events: AtomicU64::new(0),
            timezone_counts: DashMap::new(),
        }
    }

    fn record_latency(&self, session_type: SessionType, elapsed: Duration) {
        let mut hist = self.histograms[session_type_index(session_type)].lock();
        let _ = hist.record(elapsed.as_micros().max(1) as u64);
    }

    fn percentiles(&self, session_type: SessionType) -> LatencyPercentiles {
        let hist = self.histograms[session_type_index(session_type)].lock();
        LatencyPercentiles {
            p50_micros: hist.value_at_quantile(0.5),
            p95_micros: hist.value_at_quantile(0.95),
            p99_micros: hist.value_at_quantile(0.99),
        }
    }

    fn note_timezone(&self, tz: &str) {
        *self.timezone_counts.entry(tz.to_string()).or_insert(0) += 1;
    }

    fn top_timezones(&self, n: usize) -> Vec<(String, u64)> {
        let mut all: Vec<(String, u64)> = self.timezone_counts.iter().map(|e| (e.key().clone(), *e.value())).collect();
        all.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        all.truncate(n);
        all
    }
}

/// Owns every subservice and the worker pool driving them (§4.11).
pub struct SessionManager {
    config: Arc<EngineConfig>,
    db: Arc<Database>,
    audit: Arc<AuditWriter>,
    error_sim: Arc<ErrorSimulator>,
    tz_mgr: Arc<TimezoneManager>,
    activity: Arc<ActivityCalculator>,
    burst: Arc<BurstManager>,
    load: Arc<LoadController>,
    scheduler: Arc<Scheduler>,
    shared_rng: Arc<SharedRng>,
    session_services: SessionServices,
    cancel: CancellationToken,
    metrics: Arc<Metrics>,
    background_handles: Mutex<Vec<JoinHandle<()>>>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
    /// Set by any worker that hits an infrastructure error, so shutdown can
    /// still be graceful while `run` reports the failure to its caller
    /// (§6 "non-zero on fatal infrastructure error").
    fatal: AtomicBool,
    last_report: Mutex<Option<FinalReport>>,
}

impl SessionManager {
    /// Validates `config`, connects to the database, and wires every
    /// subservice. The audit writer's workers start immediately; everything
    /// else waits for [`SessionManager::run`].
    pub async fn new(config: EngineConfig) -> Result<Arc<Self>, EngineError> {
        config.validate()?;

        let seed = resolve_seed(config.seed);
        let shared_rng = Arc::new(SharedRng::new(seed));

        let db = Arc::new(Database::connect(&config.pool).await?);
        let audit = Arc::new(AuditWriter::start(db.clone(), config.audit.clone()));
        let error_sim = Arc::new(ErrorSimulator::new(
            config.failed_login_rate,
            config.insufficient_funds_rate,
            config.timeout_rate,
        ));
        let tz_mgr = Arc::new(TimezoneManager::new(ActiveWindow {
            start: config.active_hour_start,
            end: config.active_hour_end,
        }));
        let activity = Arc::new(ActivityCalculator::new(config.activity.clone()));

        let mut providers = Vec::new();
        if config.burst.enable_lunch_burst {
            providers.push(BurstProvider::Lunch(LunchBurstProvider::new(
                config.burst.lunch_multiplier,
                config.burst.lunch_duration,
            )));
        }
        if config.burst.enable_payroll_burst {
            providers.push(BurstProvider::Payroll(PayrollBurstProvider::new(
                config.burst.payroll_multiplier,
                config.burst.payroll_duration,
                config.activity.payroll_days.clone(),
            )));
        }
        if config.burst.enable_random_burst {
            providers.push(BurstProvider::Random(RandomBurstProvider::new(
                config.burst.random_check_interval,
                config.burst.random_probability,
                config.burst.random_min_multiplier,
                config.burst.random_max_multiplier,
                config.burst.random_min_duration,
                config.burst.random_max_duration,
                config.burst.random_cooldown,
            )));
        }
        providers.push(BurstProvider::Manual(ManualBurstProvider::new()));
        let burst = Arc::new(BurstManager::new(providers));

        let load = Arc::new(LoadController::new(config.load.clone()));
        let scheduler = Arc::new(Scheduler::new(db.clone(), tz_mgr.clone(), activity.clone(), burst.clone(), config.num_sessions));

        let session_services = SessionServices {
            db: db.clone(),
            audit: audit.clone(),
            error_sim: error_sim.clone(),
            tz_mgr: tz_mgr.clone(),
            activity: activity.clone(),
            config: Arc::new(SessionConfig {
                min_think_time: config.min_think_time,
                max_think_time: config.max_think_time,
                read_write_ratio: config.read_write_ratio,
            }),
        };

        Ok(Arc::new(Self {
            config: Arc::new(config),
            db,
            audit,
            error_sim,
            tz_mgr,
            activity,
            burst,
            load,
            scheduler,
            shared_rng,
            session_services,
            cancel: CancellationToken::new(),
            metrics: Arc::new(Metrics::new()),
            background_handles: Mutex::new(Vec::new()),
            worker_handles: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
            fatal: AtomicBool::new(false),
            last_report: Mutex::new(None),
        }))
    }

    /// The cancellation token external callers (signal handlers) trigger to
    /// start a graceful shutdown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Marks the run as having hit a fatal infrastructure error and starts
    /// shutdown. `run` still completes the graceful shutdown sequence, but
    /// reports failure to its caller once it does.
    fn mark_fatal(&self) {
        self.fatal.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }

    /// Startup order (§4.11): scheduler cache refresh, burst loop, load
    /// loop, metrics reporter, periodic cache refresh, N worker tasks. Runs
    /// until cancelled, then performs the full shutdown sequence.
    pub async fn run(self: Arc<Self>) -> Result<FinalReport, EngineError> {
        if let Err(err) = self.scheduler.refresh_cache(&self.cancel).await {
            warn!(error = %err, "initial scheduler cache refresh failed, starting with an empty cache");
        }

        {
            let manager = self.clone();
            let mut rng = self.shared_rng.fork();
            self.background_handles.lock().push(tokio::spawn(async move {
                let metrics = manager.metrics.clone();
                manager
                    .burst
                    .run(&manager.tz_mgr, manager.config.burst.poll_interval, &manager.cancel, &mut rng, |event| {
                        metrics.burst_events.fetch_add(1, Ordering::Relaxed);
                        info!(kind = ?event.kind, timezone = %event.timezone, multiplier = event.multiplier, "burst started");
                    })
                    .await;
            }));
        }

        {
            let manager = self.clone();
            self.background_handles
                .lock()
                .push(tokio::spawn(async move { manager.load.run(&manager.cancel).await }));
        }

        {
            let manager = self.clone();
            self.background_handles.lock().push(tokio::spawn(run_reporter(manager)));
        }

        {
            let manager = self.clone();
            self.background_handles
                .lock()
                .push(tokio::spawn(async move { manager.scheduler.run_cache_refresh(&manager.cancel).await }));
        }

        for worker_index in 0..self.config.num_sessions {
            let manager = self.clone();
            let rng = self.shared_rng.fork();
            self.worker_handles
                .lock()
                .push(tokio::spawn(async move { worker_loop(manager, worker_index, rng).await }));
        }

        self.cancel.cancelled().await;
        let report = self.stop().await;
        if self.fatal.load(Ordering::SeqCst) {
            Err(EngineError::Infrastructure(format!(
                "run stopped after a fatal infrastructure error; completed {} of {} started sessions",
                report.sessions_completed, report.sessions_started
            )))
        } else {
            Ok(report)
        }
    }

    /// Idempotent: the first call drains workers, stops the audit writer,
    /// and assembles the final report; later calls return the cached report.
    pub async fn stop(&self) -> FinalReport {
        self.cancel.cancel();
        if self.stopped.swap(true, Ordering::SeqCst) {
            return (*self.last_report.lock())
                .clone()
                .expect("stopped is only set after last_report is populated");
        }

        let worker_handles = std::mem::take(&mut *self.worker_handles.lock());
        let drain = futures_join_all(worker_handles);
        if tokio::time::timeout(self.config.drain_timeout, drain).await.is_err() {
            warn!("worker drain timed out after {:?}", self.config.drain_timeout);
        }

        let background_handles = std::mem::take(&mut *self.background_handles.lock());
        let _ = tokio::time::timeout(self.config.drain_timeout, futures_join_all(background_handles)).await;

        self.audit.stop().await;

        let report = FinalReport {
            elapsed: self.metrics.start.elapsed(),
            sessions_started: self.metrics.sessions_started.load(Ordering::Relaxed),
            sessions_completed: self.metrics.sessions_completed.load(Ordering::Relaxed),
            sessions_failed_auth: self.metrics.sessions_failed_auth.load(Ordering::Relaxed),
            sessions_non_executing: self.metrics.sessions_non_executing.load(Ordering::Relaxed),
            latency_by_session_type: vec![
                (SESSION_TYPE_LABELS[0], self.metrics.percentiles(SessionType::Atm)),
                (SESSION_TYPE_LABELS[1], self.metrics.percentiles(SessionType::Online)),
                (SESSION_TYPE_LABELS[2], self.metrics.percentiles(SessionType::Business)),
            ],
            error_counts: self.error_sim.error_counts_snapshot(),
            burst_events: self.metrics.burst_events.load(Ordering::Relaxed),
            audit: self.audit.stats(),
            load_phase: self.load.phase(),
            top_timezones: self.metrics.top_timezones(10),
        };

        info!(
            elapsed = ?report.elapsed,
            sessions_started = report.sessions_started,
            sessions_completed = report.sessions_completed,
            sessions_failed_auth = report.sessions_failed_auth,
            burst_events = report.burst_events,
            "final report"
        );
        for (label, pct) in &report.latency_by_session_type {
            info!(session_type = *label, p50_us = pct.p50_micros, p95_us = pct.p95_micros, p99_us = pct.p99_micros, "latency");
        }
        for (kind, count) in &report.error_counts {
            info!(kind = ?kind, count, "error count");
        }

        *self.last_report.lock() = Some(report.clone());
        report
    }
}

/// `futures::future::join_all` without pulling in the `futures` crate for
/// one call site: poll every handle to completion, ignoring join errors
/// (a panicked worker is already logged at its panic site).
async fn futures_join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

/// Logs running/recent throughput, error counts, and latency percentiles
/// every `metrics_interval` (§7 "periodic reporter").
async fn run_reporter(manager: Arc<SessionManager>) {
    let mut ticker = tokio::time::interval(manager.config.metrics_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let elapsed = manager.metrics.start.elapsed().as_secs_f64().max(1e-9);
                let completed = manager.metrics.sessions_completed.load(Ordering::Relaxed);
                let recent = manager.metrics.sessions_since_tick.swap(0, Ordering::Relaxed);
                let running_tps = completed as f64 / elapsed;
                let recent_tps = recent as f64 / manager.config.metrics_interval.as_secs_f64().max(1e-9);
                info!(
                    running_tps,
                    recent_tps,
                    load_phase = ?manager.load.phase(),
                    load_progress = manager.load.progress(),
                    "progress"
                );
            }
            _ = manager.cancel.cancelled() => break,
        }
    }
}

fn handle_infra<T>(manager: &SessionManager, result: OpResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(OpError::Infra(err)) => {
            error!(error = %err, "infrastructure error, requesting shutdown");
            manager.mark_fatal();
            None
        }
        Err(OpError::Business(err)) => {
            warn!(error = %err, "unexpected business error during session setup, skipping");
            None
        }
    }
}

/// One worker's infinite loop: gated by the load controller's current
/// target, create a session via the scheduler, run its workflow, repeat.
/// Session-creation failures are treated as infrastructure errors — they
/// imply the database itself is unreachable (§4.11).
async fn worker_loop(manager: Arc<SessionManager>, worker_index: u32, mut rng: RngManager) {
    loop {
        if manager.cancel.is_cancelled() {
            break;
        }
        if worker_index >= manager.load.current_target() {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(200)) => {}
                _ = manager.cancel.cancelled() => break,
            }
            continue;
        }

        let Some(customer) = handle_infra(&manager, manager.scheduler.pick_customer(&mut rng, &manager.cancel).await) else {
            if manager.cancel.is_cancelled() {
                break;
            }
            continue;
        };

        if !manager.scheduler.should_execute_session(&customer, &mut rng) {
            manager.metrics.sessions_non_executing.fetch_add(1, Ordering::Relaxed);
            let pacing = manager.scheduler.session_pacing(&customer);
            tokio::select! {
                _ = tokio::time::sleep(pacing) => {}
                _ = manager.cancel.cancelled() => break,
            }
            continue;
        }

        let Some(accounts) = handle_infra(&manager, manager.db.customer_accounts(customer.id, DEFAULT_OP_TIMEOUT, &manager.cancel).await) else {
            if manager.cancel.is_cancelled() {
                break;
            }
            continue;
        };
        if accounts.is_empty() {
            continue;
        }

        let session_type = manager.activity.recommended_session_type(&manager.tz_mgr, &customer, &mut rng);
        let atm = if matches!(session_type, SessionType::Atm) {
            match handle_infra(&manager, manager.db.random_atm(None, DEFAULT_OP_TIMEOUT, &manager.cancel).await) {
                Some(atm) => Some(atm),
                None if manager.cancel.is_cancelled() => break,
                None => None,
            }
        } else {
            None
        };

        manager.metrics.sessions_started.fetch_add(1, Ordering::Relaxed);
        manager.metrics.note_timezone(&customer.timezone);

        let session_rng = rng.fork();
        let mut session = Session::new(customer, accounts, session_type, atm, session_rng);
        let start = Instant::now();

        match authenticate(&mut session, &manager.session_services, &manager.cancel).await {
            Ok(true) => {
                let outcome = match session_type {
                    SessionType::Atm => run_atm_workflow(&mut session, &manager.session_services, &manager.cancel).await,
                    SessionType::Online => run_online_workflow(&mut session, &manager.session_services, &manager.cancel).await,
                    SessionType::Business => run_business_workflow(&mut session, &manager.session_services, &manager.cancel).await,
                };
                match outcome {
                    Ok(()) => {
                        manager.metrics.sessions_completed.fetch_add(1, Ordering::Relaxed);
                        manager.metrics.sessions_since_tick.fetch_add(1, Ordering::Relaxed);
                        manager.metrics.record_latency(session_type, start.elapsed());
                    }
                    Err(err) => {
                        error!(session_id = %session.id, error = %err, "workflow failed with an infrastructure error");
                        manager.mark_fatal();
                        break;
                    }
                }
            }
            Ok(false) => {
                manager.metrics.sessions_failed_auth.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                error!(session_id = %session.id, error = %err, "authentication failed with an infrastructure error");
                manager.mark_fatal();
                break;
            }
        }
        debug_assert!(!matches!(session.state, SessionState::Initialized));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_type_index_is_stable_and_distinct() {
        let indices: Vec<usize> = [SessionType::Atm, SessionType::Online, SessionType::Business]
            .iter()
            .map(|t| session_type_index(*t))
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn metrics_record_and_read_back_percentiles() {
        let metrics = Metrics::new();
        for micros in [100u64, 200, 300, 10_000] {
            metrics.record_latency(SessionType::Online, Duration::from_micros(micros));
        }
        let pct = metrics.percentiles(SessionType::Online);
        assert!(pct.p50_micros > 0);
        assert!(pct.p99_micros >= pct.p50_micros);
    }

    #[test]
    fn top_timezones_orders_by_count_descending() {
        let metrics = Metrics::new();
        metrics.note_timezone("UTC");
        metrics.note_timezone("UTC");
        metrics.note_timezone("America/New_York");
        let top = metrics.top_timezones(10);
        assert_eq!(top[0].0, "UTC");
        assert_eq!(top[0].1, 2);
    }
}
