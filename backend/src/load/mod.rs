//! Load controller (C5).
//!
//! Phased ramp-up / steady / ramp-down of target concurrency, driven by an
//! async `run` loop. `current_target` is read far more often than the phase
//! changes, so it lives behind an atomic; phase and step bookkeeping share a
//! small mutex (§5 "load controller: atomic current-target, mutex around
//! phase").

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Idle,
    RampUp,
    Steady,
    RampDown,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadControllerConfig {
    pub target_sessions: u32,
    pub enable_ramp: bool,
    pub ramp_up_duration: Duration,
    pub ramp_down_duration: Duration,
    pub ramp_steps: u32,
}

impl Default for LoadControllerConfig {
    fn default() -> Self {
        Self {
            target_sessions: 100,
            enable_ramp: true,
            ramp_up_duration: Duration::from_secs(60),
            ramp_down_duration: Duration::from_secs(30),
            ramp_steps: 10,
        }
    }
}

struct Inner {
    phase: LoadPhase,
    step: u32,
    phase_started_at: Instant,
}

pub struct LoadController {
    config: LoadControllerConfig,
    ramp_steps: u32,
    current_target: AtomicU32,
    inner: Mutex<Inner>,
}

impl LoadController {
    /// `ramp_steps = 0` is coerced to 1 (§8 boundary behavior). When ramping
    /// is disabled, starts already in `Steady` at full target.
    pub fn new(config: LoadControllerConfig) -> Self {
        let ramp_steps = config.ramp_steps.max(1);
        let (phase, initial_target) = if config.enable_ramp {
            (LoadPhase::Idle, 0)
        } else {
            (LoadPhase::Steady, config.target_sessions)
        };
        Self {
            config,
            ramp_steps,
            current_target: AtomicU32::new(initial_target),
            inner: Mutex::new(Inner {
                phase,
                step: 0,
                phase_started_at: Instant::now(),
            }),
        }
    }

    pub fn phase(&self) -> LoadPhase {
        self.inner.lock().phase
    }

    pub fn current_target(&self) -> u32 {
        self.current_target.load(Ordering::SeqCst)
    }

    /// Fraction (0..1) of ramp steps completed within the current phase.
    /// Steady reports 1.0; idle/complete report 0.0.
    pub fn progress(&self) -> f64 {
        let inner = self.inner.lock();
        match inner.phase {
            LoadPhase::RampUp | LoadPhase::RampDown => {
                (inner.step as f64 / self.ramp_steps as f64).min(1.0)
            }
            LoadPhase::Steady => 1.0,
            LoadPhase::Idle | LoadPhase::Complete => 0.0,
        }
    }

    pub fn should_spawn(&self, active: u32) -> bool {
        !matches!(self.phase(), LoadPhase::Complete) && active < self.current_target()
    }

    pub fn should_terminate(&self, active: u32) -> bool {
        active > self.current_target()
    }

    fn set_phase(&self, phase: LoadPhase) {
        let mut inner = self.inner.lock();
        inner.phase = phase;
        inner.step = 0;
        inner.phase_started_at = Instant::now();
    }

    /// Drives the full lifecycle: ramp-up (or immediate steady), holds
    /// steady until `cancel` fires, then ramp-down to `Complete`.
    pub async fn run(&self, cancel: &CancellationToken) {
        if self.config.enable_ramp {
            self.set_phase(LoadPhase::RampUp);
            if self.ramp_up(cancel).await {
                self.set_phase(LoadPhase::Steady);
                cancel.cancelled().await;
            }
        } else {
            cancel.cancelled().await;
        }
        self.set_phase(LoadPhase::RampDown);
        self.ramp_down().await;
    }

    /// Returns `true` if the ramp completed normally, `false` if cancelled
    /// mid-ramp (in which case the caller skips straight to ramp-down).
    async fn ramp_up(&self, cancel: &CancellationToken) -> bool {
        let step_duration = self.config.ramp_up_duration / self.ramp_steps;
        for step in 1..=self.ramp_steps {
            tokio::select! {
                _ = tokio::time::sleep(step_duration) => {}
                _ = cancel.cancelled() => return false,
            }
            let target = (self.config.target_sessions as u64 * step as u64 / self.ramp_steps as u64) as u32;
            self.current_target.store(target, Ordering::SeqCst);
            self.inner.lock().step = step;
        }
        true
    }

    async fn ramp_down(&self) {
        let step_duration = self.config.ramp_down_duration / self.ramp_steps;
        let start_target = self.current_target();
        for step in 1..=self.ramp_steps {
            tokio::time::sleep(step_duration).await;
            let remaining = self.ramp_steps - step;
            let target = (start_target as u64 * remaining as u64 / self.ramp_steps as u64) as u32;
            self.current_target.store(target, Ordering::SeqCst);
            self.inner.lock().step = step;
        }
        self.current_target.store(0, Ordering::SeqCst);
        self.set_phase(LoadPhase::Complete);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_steps_zero_is_coerced_to_one() {
        let cfg = LoadControllerConfig {
            ramp_steps: 0,
            ..LoadControllerConfig::default()
        };
        let controller = LoadController::new(cfg);
        assert_eq!(controller.ramp_steps, 1);
    }

    #[test]
    fn disabled_ramp_starts_at_full_target() {
        let cfg = LoadControllerConfig {
            enable_ramp: false,
            target_sessions: 250,
            ..LoadControllerConfig::default()
        };
        let controller = LoadController::new(cfg);
        assert_eq!(controller.phase(), LoadPhase::Steady);
        assert_eq!(controller.current_target(), 250);
    }

    #[tokio::test(start_paused = true)]
    async fn ramp_up_is_monotone_and_reaches_target() {
        let cfg = LoadControllerConfig {
            target_sessions: 100,
            enable_ramp: true,
            ramp_up_duration: Duration::from_secs(10),
            ramp_down_duration: Duration::from_secs(10),
            ramp_steps: 10,
        };
        let controller = std::sync::Arc::new(LoadController::new(cfg));
        let cancel = CancellationToken::new();

        let task_controller = controller.clone();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move { task_controller.run(&task_cancel).await });

        let mut last_target = 0;
        for _ in 0..10 {
            tokio::time::advance(Duration::from_secs(1)).await;
            tokio::task::yield_now().await;
            let target = controller.current_target();
            assert!(target >= last_target, "target regressed: {target} < {last_target}");
            last_target = target;
        }
        assert_eq!(controller.current_target(), 100);
        assert_eq!(controller.phase(), LoadPhase::Steady);

        cancel.cancel();
        for _ in 0..10 {
            tokio::time::advance(Duration::from_secs(1)).await;
            tokio::task::yield_now().await;
        }
        handle.await.unwrap();
        assert_eq!(controller.phase(), LoadPhase::Complete);
        assert_eq!(controller.current_target(), 0);
    }

    #[test]
    fn should_spawn_and_terminate_follow_current_target() {
        let cfg = LoadControllerConfig {
            enable_ramp: false,
            target_sessions: 5,
            ..LoadControllerConfig::default()
        };
        let controller = LoadController::new(cfg);
        assert!(controller.should_spawn(3));
        assert!(!controller.should_spawn(5));
        assert!(controller.should_terminate(6));
        assert!(!controller.should_terminate(5));
    }
}
