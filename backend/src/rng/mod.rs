//! Deterministic random number generation.
//!
//! Uses xorshift64* for a fast, deterministic pseudo-random source. CRITICAL:
//! all randomness in the engine MUST go through this module, so that a seeded
//! run is reproducible end to end.
//!
//! A single [`SharedRng`] is mutation-protected (behind a mutex) and owned by
//! the session manager. Each worker forks its own unlocked [`RngManager`] off
//! of it at startup, so steady-state draws never contend on a lock.

mod xorshift;

use parking_lot::Mutex;

pub use xorshift::RngManager;

/// Resolve a configured seed: non-zero seeds pass through unchanged; a seed
/// of zero means "draw a fresh seed from OS entropy," which is logged so the
/// run can be reproduced later.
pub fn resolve_seed(configured: u64) -> u64 {
    if configured != 0 {
        return configured;
    }
    let mut buf = [0u8; 8];
    getrandom::getrandom(&mut buf).expect("OS entropy source unavailable");
    let seed = u64::from_le_bytes(buf);
    tracing::info!(seed, "drew RNG seed from OS entropy");
    seed
}

/// A single mutation-protected RNG stream, shared by reference across tasks
/// that need to fork their own independent, unlocked stream from it (the
/// session manager forking one `RngManager` per worker at startup).
#[derive(Debug)]
pub struct SharedRng {
    inner: Mutex<RngManager>,
}

impl SharedRng {
    /// Create a shared RNG from a resolved (non-zero, already-logged) seed.
    pub fn new(seed: u64) -> Self {
        Self {
            inner: Mutex::new(RngManager::new(seed)),
        }
    }

    /// Fork a new, independent, unlocked RNG stream for a worker to own.
    pub fn fork(&self) -> RngManager {
        self.inner.lock().fork()
    }

    /// Fork `n` independent streams in one locked section, preserving the
    /// same ordering guarantee as calling [`SharedRng::fork`] `n` times.
    pub fn fork_n(&self, n: usize) -> Vec<RngManager> {
        self.inner.lock().fork_n(n)
    }
}
