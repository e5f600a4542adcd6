//! xorshift64* random number generator
//!
//! This is a fast, high-quality, non-cryptographic PRNG that is deterministic
//! and suitable for load-generation purposes: same seed, same draw order,
//! same sequence of values.
//!
//! # Determinism
//!
//! Same seed → same sequence of random numbers. This is CRITICAL for
//! reproducing a load profile: operators diagnosing a benchmark run need to
//! replay the exact same session mix given the same seed.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Deterministic random number generator using xorshift64*, plus the
/// distribution/sampling helpers the simulation engine needs on top of the
/// raw bit stream.
///
/// # Example
/// ```
/// use bankload_engine::rng::RngManager;
///
/// let mut rng = RngManager::new(12345);
/// let value = rng.next_u64();
/// let range_value = rng.int_in_range(0, 100); // [0, 100)
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RngManager {
    /// Internal state (64-bit)
    state: u64,
}

impl RngManager {
    /// Create a new RNG with given seed.
    ///
    /// A seed of zero is accepted here (callers that want "draw from OS
    /// entropy" behavior should resolve it to a concrete non-zero seed
    /// *before* calling this, via [`crate::rng::resolve_seed`], so that the
    /// chosen seed can be logged).
    pub fn new(seed: u64) -> Self {
        // xorshift64* requires a non-zero state.
        let state = if seed == 0 { 0x9E3779B97F4A7C15 } else { seed };
        Self { state }
    }

    /// Generate the next random `u64`, advancing internal state.
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    /// Current RNG state (useful for diagnostics/checkpointing).
    pub fn state(&self) -> u64 {
        self.state
    }

    /// Random `f64` in `[0.0, 1.0)`.
    pub fn float_unit(&mut self) -> f64 {
        let value = self.next_u64();
        (value >> 11) as f64 * (1.0 / ((1u64 << 53) as f64))
    }

    /// Random integer in `[min, max)`.
    ///
    /// # Panics
    /// Panics if `min >= max`.
    pub fn int_in_range(&mut self, min: i64, max: i64) -> i64 {
        assert!(min < max, "min must be less than max");
        let range_size = (max - min) as u64;
        min + (self.next_u64() % range_size) as i64
    }

    /// Bernoulli draw: `true` with probability `p` (clamped to `[0, 1]`).
    pub fn bool_with_probability(&mut self, p: f64) -> bool {
        let p = p.clamp(0.0, 1.0);
        self.float_unit() < p
    }

    /// Uniformly pick an element from a non-empty slice.
    ///
    /// # Panics
    /// Panics if `items` is empty.
    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> &'a T {
        assert!(!items.is_empty(), "pick from empty slice");
        let idx = self.int_in_range(0, items.len() as i64) as usize;
        &items[idx]
    }

    /// Pick an index according to relative weights. Weights need not sum to
    /// 1; non-positive total weight falls back to a uniform pick.
    ///
    /// # Panics
    /// Panics if `weights` is empty.
    pub fn weighted_pick(&mut self, weights: &[f64]) -> usize {
        assert!(!weights.is_empty(), "weighted_pick from empty slice");
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return self.int_in_range(0, weights.len() as i64) as usize;
        }
        let r = self.float_unit() * total;
        let mut cumulative = 0.0;
        for (idx, w) in weights.iter().enumerate() {
            cumulative += w.max(0.0);
            if r < cumulative {
                return idx;
            }
        }
        weights.len() - 1
    }

    /// Fisher-Yates shuffle in place.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        if items.len() < 2 {
            return;
        }
        for i in (1..items.len()).rev() {
            let j = self.int_in_range(0, (i + 1) as i64) as usize;
            items.swap(i, j);
        }
    }

    /// Sample from a normal distribution via the Box-Muller transform.
    pub fn normal(&mut self, mean: f64, stddev: f64) -> f64 {
        // Avoid u=0 (ln(0) is undefined); float_unit() is in [0, 1).
        let u1 = (1.0 - self.float_unit()).max(f64::MIN_POSITIVE);
        let u2 = self.float_unit();
        let z0 = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
        mean + z0 * stddev
    }

    /// Sample from an exponential distribution with the given rate (lambda).
    ///
    /// # Panics
    /// Panics if `rate <= 0.0`.
    pub fn exp(&mut self, rate: f64) -> f64 {
        assert!(rate > 0.0, "rate must be positive");
        let u = (1.0 - self.float_unit()).max(f64::MIN_POSITIVE);
        -u.ln() / rate
    }

    /// Random [`Duration`] uniformly distributed between `min` and `max`.
    pub fn duration_in(&mut self, min: Duration, max: Duration) -> Duration {
        let min_nanos = min.as_nanos() as i64;
        let max_nanos = max.as_nanos() as i64;
        if max_nanos <= min_nanos {
            return min;
        }
        let nanos = self.int_in_range(min_nanos, max_nanos);
        Duration::from_nanos(nanos as u64)
    }

    /// Derive a new, independent RNG stream from this one's next draw.
    ///
    /// A reproducible parent therefore produces a reproducible sequence of
    /// children: calling `fork()` twice on two RNGs seeded identically, in
    /// the same order, yields two pairs of children with identical streams.
    pub fn fork(&mut self) -> RngManager {
        let child_seed = self.next_u64();
        RngManager::new(child_seed)
    }

    /// Fork `k` independent child streams in one call.
    pub fn fork_n(&mut self, k: usize) -> Vec<RngManager> {
        (0..k).map(|_| self.fork()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_seed_converted_to_nonzero() {
        let rng = RngManager::new(0);
        assert_ne!(rng.state(), 0);
    }

    #[test]
    #[should_panic(expected = "min must be less than max")]
    fn int_in_range_invalid_bounds_panics() {
        let mut rng = RngManager::new(12345);
        rng.int_in_range(100, 50);
    }

    #[test]
    fn float_unit_stays_in_range() {
        let mut rng = RngManager::new(12345);
        for _ in 0..1000 {
            let val = rng.float_unit();
            assert!((0.0..1.0).contains(&val));
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut a = RngManager::new(99999);
        let mut b = RngManager::new(99999);
        for _ in 0..100_000 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn fork_is_reproducible_across_parents() {
        let mut parent_a = RngManager::new(7);
        let mut parent_b = RngManager::new(7);

        let mut children_a = parent_a.fork_n(4);
        let mut children_b = parent_b.fork_n(4);

        for (ca, cb) in children_a.iter_mut().zip(children_b.iter_mut()) {
            for _ in 0..1000 {
                assert_eq!(ca.next_u64(), cb.next_u64());
            }
        }
    }

    #[test]
    fn weighted_pick_prefers_heavier_weight() {
        let mut rng = RngManager::new(42);
        let mut counts = [0usize; 2];
        for _ in 0..10_000 {
            counts[rng.weighted_pick(&[1.0, 9.0])] += 1;
        }
        assert!(counts[1] > counts[0]);
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut rng = RngManager::new(1);
        let mut items: Vec<i32> = (0..20).collect();
        let original = items.clone();
        rng.shuffle(&mut items);
        items.sort();
        assert_eq!(items, original);
    }
}
