// =============================================================================
// Rolling Statistics — streaming mean / variance / Z-score over a fixed window
// =============================================================================
//
// Uses the shifted-data (assumed-mean) formulation over a sliding window.
// The first admitted price becomes the anchor K; the window then maintains
//
//   S = Σ (x_i − K)        Q = Σ (x_i − K)²
//
// so that  mean = K + S/N  and  sample variance = (Q − S²/N) / (N−1).
//
// The naive E[x²] − E[x]² identity is catastrophically cancelling when the
// deviations are small relative to the price level (an index future near
// 6000 moving in quarter-point ticks loses every significant digit).
// Centring on K keeps both summations at deviation magnitude.
//
// Variance is clamped at zero to mask floating-point underflow; a window of
// identical values reports std = 0 and Z = 0, never NaN.
// =============================================================================

use std::collections::VecDeque;

use sha2::{Digest, Sha256};

use crate::types::CoreError;

/// Variance at or below this is treated as zero (Z defined as 0).
const VARIANCE_EPSILON: f64 = 1e-12;

/// Streaming Z-score over the most recent `lookback` prices.
#[derive(Debug, Clone)]
pub struct RollingStats {
    lookback: usize,
    window: VecDeque<f64>,
    /// Anchor picked at first admission; all sums are relative to it.
    anchor: Option<f64>,
    /// Σ (x − anchor) over the window.
    shifted_sum: f64,
    /// Σ (x − anchor)² over the window.
    shifted_sq_sum: f64,
}

impl RollingStats {
    /// Create a window of capacity `lookback`. A lookback below 2 cannot
    /// define a sample variance and is rejected.
    pub fn new(lookback: usize) -> Result<Self, CoreError> {
        if lookback < 2 {
            return Err(CoreError::LookbackTooSmall(lookback));
        }
        Ok(Self {
            lookback,
            window: VecDeque::with_capacity(lookback + 1),
            anchor: None,
            shifted_sum: 0.0,
            shifted_sq_sum: 0.0,
        })
    }

    /// Admit a price and, once the window is full, return the Z-score of that
    /// price against the updated window.
    ///
    /// Non-finite input is rejected without mutating the window.
    pub fn update(&mut self, price: f64) -> Result<Option<f64>, CoreError> {
        if !price.is_finite() {
            return Err(CoreError::NonFinitePrice(price));
        }

        let anchor = *self.anchor.get_or_insert(price);
        let dev = price - anchor;
        self.window.push_back(price);
        self.shifted_sum += dev;
        self.shifted_sq_sum += dev * dev;

        if self.window.len() > self.lookback {
            // Sliding eviction keeps the update O(1).
            let evicted = self
                .window
                .pop_front()
                .ok_or_else(|| CoreError::Numerical("window underflow".into()))?;
            let evicted_dev = evicted - anchor;
            self.shifted_sum -= evicted_dev;
            self.shifted_sq_sum -= evicted_dev * evicted_dev;
        }

        if !self.is_ready() {
            return Ok(None);
        }

        let variance = self.variance();
        if !variance.is_finite() {
            return Err(CoreError::Numerical(format!(
                "variance became non-finite ({variance})"
            )));
        }
        if variance <= VARIANCE_EPSILON {
            return Ok(Some(0.0));
        }

        let z = (price - self.mean()) / variance.sqrt();
        if !z.is_finite() {
            return Err(CoreError::Numerical(format!("z-score became non-finite ({z})")));
        }
        Ok(Some(z))
    }

    /// True once `lookback` prices have entered the window.
    pub fn is_ready(&self) -> bool {
        self.window.len() >= self.lookback
    }

    pub fn count(&self) -> usize {
        self.window.len()
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }

    /// Mean of the current window contents.
    pub fn mean(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let n = self.window.len() as f64;
        self.anchor.unwrap_or(0.0) + self.shifted_sum / n
    }

    /// Sample variance of the window, clamped at zero.
    pub fn variance(&self) -> f64 {
        let n = self.window.len();
        if n < 2 {
            return 0.0;
        }
        let nf = n as f64;
        let var = (self.shifted_sq_sum - (self.shifted_sum * self.shifted_sum) / nf) / (nf - 1.0);
        var.max(0.0)
    }

    pub fn std(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Drop all history and the anchor; `is_ready` returns to false.
    pub fn reset(&mut self) {
        self.window.clear();
        self.anchor = None;
        self.shifted_sum = 0.0;
        self.shifted_sq_sum = 0.0;
    }

    /// Window contents, oldest first. Used to rebuild state across restarts.
    pub fn contents(&self) -> Vec<f64> {
        self.window.iter().copied().collect()
    }

    /// SHA-256 over the bit patterns of the window contents, oldest first.
    /// Ties a persisted snapshot to the exact window it was taken over.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for price in &self.window {
            hasher.update(price.to_bits().to_le_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Seed the window from recorded history (oldest first), e.g. the last
    /// `lookback` closes persisted in the store. Non-finite entries reject.
    pub fn seed(&mut self, closes: &[f64]) -> Result<(), CoreError> {
        self.reset();
        for &close in closes {
            self.update(close)?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn exact_mean(window: &[f64]) -> f64 {
        window.iter().sum::<f64>() / window.len() as f64
    }

    fn exact_sample_std(window: &[f64]) -> f64 {
        let mean = exact_mean(window);
        let ss: f64 = window.iter().map(|x| (x - mean) * (x - mean)).sum();
        (ss / (window.len() - 1) as f64).sqrt()
    }

    #[test]
    fn lookback_of_one_is_invalid() {
        assert!(matches!(
            RollingStats::new(1),
            Err(CoreError::LookbackTooSmall(1))
        ));
        assert!(RollingStats::new(0).is_err());
        assert!(RollingStats::new(2).is_ok());
    }

    #[test]
    fn not_ready_until_window_fills() {
        let mut stats = RollingStats::new(3).unwrap();
        assert_eq!(stats.update(100.0).unwrap(), None);
        assert!(!stats.is_ready());
        assert_eq!(stats.update(101.0).unwrap(), None);
        assert!(stats.update(102.0).unwrap().is_some());
        assert!(stats.is_ready());
    }

    #[test]
    fn rejects_non_finite_input_without_mutation() {
        let mut stats = RollingStats::new(3).unwrap();
        stats.update(100.0).unwrap();
        assert!(stats.update(f64::NAN).is_err());
        assert!(stats.update(f64::INFINITY).is_err());
        assert_eq!(stats.count(), 1);
    }

    #[test]
    fn identical_values_give_zero_std_and_zero_z() {
        let mut stats = RollingStats::new(5).unwrap();
        let mut last = None;
        for _ in 0..20 {
            last = stats.update(6000.25).unwrap();
        }
        assert_eq!(last, Some(0.0));
        assert_eq!(stats.std(), 0.0);
        assert!(!stats.std().is_nan());
    }

    #[test]
    fn mean_and_std_match_exact_on_small_window() {
        let mut stats = RollingStats::new(4).unwrap();
        for p in [10.0, 12.0, 14.0, 16.0] {
            stats.update(p).unwrap();
        }
        assert!((stats.mean() - 13.0).abs() < 1e-12);
        let expected = exact_sample_std(&[10.0, 12.0, 14.0, 16.0]);
        assert!((stats.std() - expected).abs() < 1e-12);
    }

    // Adversarial case: huge offset, tiny deviations. A naive
    // E[x²] − E[x]² implementation returns garbage (often negative) here.
    #[test]
    fn large_offset_small_deviation_stays_accurate() {
        let lookback = 20;
        let mut stats = RollingStats::new(lookback).unwrap();
        let offset = 1e10;
        let mut raw: Vec<f64> = Vec::new();
        for i in 0..100u64 {
            let u = (i % 7) as f64; // small integer deviations
            let price = offset + u;
            raw.push(price);
            stats.update(price).unwrap();

            if stats.is_ready() {
                let window = &raw[raw.len() - lookback..];
                let mean_err = (stats.mean() - exact_mean(window)).abs() / exact_mean(window);
                assert!(mean_err <= 1e-10, "relative mean error {mean_err}");

                let expected_std = exact_sample_std(window);
                if expected_std > 0.0 {
                    let std_err = (stats.std() - expected_std).abs() / expected_std;
                    assert!(std_err <= 1e-10, "relative std error {std_err}");
                }
                assert!(stats.variance() >= 0.0);
            }
        }
    }

    // ES-style ping-pong around 6000 then a sharp drop.
    #[test]
    fn ping_pong_then_drop_produces_strong_negative_z() {
        let lookback = 20;
        let mut stats = RollingStats::new(lookback).unwrap();
        let mut raw = Vec::new();
        for i in 0..40 {
            let price = if i % 2 == 0 { 6000.00 } else { 6000.25 };
            raw.push(price);
            stats.update(price).unwrap();
        }

        let window = &raw[raw.len() - lookback..];
        let expected_std = exact_sample_std(window);
        let rel = (stats.std() - expected_std).abs() / expected_std;
        assert!(rel <= 1e-8, "relative std error {rel}");

        let z = stats.update(5998.00).unwrap().unwrap();
        assert!(z < -2.0, "expected strongly negative z, got {z}");
    }

    #[test]
    fn variance_never_negative_on_random_walk() {
        // Deterministic LCG random walk, 10k steps.
        let mut stats = RollingStats::new(50).unwrap();
        let mut seed: u64 = 0x5eed_cafe;
        let mut price = 6000.0;
        for _ in 0..10_000 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let step = ((seed >> 33) as f64 / (1u64 << 31) as f64) - 0.5;
            price += step * 0.25;
            stats.update(price).unwrap();
            assert!(stats.variance() >= 0.0);
            assert!(!stats.std().is_nan());
        }
    }

    #[test]
    fn reset_drops_history() {
        let mut stats = RollingStats::new(3).unwrap();
        for p in [1.0, 2.0, 3.0] {
            stats.update(p).unwrap();
        }
        assert!(stats.is_ready());
        stats.reset();
        assert!(!stats.is_ready());
        assert_eq!(stats.count(), 0);
        assert_eq!(stats.update(100.0).unwrap(), None);
    }

    #[test]
    fn seed_replays_history() {
        let mut a = RollingStats::new(4).unwrap();
        for p in [10.0, 11.0, 12.0, 13.0, 14.0] {
            a.update(p).unwrap();
        }
        let mut b = RollingStats::new(4).unwrap();
        b.seed(&a.contents()).unwrap();
        assert_eq!(a.contents(), b.contents());
        assert_eq!(a.content_hash(), b.content_hash());
        assert!((a.mean() - b.mean()).abs() < 1e-15);
    }

    #[test]
    fn content_hash_tracks_window() {
        let mut a = RollingStats::new(3).unwrap();
        let mut b = RollingStats::new(3).unwrap();
        for p in [5.0, 6.0, 7.0] {
            a.update(p).unwrap();
            b.update(p).unwrap();
        }
        assert_eq!(a.content_hash(), b.content_hash());
        b.update(8.0).unwrap();
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn z_of_window_extreme_is_positive_at_top() {
        let mut stats = RollingStats::new(5).unwrap();
        for p in [100.0, 100.0, 100.0, 100.0] {
            stats.update(p).unwrap();
        }
        let z = stats.update(105.0).unwrap().unwrap();
        assert!(z > 1.0, "new high should carry positive z, got {z}");
    }
}
