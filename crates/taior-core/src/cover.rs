//! Cover-traffic sizing and pacing.
//!
//! Cover frames are `0xFF`-prefixed random fill, wrapped through the active
//! circuit exactly like a real payload. Sizes are drawn from the same
//! 512-byte buckets that padded AORP frames occupy, so after wrapping an
//! observer sees identical size buckets for real and dummy packets. The
//! terminal hop peels its layer, sees the `0xFF` magic, and drops silently.

use std::time::Duration;

use rand::Rng;
use taior_wire::PAD_BOUNDARY;

/// Smallest cover frame, in bytes.
pub const MIN_COVER_LEN: usize = 512;

/// Largest cover frame, in bytes.
pub const MAX_COVER_LEN: usize = 2048;

/// Relative jitter applied to the inter-packet interval.
pub const INTERVAL_JITTER: f64 = 0.25;

/// Runtime cover-traffic settings, adjustable through the facade.
#[derive(Clone, Copy, Debug)]
pub struct CoverSettings {
    /// Whether the scheduler emits cover packets.
    pub enabled: bool,
    /// Target cover packets per second.
    pub rate: f64,
}

impl CoverSettings {
    /// Initial settings from configuration values.
    pub fn new(enabled: bool, rate: f64) -> Self {
        Self { enabled, rate }
    }
}

/// The delay before the next cover packet: `(1/rate)` jittered by ±25%.
pub fn next_cover_delay(rate: f64, rng: &mut impl Rng) -> Duration {
    let rate = rate.max(0.01);
    let mean_ms = 1000.0 / rate;
    let jitter = rng.gen_range(-INTERVAL_JITTER..=INTERVAL_JITTER);
    Duration::from_millis((mean_ms * (1.0 + jitter)).max(1.0) as u64)
}

/// A cover-frame length: uniform over the 512-byte buckets of [512, 2048].
pub fn sample_cover_len(rng: &mut impl Rng) -> usize {
    PAD_BOUNDARY * rng.gen_range(1..=MAX_COVER_LEN / PAD_BOUNDARY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_within_jitter_bounds() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let delay = next_cover_delay(2.0, &mut rng).as_millis() as f64;
            assert!((374.0..=626.0).contains(&delay), "delay {delay}ms");
        }
    }

    #[test]
    fn test_delay_scales_with_rate() {
        let mut rng = rand::thread_rng();
        let fast = next_cover_delay(10.0, &mut rng).as_millis();
        assert!((74..=126).contains(&fast), "delay {fast}ms at 10/s");
    }

    #[test]
    fn test_delay_survives_zero_rate() {
        let mut rng = rand::thread_rng();
        // A zero rate is clamped rather than dividing by zero.
        let delay = next_cover_delay(0.0, &mut rng);
        assert!(delay >= Duration::from_millis(1));
    }

    #[test]
    fn test_cover_len_buckets() {
        let mut rng = rand::thread_rng();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let len = sample_cover_len(&mut rng);
            assert!(len >= MIN_COVER_LEN);
            assert!(len <= MAX_COVER_LEN);
            assert_eq!(len % PAD_BOUNDARY, 0);
            seen.insert(len);
        }
        // All four buckets show up over 200 draws.
        assert_eq!(seen.len(), 4);
    }
}
