//! Core configuration.
//!
//! All values are plain in-process settings; no file or environment loading
//! is part of the core surface.

use serde::{Deserialize, Serialize};

/// Configuration for one core instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Minimum circuit length accepted for user payload.
    #[serde(default = "default_min_hops")]
    pub min_hops: usize,
    /// Maximum circuit length built.
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
    /// Maximum circuit age before expiry, in milliseconds.
    #[serde(default = "default_circuit_ttl_ms")]
    pub circuit_ttl_ms: u64,
    /// Refresh-check interval, in milliseconds.
    #[serde(default = "default_circuit_refresh_ms")]
    pub circuit_refresh_ms: u64,
    /// Eviction threshold for incomplete handshakes, in milliseconds.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// `last_seen` window for circuit candidacy, in milliseconds.
    #[serde(default = "default_staleness_ms")]
    pub staleness_ms: u64,
    /// Target cover packets per second.
    #[serde(default = "default_cover_rate")]
    pub cover_rate: f64,
    /// Master switch for cover traffic.
    #[serde(default = "default_true")]
    pub cover_enabled: bool,
    /// Upper bound of the per-hop random delay, in milliseconds.
    #[serde(default = "default_jitter_max_ms")]
    pub jitter_max_ms: u64,
}

// Default value functions

fn default_min_hops() -> usize {
    3
}

fn default_max_hops() -> usize {
    5
}

fn default_circuit_ttl_ms() -> u64 {
    600_000
}

fn default_circuit_refresh_ms() -> u64 {
    300_000
}

fn default_handshake_timeout_ms() -> u64 {
    5_000
}

fn default_staleness_ms() -> u64 {
    60_000
}

fn default_cover_rate() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_jitter_max_ms() -> u64 {
    100
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            min_hops: default_min_hops(),
            max_hops: default_max_hops(),
            circuit_ttl_ms: default_circuit_ttl_ms(),
            circuit_refresh_ms: default_circuit_refresh_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            staleness_ms: default_staleness_ms(),
            cover_rate: default_cover_rate(),
            cover_enabled: true,
            jitter_max_ms: default_jitter_max_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.min_hops, 3);
        assert_eq!(config.max_hops, 5);
        assert_eq!(config.circuit_ttl_ms, 600_000);
        assert_eq!(config.circuit_refresh_ms, 300_000);
        assert_eq!(config.handshake_timeout_ms, 5_000);
        assert_eq!(config.staleness_ms, 60_000);
        assert!((config.cover_rate - 2.0).abs() < f64::EPSILON);
        assert!(config.cover_enabled);
        assert_eq!(config.jitter_max_ms, 100);
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let config: CoreConfig = serde_json::from_str(r#"{"min_hops": 4}"#).expect("parse");
        assert_eq!(config.min_hops, 4);
        assert_eq!(config.max_hops, 5);
        assert!(config.cover_enabled);
    }
}
