//! Circuit construction, selection, and refresh.
//!
//! A circuit is an ordered path of peers. Circuits store peer ids, not
//! pointers; key material is resolved through the directory at wrap time.
//! Expiry is checked lazily at selection time and swept by the refresh task.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use tracing::{debug, info};

use crate::config::CoreConfig;
use crate::{Result, TaiorError};

/// User-facing circuit-length preset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RoutingMode {
    /// Shortest path the deployment allows.
    Fast,
    /// Balanced default.
    Adaptive,
    /// Longest path for maximum mixing.
    Mix,
}

impl RoutingMode {
    /// The preset hop count before clamping to `[min_hops, max_hops]`.
    /// `Mix` paths use 4 or 5 hops; 5 only when enough candidates exist.
    fn preset_hops(self, candidates: usize, rng: &mut impl Rng) -> usize {
        match self {
            RoutingMode::Fast => 2,
            RoutingMode::Adaptive => 3,
            RoutingMode::Mix => {
                if candidates >= 5 {
                    rng.gen_range(4..=5)
                } else {
                    4
                }
            }
        }
    }

    /// Short name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            RoutingMode::Fast => "fast",
            RoutingMode::Adaptive => "adaptive",
            RoutingMode::Mix => "mix",
        }
    }
}

/// Options for one `send` call.
#[derive(Clone, Copy, Debug)]
pub struct SendOptions {
    /// Which circuit-length preset to route over.
    pub mode: RoutingMode,
}

impl SendOptions {
    /// Route over the shortest allowed path.
    pub fn fast() -> Self {
        Self {
            mode: RoutingMode::Fast,
        }
    }

    /// Route over the balanced default path.
    pub fn adaptive() -> Self {
        Self {
            mode: RoutingMode::Adaptive,
        }
    }

    /// Route over the longest mixing path.
    pub fn mix() -> Self {
        Self {
            mode: RoutingMode::Mix,
        }
    }
}

impl Default for SendOptions {
    fn default() -> Self {
        Self::adaptive()
    }
}

/// External next-hop selection policy, consulted during circuit
/// construction when installed. Returning `None` or an id that is not in
/// `candidates` falls back to uniform random selection.
pub trait HopPolicy: Send + Sync {
    /// Pick the next hop from `candidates`; `remaining_hops` counts this one.
    fn decide_next_hop(&self, candidates: &[String], remaining_hops: usize) -> Option<String>;
}

/// An active circuit: an ordered path of peers.
#[derive(Clone)]
pub struct Circuit {
    id: [u8; 16],
    mode: RoutingMode,
    hops: Vec<String>,
    created_at: Instant,
    ttl: Duration,
    refresh_after: Duration,
}

impl Circuit {
    /// Random 16-byte circuit id.
    pub fn id(&self) -> &[u8; 16] {
        &self.id
    }

    /// The mode this circuit was built for.
    pub fn mode(&self) -> RoutingMode {
        self.mode
    }

    /// The ordered hop ids.
    pub fn hops(&self) -> &[String] {
        &self.hops
    }

    /// The peer the wrapped packet is handed to.
    pub fn first_hop(&self) -> &str {
        &self.hops[0]
    }

    /// The terminal hop; also the delivery destination.
    pub fn exit_hop(&self) -> &str {
        &self.hops[self.hops.len() - 1]
    }

    /// Whether this circuit references the given peer.
    pub fn references(&self, peer_id: &str) -> bool {
        self.hops.iter().any(|h| h == peer_id)
    }

    /// Whether the circuit is past its TTL.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.ttl
    }

    /// Whether the circuit is past its refresh deadline.
    pub fn needs_refresh(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.refresh_after
    }

    /// Age of the circuit.
    pub fn age(&self, now: Instant) -> Duration {
        now.duration_since(self.created_at)
    }
}

/// Builds, caches, and expires circuits from directory candidates.
#[derive(Default)]
pub struct CircuitManager {
    active: Vec<Circuit>,
    policy: Option<Arc<dyn HopPolicy>>,
}

impl CircuitManager {
    /// Create an empty manager with uniform random hop selection.
    pub fn new() -> Self {
        Self {
            active: Vec::new(),
            policy: None,
        }
    }

    /// Install an external hop-selection policy.
    pub fn set_policy(&mut self, policy: Arc<dyn HopPolicy>) {
        self.policy = Some(policy);
    }

    /// Build a circuit for `mode` by sampling `candidates` without
    /// replacement, and install it as active.
    ///
    /// The effective target is `clamp(preset, min_hops, max_hops)`, so any
    /// circuit produced here is long enough to carry user payload.
    ///
    /// # Errors
    ///
    /// [`TaiorError::InsufficientAnonymity`] when fewer than `min_hops`
    /// candidates exist; [`TaiorError::NoCircuit`] when there are enough for
    /// the minimum but not for the mode's target.
    pub fn build(
        &mut self,
        mode: RoutingMode,
        candidates: &[String],
        config: &CoreConfig,
    ) -> Result<&Circuit> {
        let mut rng = OsRng;
        let target = mode
            .preset_hops(candidates.len(), &mut rng)
            .clamp(config.min_hops, config.max_hops);

        if candidates.len() < config.min_hops {
            return Err(TaiorError::InsufficientAnonymity {
                need: config.min_hops,
                have: candidates.len(),
            });
        }
        if candidates.len() < target {
            debug!(
                mode = mode.as_str(),
                target,
                have = candidates.len(),
                "not enough candidates for mode target"
            );
            return Err(TaiorError::NoCircuit);
        }

        let mut remaining: Vec<String> = candidates.to_vec();
        let mut hops = Vec::with_capacity(target);
        for picked in 0..target {
            let choice = self
                .policy
                .as_ref()
                .and_then(|p| p.decide_next_hop(&remaining, target - picked))
                .filter(|id| remaining.contains(id));
            let id = match choice {
                Some(id) => id,
                None => remaining[rng.gen_range(0..remaining.len())].clone(),
            };
            remaining.retain(|c| c != &id);
            hops.push(id);
        }

        let mut id = [0u8; 16];
        OsRng.fill_bytes(&mut id);

        let circuit = Circuit {
            id,
            mode,
            hops,
            created_at: Instant::now(),
            ttl: Duration::from_millis(config.circuit_ttl_ms),
            refresh_after: Duration::from_millis(config.circuit_refresh_ms),
        };
        info!(
            circuit = %hex::encode(circuit.id),
            mode = mode.as_str(),
            hops = circuit.hops.len(),
            "built circuit"
        );
        self.active.push(circuit);
        Ok(self.active.last().expect("just pushed"))
    }

    /// The freshest non-expired circuit for `mode`, if any.
    pub fn pick(&self, mode: RoutingMode, now: Instant) -> Option<&Circuit> {
        self.active
            .iter()
            .filter(|c| c.mode == mode && !c.is_expired(now))
            .max_by_key(|c| c.created_at)
    }

    /// Drop circuits past their TTL. Returns how many were dropped.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.active.len();
        self.active.retain(|c| !c.is_expired(now));
        before - self.active.len()
    }

    /// Drop circuits referencing an evicted peer. Returns how many were
    /// dropped.
    pub fn purge_referencing(&mut self, peer_id: &str) -> usize {
        let before = self.active.len();
        self.active.retain(|c| !c.references(peer_id));
        let dropped = before - self.active.len();
        if dropped > 0 {
            debug!(peer = %peer_id, dropped, "tore down circuits for lost peer");
        }
        dropped
    }

    /// Drop a specific circuit by id.
    pub fn purge_id(&mut self, id: &[u8; 16]) {
        self.active.retain(|c| &c.id != id);
    }

    /// All active circuits.
    pub fn active(&self) -> &[Circuit] {
        &self.active
    }

    /// Whether any circuit is active.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.active.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("peer-{i}")).collect()
    }

    #[test]
    fn test_build_respects_min_hops() {
        let mut mgr = CircuitManager::new();
        let config = CoreConfig::default();

        let result = mgr.build(RoutingMode::Fast, &ids(2), &config);
        assert!(matches!(
            result,
            Err(TaiorError::InsufficientAnonymity { need: 3, have: 2 })
        ));
    }

    #[test]
    fn test_fast_clamped_to_min_hops() {
        let mut mgr = CircuitManager::new();
        let config = CoreConfig::default();

        let circuit = mgr.build(RoutingMode::Fast, &ids(3), &config).expect("build");
        assert_eq!(circuit.hops().len(), 3);
    }

    #[test]
    fn test_hops_distinct_and_bounded() {
        let config = CoreConfig::default();
        for mode in [RoutingMode::Fast, RoutingMode::Adaptive, RoutingMode::Mix] {
            let mut mgr = CircuitManager::new();
            let circuit = mgr.build(mode, &ids(8), &config).expect("build");

            let unique: HashSet<&String> = circuit.hops().iter().collect();
            assert_eq!(unique.len(), circuit.hops().len(), "{mode:?}: repeated peer");
            assert!(circuit.hops().len() >= config.min_hops);
            assert!(circuit.hops().len() <= config.max_hops);
        }
    }

    #[test]
    fn test_mix_builds_four_or_five_hops() {
        let config = CoreConfig::default();
        for _ in 0..16 {
            let mut mgr = CircuitManager::new();
            let circuit = mgr.build(RoutingMode::Mix, &ids(6), &config).expect("build");
            assert!(
                circuit.hops().len() == 4 || circuit.hops().len() == 5,
                "mix built {} hops",
                circuit.hops().len()
            );
        }
    }

    #[test]
    fn test_mix_degrades_to_four_with_four_candidates() {
        let mut mgr = CircuitManager::new();
        let config = CoreConfig::default();
        let circuit = mgr.build(RoutingMode::Mix, &ids(4), &config).expect("build");
        assert_eq!(circuit.hops().len(), 4);
    }

    #[test]
    fn test_circuit_ids_random() {
        let mut mgr = CircuitManager::new();
        let config = CoreConfig::default();
        let id1 = *mgr.build(RoutingMode::Adaptive, &ids(5), &config).expect("build").id();
        let id2 = *mgr.build(RoutingMode::Adaptive, &ids(5), &config).expect("build").id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_pick_by_mode() {
        let mut mgr = CircuitManager::new();
        let config = CoreConfig::default();
        mgr.build(RoutingMode::Adaptive, &ids(5), &config).expect("build");

        let now = Instant::now();
        assert!(mgr.pick(RoutingMode::Adaptive, now).is_some());
        assert!(mgr.pick(RoutingMode::Mix, now).is_none());
    }

    #[test]
    fn test_expiry() {
        let mut mgr = CircuitManager::new();
        let config = CoreConfig {
            circuit_ttl_ms: 50,
            ..CoreConfig::default()
        };
        mgr.build(RoutingMode::Adaptive, &ids(5), &config).expect("build");

        let later = Instant::now() + Duration::from_millis(100);
        assert!(mgr.pick(RoutingMode::Adaptive, later).is_none());
        assert_eq!(mgr.purge_expired(later), 1);
        assert!(mgr.is_empty());
    }

    #[test]
    fn test_purge_referencing() {
        let mut mgr = CircuitManager::new();
        let config = CoreConfig::default();
        let member = mgr
            .build(RoutingMode::Adaptive, &ids(3), &config)
            .expect("build")
            .hops()[1]
            .clone();

        assert_eq!(mgr.purge_referencing(&member), 1);
        assert!(mgr.is_empty());
        assert_eq!(mgr.purge_referencing("peer-0"), 0);
    }

    struct FixedOrder(Vec<String>);

    impl HopPolicy for FixedOrder {
        fn decide_next_hop(&self, candidates: &[String], _remaining: usize) -> Option<String> {
            self.0.iter().find(|id| candidates.contains(id)).cloned()
        }
    }

    #[test]
    fn test_hop_policy_drives_selection() {
        let mut mgr = CircuitManager::new();
        let config = CoreConfig::default();
        let order = vec![
            "peer-4".to_string(),
            "peer-2".to_string(),
            "peer-0".to_string(),
        ];
        mgr.set_policy(Arc::new(FixedOrder(order.clone())));

        let circuit = mgr.build(RoutingMode::Adaptive, &ids(5), &config).expect("build");
        assert_eq!(circuit.hops(), order.as_slice());
    }

    struct BogusPolicy;

    impl HopPolicy for BogusPolicy {
        fn decide_next_hop(&self, _candidates: &[String], _remaining: usize) -> Option<String> {
            Some("not-a-peer".to_string())
        }
    }

    #[test]
    fn test_bogus_policy_falls_back_to_uniform() {
        let mut mgr = CircuitManager::new();
        let config = CoreConfig::default();
        mgr.set_policy(Arc::new(BogusPolicy));

        let circuit = mgr.build(RoutingMode::Adaptive, &ids(5), &config).expect("build");
        assert_eq!(circuit.hops().len(), 3);
        for hop in circuit.hops() {
            assert!(hop.starts_with("peer-"));
        }
    }
}
