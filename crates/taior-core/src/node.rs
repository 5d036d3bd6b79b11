//! The `Taior` facade: one value owning identity, directory, circuits,
//! router state, and timers. Multiple cores may coexist in one process.
//!
//! ## Task model
//!
//! Three Tokio tasks run per core:
//!
//! - the **router** consumes [`SubstrateEvent`]s and drives the per-hop
//!   state machine (classify, peel, deliver or forward),
//! - the **cover scheduler** emits dummy packets at the configured rate,
//! - the **maintenance** loop evicts stale peers, times out handshakes,
//!   and refreshes circuits.
//!
//! All directory and circuit state sits behind one mutex; locks are never
//! held across a suspension point. `disconnect` broadcasts shutdown, drains
//! the state, and drops the static secret (zeroized on drop).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{broadcast, mpsc, Mutex, Notify};
use tracing::{debug, info, warn};

use taior_crypto::x25519::X25519PublicKey;
use taior_wire::frame::{self, FrameKind};
use taior_wire::aorp;

use crate::circuit::{CircuitManager, HopPolicy, RoutingMode, SendOptions};
use crate::config::CoreConfig;
use crate::cover::{self, CoverSettings};
use crate::directory::PeerDirectory;
use crate::events::{CoreEvent, EventBus};
use crate::identity::Identity;
use crate::router::{self, PeeledFrame};
use crate::substrate::{Substrate, SubstrateEvent};
use crate::{Result, TaiorError};

/// Delivery tag handed to the upward callback for onion-delivered payloads.
/// Never a claimed origin.
pub const ANONYMOUS_TAG: &str = "anonymous";

/// Maintenance sweep granularity.
const MAINTENANCE_TICK_MS: u64 = 100;

/// Callback invoked when an inbound AORP packet terminates at this node.
pub type DeliveryCallback = Box<dyn Fn(Vec<u8>, &str) + Send + Sync>;

/// The encrypted packet handed to the substrate for one `send`.
#[derive(Clone, Debug)]
pub struct OutboundPacket {
    /// The onion-wrapped bytes exactly as they left this node. Opaque;
    /// intended for logging and diagnostics only.
    pub encrypted_payload: Vec<u8>,
    /// The circuit the packet was routed over.
    pub circuit_id: [u8; 16],
    /// Number of hops on the path.
    pub hops: usize,
}

impl OutboundPacket {
    /// Size of the wrapped packet in bytes.
    pub fn size(&self) -> usize {
        self.encrypted_payload.len()
    }
}

/// Diagnostics snapshot of the whole core.
#[derive(Clone, Debug)]
pub struct CoreStatus {
    /// Whether the core is accepting traffic.
    pub running: bool,
    /// Peers in the directory, in any handshake state.
    pub known_peers: usize,
    /// Peers currently eligible for circuit selection.
    pub eligible_peers: usize,
    /// Active circuits across all modes.
    pub active_circuits: usize,
    /// Whether the cover scheduler is emitting.
    pub cover_enabled: bool,
}

/// Diagnostics snapshot of one active circuit.
#[derive(Clone, Debug)]
pub struct CircuitInfo {
    /// The 16-byte circuit id.
    pub id: [u8; 16],
    /// The mode the circuit was built for.
    pub mode: RoutingMode,
    /// Ordered hop ids.
    pub hops: Vec<String>,
    /// Time since construction.
    pub age: Duration,
}

/// Inbound-event handle given to the substrate glue. Cloneable.
#[derive(Clone)]
pub struct SubstrateHandle {
    tx: mpsc::UnboundedSender<SubstrateEvent>,
}

impl SubstrateHandle {
    /// A peer connection came up.
    pub fn peer_up(&self, peer_id: &str, addr: &str) {
        self.event(SubstrateEvent::PeerUp {
            peer_id: peer_id.to_string(),
            addr: addr.to_string(),
        });
    }

    /// A peer connection went away.
    pub fn peer_down(&self, peer_id: &str) {
        self.event(SubstrateEvent::PeerDown {
            peer_id: peer_id.to_string(),
        });
    }

    /// A frame arrived from a directly connected peer.
    pub fn frame(&self, peer_id: &str, frame: Vec<u8>) {
        self.event(SubstrateEvent::Frame {
            peer_id: peer_id.to_string(),
            frame,
        });
    }

    /// Push a raw substrate event. Events after `disconnect` are dropped.
    pub fn event(&self, event: SubstrateEvent) {
        let _ = self.tx.send(event);
    }
}

struct State {
    directory: PeerDirectory,
    circuits: CircuitManager,
}

struct Inner {
    config: CoreConfig,
    local_id: String,
    address: String,
    public_key: X25519PublicKey,
    identity: StdMutex<Option<Identity>>,
    substrate: Arc<dyn Substrate>,
    state: Mutex<State>,
    cover: StdMutex<CoverSettings>,
    delivery: StdMutex<Option<DeliveryCallback>>,
    events: EventBus,
    handshake_notify: Notify,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

/// One onion-routing core instance.
pub struct Taior {
    inner: Arc<Inner>,
    handle: SubstrateHandle,
}

impl Taior {
    /// Initialize a core over the given substrate: generates the session
    /// identity, spawns the router, cover, and maintenance tasks, and starts
    /// accepting substrate events.
    pub fn new(config: CoreConfig, substrate: Arc<dyn Substrate>) -> Self {
        let identity = Identity::generate();
        let address = identity.address().to_string();
        let public_key = identity.public_key().clone();
        let local_id = substrate.local_peer_id();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);

        let cover_settings = CoverSettings::new(config.cover_enabled, config.cover_rate);
        let inner = Arc::new(Inner {
            config,
            local_id: local_id.clone(),
            address: address.clone(),
            public_key,
            identity: StdMutex::new(Some(identity)),
            substrate,
            state: Mutex::new(State {
                directory: PeerDirectory::new(),
                circuits: CircuitManager::new(),
            }),
            cover: StdMutex::new(cover_settings),
            delivery: StdMutex::new(None),
            events: EventBus::default(),
            handshake_notify: Notify::new(),
            shutdown: shutdown_tx,
            running: AtomicBool::new(true),
        });

        tokio::spawn(run_router(inner.clone(), event_rx));
        tokio::spawn(run_cover(inner.clone()));
        tokio::spawn(run_maintenance(inner.clone()));

        info!(address = %address, peer = %local_id, "core initialized");

        Self {
            inner,
            handle: SubstrateHandle { tx: event_tx },
        }
    }

    /// The externally visible address token.
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// This node's raw static public key.
    pub fn public_key(&self) -> &X25519PublicKey {
        &self.inner.public_key
    }

    /// The handle the substrate glue feeds inbound events through.
    pub fn handle(&self) -> SubstrateHandle {
        self.handle.clone()
    }

    /// Register the upward delivery callback, invoked with
    /// `(payload_bytes, tag)` when an inbound AORP packet terminates here.
    pub fn on_delivery<F>(&self, callback: F)
    where
        F: Fn(Vec<u8>, &str) + Send + Sync + 'static,
    {
        *self.inner.delivery.lock().expect("delivery lock") = Some(Box::new(callback));
    }

    /// Install an external next-hop selection policy.
    pub async fn set_hop_policy(&self, policy: Arc<dyn HopPolicy>) {
        self.inner.state.lock().await.circuits.set_policy(policy);
    }

    /// Toggle cover traffic and adjust its target rate (packets per second).
    pub fn enable_cover_traffic(&self, enabled: bool, rate: f64) {
        let mut settings = self.inner.cover.lock().expect("cover lock");
        settings.enabled = enabled;
        if rate > 0.0 {
            settings.rate = rate;
        }
        info!(enabled, rate = settings.rate, "cover traffic reconfigured");
    }

    /// Subscribe to core events from this point on.
    pub fn subscribe_events(&self) -> broadcast::Receiver<CoreEvent> {
        self.inner.events.subscribe()
    }

    /// Route `payload` over a circuit for `options.mode`, building one if
    /// none is active. Returns the encrypted packet handed to the substrate;
    /// the return value is opaque, for logging and diagnostics only.
    ///
    /// Blocks on the handshake barrier for up to `handshake_timeout_ms` when
    /// candidates are still completing their handshakes.
    pub async fn send(&self, payload: &[u8], options: SendOptions) -> Result<OutboundPacket> {
        let inner = &self.inner;
        if !inner.running.load(Ordering::SeqCst) {
            return Err(TaiorError::NotInitialized);
        }

        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(inner.config.handshake_timeout_ms);

        let prepared = loop {
            match prepare_circuit(inner, options.mode).await {
                Ok(prepared) => break prepared,
                Err(err) => {
                    let pending = inner.state.lock().await.directory.pending_count();
                    if pending == 0 || tokio::time::Instant::now() >= deadline {
                        return Err(err);
                    }
                    // Handshake-wait barrier: candidates may complete shortly.
                    let notified = inner.handshake_notify.notified();
                    let mut shutdown = inner.shutdown.subscribe();
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                        _ = shutdown.recv() => return Err(TaiorError::Cancelled),
                    }
                    if !inner.running.load(Ordering::SeqCst) {
                        return Err(TaiorError::Cancelled);
                    }
                }
            }
        };

        let dest = aorp::destination_for_id(&prepared.exit_id);
        let inner_frame = aorp::build_aorp(payload, &dest, prepared.hops.len() > 1)
            .map_err(|e| TaiorError::SendFailed(e.to_string()))?;
        let packet = router::build_onion(&inner_frame, &prepared.hops)?;

        jitter_sleep(inner).await?;
        if !inner.running.load(Ordering::SeqCst) {
            return Err(TaiorError::Cancelled);
        }

        inner
            .substrate
            .send_frame(&prepared.first_hop, packet.clone())
            .map_err(|e| TaiorError::SendFailed(e.to_string()))?;

        debug!(
            circuit = %hex::encode(prepared.circuit_id),
            mode = options.mode.as_str(),
            bytes = packet.len(),
            "payload routed"
        );
        Ok(OutboundPacket {
            encrypted_payload: packet,
            circuit_id: prepared.circuit_id,
            hops: prepared.hops.len(),
        })
    }

    /// Diagnostics: snapshots of the active circuits.
    pub async fn active_circuits(&self) -> Vec<CircuitInfo> {
        let state = self.inner.state.lock().await;
        let now = Instant::now();
        state
            .circuits
            .active()
            .iter()
            .map(|c| CircuitInfo {
                id: *c.id(),
                mode: c.mode(),
                hops: c.hops().to_vec(),
                age: c.age(now),
            })
            .collect()
    }

    /// Diagnostics: one snapshot of the whole core.
    pub async fn status(&self) -> CoreStatus {
        let state = self.inner.state.lock().await;
        let window = Duration::from_millis(self.inner.config.staleness_ms);
        CoreStatus {
            running: self.inner.running.load(Ordering::SeqCst),
            known_peers: state.directory.len(),
            eligible_peers: state.directory.candidates(Instant::now(), window).len(),
            active_circuits: state.circuits.active().len(),
            cover_enabled: self.inner.cover.lock().expect("cover lock").enabled,
        }
    }

    /// Whether the core is accepting traffic.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Tear down: cancel timers, empty directory and circuits, drop the
    /// static secret. In-flight `send` calls that have not yet handed bytes
    /// to the substrate observe `Cancelled`.
    pub async fn disconnect(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.shutdown.send(());
        {
            let mut state = self.inner.state.lock().await;
            state.directory.clear();
            state.circuits.clear();
        }
        // Secret material is zeroized when the identity drops.
        *self.inner.identity.lock().expect("identity lock") = None;
        self.inner.handshake_notify.notify_waiters();
        self.inner.events.emit(CoreEvent::Disconnected);
        info!(address = %self.inner.address, "core disconnected");
    }
}

struct PreparedCircuit {
    circuit_id: [u8; 16],
    first_hop: String,
    exit_id: String,
    hops: Vec<(String, X25519PublicKey)>,
}

/// Pick the active circuit for `mode`, or build one from directory
/// candidates. Circuits whose members vanished are purged and rebuilt.
async fn prepare_circuit(inner: &Arc<Inner>, mode: RoutingMode) -> Result<PreparedCircuit> {
    let mut guard = inner.state.lock().await;
    let State {
        directory,
        circuits,
    } = &mut *guard;
    let now = Instant::now();
    circuits.purge_expired(now);

    let picked = circuits
        .pick(mode, now)
        .map(|c| (*c.id(), c.hops().to_vec()));
    if let Some((id, hop_ids)) = picked {
        match resolve_hops(directory, &hop_ids) {
            Some(hops) => return Ok(prepared(id, hop_ids, hops)),
            None => circuits.purge_id(&id),
        }
    }

    let window = Duration::from_millis(inner.config.staleness_ms);
    let candidates = directory.candidates(now, window);
    let built = circuits.build(mode, &candidates, &inner.config)?;
    let (id, hop_ids) = (*built.id(), built.hops().to_vec());
    match resolve_hops(directory, &hop_ids) {
        Some(hops) => {
            inner.events.emit(CoreEvent::CircuitBuilt {
                circuit_id: id,
                hops: hop_ids.len(),
            });
            Ok(prepared(id, hop_ids, hops))
        }
        None => {
            circuits.purge_id(&id);
            Err(TaiorError::NoCircuit)
        }
    }
}

fn prepared(
    circuit_id: [u8; 16],
    hop_ids: Vec<String>,
    hops: Vec<(String, X25519PublicKey)>,
) -> PreparedCircuit {
    PreparedCircuit {
        circuit_id,
        first_hop: hop_ids[0].clone(),
        exit_id: hop_ids[hop_ids.len() - 1].clone(),
        hops,
    }
}

fn resolve_hops(
    directory: &mut PeerDirectory,
    hop_ids: &[String],
) -> Option<Vec<(String, X25519PublicKey)>> {
    let mut hops = Vec::with_capacity(hop_ids.len());
    for id in hop_ids {
        let pk = directory.public_key_of(id)?;
        if pk.is_zero() {
            return None;
        }
        hops.push((id.clone(), pk));
    }
    Some(hops)
}

/// Uniform random delay in `[0, jitter_max_ms)` before any frame leaves.
async fn jitter_sleep(inner: &Inner) -> Result<()> {
    if inner.config.jitter_max_ms == 0 {
        return Ok(());
    }
    let delay =
        Duration::from_millis(rand::thread_rng().gen_range(0..inner.config.jitter_max_ms));
    let mut shutdown = inner.shutdown.subscribe();
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = shutdown.recv() => Err(TaiorError::Cancelled),
    }
}

async fn run_router(inner: Arc<Inner>, mut events: mpsc::UnboundedReceiver<SubstrateEvent>) {
    let mut shutdown = inner.shutdown.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            event = events.recv() => match event {
                Some(event) => handle_event(&inner, event).await,
                None => break,
            },
        }
    }
    debug!("router loop stopped");
}

async fn handle_event(inner: &Arc<Inner>, event: SubstrateEvent) {
    match event {
        SubstrateEvent::PeerUp { peer_id, addr } => {
            inner.state.lock().await.directory.insert(&peer_id, &addr);
            // The handshake frame precedes any onion frame on a connection.
            let handshake = frame::build_handshake(inner.public_key.as_bytes());
            match inner.substrate.send_frame(&peer_id, handshake) {
                Ok(()) => debug!(peer = %peer_id, "connection up, handshake sent"),
                Err(e) => warn!(peer = %peer_id, error = %e, "failed to send handshake"),
            }
        }
        SubstrateEvent::PeerDown { peer_id } => {
            let mut state = inner.state.lock().await;
            state.directory.remove(&peer_id);
            state.circuits.purge_referencing(&peer_id);
            drop(state);
            inner.events.emit(CoreEvent::PeerLost {
                peer_id: peer_id.clone(),
            });
            debug!(peer = %peer_id, "connection down");
        }
        SubstrateEvent::Frame { peer_id, frame } => handle_frame(inner, &peer_id, &frame).await,
    }
}

async fn handle_frame(inner: &Arc<Inner>, peer_id: &str, bytes: &[u8]) {
    match frame::classify(bytes) {
        Some(FrameKind::Handshake) => {
            let key = match frame::parse_handshake(bytes) {
                Ok(key) => key,
                Err(e) => {
                    debug!(peer = %peer_id, error = %e, "dropped bad handshake frame");
                    return;
                }
            };
            let completed = {
                let mut state = inner.state.lock().await;
                state.directory.insert(peer_id, "");
                match state.directory.complete_handshake(peer_id, key) {
                    Ok(()) => {
                        // First usable moment: build a circuit eagerly once
                        // no handshakes remain pending.
                        if state.circuits.is_empty() && state.directory.pending_count() == 0 {
                            let window = Duration::from_millis(inner.config.staleness_ms);
                            let candidates = state.directory.candidates(Instant::now(), window);
                            if let Ok(circuit) =
                                state
                                    .circuits
                                    .build(RoutingMode::Adaptive, &candidates, &inner.config)
                            {
                                inner.events.emit(CoreEvent::CircuitBuilt {
                                    circuit_id: *circuit.id(),
                                    hops: circuit.hops().len(),
                                });
                            }
                        }
                        true
                    }
                    Err(e) => {
                        debug!(peer = %peer_id, error = %e, "rejected handshake key");
                        false
                    }
                }
            };
            if completed {
                inner.events.emit(CoreEvent::PeerConnected {
                    peer_id: peer_id.to_string(),
                });
                inner.handshake_notify.notify_waiters();
            }
        }
        Some(FrameKind::Cover) => {
            // Bare cover traffic: note liveness, drop silently.
            inner.state.lock().await.directory.touch(peer_id);
        }
        Some(FrameKind::Onion) => {
            inner.state.lock().await.directory.touch(peer_id);
            handle_onion(inner, peer_id, bytes).await;
        }
        None => debug!(peer = %peer_id, "dropped frame with unknown magic"),
    }
}

async fn handle_onion(inner: &Arc<Inner>, peer_id: &str, bytes: &[u8]) {
    let peeled = {
        let identity = inner.identity.lock().expect("identity lock");
        match identity.as_ref() {
            Some(identity) => router::peel(identity.secret(), bytes),
            None => return,
        }
    };
    let cleartext = match peeled {
        Ok(cleartext) => cleartext,
        Err(e) => {
            // Never forwarded, never partially applied.
            debug!(peer = %peer_id, error = %e, "dropped undecryptable packet");
            return;
        }
    };

    match router::interpret(&cleartext, &inner.local_id) {
        PeeledFrame::Deliver { payload } => {
            debug!(bytes = payload.len(), "inbound payload terminated here");
            inner.events.emit(CoreEvent::PayloadDelivered {
                bytes: payload.len(),
            });
            let delivery = inner.delivery.lock().expect("delivery lock");
            if let Some(callback) = delivery.as_ref() {
                callback(payload, ANONYMOUS_TAG);
            }
        }
        PeeledFrame::Forward { next_hop, packet } => {
            let inner = inner.clone();
            tokio::spawn(async move {
                let known = inner.state.lock().await.directory.get(&next_hop).is_some();
                if !known {
                    debug!(next = %next_hop, "dropped packet for unknown next hop");
                    return;
                }
                if jitter_sleep(&inner).await.is_err() || !inner.running.load(Ordering::SeqCst) {
                    return;
                }
                // Onward bytes go out exactly as peeled.
                if let Err(e) = inner.substrate.send_frame(&next_hop, packet) {
                    debug!(next = %next_hop, error = %e, "forward failed");
                }
            });
        }
        PeeledFrame::Cover => debug!("cover packet terminated here"),
        PeeledFrame::Drop => debug!(peer = %peer_id, "dropped unroutable packet"),
    }
}

async fn run_cover(inner: Arc<Inner>) {
    let mut shutdown = inner.shutdown.subscribe();
    loop {
        let rate = inner.cover.lock().expect("cover lock").rate;
        let delay = cover::next_cover_delay(rate, &mut rand::thread_rng());
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        if !inner.running.load(Ordering::SeqCst) {
            break;
        }
        if !inner.cover.lock().expect("cover lock").enabled {
            continue;
        }
        if let Err(e) = emit_cover(&inner).await {
            // Cover failures are suppressed; they are never fatal.
            debug!(error = %e, "cover packet skipped");
        }
    }
    debug!("cover scheduler stopped");
}

/// Wrap a random-filled cover frame through the active circuit exactly like
/// a real payload and hand it to the first hop.
async fn emit_cover(inner: &Arc<Inner>) -> Result<()> {
    let prepared = prepare_circuit(inner, RoutingMode::Adaptive).await?;
    let len = cover::sample_cover_len(&mut rand::thread_rng());
    let cover_frame = frame::build_cover_frame(len);
    let packet = router::build_onion(&cover_frame, &prepared.hops)?;

    jitter_sleep(inner).await?;
    if !inner.running.load(Ordering::SeqCst) {
        return Err(TaiorError::Cancelled);
    }
    inner
        .substrate
        .send_frame(&prepared.first_hop, packet)
        .map_err(|e| TaiorError::SendFailed(e.to_string()))?;
    inner.events.emit(CoreEvent::CoverSent { bytes: len });
    debug!(bytes = len, "cover packet sent");
    Ok(())
}

async fn run_maintenance(inner: Arc<Inner>) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut tick = tokio::time::interval(Duration::from_millis(MAINTENANCE_TICK_MS));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_refresh = Instant::now();

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = tick.tick() => {}
        }

        let now = Instant::now();
        let config = &inner.config;
        let mut state = inner.state.lock().await;
        let State {
            directory,
            circuits,
        } = &mut *state;

        let handshake_timeout = Duration::from_millis(config.handshake_timeout_ms);
        for id in directory.evict_handshake_timeouts(now, handshake_timeout) {
            circuits.purge_referencing(&id);
            warn!(peer = %id, error = %TaiorError::HandshakeTimeout, "evicted peer");
            inner.events.emit(CoreEvent::PeerLost { peer_id: id });
        }

        let staleness = Duration::from_millis(config.staleness_ms);
        for id in directory.evict_stale(now, staleness) {
            circuits.purge_referencing(&id);
            inner.events.emit(CoreEvent::PeerLost { peer_id: id });
        }

        if now.duration_since(last_refresh) >= Duration::from_millis(config.circuit_refresh_ms) {
            last_refresh = now;
            refresh_circuits(directory, circuits, &inner.events, config, now);
        }
    }
    debug!("maintenance loop stopped");
}

/// Replace-then-drop: an expired circuit disappears only once a replacement
/// was attempted, so rotation stays indistinguishable to observers.
fn refresh_circuits(
    directory: &mut PeerDirectory,
    circuits: &mut CircuitManager,
    events: &EventBus,
    config: &CoreConfig,
    now: Instant,
) {
    let expired: Vec<([u8; 16], RoutingMode)> = circuits
        .active()
        .iter()
        .filter(|c| c.is_expired(now))
        .map(|c| (*c.id(), c.mode()))
        .collect();
    if expired.is_empty() {
        return;
    }

    let window = Duration::from_millis(config.staleness_ms);
    let candidates = directory.candidates(now, window);
    for (id, mode) in expired {
        match circuits.build(mode, &candidates, config) {
            Ok(replacement) => events.emit(CoreEvent::CircuitBuilt {
                circuit_id: *replacement.id(),
                hops: replacement.hops().len(),
            }),
            Err(e) => debug!(mode = mode.as_str(), error = %e, "no replacement circuit"),
        }
        circuits.purge_id(&id);
    }
}
