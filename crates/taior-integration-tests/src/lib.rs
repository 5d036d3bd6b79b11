//! Shared harness for end-to-end overlay tests.
//!
//! [`LoopbackNetwork`] is an in-process substrate: every registered node can
//! reach every other by peer id, frames are delivered synchronously into the
//! receiving core's event queue, and every frame is recorded for assertions.
//! Directed links can be held to stage handshake-ordering scenarios.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use taior_core::{
    CoreConfig, HopPolicy, Substrate, SubstrateError, SubstrateHandle, Taior,
};
use tokio::sync::mpsc;

/// One recorded substrate frame.
#[derive(Clone, Debug)]
pub struct FrameRecord {
    /// Sending peer id.
    pub from: String,
    /// Receiving peer id.
    pub to: String,
    /// The opaque frame bytes.
    pub frame: Vec<u8>,
}

#[derive(Default)]
struct NetworkInner {
    handles: Mutex<HashMap<String, SubstrateHandle>>,
    held: Mutex<HashSet<(String, String)>>,
    queued: Mutex<HashMap<(String, String), Vec<Vec<u8>>>>,
    log: Mutex<Vec<FrameRecord>>,
}

/// An in-process loopback substrate connecting any number of cores.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    inner: Arc<NetworkInner>,
}

impl LoopbackNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// The substrate endpoint for a node named `id`.
    pub fn substrate(&self, id: &str) -> Arc<NodeSubstrate> {
        Arc::new(NodeSubstrate {
            network: self.inner.clone(),
            id: id.to_string(),
        })
    }

    /// Register a node's inbound handle so frames can reach it.
    pub fn register(&self, id: &str, handle: SubstrateHandle) {
        self.inner
            .handles
            .lock()
            .expect("handles lock")
            .insert(id.to_string(), handle);
    }

    /// Bring up the connection between two registered nodes (both sides see
    /// a peer-up event and send their handshake).
    pub fn connect(&self, a: &str, b: &str) {
        let handles = self.inner.handles.lock().expect("handles lock");
        if let Some(handle) = handles.get(a) {
            handle.peer_up(b, &format!("loopback:{b}"));
        }
        if let Some(handle) = handles.get(b) {
            handle.peer_up(a, &format!("loopback:{a}"));
        }
    }

    /// Signal to `a` that `b` went away.
    pub fn drop_peer(&self, a: &str, b: &str) {
        let handles = self.inner.handles.lock().expect("handles lock");
        if let Some(handle) = handles.get(a) {
            handle.peer_down(b);
        }
    }

    /// Hold all frames on the directed link `from -> to`; they queue until
    /// [`LoopbackNetwork::release`].
    pub fn hold(&self, from: &str, to: &str) {
        self.inner
            .held
            .lock()
            .expect("held lock")
            .insert((from.to_string(), to.to_string()));
    }

    /// Release a held link and deliver everything queued on it.
    pub fn release(&self, from: &str, to: &str) {
        let key = (from.to_string(), to.to_string());
        self.inner.held.lock().expect("held lock").remove(&key);

        let queued = self
            .inner
            .queued
            .lock()
            .expect("queued lock")
            .remove(&key)
            .unwrap_or_default();
        let handles = self.inner.handles.lock().expect("handles lock");
        if let Some(handle) = handles.get(to) {
            for frame in queued {
                handle.frame(from, frame);
            }
        }
    }

    /// Every frame sent so far, in order.
    pub fn frames(&self) -> Vec<FrameRecord> {
        self.inner.log.lock().expect("log lock").clone()
    }

    /// Frames sent by one node.
    pub fn frames_from(&self, id: &str) -> Vec<FrameRecord> {
        self.frames().into_iter().filter(|f| f.from == id).collect()
    }

    /// Frames sent over one directed link.
    pub fn frames_between(&self, from: &str, to: &str) -> Vec<FrameRecord> {
        self.frames()
            .into_iter()
            .filter(|f| f.from == from && f.to == to)
            .collect()
    }
}

/// The per-node substrate endpoint.
pub struct NodeSubstrate {
    network: Arc<NetworkInner>,
    id: String,
}

impl Substrate for NodeSubstrate {
    fn local_peer_id(&self) -> String {
        self.id.clone()
    }

    fn send_frame(&self, peer_id: &str, frame: Vec<u8>) -> Result<(), SubstrateError> {
        self.network.log.lock().expect("log lock").push(FrameRecord {
            from: self.id.clone(),
            to: peer_id.to_string(),
            frame: frame.clone(),
        });

        let key = (self.id.clone(), peer_id.to_string());
        if self.network.held.lock().expect("held lock").contains(&key) {
            self.network
                .queued
                .lock()
                .expect("queued lock")
                .entry(key)
                .or_default()
                .push(frame);
            return Ok(());
        }

        let handles = self.network.handles.lock().expect("handles lock");
        match handles.get(peer_id) {
            Some(handle) => {
                handle.frame(&self.id, frame);
                Ok(())
            }
            None => Err(SubstrateError(format!("no such peer {peer_id}"))),
        }
    }
}

/// Spawn a core on the network under the given peer id.
pub fn spawn_node(network: &LoopbackNetwork, id: &str, config: CoreConfig) -> Arc<Taior> {
    let core = Taior::new(config, network.substrate(id));
    network.register(id, core.handle());
    Arc::new(core)
}

/// Fully connect a set of registered nodes.
pub fn connect_mesh(network: &LoopbackNetwork, ids: &[&str]) {
    for (i, a) in ids.iter().enumerate() {
        for b in &ids[i + 1..] {
            network.connect(a, b);
        }
    }
}

/// Capture a node's deliveries into a channel of `(payload, tag)` pairs.
pub fn capture_deliveries(core: &Taior) -> mpsc::UnboundedReceiver<(Vec<u8>, String)> {
    let (tx, rx) = mpsc::unbounded_channel();
    core.on_delivery(move |payload, tag| {
        let _ = tx.send((payload, tag.to_string()));
    });
    rx
}

/// A hop policy that walks a fixed path in order.
pub struct FixedPath(pub Vec<String>);

impl FixedPath {
    /// Build from string slices.
    pub fn of(ids: &[&str]) -> Arc<Self> {
        Arc::new(Self(ids.iter().map(|s| s.to_string()).collect()))
    }
}

impl HopPolicy for FixedPath {
    fn decide_next_hop(&self, candidates: &[String], remaining_hops: usize) -> Option<String> {
        let index = self.0.len().checked_sub(remaining_hops)?;
        let id = self.0.get(index)?;
        candidates.contains(id).then(|| id.clone())
    }
}

/// A config keeping tests quick: no cover traffic, minimal jitter.
pub fn quiet_config() -> CoreConfig {
    CoreConfig {
        cover_enabled: false,
        jitter_max_ms: 2,
        handshake_timeout_ms: 2_000,
        ..CoreConfig::default()
    }
}

/// Bytes one routing layer adds around the onward packet:
/// packet magic + layer framing + the embedded next-hop field.
pub const ROUTING_LAYER_OVERHEAD: usize =
    1 + taior_crypto::layer::LAYER_OVERHEAD + taior_wire::NEXT_HOP_SIZE;

/// Bytes the terminal layer adds around the inner frame.
pub const EXIT_LAYER_OVERHEAD: usize = 1 + taior_crypto::layer::LAYER_OVERHEAD;
