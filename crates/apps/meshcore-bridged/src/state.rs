use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use time::OffsetDateTime;

use meshcore_wire::{Advertisement, AppData};

use crate::envelope::rfc3339;

/// Latest advertisement seen for a node hash.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeCacheEntry {
    pub public_key: [u8; 32],
    pub node_hash: u8,
    pub last_seen: OffsetDateTime,
    pub appdata: Option<AppData>,
}

/// Nodes keyed by their one-byte hash. Distinct keys that share a hash
/// overwrite each other.
#[derive(Debug, Default, Clone)]
pub struct NodeCache {
    entries: BTreeMap<u8, NodeCacheEntry>,
}

impl NodeCache {
    pub fn upsert(&mut self, advert: &Advertisement, seen_at: OffsetDateTime) {
        let node_hash = advert.node_hash();
        let entry = NodeCacheEntry {
            public_key: advert.public_key,
            node_hash,
            last_seen: seen_at,
            appdata: advert.appdata.clone(),
        };
        self.entries.insert(node_hash, entry);
    }

    pub fn get(&self, node_hash: u8) -> Option<&NodeCacheEntry> {
        self.entries.get(&node_hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug)]
struct BridgeState {
    packets_received: u64,
    packets_parsed: u64,
    packets_published: u64,
    errors: u64,
    nodes: NodeCache,
    serial_connected: bool,
    mqtt_connected: bool,
    started_at: OffsetDateTime,
}

/// Point-in-time copy of the bridge counters, as published on the stats topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub packets_received: u64,
    pub packets_parsed: u64,
    pub packets_published: u64,
    pub errors: u64,
    pub started_at: String,
    pub timestamp: String,
    pub known_nodes: usize,
    pub serial_connected: bool,
    pub mqtt_connected: bool,
}

/// Handle to the state shared by the relay loop, the stats task and the bus
/// listener. Every access takes the one lock; callers never hold it across
/// an `.await`.
#[derive(Debug, Clone)]
pub struct SharedState {
    inner: Arc<Mutex<BridgeState>>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(OffsetDateTime::now_utc())
    }
}

impl SharedState {
    pub fn new(started_at: OffsetDateTime) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BridgeState {
                packets_received: 0,
                packets_parsed: 0,
                packets_published: 0,
                errors: 0,
                nodes: NodeCache::default(),
                serial_connected: false,
                mqtt_connected: false,
                started_at,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BridgeState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_received(&self) {
        let mut state = self.lock();
        state.packets_received = state.packets_received.saturating_add(1);
    }

    pub fn record_parsed(&self) {
        let mut state = self.lock();
        state.packets_parsed = state.packets_parsed.saturating_add(1);
    }

    pub fn record_published(&self) {
        let mut state = self.lock();
        state.packets_published = state.packets_published.saturating_add(1);
    }

    pub fn record_error(&self) {
        let mut state = self.lock();
        state.errors = state.errors.saturating_add(1);
    }

    /// Returns the number of known nodes after the update.
    pub fn upsert_node(&self, advert: &Advertisement, seen_at: OffsetDateTime) -> usize {
        let mut state = self.lock();
        state.nodes.upsert(advert, seen_at);
        state.nodes.len()
    }

    pub fn node(&self, node_hash: u8) -> Option<NodeCacheEntry> {
        self.lock().nodes.get(node_hash).cloned()
    }

    pub fn known_nodes(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn set_serial_connected(&self, connected: bool) {
        self.lock().serial_connected = connected;
    }

    pub fn set_mqtt_connected(&self, connected: bool) {
        self.lock().mqtt_connected = connected;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.snapshot_at(OffsetDateTime::now_utc())
    }

    pub fn snapshot_at(&self, now: OffsetDateTime) -> StatsSnapshot {
        let state = self.lock();
        StatsSnapshot {
            packets_received: state.packets_received,
            packets_parsed: state.packets_parsed,
            packets_published: state.packets_published,
            errors: state.errors,
            started_at: rfc3339(state.started_at),
            timestamp: rfc3339(now),
            known_nodes: state.nodes.len(),
            serial_connected: state.serial_connected,
            mqtt_connected: state.mqtt_connected,
        }
    }
}
