//! TTL key-value store backing the rendezvous mailbox.
//!
//! Two keyspaces: host claims per room code, and per-device signal queues.
//! Reads of the signal queue are destructive. Expired entries are skipped
//! on read and swept by a periodic purge, so correctness never depends on
//! the sweeper running.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use nearcast_shared::protocol::{JoinInfo, Signal};
use nearcast_shared::types::{DeviceId, RoomId};

#[derive(Default)]
struct StoreState {
    hosts: HashMap<String, (DeviceId, Instant)>,
    signals: HashMap<(String, DeviceId), Vec<(Signal, Instant)>>,
}

pub struct SignalStore {
    state: Mutex<StoreState>,
    host_ttl: Duration,
    signal_ttl: Duration,
}

impl SignalStore {
    pub fn new(host_ttl: Duration, signal_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            host_ttl,
            signal_ttl,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up the room host, atomically claiming the role for `device` if
    /// the room is unclaimed or the previous claim has expired. The claim is
    /// never renewed; it runs out `host_ttl` after the first join.
    pub fn join(&self, room: &RoomId, device: &DeviceId) -> JoinInfo {
        let mut state = self.lock();
        let now = Instant::now();

        if let Some((host, claimed_at)) = state.hosts.get(room.as_str()) {
            if now.duration_since(*claimed_at) < self.host_ttl {
                return JoinInfo {
                    is_host: host == device,
                    host_id: host.clone(),
                };
            }
        }

        debug!(room = %room, device = %device.short(), "New host claim");
        state
            .hosts
            .insert(room.as_str().to_string(), (device.clone(), now));
        JoinInfo {
            is_host: true,
            host_id: device.clone(),
        }
    }

    /// Queue a signal for `to`. Delivery happens whenever that device next
    /// polls; undelivered signals expire after `signal_ttl`.
    pub fn push_signal(&self, room: &RoomId, to: &DeviceId, signal: Signal) {
        self.lock()
            .signals
            .entry((room.as_str().to_string(), to.clone()))
            .or_default()
            .push((signal, Instant::now()));
    }

    /// Remove and return every live signal addressed to `device`.
    pub fn drain_signals(&self, room: &RoomId, device: &DeviceId) -> Vec<Signal> {
        let entry = self
            .lock()
            .signals
            .remove(&(room.as_str().to_string(), device.clone()));
        let now = Instant::now();
        entry
            .unwrap_or_default()
            .into_iter()
            .filter(|(_, at)| now.duration_since(*at) < self.signal_ttl)
            .map(|(signal, _)| signal)
            .collect()
    }

    /// Sweep expired host claims and signal queues.
    pub fn purge_expired(&self) {
        let mut state = self.lock();
        let now = Instant::now();

        let before = state.hosts.len() + state.signals.len();
        state
            .hosts
            .retain(|_, (_, at)| now.duration_since(*at) < self.host_ttl);
        state.signals.retain(|_, queue| {
            queue.retain(|(_, at)| now.duration_since(*at) < self.signal_ttl);
            !queue.is_empty()
        });
        let after = state.hosts.len() + state.signals.len();

        if after < before {
            debug!(purged = before - after, "Purged expired mailbox entries");
        }
    }
}
