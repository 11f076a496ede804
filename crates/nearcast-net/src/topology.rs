//! Star-topology session registry.
//!
//! One owned registry keyed by remote device id holds everything attached
//! to a peer: its negotiation session, its link handle, and whether the
//! transport is open. The host additionally owns the roster of display
//! names. Removing a peer releases all of it in one place, and tearing the
//! registry down leaves nothing to leak into the next room.

use std::collections::HashMap;

use tracing::debug;

use nearcast_shared::types::{DeviceId, Role};

use crate::link::LinkHandle;
use crate::negotiation::NegotiationSession;

/// Everything the registry tracks for one remote device.
pub struct PeerEntry {
    pub negotiation: NegotiationSession,
    pub link: LinkHandle,
    pub open: bool,
}

impl PeerEntry {
    pub fn new(negotiation: NegotiationSession, link: LinkHandle) -> Self {
        Self {
            negotiation,
            link,
            open: false,
        }
    }
}

pub struct Topology {
    role: Role,
    host_id: DeviceId,
    peers: HashMap<DeviceId, PeerEntry>,
    /// Display names by device id. Host only; guests receive the derived
    /// name list via PEER_LIST.
    roster: HashMap<DeviceId, String>,
}

impl Topology {
    pub fn new(role: Role, host_id: DeviceId) -> Self {
        Self {
            role,
            host_id,
            peers: HashMap::new(),
            roster: HashMap::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn host_id(&self) -> &DeviceId {
        &self.host_id
    }

    /// Register a session toward `remote`. Any stale entry for the same
    /// device is closed and replaced.
    pub fn insert(&mut self, remote: DeviceId, entry: PeerEntry) {
        debug!(peer = %remote.short(), "Registering peer session");
        if let Some(stale) = self.peers.insert(remote, entry) {
            stale.link.close();
        }
    }

    pub fn contains(&self, remote: &DeviceId) -> bool {
        self.peers.contains_key(remote)
    }

    pub fn get_mut(&mut self, remote: &DeviceId) -> Option<&mut PeerEntry> {
        self.peers.get_mut(remote)
    }

    /// Mark the peer's transport open. Returns false for an unknown peer.
    pub fn mark_open(&mut self, remote: &DeviceId) -> bool {
        match self.peers.get_mut(remote) {
            Some(entry) => {
                entry.open = true;
                entry.negotiation.mark_connected();
                true
            }
            None => false,
        }
    }

    /// Remove a peer and its roster entry, returning what was registered.
    pub fn remove(&mut self, remote: &DeviceId) -> Option<PeerEntry> {
        self.roster.remove(remote);
        let entry = self.peers.remove(remote);
        if entry.is_some() {
            debug!(peer = %remote.short(), "Removed peer session");
        }
        entry
    }

    /// Number of peers with an open transport.
    pub fn open_count(&self) -> usize {
        self.peers.values().filter(|e| e.open).count()
    }

    pub fn open_peer_ids(&self) -> Vec<DeviceId> {
        self.peers
            .iter()
            .filter(|(_, e)| e.open)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Iterate over open links.
    pub fn open_links(&self) -> impl Iterator<Item = (&DeviceId, &LinkHandle)> {
        self.peers
            .iter()
            .filter(|(_, e)| e.open)
            .map(|(id, e)| (id, &e.link))
    }

    /// Link to `remote`, only while its transport is open.
    pub fn link_to(&self, remote: &DeviceId) -> Option<&LinkHandle> {
        self.peers
            .get(remote)
            .filter(|e| e.open)
            .map(|e| &e.link)
    }

    /// The guest's one meaningful destination.
    pub fn host_link(&self) -> Option<&LinkHandle> {
        self.link_to(&self.host_id)
    }

    pub fn set_roster_name(&mut self, remote: &DeviceId, name: String) {
        self.roster.insert(remote.clone(), name);
    }

    pub fn roster_names(&self) -> Vec<String> {
        self.roster.values().cloned().collect()
    }

    /// Tear everything down: close every link, drop sessions, buffers and
    /// roster. Used on leave and before re-joining a room.
    pub fn clear(&mut self) {
        for (id, entry) in self.peers.drain() {
            debug!(peer = %id.short(), "Closing peer session on teardown");
            entry.link.close();
        }
        self.roster.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::{mpsc, watch};

    fn test_link() -> (
        LinkHandle,
        mpsc::UnboundedReceiver<crate::link::LinkCommand>,
        watch::Sender<usize>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (buf_tx, buf_rx) = watch::channel(0);
        (
            LinkHandle {
                commands: tx,
                buffered: buf_rx,
            },
            rx,
            buf_tx,
        )
    }

    fn entry(
        remote: &DeviceId,
    ) -> (
        PeerEntry,
        mpsc::UnboundedReceiver<crate::link::LinkCommand>,
        watch::Sender<usize>,
    ) {
        let (link, rx, buf) = test_link();
        (
            PeerEntry::new(NegotiationSession::new(remote.clone()), link),
            rx,
            buf,
        )
    }

    #[test]
    fn test_insert_mark_open_remove() {
        let host = DeviceId::from("dev-host0001");
        let guest = DeviceId::from("dev-guest001");
        let mut topo = Topology::new(Role::Host, host);

        let (e, _rx, _buf) = entry(&guest);
        topo.insert(guest.clone(), e);
        assert!(topo.contains(&guest));
        assert_eq!(topo.open_count(), 0);
        assert!(topo.link_to(&guest).is_none());

        assert!(topo.mark_open(&guest));
        assert_eq!(topo.open_count(), 1);
        assert!(topo.link_to(&guest).is_some());

        assert!(topo.remove(&guest).is_some());
        assert!(!topo.contains(&guest));
        assert_eq!(topo.open_count(), 0);
        assert!(topo.remove(&guest).is_none());
    }

    #[test]
    fn test_roster_follows_membership() {
        let host = DeviceId::from("dev-host0001");
        let a = DeviceId::from("dev-aaaaaaaa");
        let b = DeviceId::from("dev-bbbbbbbb");
        let mut topo = Topology::new(Role::Host, host);

        let (ea, _ra, _ba) = entry(&a);
        let (eb, _rb, _bb) = entry(&b);
        topo.insert(a.clone(), ea);
        topo.insert(b.clone(), eb);
        topo.set_roster_name(&a, "alice".into());
        topo.set_roster_name(&b, "bob".into());

        let mut names = topo.roster_names();
        names.sort();
        assert_eq!(names, vec!["alice", "bob"]);

        topo.remove(&a);
        assert_eq!(topo.roster_names(), vec!["bob"]);
    }

    #[test]
    fn test_clear_closes_links() {
        let host = DeviceId::from("dev-host0001");
        let guest = DeviceId::from("dev-guest001");
        let mut topo = Topology::new(Role::Host, host);

        let (e, mut rx, _buf) = entry(&guest);
        topo.insert(guest.clone(), e);
        topo.mark_open(&guest);
        topo.clear();

        assert!(!topo.contains(&guest));
        assert_eq!(topo.roster_names().len(), 0);
        match rx.try_recv() {
            Ok(crate::link::LinkCommand::Close) => {}
            other => panic!("expected Close command, got {other:?}"),
        }
    }

    #[test]
    fn test_guest_host_link() {
        let host = DeviceId::from("dev-host0001");
        let mut topo = Topology::new(Role::Guest, host.clone());
        assert!(topo.host_link().is_none());

        let (e, _rx, _buf) = entry(&host);
        topo.insert(host.clone(), e);
        topo.mark_open(&host);
        assert!(topo.host_link().is_some());
    }
}
