//! In-process mailbox and transport, used by the integration tests and by
//! local demos that run several devices in one process.
//!
//! `MemoryMailbox` mirrors the server's TTL store semantics (atomic host
//! claim, destructive drain, expiry). `MemoryConnector` stands in for the
//! NAT-traversal transport: links negotiate through the same offer, answer
//! and candidate signals as the real thing, and carry frames over paired
//! channels. Control frames still round-trip through their JSON encoding so
//! the malformed-frame and unknown-frame paths are exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde_json::json;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use nearcast_shared::constants::{HOST_TTL_SECS, SIGNAL_TTL_SECS};
use nearcast_shared::protocol::{ControlFrame, JoinInfo, Signal};
use nearcast_shared::types::{DeviceId, RoomId};

use crate::link::{Connector, Frame, LinkCommand, LinkEvent, LinkHandle, LinkRole, LinkState};
use crate::mailbox::{Mailbox, MailboxError};

#[derive(Default)]
struct MailboxState {
    hosts: HashMap<String, (DeviceId, Instant)>,
    signals: HashMap<(String, DeviceId), Vec<(Signal, Instant)>>,
}

/// Shared-state mailbox with the same claim and drain semantics as the HTTP
/// service.
#[derive(Clone)]
pub struct MemoryMailbox {
    inner: Arc<Mutex<MailboxState>>,
    host_ttl: Duration,
    signal_ttl: Duration,
}

impl Default for MemoryMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMailbox {
    pub fn new() -> Self {
        Self::with_ttls(
            Duration::from_secs(HOST_TTL_SECS),
            Duration::from_secs(SIGNAL_TTL_SECS),
        )
    }

    pub fn with_ttls(host_ttl: Duration, signal_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MailboxState::default())),
            host_ttl,
            signal_ttl,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MailboxState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Mailbox for MemoryMailbox {
    async fn join(&self, room: &RoomId, device: &DeviceId) -> Result<JoinInfo, MailboxError> {
        let mut state = self.lock();
        let now = Instant::now();

        if let Some((host, claimed_at)) = state.hosts.get(room.as_str()) {
            if now.duration_since(*claimed_at) < self.host_ttl {
                return Ok(JoinInfo {
                    is_host: host == device,
                    host_id: host.clone(),
                });
            }
        }

        // Expired or unclaimed: the caller becomes host atomically.
        state
            .hosts
            .insert(room.as_str().to_string(), (device.clone(), now));
        Ok(JoinInfo {
            is_host: true,
            host_id: device.clone(),
        })
    }

    async fn post_signal(
        &self,
        room: &RoomId,
        to: &DeviceId,
        signal: &Signal,
    ) -> Result<(), MailboxError> {
        self.lock()
            .signals
            .entry((room.as_str().to_string(), to.clone()))
            .or_default()
            .push((signal.clone(), Instant::now()));
        Ok(())
    }

    async fn drain_signals(
        &self,
        room: &RoomId,
        device: &DeviceId,
    ) -> Result<Vec<Signal>, MailboxError> {
        let entry = self
            .lock()
            .signals
            .remove(&(room.as_str().to_string(), device.clone()));
        let now = Instant::now();
        Ok(entry
            .unwrap_or_default()
            .into_iter()
            .filter(|(_, at)| now.duration_since(*at) < self.signal_ttl)
            .map(|(signal, _)| signal)
            .collect())
    }
}

/// What travels on a memory link's wire: the same two frame classes the
/// real transport distinguishes.
#[derive(Debug)]
enum WireFrame {
    Text(String),
    Binary(Bytes),
}

struct PendingLink {
    /// The responder-side wire endpoints, parked until an answer arrives.
    wire_tx: mpsc::UnboundedSender<WireFrame>,
    wire_rx: mpsc::UnboundedReceiver<WireFrame>,
    /// Fired by the responder once it has produced its answer.
    open_tx: oneshot::Sender<()>,
}

/// In-process [`Connector`]: pairs an initiator and a responder through an
/// opaque token carried in the offer, the way a session description names a
/// rendezvous the signaling layer cannot parse.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    pending: Arc<Mutex<HashMap<u64, PendingLink>>>,
    next_token: Arc<AtomicU64>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Connector for MemoryConnector {
    fn open_link(
        &self,
        _local: &DeviceId,
        remote: &DeviceId,
        role: LinkRole,
        events: mpsc::Sender<(DeviceId, LinkEvent)>,
    ) -> LinkHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (buf_tx, buf_rx) = watch::channel(0usize);
        let remote = remote.clone();

        match role {
            LinkRole::Initiator => {
                let token = self.next_token.fetch_add(1, Ordering::Relaxed);
                let (a_tx, b_rx) = mpsc::unbounded_channel();
                let (b_tx, a_rx) = mpsc::unbounded_channel();
                let (open_tx, open_rx) = oneshot::channel();

                // Register the responder's half before any signal can fly.
                self.pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(
                        token,
                        PendingLink {
                            wire_tx: b_tx,
                            wire_rx: b_rx,
                            open_tx,
                        },
                    );

                tokio::spawn(run_initiator(
                    token, remote, events, cmd_rx, buf_tx, a_tx, a_rx, open_rx,
                ));
            }
            LinkRole::Responder => {
                let pending = Arc::clone(&self.pending);
                tokio::spawn(run_responder(pending, remote, events, cmd_rx, buf_tx));
            }
        }

        LinkHandle {
            commands: cmd_tx,
            buffered: buf_rx,
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_initiator(
    token: u64,
    remote: DeviceId,
    events: mpsc::Sender<(DeviceId, LinkEvent)>,
    mut cmd_rx: mpsc::UnboundedReceiver<LinkCommand>,
    buf_tx: watch::Sender<usize>,
    wire_tx: mpsc::UnboundedSender<WireFrame>,
    wire_rx: mpsc::UnboundedReceiver<WireFrame>,
    open_rx: oneshot::Receiver<()>,
) {
    // Candidate first, offer second: the remote sees the candidate before
    // it has a remote description and must buffer it.
    let candidate = json!({ "candidate": format!("memory {token}") });
    if events
        .send((remote.clone(), LinkEvent::CandidateDiscovered(candidate)))
        .await
        .is_err()
    {
        return;
    }
    let offer = json!({ "token": token });
    if events
        .send((remote.clone(), LinkEvent::OfferReady(offer)))
        .await
        .is_err()
    {
        return;
    }

    // Wait for the answer to come back through signaling.
    loop {
        match cmd_rx.recv().await {
            Some(LinkCommand::ApplyRemoteDescription(_)) => break,
            Some(LinkCommand::AddCandidate(_)) => {}
            Some(LinkCommand::Close) | None => return,
            Some(LinkCommand::Send(_)) => {
                warn!(peer = %remote.short(), "Frame sent before transport open; dropped");
            }
        }
    }
    // The responder fires this once it has produced its answer; it stands
    // in for the transport's own connectivity checks completing.
    if open_rx.await.is_err() {
        let _ = events
            .send((remote, LinkEvent::StateChanged(LinkState::Failed)))
            .await;
        return;
    }
    debug!(peer = %remote.short(), "Memory link handshake done");

    if events
        .send((remote.clone(), LinkEvent::Open))
        .await
        .is_err()
    {
        return;
    }
    run_wire(remote, events, cmd_rx, buf_tx, wire_tx, wire_rx).await;
}

async fn run_responder(
    pending: Arc<Mutex<HashMap<u64, PendingLink>>>,
    remote: DeviceId,
    events: mpsc::Sender<(DeviceId, LinkEvent)>,
    mut cmd_rx: mpsc::UnboundedReceiver<LinkCommand>,
    buf_tx: watch::Sender<usize>,
) {
    // Wait for the offer carrying the pairing token.
    let token = loop {
        match cmd_rx.recv().await {
            Some(LinkCommand::ApplyRemoteDescription(offer)) => {
                match offer.get("token").and_then(serde_json::Value::as_u64) {
                    Some(token) => break token,
                    None => {
                        warn!(peer = %remote.short(), "Offer without pairing token");
                        let _ = events
                            .send((remote, LinkEvent::StateChanged(LinkState::Failed)))
                            .await;
                        return;
                    }
                }
            }
            Some(LinkCommand::AddCandidate(_)) => {}
            Some(LinkCommand::Close) | None => return,
            Some(LinkCommand::Send(_)) => {
                warn!(peer = %remote.short(), "Frame sent before transport open; dropped");
            }
        }
    };

    let Some(link) = pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&token)
    else {
        warn!(peer = %remote.short(), token, "No pending link for token");
        let _ = events
            .send((remote, LinkEvent::StateChanged(LinkState::Failed)))
            .await;
        return;
    };

    let candidate = json!({ "candidate": format!("memory {token} reply") });
    if events
        .send((remote.clone(), LinkEvent::CandidateDiscovered(candidate)))
        .await
        .is_err()
    {
        return;
    }
    let answer = json!({ "token": token, "answer": true });
    if events
        .send((remote.clone(), LinkEvent::AnswerReady(answer)))
        .await
        .is_err()
    {
        return;
    }

    // The initiator fires open_tx when it applies our answer; both ends of
    // the wire opening together models the transport coming up.
    let _ = link.open_tx.send(());

    if events
        .send((remote.clone(), LinkEvent::Open))
        .await
        .is_err()
    {
        return;
    }
    run_wire(remote, events, cmd_rx, buf_tx, link.wire_tx, link.wire_rx).await;
}

/// Shuttle frames between the command channel and the paired wire until
/// either side goes away. Control frames round-trip through JSON.
async fn run_wire(
    remote: DeviceId,
    events: mpsc::Sender<(DeviceId, LinkEvent)>,
    mut cmd_rx: mpsc::UnboundedReceiver<LinkCommand>,
    buf_tx: watch::Sender<usize>,
    wire_tx: mpsc::UnboundedSender<WireFrame>,
    mut wire_rx: mpsc::UnboundedReceiver<WireFrame>,
) {
    // The in-process wire never backs up.
    let _ = buf_tx.send(0);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(LinkCommand::Send(Frame::Control(frame))) => match frame.encode() {
                    Ok(text) => {
                        if wire_tx.send(WireFrame::Text(text)).is_err() {
                            let _ = events
                                .send((remote, LinkEvent::StateChanged(LinkState::Closed)))
                                .await;
                            return;
                        }
                    }
                    Err(e) => warn!(peer = %remote.short(), error = %e, "Frame encode failed"),
                },
                Some(LinkCommand::Send(Frame::Binary(chunk))) => {
                    if wire_tx.send(WireFrame::Binary(chunk)).is_err() {
                        let _ = events
                            .send((remote, LinkEvent::StateChanged(LinkState::Closed)))
                            .await;
                        return;
                    }
                }
                Some(LinkCommand::ApplyRemoteDescription(_))
                | Some(LinkCommand::AddCandidate(_)) => {}
                Some(LinkCommand::Close) | None => {
                    // Dropping our wire end closes the peer's receive side.
                    let _ = events
                        .send((remote, LinkEvent::StateChanged(LinkState::Closed)))
                        .await;
                    return;
                }
            },

            frame = wire_rx.recv() => match frame {
                Some(WireFrame::Text(text)) => match ControlFrame::decode(&text) {
                    Ok(Some(frame)) => {
                        if events
                            .send((remote.clone(), LinkEvent::Frame(Frame::Control(frame))))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Ok(None) => debug!(peer = %remote.short(), "Unknown frame type skipped"),
                    Err(e) => warn!(peer = %remote.short(), error = %e, "Malformed frame dropped"),
                },
                Some(WireFrame::Binary(chunk)) => {
                    if events
                        .send((remote.clone(), LinkEvent::Frame(Frame::Binary(chunk))))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                None => {
                    let _ = events
                        .send((remote, LinkEvent::StateChanged(LinkState::Closed)))
                        .await;
                    return;
                }
            },
        }
    }
}
