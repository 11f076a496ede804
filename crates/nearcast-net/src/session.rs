//! Room session orchestration.
//!
//! `spawn_session` joins the room through the mailbox, then runs one task
//! owning all mutable session state (topology, history, transfers). The
//! task multiplexes three sources on a single loop: the mailbox poll timer,
//! caller commands, and link driver events. Everything downstream is a pure
//! routing decision executed against the topology, so no lock is ever held.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use nearcast_shared::constants::POLL_INTERVAL_SECS;
use nearcast_shared::protocol::{FileMetadata, Message, Signal, SignalKind};
use nearcast_shared::types::{Device, DeviceId, Role, RoomId};

use crate::link::{Connector, Frame, LinkCommand, LinkEvent, LinkRole, LinkState};
use crate::mailbox::{Mailbox, MailboxError};
use crate::negotiation::{NegotiationSession, SignalAction};
use crate::router::{Effect, Router};
use crate::signals::SignalChannel;
use crate::topology::{PeerEntry, Topology};
use crate::transfer;

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;

/// Commands accepted by a running session.
#[derive(Debug)]
pub enum SessionCommand {
    SendText(String),
    SendFile {
        name: String,
        mime_type: String,
        data: Bytes,
    },
    GetPeers(oneshot::Sender<Vec<DeviceId>>),
    Leave,
}

/// Notifications delivered to the session owner.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    PeerConnected(DeviceId),
    PeerDisconnected(DeviceId),
    MessageAdded(Message),
    HistoryReplaced(Vec<Message>),
    RosterUpdated(Vec<String>),
    TransferStarted {
        file_id: Uuid,
        metadata: FileMetadata,
        sender_name: String,
    },
    TransferProgress {
        file_id: Uuid,
        received: u64,
        total: u64,
    },
    FileReceived {
        id: Uuid,
        data: Bytes,
    },
    /// The guest's link to the host is gone; the session is effectively over.
    ConnectionLost,
}

pub struct SessionConfig {
    pub room: RoomId,
    pub local: Device,
    pub poll_interval: Duration,
}

impl SessionConfig {
    pub fn new(room: RoomId, local: Device) -> Self {
        Self {
            room,
            local,
            poll_interval: Duration::from_secs(POLL_INTERVAL_SECS),
        }
    }
}

/// Handle returned by [`spawn_session`]. Dropping the command sender makes
/// the task tear the room down and exit.
pub struct SessionHandle {
    pub role: Role,
    pub host_id: DeviceId,
    pub commands: mpsc::Sender<SessionCommand>,
    pub events: mpsc::Receiver<SessionEvent>,
}

/// Join `room` and spawn its session task.
///
/// The mailbox join is performed before spawning so a dead rendezvous
/// service fails the call instead of a background task. A guest dials the
/// host immediately; the host waits for offers to arrive via polling.
pub async fn spawn_session<M: Mailbox, C: Connector>(
    config: SessionConfig,
    mailbox: M,
    connector: C,
) -> Result<SessionHandle, MailboxError> {
    let info = mailbox.join(&config.room, &config.local.id).await?;
    let role = if info.is_host { Role::Host } else { Role::Guest };

    info!(
        room = %config.room,
        device = %config.local.id.short(),
        role = ?role,
        "Joined room"
    );

    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    let (link_tx, link_rx) = mpsc::channel(EVENT_BUFFER);

    let mut topology = Topology::new(role, info.host_id.clone());
    if role == Role::Guest {
        // Dial the host right away; its answer comes back through polling.
        let link = connector.open_link(
            &config.local.id,
            &info.host_id,
            LinkRole::Initiator,
            link_tx.clone(),
        );
        topology.insert(
            info.host_id.clone(),
            PeerEntry::new(NegotiationSession::new(info.host_id.clone()), link),
        );
    }

    let task = SessionTask {
        local: config.local.clone(),
        role,
        poll_interval: config.poll_interval,
        signals: SignalChannel::new(mailbox, config.room, config.local.id.clone()),
        connector,
        topology,
        router: Router::new(role, config.local),
        cmd_rx,
        link_tx,
        link_rx,
        event_tx,
    };
    tokio::spawn(task.run());

    Ok(SessionHandle {
        role,
        host_id: info.host_id,
        commands: cmd_tx,
        events: event_rx,
    })
}

struct SessionTask<M: Mailbox, C: Connector> {
    local: Device,
    role: Role,
    poll_interval: Duration,
    signals: SignalChannel<M>,
    connector: C,
    topology: Topology,
    router: Router,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    link_tx: mpsc::Sender<(DeviceId, LinkEvent)>,
    link_rx: mpsc::Receiver<(DeviceId, LinkEvent)>,
    event_tx: mpsc::Sender<SessionEvent>,
}

impl<M: Mailbox, C: Connector> SessionTask<M, C> {
    async fn run(mut self) {
        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    // The host polls for the life of the room; a guest only
                    // until its host link is up.
                    if self.role.is_host() || self.topology.open_count() == 0 {
                        let batch = self.signals.receive().await;
                        for signal in batch {
                            self.handle_signal(signal).await;
                        }
                    }
                }

                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if !self.handle_command(cmd).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }

                Some((from, event)) = self.link_rx.recv() => {
                    self.handle_link_event(from, event).await;
                }
            }
        }

        debug!(device = %self.local.id.short(), "Session loop exiting");
        self.topology.clear();
    }

    /// Returns false when the session should end.
    async fn handle_command(&mut self, cmd: SessionCommand) -> bool {
        match cmd {
            SessionCommand::SendText(content) => {
                let effects = self.router.compose_text(content, &self.topology);
                self.apply_effects(effects).await;
            }

            SessionCommand::SendFile {
                name,
                mime_type,
                data,
            } => {
                let file_id = Uuid::new_v4();
                let metadata = FileMetadata {
                    name,
                    size: data.len() as u64,
                    mime_type,
                };

                let effects = self.router.compose_file(file_id, &metadata);
                self.apply_effects(effects).await;

                // One independent streaming task per destination: a slow
                // peer stalls only its own copy.
                let targets: Vec<_> = if self.role.is_host() {
                    self.topology
                        .open_links()
                        .map(|(id, link)| (id.clone(), link.clone()))
                        .collect()
                } else {
                    self.topology
                        .host_link()
                        .map(|link| (self.topology.host_id().clone(), link.clone()))
                        .into_iter()
                        .collect()
                };

                if targets.is_empty() {
                    warn!(file = %metadata.name, "No open peers to send file to");
                }
                for (peer, link) in targets {
                    let metadata = metadata.clone();
                    let display_name = self.local.display_name.clone();
                    let data = data.clone();
                    tokio::spawn(async move {
                        if let Err(e) =
                            transfer::send_file(link, file_id, metadata, display_name, data).await
                        {
                            warn!(peer = %peer.short(), error = %e, "File send aborted");
                        }
                    });
                }
            }

            SessionCommand::GetPeers(reply) => {
                let _ = reply.send(self.topology.open_peer_ids());
            }

            SessionCommand::Leave => return false,
        }
        true
    }

    async fn handle_signal(&mut self, signal: Signal) {
        let from = signal.from.clone();

        if !self.topology.contains(&from) {
            if !self.role.is_host() && from != *self.topology.host_id() {
                warn!(from = %from.short(), "Ignoring signal from non-host peer");
                return;
            }
            // First contact from a dialing guest: open the answering side.
            // Candidates can outrun the offer, so the session is created on
            // any signal kind and buffers until a description lands.
            let link = self.connector.open_link(
                &self.local.id,
                &from,
                LinkRole::Responder,
                self.link_tx.clone(),
            );
            self.topology.insert(
                from.clone(),
                PeerEntry::new(NegotiationSession::new(from.clone()), link),
            );
        }

        let Some(entry) = self.topology.get_mut(&from) else {
            return;
        };
        match entry.negotiation.handle_signal(signal.kind, signal.data) {
            SignalAction::ApplyRemote {
                description,
                flushed,
            } => {
                let _ = entry
                    .link
                    .commands
                    .send(LinkCommand::ApplyRemoteDescription(description));
                for candidate in flushed {
                    let _ = entry.link.commands.send(LinkCommand::AddCandidate(candidate));
                }
            }
            SignalAction::ApplyCandidate(candidate) => {
                let _ = entry.link.commands.send(LinkCommand::AddCandidate(candidate));
            }
            SignalAction::Buffered | SignalAction::Ignored => {}
        }
    }

    async fn handle_link_event(&mut self, from: DeviceId, event: LinkEvent) {
        match event {
            LinkEvent::OfferReady(description) => {
                if let Some(entry) = self.topology.get_mut(&from) {
                    entry.negotiation.offer_sent();
                }
                self.signals.send(&from, SignalKind::Offer, description).await;
            }

            LinkEvent::AnswerReady(description) => {
                if let Some(entry) = self.topology.get_mut(&from) {
                    entry.negotiation.answer_sent();
                }
                self.signals
                    .send(&from, SignalKind::Answer, description)
                    .await;
            }

            LinkEvent::CandidateDiscovered(candidate) => {
                // Trickle immediately; the receiving side buffers as needed.
                self.signals
                    .send(&from, SignalKind::IceCandidate, candidate)
                    .await;
            }

            LinkEvent::Open => {
                if !self.topology.mark_open(&from) {
                    warn!(peer = %from.short(), "Open event for unknown peer");
                    return;
                }
                info!(peer = %from.short(), "Peer transport open");
                self.emit(SessionEvent::PeerConnected(from.clone())).await;

                if let Some(link) = self.topology.link_to(&from) {
                    for frame in self.router.connect_frames() {
                        link.send_frame(Frame::Control(frame));
                    }
                }
            }

            LinkEvent::Frame(Frame::Control(frame)) => {
                let effects = self.router.handle_frame(&from, frame, &mut self.topology);
                self.apply_effects(effects).await;
            }

            LinkEvent::Frame(Frame::Binary(chunk)) => {
                let effects = self.router.handle_binary(&from, chunk);
                self.apply_effects(effects).await;
            }

            LinkEvent::StateChanged(LinkState::Failed | LinkState::Closed) => {
                self.peer_gone(from).await;
            }

            LinkEvent::StateChanged(_) => {}
        }
    }

    async fn peer_gone(&mut self, from: DeviceId) {
        let Some(entry) = self.topology.remove(&from) else {
            return;
        };
        entry.link.close();
        info!(peer = %from.short(), "Peer departed");

        let effects = self.router.peer_departed(&from, &self.topology);
        self.apply_effects(effects).await;
        self.emit(SessionEvent::PeerDisconnected(from.clone())).await;

        if !self.role.is_host() && from == *self.topology.host_id() {
            self.emit(SessionEvent::ConnectionLost).await;
        }
    }

    async fn apply_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::SendTo(to, frame) => {
                    match self.topology.link_to(&to) {
                        Some(link) => {
                            link.send_frame(Frame::Control(frame));
                        }
                        None => warn!(peer = %to.short(), "No open link for frame"),
                    }
                }

                Effect::Broadcast { frame, except } => {
                    for (id, link) in self.topology.open_links() {
                        if except.as_ref() == Some(id) {
                            continue;
                        }
                        link.send_frame(Frame::Control(frame.clone()));
                    }
                }

                Effect::RelayBinary { chunk, except } => {
                    for (id, link) in self.topology.open_links() {
                        if *id == except {
                            continue;
                        }
                        link.send_frame(Frame::Binary(chunk.clone()));
                    }
                }

                Effect::Emit(event) => self.emit(event).await,
            }
        }
    }

    async fn emit(&self, event: SessionEvent) {
        if self.event_tx.send(event).await.is_err() {
            debug!("Session owner dropped the event receiver");
        }
    }
}
