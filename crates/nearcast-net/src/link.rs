//! The transport capability seam.
//!
//! The NAT-traversal negotiation and the reliable ordered message transport
//! are consumed as a capability, not implemented here. Each per-peer link
//! runs its own driver task and talks to the room session loop exclusively
//! through typed command and event channels, so every transport occurrence
//! (description ready, candidate discovered, frame received, state change)
//! is an ordinary message processed on one linearizable path, and can be
//! injected synthetically in tests.

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use nearcast_shared::protocol::ControlFrame;
use nearcast_shared::types::DeviceId;

/// Connection state reported by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Open,
    Failed,
    Closed,
}

/// Which side of the negotiation this link plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    /// Produces the offer (a guest dialing the host).
    Initiator,
    /// Produces the answer (the host accepting a guest).
    Responder,
}

/// One frame on the reliable ordered transport: a JSON control frame or a
/// single raw file chunk. Drivers decode inbound text frames with
/// [`ControlFrame::decode`]: malformed text is logged and dropped without
/// closing the transport, unknown frame types are dropped silently.
#[derive(Debug, Clone)]
pub enum Frame {
    Control(ControlFrame),
    Binary(Bytes),
}

/// Events emitted by a link driver into the session loop. The driver tags
/// each one with the remote device id when sending.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Local description produced by an initiator link.
    OfferReady(serde_json::Value),
    /// Local description produced by a responder link.
    AnswerReady(serde_json::Value),
    /// A locally discovered transport candidate, to be relayed immediately.
    CandidateDiscovered(serde_json::Value),
    /// The transport is open; frames can flow.
    Open,
    Frame(Frame),
    StateChanged(LinkState),
}

/// Commands sent into a link driver.
#[derive(Debug)]
pub enum LinkCommand {
    /// Apply the remote description (the offer on a responder, the answer on
    /// an initiator). Must precede any `AddCandidate`.
    ApplyRemoteDescription(serde_json::Value),
    AddCandidate(serde_json::Value),
    Send(Frame),
    Close,
}

/// Handle to one peer link, held by the session loop.
///
/// The command channel is unbounded: the host's relay fan-out must never
/// block on a slow destination, so pacing comes from `buffered`, the
/// transport's outstanding buffered byte count, which chunk senders watch
/// instead.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    pub commands: mpsc::UnboundedSender<LinkCommand>,
    pub buffered: watch::Receiver<usize>,
}

impl LinkHandle {
    /// Queue a frame for transmission. Returns false if the driver is gone.
    pub fn send_frame(&self, frame: Frame) -> bool {
        self.commands.send(LinkCommand::Send(frame)).is_ok()
    }

    pub fn close(&self) {
        let _ = self.commands.send(LinkCommand::Close);
    }
}

/// Factory for per-peer links: the external negotiation + transport stack.
pub trait Connector: Send + Sync + 'static {
    /// Open a link toward `remote` and spawn its driver. The driver delivers
    /// every event into `events`, tagged with `remote`.
    fn open_link(
        &self,
        local: &DeviceId,
        remote: &DeviceId,
        role: LinkRole,
        events: mpsc::Sender<(DeviceId, LinkEvent)>,
    ) -> LinkHandle;
}
