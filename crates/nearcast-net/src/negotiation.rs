//! Per-peer negotiation state machine.
//!
//! Tracks transport setup progress toward one remote device and enforces
//! the candidate buffering rule: inbound candidates are applied only once a
//! remote description is known; earlier arrivals are buffered and flushed
//! in arrival order the instant the description lands.

use tracing::debug;

use nearcast_shared::protocol::SignalKind;
use nearcast_shared::types::DeviceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    OfferSent,
    OfferReceived,
    AnswerSent,
    AnswerReceived,
    Connected,
    Closed,
}

/// What the caller must do with the link after feeding a signal in.
#[derive(Debug, PartialEq)]
pub enum SignalAction {
    /// Apply `description` as the remote description, then apply `flushed`
    /// candidates in the order given.
    ApplyRemote {
        description: serde_json::Value,
        flushed: Vec<serde_json::Value>,
    },
    /// Apply one candidate (a remote description is already set).
    ApplyCandidate(serde_json::Value),
    /// Candidate arrived before any remote description; buffered.
    Buffered,
    /// Signal not meaningful in the current state; dropped.
    Ignored,
}

pub struct NegotiationSession {
    remote: DeviceId,
    state: SessionState,
    remote_description_set: bool,
    pending_candidates: Vec<serde_json::Value>,
}

impl NegotiationSession {
    pub fn new(remote: DeviceId) -> Self {
        Self {
            remote,
            state: SessionState::New,
            remote_description_set: false,
            pending_candidates: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn remote(&self) -> &DeviceId {
        &self.remote
    }

    /// The local offer has been produced and deposited.
    pub fn offer_sent(&mut self) {
        if self.state == SessionState::New {
            self.state = SessionState::OfferSent;
            debug!(remote = %self.remote.short(), "Offer sent");
        }
    }

    /// The local answer has been produced and deposited.
    pub fn answer_sent(&mut self) {
        if self.state == SessionState::OfferReceived {
            self.state = SessionState::AnswerSent;
            debug!(remote = %self.remote.short(), "Answer sent");
        }
    }

    /// The transport reported ready. Valid from either side of the exchange.
    pub fn mark_connected(&mut self) {
        if self.state != SessionState::Closed {
            self.state = SessionState::Connected;
            debug!(remote = %self.remote.short(), "Negotiation connected");
        }
    }

    /// Feed one inbound signal through the state machine.
    pub fn handle_signal(&mut self, kind: SignalKind, data: serde_json::Value) -> SignalAction {
        if self.state == SessionState::Closed {
            return SignalAction::Ignored;
        }

        match kind {
            SignalKind::Offer => {
                if self.remote_description_set {
                    debug!(remote = %self.remote.short(), "Duplicate offer dropped");
                    return SignalAction::Ignored;
                }
                self.remote_description_set = true;
                self.state = SessionState::OfferReceived;
                debug!(remote = %self.remote.short(), "Received offer");
                SignalAction::ApplyRemote {
                    description: data,
                    flushed: std::mem::take(&mut self.pending_candidates),
                }
            }
            SignalKind::Answer => {
                if self.state != SessionState::OfferSent {
                    debug!(
                        remote = %self.remote.short(),
                        state = ?self.state,
                        "Answer dropped: no outstanding offer"
                    );
                    return SignalAction::Ignored;
                }
                self.remote_description_set = true;
                self.state = SessionState::AnswerReceived;
                debug!(remote = %self.remote.short(), "Received answer");
                SignalAction::ApplyRemote {
                    description: data,
                    flushed: std::mem::take(&mut self.pending_candidates),
                }
            }
            SignalKind::IceCandidate => {
                if self.remote_description_set {
                    SignalAction::ApplyCandidate(data)
                } else {
                    self.pending_candidates.push(data);
                    debug!(
                        remote = %self.remote.short(),
                        buffered = self.pending_candidates.len(),
                        "Buffered candidate until remote description"
                    );
                    SignalAction::Buffered
                }
            }
        }
    }

    /// Tear down the session and any buffered candidates. Idempotent.
    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            self.state = SessionState::Closed;
            self.pending_candidates.clear();
            debug!(remote = %self.remote.short(), "Negotiation closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> NegotiationSession {
        NegotiationSession::new(DeviceId::from("dev-remote01"))
    }

    #[test]
    fn test_initiator_flow() {
        let mut s = session();
        assert_eq!(s.state(), SessionState::New);

        s.offer_sent();
        assert_eq!(s.state(), SessionState::OfferSent);

        let action = s.handle_signal(SignalKind::Answer, json!({"sdp": "a"}));
        assert!(matches!(action, SignalAction::ApplyRemote { .. }));
        assert_eq!(s.state(), SessionState::AnswerReceived);

        s.mark_connected();
        assert_eq!(s.state(), SessionState::Connected);
    }

    #[test]
    fn test_responder_flow() {
        let mut s = session();

        let action = s.handle_signal(SignalKind::Offer, json!({"sdp": "o"}));
        assert!(matches!(action, SignalAction::ApplyRemote { .. }));
        assert_eq!(s.state(), SessionState::OfferReceived);

        s.answer_sent();
        assert_eq!(s.state(), SessionState::AnswerSent);

        s.mark_connected();
        assert_eq!(s.state(), SessionState::Connected);
    }

    #[test]
    fn test_candidates_buffered_until_description_then_flushed_in_order() {
        let mut s = session();

        assert_eq!(
            s.handle_signal(SignalKind::IceCandidate, json!(1)),
            SignalAction::Buffered
        );
        assert_eq!(
            s.handle_signal(SignalKind::IceCandidate, json!(2)),
            SignalAction::Buffered
        );
        assert_eq!(
            s.handle_signal(SignalKind::IceCandidate, json!(3)),
            SignalAction::Buffered
        );

        match s.handle_signal(SignalKind::Offer, json!({"sdp": "o"})) {
            SignalAction::ApplyRemote { flushed, .. } => {
                assert_eq!(flushed, vec![json!(1), json!(2), json!(3)]);
            }
            other => panic!("expected ApplyRemote, got {other:?}"),
        }

        // A later candidate applies directly, exactly once.
        assert_eq!(
            s.handle_signal(SignalKind::IceCandidate, json!(4)),
            SignalAction::ApplyCandidate(json!(4))
        );
    }

    #[test]
    fn test_flush_happens_only_once() {
        let mut s = session();
        s.offer_sent();
        s.handle_signal(SignalKind::IceCandidate, json!("early"));

        match s.handle_signal(SignalKind::Answer, json!({"sdp": "a"})) {
            SignalAction::ApplyRemote { flushed, .. } => assert_eq!(flushed.len(), 1),
            other => panic!("expected ApplyRemote, got {other:?}"),
        }

        // Duplicate answer must not replay the buffer.
        assert_eq!(
            s.handle_signal(SignalKind::Answer, json!({"sdp": "a"})),
            SignalAction::Ignored
        );
    }

    #[test]
    fn test_answer_without_offer_ignored() {
        let mut s = session();
        assert_eq!(
            s.handle_signal(SignalKind::Answer, json!({})),
            SignalAction::Ignored
        );
        assert_eq!(s.state(), SessionState::New);
    }

    #[test]
    fn test_close_is_idempotent_and_final() {
        let mut s = session();
        s.handle_signal(SignalKind::IceCandidate, json!(1));

        s.close();
        assert_eq!(s.state(), SessionState::Closed);
        s.close();
        assert_eq!(s.state(), SessionState::Closed);

        assert_eq!(
            s.handle_signal(SignalKind::Offer, json!({})),
            SignalAction::Ignored
        );
        s.mark_connected();
        assert_eq!(s.state(), SessionState::Closed);
    }
}
