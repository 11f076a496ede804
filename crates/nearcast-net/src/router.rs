//! Frame routing for the star topology.
//!
//! All routing decisions live here as a pure function from (frame, sender,
//! topology) to a list of effects; the session loop executes the effects.
//! The host relays between guests and maintains the authoritative history
//! and roster; guests apply whatever the host sends.

use bytes::Bytes;
use tracing::{debug, warn};
use uuid::Uuid;

use nearcast_shared::protocol::{ControlFrame, FileMetadata, Message};
use nearcast_shared::types::{Device, DeviceId, Role};

use crate::history::HistoryLog;
use crate::session::SessionEvent;
use crate::topology::Topology;
use crate::transfer::TransferTable;

/// One routing decision. `Broadcast` and `RelayBinary` target every open
/// link except the excluded sender; they are host-only in practice since a
/// guest never has more than one open link.
#[derive(Debug)]
pub enum Effect {
    SendTo(DeviceId, ControlFrame),
    Broadcast {
        frame: ControlFrame,
        except: Option<DeviceId>,
    },
    RelayBinary {
        chunk: Bytes,
        except: DeviceId,
    },
    Emit(SessionEvent),
}

pub struct Router {
    role: Role,
    local: Device,
    pub history: HistoryLog,
    transfers: TransferTable,
}

impl Router {
    pub fn new(role: Role, local: Device) -> Self {
        Self {
            role,
            local,
            history: HistoryLog::new(),
            transfers: TransferTable::new(),
        }
    }

    /// Route one inbound control frame from peer `from`.
    pub fn handle_frame(
        &mut self,
        from: &DeviceId,
        frame: ControlFrame,
        topology: &mut Topology,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();

        match frame {
            ControlFrame::Join { display_name } => {
                if self.role.is_host() {
                    debug!(peer = %from.short(), name = %display_name, "Guest joined");
                    topology.set_roster_name(from, display_name);
                    let names = self.full_roster(topology);
                    effects.push(Effect::Broadcast {
                        frame: ControlFrame::PeerList {
                            names: names.clone(),
                        },
                        except: None,
                    });
                    effects.push(Effect::Emit(SessionEvent::RosterUpdated(names)));
                }
                // A guest learns membership from PEER_LIST, not from the
                // host's own JOIN.
            }

            ControlFrame::PeerList { names } => {
                if !self.role.is_host() {
                    effects.push(Effect::Emit(SessionEvent::RosterUpdated(names)));
                }
            }

            ControlFrame::SyncHistory { history } => {
                if !self.role.is_host() {
                    debug!(count = history.len(), "Applying host history snapshot");
                    self.history.replace_all(history.clone());
                    effects.push(Effect::Emit(SessionEvent::HistoryReplaced(history)));
                }
            }

            ControlFrame::NewMessage { data } => {
                // Dedup governs both display and relay: a redelivered id is
                // absorbed without echoing back into the mesh.
                if self.history.insert(data.clone()) {
                    effects.push(Effect::Emit(SessionEvent::MessageAdded(data.clone())));
                    if self.role.is_host() {
                        effects.push(Effect::Broadcast {
                            frame: ControlFrame::NewMessage { data },
                            except: Some(from.clone()),
                        });
                    }
                } else {
                    debug!(peer = %from.short(), "Duplicate message absorbed");
                }
            }

            ControlFrame::FileStart {
                file_id,
                metadata,
                display_name,
            } => {
                self.transfers
                    .start(from, file_id, metadata.clone(), display_name.clone());
                effects.push(Effect::Emit(SessionEvent::TransferStarted {
                    file_id,
                    metadata: metadata.clone(),
                    sender_name: display_name.clone(),
                }));
                if self.role.is_host() {
                    effects.push(Effect::Broadcast {
                        frame: ControlFrame::FileStart {
                            file_id,
                            metadata,
                            display_name,
                        },
                        except: Some(from.clone()),
                    });
                }
            }

            ControlFrame::FileEnd { file_id } => {
                // Relay before completing locally so downstream guests see
                // the same frame order the sender produced.
                if self.role.is_host() {
                    effects.push(Effect::Broadcast {
                        frame: ControlFrame::FileEnd { file_id },
                        except: Some(from.clone()),
                    });
                }
                match self.transfers.finish(from, file_id) {
                    Some(transfer) => {
                        let metadata = transfer.metadata.clone();
                        let sender = transfer.sender_name.clone();
                        let data = transfer.into_bytes();
                        let message = self.materialize_file(file_id, &metadata, &sender);
                        if self.history.insert(message.clone()) {
                            effects.push(Effect::Emit(SessionEvent::MessageAdded(message)));
                        }
                        effects.push(Effect::Emit(SessionEvent::FileReceived {
                            id: file_id,
                            data,
                        }));
                    }
                    None => {
                        warn!(peer = %from.short(), file_id = %file_id, "FILE_END without open transfer");
                    }
                }
            }
        }

        effects
    }

    /// Route one inbound binary chunk from peer `from`.
    pub fn handle_binary(&mut self, from: &DeviceId, chunk: Bytes) -> Vec<Effect> {
        let mut effects = Vec::new();

        // Relay first, append second: the local copy must never delay the
        // fan-out, and chunk order toward guests mirrors arrival order.
        if self.role.is_host() {
            effects.push(Effect::RelayBinary {
                chunk: chunk.clone(),
                except: from.clone(),
            });
        }

        match self.transfers.append(from, chunk) {
            Some(progress) => {
                effects.push(Effect::Emit(SessionEvent::TransferProgress {
                    file_id: progress.file_id,
                    received: progress.received,
                    total: progress.total,
                }));
            }
            None => {
                warn!(peer = %from.short(), "Binary chunk with no open transfer dropped");
            }
        }

        effects
    }

    /// Compose a locally authored text message: echo it immediately, then
    /// fan out (host) or send to the host (guest).
    pub fn compose_text(&mut self, content: String, topology: &Topology) -> Vec<Effect> {
        let message = Message::text(content, self.local.display_name.clone());
        self.history.insert(message.clone());

        let mut effects = vec![Effect::Emit(SessionEvent::MessageAdded(message.clone()))];
        let frame = ControlFrame::NewMessage { data: message };

        if self.role.is_host() {
            effects.push(Effect::Broadcast { frame, except: None });
        } else {
            effects.push(Effect::SendTo(topology.host_id().clone(), frame));
        }
        effects
    }

    /// Echo a locally sent file into history before its chunks stream out.
    pub fn compose_file(&mut self, file_id: Uuid, metadata: &FileMetadata) -> Vec<Effect> {
        let message = self.materialize_file(file_id, metadata, &self.local.display_name.clone());
        self.history.insert(message.clone());
        vec![Effect::Emit(SessionEvent::MessageAdded(message))]
    }

    /// Frames sent to a peer the moment its transport opens.
    pub fn connect_frames(&self) -> Vec<ControlFrame> {
        let mut frames = vec![ControlFrame::Join {
            display_name: self.local.display_name.clone(),
        }];
        if self.role.is_host() {
            frames.push(ControlFrame::SyncHistory {
                history: self.history.text_snapshot(),
            });
        }
        frames
    }

    /// A peer's transport closed: discard its partial transfers and, on the
    /// host, push the shrunken roster to the remaining guests.
    pub fn peer_departed(&mut self, gone: &DeviceId, topology: &Topology) -> Vec<Effect> {
        self.transfers.drop_peer(gone);

        let mut effects = Vec::new();
        if self.role.is_host() {
            let names = self.full_roster(topology);
            effects.push(Effect::Broadcast {
                frame: ControlFrame::PeerList {
                    names: names.clone(),
                },
                except: None,
            });
            effects.push(Effect::Emit(SessionEvent::RosterUpdated(names)));
        }
        effects
    }

    /// Guest roster as the host sees it, with the host's own name first.
    fn full_roster(&self, topology: &Topology) -> Vec<String> {
        let mut names = vec![self.local.display_name.clone()];
        names.extend(topology.roster_names());
        names
    }

    fn materialize_file(&self, file_id: Uuid, metadata: &FileMetadata, sender: &str) -> Message {
        Message::file(file_id, format!("file:{file_id}"), sender, metadata)
    }
}
