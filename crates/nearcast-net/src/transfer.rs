//! File chunking, flow control and reassembly.
//!
//! Sending: FILE_START, then the bytes as fixed-size binary frames, then
//! FILE_END, all on one ordered transport. Before each chunk the sender
//! checks the transport's buffered byte count and suspends until it drains
//! below the low watermark.
//!
//! Receiving: binary frames carry no header; each chunk is attributed to
//! the most recently opened transfer *from its sending peer*. One peer must
//! therefore not run two transfers concurrently: the table keeps later
//! FILE_STARTs from corrupting an earlier stream from a different peer, but
//! cannot disambiguate two overlapping streams from the same peer.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tracing::{debug, trace};
use uuid::Uuid;

use nearcast_shared::constants::{BUFFERED_LOW_WATERMARK, CHUNK_SIZE};
use nearcast_shared::protocol::{ControlFrame, FileMetadata};
use nearcast_shared::types::DeviceId;

use crate::link::{Frame, LinkHandle};

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("peer link closed mid-transfer")]
    LinkClosed,
}

/// Number of binary frames a file of `size` bytes occupies.
pub fn chunk_count(size: u64) -> u64 {
    size.div_ceil(CHUNK_SIZE as u64)
}

/// An in-flight inbound transfer: ordered chunks between a FILE_START and
/// its matching FILE_END.
#[derive(Debug)]
pub struct InboundTransfer {
    pub file_id: Uuid,
    pub metadata: FileMetadata,
    pub sender_name: String,
    chunks: Vec<Bytes>,
    pub received: u64,
}

impl InboundTransfer {
    fn new(file_id: Uuid, metadata: FileMetadata, sender_name: String) -> Self {
        Self {
            file_id,
            metadata,
            sender_name,
            chunks: Vec::new(),
            received: 0,
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Concatenate the chunks in receipt order into one immutable buffer.
    pub fn into_bytes(self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.received as usize);
        for chunk in &self.chunks {
            buf.extend_from_slice(chunk);
        }
        buf.freeze()
    }
}

/// Progress report produced when a chunk lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkProgress {
    pub file_id: Uuid,
    pub received: u64,
    pub total: u64,
}

/// Open inbound transfers, keyed by sending peer.
#[derive(Default)]
pub struct TransferTable {
    open: HashMap<DeviceId, Vec<InboundTransfer>>,
}

impl TransferTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a transfer announced by a FILE_START from `from`.
    pub fn start(
        &mut self,
        from: &DeviceId,
        file_id: Uuid,
        metadata: FileMetadata,
        sender_name: String,
    ) {
        debug!(
            peer = %from.short(),
            file_id = %file_id,
            name = %metadata.name,
            size = metadata.size,
            "Opened inbound transfer"
        );
        self.open
            .entry(from.clone())
            .or_default()
            .push(InboundTransfer::new(file_id, metadata, sender_name));
    }

    /// Append a binary frame to the most recently opened transfer from
    /// `from`. Returns None if that peer has no open transfer (the chunk is
    /// dropped).
    pub fn append(&mut self, from: &DeviceId, chunk: Bytes) -> Option<ChunkProgress> {
        let transfer = self.open.get_mut(from)?.last_mut()?;
        transfer.received += chunk.len() as u64;
        transfer.chunks.push(chunk);
        trace!(
            peer = %from.short(),
            file_id = %transfer.file_id,
            received = transfer.received,
            "Chunk appended"
        );
        Some(ChunkProgress {
            file_id: transfer.file_id,
            received: transfer.received,
            total: transfer.metadata.size,
        })
    }

    /// Close the transfer named by a FILE_END. Returns None when no such
    /// transfer is open (already completed or never started; not an error).
    pub fn finish(&mut self, from: &DeviceId, file_id: Uuid) -> Option<InboundTransfer> {
        let transfers = self.open.get_mut(from)?;
        let idx = transfers.iter().position(|t| t.file_id == file_id)?;
        let transfer = transfers.remove(idx);
        if transfers.is_empty() {
            self.open.remove(from);
        }
        debug!(
            peer = %from.short(),
            file_id = %file_id,
            bytes = transfer.received,
            chunks = transfer.chunk_count(),
            "Inbound transfer complete"
        );
        Some(transfer)
    }

    /// Discard every open transfer from a departed peer.
    pub fn drop_peer(&mut self, from: &DeviceId) {
        if let Some(transfers) = self.open.remove(from) {
            debug!(
                peer = %from.short(),
                dropped = transfers.len(),
                "Dropped open transfers for departed peer"
            );
        }
    }

    pub fn open_count(&self) -> usize {
        self.open.values().map(Vec::len).sum()
    }
}

/// Stream one file to one peer link: FILE_START, chunks, FILE_END.
///
/// Suspends before each chunk while the link's buffered byte count is above
/// `BUFFERED_LOW_WATERMARK`, resuming when the watch reports it drained.
/// Chunk order is preserved by the ordered transport.
pub async fn send_file(
    link: LinkHandle,
    file_id: Uuid,
    metadata: FileMetadata,
    display_name: String,
    data: Bytes,
) -> Result<(), TransferError> {
    let start = ControlFrame::FileStart {
        file_id,
        metadata,
        display_name,
    };
    if !link.send_frame(Frame::Control(start)) {
        return Err(TransferError::LinkClosed);
    }

    let mut buffered = link.buffered.clone();
    let mut offset = 0usize;
    while offset < data.len() {
        if *buffered.borrow() > BUFFERED_LOW_WATERMARK {
            buffered
                .wait_for(|b| *b <= BUFFERED_LOW_WATERMARK)
                .await
                .map_err(|_| TransferError::LinkClosed)?;
        }

        let end = (offset + CHUNK_SIZE).min(data.len());
        if !link.send_frame(Frame::Binary(data.slice(offset..end))) {
            return Err(TransferError::LinkClosed);
        }
        offset = end;
    }

    if !link.send_frame(Frame::Control(ControlFrame::FileEnd { file_id })) {
        return Err(TransferError::LinkClosed);
    }

    debug!(file_id = %file_id, bytes = data.len(), "File streamed to peer");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::{mpsc, watch};

    fn test_link() -> (
        LinkHandle,
        mpsc::UnboundedReceiver<crate::link::LinkCommand>,
        watch::Sender<usize>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (buf_tx, buf_rx) = watch::channel(0usize);
        (
            LinkHandle {
                commands: tx,
                buffered: buf_rx,
            },
            rx,
            buf_tx,
        )
    }

    fn meta(size: u64) -> FileMetadata {
        FileMetadata {
            name: "blob.bin".into(),
            size,
            mime_type: "application/octet-stream".into(),
        }
    }

    fn pattern(len: usize) -> Bytes {
        (0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
    }

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(0), 0);
        assert_eq!(chunk_count(1), 1);
        assert_eq!(chunk_count(CHUNK_SIZE as u64), 1);
        assert_eq!(chunk_count(CHUNK_SIZE as u64 + 1), 2);
        assert_eq!(chunk_count(3 * CHUNK_SIZE as u64 + 1), 4);
    }

    #[test]
    fn test_reassembly_is_byte_identical() {
        let peer = DeviceId::from("dev-sender01");
        let data = pattern(3 * CHUNK_SIZE + 1);
        let file_id = Uuid::new_v4();
        let mut table = TransferTable::new();

        table.start(&peer, file_id, meta(data.len() as u64), "phone".into());
        for i in 0..chunk_count(data.len() as u64) as usize {
            let start = i * CHUNK_SIZE;
            let end = (start + CHUNK_SIZE).min(data.len());
            let progress = table.append(&peer, data.slice(start..end)).unwrap();
            assert_eq!(progress.file_id, file_id);
            assert_eq!(progress.received, end as u64);
        }

        let transfer = table.finish(&peer, file_id).unwrap();
        assert_eq!(transfer.chunk_count(), 4);
        assert_eq!(transfer.into_bytes(), data);
    }

    #[test]
    fn test_chunks_attributed_per_peer() {
        let alice = DeviceId::from("dev-alice001");
        let bob = DeviceId::from("dev-bob00001");
        let id_a = Uuid::new_v4();
        let id_b = Uuid::new_v4();
        let mut table = TransferTable::new();

        table.start(&alice, id_a, meta(2), "alice".into());
        table.start(&bob, id_b, meta(2), "bob".into());

        // Interleaved arrivals must not cross streams.
        table.append(&alice, Bytes::from_static(b"a1"));
        table.append(&bob, Bytes::from_static(b"b1"));

        assert_eq!(table.finish(&alice, id_a).unwrap().into_bytes(), "a1");
        assert_eq!(table.finish(&bob, id_b).unwrap().into_bytes(), "b1");
    }

    #[test]
    fn test_finish_without_open_transfer_is_ignored() {
        let peer = DeviceId::from("dev-sender01");
        let mut table = TransferTable::new();
        assert!(table.finish(&peer, Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_chunk_without_open_transfer_is_dropped() {
        let peer = DeviceId::from("dev-sender01");
        let mut table = TransferTable::new();
        assert!(table.append(&peer, Bytes::from_static(b"xx")).is_none());
    }

    #[test]
    fn test_drop_peer_discards_partial_transfers() {
        let peer = DeviceId::from("dev-sender01");
        let file_id = Uuid::new_v4();
        let mut table = TransferTable::new();

        table.start(&peer, file_id, meta(100), "phone".into());
        table.append(&peer, Bytes::from_static(b"partial"));
        table.drop_peer(&peer);

        assert_eq!(table.open_count(), 0);
        assert!(table.finish(&peer, file_id).is_none());
    }

    fn sent_frames(
        rx: &mut mpsc::UnboundedReceiver<crate::link::LinkCommand>,
    ) -> (usize, usize, usize) {
        let (mut controls, mut binaries, mut bytes) = (0, 0, 0);
        while let Ok(cmd) = rx.try_recv() {
            match cmd {
                crate::link::LinkCommand::Send(Frame::Control(_)) => controls += 1,
                crate::link::LinkCommand::Send(Frame::Binary(b)) => {
                    binaries += 1;
                    bytes += b.len();
                }
                other => panic!("unexpected command {other:?}"),
            }
        }
        (controls, binaries, bytes)
    }

    #[tokio::test]
    async fn test_send_file_chunks_and_frames() {
        let (link, mut rx, _buf) = test_link();
        let data = pattern(3 * CHUNK_SIZE + 1);

        send_file(
            link,
            Uuid::new_v4(),
            meta(data.len() as u64),
            "phone".into(),
            data.clone(),
        )
        .await
        .unwrap();

        let (controls, binaries, bytes) = sent_frames(&mut rx);
        assert_eq!(controls, 2); // FILE_START + FILE_END
        assert_eq!(binaries, 4);
        assert_eq!(bytes, data.len());
    }

    #[tokio::test]
    async fn test_backpressure_suspends_until_drain() {
        let (link, mut rx, buf) = test_link();
        let data = pattern(2 * CHUNK_SIZE);

        // Transport already above the watermark before the first chunk.
        buf.send(BUFFERED_LOW_WATERMARK + 1).unwrap();

        let task = tokio::spawn(send_file(
            link,
            Uuid::new_v4(),
            meta(data.len() as u64),
            "phone".into(),
            data.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let (controls, binaries, _) = sent_frames(&mut rx);
        assert_eq!(controls, 1, "only FILE_START may precede the drain");
        assert_eq!(binaries, 0, "no chunk before the drain signal");

        // Drain: sending resumes and completes with no loss or duplication.
        buf.send(0).unwrap();
        task.await.unwrap().unwrap();

        let (controls, binaries, bytes) = sent_frames(&mut rx);
        assert_eq!(controls, 1); // FILE_END
        assert_eq!(binaries, 2);
        assert_eq!(bytes, data.len());
    }

    #[tokio::test]
    async fn test_send_file_errors_when_link_gone() {
        let (link, rx, _buf) = test_link();
        drop(rx);

        let result = send_file(
            link,
            Uuid::new_v4(),
            meta(4),
            "phone".into(),
            Bytes::from_static(b"data"),
        )
        .await;

        assert!(matches!(result, Err(TransferError::LinkClosed)));
    }
}
