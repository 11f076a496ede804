/// Application name
pub const APP_NAME: &str = "Nearcast";

/// Number of digits in a room code
pub const ROOM_CODE_LEN: usize = 3;

/// File chunk size in bytes (one binary frame per chunk)
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Transport buffered-amount low watermark in bytes.
/// Chunk sending suspends while the transport reports more than this
/// many bytes queued and resumes once it drains below.
pub const BUFFERED_LOW_WATERMARK: usize = 64 * 1024;

/// Mailbox polling cadence in seconds
pub const POLL_INTERVAL_SECS: u64 = 10;

/// TTL for a deposited signal that is never drained, in seconds
pub const SIGNAL_TTL_SECS: u64 = 300;

/// TTL for the host claim on a room, in seconds. The claim is not renewed.
pub const HOST_TTL_SECS: u64 = 3600;

/// Default HTTP port for the mailbox service
pub const DEFAULT_HTTP_PORT: u16 = 8080;
