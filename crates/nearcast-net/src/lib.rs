//! Session negotiation, star-topology relay, and file transfer for
//! Nearcast rooms.

pub mod history;
pub mod link;
pub mod mailbox;
pub mod memory;
pub mod negotiation;
pub mod router;
pub mod session;
pub mod signals;
pub mod topology;
pub mod transfer;

pub use link::{Connector, Frame, LinkCommand, LinkEvent, LinkHandle, LinkRole, LinkState};
pub use mailbox::{HttpMailbox, Mailbox, MailboxError};
pub use memory::{MemoryConnector, MemoryMailbox};
pub use session::{spawn_session, SessionCommand, SessionConfig, SessionEvent, SessionHandle};
pub use signals::SignalChannel;
