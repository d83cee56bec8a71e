//! Feedback channel protocol core.
//! Host-driven: no I/O. The client owns sockets and timers and calls into these types.

pub mod chunk;
pub mod protocol;
pub mod queue;
pub mod reconnect;
pub mod session;
pub mod wire;

pub use chunk::{ChunkError, CompletedFile, Reassembler, MAX_TOTAL_CHUNKS};
pub use protocol::{ChatMessage, FileMessage, HistoryEntry, HistoryKind, Message, UserInfo};
pub use queue::PendingQueue;
pub use reconnect::ReconnectPolicy;
pub use session::{ConnectionState, Session, SessionError, Teardown};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError, MAX_FRAME_LEN};
