//! Wire-format vocabulary shared by the send path.
//!
//! Frame serialization itself lives in [`codec::Framer`]; this module only
//! holds the values that travel through control messages and flow-control
//! bookkeeping before they ever reach the wire.
//!
//! [`codec::Framer`]: crate::codec::Framer

mod reason;
mod setting;

pub use self::reason::Reason;
pub use self::setting::{Setting, SettingId};

/// A stream identifier (RFC 9113 §5.1.1).
///
/// Zero addresses the connection itself. Odd ids belong to client-initiated
/// streams and even ids to server-initiated ones, which is the parity rule
/// the write loop applies when deciding whether HEADERS answer a peer's
/// stream or originate one of ours. The top bit is reserved; the framer
/// clears it on encode.
pub type StreamId = u32;

pub type FrameSize = u32;

/// Bytes in the fixed prologue of every frame.
pub const HEADER_LEN: usize = 9;

/// The default value of SETTINGS_HEADER_TABLE_SIZE.
pub const DEFAULT_SETTINGS_HEADER_TABLE_SIZE: usize = 4_096;

/// The default value of SETTINGS_INITIAL_WINDOW_SIZE.
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;

/// The default value of MAX_FRAME_SIZE.
pub const DEFAULT_MAX_FRAME_SIZE: FrameSize = 16_384;

/// MAX_FRAME_SIZE upper bound: the payload length field is 24 bits.
pub const MAX_MAX_FRAME_SIZE: FrameSize = (1 << 24) - 1;
