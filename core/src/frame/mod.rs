//! Link framing
//!
//! Wire layout of one frame:
//!
//! ```text
//! +------+-----+-------+-----------------+--------+--------+------+
//! | 0x7E | LEN | PLANE | stuffed payload | CRC_HI | CRC_LO | 0x7E |
//! +------+-----+-------+-----------------+--------+--------+------+
//! ```
//!
//! `LEN` counts stuffed payload bytes (1..=124). The CRC covers `LEN`,
//! `PLANE` and the stuffed payload.

mod deframer;
mod message;
mod plane;

pub use deframer::{DeframeResult, DeframeState, Deframer, ReceivedMessage};
pub use message::{frame_message, MessageStructure};
pub use plane::{CommsPlane, PlaneAddress, SignalPlane};

/// Start-of-message token
pub const SOM: u8 = 0x7E;

/// End-of-message token (same value as the start token)
pub const EOM: u8 = 0x7E;

/// Escape byte preceding a payload `0x7E`
pub const ESCAPE: u8 = 0x1B;

/// Largest payload before stuffing
pub const MAX_PAYLOAD: usize = 62;

/// Largest payload after stuffing
pub const MAX_STUFFED_PAYLOAD: usize = 2 * MAX_PAYLOAD;

/// Largest wire frame: start, length, plane, payload, two CRC bytes, end
pub const MAX_FRAME_LENGTH: usize = MAX_STUFFED_PAYLOAD + 6;
