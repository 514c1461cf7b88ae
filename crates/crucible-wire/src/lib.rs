//! The length-prefixed framed message protocol between the coordinator and
//! worker processes (spec §6).
//!
//! On the wire, one message is:
//!
//! ```text
//!   4 bytes big-endian length N
//!   N bytes body = "<sender_id>\r\n<cmd>\r\n<arg1>%<arg2>%..."
//! ```
//!
//! Bodies are UTF-8. `%` separates arguments; `\r\n` separates the three
//! fields. There is no escaping: argument values must not themselves
//! contain `%` or `\r\n`, which is checked at encode time rather than left
//! to corrupt the frame silently.

mod message;
mod typed;

pub use message::{read_frame, write_frame, Message, WireError};
pub use typed::{
    ManifestJson, WireMessage, CMD_DONE, CMD_EXECUTE, CMD_EXIT, CMD_REQUEST_MANIFEST,
    CMD_RESPONSE_MANIFEST,
};
