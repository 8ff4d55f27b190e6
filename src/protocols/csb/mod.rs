//! CSB1 framed request/response protocol.
//!
//! A fixed binary header followed by a length-prefixed payload. Every
//! exchange is one request frame from the client and one response frame
//! from the server; the connection stays open between exchanges until one
//! side closes it.
//!
//! ## Protocol Format
//!
//! ```text
//! offset  size  field         encoding
//! 0       4     magic         u32 BE, 0x43534231 ("CSB1")
//! 4       2     message type  u16 BE
//! 6       2     flags         u16 BE, always 0
//! 8       4     length        u32 BE, payload byte count
//! 12      N     payload       raw bytes, N == length
//!
//! Example (echo "hello"):
//! Request:  43 53 42 31 | 00 14 | 00 00 | 00 00 00 05 | hello
//! Response: 43 53 42 31 | 00 15 | 00 00 | 00 00 00 05 | hello
//! ```
//!
//! ## Message Types
//!
//! | type | value | direction |
//! |------|-------|-----------|
//! | PING | 1 | client → server |
//! | PING_RESPONSE | 2 | server → client |
//! | SYSINFO | 10 | client → server |
//! | SYSINFO_RESPONSE | 11 | server → client |
//! | ECHO | 20 | client → server |
//! | ECHO_RESPONSE | 21 | server → client |
//! | ERROR | 255 | server → client |
//!
//! ## Boundary Detection
//!
//! Reads are exact: a response is either complete, or the reader reports
//! whether the peer closed before sending anything (`CleanEof`), closed
//! part-way through a frame (`TruncatedEof`), or went silent past the
//! deadline (`Timeout`). Only the first is a graceful end of session.

pub mod frame;
pub mod reader;

pub use frame::{encode, Frame, FrameError, Header, MessageType, HEADER_LEN, MAGIC};
pub use reader::{read_exact, ReadStatus};
