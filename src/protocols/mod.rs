//! Protocol implementations.
//!
//! - `csb`: CSB1 binary framing (12-byte header + length-prefixed payload)

pub mod csb;
