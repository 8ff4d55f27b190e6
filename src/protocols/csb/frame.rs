//! CSB1 frame encoding and decoding.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Protocol identifier carried in every header ("CSB1").
pub const MAGIC: u32 = 0x4353_4231;

/// Header size in bytes (fixed, exactly 12).
pub const HEADER_LEN: usize = 12;

/// Default cap on an accepted payload length (32 MiB).
pub const DEFAULT_MAX_PAYLOAD: u32 = 32 * 1024 * 1024;

/// Message type tag.
///
/// Unrecognized tags decode to `Unknown` rather than failing: only the magic
/// invalidates a frame outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Ping,
    PingResponse,
    Sysinfo,
    SysinfoResponse,
    Echo,
    EchoResponse,
    Error,
    Unknown(u16),
}

impl MessageType {
    /// Wire value of this type.
    pub fn as_u16(self) -> u16 {
        match self {
            MessageType::Ping => 1,
            MessageType::PingResponse => 2,
            MessageType::Sysinfo => 10,
            MessageType::SysinfoResponse => 11,
            MessageType::Echo => 20,
            MessageType::EchoResponse => 21,
            MessageType::Error => 255,
            MessageType::Unknown(v) => v,
        }
    }

    /// The response type a server answers this request type with.
    ///
    /// Returns `None` for types that are not requests.
    pub fn response_type(self) -> Option<MessageType> {
        match self {
            MessageType::Ping => Some(MessageType::PingResponse),
            MessageType::Sysinfo => Some(MessageType::SysinfoResponse),
            MessageType::Echo => Some(MessageType::EchoResponse),
            _ => None,
        }
    }
}

impl From<u16> for MessageType {
    fn from(value: u16) -> Self {
        match value {
            1 => MessageType::Ping,
            2 => MessageType::PingResponse,
            10 => MessageType::Sysinfo,
            11 => MessageType::SysinfoResponse,
            20 => MessageType::Echo,
            21 => MessageType::EchoResponse,
            255 => MessageType::Error,
            other => MessageType::Unknown(other),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Ping => write!(f, "PING"),
            MessageType::PingResponse => write!(f, "PING_RESPONSE"),
            MessageType::Sysinfo => write!(f, "SYSINFO"),
            MessageType::SysinfoResponse => write!(f, "SYSINFO_RESPONSE"),
            MessageType::Echo => write!(f, "ECHO"),
            MessageType::EchoResponse => write!(f, "ECHO_RESPONSE"),
            MessageType::Error => write!(f, "ERROR"),
            MessageType::Unknown(v) => write!(f, "UNKNOWN({v})"),
        }
    }
}

/// Frame codec errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Header magic is not `MAGIC`.
    BadMagic(u32),
    /// Header announces more payload than the reader accepts.
    Oversized { length: u32, max: u32 },
    /// Payload byte count differs from the header length field.
    LengthMismatch { expected: u32, actual: usize },
    /// Payload does not fit the 32-bit length field.
    PayloadTooLarge(usize),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::BadMagic(found) => {
                write!(f, "bad magic: 0x{found:08x} (expected 0x{MAGIC:08x})")
            }
            FrameError::Oversized { length, max } => {
                write!(f, "payload length {length} exceeds limit {max}")
            }
            FrameError::LengthMismatch { expected, actual } => {
                write!(f, "payload is {actual} bytes, header says {expected}")
            }
            FrameError::PayloadTooLarge(len) => {
                write!(f, "payload of {len} bytes does not fit a 32-bit length")
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub message_type: MessageType,
    pub flags: u16,
    /// Payload length in bytes.
    pub length: u32,
}

impl Header {
    /// Decode a header, validating the magic.
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self, FrameError> {
        let magic = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != MAGIC {
            return Err(FrameError::BadMagic(magic));
        }

        Ok(Header {
            message_type: MessageType::from(u16::from_be_bytes([buf[4], buf[5]])),
            flags: u16::from_be_bytes([buf[6], buf[7]]),
            length: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }

    /// Reject a length above `max` before any payload is read.
    pub fn check_length(&self, max: u32) -> Result<(), FrameError> {
        if self.length > max {
            return Err(FrameError::Oversized {
                length: self.length,
                max,
            });
        }
        Ok(())
    }

    /// Write the header, magic first, into `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u32(MAGIC);
        buf.put_u16(self.message_type.as_u16());
        buf.put_u16(self.flags);
        buf.put_u32(self.length);
    }
}

/// A complete message: type plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_type: MessageType,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(message_type: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            message_type,
            payload: payload.into(),
        }
    }

    /// Encode to wire bytes: header followed by the payload verbatim.
    pub fn encode(&self) -> Result<BytesMut, FrameError> {
        encode(self.message_type, &self.payload)
    }

    /// Decode a frame from its header bytes and the payload pulled after it.
    pub fn decode(header: &[u8; HEADER_LEN], payload: Bytes) -> Result<Self, FrameError> {
        let header = Header::decode(header)?;
        if payload.len() != header.length as usize {
            return Err(FrameError::LengthMismatch {
                expected: header.length,
                actual: payload.len(),
            });
        }
        Ok(Frame {
            message_type: header.message_type,
            payload,
        })
    }
}

/// Encode a frame with flags = 0. Output is exactly `HEADER_LEN + payload.len()` bytes.
pub fn encode(message_type: MessageType, payload: &[u8]) -> Result<BytesMut, FrameError> {
    let length =
        u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge(payload.len()))?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    Header {
        message_type,
        flags: 0,
        length,
    }
    .encode_into(&mut buf);
    buf.put_slice(payload);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(wire: &[u8]) -> ([u8; HEADER_LEN], Bytes) {
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&wire[..HEADER_LEN]);
        (header, Bytes::copy_from_slice(&wire[HEADER_LEN..]))
    }

    #[test]
    fn test_encode_layout() {
        let wire = encode(MessageType::Echo, b"hello").unwrap();
        assert_eq!(
            &wire[..],
            &[
                0x43, 0x53, 0x42, 0x31, // magic
                0x00, 0x14, // type 20
                0x00, 0x00, // flags
                0x00, 0x00, 0x00, 0x05, // length
                b'h', b'e', b'l', b'l', b'o',
            ]
        );
    }

    #[test]
    fn test_encode_empty_payload() {
        let wire = encode(MessageType::Sysinfo, b"").unwrap();
        assert_eq!(wire.len(), HEADER_LEN);
        assert_eq!(&wire[8..12], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_roundtrip() {
        for (ty, payload) in [
            (MessageType::Echo, &b"hello"[..]),
            (MessageType::EchoResponse, &b""[..]),
            (MessageType::Unknown(4242), &[0u8, 255, 13, 10][..]),
        ] {
            let wire = encode(ty, payload).unwrap();
            assert_eq!(wire.len(), HEADER_LEN + payload.len());

            let (header, body) = split(&wire);
            let frame = Frame::decode(&header, body).unwrap();
            assert_eq!(frame, Frame::new(ty, Bytes::copy_from_slice(payload)));
        }
    }

    #[test]
    fn test_bad_magic() {
        let mut wire = encode(MessageType::EchoResponse, b"abc").unwrap();
        wire[0] = b'X';
        let (header, body) = split(&wire);

        assert_eq!(
            Header::decode(&header),
            Err(FrameError::BadMagic(0x5853_4231))
        );
        assert!(matches!(
            Frame::decode(&header, body),
            Err(FrameError::BadMagic(_))
        ));
    }

    #[test]
    fn test_unknown_type_still_decodes() {
        let wire = encode(MessageType::Unknown(7), b"").unwrap();
        let (header, _) = split(&wire);
        let header = Header::decode(&header).unwrap();
        assert_eq!(header.message_type, MessageType::Unknown(7));
        assert_eq!(header.message_type.as_u16(), 7);
    }

    #[test]
    fn test_length_mismatch() {
        let wire = encode(MessageType::EchoResponse, b"abcd").unwrap();
        let (header, _) = split(&wire);
        assert_eq!(
            Frame::decode(&header, Bytes::from_static(b"ab")),
            Err(FrameError::LengthMismatch {
                expected: 4,
                actual: 2
            })
        );
    }

    #[test]
    fn test_check_length() {
        let header = Header {
            message_type: MessageType::EchoResponse,
            flags: 0,
            length: DEFAULT_MAX_PAYLOAD + 1,
        };
        assert!(header.check_length(DEFAULT_MAX_PAYLOAD).is_err());
        assert!(header.check_length(u32::MAX).is_ok());
    }

    #[test]
    fn test_response_type() {
        assert_eq!(
            MessageType::Echo.response_type(),
            Some(MessageType::EchoResponse)
        );
        assert_eq!(
            MessageType::Ping.response_type(),
            Some(MessageType::PingResponse)
        );
        assert_eq!(MessageType::EchoResponse.response_type(), None);
        assert_eq!(MessageType::from(21), MessageType::EchoResponse);
    }
}
