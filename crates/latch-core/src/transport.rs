// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The `uatcp` transport message layer.
//!
//! Every message on an OPC UA TCP connection starts with an 8-byte header:
//! a 32-bit word carrying the 3-byte ASCII message type plus a 1-byte ASCII
//! chunk type, followed by the total message size (header included) as a
//! little-endian `u32`. The connection-establishment messages (HEL, ACK,
//! ERR) carry plain binary bodies; OPN/MSG/CLO bodies belong to the secure
//! conversation layer in `latch-client`.
//!
//! Encoding always writes the body first and patches the header afterwards,
//! once the final size is known.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::encoding::{BinaryDecodable, BinaryEncodable, EncodingError, EncodingResult};
use crate::status::StatusCode;

/// Size of the message header in bytes.
pub const MESSAGE_HEADER_SIZE: usize = 8;

/// Minimum receive buffer size a server must accept (and the smallest
/// buffer the handshake will request).
pub const MIN_MESSAGE_SIZE: u32 = 8192;

/// The uatcp protocol version sent in the HEL message.
pub const PROTOCOL_VERSION: u32 = 0;

const MESSAGE_TYPE_MASK: u32 = 0x00FF_FFFF;

// =============================================================================
// MessageType
// =============================================================================

/// The 3-byte ASCII message type of a uatcp frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Client hello.
    Hel,
    /// Server acknowledge.
    Ack,
    /// Transport-level error.
    Err,
    /// OpenSecureChannel (asymmetrically protected).
    Opn,
    /// Symmetric service message.
    Msg,
    /// CloseSecureChannel.
    Clo,
}

impl MessageType {
    /// Returns the low 24 bits of the header word for this message type.
    pub const fn code(&self) -> u32 {
        match self {
            Self::Hel => ascii3(b"HEL"),
            Self::Ack => ascii3(b"ACK"),
            Self::Err => ascii3(b"ERR"),
            Self::Opn => ascii3(b"OPN"),
            Self::Msg => ascii3(b"MSG"),
            Self::Clo => ascii3(b"CLO"),
        }
    }

    /// Parses the low 24 bits of a header word.
    pub fn from_code(code: u32) -> Option<Self> {
        match code & MESSAGE_TYPE_MASK {
            c if c == ascii3(b"HEL") => Some(Self::Hel),
            c if c == ascii3(b"ACK") => Some(Self::Ack),
            c if c == ascii3(b"ERR") => Some(Self::Err),
            c if c == ascii3(b"OPN") => Some(Self::Opn),
            c if c == ascii3(b"MSG") => Some(Self::Msg),
            c if c == ascii3(b"CLO") => Some(Self::Clo),
            _ => None,
        }
    }
}

const fn ascii3(b: &[u8; 3]) -> u32 {
    b[0] as u32 | (b[1] as u32) << 8 | (b[2] as u32) << 16
}

// =============================================================================
// ChunkType
// =============================================================================

/// The 1-byte ASCII chunk type in the high byte of the header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    /// Final (or only) chunk of a message.
    Final,
    /// Intermediate chunk.
    Intermediate,
    /// The sender aborts the chunked message.
    Abort,
}

impl ChunkType {
    /// Returns the high byte of the header word for this chunk type.
    pub const fn code(&self) -> u32 {
        match self {
            Self::Final => (b'F' as u32) << 24,
            Self::Intermediate => (b'C' as u32) << 24,
            Self::Abort => (b'A' as u32) << 24,
        }
    }

    /// Parses the high byte of a header word.
    pub fn from_code(code: u32) -> Option<Self> {
        match (code >> 24) as u8 {
            b'F' => Some(Self::Final),
            b'C' => Some(Self::Intermediate),
            b'A' => Some(Self::Abort),
            _ => None,
        }
    }
}

// =============================================================================
// TcpMessageHeader
// =============================================================================

/// The 8-byte header that starts every uatcp frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpMessageHeader {
    /// Message type of the frame.
    pub message_type: MessageType,
    /// Chunk type of the frame.
    pub chunk_type: ChunkType,
    /// Total frame size in bytes, header included.
    pub message_size: u32,
}

impl TcpMessageHeader {
    /// Creates a final-chunk header.
    pub fn new(message_type: MessageType, message_size: u32) -> Self {
        Self {
            message_type,
            chunk_type: ChunkType::Final,
            message_size,
        }
    }

    /// Patches a header into the first 8 bytes of an already-encoded frame.
    ///
    /// The frame must have been started with 8 reserved bytes; `message_size`
    /// is taken from the current frame length.
    pub fn finish(message_type: MessageType, chunk_type: ChunkType, frame: &mut BytesMut) {
        debug_assert!(frame.len() >= MESSAGE_HEADER_SIZE);
        let word = message_type.code() | chunk_type.code();
        let size = frame.len() as u32;
        frame[0..4].copy_from_slice(&word.to_le_bytes());
        frame[4..8].copy_from_slice(&size.to_le_bytes());
    }

    /// Reserves space for the header at the start of a fresh frame.
    pub fn reserve(frame: &mut BytesMut) {
        frame.put_bytes(0, MESSAGE_HEADER_SIZE);
    }
}

impl BinaryEncodable for TcpMessageHeader {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        buf.put_u32_le(self.message_type.code() | self.chunk_type.code());
        buf.put_u32_le(self.message_size);
        Ok(())
    }
}

impl BinaryDecodable for TcpMessageHeader {
    fn decode(buf: &mut dyn Buf) -> EncodingResult<Self> {
        let word = u32::decode(buf)?;
        let message_size = u32::decode(buf)?;
        let message_type = MessageType::from_code(word).ok_or(EncodingError::InvalidValue {
            field: "messageType",
            value: i64::from(word & MESSAGE_TYPE_MASK),
        })?;
        let chunk_type = ChunkType::from_code(word).ok_or(EncodingError::InvalidValue {
            field: "chunkType",
            value: i64::from(word >> 24),
        })?;
        Ok(Self {
            message_type,
            chunk_type,
            message_size,
        })
    }
}

// =============================================================================
// HelloMessage
// =============================================================================

/// Body of the client HEL message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloMessage {
    /// uatcp protocol version; always zero today.
    pub protocol_version: u32,
    /// Largest frame the client is willing to receive.
    pub receive_buffer_size: u32,
    /// Largest frame the client will send.
    pub send_buffer_size: u32,
    /// Largest assembled message the client accepts; zero is unbounded.
    pub max_message_size: u32,
    /// Largest chunk count the client accepts; zero is unbounded.
    pub max_chunk_count: u32,
    /// The endpoint url the client is connecting to.
    pub endpoint_url: String,
}

impl BinaryEncodable for HelloMessage {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        self.protocol_version.encode(buf)?;
        self.receive_buffer_size.encode(buf)?;
        self.send_buffer_size.encode(buf)?;
        self.max_message_size.encode(buf)?;
        self.max_chunk_count.encode(buf)?;
        self.endpoint_url.encode(buf)
    }
}

impl BinaryDecodable for HelloMessage {
    fn decode(buf: &mut dyn Buf) -> EncodingResult<Self> {
        Ok(Self {
            protocol_version: u32::decode(buf)?,
            receive_buffer_size: u32::decode(buf)?,
            send_buffer_size: u32::decode(buf)?,
            max_message_size: u32::decode(buf)?,
            max_chunk_count: u32::decode(buf)?,
            endpoint_url: String::decode(buf)?,
        })
    }
}

// =============================================================================
// AcknowledgeMessage
// =============================================================================

/// Body of the server ACK message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcknowledgeMessage {
    /// Protocol version the server selected.
    pub protocol_version: u32,
    /// Largest frame the server is willing to receive.
    pub receive_buffer_size: u32,
    /// Largest frame the server will send.
    pub send_buffer_size: u32,
    /// Largest assembled message the server accepts; zero is unbounded.
    pub max_message_size: u32,
    /// Largest chunk count the server accepts; zero is unbounded.
    pub max_chunk_count: u32,
}

impl BinaryEncodable for AcknowledgeMessage {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        self.protocol_version.encode(buf)?;
        self.receive_buffer_size.encode(buf)?;
        self.send_buffer_size.encode(buf)?;
        self.max_message_size.encode(buf)?;
        self.max_chunk_count.encode(buf)
    }
}

impl BinaryDecodable for AcknowledgeMessage {
    fn decode(buf: &mut dyn Buf) -> EncodingResult<Self> {
        Ok(Self {
            protocol_version: u32::decode(buf)?,
            receive_buffer_size: u32::decode(buf)?,
            send_buffer_size: u32::decode(buf)?,
            max_message_size: u32::decode(buf)?,
            max_chunk_count: u32::decode(buf)?,
        })
    }
}

// =============================================================================
// ErrorMessage
// =============================================================================

/// Body of the transport-level ERR message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// The status code reported by the peer.
    pub error: StatusCode,
    /// Human-readable reason, possibly empty.
    pub reason: String,
}

impl BinaryEncodable for ErrorMessage {
    fn encode(&self, buf: &mut BytesMut) -> EncodingResult<()> {
        self.error.0.encode(buf)?;
        self.reason.encode(buf)
    }
}

impl BinaryDecodable for ErrorMessage {
    fn decode(buf: &mut dyn Buf) -> EncodingResult<Self> {
        Ok(Self {
            error: StatusCode(u32::decode(buf)?),
            reason: String::decode(buf)?,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_ascii() {
        // 'H' 'E' 'L' little-endian in the low 24 bits.
        assert_eq!(MessageType::Hel.code(), 0x004C_4548);
        assert_eq!(MessageType::from_code(0x004C_4548), Some(MessageType::Hel));
        assert_eq!(MessageType::from_code(0x0000_0000), None);

        for mt in [
            MessageType::Hel,
            MessageType::Ack,
            MessageType::Err,
            MessageType::Opn,
            MessageType::Msg,
            MessageType::Clo,
        ] {
            assert_eq!(MessageType::from_code(mt.code()), Some(mt));
        }
    }

    #[test]
    fn test_chunk_type_high_byte() {
        assert_eq!(ChunkType::Final.code(), 0x4600_0000);
        assert_eq!(ChunkType::from_code(0x4600_0000), Some(ChunkType::Final));
        assert_eq!(ChunkType::from_code(0x4300_0000), Some(ChunkType::Intermediate));
        assert_eq!(ChunkType::from_code(0x4100_0000), Some(ChunkType::Abort));
        assert_eq!(ChunkType::from_code(0x5800_0000), None);
    }

    #[test]
    fn test_header_roundtrip() {
        let header = TcpMessageHeader::new(MessageType::Ack, 28);
        let mut buf = BytesMut::new();
        header.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), MESSAGE_HEADER_SIZE);

        let mut read = buf.freeze();
        let decoded = TcpMessageHeader::decode(&mut read).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_header_patched_last() {
        let mut frame = BytesMut::new();
        TcpMessageHeader::reserve(&mut frame);
        let hello = HelloMessage {
            protocol_version: PROTOCOL_VERSION,
            receive_buffer_size: MIN_MESSAGE_SIZE,
            send_buffer_size: MIN_MESSAGE_SIZE,
            max_message_size: 0,
            max_chunk_count: 0,
            endpoint_url: "opc.tcp://plc:4840".to_string(),
        };
        hello.encode(&mut frame).unwrap();
        TcpMessageHeader::finish(MessageType::Hel, ChunkType::Final, &mut frame);

        // messageSize equals the total number of bytes written.
        let mut read = frame.freeze();
        let total = read.len();
        let header = TcpMessageHeader::decode(&mut read).unwrap();
        assert_eq!(header.message_type, MessageType::Hel);
        assert_eq!(header.chunk_type, ChunkType::Final);
        assert_eq!(header.message_size as usize, total);

        let decoded = HelloMessage::decode(&mut read).unwrap();
        assert_eq!(decoded, hello);
    }

    #[test]
    fn test_hello_roundtrip_identity() {
        let hello = HelloMessage {
            protocol_version: 0,
            receive_buffer_size: 65_535,
            send_buffer_size: 32_768,
            max_message_size: 1 << 20,
            max_chunk_count: 16,
            endpoint_url: "opc.tcp://192.168.0.10:4840/plc".to_string(),
        };
        let mut buf = BytesMut::new();
        hello.encode(&mut buf).unwrap();
        let mut read = buf.freeze();
        assert_eq!(HelloMessage::decode(&mut read).unwrap(), hello);
        assert_eq!(read.len(), 0);
    }

    #[test]
    fn test_acknowledge_roundtrip() {
        let ack = AcknowledgeMessage {
            protocol_version: 0,
            receive_buffer_size: 16_384,
            send_buffer_size: 16_384,
            max_message_size: 0,
            max_chunk_count: 0,
        };
        let mut buf = BytesMut::new();
        ack.encode(&mut buf).unwrap();
        let mut read = buf.freeze();
        assert_eq!(AcknowledgeMessage::decode(&mut read).unwrap(), ack);
    }

    #[test]
    fn test_error_message_roundtrip() {
        let err = ErrorMessage {
            error: StatusCode::BAD_TCP_MESSAGE_TOO_LARGE,
            reason: "receive buffer below minimum".to_string(),
        };
        let mut buf = BytesMut::new();
        err.encode(&mut buf).unwrap();
        let mut read = buf.freeze();
        assert_eq!(ErrorMessage::decode(&mut read).unwrap(), err);
    }
}
