//! WebSocket frame model
//!
//! A [`Frame`] is one logical message as the codec sees it: on the read
//! path it accumulates fragments until FIN, on the write path it is the
//! whole outgoing payload that the fragmenter cuts into wire chunks.

use bytes::{Bytes, BytesMut};

use crate::error::{CloseReason, Error, Result};

/// WebSocket opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Continuation frame
    Continuation = 0x0,
    /// Text frame
    Text = 0x1,
    /// Binary frame
    Binary = 0x2,
    /// Connection close
    Close = 0x8,
    /// Ping
    Ping = 0x9,
    /// Pong
    Pong = 0xA,
}

impl OpCode {
    /// Parse opcode from the low nibble of a header byte
    #[inline]
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    /// Check if this is a control frame
    #[inline]
    pub fn is_control(&self) -> bool {
        (*self as u8) >= 0x8
    }
}

/// Which peer a frame is sent by; decides masking on the write path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRole {
    /// Sent by a client; always masked
    ClientSend,
    /// Sent by a server; never masked
    ServerSend,
}

impl SendRole {
    /// Whether frames sent in this role carry a masking key
    #[inline]
    pub fn masks(&self) -> bool {
        matches!(self, SendRole::ClientSend)
    }
}

/// A decoded WebSocket frame header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment flag
    pub fin: bool,
    /// RSV1 (reserved for compression)
    pub rsv1: bool,
    /// Frame opcode as it appeared on the wire
    pub opcode: OpCode,
    /// Masking key (if masked)
    pub mask: Option<[u8; 4]>,
    /// Payload length
    pub payload_len: u64,
    /// Header size including extended length and masking key
    pub header_len: usize,
}

impl FrameHeader {
    /// Header plus payload
    #[inline]
    pub fn frame_len(&self) -> u64 {
        self.header_len as u64 + self.payload_len
    }
}

/// One logical WebSocket message, possibly assembled from several fragments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// True if this is the final fragment of the message
    pub fin: bool,
    /// Message type; for continuation fragments this is the opcode of the
    /// message they continue
    pub opcode: OpCode,
    /// Application data, already unmasked
    pub payload: BytesMut,
    /// Masking behavior when this frame is serialized
    pub role: SendRole,
}

impl Frame {
    /// Create a new final frame
    pub fn new(opcode: OpCode, payload: impl AsRef<[u8]>, role: SendRole) -> Self {
        Self {
            fin: true,
            opcode,
            payload: BytesMut::from(payload.as_ref()),
            role,
        }
    }

    /// Create a text frame
    #[inline]
    pub fn text(text: impl AsRef<str>, role: SendRole) -> Self {
        Self::new(OpCode::Text, text.as_ref().as_bytes(), role)
    }

    /// Create a binary frame
    #[inline]
    pub fn binary(data: impl AsRef<[u8]>, role: SendRole) -> Self {
        Self::new(OpCode::Binary, data, role)
    }

    /// Create a payload-less control frame
    #[inline]
    pub fn control(opcode: OpCode, role: SendRole) -> Self {
        Self {
            fin: true,
            opcode,
            payload: BytesMut::new(),
            role,
        }
    }

    /// Check if this is a control frame
    #[inline]
    pub fn is_control(&self) -> bool {
        self.opcode.is_control()
    }

    /// Check if this is the final fragment
    #[inline]
    pub fn is_final(&self) -> bool {
        self.fin
    }

    /// Check if this is a close frame
    #[inline]
    pub fn is_close(&self) -> bool {
        self.opcode == OpCode::Close
    }

    /// Get the payload as a string (for text frames)
    pub fn as_text(&self) -> Result<&str> {
        simdutf8::basic::from_utf8(&self.payload).map_err(|_| Error::InvalidUtf8)
    }

    /// Convert a complete frame into the message the application sees.
    ///
    /// Close payloads are not kept on the frame; `close` is the reason the
    /// reader recorded for this connection.
    pub fn into_message(self, close: Option<CloseReason>) -> Result<Message> {
        if !self.fin {
            return Err(Error::InvalidState("message is still fragmented"));
        }

        match self.opcode {
            OpCode::Text => {
                if simdutf8::basic::from_utf8(&self.payload).is_err() {
                    return Err(Error::InvalidUtf8);
                }
                Ok(Message::Text(self.payload.freeze()))
            }
            OpCode::Binary => Ok(Message::Binary(self.payload.freeze())),
            OpCode::Ping => Ok(Message::Ping(self.payload.freeze())),
            OpCode::Pong => Ok(Message::Pong(self.payload.freeze())),
            OpCode::Close => Ok(Message::Close(close)),
            OpCode::Continuation => Err(Error::Protocol("unresolved continuation frame")),
        }
    }
}

/// WebSocket message (complete, possibly assembled from fragments)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Text message (UTF-8 validated)
    Text(Bytes),
    /// Binary message
    Binary(Bytes),
    /// Ping message
    Ping(Bytes),
    /// Pong message
    Pong(Bytes),
    /// Close message
    Close(Option<CloseReason>),
}

impl Message {
    /// Check if this is a close message
    #[inline]
    pub fn is_close(&self) -> bool {
        matches!(self, Message::Close(_))
    }

    /// Check if this is a control message
    #[inline]
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Message::Ping(_) | Message::Pong(_) | Message::Close(_)
        )
    }

    /// Get message as text (returns None for non-text messages)
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Get message as bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Message::Text(b) | Message::Binary(b) | Message::Ping(b) | Message::Pong(b) => b,
            Message::Close(_) => &[],
        }
    }
}
