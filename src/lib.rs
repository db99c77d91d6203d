//! # ws-wire: sans-I/O WebSocket codec
//!
//! An RFC 6455 codec meant to be driven by an external TCP engine. The
//! engine owns sockets, buffers, threads and connection lifecycle; the
//! codec turns bytes into frames and frames into bytes, and runs the
//! opening handshake.
//!
//! One [`Codec`] is shared by every connection of a listener or dial pool.
//! It holds only immutable configuration; everything a connection has to
//! remember between calls lives in a [`ConnectionState`] handle the engine
//! passes in.
//!
//! ## Features
//!
//! - **Resumable parsing**: "need more bytes" is `Ok(None)`, never an error
//! - **Fragmentation**: outgoing messages are cut to a configured frame size
//! - **Role-driven masking**: client frames always masked, server frames never
//! - **Bounded memory**: declared frame and message sizes are checked before
//!   any payload is buffered
//!
//! ## Example
//!
//! ```
//! use bytes::BytesMut;
//! use ws_wire::prelude::*;
//!
//! let client = Codec::new(Config::builder().client().build());
//! let server = Codec::new(Config::builder().server().build());
//! let mut server_conn = SessionState::new();
//!
//! let mut wire = BytesMut::new();
//! client.encode(&client.text("hello"), &mut wire).unwrap();
//!
//! let frame = server.decode(&mut wire, &mut server_conn).unwrap().unwrap();
//! assert_eq!(frame.as_text().unwrap(), "hello");
//! ```

pub mod codec;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod length;
pub mod mask;
pub mod reader;
pub mod state;
pub mod writer;

pub use codec::Codec;
pub use error::{CloseReason, Error, ErrorKind, Result};
pub use frame::{Frame, Message, OpCode, SendRole};
pub use handshake::ServerInfo;
pub use state::{ConnectionState, ConnectionStateExt, Param, SessionState};
pub use writer::FragmentState;

/// Largest payload that fits the 7-bit length field
pub const SMALL_MESSAGE_THRESHOLD: usize = 125;

/// Largest payload that fits the 16-bit extended length field
pub const MEDIUM_MESSAGE_THRESHOLD: usize = 65535;

/// WebSocket GUID for handshake
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Default payload bytes per outgoing chunk
pub const DEFAULT_FRAGMENT_SIZE: usize = 8180;

/// WebSocket endpoint role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// Client (must mask frames)
    #[default]
    Client,
    /// Server (must not mask frames)
    Server,
}

impl Role {
    /// The send role frames composed by this endpoint carry
    #[inline]
    pub fn send_role(&self) -> SendRole {
        match self {
            Role::Client => SendRole::ClientSend,
            Role::Server => SendRole::ServerSend,
        }
    }
}

/// Configuration shared by every connection using a codec
///
/// # Example
///
/// ```
/// use ws_wire::{Config, Role};
///
/// let config = Config::builder()
///     .server()
///     .fragment_size(4096)
///     .max_payload_length(1024 * 1024)
///     .build();
/// assert_eq!(config.role, Role::Server);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Endpoint role (default: Client)
    pub role: Role,
    /// Payload bytes per outgoing chunk (default: 8180)
    pub fragment_size: usize,
    /// Largest declared payload accepted in one inbound frame (default: 16MB)
    pub max_frame_size: usize,
    /// Largest reassembled inbound message (default: 10MB)
    pub max_message_size: usize,
    /// Largest handshake head accepted (default: 8KB)
    pub max_handshake_size: usize,
    /// Subprotocols a client announces (default: none)
    pub protocols: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: Role::Client,
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            max_frame_size: 16 * 1024 * 1024,
            max_message_size: 10 * 1024 * 1024,
            max_handshake_size: 8192,
            protocols: Vec::new(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Builder for codec configuration
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Set the endpoint role
    pub fn role(mut self, role: Role) -> Self {
        self.config.role = role;
        self
    }

    /// Act as a client
    pub fn client(self) -> Self {
        self.role(Role::Client)
    }

    /// Act as a server
    pub fn server(self) -> Self {
        self.role(Role::Server)
    }

    /// Set payload bytes per outgoing chunk
    pub fn fragment_size(mut self, size: usize) -> Self {
        self.config.fragment_size = size;
        self
    }

    /// Set maximum inbound payload/message length
    pub fn max_payload_length(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self.config.max_frame_size = size;
        self
    }

    /// Set maximum message size
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Set maximum frame size
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set maximum handshake head size
    pub fn max_handshake_size(mut self, size: usize) -> Self {
        self.config.max_handshake_size = size;
        self
    }

    /// Announce a subprotocol in the client request
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.config.protocols.push(protocol.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::codec::Codec;
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::frame::{Frame, Message, OpCode, SendRole};
    pub use crate::handshake::ServerInfo;
    pub use crate::state::{ConnectionState, ConnectionStateExt, SessionState};
    pub use crate::{Config, Role};
}
