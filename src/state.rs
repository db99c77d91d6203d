//! Per-connection state store
//!
//! One [`Codec`](crate::codec::Codec) serves every connection of a
//! listener or dial pool, so it keeps nothing per connection. The few
//! facts that must survive between calls (handshake progress, a message
//! whose fragments are still arriving, the last close reason) live in a
//! handle the engine owns and passes into every call.
//!
//! The engine can back the handle with its own session object by
//! implementing [`ConnectionState`]; [`SessionState`] is a ready-made map.

use std::collections::HashMap;

use bytes::Bytes;

use crate::frame::Frame;

/// Set once the opening handshake has completed
pub const HANDSHAKE_DONE: &str = "ws.handshake_done";

/// Set while a server's 101 response is built but not yet flushed
pub const RESPONSE_PENDING: &str = "ws.response_pending";

/// Message whose fragments are still arriving
pub const PENDING_FRAGMENT: &str = "ws.pending_fragment";

/// Reason text of the last received close frame
pub const LAST_CLOSE_REASON: &str = "ws.last_close_reason";

/// Status code of the last received close frame
pub const LAST_CLOSE_CODE: &str = "ws.last_close_code";

/// A value stored under a named parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    /// Boolean flag
    Flag(bool),
    /// In-progress frame
    Frame(Frame),
    /// Raw bytes
    Bytes(Bytes),
    /// Status code
    Code(u16),
}

/// Opaque per-connection handle: get/set/remove of named parameters
pub trait ConnectionState {
    /// Look up a parameter
    fn param(&self, key: &str) -> Option<&Param>;

    /// Look up a parameter for in-place mutation
    fn param_mut(&mut self, key: &str) -> Option<&mut Param>;

    /// Store a parameter, replacing any previous value
    fn set_param(&mut self, key: &str, value: Param);

    /// Remove a parameter, returning its value
    fn remove_param(&mut self, key: &str) -> Option<Param>;
}

/// Typed accessors over the raw parameter store
pub trait ConnectionStateExt: ConnectionState {
    /// Whether the opening handshake has completed
    fn handshake_done(&self) -> bool {
        matches!(self.param(HANDSHAKE_DONE), Some(Param::Flag(true)))
    }

    /// Mark the opening handshake complete or not
    fn set_handshake_done(&mut self, done: bool) {
        self.set_param(HANDSHAKE_DONE, Param::Flag(done));
    }

    /// Whether a server response is waiting for its send confirmation
    fn response_pending(&self) -> bool {
        matches!(self.param(RESPONSE_PENDING), Some(Param::Flag(true)))
    }

    /// Record or clear the pending-response marker
    fn set_response_pending(&mut self, pending: bool) {
        if pending {
            self.set_param(RESPONSE_PENDING, Param::Flag(true));
        } else {
            self.remove_param(RESPONSE_PENDING);
        }
    }

    /// The message whose fragments are still arriving
    fn pending_fragment(&self) -> Option<&Frame> {
        match self.param(PENDING_FRAGMENT) {
            Some(Param::Frame(frame)) => Some(frame),
            _ => None,
        }
    }

    /// Mutable access to the in-progress message
    fn pending_fragment_mut(&mut self) -> Option<&mut Frame> {
        match self.param_mut(PENDING_FRAGMENT) {
            Some(Param::Frame(frame)) => Some(frame),
            _ => None,
        }
    }

    /// Remove and return the in-progress message
    fn take_pending_fragment(&mut self) -> Option<Frame> {
        match self.remove_param(PENDING_FRAGMENT) {
            Some(Param::Frame(frame)) => Some(frame),
            _ => None,
        }
    }

    /// Store the in-progress message
    fn set_pending_fragment(&mut self, frame: Frame) {
        self.set_param(PENDING_FRAGMENT, Param::Frame(frame));
    }

    /// Reason text of the last received close frame
    fn last_close_reason(&self) -> Option<&Bytes> {
        match self.param(LAST_CLOSE_REASON) {
            Some(Param::Bytes(reason)) => Some(reason),
            _ => None,
        }
    }

    /// Status code of the last received close frame
    fn last_close_code(&self) -> Option<u16> {
        match self.param(LAST_CLOSE_CODE) {
            Some(Param::Code(code)) => Some(*code),
            _ => None,
        }
    }

    /// Record a received close frame's status code and reason text
    fn set_last_close(&mut self, code: u16, reason: Option<Bytes>) {
        self.set_param(LAST_CLOSE_CODE, Param::Code(code));
        match reason {
            Some(reason) => self.set_param(LAST_CLOSE_REASON, Param::Bytes(reason)),
            None => {
                self.remove_param(LAST_CLOSE_REASON);
            }
        }
    }

    /// Forget any recorded close frame
    fn clear_last_close(&mut self) {
        self.remove_param(LAST_CLOSE_CODE);
        self.remove_param(LAST_CLOSE_REASON);
    }
}

impl<T: ConnectionState + ?Sized> ConnectionStateExt for T {}

/// Map-backed connection state
#[derive(Debug, Default, Clone)]
pub struct SessionState {
    params: HashMap<String, Param>,
}

impl SessionState {
    /// Create an empty state handle
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored parameters
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// True if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl ConnectionState for SessionState {
    fn param(&self, key: &str) -> Option<&Param> {
        self.params.get(key)
    }

    fn param_mut(&mut self, key: &str) -> Option<&mut Param> {
        self.params.get_mut(key)
    }

    fn set_param(&mut self, key: &str, value: Param) {
        self.params.insert(key.to_owned(), value);
    }

    fn remove_param(&mut self, key: &str) -> Option<Param> {
        self.params.remove(key)
    }
}

impl ConnectionState for HashMap<String, Param> {
    fn param(&self, key: &str) -> Option<&Param> {
        self.get(key)
    }

    fn param_mut(&mut self, key: &str) -> Option<&mut Param> {
        self.get_mut(key)
    }

    fn set_param(&mut self, key: &str, value: Param) {
        self.insert(key.to_owned(), value);
    }

    fn remove_param(&mut self, key: &str) -> Option<Param> {
        self.remove(key)
    }
}
