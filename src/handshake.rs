//! WebSocket opening handshake
//!
//! Both roles run through the same negotiator: a client builds the upgrade
//! request and waits for a `101 Switching Protocols` response, a server
//! answers a request with the accept response. Handshake units are
//! delimited by the first `\r\n\r\n` in the receive buffer.

use std::collections::HashMap;

use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::mask::fill_random;
use crate::state::{ConnectionState, ConnectionStateExt};
use crate::{Role, WS_GUID};

/// Status line that completes a client handshake
pub const SWITCHING_PROTOCOLS: &str = "HTTP/1.1 101 Switching Protocols";

/// Terminator of an HTTP head
pub const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Connection parameters supplied at connect time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    /// Remote address (defaults to `localhost`)
    pub address: Option<String>,
    /// Remote port (defaults to 80)
    pub port: Option<u16>,
    /// Override parameters, see [`ServerInfo::ORIGIN`] and [`ServerInfo::ENDPOINT`]
    pub parameters: HashMap<String, String>,
}

impl ServerInfo {
    /// Parameter overriding the `Origin` header
    pub const ORIGIN: &'static str = "origin";
    /// Parameter overriding the request path
    pub const ENDPOINT: &'static str = "endpoint";

    /// Create connection parameters for `address:port`
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: Some(address.into()),
            port: Some(port),
            parameters: HashMap::new(),
        }
    }

    /// Set the `Origin` header
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.parameters.insert(Self::ORIGIN.to_owned(), origin.into());
        self
    }

    /// Set the request path
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.parameters
            .insert(Self::ENDPOINT.to_owned(), endpoint.into());
        self
    }

    /// `address:port` as sent in the `Host` header
    pub fn host(&self) -> String {
        format!(
            "{}:{}",
            self.address.as_deref().unwrap_or("localhost"),
            self.port.unwrap_or(80)
        )
    }

    /// Request path, always starting with `/`
    pub fn path(&self) -> String {
        match self.parameters.get(Self::ENDPOINT) {
            Some(endpoint) if endpoint.starts_with('/') => endpoint.clone(),
            Some(endpoint) => format!("/{}", endpoint),
            None => "/".to_owned(),
        }
    }

    /// `Origin` header value, defaulting to `http://<host>`
    pub fn origin_header(&self) -> String {
        match self.parameters.get(Self::ORIGIN) {
            Some(origin) => origin.clone(),
            None => format!("http://{}", self.host()),
        }
    }
}

/// Fields of an upgrade request the server needs to answer it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest<'a> {
    /// Request target
    pub path: &'a str,
    /// Client nonce from `Sec-WebSocket-Key`
    pub key: &'a str,
    /// Raw `Sec-WebSocket-Protocol` offer list
    pub protocols: Option<&'a str>,
}

impl<'a> HandshakeRequest<'a> {
    /// First subprotocol the client offered
    pub fn first_protocol(&self) -> Option<&'a str> {
        self.protocols?
            .split(',')
            .map(str::trim)
            .find(|p| !p.is_empty())
    }
}

/// Value of the first header called `name`, compared case-insensitively
fn header_value<'a>(headers: &[httparse::Header<'a>], name: &str) -> Result<Option<&'a str>> {
    let Some(header) = headers.iter().find(|h| h.name.eq_ignore_ascii_case(name)) else {
        return Ok(None);
    };
    simdutf8::basic::from_utf8(header.value)
        .map(|value| Some(value.trim()))
        .map_err(|_| Error::InvalidHttp("header value is not UTF-8"))
}

/// True if a comma-separated header value lists `token`
fn lists_token(value: Option<&str>, token: &str) -> bool {
    value.is_some_and(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
}

/// Parse and validate a WebSocket upgrade request
pub fn parse_request(buf: &[u8]) -> Result<HandshakeRequest<'_>> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut req = httparse::Request::new(&mut headers);

    match req.parse(buf) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(Error::InvalidHttp("truncated upgrade request"));
        }
        Err(_) => return Err(Error::InvalidHttp("malformed upgrade request")),
    }
    if req.method != Some("GET") {
        return Err(Error::InvalidHttp("method must be GET"));
    }

    let headers = &*req.headers;
    if !lists_token(header_value(headers, "Upgrade")?, "websocket") {
        return Err(Error::HandshakeFailed("missing Upgrade: websocket"));
    }
    if !lists_token(header_value(headers, "Connection")?, "upgrade") {
        return Err(Error::HandshakeFailed("missing Connection: Upgrade"));
    }
    match header_value(headers, "Sec-WebSocket-Version")? {
        Some("13") => {}
        Some(_) => return Err(Error::HandshakeFailed("unsupported WebSocket version")),
        None => return Err(Error::HandshakeFailed("missing Sec-WebSocket-Version")),
    }
    let key = header_value(headers, "Sec-WebSocket-Key")?
        .filter(|key| !key.is_empty())
        .ok_or(Error::HandshakeFailed("missing Sec-WebSocket-Key"))?;

    Ok(HandshakeRequest {
        path: req.path.unwrap_or("/"),
        key,
        protocols: header_value(headers, "Sec-WebSocket-Protocol")?,
    })
}

/// Sec-WebSocket-Accept for a client key: base64(SHA-1(key + GUID))
#[inline]
pub fn generate_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Generate a random Sec-WebSocket-Key (16 secure random bytes, base64)
pub fn generate_key() -> Result<String> {
    let mut bytes = [0u8; 16];
    fill_random(&mut bytes)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Build a WebSocket upgrade response
pub fn build_response(accept_key: &str, protocol: Option<&str>) -> Bytes {
    let mut buf = BytesMut::with_capacity(256);

    buf.put_slice(SWITCHING_PROTOCOLS.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(b"Upgrade: websocket\r\n");
    buf.put_slice(b"Connection: Upgrade\r\n");
    buf.put_slice(b"Sec-WebSocket-Accept: ");
    buf.put_slice(accept_key.as_bytes());
    buf.put_slice(b"\r\n");

    if let Some(proto) = protocol {
        buf.put_slice(b"Sec-WebSocket-Protocol: ");
        buf.put_slice(proto.as_bytes());
        buf.put_slice(b"\r\n");
    }

    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// Build a WebSocket upgrade request (client-side)
pub fn build_request(
    host: &str,
    path: &str,
    key: &str,
    origin: &str,
    protocols: &[String],
) -> Bytes {
    let mut buf = BytesMut::with_capacity(512);

    buf.put_slice(b"GET ");
    buf.put_slice(path.as_bytes());
    buf.put_slice(b" HTTP/1.1\r\n");
    buf.put_slice(b"Host: ");
    buf.put_slice(host.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(b"Upgrade: websocket\r\n");
    buf.put_slice(b"Connection: Upgrade\r\n");
    buf.put_slice(b"Sec-WebSocket-Key: ");
    buf.put_slice(key.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(b"Origin: ");
    buf.put_slice(origin.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(b"Sec-WebSocket-Version: 13\r\n");

    if !protocols.is_empty() {
        buf.put_slice(b"Sec-WebSocket-Protocol: ");
        buf.put_slice(protocols.join(", ").as_bytes());
        buf.put_slice(b"\r\n");
    }

    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// Build the client's opening request for `info` with a fresh key
pub fn build_client_request(info: &ServerInfo, protocols: &[String]) -> Result<Bytes> {
    let key = generate_key()?;
    let host = info.host();
    let path = info.path();
    debug!(%host, %path, "built client handshake request");
    Ok(build_request(
        &host,
        &path,
        &key,
        &info.origin_header(),
        protocols,
    ))
}

/// Offset just past the first `\r\n\r\n` in `buf`, if present
pub fn detect_handshake_boundary(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_TERMINATOR.len())
        .position(|w| w == HEAD_TERMINATOR)
        .map(|pos| pos + HEAD_TERMINATOR.len())
}

/// Decode a handshake unit as text
pub fn parse_handshake_unit(unit: &[u8]) -> Result<&str> {
    if unit.is_empty() {
        return Err(Error::InvalidHttp("empty handshake"));
    }
    simdutf8::basic::from_utf8(unit).map_err(|_| Error::InvalidHttp("handshake is not UTF-8"))
}

/// True if a decoded unit carries nothing usable
#[inline]
pub fn is_handshake_unit_broken(unit: &str) -> bool {
    unit.is_empty()
}

/// Advance the handshake for `role` with a received unit.
///
/// A client marks the handshake done when the response carries the 101
/// status line; any other response leaves it not done and is otherwise
/// ignored, so the engine decides when to give up. A server returns the
/// accept response to send and marks it pending until
/// [`confirm_response_sent`] is called after the flush.
pub fn advance_handshake<S>(unit: &str, role: Role, state: &mut S) -> Result<Option<Bytes>>
where
    S: ConnectionState + ?Sized,
{
    if is_handshake_unit_broken(unit) {
        return Err(Error::InvalidHttp("empty handshake"));
    }
    let is_response = unit.starts_with("HTTP");

    match role {
        Role::Client if is_response => {
            let accepted = unit.contains(SWITCHING_PROTOCOLS);
            state.set_handshake_done(accepted);
            if accepted {
                debug!("client handshake complete");
            } else {
                warn!(
                    status = unit.lines().next().unwrap_or_default(),
                    "server refused upgrade"
                );
            }
            Ok(None)
        }
        Role::Server if !is_response => {
            let req = parse_request(unit.as_bytes()).inspect_err(|e| {
                warn!(error = %e, "rejected upgrade request");
            })?;
            let accept = generate_accept_key(req.key);
            let protocol = req.first_protocol();
            let response = build_response(&accept, protocol);

            state.set_response_pending(true);
            debug!(path = req.path, protocol, "built server handshake response");
            Ok(Some(response))
        }
        _ => Ok(None),
    }
}

/// Confirm that a server response built by [`advance_handshake`] reached
/// the peer. Returns true if this completed the handshake.
pub fn confirm_response_sent<S>(state: &mut S) -> bool
where
    S: ConnectionState + ?Sized,
{
    if !state.response_pending() {
        return false;
    }
    state.set_response_pending(false);
    state.set_handshake_done(true);
    debug!("server handshake complete");
    true
}
