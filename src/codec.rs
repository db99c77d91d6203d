//! Engine-facing codec
//!
//! [`Codec`] bundles the handshake negotiator, the frame reader and the
//! fragmenter behind the configuration they share. It has no per-connection
//! fields: every call that needs to remember something takes the
//! connection's [`ConnectionState`], so one instance can sit behind an
//! `Arc` and serve any number of connections concurrently.

use bytes::{Buf, Bytes, BytesMut};
use tracing::debug;

use crate::error::{CloseReason, Error, Result};
use crate::frame::{Frame, Message, OpCode, SendRole};
use crate::handshake::{self, ServerInfo};
use crate::reader;
use crate::state::{ConnectionState, ConnectionStateExt};
use crate::writer::{self, FragmentState};
use crate::{Config, Role};

/// Sans-I/O WebSocket codec shared across connections
#[derive(Debug, Clone, Default)]
pub struct Codec {
    config: Config,
}

impl Codec {
    /// Create a codec with the given configuration
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// The configuration this codec was built with
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Endpoint role
    #[inline]
    pub fn role(&self) -> Role {
        self.config.role
    }

    #[inline]
    fn send_role(&self) -> SendRole {
        self.config.role.send_role()
    }

    // ========================================================================
    // Composing frames
    // ========================================================================

    /// Text frame sent in this codec's role
    pub fn text(&self, text: impl AsRef<str>) -> Frame {
        Frame::text(text, self.send_role())
    }

    /// Binary frame sent in this codec's role
    pub fn binary(&self, data: impl AsRef<[u8]>) -> Frame {
        Frame::binary(data, self.send_role())
    }

    /// Ping frame sent in this codec's role
    pub fn ping(&self) -> Frame {
        Frame::control(OpCode::Ping, self.send_role())
    }

    /// Pong frame sent in this codec's role
    pub fn pong(&self) -> Frame {
        Frame::control(OpCode::Pong, self.send_role())
    }

    /// Close frame sent in this codec's role
    pub fn close(&self) -> Frame {
        Frame::control(OpCode::Close, self.send_role())
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Prepare a freshly connected state handle
    pub fn prepare_after_connected<S>(&self, state: &mut S)
    where
        S: ConnectionState + ?Sized,
    {
        state.clear_last_close();
    }

    /// Forget handshake and reassembly progress after a disconnect
    pub fn reset_after_disconnected<S>(&self, state: &mut S)
    where
        S: ConnectionState + ?Sized,
    {
        state.set_handshake_done(false);
        state.set_response_pending(false);
        state.take_pending_fragment();
    }

    // ========================================================================
    // Handshake
    // ========================================================================

    /// True until the opening handshake has completed
    #[inline]
    pub fn needs_handshake<S>(&self, state: &S) -> bool
    where
        S: ConnectionState + ?Sized,
    {
        !state.handshake_done()
    }

    /// First handshake bytes to send after connecting.
    ///
    /// A client returns its upgrade request; a server waits for the peer.
    pub fn first_handshake(&self, info: &ServerInfo) -> Result<Option<Bytes>> {
        match self.config.role {
            Role::Client => {
                handshake::build_client_request(info, &self.config.protocols).map(Some)
            }
            Role::Server => Ok(None),
        }
    }

    /// Size of the next complete handshake unit at the front of `buf`
    pub fn needed_bytes_for_next_handshake_unit(&self, buf: &[u8]) -> Result<Option<usize>> {
        match handshake::detect_handshake_boundary(buf) {
            Some(len) if len <= self.config.max_handshake_size => Ok(Some(len)),
            Some(_) => Err(Error::InvalidHttp("handshake too large")),
            None if buf.len() > self.config.max_handshake_size => {
                Err(Error::InvalidHttp("handshake too large"))
            }
            None => Ok(None),
        }
    }

    /// Decode a handshake unit as text
    #[inline]
    pub fn parse_handshake_unit<'a>(&self, unit: &'a [u8]) -> Result<&'a str> {
        handshake::parse_handshake_unit(unit)
    }

    /// True if a decoded unit carries nothing usable
    #[inline]
    pub fn is_handshake_unit_broken(&self, unit: &str) -> bool {
        handshake::is_handshake_unit_broken(unit)
    }

    /// Advance the handshake with a received unit, returning bytes to send
    /// back, if any
    pub fn advance_handshake<S>(&self, unit: &str, state: &mut S) -> Result<Option<Bytes>>
    where
        S: ConnectionState + ?Sized,
    {
        handshake::advance_handshake(unit, self.config.role, state)
    }

    /// Tell the codec that bytes returned by [`Codec::advance_handshake`]
    /// were flushed to the peer. Returns true if this completed the
    /// handshake.
    pub fn confirm_handshake_sent<S>(&self, state: &mut S) -> bool
    where
        S: ConnectionState + ?Sized,
    {
        handshake::confirm_response_sent(state)
    }

    /// Consume one handshake unit from `buf` if it is complete.
    ///
    /// Returns bytes to send back, if any. `Ok(None)` also covers "unit not
    /// complete yet"; check [`Codec::needs_handshake`] to tell progress apart.
    pub fn decode_handshake<S>(&self, buf: &mut BytesMut, state: &mut S) -> Result<Option<Bytes>>
    where
        S: ConnectionState + ?Sized,
    {
        let Some(len) = self.needed_bytes_for_next_handshake_unit(buf)? else {
            return Ok(None);
        };
        let unit = buf.split_to(len);
        let text = self.parse_handshake_unit(&unit)?;
        self.advance_handshake(text, state)
    }

    // ========================================================================
    // Read path
    // ========================================================================

    /// Size of the next complete frame at the front of `buf`
    #[inline]
    pub fn needed_bytes_for_next_frame(&self, buf: &[u8]) -> Result<Option<usize>> {
        reader::length_of_next_frame(buf, &self.config)
    }

    /// Parse the frame at the front of `buf`; see [`reader::parse_frame`]
    #[inline]
    pub fn parse_frame<S>(&self, buf: &[u8], state: &mut S) -> Result<Option<Frame>>
    where
        S: ConnectionState + ?Sized,
    {
        reader::parse_frame(buf, &self.config, state)
    }

    /// Parse and consume the next frame from `buf`
    pub fn decode<S>(&self, buf: &mut BytesMut, state: &mut S) -> Result<Option<Frame>>
    where
        S: ConnectionState + ?Sized,
    {
        let Some(len) = self.needed_bytes_for_next_frame(buf)? else {
            return Ok(None);
        };
        let frame = self.parse_frame(&buf[..len], state)?;
        buf.advance(len);
        Ok(frame)
    }

    /// True for control frames and non-final fragments
    #[inline]
    pub fn is_control_frame(&self, frame: &Frame) -> bool {
        reader::is_control_header(frame)
    }

    /// Automatic reply to a received control frame
    #[inline]
    pub fn build_control_reply(&self, frame: &Frame) -> Option<Frame> {
        reader::build_control_reply(frame, self.send_role())
    }

    /// True if `frame` is a close frame
    #[inline]
    pub fn is_close_frame(&self, frame: &Frame) -> bool {
        reader::is_close_frame(frame)
    }

    /// Reason text of the last close frame received on this connection
    pub fn close_reason_for<S>(&self, state: &S) -> Option<String>
    where
        S: ConnectionState + ?Sized,
    {
        let reason = state.last_close_reason()?;
        Some(String::from_utf8_lossy(reason).into_owned())
    }

    /// Status code and reason of the last close frame received
    pub fn close_for<S>(&self, state: &S) -> Option<CloseReason>
    where
        S: ConnectionState + ?Sized,
    {
        let code = state.last_close_code()?;
        Some(CloseReason::new(
            code,
            self.close_reason_for(state).unwrap_or_default(),
        ))
    }

    /// Convert a complete frame into an application message
    pub fn message<S>(&self, frame: Frame, state: &S) -> Result<Message>
    where
        S: ConnectionState + ?Sized,
    {
        let close = if frame.is_close() {
            self.close_for(state)
        } else {
            None
        };
        frame.into_message(close)
    }

    // ========================================================================
    // Write path
    // ========================================================================

    /// Start sending `frame` in chunks of the configured fragment size
    pub fn begin_fragmented_send(&self, frame: &Frame) -> Result<FragmentState> {
        let state = writer::begin_fragmented_send(frame, self.config.fragment_size)?;
        debug!(
            opcode = ?frame.opcode,
            len = state.total_len(),
            "begin fragmented send"
        );
        Ok(state)
    }

    /// Whether `state` has another chunk to write
    #[inline]
    pub fn has_more_to_send(&self, state: &FragmentState) -> bool {
        state.has_more_to_send()
    }

    /// Reserve the next chunk, returning its size on the wire
    #[inline]
    pub fn reserve_next_chunk_size(&self, state: &mut FragmentState) -> usize {
        state.reserve_next_chunk_size()
    }

    /// Write the next chunk of `frame` into `out`
    #[inline]
    pub fn write_chunk(
        &self,
        out: &mut [u8],
        frame: &Frame,
        state: &mut FragmentState,
    ) -> Result<usize> {
        writer::write_chunk(out, frame, state)
    }

    /// Append every chunk of `frame` to `buf`
    pub fn encode(&self, frame: &Frame, buf: &mut BytesMut) -> Result<()> {
        writer::encode_frame(frame, self.config.fragment_size, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SessionState;

    fn pair() -> (Codec, Codec) {
        (
            Codec::new(Config::builder().client().fragment_size(16).build()),
            Codec::new(Config::builder().server().fragment_size(16).build()),
        )
    }

    #[test]
    fn test_codec_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Codec>();
    }

    #[test]
    fn test_composed_roles() {
        let (client, server) = pair();
        assert_eq!(client.text("a").role, SendRole::ClientSend);
        assert_eq!(server.binary([1u8]).role, SendRole::ServerSend);
        assert_eq!(server.ping().opcode, OpCode::Ping);
        assert_eq!(server.pong().opcode, OpCode::Pong);
        assert!(client.is_close_frame(&client.close()));
    }

    #[test]
    fn test_full_handshake() {
        let (client, server) = pair();
        let mut client_conn = SessionState::new();
        let mut server_conn = SessionState::new();

        assert!(client.needs_handshake(&client_conn));
        assert!(server.first_handshake(&ServerInfo::default()).unwrap().is_none());

        let request = client
            .first_handshake(&ServerInfo::new("example.com", 80))
            .unwrap()
            .unwrap();

        let mut inbound = BytesMut::from(&request[..]);
        let response = server
            .decode_handshake(&mut inbound, &mut server_conn)
            .unwrap()
            .unwrap();
        assert!(inbound.is_empty());
        assert!(server.needs_handshake(&server_conn));
        assert!(server.confirm_handshake_sent(&mut server_conn));
        assert!(!server.needs_handshake(&server_conn));

        let mut inbound = BytesMut::from(&response[..]);
        assert!(
            client
                .decode_handshake(&mut inbound, &mut client_conn)
                .unwrap()
                .is_none()
        );
        assert!(!client.needs_handshake(&client_conn));
    }

    #[test]
    fn test_handshake_partial_and_oversized() {
        let server = Codec::new(Config::builder().server().max_handshake_size(32).build());
        assert_eq!(
            server
                .needed_bytes_for_next_handshake_unit(b"GET / HTTP/1.1\r\n")
                .unwrap(),
            None
        );
        assert!(
            server
                .needed_bytes_for_next_handshake_unit(&[b'a'; 33])
                .is_err()
        );
    }

    #[test]
    fn test_decode_leaves_trailing_bytes() {
        let (client, server) = pair();
        let mut conn = SessionState::new();

        let mut wire = BytesMut::new();
        client.encode(&client.text("one"), &mut wire).unwrap();
        client.encode(&client.text("two"), &mut wire).unwrap();
        wire.truncate(wire.len() - 1);

        let first = server.decode(&mut wire, &mut conn).unwrap().unwrap();
        assert_eq!(first.as_text().unwrap(), "one");
        assert!(server.decode(&mut wire, &mut conn).unwrap().is_none());
        assert!(!wire.is_empty());
    }

    #[test]
    fn test_control_round_trip() {
        let (client, server) = pair();
        let mut conn = SessionState::new();

        let mut wire = BytesMut::new();
        client.encode(&client.ping(), &mut wire).unwrap();
        assert_eq!(&wire[..], &[0x89, 0x00]);

        let ping = server.decode(&mut wire, &mut conn).unwrap().unwrap();
        assert!(server.is_control_frame(&ping));
        let pong = server.build_control_reply(&ping).unwrap();
        assert_eq!(pong.opcode, OpCode::Pong);
        assert_eq!(pong.role, SendRole::ServerSend);
    }

    #[test]
    fn test_close_message() {
        let server = pair().1;
        let mut conn = SessionState::new();

        let mut wire = BytesMut::from(&[0x88, 0x05, 0x03, 0xE8, b'b', b'y', b'e'][..]);
        let frame = server.decode(&mut wire, &mut conn).unwrap().unwrap();
        assert_eq!(server.close_reason_for(&conn).as_deref(), Some("bye"));

        let msg = server.message(frame, &conn).unwrap();
        assert_eq!(msg, Message::Close(Some(CloseReason::new(1000, "bye"))));
    }

    #[test]
    fn test_lifecycle_hooks() {
        let server = pair().1;
        let mut conn = SessionState::new();

        conn.set_handshake_done(true);
        conn.set_last_close(1000, Some(Bytes::from_static(b"old")));
        server
            .parse_frame(&[0x01, 0x01, b'a'], &mut conn)
            .unwrap();

        server.reset_after_disconnected(&mut conn);
        assert!(server.needs_handshake(&conn));
        assert!(conn.pending_fragment().is_none());

        server.prepare_after_connected(&mut conn);
        assert!(server.close_reason_for(&conn).is_none());
    }
}
