//! End-to-end behavior of the codec as an engine drives it

use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use ws_wire::handshake::generate_accept_key;
use ws_wire::length::decode_length;
use ws_wire::mask::apply_mask;
use ws_wire::prelude::*;

const LENGTHS: [usize; 7] = [0, 1, 125, 126, 65535, 65536, 200_000];

fn client() -> Codec {
    Codec::new(Config::builder().client().fragment_size(1 << 20).build())
}

fn server() -> Codec {
    Codec::new(Config::builder().server().fragment_size(1 << 20).build())
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Split an encoded byte stream into its frames
fn split_frames(codec: &Codec, mut wire: &[u8]) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    while let Some(len) = codec.needed_bytes_for_next_frame(wire).unwrap() {
        frames.push(wire[..len].to_vec());
        wire = &wire[len..];
    }
    assert!(wire.is_empty());
    frames
}

fn masked(b0: u8, data: &[u8], key: [u8; 4]) -> BytesMut {
    assert!(data.len() <= 125);
    let mut buf = BytesMut::new();
    buf.put_u8(b0);
    buf.put_u8(0x80 | data.len() as u8);
    buf.put_slice(&key);
    let start = buf.len();
    buf.put_slice(data);
    apply_mask(&mut buf[start..], key);
    buf
}

#[test]
fn data_frames_round_trip_through_masking() {
    let (client, server) = (client(), server());
    let mut conn = SessionState::new();

    for opcode in [OpCode::Text, OpCode::Binary] {
        for len in LENGTHS {
            let data = payload(len);
            let data = if opcode == OpCode::Text {
                vec![b'x'; len]
            } else {
                data
            };
            let frame = Frame::new(opcode, &data, SendRole::ClientSend);

            let mut wire = BytesMut::new();
            client.encode(&frame, &mut wire).unwrap();
            assert_ne!(wire[1] & 0x80, 0);

            let decoded = server.decode(&mut wire, &mut conn).unwrap().unwrap();
            assert!(wire.is_empty(), "len {len}");
            assert!(decoded.fin);
            assert_eq!(decoded.opcode, opcode);
            assert_eq!(&decoded.payload[..], &data[..], "len {len}");
        }
    }
    assert!(conn.pending_fragment().is_none());
}

#[test]
fn length_field_width_follows_payload_size() {
    let server = server();
    let cases = [(125usize, 125u8, 1usize), (126, 126, 3), (65535, 126, 3), (65536, 127, 9)];

    for (len, indicator, field) in cases {
        let mut wire = BytesMut::new();
        server.encode(&server.binary(payload(len)), &mut wire).unwrap();

        assert_eq!(wire[1], indicator, "len {len}");
        assert_eq!(
            decode_length(&wire[1..]).unwrap(),
            Some((len as u64, field)),
            "len {len}"
        );
        assert_eq!(wire.len(), 1 + field + len);
    }
}

#[test]
fn large_message_is_fragmented_and_reassembled() {
    let sender = Codec::new(Config::builder().server().fragment_size(100).build());
    let receiver = Codec::new(Config::builder().client().build());
    let mut conn = SessionState::new();

    let data = payload(250);
    let mut wire = BytesMut::new();
    sender.encode(&sender.binary(&data), &mut wire).unwrap();

    let frames = split_frames(&receiver, &wire);
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0][0], 0x02);
    assert_eq!(frames[1][0], 0x00);
    assert_eq!(frames[2][0], 0x80);
    for frame in &frames {
        assert_eq!(frame[1] & 0x80, 0);
    }

    let mut message = None;
    for (i, frame) in frames.iter().enumerate() {
        let decoded = receiver.parse_frame(frame, &mut conn).unwrap().unwrap();
        if i < 2 {
            assert!(!decoded.fin);
            assert!(receiver.is_control_frame(&decoded));
            assert_eq!(decoded.payload.len(), 100);
        } else {
            message = Some(decoded);
        }
    }

    let message = message.unwrap();
    assert!(message.fin);
    assert_eq!(message.opcode, OpCode::Binary);
    assert_eq!(&message.payload[..], &data[..]);
    assert!(conn.pending_fragment().is_none());
}

#[test]
fn chunked_send_with_engine_buffers() {
    let codec = Codec::new(Config::builder().client().fragment_size(64).build());
    let frame = codec.text("a".repeat(200));

    let mut state = codec.begin_fragmented_send(&frame).unwrap();
    let mut sizes = Vec::new();
    while codec.has_more_to_send(&state) {
        let size = codec.reserve_next_chunk_size(&mut state);
        let mut small = vec![0u8; size - 1];
        let err = codec.write_chunk(&mut small, &frame, &mut state).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);

        let mut out = vec![0u8; size];
        assert_eq!(codec.write_chunk(&mut out, &frame, &mut state).unwrap(), size);
        assert_ne!(out[1] & 0x80, 0);
        sizes.push(size);
    }

    // 64 + 64 + 64 + 8 payload bytes, masked 7-bit headers
    assert_eq!(sizes, vec![70, 70, 70, 14]);
    assert_eq!(state.bytes_remaining(), 0);
    assert!(codec.write_chunk(&mut [0u8; 16], &frame, &mut state).is_err());
}

#[test]
fn masking_follows_role() {
    let (client, server) = (client(), server());

    let mut wire = BytesMut::new();
    client.encode(&client.text("hi"), &mut wire).unwrap();
    assert_eq!(wire[1], 0x80 | 2);
    assert_eq!(wire.len(), 2 + 4 + 2);

    let mut wire = BytesMut::new();
    server.encode(&server.text("hi"), &mut wire).unwrap();
    assert_eq!(&wire[..], &[0x81, 0x02, b'h', b'i']);
}

#[test]
fn decoded_payload_does_not_depend_on_mask_key() {
    let server = server();
    let data = b"mask independent";

    for key in [[0, 0, 0, 0], [1, 2, 3, 4], [0xff; 4], [0x37, 0xfa, 0x21, 0x3d]] {
        let mut conn = SessionState::new();
        let mut wire = masked(0x82, data, key);
        let frame = server.decode(&mut wire, &mut conn).unwrap().unwrap();
        assert_eq!(&frame.payload[..], data);
    }
}

#[test]
fn incomplete_input_is_never_an_error() {
    let server = server();
    let mut conn = SessionState::new();

    let mut full = BytesMut::new();
    full.put_slice(&[0x82, 0x7E, 0x00, 0x7E]);
    full.put_slice(&[9u8; 126]);

    for cut in [2, 3, 4, 50, full.len() - 1] {
        for _ in 0..3 {
            assert_eq!(server.needed_bytes_for_next_frame(&full[..cut]).unwrap(), None);
            assert!(server.parse_frame(&full[..cut], &mut conn).unwrap().is_none());
        }
    }
    assert!(conn.is_empty());

    assert_eq!(server.needed_bytes_for_next_frame(&full).unwrap(), Some(130));
    let frame = server.parse_frame(&full, &mut conn).unwrap().unwrap();
    assert_eq!(frame.payload.len(), 126);
}

#[test]
fn rfc_accept_key_vector() {
    assert_eq!(
        generate_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
        "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
    );
}

#[test]
fn connections_sharing_a_codec_stay_isolated() {
    let server = server();
    let mut a = SessionState::new();
    let mut b = SessionState::new();

    assert!(server.parse_frame(&masked(0x01, b"ab", [1; 4]), &mut a).unwrap().is_some());
    assert!(a.pending_fragment().is_some());
    assert!(b.pending_fragment().is_none());

    let whole = server.parse_frame(&masked(0x81, b"xy", [2; 4]), &mut b).unwrap().unwrap();
    assert_eq!(&whole.payload[..], b"xy");

    a.set_handshake_done(true);
    assert!(!server.needs_handshake(&a));
    assert!(server.needs_handshake(&b));

    let done = server.parse_frame(&masked(0x80, b"cd", [3; 4]), &mut a).unwrap().unwrap();
    assert_eq!(done.as_text().unwrap(), "abcd");
    assert!(a.pending_fragment().is_none());
    assert!(b.pending_fragment().is_none());
}

#[test]
fn connections_on_threads_share_one_codec() {
    let server = Arc::new(server());

    std::thread::scope(|scope| {
        for id in 0..4u8 {
            let server = Arc::clone(&server);
            scope.spawn(move || {
                let mut conn = SessionState::new();
                for round in 0..50u8 {
                    let first = [id, round];
                    let last = [round, id];
                    server.parse_frame(&masked(0x02, &first, [id; 4]), &mut conn).unwrap();
                    let frame = server
                        .parse_frame(&masked(0x80, &last, [round; 4]), &mut conn)
                        .unwrap()
                        .unwrap();
                    assert_eq!(&frame.payload[..], &[id, round, round, id]);
                }
            });
        }
    });
}

#[test]
fn close_frame_records_reason_and_is_echoed() {
    let server = server();
    let mut conn = SessionState::new();

    let mut wire = masked(0x88, &[0x03, 0xE8, b'b', b'y', b'e'], [7, 7, 7, 7]);
    let frame = server.decode(&mut wire, &mut conn).unwrap().unwrap();

    assert!(server.is_close_frame(&frame));
    assert_eq!(server.close_reason_for(&conn).as_deref(), Some("bye"));

    let reply = server.build_control_reply(&frame).unwrap();
    assert_eq!(reply.opcode, OpCode::Close);
    assert_eq!(reply.role, SendRole::ServerSend);

    let mut out = BytesMut::new();
    server.encode(&reply, &mut out).unwrap();
    assert_eq!(&out[..], &[0x88, 0x00]);
}

#[test]
fn protocol_violations_are_fatal() {
    let server = server();
    let bad: [&[u8]; 5] = [
        &[0xA2, 0x00],             // RSV2
        &[0x83, 0x00],             // reserved opcode
        &[0x09, 0x00],             // fragmented ping
        &[0x80, 0x01, b'x'],       // continuation with nothing to continue
        &[0x88, 0x02, 0x03, 0xEE], // close code 1006
    ];

    for frame in bad {
        let mut conn = SessionState::new();
        let err = server.parse_frame(frame, &mut conn).unwrap_err();
        assert!(err.is_fatal(), "{frame:?}");
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    }
}

#[test]
fn oversized_frames_are_rejected_before_buffering() {
    let server = Codec::new(Config::builder().server().max_payload_length(1024).build());
    let header = [0x82, 0x7E, 0x04, 0x01];
    assert_eq!(
        server.needed_bytes_for_next_frame(&header).unwrap_err(),
        Error::FrameTooLarge
    );
}

#[test]
fn message_ceiling_applies_to_declared_length() {
    let server = Codec::new(Config::builder().server().max_message_size(1024).build());
    let mut conn = SessionState::new();

    // 65536 bytes declared, only the header has arrived
    let header = [0x82, 127, 0, 0, 0, 0, 0, 1, 0, 0];
    assert_eq!(
        server.needed_bytes_for_next_frame(&header).unwrap_err(),
        Error::MessageTooLarge
    );
    assert_eq!(
        server.parse_frame(&header, &mut conn).unwrap_err(),
        Error::MessageTooLarge
    );

    // Default ceilings: a 12 MiB frame fits the frame limit but not the message limit
    let server = Codec::default();
    let header = [0x82, 127, 0, 0, 0, 0, 0, 0xC0, 0, 0];
    assert_eq!(
        server.needed_bytes_for_next_frame(&header).unwrap_err(),
        Error::MessageTooLarge
    );
}

#[test]
fn opening_handshake_between_client_and_server() {
    let client = Codec::new(Config::builder().client().protocol("chat").build());
    let server = server();
    let mut client_conn = SessionState::new();
    let mut server_conn = SessionState::new();
    client.prepare_after_connected(&mut client_conn);
    server.prepare_after_connected(&mut server_conn);

    let info = ServerInfo::new("example.com", 8080).endpoint("live");
    let request = client.first_handshake(&info).unwrap().unwrap();

    // The request arrives in two reads
    let mut inbound = BytesMut::from(&request[..10]);
    assert!(server.decode_handshake(&mut inbound, &mut server_conn).unwrap().is_none());
    assert_eq!(inbound.len(), 10);
    inbound.put_slice(&request[10..]);

    let response = server
        .decode_handshake(&mut inbound, &mut server_conn)
        .unwrap()
        .unwrap();
    let text = std::str::from_utf8(&response).unwrap();
    assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(text.contains("Sec-WebSocket-Protocol: chat\r\n"));
    assert!(server.needs_handshake(&server_conn));
    assert!(server.confirm_handshake_sent(&mut server_conn));

    let mut inbound = BytesMut::from(&response[..]);
    client.decode_handshake(&mut inbound, &mut client_conn).unwrap();
    assert!(!client.needs_handshake(&client_conn));
    assert!(!server.needs_handshake(&server_conn));

    // Frames flow once both sides are upgraded
    let mut wire = BytesMut::new();
    client.encode(&client.text("ready"), &mut wire).unwrap();
    let msg = server
        .decode(&mut wire, &mut server_conn)
        .unwrap()
        .map(|frame| server.message(frame, &server_conn))
        .unwrap()
        .unwrap();
    assert_eq!(msg.as_text(), Some("ready"));

    server.reset_after_disconnected(&mut server_conn);
    assert!(server.needs_handshake(&server_conn));
}

#[test]
fn refused_upgrade_leaves_handshake_pending() {
    let client = client();
    let mut conn = SessionState::new();
    let mut inbound = BytesMut::from(&b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n"[..]);

    assert!(client.decode_handshake(&mut inbound, &mut conn).unwrap().is_none());
    assert!(inbound.is_empty());
    assert!(client.needs_handshake(&conn));
}
