use std::sync::Arc;

use bytes::Bytes;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::CallFrame;
use crate::Codec;
use crate::Error;
use crate::ErrorKind;
use crate::Flags;
use crate::Optimizer;
use crate::Packet;
use crate::RemoteError;
use crate::ResponseFrame;
use crate::ServiceDescriptor;

fn roundtrip(packet: &Packet, codec: &Codec) -> Packet {
    let encoded = codec.encode(packet).expect("encode");
    codec.decode(Bytes::copy_from_slice(&encoded)).expect("decode")
}

fn call(call_id: Option<u32>, args: &[&'static [u8]]) -> Packet {
    Packet::Call(CallFrame {
        call_id,
        target: "chat::Room".into(),
        method: "Say".into(),
        args: args.iter().map(|a| Bytes::from_static(a)).collect(),
    })
}

fn optimized_codec() -> Codec {
    let optimizer = Arc::new(Optimizer::new());
    optimizer
        .build([
            ServiceDescriptor::new("chat::Room", ["Join", "Say"]),
            ServiceDescriptor::new("chat::Lobby", ["List"]),
        ])
        .unwrap();
    Codec::new(optimizer)
}

// ===== 1. CALL FRAMES =====

#[test]
fn call_roundtrip_plain() {
    let codec = Codec::new(Arc::new(Optimizer::new()));

    for packet in [
        call(Some(1), &[]),
        call(None, &[]),
        call(Some(u32::MAX), &[b"hello", b"", b"\x00\x01"]),
        call(None, &[b"only"]),
    ] {
        assert_eq!(roundtrip(&packet, &codec), packet);
    }
}

#[test]
fn empty_argument_is_preserved() {
    let codec = Codec::new(Arc::new(Optimizer::new()));
    let Packet::Call(decoded) = roundtrip(&call(Some(3), &[b"", b""]), &codec) else {
        panic!("Expected call frame");
    };
    assert_eq!(decoded.args.len(), 2);
    assert!(decoded.args.iter().all(|a| a.is_empty()));
}

#[test]
fn call_roundtrip_optimized() {
    let codec = optimized_codec();
    let packet = call(Some(9), &[b"abc"]);

    let encoded = codec.encode(&packet).unwrap();
    let flags = Flags::from_bits(encoded[0]);
    assert!(flags.contains(Flags::METHOD_CALL | Flags::OPTIMIZED));
    // flag + call id + u16 id + (len + 3)
    assert_eq!(encoded.len(), 1 + 4 + 2 + 4 + 3);
    // chat::Lobby sorts first, so chat::Room.Say is id 3
    assert_eq!(&encoded[5..7], &3u16.to_le_bytes());

    assert_eq!(roundtrip(&packet, &codec), packet);
}

#[test]
fn optimized_frame_without_table_is_invalid_call() {
    let sender = optimized_codec();
    let receiver = Codec::new(Arc::new(Optimizer::new()));

    let encoded = sender.encode(&call(Some(1), &[])).unwrap();
    match receiver.decode(Bytes::copy_from_slice(&encoded)) {
        Err(Error::InvalidCall(msg)) => {
            assert_eq!(msg, "The target peer does not have optimization enabled.");
        }
        other => panic!("Expected InvalidCall, got {:?}", other),
    }
}

#[test]
fn optimized_encode_of_unknown_pair_fails() {
    let codec = optimized_codec();
    let packet = Packet::Call(CallFrame {
        call_id: None,
        target: "chat::Room".into(),
        method: "Leave".into(),
        args: vec![],
    });
    let err = codec.encode(&packet).unwrap_err();
    assert!(err.is_invalid_call(), "got {:?}", err);
}

#[test]
fn out_of_range_id_is_invalid_call() {
    let codec = optimized_codec();
    let frame = [Flags::METHOD_CALL.bits() | Flags::OPTIMIZED.bits() | Flags::NO_CALL_ID.bits(), 0x10, 0x00];
    let err = codec.decode(Bytes::copy_from_slice(&frame)).unwrap_err();
    assert_eq!(err, Error::InvalidCall("Cannot find method by id 16.".into()));
}

#[test]
fn long_names_are_rejected() {
    let codec = Codec::new(Arc::new(Optimizer::new()));
    let packet = Packet::Call(CallFrame {
        call_id: Some(1),
        target: "t".repeat(256),
        method: "m".into(),
        args: vec![],
    });
    assert_eq!(codec.encode(&packet).unwrap_err(), Error::NameTooLong(256));
}

// ===== 2. RESPONSE FRAMES =====

#[test]
fn response_roundtrip_variants() {
    let codec = Codec::new(Arc::new(Optimizer::new()));

    let cases = [
        ResponseFrame::ok(1, None),
        ResponseFrame::ok(2, Some(Bytes::from_static(b"result"))),
        ResponseFrame::err(3, RemoteError::invalid_call("Failed to find target x")),
        ResponseFrame::err(4, RemoteError::call_failed("")),
        ResponseFrame {
            call_id: 5,
            result: Some(Bytes::from_static(b"partial")),
            error: Some(RemoteError::call_failed("boom")),
        },
    ];

    for response in cases {
        let packet = Packet::Response(response);
        assert_eq!(roundtrip(&packet, &codec), packet);
    }
}

#[test]
fn response_outcome_must_be_unique() {
    let codec = Codec::new(Arc::new(Optimizer::new()));

    let none = Flags::METHOD_RESPONSE | Flags::NO_RESULT;
    let both = none | Flags::INVALID_CALL | Flags::CALL_FAILED;

    for flags in [none, both] {
        let frame = [flags.bits(), 0, 0, 0, 0];
        match codec.decode(Bytes::copy_from_slice(&frame)) {
            Err(Error::ProtocolViolation(_)) => {}
            other => panic!("Expected ProtocolViolation for {:?}, got {:?}", flags, other),
        }
    }
}

#[test]
fn response_error_kind_survives() {
    let codec = Codec::new(Arc::new(Optimizer::new()));
    let packet = Packet::Response(ResponseFrame::err(11, RemoteError::call_failed("nope")));
    let Packet::Response(decoded) = roundtrip(&packet, &codec) else {
        panic!("Expected response frame");
    };
    let error = decoded.error.expect("error present");
    assert_eq!(error.kind, ErrorKind::CallFailed);
    assert_eq!(error.message, "nope");
}

// ===== 3. MALFORMED INPUT =====

#[test]
fn truncated_frames_never_panic() {
    let codec = Codec::new(Arc::new(Optimizer::new()));
    let packet = call(Some(77), &[b"alpha", b"beta"]);
    let encoded = codec.encode(&packet).unwrap().to_vec();

    // A prefix that ends on an argument boundary is a valid call with fewer arguments.
    for len in 0..encoded.len() {
        let prefix = Bytes::copy_from_slice(&encoded[..len]);
        match codec.decode(prefix) {
            Err(_) => {}
            Ok(Packet::Call(c)) => assert!(c.args.len() < 2, "prefix of {} bytes kept every argument", len),
            Ok(other) => panic!("Expected call or error, got {:?}", other),
        }
    }
}

#[test]
fn random_garbage_never_panics() {
    let codec = optimized_codec();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for _ in 0..2000 {
        let len = rng.gen_range(0..64);
        let data: Vec<u8> = (0..len).map(|_| rng.r#gen()).collect();
        let _ = codec.decode(Bytes::from(data));
    }
}

#[test]
fn unknown_frame_type_is_rejected() {
    let codec = Codec::new(Arc::new(Optimizer::new()));
    let err = codec.decode(Bytes::from_static(&[0x00])).unwrap_err();
    assert!(matches!(err, Error::ProtocolViolation(_)), "got {:?}", err);
}
