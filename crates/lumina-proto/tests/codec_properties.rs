//! Property-based tests for the wire codec.
//!
//! These verify the codec laws for all inputs, not just examples: varints
//! round-trip at their minimal width, every message survives
//! build-then-parse, and framed packets concatenate on a stream without
//! desynchronizing.

use bytes::{Bytes, BytesMut};
use lumina_proto::{
    Fail, FuncInfo, FuncMd, Helo, Metadata, Notify, Packet, PullMd, PullMdResult, PushMd,
    PushMdResult, RpcMessage, Signature, message, varint,
};
use proptest::prelude::*;

fn arbitrary_blob(max: usize) -> impl Strategy<Value = Bytes> {
    prop::collection::vec(any::<u8>(), 0..max).prop_map(Bytes::from)
}

/// Function-name-shaped strings: valid UTF-8, no NUL.
fn arbitrary_name() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_@?$:.]{0,48}"
}

fn arbitrary_signature() -> impl Strategy<Value = Signature> {
    (0u32..4, arbitrary_blob(64)).prop_map(|(version, bytes)| Signature { version, bytes })
}

fn arbitrary_metadata() -> impl Strategy<Value = Metadata> {
    (arbitrary_name(), any::<u32>(), arbitrary_blob(128)).prop_map(
        |(func_name, func_size, serialized_data)| Metadata {
            func_name,
            func_size,
            serialized_data,
        },
    )
}

fn arbitrary_func_info() -> impl Strategy<Value = FuncInfo> {
    (arbitrary_metadata(), any::<u32>())
        .prop_map(|(metadata, popularity)| FuncInfo { metadata, popularity })
}

fn arbitrary_func_md() -> impl Strategy<Value = FuncMd> {
    (arbitrary_metadata(), arbitrary_signature())
        .prop_map(|(metadata, signature)| FuncMd { metadata, signature })
}

fn arbitrary_message() -> impl Strategy<Value = RpcMessage> {
    prop_oneof![
        Just(RpcMessage::Ok),
        (any::<u32>(), arbitrary_name())
            .prop_map(|(status, message)| RpcMessage::Fail(Fail { status, message })),
        (any::<u32>(), arbitrary_name())
            .prop_map(|(protocol, message)| RpcMessage::Notify(Notify { protocol, message })),
        (any::<u32>(), arbitrary_blob(64), any::<u32>(), any::<u16>(), any::<u32>()).prop_map(
            |(protocol, license_blob, hexrays_id, watermark, field_0x36)| {
                RpcMessage::Helo(Helo { protocol, license_blob, hexrays_id, watermark, field_0x36 })
            }
        ),
        (
            any::<u32>(),
            prop::collection::vec(any::<u32>(), 0..8),
            prop::collection::vec(arbitrary_signature(), 0..8)
        )
            .prop_map(|(flags, ukn_list, func_sigs)| {
                RpcMessage::PullMd(PullMd { flags, ukn_list, func_sigs })
            }),
        (
            prop::collection::vec(0u32..2, 0..8),
            prop::collection::vec(arbitrary_func_info(), 0..8)
        )
            .prop_map(|(found, results)| {
                RpcMessage::PullMdResult(PullMdResult { found, results })
            }),
        (
            any::<u32>(),
            arbitrary_name(),
            arbitrary_name(),
            any::<[u8; 16]>(),
            arbitrary_name(),
            prop::collection::vec(arbitrary_func_md(), 0..8),
            prop::collection::vec(any::<u64>(), 0..8),
        )
            .prop_map(
                |(field_0x10, idb_path, input_path, input_md5, hostname, func_mds, func_eas)| {
                    RpcMessage::PushMd(PushMd {
                        field_0x10,
                        idb_path,
                        input_path,
                        input_md5,
                        hostname,
                        func_mds,
                        func_eas,
                    })
                }
            ),
        prop::collection::vec(0u32..2, 0..8).prop_map(|results_flags| {
            RpcMessage::PushMdResult(PushMdResult { results_flags })
        }),
    ]
}

fn dw_expected_width(value: u16) -> usize {
    if value > 0x3FFF {
        3
    } else if value > 0x7F {
        2
    } else {
        1
    }
}

fn dd_expected_width(value: u32) -> usize {
    if value > 0x1FFF_FFFF {
        5
    } else if value > 0x3FFF {
        4
    } else if value > 0x7F {
        2
    } else {
        1
    }
}

proptest! {
    #[test]
    fn dw_round_trips_at_minimal_width(value in any::<u16>()) {
        let mut buf = Vec::new();
        varint::encode_dw(&mut buf, value);

        prop_assert_eq!(buf.len(), dw_expected_width(value));
        prop_assert_eq!(varint::decode_dw(&mut buf.as_slice()).unwrap(), value);
    }

    #[test]
    fn dd_round_trips_at_minimal_width(value in any::<u32>()) {
        let mut buf = Vec::new();
        varint::encode_dd(&mut buf, value);

        prop_assert_eq!(buf.len(), dd_expected_width(value));
        prop_assert_eq!(varint::decode_dd(&mut buf.as_slice()).unwrap(), value);
    }

    #[test]
    fn dq_round_trips_and_splits_into_dds(value in any::<u64>()) {
        let mut buf = Vec::new();
        varint::encode_dq(&mut buf, value);

        let mut halves = Vec::new();
        varint::encode_dd(&mut halves, value as u32);
        varint::encode_dd(&mut halves, (value >> 32) as u32);
        prop_assert_eq!(&buf, &halves);

        prop_assert_eq!(varint::decode_dq(&mut buf.as_slice()).unwrap(), value);
    }

    #[test]
    fn ea_round_trips_through_the_shift(ea in any::<i64>()) {
        let mut buf = Vec::new();
        varint::encode_ea(&mut buf, ea);
        prop_assert_eq!(varint::decode_ea(&mut buf.as_slice()).unwrap(), ea);
    }

    #[test]
    fn var_buff_round_trips(blob in arbitrary_blob(256)) {
        let mut buf = BytesMut::new();
        message::encode_var_buff(&mut buf, &blob).unwrap();

        let mut src = buf.freeze();
        prop_assert_eq!(message::decode_var_buff(&mut src).unwrap(), blob);
        prop_assert!(!bytes::Buf::has_remaining(&src));
    }

    #[test]
    fn cstring_round_trips(name in arbitrary_name()) {
        let mut buf = BytesMut::new();
        message::encode_cstring(&mut buf, &name);

        let mut src = buf.freeze();
        prop_assert_eq!(message::decode_cstring(&mut src, "name").unwrap(), name);
        prop_assert!(!bytes::Buf::has_remaining(&src));
    }

    #[test]
    fn var_string_round_trips(text in "\\PC{0,64}") {
        let mut buf = BytesMut::new();
        message::encode_var_string(&mut buf, &text).unwrap();
        prop_assert_eq!(message::decode_var_string(&mut buf.freeze()).unwrap(), text);
    }

    #[test]
    fn message_build_then_parse_is_identity(msg in arbitrary_message()) {
        let packet = msg.to_packet().unwrap();
        let mut wire = Vec::new();
        packet.encode(&mut wire).unwrap();

        // Frame length covers the payload exactly
        let length = u32::from_be_bytes([wire[0], wire[1], wire[2], wire[3]]) as usize;
        prop_assert_eq!(length, wire.len() - Packet::HEADER_SIZE);

        let parsed = Packet::decode(&mut Bytes::from(wire)).unwrap();
        prop_assert_eq!(RpcMessage::from_packet(&parsed).unwrap(), msg);
    }

    #[test]
    fn trailing_byte_never_parses(msg in arbitrary_message()) {
        let packet = msg.to_packet().unwrap();
        let mut padded = BytesMut::from(&packet.payload[..]);
        bytes::BufMut::put_u8(&mut padded, 0x00);

        let padded = Packet::new(packet.code, padded.freeze());
        prop_assert!(RpcMessage::from_packet(&padded).is_err());
    }

    #[test]
    fn concatenated_packets_parse_in_order(
        msgs in prop::collection::vec(arbitrary_message(), 1..6)
    ) {
        let mut wire = Vec::new();
        for msg in &msgs {
            msg.to_packet().unwrap().encode(&mut wire).unwrap();
        }

        let mut stream = Bytes::from(wire);
        for expected in &msgs {
            let packet = Packet::decode(&mut stream).unwrap();
            prop_assert_eq!(&RpcMessage::from_packet(&packet).unwrap(), expected);
        }
        prop_assert!(!bytes::Buf::has_remaining(&stream));
    }
}

/// Boundary values pinned one by one; the proptest runs above cover the
/// space in between.
#[test]
fn width_class_boundaries() {
    for (value, width) in
        [(0u16, 1usize), (0x7F, 1), (0x80, 2), (0x3FFF, 2), (0x4000, 3), (0xFFFF, 3)]
    {
        let mut buf = Vec::new();
        varint::encode_dw(&mut buf, value);
        assert_eq!(buf.len(), width, "dw width for {value:#06x}");
    }

    for (value, width) in [
        (0u32, 1usize),
        (0x7F, 1),
        (0x80, 2),
        (0x3FFF, 2),
        (0x4000, 4),
        (0x1FFF_FFFF, 4),
        (0x2000_0000, 5),
        (0xFFFF_FFFF, 5),
    ] {
        let mut buf = Vec::new();
        varint::encode_dd(&mut buf, value);
        assert_eq!(buf.len(), width, "dd width for {value:#010x}");
    }
}
