//! Fuzz the message grammar behind every opcode.
//!
//! Any payload that parses must survive a rebuild-and-reparse round trip:
//! the decoder accepts non-minimal varint forms, so the bytes may differ,
//! but the value may not.

#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use lumina_proto::{Packet, RpcMessage};

fuzz_target!(|data: &[u8]| {
    let Some((&code, payload)) = data.split_first() else {
        return;
    };

    let packet = Packet::new(code, Bytes::copy_from_slice(payload));
    if let Ok(message) = RpcMessage::from_packet(&packet) {
        let rebuilt = message.to_packet().unwrap();
        let reparsed = RpcMessage::from_packet(&rebuilt).unwrap();
        assert_eq!(message, reparsed);
    }
});
