//! Fuzz the packet envelope decoder with arbitrary byte streams.
//!
//! The decoder must never panic or over-read: every input either yields a
//! packet whose payload length matches its header, or a typed error.

#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use lumina_proto::Packet;

fuzz_target!(|data: &[u8]| {
    let mut stream = Bytes::copy_from_slice(data);

    // Drain as many frames as the input holds; a decode error ends the
    // stream, exactly like the session layer treats it.
    while let Ok(packet) = Packet::decode(&mut stream) {
        assert!(packet.payload.len() <= Packet::MAX_PAYLOAD_SIZE as usize);
    }
});
