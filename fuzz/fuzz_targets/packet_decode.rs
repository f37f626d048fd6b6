//! Fuzz target for packet and message parsing
//!
//! Arbitrary bytes must only ever produce Ok or Err from the packet codec,
//! the message header codec, and stream reassembly.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sidp_core::message::{MessageHeader, read_message};
use sidp_core::{MAX_MESSAGE_LEN, Packet};

fuzz_target!(|data: &[u8]| {
    if let Ok(packet) = Packet::decode(data) {
        let _ = MessageHeader::decode(&packet.payload);
    }
    let _ = MessageHeader::decode(data);

    // Reassembly over a byte stream, bounded like a live connection
    let mut cursor = std::io::Cursor::new(data);
    let _ = read_message(&mut cursor, MAX_MESSAGE_LEN);
});
