//! Fuzz target for everything that parses bytes from the network
//!
//! # Strategy
//!
//! - Frame headers: Arbitrary 4-byte prefixes
//! - Ciphertext: Arbitrary wire text under a fixed key
//! - Plaintext: Arbitrary bytes as each message kind
//! - Documents: Arbitrary bytes as a collection
//!
//! # Invariants
//!
//! - Accepted frame lengths never exceed `MAX_FRAME_SIZE`
//! - Random wire text never authenticates
//! - A document that parses serializes and parses back to itself
//! - NEVER panic on malformed input

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use todosync_crypto::{decrypt, Key};
use todosync_proto::{payload_len, Collection, FrameHeader, Message, MessageKind, MAX_FRAME_SIZE};

#[derive(Debug, Clone, Arbitrary)]
struct FuzzInput {
    header: [u8; 4],
    size: u64,
    kind: u8,
    bytes: Vec<u8>,
}

fuzz_target!(|input: FuzzInput| {
    if let Ok(header) = FrameHeader::from_bytes(input.header) {
        assert!(header.body_len() <= MAX_FRAME_SIZE);
    }
    let _ = payload_len(input.size);

    let key = Key::from_passphrase("fuzz");
    assert!(decrypt(&key, &input.bytes).is_err(), "Random bytes authenticated");

    let kind = match input.kind % 3 {
        0 => MessageKind::Token,
        1 => MessageKind::SizeHeader,
        _ => MessageKind::Payload,
    };
    if let Ok(message) = Message::from_plaintext(kind, input.bytes.clone()) {
        let reparsed = Message::from_plaintext(kind, message.to_plaintext());
        assert_eq!(reparsed.ok(), Some(message));
    }

    if let Ok(collection) = Collection::from_json(&input.bytes) {
        if let Ok(json) = collection.to_json() {
            assert_eq!(Collection::from_json(&json).ok(), Some(collection));
        }
    }
});
