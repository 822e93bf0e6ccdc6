//! Fuzz target for the [`Responder`] and [`Requester`] state machines
//!
//! Neither side may move data on a request it did not accept
//!
//! # Strategy
//!
//! - Event sequences: Arbitrary interleavings of frames, decisions and flush
//!   notifications
//! - Sealed frames: Tokens, size headers and payloads encrypted under the
//!   session key, so inputs get past authentication
//! - Foreign frames: Random bytes and messages sealed under another key
//!
//! # Invariants
//!
//! - `Done` is terminal: every event after it is rejected
//! - `SendPayload` only ever follows an allowed pull with a document
//! - `ReversePull` only ever follows an allowed push
//! - The requester delivers a document only after an `ACCEPT` to a pull
//! - NEVER panic on unexpected input

#![no_main]

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use todosync_core::{
    Environment, Requester, RequesterAction, RequesterEvent, RequesterState, Responder,
    ResponderAction, ResponderEvent, ResponderState, SessionCipher,
};
use todosync_crypto::Key;
use todosync_proto::{Message, Request, Token};

/// IVs from a counter, so every run is reproducible.
#[derive(Debug, Clone, Default)]
struct CounterEnv(Arc<AtomicU64>);

impl Environment for CounterEnv {
    fn random_bytes(&self, buffer: &mut [u8]) {
        let n = self.0.fetch_add(1, Ordering::Relaxed).to_le_bytes();
        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = n[i % n.len()];
        }
    }
}

#[derive(Debug, Clone, Arbitrary)]
enum FuzzedBody {
    Token(u8),
    SizeHeader(u64),
    Payload(Vec<u8>),
    ForeignToken(u8),
    RandomBytes(Vec<u8>),
}

#[derive(Debug, Clone, Arbitrary)]
enum ResponderInput {
    Frame(FuzzedBody),
    PullDecided { allowed: bool, document: Option<Vec<u8>> },
    PushDecided { allowed: bool },
    FrameSent,
}

#[derive(Debug, Clone, Arbitrary)]
enum RequesterInput {
    Connected,
    FrameSent,
    Frame(FuzzedBody),
    Payload(FuzzedBody),
    Merged,
}

#[derive(Debug, Clone, Arbitrary)]
struct FuzzInput {
    push: bool,
    responder: Vec<ResponderInput>,
    requester: Vec<RequesterInput>,
}

fuzz_target!(|input: FuzzInput| {
    let cipher = SessionCipher::new(Key::from_passphrase("fuzz"), CounterEnv::default());
    let foreign = SessionCipher::new(Key::from_passphrase("other"), CounterEnv::default());

    fuzz_responder(&cipher, &foreign, input.responder);
    let request = if input.push { Request::Push } else { Request::Pull };
    fuzz_requester(&cipher, &foreign, request, input.requester);
});

fn fuzz_responder(
    cipher: &SessionCipher<CounterEnv>,
    foreign: &SessionCipher<CounterEnv>,
    inputs: Vec<ResponderInput>,
) {
    let mut responder = Responder::new(cipher.clone());
    let mut served_allowed = false;
    let mut push_allowed = false;

    for input in inputs {
        let before = responder.state().clone();
        let event = match input {
            ResponderInput::Frame(body) => {
                ResponderEvent::FrameReceived(seal(cipher, foreign, body))
            },
            ResponderInput::PullDecided { allowed, document } => {
                served_allowed |= allowed
                    && document.is_some()
                    && before == ResponderState::Decide(Request::Pull);
                ResponderEvent::PullDecided { allowed, document }
            },
            ResponderInput::PushDecided { allowed } => {
                push_allowed |= allowed && before == ResponderState::Decide(Request::Push);
                ResponderEvent::PushDecided { allowed }
            },
            ResponderInput::FrameSent => ResponderEvent::FrameSent,
        };

        match responder.handle(event) {
            Ok(actions) => {
                assert_ne!(before, ResponderState::Done, "Responder accepted an event after Done");
                for action in actions {
                    match action {
                        ResponderAction::SendPayload(_) => {
                            assert!(served_allowed, "Payload sent without an allowed pull")
                        },
                        ResponderAction::ReversePull => {
                            assert!(push_allowed, "Reverse pull without an allowed push")
                        },
                        ResponderAction::Decide(_)
                        | ResponderAction::SendFrame(_)
                        | ResponderAction::Close { .. } => {},
                    }
                }
            },
            Err(_) => assert!(responder.is_done()),
        }
    }
}

fn fuzz_requester(
    cipher: &SessionCipher<CounterEnv>,
    foreign: &SessionCipher<CounterEnv>,
    request: Request,
    inputs: Vec<RequesterInput>,
) {
    let mut requester = Requester::new(cipher.clone(), request);

    for input in inputs {
        let before = requester.state();
        let event = match input {
            RequesterInput::Connected => RequesterEvent::Connected,
            RequesterInput::FrameSent => RequesterEvent::FrameSent,
            RequesterInput::Frame(body) => {
                RequesterEvent::FrameReceived(seal(cipher, foreign, body))
            },
            RequesterInput::Payload(body) => {
                RequesterEvent::PayloadReceived(seal(cipher, foreign, body))
            },
            RequesterInput::Merged => RequesterEvent::Merged,
        };

        match requester.handle(event) {
            Ok(actions) => {
                assert_ne!(before, RequesterState::Done, "Requester accepted an event after Done");
                for action in actions {
                    if let RequesterAction::Deliver(_) = action {
                        assert_eq!(request, Request::Pull, "Document delivered on a push");
                        assert!(matches!(before, RequesterState::RecvPayload { .. }));
                    }
                }
            },
            Err(_) => assert!(requester.is_done()),
        }
    }
}

fn seal(
    cipher: &SessionCipher<CounterEnv>,
    foreign: &SessionCipher<CounterEnv>,
    body: FuzzedBody,
) -> Vec<u8> {
    let sealed = match body {
        FuzzedBody::Token(i) => cipher.seal(&Message::Token(token(i))),
        FuzzedBody::SizeHeader(size) => cipher.seal(&Message::SizeHeader(size)),
        FuzzedBody::Payload(document) => cipher.seal(&Message::Payload(document)),
        FuzzedBody::ForeignToken(i) => foreign.seal(&Message::Token(token(i))),
        FuzzedBody::RandomBytes(bytes) => return bytes,
    };
    sealed.unwrap_or_default()
}

fn token(i: u8) -> Token {
    Token::ALL[usize::from(i) % Token::ALL.len()]
}
