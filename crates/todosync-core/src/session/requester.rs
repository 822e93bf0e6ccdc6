//! Client side of a session.

use bytes::Bytes;
use todosync_proto::{Message, MessageKind, Request, Token, payload_len};

use super::{SessionCipher, SessionOutcome};
use crate::{env::Environment, error::SyncError};

/// Requester protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequesterState {
    /// Waiting for the TCP connection.
    Connect,
    /// Request frame is being written.
    SendRequest,
    /// Waiting for the reply token.
    AwaitResponse,
    /// Waiting for the size header.
    RecvSize,
    /// Waiting for `len` raw payload bytes.
    RecvPayload {
        /// Announced encrypted payload length.
        len: usize,
    },
    /// Waiting for the driver to stage and merge the document.
    Merge,
    /// Session over.
    Done,
}

/// Input to the requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequesterEvent {
    /// TCP connection established.
    Connected,
    /// The request frame has been flushed.
    FrameSent,
    /// A complete frame body arrived.
    FrameReceived(Vec<u8>),
    /// Payload bytes read, possibly fewer than announced if the stream ended.
    PayloadReceived(Vec<u8>),
    /// The delivered document was merged.
    Merged,
}

/// Output of the requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequesterAction {
    /// Write an encrypted, framed message.
    SendFrame(Bytes),
    /// Read one frame.
    ReadFrame,
    /// Read exactly `len` raw bytes.
    ReadPayload {
        /// Bytes to read.
        len: usize,
    },
    /// Decrypted collection document to stage and merge.
    Deliver(Vec<u8>),
    /// Session finished successfully.
    Finish(SessionOutcome),
}

/// Client-side session state machine for one request.
#[derive(Debug)]
pub struct Requester<E: Environment> {
    cipher: SessionCipher<E>,
    request: Request,
    state: RequesterState,
    received: usize,
}

impl<E: Environment> Requester<E> {
    /// New session that will send `request` once connected.
    pub fn new(cipher: SessionCipher<E>, request: Request) -> Self {
        Self { cipher, request, state: RequesterState::Connect, received: 0 }
    }

    /// Request this session carries.
    pub fn request(&self) -> Request {
        self.request
    }

    /// Current state.
    pub fn state(&self) -> RequesterState {
        self.state
    }

    /// True once the session is over.
    pub fn is_done(&self) -> bool {
        self.state == RequesterState::Done
    }

    /// Process an event.
    ///
    /// Policy replies (`REJECT`, `NO_DATA`) surface as errors. On any error
    /// the session moves to `Done`.
    pub fn handle(&mut self, event: RequesterEvent) -> Result<Vec<RequesterAction>, SyncError> {
        let result = self.step(event);
        if result.is_err() {
            self.state = RequesterState::Done;
        }
        result
    }

    fn step(&mut self, event: RequesterEvent) -> Result<Vec<RequesterAction>, SyncError> {
        match (self.state, event) {
            (RequesterState::Connect, RequesterEvent::Connected) => {
                let frame = self.cipher.seal_frame(&Message::Token(self.request.token()))?;
                self.transition(RequesterState::SendRequest);
                Ok(vec![RequesterAction::SendFrame(frame)])
            },
            (RequesterState::SendRequest, RequesterEvent::FrameSent) => {
                self.transition(RequesterState::AwaitResponse);
                Ok(vec![RequesterAction::ReadFrame])
            },
            (RequesterState::AwaitResponse, RequesterEvent::FrameReceived(body)) => {
                self.on_response(&body)
            },
            (RequesterState::RecvSize, RequesterEvent::FrameReceived(body)) => {
                let Message::SizeHeader(size) = self.cipher.open(MessageKind::SizeHeader, &body)?
                else {
                    let reason = "size header decoded as another kind".into();
                    return Err(SyncError::InvalidState { reason });
                };
                let len = payload_len(size)?;
                self.transition(RequesterState::RecvPayload { len });
                Ok(vec![RequesterAction::ReadPayload { len }])
            },
            (RequesterState::RecvPayload { len }, RequesterEvent::PayloadReceived(bytes)) => {
                if bytes.len() != len {
                    return Err(SyncError::Truncated {
                        expected: len as u64,
                        received: bytes.len() as u64,
                    });
                }
                let Message::Payload(document) = self.cipher.open(MessageKind::Payload, &bytes)?
                else {
                    let reason = "payload decoded as another kind".into();
                    return Err(SyncError::InvalidState { reason });
                };
                self.received = len;
                self.transition(RequesterState::Merge);
                Ok(vec![RequesterAction::Deliver(document)])
            },
            (RequesterState::Merge, RequesterEvent::Merged) => {
                self.transition(RequesterState::Done);
                Ok(vec![RequesterAction::Finish(SessionOutcome::Served { bytes: self.received })])
            },
            (state, event) => Err(SyncError::InvalidState {
                reason: format!("requester cannot handle {event:?} in {state:?}"),
            }),
        }
    }

    fn on_response(&mut self, body: &[u8]) -> Result<Vec<RequesterAction>, SyncError> {
        let Message::Token(token) = self.cipher.open(MessageKind::Token, body)? else {
            return Err(SyncError::InvalidState { reason: "reply decoded as another kind".into() });
        };

        match (self.request, token) {
            (Request::Pull, Token::Accept) => {
                self.transition(RequesterState::RecvSize);
                Ok(vec![RequesterAction::ReadFrame])
            },
            (Request::Push, Token::Accept) => {
                self.transition(RequesterState::Done);
                Ok(vec![RequesterAction::Finish(SessionOutcome::PushAccepted)])
            },
            (request, Token::Reject) => Err(SyncError::Rejected { request }),
            (Request::Pull, Token::NoData) => Err(SyncError::NoData),
            (request, token) => Err(SyncError::UnexpectedToken { request, token }),
        }
    }

    fn transition(&mut self, next: RequesterState) {
        tracing::debug!(
            request = %self.request,
            from = ?self.state,
            to = ?next,
            "requester transition"
        );
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use todosync_crypto::Key;
    use todosync_proto::{FRAME_HEADER_SIZE, MAX_PAYLOAD_SIZE};

    use super::*;
    use crate::{
        env::test_env::SeededEnv,
        session::{Responder, ResponderAction, ResponderEvent},
    };

    fn cipher(passphrase: &str, seed: u64) -> SessionCipher<SeededEnv> {
        SessionCipher::new(Key::from_passphrase(passphrase), SeededEnv::new(seed))
    }

    fn body(frame: &Bytes) -> Vec<u8> {
        frame[FRAME_HEADER_SIZE..].to_vec()
    }

    fn reply(token: Token) -> Vec<u8> {
        cipher("secret", 9).seal(&Message::Token(token)).unwrap()
    }

    fn receive(
        requester: &mut Requester<SeededEnv>,
        token: Token,
    ) -> Result<Vec<RequesterAction>, SyncError> {
        requester.handle(RequesterEvent::FrameReceived(reply(token)))
    }

    fn connected(request: Request) -> Requester<SeededEnv> {
        let mut requester = Requester::new(cipher("secret", 1), request);
        requester.handle(RequesterEvent::Connected).unwrap();
        requester.handle(RequesterEvent::FrameSent).unwrap();
        requester
    }

    /// Run a pull between a requester and a responder, shuttling bytes by
    /// hand.
    fn run_pull(document: Option<Vec<u8>>, allowed: bool) -> Result<Option<Vec<u8>>, SyncError> {
        let mut requester = Requester::new(cipher("secret", 1), Request::Pull);
        let mut responder = Responder::new(cipher("secret", 2));

        let mut to_responder = Vec::new();
        for action in requester.handle(RequesterEvent::Connected)? {
            if let RequesterAction::SendFrame(frame) = action {
                to_responder.push(body(&frame));
            }
        }
        requester.handle(RequesterEvent::FrameSent)?;

        let decide = responder.handle(ResponderEvent::FrameReceived(to_responder.remove(0)))?;
        assert_eq!(decide, vec![ResponderAction::Decide(Request::Pull)]);

        let mut frames = Vec::new();
        let mut raw = Vec::new();
        let mut pending = responder.handle(ResponderEvent::PullDecided { allowed, document })?;
        while !pending.is_empty() {
            let mut wrote = false;
            for action in pending {
                match action {
                    ResponderAction::SendFrame(frame) => {
                        frames.push(body(&frame));
                        wrote = true;
                    },
                    ResponderAction::SendPayload(payload) => {
                        raw.extend_from_slice(&payload);
                        wrote = true;
                    },
                    _ => {},
                }
            }
            pending = if wrote && !responder.is_done() {
                responder.handle(ResponderEvent::FrameSent)?
            } else {
                vec![]
            };
        }

        let mut frames = frames.into_iter();
        let mut delivered = None;
        let mut next = vec![RequesterAction::ReadFrame];
        loop {
            let Some(action) = next.pop() else { break };
            next = match action {
                RequesterAction::ReadFrame => {
                    let frame = frames.next().unwrap_or_default();
                    requester.handle(RequesterEvent::FrameReceived(frame))?
                },
                RequesterAction::ReadPayload { len } => {
                    let take = raw.len().min(len);
                    requester.handle(RequesterEvent::PayloadReceived(raw[..take].to_vec()))?
                },
                RequesterAction::Deliver(document) => {
                    delivered = Some(document);
                    requester.handle(RequesterEvent::Merged)?
                },
                RequesterAction::Finish(_) | RequesterAction::SendFrame(_) => vec![],
            };
        }
        assert!(requester.is_done());
        Ok(delivered)
    }

    #[test]
    fn pull_transfers_document() {
        let document = br#"{"Home":[{"reminder":"milk"}]}"#.to_vec();
        assert_eq!(run_pull(Some(document.clone()), true).unwrap(), Some(document));
    }

    #[test]
    fn pull_rejected_by_policy() {
        let result = run_pull(None, false);
        assert!(matches!(result, Err(SyncError::Rejected { request: Request::Pull })));
    }

    #[test]
    fn pull_with_no_data() {
        assert!(matches!(run_pull(None, true), Err(SyncError::NoData)));
    }

    #[test]
    fn push_accept_finishes_without_io() {
        let mut requester = connected(Request::Push);
        let actions = receive(&mut requester, Token::Accept).unwrap();
        assert_eq!(actions, vec![RequesterAction::Finish(SessionOutcome::PushAccepted)]);
        assert!(requester.is_done());
    }

    #[test]
    fn push_reject_is_policy_error() {
        let mut requester = connected(Request::Push);
        let err = receive(&mut requester, Token::Reject).unwrap_err();
        assert!(matches!(err, SyncError::Rejected { request: Request::Push }));
    }

    #[test]
    fn unexpected_tokens_are_protocol_errors() {
        let mut push = connected(Request::Push);
        let err = receive(&mut push, Token::NoData).unwrap_err();
        assert!(matches!(
            err,
            SyncError::UnexpectedToken { request: Request::Push, token: Token::NoData }
        ));

        let mut pull = connected(Request::Pull);
        let err = receive(&mut pull, Token::PullRequest).unwrap_err();
        assert!(matches!(err, SyncError::UnexpectedToken { .. }));
        assert!(pull.is_done());
    }

    #[test]
    fn reply_under_other_passphrase_fails() {
        let mut requester = connected(Request::Pull);
        let foreign = cipher("different", 4).seal(&Message::Token(Token::Accept)).unwrap();
        let err = requester.handle(RequesterEvent::FrameReceived(foreign)).unwrap_err();
        assert!(matches!(err, SyncError::Cipher(_)));
    }

    #[test]
    fn short_payload_is_truncated() {
        let mut requester = connected(Request::Pull);
        receive(&mut requester, Token::Accept).unwrap();
        let size = cipher("secret", 5).seal(&Message::SizeHeader(100)).unwrap();
        let actions = requester.handle(RequesterEvent::FrameReceived(size)).unwrap();
        assert_eq!(actions, vec![RequesterAction::ReadPayload { len: 100 }]);

        let err = requester.handle(RequesterEvent::PayloadReceived(vec![b'A'; 40])).unwrap_err();
        assert!(matches!(err, SyncError::Truncated { expected: 100, received: 40 }));
    }

    #[test]
    fn oversized_announcement_is_refused() {
        let mut requester = connected(Request::Pull);
        receive(&mut requester, Token::Accept).unwrap();
        let size = cipher("secret", 5).seal(&Message::SizeHeader(MAX_PAYLOAD_SIZE + 1)).unwrap();
        let err = requester.handle(RequesterEvent::FrameReceived(size)).unwrap_err();
        assert!(matches!(err, SyncError::Proto(_)));
    }

    #[test]
    fn events_out_of_order_are_invalid() {
        let mut requester = Requester::new(cipher("secret", 1), Request::Pull);
        let err = requester.handle(RequesterEvent::Merged).unwrap_err();
        assert!(matches!(err, SyncError::InvalidState { .. }));
    }
}
