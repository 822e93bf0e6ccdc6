//! Server side of a session.

use bytes::Bytes;
use todosync_proto::{Message, MessageKind, Request, Token};

use super::{SessionCipher, SessionOutcome};
use crate::{env::Environment, error::SyncError};

/// Responder protocol state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponderState {
    /// Waiting for the request frame.
    AwaitRequest,
    /// Waiting for the driver to consult policy (and, for a pull, the store).
    Decide(Request),
    /// ACCEPT and the size header are being written.
    SendSize,
    /// Raw payload is being written.
    SendPayload,
    /// Session over.
    Done,
}

/// Input to the responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponderEvent {
    /// A complete frame body arrived.
    FrameReceived(Vec<u8>),
    /// Pull decision. `document` is the collection to send, `None` if there
    /// is nothing to send.
    PullDecided {
        /// Policy allows pulls.
        allowed: bool,
        /// Document to serve.
        document: Option<Vec<u8>>,
    },
    /// Push decision.
    PushDecided {
        /// Policy allows pushes.
        allowed: bool,
    },
    /// Every write requested so far has been flushed.
    FrameSent,
}

/// Output of the responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponderAction {
    /// Consult policy for this request and answer with a decision event.
    Decide(Request),
    /// Write an encrypted, framed message.
    SendFrame(Bytes),
    /// Write the encrypted payload, unframed.
    SendPayload(Bytes),
    /// Pull the requester's collection over a new connection.
    ReversePull,
    /// Close the connection.
    Close {
        /// Why the session ended.
        outcome: SessionOutcome,
    },
}

/// Server-side session state machine.
#[derive(Debug)]
pub struct Responder<E: Environment> {
    cipher: SessionCipher<E>,
    state: ResponderState,
    payload: Option<Bytes>,
    payload_len: usize,
}

impl<E: Environment> Responder<E> {
    /// New session awaiting a request.
    pub fn new(cipher: SessionCipher<E>) -> Self {
        Self { cipher, state: ResponderState::AwaitRequest, payload: None, payload_len: 0 }
    }

    /// Current state.
    pub fn state(&self) -> &ResponderState {
        &self.state
    }

    /// True once the session is over.
    pub fn is_done(&self) -> bool {
        self.state == ResponderState::Done
    }

    /// Process an event.
    ///
    /// On error the session moves to `Done`.
    pub fn handle(&mut self, event: ResponderEvent) -> Result<Vec<ResponderAction>, SyncError> {
        let result = self.step(event);
        if result.is_err() {
            self.state = ResponderState::Done;
        }
        result
    }

    fn step(&mut self, event: ResponderEvent) -> Result<Vec<ResponderAction>, SyncError> {
        match (self.state.clone(), event) {
            (ResponderState::AwaitRequest, ResponderEvent::FrameReceived(body)) => {
                Ok(self.on_request(&body))
            },
            (
                ResponderState::Decide(Request::Pull),
                ResponderEvent::PullDecided { allowed, document },
            ) => self.on_pull_decided(allowed, document),
            (ResponderState::Decide(Request::Push), ResponderEvent::PushDecided { allowed }) => {
                self.on_push_decided(allowed)
            },
            (ResponderState::SendSize, ResponderEvent::FrameSent) => {
                let payload = self.payload.take().ok_or_else(|| SyncError::InvalidState {
                    reason: "payload missing after size header".to_string(),
                })?;
                self.state = ResponderState::SendPayload;
                Ok(vec![ResponderAction::SendPayload(payload)])
            },
            (ResponderState::SendPayload, ResponderEvent::FrameSent) => {
                self.state = ResponderState::Done;
                let outcome = SessionOutcome::Served { bytes: self.payload_len };
                Ok(vec![ResponderAction::Close { outcome }])
            },
            (state, event) => Err(SyncError::InvalidState {
                reason: format!("responder cannot handle {event:?} in {state:?}"),
            }),
        }
    }

    fn on_request(&mut self, body: &[u8]) -> Vec<ResponderAction> {
        let request = match self.cipher.open(MessageKind::Token, body) {
            Ok(Message::Token(token)) => token.as_request(),
            Ok(_) => None,
            Err(e) => {
                self.state = ResponderState::Done;
                let outcome = SessionOutcome::Dropped(e.to_string());
                return vec![ResponderAction::Close { outcome }];
            },
        };

        match request {
            Some(request) => {
                tracing::debug!(%request, "request received");
                self.state = ResponderState::Decide(request);
                vec![ResponderAction::Decide(request)]
            },
            None => {
                self.state = ResponderState::Done;
                let outcome = SessionOutcome::Dropped("not a request token".to_string());
                vec![ResponderAction::Close { outcome }]
            },
        }
    }

    fn on_pull_decided(
        &mut self,
        allowed: bool,
        document: Option<Vec<u8>>,
    ) -> Result<Vec<ResponderAction>, SyncError> {
        if !allowed {
            return self.finish_with(Token::Reject, SessionOutcome::Rejected(Request::Pull));
        }
        let Some(document) = document else {
            return self.finish_with(Token::NoData, SessionOutcome::NoData);
        };

        let payload = Bytes::from(self.cipher.seal(&Message::Payload(document))?);
        let size = payload.len();
        let accept = self.cipher.seal_frame(&Message::Token(Token::Accept))?;
        let header = self.cipher.seal_frame(&Message::SizeHeader(size as u64))?;

        self.payload = Some(payload);
        self.payload_len = size;
        self.state = ResponderState::SendSize;
        tracing::debug!(size, "serving collection");
        Ok(vec![ResponderAction::SendFrame(accept), ResponderAction::SendFrame(header)])
    }

    fn on_push_decided(&mut self, allowed: bool) -> Result<Vec<ResponderAction>, SyncError> {
        if !allowed {
            return self.finish_with(Token::Reject, SessionOutcome::Rejected(Request::Push));
        }
        let accept = self.cipher.seal_frame(&Message::Token(Token::Accept))?;
        self.state = ResponderState::Done;
        Ok(vec![
            ResponderAction::SendFrame(accept),
            ResponderAction::ReversePull,
            ResponderAction::Close { outcome: SessionOutcome::PushAccepted },
        ])
    }

    fn finish_with(
        &mut self,
        token: Token,
        outcome: SessionOutcome,
    ) -> Result<Vec<ResponderAction>, SyncError> {
        let frame = self.cipher.seal_frame(&Message::Token(token))?;
        self.state = ResponderState::Done;
        Ok(vec![ResponderAction::SendFrame(frame), ResponderAction::Close { outcome }])
    }
}

#[cfg(test)]
mod tests {
    use todosync_crypto::Key;
    use todosync_proto::{FRAME_HEADER_SIZE, FrameHeader};

    use super::*;
    use crate::env::test_env::SeededEnv;

    fn cipher() -> SessionCipher<SeededEnv> {
        SessionCipher::new(Key::from_passphrase("secret"), SeededEnv::new(7))
    }

    fn request_body(cipher: &SessionCipher<SeededEnv>, token: Token) -> Vec<u8> {
        cipher.seal(&Message::Token(token)).unwrap()
    }

    fn receive(
        responder: &mut Responder<SeededEnv>,
        cipher: &SessionCipher<SeededEnv>,
        token: Token,
    ) -> Vec<ResponderAction> {
        responder.handle(ResponderEvent::FrameReceived(request_body(cipher, token))).unwrap()
    }

    fn is_dropped(actions: &[ResponderAction]) -> bool {
        matches!(actions, [ResponderAction::Close { outcome: SessionOutcome::Dropped(_) }])
    }

    fn unframe(frame: &Bytes) -> &[u8] {
        let header =
            FrameHeader::from_bytes(frame[..FRAME_HEADER_SIZE].try_into().unwrap()).unwrap();
        assert_eq!(header.body_len(), frame.len() - FRAME_HEADER_SIZE);
        &frame[FRAME_HEADER_SIZE..]
    }

    fn open_token(cipher: &SessionCipher<SeededEnv>, frame: &Bytes) -> Token {
        match cipher.open(MessageKind::Token, unframe(frame)).unwrap() {
            Message::Token(token) => token,
            other => panic!("expected token, got {other:?}"),
        }
    }

    #[test]
    fn pull_with_data_sends_accept_size_payload() {
        let c = cipher();
        let mut responder = Responder::new(c.clone());

        let actions = receive(&mut responder, &c, Token::PullRequest);
        assert_eq!(actions, vec![ResponderAction::Decide(Request::Pull)]);

        let document = br#"{"Home":[{"reminder":"milk"}]}"#.to_vec();
        let actions = responder
            .handle(ResponderEvent::PullDecided { allowed: true, document: Some(document.clone()) })
            .unwrap();
        let [ResponderAction::SendFrame(accept), ResponderAction::SendFrame(size)] =
            actions.as_slice()
        else {
            panic!("unexpected actions {actions:?}");
        };
        assert_eq!(open_token(&c, accept), Token::Accept);
        let Message::SizeHeader(n) = c.open(MessageKind::SizeHeader, unframe(size)).unwrap() else {
            panic!("expected size header");
        };
        assert_eq!(responder.state(), &ResponderState::SendSize);

        let actions = responder.handle(ResponderEvent::FrameSent).unwrap();
        let [ResponderAction::SendPayload(payload)] = actions.as_slice() else {
            panic!("unexpected actions {actions:?}");
        };
        assert_eq!(payload.len() as u64, n);
        assert_eq!(c.open(MessageKind::Payload, payload).unwrap(), Message::Payload(document));

        let actions = responder.handle(ResponderEvent::FrameSent).unwrap();
        assert_eq!(actions, vec![ResponderAction::Close {
            outcome: SessionOutcome::Served { bytes: payload.len() }
        }]);
        assert!(responder.is_done());
    }

    #[test]
    fn pull_denied_rejects() {
        let c = cipher();
        let mut responder = Responder::new(c.clone());
        receive(&mut responder, &c, Token::PullRequest);

        let decision = ResponderEvent::PullDecided { allowed: false, document: None };
        let actions = responder.handle(decision).unwrap();
        let [ResponderAction::SendFrame(frame), ResponderAction::Close { outcome }] =
            actions.as_slice()
        else {
            panic!("unexpected actions {actions:?}");
        };
        assert_eq!(open_token(&c, frame), Token::Reject);
        assert_eq!(outcome, &SessionOutcome::Rejected(Request::Pull));
        assert!(responder.is_done());
    }

    #[test]
    fn pull_without_data_sends_no_data() {
        let c = cipher();
        let mut responder = Responder::new(c.clone());
        receive(&mut responder, &c, Token::PullRequest);

        let decision = ResponderEvent::PullDecided { allowed: true, document: None };
        let actions = responder.handle(decision).unwrap();
        let [ResponderAction::SendFrame(frame), ResponderAction::Close { outcome }] =
            actions.as_slice()
        else {
            panic!("unexpected actions {actions:?}");
        };
        assert_eq!(open_token(&c, frame), Token::NoData);
        assert_eq!(outcome, &SessionOutcome::NoData);
    }

    #[test]
    fn push_accepted_triggers_reverse_pull_after_accept() {
        let c = cipher();
        let mut responder = Responder::new(c.clone());
        let actions = receive(&mut responder, &c, Token::PushRequest);
        assert_eq!(actions, vec![ResponderAction::Decide(Request::Push)]);

        let actions = responder.handle(ResponderEvent::PushDecided { allowed: true }).unwrap();
        let [
            ResponderAction::SendFrame(frame),
            ResponderAction::ReversePull,
            ResponderAction::Close { outcome },
        ] = actions.as_slice()
        else {
            panic!("unexpected actions {actions:?}");
        };
        assert_eq!(open_token(&c, frame), Token::Accept);
        assert_eq!(outcome, &SessionOutcome::PushAccepted);
    }

    #[test]
    fn push_denied_rejects_without_reverse_pull() {
        let c = cipher();
        let mut responder = Responder::new(c.clone());
        receive(&mut responder, &c, Token::PushRequest);

        let actions = responder.handle(ResponderEvent::PushDecided { allowed: false }).unwrap();
        assert!(!actions.contains(&ResponderAction::ReversePull));
        let rejected = SessionOutcome::Rejected(Request::Push);
        assert!(actions.contains(&ResponderAction::Close { outcome: rejected }));
    }

    #[test]
    fn wrong_passphrase_is_dropped_silently() {
        let other = SessionCipher::new(Key::from_passphrase("not the secret"), SeededEnv::new(3));
        let mut responder = Responder::new(cipher());

        let actions = receive(&mut responder, &other, Token::PullRequest);
        assert!(is_dropped(&actions));
        assert!(responder.is_done());
    }

    #[test]
    fn non_request_token_is_dropped() {
        let c = cipher();
        let mut responder = Responder::new(c.clone());
        let actions = receive(&mut responder, &c, Token::Accept);
        assert!(is_dropped(&actions));
    }

    #[test]
    fn unknown_plaintext_is_dropped() {
        let c = cipher();
        let mut responder = Responder::new(c.clone());
        let body = c.seal(&Message::Payload(b"HELLO".to_vec())).unwrap();
        let actions = responder.handle(ResponderEvent::FrameReceived(body)).unwrap();
        assert!(is_dropped(&actions));
    }

    #[test]
    fn mismatched_decision_is_invalid_state() {
        let c = cipher();
        let mut responder = Responder::new(c.clone());
        receive(&mut responder, &c, Token::PullRequest);

        let result = responder.handle(ResponderEvent::PushDecided { allowed: true });
        assert!(matches!(result, Err(SyncError::InvalidState { .. })));
        assert!(responder.is_done());
    }
}
