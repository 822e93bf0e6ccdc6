//! Sans-IO sync sessions.
//!
//! A session is one TCP connection carrying one request. Both ends are pure
//! state machines: they consume events (bytes read, writes flushed,
//! decisions made) and return actions for a driver to perform. Neither
//! touches a socket, a clock or the store.
//!
//! ```text
//!   Requester
//!   Connect ──Connected──► SendRequest
//!   SendRequest ──FrameSent──► AwaitResponse
//!   AwaitResponse ──FrameReceived──► RecvSize
//!   RecvSize ──FrameReceived──► RecvPayload
//!   RecvPayload ──PayloadReceived──► Merge
//!   Merge ──Merged──► Done
//!
//!   Responder
//!   AwaitRequest ──FrameReceived──► Decide
//!   Decide ──PullDecided/PushDecided──► SendSize | Done
//!   SendSize ──FrameSent──► SendPayload
//!   SendPayload ──FrameSent──► Done
//! ```

mod requester;
mod responder;

use bytes::Bytes;
pub use requester::{Requester, RequesterAction, RequesterEvent, RequesterState};
pub use responder::{Responder, ResponderAction, ResponderEvent, ResponderState};
use todosync_crypto::{CipherError, Key, decrypt, encrypt};
use todosync_proto::{Message, MessageKind, Request, encode_frame};

use crate::{env::Environment, error::SyncError};

/// Encrypts outgoing and decrypts incoming messages for one session.
///
/// Every message gets a fresh IV from the environment.
#[derive(Clone)]
pub struct SessionCipher<E: Environment> {
    key: Key,
    env: E,
}

impl<E: Environment> SessionCipher<E> {
    /// Cipher over `key`, drawing IVs from `env`.
    pub fn new(key: Key, env: E) -> Self {
        Self { key, env }
    }

    /// Encrypt `message` to wire text.
    pub fn seal(&self, message: &Message) -> Result<Vec<u8>, CipherError> {
        encrypt(&self.key, &message.to_plaintext(), self.env.random_iv())
    }

    /// Encrypt `message` and wrap it in a frame.
    pub fn seal_frame(&self, message: &Message) -> Result<Bytes, SyncError> {
        Ok(encode_frame(&self.seal(message)?)?)
    }

    /// Decrypt `wire` and interpret it as a message of `kind`.
    pub fn open(&self, kind: MessageKind, wire: &[u8]) -> Result<Message, SyncError> {
        let plaintext = decrypt(&self.key, wire)?;
        Ok(Message::from_plaintext(kind, plaintext)?)
    }
}

impl<E: Environment> std::fmt::Debug for SessionCipher<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCipher").field("key", &self.key).finish_non_exhaustive()
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// A collection was transferred (encrypted size in bytes).
    Served {
        /// Encrypted payload length.
        bytes: usize,
    },
    /// The request was declined by policy.
    Rejected(Request),
    /// Pull allowed but nothing to send.
    NoData,
    /// Push invitation accepted.
    PushAccepted,
    /// Session abandoned without a reply.
    Dropped(String),
}

#[cfg(test)]
mod tests {
    use todosync_proto::Token;

    use super::*;
    use crate::env::test_env::SeededEnv;

    #[test]
    fn seal_open_token() {
        let cipher = SessionCipher::new(Key::from_passphrase("pw"), SeededEnv::new(1));
        let wire = cipher.seal(&Message::Token(Token::NoData)).unwrap();
        assert_eq!(cipher.open(MessageKind::Token, &wire).unwrap(), Message::Token(Token::NoData));
    }

    #[test]
    fn open_with_other_passphrase_fails() {
        let a = SessionCipher::new(Key::from_passphrase("pw"), SeededEnv::new(1));
        let b = SessionCipher::new(Key::from_passphrase("other"), SeededEnv::new(1));
        let wire = a.seal(&Message::Token(Token::Accept)).unwrap();
        assert!(matches!(b.open(MessageKind::Token, &wire), Err(SyncError::Cipher(_))));
    }

    #[test]
    fn fresh_iv_per_message() {
        let cipher = SessionCipher::new(Key::from_passphrase("pw"), SeededEnv::new(1));
        let a = cipher.seal(&Message::Token(Token::Accept)).unwrap();
        let b = cipher.seal(&Message::Token(Token::Accept)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn debug_hides_key() {
        let cipher = SessionCipher::new(Key::from_passphrase("pw"), SeededEnv::new(1));
        assert!(format!("{cipher:?}").contains("<redacted>"));
    }
}
