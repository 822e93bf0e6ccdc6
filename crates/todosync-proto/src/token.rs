//! The closed set of protocol tokens.

use std::fmt;

/// A fixed protocol message.
///
/// Tokens travel as their ASCII names, each independently encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token {
    /// Requester wants the responder's collection.
    PullRequest,
    /// Requester invites the responder to pull the requester's collection.
    PushRequest,
    /// Responder agrees to proceed.
    Accept,
    /// Responder declines (policy disabled).
    Reject,
    /// Responder agreed but has nothing to send.
    NoData,
}

impl Token {
    /// All tokens.
    pub const ALL: [Self; 5] =
        [Self::PushRequest, Self::PullRequest, Self::Reject, Self::Accept, Self::NoData];

    /// Wire name of the token.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PullRequest => "PULL_REQUEST",
            Self::PushRequest => "PUSH_REQUEST",
            Self::Accept => "ACCEPT",
            Self::Reject => "REJECT",
            Self::NoData => "NO_DATA",
        }
    }

    /// Parse decrypted bytes into a token.
    ///
    /// Returns `None` for anything that is not exactly one of the five
    /// names. Surrounding ASCII whitespace is ignored.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let trimmed = bytes.trim_ascii();
        Self::ALL.into_iter().find(|t| t.as_str().as_bytes() == trimmed)
    }

    /// The request this token opens a session with, if it is a request.
    pub const fn as_request(self) -> Option<Request> {
        match self {
            Self::PullRequest => Some(Request::Pull),
            Self::PushRequest => Some(Request::Push),
            Self::Accept | Self::Reject | Self::NoData => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two tokens that may open a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Request {
    /// `PULL_REQUEST`
    Pull,
    /// `PUSH_REQUEST`
    Push,
}

impl Request {
    /// Token sent on the wire for this request.
    pub const fn token(self) -> Token {
        match self {
            Self::Pull => Token::PullRequest,
            Self::Push => Token::PushRequest,
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.token().fmt(f)
    }
}
