//! Tagged message envelope.

use crate::{ProtoError, Token};

/// Which message the reader expects next.
///
/// Chosen from protocol state, never inferred from content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// One of the five protocol tokens.
    Token,
    /// Decimal byte length of the encrypted payload that follows.
    SizeHeader,
    /// Serialized collection document.
    Payload,
}

/// A decrypted protocol message.
#[derive(Clone, PartialEq, Eq)]
pub enum Message {
    /// Protocol token
    Token(Token),
    /// Byte length of the encrypted payload
    SizeHeader(u64),
    /// Collection document (JSON)
    Payload(Vec<u8>),
}

impl Message {
    /// Kind of this message.
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Token(_) => MessageKind::Token,
            Self::SizeHeader(_) => MessageKind::SizeHeader,
            Self::Payload(_) => MessageKind::Payload,
        }
    }

    /// Plaintext bytes to hand to the cipher.
    pub fn to_plaintext(&self) -> Vec<u8> {
        match self {
            Self::Token(token) => token.as_str().as_bytes().to_vec(),
            Self::SizeHeader(size) => size.to_string().into_bytes(),
            Self::Payload(document) => document.clone(),
        }
    }

    /// Interpret decrypted `plaintext` as a message of `kind`.
    pub fn from_plaintext(kind: MessageKind, plaintext: Vec<u8>) -> Result<Self, ProtoError> {
        let lossy = |bytes: &[u8]| String::from_utf8_lossy(bytes).into_owned();
        match kind {
            MessageKind::Token => Token::parse(&plaintext)
                .map(Self::Token)
                .ok_or_else(|| ProtoError::UnknownToken(lossy(&plaintext))),
            MessageKind::SizeHeader => {
                let text = std::str::from_utf8(&plaintext)
                    .map_err(|_| ProtoError::InvalidSizeHeader(lossy(&plaintext)))?;
                text.trim()
                    .parse::<u64>()
                    .map(Self::SizeHeader)
                    .map_err(|_| ProtoError::InvalidSizeHeader(text.to_string()))
            },
            MessageKind::Payload => Ok(Self::Payload(plaintext)),
        }
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token(token) => f.debug_tuple("Token").field(token).finish(),
            Self::SizeHeader(size) => f.debug_tuple("SizeHeader").field(size).finish(),
            Self::Payload(document) => write!(f, "Payload(<{} bytes>)", document.len()),
        }
    }
}
