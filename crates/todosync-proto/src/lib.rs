//! todosync wire protocol.
//!
//! The vocabulary, framing and payload model shared by both sides of a sync
//! session.
//!
//! ## Wire Layout
//!
//! ```text
//! frame   := len:u32 (big-endian) || body[len]
//! body    := base64(iv || ciphertext || tag)
//!
//! requester                          responder
//!   frame(PULL_REQUEST)      ──►
//!                            ◄──     frame(ACCEPT | REJECT | NO_DATA)
//!                            ◄──     frame(size N)            (ACCEPT only)
//!                            ◄──     body[N]                  (raw, unframed)
//! ```
//!
//! Which [`Message`] variant a frame decodes to is decided by the protocol
//! state of the reader, never by looking at the bytes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod frame;
pub mod message;
pub mod model;
pub mod token;

pub use errors::ProtoError;
pub use frame::{
    FRAME_HEADER_SIZE, FrameHeader, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE, encode_frame, payload_len,
};
pub use message::{Message, MessageKind};
pub use model::{Collection, Priority, SortKey, Todo, TodoList};
pub use token::{Request, Token};
