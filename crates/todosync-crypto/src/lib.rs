//! todosync Cryptographic Primitives
//!
//! This crate provides the symmetric cipher shared by both ends of a sync
//! session.
//!
//! # Design
//!
//! All functions in this crate are pure. The initialization vector required
//! for encryption must be provided by the caller, enabling:
//!
//! - Deterministic testing with seeded RNG
//! - Sans-IO architecture compatibility
//! - No coupling to application-level abstractions
//!
//! # Security Properties
//!
//! - Confidentiality: AES-256-CBC with a fresh IV per message
//! - Integrity: HMAC-SHA256 over `iv || ciphertext` (encrypt-then-MAC)
//! - No forward secrecy and no peer authentication beyond knowledge of the
//!   shared passphrase

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod cipher;

pub use cipher::{BLOCK_SIZE, CipherError, IV_SIZE, Key, TAG_SIZE, decrypt, encrypt};
