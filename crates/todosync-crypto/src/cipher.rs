//! Passphrase-keyed AES-256-CBC with an HMAC-SHA256 tag.
//!
//! # Wire Layout
//!
//! ```text
//! base64( iv[16] || ciphertext[16 * n] || tag[32] )
//! ```
//!
//! The result is text-safe so that tokens, size headers and payloads share a
//! single encode/decode path.

use aes::Aes256;
use base64::{Engine, engine::general_purpose::STANDARD};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroize;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Size of the initialization vector prepended to every ciphertext.
pub const IV_SIZE: usize = BLOCK_SIZE;

/// Size of the HMAC-SHA256 tag appended to every ciphertext.
pub const TAG_SIZE: usize = 32;

/// Domain separation label for the MAC key.
const MAC_KEY_LABEL: &[u8] = b"todosync mac v1";

/// Smallest decoded message: IV, one padded block, tag.
const MIN_DECODED_LEN: usize = IV_SIZE + BLOCK_SIZE + TAG_SIZE;

/// Errors from cipher operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    /// Input was not valid base64.
    #[error("invalid transport encoding: {0}")]
    Encoding(String),

    /// Decoded input is too short or not block aligned.
    #[error("malformed ciphertext: {len} bytes")]
    Malformed {
        /// Decoded length in bytes.
        len: usize,
    },

    /// Tag did not verify (wrong key or tampered message).
    #[error("authentication tag mismatch")]
    TagMismatch,

    /// PKCS#7 padding was invalid after decryption.
    #[error("invalid padding")]
    Padding,

    /// MAC could not be initialized.
    #[error("MAC initialization failed")]
    Mac,
}

/// Symmetric key derived from a passphrase.
///
/// Holds the AES-256 key (SHA-256 of the passphrase) and a MAC key derived
/// from it. Both are wiped on drop. The `Debug` impl never prints key bytes.
#[derive(Clone)]
pub struct Key {
    enc: [u8; 32],
    mac: [u8; 32],
}

impl Key {
    /// Derive the key for `passphrase`.
    ///
    /// Any passphrase length, including empty, maps to exactly one 32-byte
    /// key.
    pub fn from_passphrase(passphrase: &str) -> Self {
        let enc: [u8; 32] = Sha256::digest(passphrase.as_bytes()).into();
        let mac: [u8; 32] =
            Sha256::new().chain_update(MAC_KEY_LABEL).chain_update(enc).finalize().into();
        Self { enc, mac }
    }

    /// Raw AES key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.enc
    }

    fn tag(&self, iv: &[u8], ciphertext: &[u8]) -> Result<HmacSha256, CipherError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.mac).map_err(|_| CipherError::Mac)?;
        mac.update(iv);
        mac.update(ciphertext);
        Ok(mac)
    }
}

impl Drop for Key {
    fn drop(&mut self) {
        self.enc.zeroize();
        self.mac.zeroize();
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Key").field("enc", &"<redacted>").field("mac", &"<redacted>").finish()
    }
}

/// Encrypt `plaintext` under `key` with the caller-provided `iv`.
///
/// The IV must be fresh random bytes for every call; reusing an IV leaks
/// equality of plaintext prefixes.
pub fn encrypt(key: &Key, plaintext: &[u8], iv: [u8; IV_SIZE]) -> Result<Vec<u8>, CipherError> {
    let ciphertext = Aes256CbcEnc::new(key.as_bytes().into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    let tag = key.tag(&iv, &ciphertext)?.finalize().into_bytes();

    let mut raw = Vec::with_capacity(IV_SIZE + ciphertext.len() + TAG_SIZE);
    raw.extend_from_slice(&iv);
    raw.extend_from_slice(&ciphertext);
    raw.extend_from_slice(&tag);

    Ok(STANDARD.encode(raw).into_bytes())
}

/// Decrypt a message produced by [`encrypt`].
///
/// # Errors
///
/// Fails on bad encoding, short or misaligned input, tag mismatch (which
/// includes a key derived from a different passphrase), and bad padding.
pub fn decrypt(key: &Key, wire: &[u8]) -> Result<Vec<u8>, CipherError> {
    let raw = STANDARD.decode(wire.trim_ascii()).map_err(|e| CipherError::Encoding(e.to_string()))?;

    if raw.len() < MIN_DECODED_LEN || (raw.len() - IV_SIZE - TAG_SIZE) % BLOCK_SIZE != 0 {
        return Err(CipherError::Malformed { len: raw.len() });
    }

    let (iv, rest) = raw.split_at(IV_SIZE);
    let (ciphertext, tag) = rest.split_at(rest.len() - TAG_SIZE);

    key.tag(iv, ciphertext)?.verify_slice(tag).map_err(|_| CipherError::TagMismatch)?;

    let iv: [u8; IV_SIZE] = iv.try_into().map_err(|_| CipherError::Malformed { len: raw.len() })?;
    Aes256CbcDec::new(key.as_bytes().into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CipherError::Padding)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const IV: [u8; IV_SIZE] = [7u8; IV_SIZE];

    #[test]
    fn key_is_sha256_of_passphrase() {
        let key = Key::from_passphrase("BewareTheBlackGuardian");
        let expected: [u8; 32] = Sha256::digest(b"BewareTheBlackGuardian").into();
        assert_eq!(key.as_bytes(), &expected);
    }

    #[test]
    fn empty_and_long_passphrases_yield_full_keys() {
        let empty = Key::from_passphrase("");
        let long = Key::from_passphrase(&"x".repeat(10_000));
        assert_eq!(empty.as_bytes().len(), 32);
        assert_ne!(empty.as_bytes(), long.as_bytes());
    }

    #[test]
    fn output_is_base64_text() {
        let key = Key::from_passphrase("secret");
        let wire = encrypt(&key, b"PULL_REQUEST", IV).unwrap();
        assert!(wire.iter().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'=')));
    }

    #[test]
    fn iv_is_prepended() {
        let key = Key::from_passphrase("secret");
        let wire = encrypt(&key, b"ACCEPT", IV).unwrap();
        let raw = STANDARD.decode(&wire).unwrap();
        assert_eq!(&raw[..IV_SIZE], &IV);
        assert_eq!(raw.len(), IV_SIZE + BLOCK_SIZE + TAG_SIZE);
    }

    #[test]
    fn different_ivs_give_different_ciphertexts() {
        let key = Key::from_passphrase("secret");
        let a = encrypt(&key, b"ACCEPT", [1u8; IV_SIZE]).unwrap();
        let b = encrypt(&key, b"ACCEPT", [2u8; IV_SIZE]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let key = Key::from_passphrase("secret");
        let wire = encrypt(&key, b"", IV).unwrap();
        assert_eq!(decrypt(&key, &wire).unwrap(), b"");
    }

    #[test]
    fn garbage_is_rejected() {
        let key = Key::from_passphrase("secret");
        assert!(matches!(decrypt(&key, b"not base64 at all!"), Err(CipherError::Encoding(_))));
        assert!(matches!(decrypt(&key, b"AAAA"), Err(CipherError::Malformed { len: 3 })));
    }

    #[test]
    fn misaligned_ciphertext_is_rejected() {
        let key = Key::from_passphrase("secret");
        let raw = vec![0u8; IV_SIZE + BLOCK_SIZE + 3 + TAG_SIZE];
        let wire = STANDARD.encode(raw);
        assert!(matches!(decrypt(&key, wire.as_bytes()), Err(CipherError::Malformed { .. })));
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let key = Key::from_passphrase("secret");
        let wire = encrypt(&key, b"NO_DATA", IV).unwrap();
        let mut raw = STANDARD.decode(&wire).unwrap();
        raw[IV_SIZE] ^= 0x01;
        let tampered = STANDARD.encode(raw);
        assert_eq!(decrypt(&key, tampered.as_bytes()), Err(CipherError::TagMismatch));
    }

    #[test]
    fn trailing_newline_is_tolerated() {
        let key = Key::from_passphrase("secret");
        let mut wire = encrypt(&key, b"REJECT", IV).unwrap();
        wire.push(b'\n');
        assert_eq!(decrypt(&key, &wire).unwrap(), b"REJECT");
    }

    #[test]
    fn debug_redacts_key() {
        let key = Key::from_passphrase("secret");
        assert_eq!(format!("{key:?}"), r#"Key { enc: "<redacted>", mac: "<redacted>" }"#);
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            passphrase in ".{0,64}",
            message in prop::collection::vec(any::<u8>(), 0..2048),
            iv in any::<[u8; IV_SIZE]>(),
        ) {
            let key = Key::from_passphrase(&passphrase);
            let wire = encrypt(&key, &message, iv).unwrap();
            prop_assert_eq!(decrypt(&key, &wire).unwrap(), message);
        }

        #[test]
        fn prop_wrong_passphrase_fails(
            a in "[a-z]{1,32}",
            b in "[A-Z]{1,32}",
            message in prop::collection::vec(any::<u8>(), 0..512),
            iv in any::<[u8; IV_SIZE]>(),
        ) {
            let wire = encrypt(&Key::from_passphrase(&a), &message, iv).unwrap();
            prop_assert!(decrypt(&Key::from_passphrase(&b), &wire).is_err());
        }
    }
}
