//! Production Environment implementation over the OS RNG.

use todosync_core::Environment;

/// Production environment using cryptographic RNG.
///
/// # Security
///
/// The RNG uses `getrandom`, i.e. OS-level cryptographic randomness. Every
/// cipher IV comes from here.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).unwrap_or_else(|e| {
            // An all-zero IV still decrypts; it only loses unlinkability.
            tracing::error!("getrandom failed: {}", e);
            buffer.fill(0);
        });
    }
}
