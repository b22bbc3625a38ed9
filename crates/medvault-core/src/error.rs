//! Error types for the vault core.

use thiserror::Error;

/// Errors raised by the cryptographic primitives.
///
/// Failures are always signalled; nothing here degrades silently.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("encryption error: {0}")]
    Encryption(String),

    /// Key mismatch or corrupted ciphertext.
    #[error("decryption error: {0}")]
    Decryption(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
