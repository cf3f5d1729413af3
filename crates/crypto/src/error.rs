//! Error types for the assertd crypto crate.

use thiserror::Error;

/// Errors from key handling, signing and verification.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key material could not be decoded.
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// A signature could not be decoded.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    /// Signature verification failed.
    #[error("signature verification failed")]
    VerificationFailed,
    /// The algorithm tag is not one this build understands.
    #[error("unsupported signature algorithm: {0:#x}")]
    UnsupportedAlgorithm(u8),
    /// The keypair manager has no key under the given id.
    #[error("cannot find key pair with key id {0:?}")]
    KeyNotFound(String),
    /// The keypair manager has no key under the given name.
    #[error("cannot find key pair named {0:?}")]
    KeyNameNotFound(String),
    /// A key with the same id or name is already stored.
    #[error("key pair with key id {0:?} already exists")]
    KeyExists(String),
    /// An I/O failure while digesting a file.
    #[error("cannot read file to digest: {0}")]
    Io(#[from] std::io::Error),
}
