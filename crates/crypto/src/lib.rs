//! # assertd crypto
//!
//! Signing keys, SHA3-384 identities and the keypair manager behind the
//! trust database. Panics are disallowed in non-test code to promote
//! robust error handling.
#![cfg_attr(
    not(test),
    deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)
)]

pub mod digest;
pub mod error;
pub mod keys;
pub mod manager;

pub use error::CryptoError;
pub use keys::{PrivateKey, PublicKey, SigAlgorithm, Signature};
pub use manager::{KeypairManager, MemoryKeypairManager};
