//! Random material generation for onboarding sessions.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{internal, OnboardError};
use crate::msgs::{NONCE_SIZE, SECRET_SIZE};

/// Generates a fresh 16-byte nonce from the system CSPRNG.
pub fn gen_nonce() -> Result<Vec<u8>, OnboardError> {
    let mut n = vec![0u8; NONCE_SIZE];
    OsRng
        .try_fill_bytes(&mut n)
        .map_err(|e| internal(format!("can't generate nonce: {e}")))?;
    Ok(n)
}

/// Generates a fresh 32-byte onboarding secret from the system CSPRNG.
pub fn gen_secret() -> Result<Vec<u8>, OnboardError> {
    let mut s = vec![0u8; SECRET_SIZE];
    OsRng
        .try_fill_bytes(&mut s)
        .map_err(|e| internal(format!("can't generate onboarding secret: {e}")))?;
    Ok(s)
}

/// Generates a fresh ECDSA P-256 device onboarding key.
pub fn gen_device_key() -> p256::SecretKey {
    p256::SecretKey::random(&mut OsRng)
}
