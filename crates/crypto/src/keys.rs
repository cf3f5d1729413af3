//! Signing keys and their wire encodings.
//!
//! Keys and signatures travel as a one-byte algorithm tag followed by the
//! raw material. A public key's identity is the URL-safe unpadded base64
//! of the SHA3-384 over its encoded form; that string is what assertions
//! carry in `sign-key-sha3-384` and what `account-key` assertions use as
//! their primary key.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ed25519_dalek::{Signer as _, Verifier as _};
use rand::rngs::OsRng;
use sha3::{Digest, Sha3_384};

use crate::error::CryptoError;

/// Supported signature algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigAlgorithm {
    /// Ed25519 over the canonical signed content.
    Ed25519,
}

impl SigAlgorithm {
    const ED25519_TAG: u8 = 0x01;

    /// The one-byte wire tag of the algorithm.
    pub fn tag(self) -> u8 {
        match self {
            SigAlgorithm::Ed25519 => SigAlgorithm::ED25519_TAG,
        }
    }

    fn from_tag(tag: u8) -> Result<SigAlgorithm, CryptoError> {
        match tag {
            SigAlgorithm::ED25519_TAG => Ok(SigAlgorithm::Ed25519),
            other => Err(CryptoError::UnsupportedAlgorithm(other)),
        }
    }
}

/// A public verification key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    key: ed25519_dalek::VerifyingKey,
}

/// A private signing key. The underlying material is zeroized on drop.
#[derive(Clone)]
pub struct PrivateKey {
    key: ed25519_dalek::SigningKey,
}

/// A detached signature with its algorithm tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    alg: SigAlgorithm,
    bytes: Vec<u8>,
}

impl PublicKey {
    /// The algorithm this key verifies.
    pub fn algorithm(&self) -> SigAlgorithm {
        SigAlgorithm::Ed25519
    }

    /// Encodes the key as algorithm tag + raw material.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 32);
        out.push(self.algorithm().tag());
        out.extend_from_slice(self.key.as_bytes());
        out
    }

    /// Decodes a key from its tagged encoding.
    pub fn decode(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
        let (tag, material) = bytes
            .split_first()
            .ok_or_else(|| CryptoError::InvalidKey("empty key document".into()))?;
        SigAlgorithm::from_tag(*tag)?;
        let raw: [u8; 32] = material
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("unexpected key length {}", material.len())))?;
        let key = ed25519_dalek::VerifyingKey::from_bytes(&raw)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(PublicKey { key })
    }

    /// The SHA3-384 key id, URL-safe base64 without padding.
    pub fn id(&self) -> String {
        let mut hasher = Sha3_384::new();
        hasher.update(self.encode());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }

    /// Verifies a signature over `content`.
    pub fn verify(&self, content: &[u8], sig: &Signature) -> Result<(), CryptoError> {
        match sig.alg {
            SigAlgorithm::Ed25519 => {
                let sig = ed25519_dalek::Signature::from_slice(&sig.bytes)
                    .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
                self.key
                    .verify(content, &sig)
                    .map_err(|_| CryptoError::VerificationFailed)
            }
        }
    }
}

impl PrivateKey {
    /// Generates a fresh Ed25519 key from the system CSPRNG.
    pub fn generate() -> PrivateKey {
        PrivateKey {
            key: ed25519_dalek::SigningKey::generate(&mut OsRng),
        }
    }

    /// Rebuilds a key from a 32-byte seed.
    pub fn from_seed(seed: &[u8]) -> Result<PrivateKey, CryptoError> {
        let raw: [u8; 32] = seed
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("unexpected seed length {}", seed.len())))?;
        Ok(PrivateKey {
            key: ed25519_dalek::SigningKey::from_bytes(&raw),
        })
    }

    /// The matching public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            key: self.key.verifying_key(),
        }
    }

    /// The key id of the matching public key.
    pub fn id(&self) -> String {
        self.public_key().id()
    }

    /// Signs `content`.
    pub fn sign(&self, content: &[u8]) -> Signature {
        Signature {
            alg: SigAlgorithm::Ed25519,
            bytes: self.key.sign(content).to_bytes().to_vec(),
        }
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey").field("id", &self.id()).finish()
    }
}

impl Signature {
    /// The signature algorithm.
    pub fn algorithm(&self) -> SigAlgorithm {
        self.alg
    }

    /// Encodes as a single URL-safe unpadded base64 line, covering the
    /// algorithm tag and the raw signature.
    pub fn encode_base64(&self) -> String {
        let mut tagged = Vec::with_capacity(1 + self.bytes.len());
        tagged.push(self.alg.tag());
        tagged.extend_from_slice(&self.bytes);
        URL_SAFE_NO_PAD.encode(tagged)
    }

    /// Decodes a signature line produced by [`Signature::encode_base64`].
    pub fn decode_base64(s: &str) -> Result<Signature, CryptoError> {
        let tagged = URL_SAFE_NO_PAD
            .decode(s.trim_end_matches('\n'))
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
        let (tag, bytes) = tagged
            .split_first()
            .ok_or_else(|| CryptoError::InvalidSignature("empty signature".into()))?;
        let alg = SigAlgorithm::from_tag(*tag)?;
        if bytes.len() != 64 {
            return Err(CryptoError::InvalidSignature(format!(
                "unexpected signature length {}",
                bytes.len()
            )));
        }
        Ok(Signature {
            alg,
            bytes: bytes.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_round_trip() {
        let key = PrivateKey::generate();
        let sig = key.sign(b"content");
        key.public_key().verify(b"content", &sig).unwrap();
        assert!(key.public_key().verify(b"tampered", &sig).is_err());
    }

    #[test]
    fn public_key_encoding_round_trip() {
        let key = PrivateKey::generate();
        let pk = key.public_key();
        let decoded = PublicKey::decode(&pk.encode()).unwrap();
        assert_eq!(decoded, pk);
        assert_eq!(decoded.id(), pk.id());
    }

    #[test]
    fn key_id_is_sha3_384_base64() {
        let key = PrivateKey::generate();
        // 48 bytes of digest encode to 64 unpadded base64 chars
        assert_eq!(key.id().len(), 64);
        assert!(!key.id().contains('='));
    }

    #[test]
    fn signature_base64_round_trip() {
        let key = PrivateKey::generate();
        let sig = key.sign(b"payload");
        let line = sig.encode_base64();
        assert!(!line.contains('\n'));
        let decoded = Signature::decode_base64(&line).unwrap();
        assert_eq!(decoded, sig);
    }

    #[test]
    fn signature_rejects_unknown_tag() {
        let bogus = URL_SAFE_NO_PAD.encode([0x7fu8; 65]);
        assert!(matches!(
            Signature::decode_base64(&bogus),
            Err(CryptoError::UnsupportedAlgorithm(0x7f))
        ));
    }

    #[test]
    fn from_seed_is_deterministic() {
        let seed = [7u8; 32];
        let k1 = PrivateKey::from_seed(&seed).unwrap();
        let k2 = PrivateKey::from_seed(&seed).unwrap();
        assert_eq!(k1.id(), k2.id());
    }
}
