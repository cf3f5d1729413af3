//! The JOSE profile used by the onboarding protocol.
//!
//! Exactly what the six messages need, in flattened JSON serialization:
//! JWS with ES256 (device identity) and HS256 (onboarding secret), JWE
//! with ECDH-ES key agreement or direct mode, always A256GCM content
//! encryption, and P-256 JWKs. The protected header carries the message
//! type under `m` and doubles as the AEAD associated data.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::msgs::b64;

type HmacSha256 = Hmac<Sha256>;

const GCM_IV_SIZE: usize = 12;
const GCM_TAG_SIZE: usize = 16;
const CEK_SIZE: usize = 32;

fn enc(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

fn dec(s: &str) -> Result<Vec<u8>, String> {
    URL_SAFE_NO_PAD
        .decode(s.as_bytes())
        .map_err(|e| format!("invalid base64: {e}"))
}

/// A P-256 public key in JWK form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Jwk {
    kty: String,
    crv: String,
    #[serde(with = "b64")]
    x: Vec<u8>,
    #[serde(with = "b64")]
    y: Vec<u8>,
}

impl Jwk {
    pub(crate) fn from_public(key: &p256::PublicKey) -> Jwk {
        let point = key.to_encoded_point(false);
        Jwk {
            kty: "EC".to_string(),
            crv: "P-256".to_string(),
            x: point.x().map(|x| x.to_vec()).unwrap_or_default(),
            y: point.y().map(|y| y.to_vec()).unwrap_or_default(),
        }
    }

    pub(crate) fn to_public(&self) -> Result<p256::PublicKey, String> {
        if self.kty != "EC" || self.crv != "P-256" {
            return Err(format!("unsupported key type {}/{}", self.kty, self.crv));
        }
        if self.x.len() != 32 || self.y.len() != 32 {
            return Err("invalid P-256 coordinates".to_string());
        }
        let point = p256::EncodedPoint::from_affine_coordinates(
            p256::FieldBytes::from_slice(&self.x),
            p256::FieldBytes::from_slice(&self.y),
            false,
        );
        Option::from(p256::PublicKey::from_encoded_point(&point))
            .ok_or_else(|| "point is not on the P-256 curve".to_string())
    }
}

#[derive(Serialize, Deserialize)]
struct JoseHeader {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    m: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    epk: Option<Jwk>,
}

fn header_b64(header: &JoseHeader) -> Result<String, String> {
    serde_json::to_vec(header)
        .map(|bytes| enc(&bytes))
        .map_err(|e| format!("can't serialize protected header: {e}"))
}

/// A parsed flattened-JSON JWS.
#[derive(Serialize, Deserialize)]
pub(crate) struct Jws {
    payload: String,
    protected: String,
    signature: String,
}

impl Jws {
    pub(crate) fn parse(b: &[u8]) -> Result<Jws, String> {
        let jws: Jws = serde_json::from_slice(b).map_err(|e| format!("invalid JWS: {e}"))?;
        if jws.protected.is_empty() {
            return Err("missing protected header".to_string());
        }
        Ok(jws)
    }

    fn header(&self) -> Result<JoseHeader, String> {
        let raw = dec(&self.protected)?;
        serde_json::from_slice(&raw).map_err(|e| format!("invalid protected header: {e}"))
    }

    /// The `m` value of the protected header, if any.
    pub(crate) fn msg_type(&self) -> Option<String> {
        self.header().ok().and_then(|h| h.m)
    }

    /// The payload without signature verification; used to read the
    /// advertised device key before verifying against it.
    pub(crate) fn payload_unverified(&self) -> Result<Vec<u8>, String> {
        dec(&self.payload)
    }

    fn signing_input(&self) -> String {
        format!("{}.{}", self.protected, self.payload)
    }

    pub(crate) fn verify_es256(&self, key: &p256::PublicKey) -> Result<Vec<u8>, String> {
        let header = self.header()?;
        if header.alg != "ES256" {
            return Err(format!("unexpected JWS algorithm {:?}", header.alg));
        }
        let sig_bytes = dec(&self.signature)?;
        let sig = p256::ecdsa::Signature::from_slice(&sig_bytes)
            .map_err(|e| format!("invalid signature: {e}"))?;
        let verifier = p256::ecdsa::VerifyingKey::from(key.clone());
        verifier
            .verify(self.signing_input().as_bytes(), &sig)
            .map_err(|_| "signature verification failed".to_string())?;
        dec(&self.payload)
    }

    pub(crate) fn verify_hs256(&self, secret: &[u8]) -> Result<Vec<u8>, String> {
        let header = self.header()?;
        if header.alg != "HS256" {
            return Err(format!("unexpected JWS algorithm {:?}", header.alg));
        }
        let sig = dec(&self.signature)?;
        let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
            .map_err(|e| format!("invalid MAC key: {e}"))?;
        mac.update(self.signing_input().as_bytes());
        mac.verify_slice(&sig)
            .map_err(|_| "MAC verification failed".to_string())?;
        dec(&self.payload)
    }
}

pub(crate) fn jws_sign_es256(
    payload: &[u8],
    m: Option<&str>,
    key: &p256::SecretKey,
) -> Result<Vec<u8>, String> {
    let header = JoseHeader {
        alg: "ES256".to_string(),
        enc: None,
        m: m.map(str::to_string),
        epk: None,
    };
    let protected = header_b64(&header)?;
    let payload = enc(payload);
    let input = format!("{protected}.{payload}");
    let signer = p256::ecdsa::SigningKey::from(key.clone());
    let sig: p256::ecdsa::Signature = signer.sign(input.as_bytes());
    let jws = Jws {
        payload,
        protected,
        signature: enc(sig.to_bytes().as_slice()),
    };
    serde_json::to_vec(&jws).map_err(|e| format!("can't serialize JWS: {e}"))
}

pub(crate) fn jws_sign_hs256(payload: &[u8], secret: &[u8]) -> Result<Vec<u8>, String> {
    let header = JoseHeader {
        alg: "HS256".to_string(),
        enc: None,
        m: None,
        epk: None,
    };
    let protected = header_b64(&header)?;
    let payload = enc(payload);
    let input = format!("{protected}.{payload}");
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(secret).map_err(|e| format!("invalid MAC key: {e}"))?;
    mac.update(input.as_bytes());
    let jws = Jws {
        payload,
        protected,
        signature: enc(mac.finalize().into_bytes().as_slice()),
    };
    serde_json::to_vec(&jws).map_err(|e| format!("can't serialize JWS: {e}"))
}

/// Single-round Concat KDF (SHA-256) for ECDH-ES direct key agreement;
/// one round suffices for a 256-bit content key.
fn concat_kdf_sha256(z: &[u8], alg: &str, keylen: usize) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(1u32.to_be_bytes());
    hasher.update(z);
    hasher.update((alg.len() as u32).to_be_bytes());
    hasher.update(alg.as_bytes());
    hasher.update(0u32.to_be_bytes()); // apu
    hasher.update(0u32.to_be_bytes()); // apv
    hasher.update(((keylen * 8) as u32).to_be_bytes());
    let digest = hasher.finalize();
    digest.as_slice()[..keylen].to_vec()
}

/// A parsed flattened-JSON JWE.
#[derive(Serialize, Deserialize)]
pub(crate) struct Jwe {
    protected: String,
    #[serde(default)]
    encrypted_key: String,
    iv: String,
    ciphertext: String,
    tag: String,
}

impl Jwe {
    pub(crate) fn parse(b: &[u8]) -> Result<Jwe, String> {
        let jwe: Jwe = serde_json::from_slice(b).map_err(|e| format!("invalid JWE: {e}"))?;
        if jwe.protected.is_empty() {
            return Err("missing protected header".to_string());
        }
        Ok(jwe)
    }

    fn header(&self) -> Result<JoseHeader, String> {
        let raw = dec(&self.protected)?;
        serde_json::from_slice(&raw).map_err(|e| format!("invalid protected header: {e}"))
    }

    /// The `m` value of the protected header, if any.
    pub(crate) fn msg_type(&self) -> Option<String> {
        self.header().ok().and_then(|h| h.m)
    }

    fn open(&self, cek: &[u8]) -> Result<Vec<u8>, String> {
        let iv = dec(&self.iv)?;
        if iv.len() != GCM_IV_SIZE {
            return Err("invalid IV length".to_string());
        }
        let mut combined = dec(&self.ciphertext)?;
        let tag = dec(&self.tag)?;
        if tag.len() != GCM_TAG_SIZE {
            return Err("invalid tag length".to_string());
        }
        combined.extend_from_slice(&tag);
        let cipher =
            Aes256Gcm::new_from_slice(cek).map_err(|e| format!("invalid content key: {e}"))?;
        cipher
            .decrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &combined,
                    aad: self.protected.as_bytes(),
                },
            )
            .map_err(|_| "decryption failed".to_string())
    }

    fn check_enc(&self, header: &JoseHeader) -> Result<(), String> {
        match header.enc.as_deref() {
            Some("A256GCM") => Ok(()),
            other => Err(format!("unexpected content encryption {other:?}")),
        }
    }

    pub(crate) fn decrypt_dir(&self, sek: &[u8]) -> Result<Vec<u8>, String> {
        let header = self.header()?;
        if header.alg != "dir" {
            return Err(format!("unexpected JWE algorithm {:?}", header.alg));
        }
        self.check_enc(&header)?;
        self.open(sek)
    }

    pub(crate) fn decrypt_ecdh_es(&self, key: &p256::SecretKey) -> Result<Vec<u8>, String> {
        let header = self.header()?;
        if header.alg != "ECDH-ES" {
            return Err(format!("unexpected JWE algorithm {:?}", header.alg));
        }
        self.check_enc(&header)?;
        let epk = header
            .epk
            .as_ref()
            .ok_or_else(|| "missing ephemeral key".to_string())?
            .to_public()?;
        let shared = p256::ecdh::diffie_hellman(key.to_nonzero_scalar(), epk.as_affine());
        let cek = concat_kdf_sha256(shared.raw_secret_bytes().as_slice(), "A256GCM", CEK_SIZE);
        self.open(&cek)
    }
}

fn seal(header: JoseHeader, cek: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, String> {
    let protected = header_b64(&header)?;
    let mut iv = [0u8; GCM_IV_SIZE];
    OsRng
        .try_fill_bytes(&mut iv)
        .map_err(|e| format!("can't generate IV: {e}"))?;
    let cipher =
        Aes256Gcm::new_from_slice(cek).map_err(|e| format!("invalid content key: {e}"))?;
    let mut sealed = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: plaintext,
                aad: protected.as_bytes(),
            },
        )
        .map_err(|_| "encryption failed".to_string())?;
    let tag = sealed.split_off(sealed.len() - GCM_TAG_SIZE);
    let jwe = Jwe {
        protected,
        encrypted_key: String::new(),
        iv: enc(&iv),
        ciphertext: enc(&sealed),
        tag: enc(&tag),
    };
    serde_json::to_vec(&jwe).map_err(|e| format!("can't serialize JWE: {e}"))
}

pub(crate) fn jwe_encrypt_dir(plaintext: &[u8], m: &str, sek: &[u8]) -> Result<Vec<u8>, String> {
    let header = JoseHeader {
        alg: "dir".to_string(),
        enc: Some("A256GCM".to_string()),
        m: Some(m.to_string()),
        epk: None,
    };
    seal(header, sek, plaintext)
}

pub(crate) fn jwe_encrypt_ecdh_es(
    plaintext: &[u8],
    m: &str,
    recipient: &p256::PublicKey,
) -> Result<Vec<u8>, String> {
    let eph = p256::ecdh::EphemeralSecret::random(&mut OsRng);
    let shared = eph.diffie_hellman(recipient);
    let cek = concat_kdf_sha256(shared.raw_secret_bytes().as_slice(), "A256GCM", CEK_SIZE);
    let header = JoseHeader {
        alg: "ECDH-ES".to_string(),
        enc: Some("A256GCM".to_string()),
        m: Some(m.to_string()),
        epk: Some(Jwk::from_public(&eph.public_key())),
    };
    seal(header, &cek, plaintext)
}
