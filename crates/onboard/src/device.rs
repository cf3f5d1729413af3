//! The device-side protocol state machine.
//!
//! A plain value: callers own the session lifecycle and must not share
//! one device between threads. The host layer in [`crate::session`]
//! adds the locking, conflict and timeout discipline.

use zeroize::Zeroizing;

use crate::error::{
    internal, invalid_encrypted_msg, invalid_msg, invalid_secret_or_msg_signature, parse_fatal,
    parse_fatal_or, protocol, OnboardError,
};
use crate::helpers::gen_nonce;
use crate::jose::{jwe_encrypt_dir, jws_sign_es256, Jwe, Jwk, Jws};
use crate::msgs::{
    DataMap, DeviceMsg, DeviceReady, Exchange, Hello, SessionSetup, NONCE_SIZE, SECRET_SIZE,
    SESSION_KEY_SIZE,
};

/// The device being configured and onboarded.
#[derive(Default)]
pub struct Device {
    onb_secret: Option<Zeroizing<Vec<u8>>>,
    onb_key: Option<p256::SecretKey>,
    nonce1: Option<Vec<u8>>,
    nonce2: Option<Vec<u8>>,
    sek: Option<Zeroizing<Vec<u8>>>,

    seq: u64,
    received_seq: u64,

    ready: bool,
}

impl Device {
    /// Creates a device with no secrets configured yet.
    pub fn new() -> Device {
        Device::default()
    }

    /// Sets the pre-shared onboarding secret.
    pub fn set_onboarding_secret(&mut self, s: &[u8]) -> Result<(), OnboardError> {
        if s.len() != SECRET_SIZE {
            return Err(internal("onboarding secret has the wrong size"));
        }
        self.onb_secret = Some(Zeroizing::new(s.to_vec()));
        Ok(())
    }

    /// Sets the device's ECDSA P-256 onboarding key.
    pub fn set_onboarding_device_key(&mut self, key: p256::SecretKey) {
        self.onb_key = Some(key);
    }

    /// Handles the configurator's `hello`.
    pub fn rcv_hello(&mut self, b: &[u8]) -> Result<(), OnboardError> {
        if let Some(fatal) = parse_fatal(b) {
            return Err(fatal);
        }
        let hello: Hello = serde_json::from_slice(b)
            .map_err(|e| invalid_msg(format!("can't deserialize hello: {e}")))?;
        if hello.m != "hello" {
            return Err(protocol("expected hello"));
        }
        if hello.n1.len() != NONCE_SIZE {
            return Err(protocol("nonce1 has the wrong size"));
        }
        self.nonce1 = Some(hello.n1);
        Ok(())
    }

    /// Composes the signed `device` message.
    pub fn device(&mut self) -> Result<Vec<u8>, OnboardError> {
        let onb_key = self
            .onb_key
            .as_ref()
            .ok_or_else(|| internal("onboarding device key must be set"))?;
        let nonce1 = self
            .nonce1
            .as_ref()
            .ok_or_else(|| protocol("nonce1 must have been received"))?;
        let nonce2 = gen_nonce()?;
        let msg = DeviceMsg {
            k: Jwk::from_public(&onb_key.public_key()),
            n1: nonce1.clone(),
            n2: nonce2.clone(),
        };
        let payload = serde_json::to_vec(&msg)
            .map_err(|e| internal(format!("can't serialize device: {e}")))?;
        let signed = jws_sign_es256(&payload, Some("device"), onb_key)
            .map_err(|e| internal(format!("can't sign device: {e}")))?;
        self.nonce2 = Some(nonce2);
        Ok(signed)
    }

    /// Handles the configurator's `session` setup message.
    pub fn rcv_session_setup(&mut self, b: &[u8]) -> Result<(), OnboardError> {
        let onb_secret = self
            .onb_secret
            .as_ref()
            .ok_or_else(|| internal("onboarding secret must be set"))?;
        let onb_key = self
            .onb_key
            .as_ref()
            .ok_or_else(|| internal("onboarding device key must be set"))?;
        let nonce2 = self
            .nonce2
            .as_ref()
            .ok_or_else(|| internal("nonce2 must have been sent"))?;

        let encrypted =
            Jwe::parse(b).map_err(|_| parse_fatal_or(b, invalid_msg("can't parse session")))?;
        if encrypted.msg_type().as_deref() != Some("session") {
            return Err(protocol("expected session"));
        }
        let hashed_bytes = encrypted
            .decrypt_ecdh_es(onb_key)
            .map_err(|_| invalid_encrypted_msg("can't decrypt session"))?;
        let hashed = Jws::parse(&hashed_bytes)
            .map_err(|_| invalid_msg("can't parse session hashing"))?;
        let payload = hashed.verify_hs256(onb_secret).map_err(|_| {
            invalid_secret_or_msg_signature("can't verify session against onboarding secret")
        })?;
        let setup: SessionSetup = serde_json::from_slice(&payload)
            .map_err(|_| invalid_msg("can't deserialize session"))?;
        if &setup.n2 != nonce2 {
            return Err(protocol("configurator didn't sign correct nonce"));
        }
        if setup.sek.len() != SESSION_KEY_SIZE {
            return Err(protocol("session key has the wrong size"));
        }
        self.sek = Some(Zeroizing::new(setup.sek));
        Ok(())
    }

    fn sess_encrypt(&self, m: &str, payload: &[u8]) -> Result<Vec<u8>, OnboardError> {
        let sek = self
            .sek
            .as_ref()
            .ok_or_else(|| protocol("session key must have been received"))?;
        jwe_encrypt_dir(payload, m, sek)
            .map_err(|e| internal(format!("can't encrypt {m}: {e}")))
    }

    fn sess_decrypt(&self, b: &[u8], m: &str) -> Result<Vec<u8>, OnboardError> {
        let sek = self
            .sek
            .as_ref()
            .ok_or_else(|| protocol("session key must have been received"))?;
        let encrypted = Jwe::parse(b)
            .map_err(|_| parse_fatal_or(b, invalid_msg(format!("can't parse {m}"))))?;
        if encrypted.msg_type().as_deref() != Some(m) {
            return Err(protocol(format!("expected {m}")));
        }
        encrypted
            .decrypt_dir(sek)
            .map_err(|_| invalid_encrypted_msg(format!("can't decrypt {m}")))
    }

    /// Composes the `ready` message, optionally carrying upfront device
    /// information.
    pub fn ready(&mut self, data: Option<DataMap>) -> Result<Vec<u8>, OnboardError> {
        let nonce1 = self
            .nonce1
            .as_ref()
            .ok_or_else(|| protocol("nonce1 must have been received"))?;
        let msg = DeviceReady {
            n1: nonce1.clone(),
            seq: self.seq + 1,
            d: data,
        };
        let payload = serde_json::to_vec(&msg)
            .map_err(|e| internal(format!("can't serialize ready: {e}")))?;
        let out = self.sess_encrypt("ready", &payload)?;
        self.seq += 1;
        Ok(out)
    }

    /// Handles a `cfg` message, returning its directives.
    pub fn rcv_cfg(&mut self, b: &[u8]) -> Result<DataMap, OnboardError> {
        let payload = self.sess_decrypt(b, "cfg")?;
        let exchange: Exchange = serde_json::from_slice(&payload)
            .map_err(|_| invalid_msg("can't deserialize cfg"))?;
        if exchange.seq != self.received_seq + 1 {
            return Err(protocol("out of sequence cfg"));
        }
        self.received_seq += 1;
        self.ready = true;
        Ok(exchange.d)
    }

    /// Composes a `reply` to the last received `cfg`.
    pub fn reply(&mut self, data: DataMap) -> Result<Vec<u8>, OnboardError> {
        if !self.ready {
            return Err(protocol("must have received cfg"));
        }
        let msg = Exchange {
            seq: self.seq + 1,
            d: data,
        };
        let payload = serde_json::to_vec(&msg)
            .map_err(|e| internal(format!("can't serialize reply: {e}")))?;
        let out = self.sess_encrypt("reply", &payload)?;
        self.seq += 1;
        Ok(out)
    }
}
