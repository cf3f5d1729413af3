//! The configurator-side protocol state machine.

use zeroize::Zeroizing;

use crate::error::{
    internal, invalid_device_key_or_msg_signature, invalid_encrypted_msg, invalid_msg,
    parse_fatal_or, protocol, OnboardError,
};
use crate::helpers::gen_nonce;
use crate::jose::{jwe_encrypt_dir, jwe_encrypt_ecdh_es, jws_sign_hs256, Jwe, Jws};
use crate::msgs::{
    DataMap, DeviceMsg, DeviceReady, Exchange, Hello, SessionSetup, NONCE_SIZE, SECRET_SIZE,
    SESSION_KEY_SIZE,
};

/// The operator tool configuring and onboarding a device.
#[derive(Default)]
pub struct Configurator {
    onb_secret: Option<Zeroizing<Vec<u8>>>,
    onb_dev_key: Option<p256::PublicKey>,
    nonce1: Option<Vec<u8>>,
    nonce2: Option<Vec<u8>>,
    sek: Option<Zeroizing<Vec<u8>>>,

    received_seq: u64,
    seq: u64,

    ready: bool,
}

impl Configurator {
    /// Creates a configurator with no secrets configured yet.
    pub fn new() -> Configurator {
        Configurator::default()
    }

    /// Sets the pre-shared onboarding secret.
    pub fn set_onboarding_secret(&mut self, s: &[u8]) -> Result<(), OnboardError> {
        if s.len() != SECRET_SIZE {
            return Err(internal("onboarding secret has the wrong size"));
        }
        self.onb_secret = Some(Zeroizing::new(s.to_vec()));
        Ok(())
    }

    /// Sets the device's public onboarding key, when known a priori.
    pub fn set_onboarding_device_key(&mut self, key: p256::PublicKey) {
        self.onb_dev_key = Some(key);
    }

    /// Composes the opening `hello`.
    pub fn hello(&mut self) -> Result<Vec<u8>, OnboardError> {
        let nonce1 = gen_nonce()?;
        let msg = Hello {
            m: "hello".to_string(),
            n1: nonce1.clone(),
        };
        let out = serde_json::to_vec(&msg)
            .map_err(|e| internal(format!("can't serialize hello: {e}")))?;
        self.nonce1 = Some(nonce1);
        Ok(out)
    }

    /// Handles the signed `device` message.
    ///
    /// When no device key was configured the advertised key is adopted
    /// after the signature verifies against it; otherwise the signature
    /// must verify against the configured key and the advertised key
    /// must match it.
    pub fn rcv_device(&mut self, b: &[u8]) -> Result<(), OnboardError> {
        let nonce1 = self
            .nonce1
            .as_ref()
            .ok_or_else(|| internal("nonce1 must have been sent"))?;
        let signed = Jws::parse(b)
            .map_err(|_| parse_fatal_or(b, invalid_msg("can't parse signed device")))?;
        if signed.msg_type().as_deref() != Some("device") {
            return Err(invalid_msg("invalid device message"));
        }
        let known_key = self.onb_dev_key.clone();
        let dev: DeviceMsg = match known_key {
            None => {
                let payload = signed
                    .payload_unverified()
                    .map_err(|e| invalid_msg(format!("can't deserialize device: {e}")))?;
                let dev: DeviceMsg = serde_json::from_slice(&payload)
                    .map_err(|e| invalid_msg(format!("can't deserialize device: {e}")))?;
                let advertised = dev.k.to_public().map_err(|_| {
                    invalid_device_key_or_msg_signature(
                        "device didn't advertise expected public key",
                    )
                })?;
                signed.verify_es256(&advertised).map_err(|e| {
                    invalid_device_key_or_msg_signature(format!(
                        "can't verify device signature: {e}"
                    ))
                })?;
                self.onb_dev_key = Some(advertised);
                dev
            }
            Some(known) => {
                let payload = signed.verify_es256(&known).map_err(|e| {
                    invalid_device_key_or_msg_signature(format!(
                        "can't verify device signature: {e}"
                    ))
                })?;
                let dev: DeviceMsg = serde_json::from_slice(&payload)
                    .map_err(|e| invalid_msg(format!("can't deserialize device: {e}")))?;
                let advertised = dev.k.to_public().map_err(|_| {
                    invalid_device_key_or_msg_signature(
                        "device didn't advertise expected public key",
                    )
                })?;
                if advertised != known {
                    return Err(invalid_device_key_or_msg_signature(
                        "device didn't advertise expected public key",
                    ));
                }
                dev
            }
        };
        if &dev.n1 != nonce1 {
            return Err(protocol("device didn't sign correct nonce"));
        }
        if dev.n2.len() != NONCE_SIZE {
            return Err(protocol("nonce2 has the wrong size"));
        }
        self.nonce2 = Some(dev.n2);
        Ok(())
    }

    /// Composes the `session` setup: a fresh session key MACed with the
    /// onboarding secret, encrypted to the device key.
    pub fn session_setup(&mut self) -> Result<Vec<u8>, OnboardError> {
        let onb_secret = self
            .onb_secret
            .as_ref()
            .ok_or_else(|| internal("onboarding secret must be set"))?;
        let dev_key = self
            .onb_dev_key
            .as_ref()
            .ok_or_else(|| internal("onboarding device key must be set"))?;
        let nonce2 = self
            .nonce2
            .as_ref()
            .ok_or_else(|| protocol("nonce2 must have been received"))?;

        let mut sek = vec![0u8; SESSION_KEY_SIZE];
        use rand::RngCore;
        rand::rngs::OsRng
            .try_fill_bytes(&mut sek)
            .map_err(|_| internal("cannot generate session key"))?;

        let setup = SessionSetup {
            sek: sek.clone(),
            n2: nonce2.clone(),
        };
        let payload = serde_json::to_vec(&setup)
            .map_err(|_| internal("can't serialize session"))?;
        let hashed = jws_sign_hs256(&payload, onb_secret)
            .map_err(|_| internal("can't hash session"))?;
        let encrypted = jwe_encrypt_ecdh_es(&hashed, "session", dev_key)
            .map_err(|_| internal("can't encrypt session"))?;
        self.sek = Some(Zeroizing::new(sek));
        Ok(encrypted)
    }

    fn sess_decrypt(&self, b: &[u8], m: &str) -> Result<Vec<u8>, OnboardError> {
        let sek = self
            .sek
            .as_ref()
            .ok_or_else(|| internal("session key must be established"))?;
        let encrypted = Jwe::parse(b)
            .map_err(|_| parse_fatal_or(b, invalid_msg(format!("can't parse {m}"))))?;
        if encrypted.msg_type().as_deref() != Some(m) {
            return Err(protocol(format!("expected {m}")));
        }
        encrypted
            .decrypt_dir(sek)
            .map_err(|_| invalid_encrypted_msg(format!("can't decrypt {m}")))
    }

    /// Handles the device's `ready`, returning its upfront data.
    pub fn rcv_ready(&mut self, b: &[u8]) -> Result<DataMap, OnboardError> {
        let payload = self.sess_decrypt(b, "ready")?;
        let ready: DeviceReady = serde_json::from_slice(&payload)
            .map_err(|_| invalid_msg("can't deserialize ready"))?;
        match &self.nonce1 {
            Some(nonce1) if &ready.n1 == nonce1 => {}
            _ => return Err(protocol("device didn't reply ready with correct nonce")),
        }
        if ready.seq != self.received_seq + 1 || self.received_seq != 0 {
            return Err(protocol("out of sequence ready"));
        }
        self.received_seq += 1;
        self.ready = true;
        Ok(ready.d.unwrap_or_default())
    }

    /// Composes a `cfg` message carrying configuration directives.
    pub fn cfg(&mut self, directives: DataMap) -> Result<Vec<u8>, OnboardError> {
        if !self.ready {
            return Err(protocol("must have received ready"));
        }
        let sek = self
            .sek
            .as_ref()
            .ok_or_else(|| internal("session key must be established"))?;
        let msg = Exchange {
            seq: self.seq + 1,
            d: directives,
        };
        let payload =
            serde_json::to_vec(&msg).map_err(|_| internal("can't serialize cfg"))?;
        let out = jwe_encrypt_dir(&payload, "cfg", sek)
            .map_err(|_| internal("can't encrypt cfg"))?;
        self.seq += 1;
        Ok(out)
    }

    /// Handles the device's `reply`, returning its data.
    pub fn rcv_reply(&mut self, b: &[u8]) -> Result<DataMap, OnboardError> {
        let payload = self.sess_decrypt(b, "reply")?;
        let exchange: Exchange = serde_json::from_slice(&payload)
            .map_err(|_| invalid_msg("can't deserialize reply"))?;
        if exchange.seq != self.received_seq + 1 {
            return Err(protocol("out of sequence reply"));
        }
        self.received_seq += 1;
        Ok(exchange.d)
    }
}
