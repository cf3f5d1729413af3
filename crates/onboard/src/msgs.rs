//! The six onboarding message bodies.
//!
//! The `m` discriminator travels in the JSON body for plaintext
//! messages and in the JOSE protected header for wrapped ones. Binary
//! fields are URL-safe base64 without padding.

use serde::{Deserialize, Serialize};

use crate::jose::Jwk;

pub(crate) const NONCE_SIZE: usize = 16;
pub(crate) const SECRET_SIZE: usize = 32;
pub(crate) const SESSION_KEY_SIZE: usize = 32;

/// Free-form configuration directives or data.
pub type DataMap = serde_json::Map<String, serde_json::Value>;

pub(crate) mod b64 {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&URL_SAFE_NO_PAD.encode(v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        URL_SAFE_NO_PAD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// `hello`, plaintext, from the configurator.
#[derive(Serialize, Deserialize)]
pub(crate) struct Hello {
    pub m: String,
    #[serde(with = "b64")]
    pub n1: Vec<u8>,
}

/// `device`, JWS-signed by the device onboarding key.
#[derive(Serialize, Deserialize)]
pub(crate) struct DeviceMsg {
    /// The device's advertised public key.
    pub k: Jwk,
    #[serde(with = "b64")]
    pub n1: Vec<u8>,
    #[serde(with = "b64")]
    pub n2: Vec<u8>,
}

/// `session`, MACed with the onboarding secret then encrypted to the
/// device key.
#[derive(Serialize, Deserialize)]
pub(crate) struct SessionSetup {
    #[serde(with = "b64")]
    pub sek: Vec<u8>,
    #[serde(with = "b64")]
    pub n2: Vec<u8>,
}

/// `ready`, first session-key encrypted message, from the device.
#[derive(Serialize, Deserialize)]
pub(crate) struct DeviceReady {
    #[serde(with = "b64")]
    pub n1: Vec<u8>,
    pub seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<DataMap>,
}

/// `cfg` from the configurator, `reply` from the device.
#[derive(Serialize, Deserialize)]
pub(crate) struct Exchange {
    pub seq: u64,
    pub d: DataMap,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_fields_are_base64url_without_padding() {
        let hello = Hello {
            m: "hello".into(),
            n1: vec![0xff; NONCE_SIZE],
        };
        let json = serde_json::to_string(&hello).unwrap();
        assert!(json.contains("\"n1\":\"_____________________w\""));
        assert!(!json.contains('='));

        let back: Hello = serde_json::from_str(&json).unwrap();
        assert_eq!(back.n1, hello.n1);
    }

    #[test]
    fn ready_omits_empty_data() {
        let ready = DeviceReady {
            n1: vec![1; NONCE_SIZE],
            seq: 1,
            d: None,
        };
        let json = serde_json::to_string(&ready).unwrap();
        assert!(!json.contains("\"d\""));
    }
}
