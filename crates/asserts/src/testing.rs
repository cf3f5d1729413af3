//! Test fixtures: self-signed trusted authorities and signing helpers.
//!
//! These are plain library code so integration suites in other crates
//! can build realistic trust setups without private access.

use chrono::Utc;

use assertd_crypto::PrivateKey;
use assertd_types::time::format_rfc3339;
use assertd_types::{HeaderValue, Headers};

use crate::assert::{assemble, Assertion};

/// A signing identity: an authority id plus its private key.
pub struct Signer {
    pub authority_id: String,
    pub key: PrivateKey,
}

impl Signer {
    /// Creates a fresh signer for `authority_id`.
    pub fn new(authority_id: &str) -> Signer {
        Signer {
            authority_id: authority_id.to_string(),
            key: PrivateKey::generate(),
        }
    }

    /// Signs headers and body as this authority. `authority-id` and
    /// `type` are filled in when absent.
    pub fn sign(&self, type_name: &str, mut headers: Headers, body: &[u8]) -> Assertion {
        headers
            .entry("type".to_string())
            .or_insert_with(|| HeaderValue::Str(type_name.to_string()));
        headers
            .entry("authority-id".to_string())
            .or_insert_with(|| HeaderValue::Str(self.authority_id.clone()));
        match assemble(headers, body, &self.key) {
            Ok(a) => a,
            Err(e) => panic!("cannot sign test assertion: {e}"),
        }
    }
}

/// A trusted root: a store-like authority with a self-signed account
/// and account-key, as configured into a database's trusted set.
pub struct StoreStack {
    pub signer: Signer,
    /// The authority's `account` assertion.
    pub account: Assertion,
    /// The authority's self-signed `account-key` assertion.
    pub account_key: Assertion,
}

impl StoreStack {
    /// Builds a trusted authority named `authority_id`.
    pub fn new(authority_id: &str) -> StoreStack {
        let signer = Signer::new(authority_id);
        let account = signer.sign(
            "account",
            headers(&[
                ("account-id", authority_id),
                ("display-name", authority_id),
                ("validation", "certified"),
                ("timestamp", "2015-01-01T00:00:00Z"),
            ]),
            b"",
        );
        let key_headers = headers(&[
            ("account-id", authority_id),
            ("public-key-sha3-384", &signer.key.id()),
            ("since", "2015-01-01T00:00:00Z"),
        ]);
        let account_key = signer.sign("account-key", key_headers, &signer.key.public_key().encode());
        StoreStack {
            signer,
            account,
            account_key,
        }
    }

    /// The assertions to configure as a database's trusted set.
    pub fn trusted(&self) -> Vec<Assertion> {
        vec![self.account.clone(), self.account_key.clone()]
    }
}

/// Builds the `account` and `account-key` assertions for a third party,
/// signed by `authority`, plus the signer for that party.
pub fn third_party(authority: &StoreStack, account_id: &str) -> (Signer, Vec<Assertion>) {
    let signer = Signer::new(account_id);
    let account = authority.signer.sign(
        "account",
        headers(&[
            ("account-id", account_id),
            ("display-name", account_id),
            ("validation", "unknown"),
            ("timestamp", "2016-01-01T00:00:00Z"),
        ]),
        b"",
    );
    let account_key = authority.signer.sign(
        "account-key",
        headers(&[
            ("account-id", account_id),
            ("public-key-sha3-384", &signer.key.id()),
            ("since", "2016-01-01T00:00:00Z"),
        ]),
        &signer.key.public_key().encode(),
    );
    (signer, vec![account, account_key])
}

/// Builds a scalar-only header map.
pub fn headers(pairs: &[(&str, &str)]) -> Headers {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), HeaderValue::Str(v.to_string())))
        .collect()
}

/// The current time in the wire format, for timestamp headers.
pub fn now_header() -> String {
    format_rfc3339(Utc::now())
}
