//! `account` and `account-key` assertions.
//!
//! Accounts name the actors of the system; account keys bind a public
//! key to an account for a validity window. The key document itself is
//! the assertion body and must match the fingerprint primary key.

use chrono::{DateTime, Utc};

use assertd_crypto::PublicKey;
use assertd_types::Headers;

use crate::headers_check::{
    check_nonempty_string, check_optional_string, check_rfc3339, VALID_KEY_NAME,
};

/// Decoded details of an `account` assertion.
#[derive(Debug, Clone)]
pub struct AccountDetails {
    /// The account's id, the primary key.
    pub account_id: String,
    /// Human-facing name.
    pub display_name: String,
    /// The account's validation tier, e.g. `unknown` or `certified`.
    pub validation: String,
    pub timestamp: DateTime<Utc>,
}

pub(crate) fn validate_account(headers: &Headers, _body: &[u8]) -> Result<AccountDetails, String> {
    Ok(AccountDetails {
        account_id: check_nonempty_string(headers, "account-id")?.to_string(),
        display_name: check_nonempty_string(headers, "display-name")?.to_string(),
        validation: check_nonempty_string(headers, "validation")?.to_string(),
        timestamp: check_rfc3339(headers, "timestamp")?,
    })
}

/// Decoded details of an `account-key` assertion.
#[derive(Debug, Clone)]
pub struct AccountKeyDetails {
    /// The key id, the primary key of the assertion.
    pub public_key_sha3_384: String,
    /// The account the key belongs to.
    pub account_id: String,
    /// Optional operator-facing key name.
    pub name: Option<String>,
    /// Start of the key's validity window.
    pub since: DateTime<Utc>,
    /// Exclusive end of the validity window; `None` means open-ended.
    pub until: Option<DateTime<Utc>>,
    /// The decoded public key carried in the body.
    pub public_key: PublicKey,
}

impl AccountKeyDetails {
    /// Whether the key's validity window covers `t`.
    pub fn valid_at(&self, t: DateTime<Utc>) -> bool {
        t >= self.since && self.until.map_or(true, |until| t < until)
    }
}

pub(crate) fn validate_account_key(
    headers: &Headers,
    body: &[u8],
) -> Result<AccountKeyDetails, String> {
    let account_id = check_nonempty_string(headers, "account-id")?.to_string();
    let name = match check_optional_string(headers, "name")? {
        None => None,
        Some(s) => {
            if !VALID_KEY_NAME.is_match(s) {
                return Err(format!("\"name\" header contains invalid characters: {s:?}"));
            }
            Some(s.to_string())
        }
    };
    let since = check_rfc3339(headers, "since")?;
    let until = match headers.get("until") {
        None => None,
        Some(_) => Some(check_rfc3339(headers, "until")?),
    };
    if let Some(until) = until {
        if until < since {
            return Err("'until' time cannot be before 'since' time".to_string());
        }
    }

    if body.is_empty() {
        return Err("empty public key document".to_string());
    }
    let public_key =
        PublicKey::decode(body).map_err(|e| format!("cannot decode public key: {e}"))?;
    let declared = check_nonempty_string(headers, "public-key-sha3-384")?;
    if public_key.id() != declared {
        return Err("public key does not match provided key id".to_string());
    }

    Ok(AccountKeyDetails {
        public_key_sha3_384: declared.to_string(),
        account_id,
        name,
        since,
        until,
        public_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertd_crypto::PrivateKey;
    use assertd_types::time::parse_rfc3339;
    use assertd_types::HeaderValue;

    fn key_headers(key: &PrivateKey) -> Headers {
        let mut h = Headers::new();
        h.insert("account-id".into(), "acc-id1".into());
        h.insert(
            "public-key-sha3-384".into(),
            HeaderValue::Str(key.public_key().id()),
        );
        h.insert("since".into(), "2020-01-01T00:00:00Z".into());
        h
    }

    #[test]
    fn account_key_decodes_body_key() {
        let key = PrivateKey::generate();
        let details = validate_account_key(&key_headers(&key), &key.public_key().encode()).unwrap();
        assert_eq!(details.account_id, "acc-id1");
        assert_eq!(details.public_key_sha3_384, key.public_key().id());
        assert!(details.until.is_none());
    }

    #[test]
    fn account_key_fingerprint_must_match() {
        let key = PrivateKey::generate();
        let other = PrivateKey::generate();
        let err = validate_account_key(&key_headers(&key), &other.public_key().encode()).unwrap_err();
        assert_eq!(err, "public key does not match provided key id");
    }

    #[test]
    fn account_key_window_ordering() {
        let key = PrivateKey::generate();
        let mut h = key_headers(&key);
        h.insert("until".into(), "2019-01-01T00:00:00Z".into());
        let err = validate_account_key(&h, &key.public_key().encode()).unwrap_err();
        assert_eq!(err, "'until' time cannot be before 'since' time");
    }

    #[test]
    fn account_key_name_characters() {
        let key = PrivateKey::generate();
        let mut h = key_headers(&key);
        h.insert("name".into(), "-bad-".into());
        let err = validate_account_key(&h, &key.public_key().encode()).unwrap_err();
        assert_eq!(err, "\"name\" header contains invalid characters: \"-bad-\"");
    }

    #[test]
    fn validity_window_is_since_inclusive_until_exclusive() {
        let key = PrivateKey::generate();
        let mut h = key_headers(&key);
        h.insert("until".into(), "2021-01-01T00:00:00Z".into());
        let details = validate_account_key(&h, &key.public_key().encode()).unwrap();
        assert!(details.valid_at(parse_rfc3339("2020-01-01T00:00:00Z").unwrap()));
        assert!(details.valid_at(parse_rfc3339("2020-06-01T00:00:00Z").unwrap()));
        assert!(!details.valid_at(parse_rfc3339("2021-01-01T00:00:00Z").unwrap()));
        assert!(!details.valid_at(parse_rfc3339("2019-12-31T23:59:59Z").unwrap()));
    }

    #[test]
    fn account_fields() {
        let mut h = Headers::new();
        h.insert("account-id".into(), "acc-id1".into());
        h.insert("display-name".into(), "Account One".into());
        h.insert("validation".into(), "certified".into());
        h.insert("timestamp".into(), "2024-01-01T00:00:00Z".into());
        let details = validate_account(&h, b"").unwrap();
        assert_eq!(details.validation, "certified");

        h.remove("display-name");
        assert_eq!(
            validate_account(&h, b"").unwrap_err(),
            "\"display-name\" header is mandatory"
        );
    }
}
