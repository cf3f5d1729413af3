//! The `store` assertion, describing a store and its friendly stores.

use chrono::{DateTime, Utc};

use assertd_types::Headers;

use crate::headers_check::{
    check_nonempty_string, check_optional_string_list, check_rfc3339,
};

/// Decoded details of a `store` assertion.
#[derive(Debug, Clone)]
pub struct StoreDetails {
    /// The store's name, the primary key.
    pub store: String,
    /// The account operating the store.
    pub operator_id: String,
    /// Stores whose content this store also exposes.
    pub friendly_stores: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

pub(crate) fn validate_store(headers: &Headers, _body: &[u8]) -> Result<StoreDetails, String> {
    Ok(StoreDetails {
        store: check_nonempty_string(headers, "store")?.to_string(),
        operator_id: check_nonempty_string(headers, "operator-id")?.to_string(),
        friendly_stores: check_optional_string_list(headers, "friendly-stores")?
            .unwrap_or_default(),
        timestamp: check_rfc3339(headers, "timestamp")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertd_types::codec::parse_headers;

    #[test]
    fn store_fields() {
        let headers = parse_headers(
            "store: substore\noperator-id: canonical\nfriendly-stores:\n  - a-store\n  - store1\ntimestamp: 2018-09-12T12:00:00Z",
        )
        .unwrap();
        let s = validate_store(&headers, b"").unwrap();
        assert_eq!(s.store, "substore");
        assert_eq!(s.friendly_stores, vec!["a-store", "store1"]);
    }

    #[test]
    fn friendly_stores_must_be_a_list() {
        let headers =
            parse_headers("store: substore\noperator-id: canonical\nfriendly-stores: foo\ntimestamp: 2018-09-12T12:00:00Z")
                .unwrap();
        assert_eq!(
            validate_store(&headers, b"").unwrap_err(),
            "\"friendly-stores\" header must be a list of strings"
        );
    }
}
