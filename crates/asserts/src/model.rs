//! The `model` assertion, describing a device class.

use chrono::{DateTime, Utc};

use assertd_types::Headers;

use crate::headers_check::{
    check_nonempty_string, check_optional_nonempty_string, check_rfc3339,
};

/// Decoded details of a `model` assertion.
#[derive(Debug, Clone)]
pub struct ModelDetails {
    pub series: String,
    /// The brand account owning the model.
    pub brand_id: String,
    pub model: String,
    /// The store the device is scoped to, when any.
    pub store: Option<String>,
    pub architecture: String,
    pub kernel: Option<String>,
    pub gadget: Option<String>,
    pub base: Option<String>,
    pub timestamp: DateTime<Utc>,
}

pub(crate) fn validate_model(headers: &Headers, _body: &[u8]) -> Result<ModelDetails, String> {
    Ok(ModelDetails {
        series: check_nonempty_string(headers, "series")?.to_string(),
        brand_id: check_nonempty_string(headers, "brand-id")?.to_string(),
        model: check_nonempty_string(headers, "model")?.to_string(),
        store: check_optional_nonempty_string(headers, "store")?.map(str::to_string),
        architecture: check_nonempty_string(headers, "architecture")?.to_string(),
        kernel: check_optional_nonempty_string(headers, "kernel")?.map(str::to_string),
        gadget: check_optional_nonempty_string(headers, "gadget")?.map(str::to_string),
        base: check_optional_nonempty_string(headers, "base")?.map(str::to_string),
        timestamp: check_rfc3339(headers, "timestamp")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertd_types::codec::parse_headers;

    #[test]
    fn model_fields() {
        let headers = parse_headers(
            "series: 16\nbrand-id: my-brand\nmodel: my-model\nstore: substore\narchitecture: armhf\nkernel: krnl\ngadget: gadget\ntimestamp: 2018-09-12T12:00:00Z",
        )
        .unwrap();
        let m = validate_model(&headers, b"").unwrap();
        assert_eq!(m.brand_id, "my-brand");
        assert_eq!(m.store.as_deref(), Some("substore"));
        assert_eq!(m.architecture, "armhf");
    }

    #[test]
    fn architecture_is_mandatory() {
        let headers = parse_headers(
            "series: 16\nbrand-id: my-brand\nmodel: my-model\ntimestamp: 2018-09-12T12:00:00Z",
        )
        .unwrap();
        assert_eq!(
            validate_model(&headers, b"").unwrap_err(),
            "\"architecture\" header is mandatory"
        );
    }
}
