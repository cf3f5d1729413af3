//! Tooling to sign assertions from operator-supplied statements.
//!
//! A statement is a JSON or YAML document holding either the header
//! fields directly or `{headers: {...}, body: "..."}`. The signer is
//! named either by an account-key assertion blob or by a key id plus
//! optional authority id.

use std::collections::HashMap;

use thiserror::Error;

use assertd_crypto::KeypairManager;
use assertd_types::{HeaderValue, Headers};

use crate::assert::AssertError;
use crate::db::{Database, DatabaseConfig, DbError};
use crate::registry::type_by_name;

/// The supported media types for statement input.
pub const JSON_INPUT: &str = "application/json";
/// See [`JSON_INPUT`].
pub const YAML_INPUT: &str = "application/x-yaml";

/// Errors from the sign tool.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The request was malformed.
    #[error("{0}")]
    Request(String),
    /// The statement could not be parsed in its media type.
    #[error("cannot parse the assertion input as {media}: {msg}")]
    Statement {
        /// `JSON` or `YAML`.
        media: &'static str,
        /// The parser's complaint.
        msg: String,
    },
    /// Signing or validation failed downstream.
    #[error(transparent)]
    Db(#[from] DbError),
    /// Decoding the account-key handle failed.
    #[error("cannot parse handle account-key: {0}")]
    Handle(AssertError),
}

/// The complete input for signing an assertion.
#[derive(Default)]
pub struct SignRequest {
    /// The signing key given as the text of an account-key assertion.
    pub account_key: Option<Vec<u8>>,
    /// Or the signing key id,
    pub key_id: Option<String>,
    /// with an optional account id of the signer; headers are consulted
    /// when left out.
    pub authority_id: Option<String>,

    /// The assertion type, as a string.
    pub assertion_type: String,
    /// Media type of `statement`: [`JSON_INPUT`] or [`YAML_INPUT`].
    pub statement_media_type: String,
    /// The statement document.
    pub statement: Vec<u8>,

    /// Header values overriding the statement; the key `body` overrides
    /// the body and must be a string.
    pub overrides: HashMap<String, serde_json::Value>,

    /// The revision of the new assertion; 0 leaves it unset.
    pub revision: i64,
}

fn parse_statement(req: &SignRequest) -> Result<serde_json::Value, ToolError> {
    match req.statement_media_type.as_str() {
        JSON_INPUT => serde_json::from_slice(&req.statement).map_err(|e| ToolError::Statement {
            media: "JSON",
            msg: e.to_string(),
        }),
        YAML_INPUT => {
            let doc: serde_yaml::Value =
                serde_yaml::from_slice(&req.statement).map_err(|e| ToolError::Statement {
                    media: "YAML",
                    msg: e.to_string(),
                })?;
            serde_json::to_value(doc).map_err(|e| ToolError::Statement {
                media: "YAML",
                msg: e.to_string(),
            })
        }
        other => Err(ToolError::Request(format!(
            "unsupported media type for assertion input: {other:?}"
        ))),
    }
}

fn headers_from_json(obj: &serde_json::Map<String, serde_json::Value>) -> Result<Headers, ToolError> {
    let mut headers = Headers::new();
    for (k, v) in obj {
        let value = HeaderValue::from_json(v)
            .map_err(|e| ToolError::Request(format!("invalid header {k:?}: {e}")))?;
        headers.insert(k.clone(), value);
    }
    Ok(headers)
}

/// Produces the text of a signed assertion as specified by `req`,
/// signing with a key from `keypair_mgr`.
pub fn sign(req: &SignRequest, keypair_mgr: Box<dyn KeypairManager>) -> Result<Vec<u8>, ToolError> {
    if type_by_name(&req.assertion_type).is_none() {
        return Err(ToolError::Request(format!(
            "invalid assertion type: {:?}",
            req.assertion_type
        )));
    }
    if req.revision < 0 {
        return Err(ToolError::Request(
            "assertion revision cannot be negative".to_string(),
        ));
    }
    if req.account_key.is_none() && req.key_id.is_none() {
        return Err(ToolError::Request(
            "both account-key and key id were not specified".to_string(),
        ));
    }

    let statement = parse_statement(req)?;
    let obj = statement.as_object().ok_or_else(|| ToolError::Request(
        "assertion input must be a map".to_string(),
    ))?;
    // either a nested {headers, body} statement or flat headers
    let (mut headers, mut body) = match obj.get("headers") {
        Some(serde_json::Value::Object(hdrs)) => {
            let body = match obj.get("body") {
                None | Some(serde_json::Value::Null) => Vec::new(),
                Some(serde_json::Value::String(s)) => s.clone().into_bytes(),
                Some(other) => {
                    return Err(ToolError::Request(format!(
                        "body must be a string: {other}"
                    )))
                }
            };
            (headers_from_json(hdrs)?, body)
        }
        _ => (headers_from_json(obj)?, Vec::new()),
    };

    let mut key_id = req.key_id.clone();
    let mut authority_id = req.authority_id.clone();

    if let Some(handle) = &req.account_key {
        if key_id.is_some() || authority_id.is_some() {
            return Err(ToolError::Request(
                "cannot mix specifying an account-key together with key id and/or authority-id"
                    .to_string(),
            ));
        }
        let a = crate::assert::decode(handle).map_err(ToolError::Handle)?;
        let account_key = a.account_key().ok_or_else(|| {
            ToolError::Request(format!(
                "cannot use handle account-key, not actually an account-key, got: {}",
                a.assert_type().name
            ))
        })?;
        key_id = Some(account_key.public_key_sha3_384.clone());
        authority_id = Some(account_key.account_id.clone());
    }

    if let Some(authority_id) = &authority_id {
        headers.insert(
            "authority-id".to_string(),
            HeaderValue::Str(authority_id.clone()),
        );
    }
    if !headers.contains_key("authority-id") {
        return Err(ToolError::Request(
            "cannot sign assertion with unspecified signer identifier (aka authority-id)"
                .to_string(),
        ));
    }

    if req.revision != 0 {
        headers.insert(
            "revision".to_string(),
            HeaderValue::Str(req.revision.to_string()),
        );
    }

    for (k, v) in &req.overrides {
        if k == "body" {
            match v {
                serde_json::Value::String(s) => body = s.clone().into_bytes(),
                other => {
                    return Err(ToolError::Request(format!(
                        "body override must be a string: {other}"
                    )))
                }
            }
            continue;
        }
        let value = HeaderValue::from_json(v)
            .map_err(|e| ToolError::Request(format!("invalid override {k:?}: {e}")))?;
        headers.insert(k.clone(), value);
    }

    let key_id = key_id.ok_or_else(|| {
        ToolError::Request("both account-key and key id were not specified".to_string())
    })?;

    let db = Database::open(DatabaseConfig {
        keypair_manager: keypair_mgr,
        ..DatabaseConfig::default()
    })?;
    let assertion = db.sign(&req.assertion_type, headers, &body, &key_id)?;
    Ok(assertion.encode())
}
