//! The assertion value, decoding and assembly.
//!
//! A decoded assertion keeps the exact signed-content bytes it arrived
//! with, so re-encoding is bit-exact regardless of how the producer
//! ordered its headers. Assembly (used when signing) serializes headers
//! canonically and then runs the decoded-form validation on its own
//! output, so everything that leaves here upholds the same invariants.

use chrono::{DateTime, Utc};
use thiserror::Error;

use assertd_crypto::{digest, CryptoError, PrivateKey, Signature};
use assertd_types::codec::{parse_headers, serialize_headers};
use assertd_types::{HeaderValue, Headers};

use crate::account::{AccountDetails, AccountKeyDetails};
use crate::headers_check::{check_nonempty_string, check_optional_int_min};
use crate::model::ModelDetails;
use crate::registry::{type_by_name, AssertionType, RELEASE_SERIES};
use crate::snap_asserts::{
    BaseDeclarationDetails, SnapBuildDetails, SnapDeclarationDetails, SnapDeveloperDetails,
    SnapRevisionDetails, ValidationDetails,
};
use crate::store_assert::StoreDetails;

/// Errors from decoding, validating or assembling assertions.
#[derive(Debug, Error)]
pub enum AssertError {
    /// The byte structure of the assertion was invalid.
    #[error("{0}")]
    Format(String),
    /// The `type` header names no registered assertion type.
    #[error("unknown assertion type: {0:?}")]
    UnknownType(String),
    /// A type-level header or body check failed.
    #[error("assertion {typ}: {msg}")]
    Check {
        /// The assertion type being decoded.
        typ: &'static str,
        /// What was wrong.
        msg: String,
    },
    /// A cryptographic operation failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// A `(type, primary-key)` pointer at an assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ref {
    /// The referenced assertion type.
    pub assert_type: &'static AssertionType,
    /// The primary-key values, in the type's declared order.
    pub primary_key: Vec<String>,
}

impl Ref {
    /// A stable string form usable as a storage key.
    pub fn unique_id(&self) -> String {
        let mut id = String::from(self.assert_type.name);
        for comp in &self.primary_key {
            id.push('/');
            id.push_str(comp);
        }
        id
    }
}

impl std::fmt::Display for Ref {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.assert_type.name, self.primary_key.join("; "))
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Details {
    Account(AccountDetails),
    AccountKey(AccountKeyDetails),
    SnapDeclaration(SnapDeclarationDetails),
    SnapBuild(SnapBuildDetails),
    SnapRevision(SnapRevisionDetails),
    Validation(ValidationDetails),
    SnapDeveloper(SnapDeveloperDetails),
    BaseDeclaration(BaseDeclarationDetails),
    Model(ModelDetails),
    Store(StoreDetails),
}

/// An immutable, decoded assertion.
#[derive(Debug, Clone)]
pub struct Assertion {
    typ: &'static AssertionType,
    headers: Headers,
    body: Vec<u8>,
    content: Vec<u8>,
    sig_encoded: String,
    signature: Option<Signature>,
    details: Details,
}

impl Assertion {
    /// The assertion's registered type.
    pub fn assert_type(&self) -> &'static AssertionType {
        self.typ
    }

    /// Looks up a header value.
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    /// Looks up a scalar header value.
    pub fn header_string(&self, name: &str) -> Option<&str> {
        self.header(name).and_then(HeaderValue::as_str)
    }

    /// All headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The signer's account id.
    pub fn authority_id(&self) -> &str {
        self.header_string("authority-id").unwrap_or("")
    }

    /// The assertion revision; 0 when not set.
    pub fn revision(&self) -> i64 {
        self.header_string("revision")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    /// The declared format version; 0 when not set.
    pub fn format(&self) -> i32 {
        self.header_string("format")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    /// Whether this implementation understands the declared format.
    pub fn supported_format(&self) -> bool {
        self.format() <= self.typ.max_supported_format
    }

    /// The `timestamp` header, when present and well-formed.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.header_string("timestamp")
            .and_then(|s| assertd_types::time::parse_rfc3339(s).ok())
    }

    /// The id of the key that signed this assertion.
    pub fn sign_key_sha3_384(&self) -> &str {
        self.header_string("sign-key-sha3-384").unwrap_or("")
    }

    /// The assertion body; empty for most types.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The canonical signed-content bytes.
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// The decoded detached signature; `None` only for builtin,
    /// unsigned assertions.
    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    /// Re-encodes the assertion; for decoded assertions this is
    /// bit-identical to the input.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.content.len() + 2 + self.sig_encoded.len());
        out.extend_from_slice(&self.content);
        out.extend_from_slice(b"\n\n");
        out.extend_from_slice(self.sig_encoded.as_bytes());
        out
    }

    /// The storage identity: SHA3-384 over content and signature.
    pub fn unique_digest(&self) -> String {
        let mut data = self.content.clone();
        data.extend_from_slice(self.sig_encoded.as_bytes());
        digest::sha3_384_base64(&data)
    }

    /// The primary-key values in the type's declared order.
    pub fn primary_key(&self) -> Vec<String> {
        self.typ
            .primary_key
            .iter()
            .map(|k| self.header_string(k).unwrap_or("").to_string())
            .collect()
    }

    /// A reference to this assertion.
    pub fn to_ref(&self) -> Ref {
        Ref {
            assert_type: self.typ,
            primary_key: self.primary_key(),
        }
    }

    /// The references this assertion requires to be present before it
    /// can be accepted.
    pub fn prerequisites(&self) -> Vec<Ref> {
        let account_ref = |id: &str| Ref {
            assert_type: &crate::registry::ACCOUNT_TYPE,
            primary_key: vec![id.to_string()],
        };
        let decl_ref = |series: &str, snap_id: &str| Ref {
            assert_type: &crate::registry::SNAP_DECLARATION_TYPE,
            primary_key: vec![series.to_string(), snap_id.to_string()],
        };
        match &self.details {
            Details::Account(_) | Details::BaseDeclaration(_) | Details::SnapBuild(_) => vec![],
            Details::AccountKey(key) => vec![account_ref(&key.account_id)],
            Details::SnapDeclaration(decl) => vec![account_ref(&decl.publisher_id)],
            Details::SnapRevision(rev) => vec![
                decl_ref(RELEASE_SERIES, &rev.snap_id),
                account_ref(&rev.developer_id),
            ],
            Details::Validation(v) => vec![
                decl_ref(&v.series, &v.snap_id),
                decl_ref(&v.series, &v.approved_snap_id),
            ],
            Details::SnapDeveloper(dev) => {
                let mut refs = vec![
                    account_ref(&dev.publisher_id),
                    decl_ref(RELEASE_SERIES, &dev.snap_id),
                ];
                for d in &dev.developers {
                    let r = account_ref(&d.developer_id);
                    if !refs.contains(&r) {
                        refs.push(r);
                    }
                }
                refs
            }
            Details::Model(m) => vec![account_ref(&m.brand_id)],
            Details::Store(s) => vec![account_ref(&s.operator_id)],
        }
    }

    /// Typed view of an `account` assertion.
    pub fn account(&self) -> Option<&AccountDetails> {
        match &self.details {
            Details::Account(d) => Some(d),
            _ => None,
        }
    }

    /// Typed view of an `account-key` assertion.
    pub fn account_key(&self) -> Option<&AccountKeyDetails> {
        match &self.details {
            Details::AccountKey(d) => Some(d),
            _ => None,
        }
    }

    /// Typed view of a `snap-declaration` assertion.
    pub fn snap_declaration(&self) -> Option<&SnapDeclarationDetails> {
        match &self.details {
            Details::SnapDeclaration(d) => Some(d),
            _ => None,
        }
    }

    /// Typed view of a `snap-build` assertion.
    pub fn snap_build(&self) -> Option<&SnapBuildDetails> {
        match &self.details {
            Details::SnapBuild(d) => Some(d),
            _ => None,
        }
    }

    /// Typed view of a `snap-revision` assertion.
    pub fn snap_revision(&self) -> Option<&SnapRevisionDetails> {
        match &self.details {
            Details::SnapRevision(d) => Some(d),
            _ => None,
        }
    }

    /// Typed view of a `validation` assertion.
    pub fn validation(&self) -> Option<&ValidationDetails> {
        match &self.details {
            Details::Validation(d) => Some(d),
            _ => None,
        }
    }

    /// Typed view of a `snap-developer` assertion.
    pub fn snap_developer(&self) -> Option<&SnapDeveloperDetails> {
        match &self.details {
            Details::SnapDeveloper(d) => Some(d),
            _ => None,
        }
    }

    /// Typed view of a `base-declaration` assertion.
    pub fn base_declaration(&self) -> Option<&BaseDeclarationDetails> {
        match &self.details {
            Details::BaseDeclaration(d) => Some(d),
            _ => None,
        }
    }

    /// Typed view of a `model` assertion.
    pub fn model(&self) -> Option<&ModelDetails> {
        match &self.details {
            Details::Model(d) => Some(d),
            _ => None,
        }
    }

    /// Typed view of a `store` assertion.
    pub fn store(&self) -> Option<&StoreDetails> {
        match &self.details {
            Details::Store(d) => Some(d),
            _ => None,
        }
    }
}

fn find_separator(bytes: &[u8]) -> Option<usize> {
    bytes.windows(2).position(|w| w == b"\n\n")
}

/// Decodes an assertion from its wire form.
pub fn decode(bytes: &[u8]) -> Result<Assertion, AssertError> {
    let sep = find_separator(bytes).ok_or_else(|| {
        AssertError::Format("assertion content/signature separation not found".into())
    })?;
    let header_text = std::str::from_utf8(&bytes[..sep])
        .map_err(|_| AssertError::Format("assertion headers are not valid text".into()))?;
    let headers = parse_headers(header_text).map_err(|e| AssertError::Format(e.to_string()))?;

    let type_name = headers
        .get("type")
        .and_then(HeaderValue::as_str)
        .ok_or_else(|| AssertError::Format("\"type\" header is mandatory".into()))?;
    let typ = type_by_name(type_name)
        .ok_or_else(|| AssertError::UnknownType(type_name.to_string()))?;

    let body_length = check_optional_int_min(&headers, "body-length", 0, 0)
        .map_err(|msg| AssertError::Check { typ: typ.name, msg })? as usize;

    let rest = &bytes[sep + 2..];
    let (content, body, sig_bytes) = if body_length > 0 {
        if rest.len() < body_length + 2 {
            return Err(AssertError::Format(format!(
                "assertion body shorter than declared body-length: {} < {}",
                rest.len().saturating_sub(2),
                body_length
            )));
        }
        if &rest[body_length..body_length + 2] != b"\n\n" {
            return Err(AssertError::Format(
                "missing body/signature separation after declared body-length".into(),
            ));
        }
        (
            bytes[..sep + 2 + body_length].to_vec(),
            rest[..body_length].to_vec(),
            &rest[body_length + 2..],
        )
    } else {
        (bytes[..sep].to_vec(), Vec::new(), rest)
    };

    let sig_encoded = std::str::from_utf8(sig_bytes)
        .map_err(|_| AssertError::Format("assertion signature is not valid text".into()))?;
    if sig_encoded.trim().is_empty() {
        return Err(AssertError::Format("empty assertion signature".into()));
    }
    let signature = Signature::decode_base64(sig_encoded)
        .map_err(|e| AssertError::Format(format!("cannot decode signature: {e}")))?;

    build_assertion(
        typ,
        headers,
        body,
        content,
        sig_encoded.to_string(),
        Some(signature),
    )
}

pub(crate) fn build_assertion(
    typ: &'static AssertionType,
    headers: Headers,
    body: Vec<u8>,
    content: Vec<u8>,
    sig_encoded: String,
    signature: Option<Signature>,
) -> Result<Assertion, AssertError> {
    let check = |msg: String| AssertError::Check { typ: typ.name, msg };

    check_nonempty_string(&headers, "authority-id").map_err(check)?;
    for key in typ.primary_key {
        check_nonempty_string(&headers, key).map_err(check)?;
    }
    check_optional_int_min(&headers, "revision", 0, 0).map_err(check)?;
    check_optional_int_min(&headers, "format", 0, 0).map_err(check)?;
    if signature.is_some() {
        check_nonempty_string(&headers, "sign-key-sha3-384").map_err(check)?;
    }

    let details = crate::validate_details(typ, &headers, &body, signature.is_none()).map_err(check)?;

    Ok(Assertion {
        typ,
        headers,
        body,
        content,
        sig_encoded,
        signature,
        details,
    })
}

/// Serializes headers and body into canonical signed-content bytes.
fn content_bytes(headers: &Headers, body: &[u8]) -> Result<Vec<u8>, AssertError> {
    let text = serialize_headers(headers).map_err(|e| AssertError::Format(e.to_string()))?;
    let mut content = text.trim_end_matches('\n').as_bytes().to_vec();
    if !body.is_empty() {
        content.extend_from_slice(b"\n\n");
        content.extend_from_slice(body);
    }
    Ok(content)
}

/// Assembles and signs an assertion from headers and body.
///
/// The headers must include `type` and `authority-id`; `sign-key-sha3-384`
/// and `body-length` are filled in here. The assembled bytes are decoded
/// again so the result satisfies every decoded-form invariant.
pub fn assemble(
    mut headers: Headers,
    body: &[u8],
    key: &PrivateKey,
) -> Result<Assertion, AssertError> {
    let type_name = headers
        .get("type")
        .and_then(HeaderValue::as_str)
        .ok_or_else(|| AssertError::Format("\"type\" header is mandatory".into()))?
        .to_string();
    type_by_name(&type_name).ok_or_else(|| AssertError::UnknownType(type_name.clone()))?;

    headers.insert(
        "sign-key-sha3-384".to_string(),
        HeaderValue::Str(key.id()),
    );
    if body.is_empty() {
        headers.remove("body-length");
    } else {
        headers.insert(
            "body-length".to_string(),
            HeaderValue::Str(body.len().to_string()),
        );
    }

    let content = content_bytes(&headers, body)?;
    let signature = key.sign(&content);
    let mut encoded = content;
    encoded.extend_from_slice(b"\n\n");
    encoded.extend_from_slice(signature.encode_base64().as_bytes());
    decode(&encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SNAP_DECLARATION_TYPE;

    const KEY_HEADER: &str =
        "sign-key-sha3-384: Jv8_JiHiIzJVcO9M55pPdqSDWUvuhfDIBJUS-3VW7F_idjix7Ffn5qMxB21ZQuij";

    fn sig_line() -> String {
        // structurally valid signature bytes; no verification at decode time
        PrivateKey::generate().sign(b"whatever").encode_base64()
    }

    fn known_good_snap_declaration() -> String {
        format!(
            "type: snap-declaration\n\
             authority-id: canonical\n\
             series: 16\n\
             snap-id: snap-id-1\n\
             snap-name: first\n\
             publisher-id: dev-id1\n\
             refresh-control:\n  - foo\n  - bar\n\
             auto-aliases:\n  - cmd1\n  - cmd_2\n  - Cmd-3\n  - CMD.4\n\
             timestamp: 2024-01-01T00:00:00Z\n\
             aliases:\n\
             \x20 -\n\
             \x20   name: cmd1\n\
             \x20   target: cmd-1\n\
             \x20 -\n\
             \x20   name: cmd_2\n\
             \x20   target: cmd-2\n\
             \x20 -\n\
             \x20   name: Cmd-3\n\
             \x20   target: cmd-3\n\
             \x20 -\n\
             \x20   name: CMD.4\n\
             \x20   target: cmd-4\n\
             body-length: 0\n\
             {KEY_HEADER}\n\n{}",
            sig_line()
        )
    }

    #[test]
    fn decode_known_good_snap_declaration() {
        let encoded = known_good_snap_declaration();
        let a = decode(encoded.as_bytes()).unwrap();
        assert_eq!(a.assert_type(), &SNAP_DECLARATION_TYPE);
        assert_eq!(a.authority_id(), "canonical");
        let decl = a.snap_declaration().unwrap();
        assert_eq!(decl.series, "16");
        assert_eq!(decl.snap_id, "snap-id-1");
        assert_eq!(decl.snap_name, "first");
        assert_eq!(decl.publisher_id, "dev-id1");
        assert_eq!(decl.refresh_control, vec!["foo", "bar"]);
        assert_eq!(
            decl.auto_aliases,
            vec!["cmd1", "cmd_2", "Cmd-3", "CMD.4"]
        );
        assert_eq!(decl.aliases["cmd1"], "cmd-1");
        assert_eq!(decl.aliases["CMD.4"], "cmd-4");
        assert!(decl.revision_authority("whatever").is_empty());
        assert_eq!(
            a.timestamp().unwrap(),
            assertd_types::time::parse_rfc3339("2024-01-01T00:00:00Z").unwrap()
        );
    }

    #[test]
    fn decode_encode_is_bit_exact() {
        let encoded = known_good_snap_declaration();
        let a = decode(encoded.as_bytes()).unwrap();
        assert_eq!(a.encode(), encoded.as_bytes());
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let encoded = format!(
            "type: what\nauthority-id: canonical\n{KEY_HEADER}\n\n{}",
            sig_line()
        );
        match decode(encoded.as_bytes()) {
            Err(AssertError::UnknownType(name)) => assert_eq!(name, "what"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn decode_names_missing_mandatory_headers() {
        let encoded = format!(
            "type: snap-declaration\nauthority-id: canonical\nsnap-id: snap-id-1\nsnap-name: x\npublisher-id: dev-id1\ntimestamp: 2024-01-01T00:00:00Z\n{KEY_HEADER}\n\n{}",
            sig_line()
        );
        let err = decode(encoded.as_bytes()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "assertion snap-declaration: \"series\" header is mandatory"
        );
    }

    #[test]
    fn decode_rejects_missing_signature() {
        let err = decode(b"type: account\nauthority-id: canonical").unwrap_err();
        assert!(err
            .to_string()
            .contains("content/signature separation not found"));

        let err = decode(b"type: account\nauthority-id: canonical\n\n").unwrap_err();
        assert_eq!(err.to_string(), "empty assertion signature");
    }

    #[test]
    fn decode_with_body_round_trips() {
        let body = "BODY-DATA";
        let encoded = format!(
            "type: account-key\nauthority-id: canonical\npublic-key-sha3-384: pk\naccount-id: acc\nsince: 2020-01-01T00:00:00Z\nbody-length: {}\n{KEY_HEADER}\n\n{body}\n\n{}",
            body.len(),
            sig_line()
        );
        // the body here is not a valid key document, so the account-key
        // validator must reject it, after body framing succeeded
        let err = decode(encoded.as_bytes()).unwrap_err();
        assert!(err.to_string().starts_with("assertion account-key:"));
    }

    #[test]
    fn assemble_produces_decodable_bit_exact_assertions() {
        let key = PrivateKey::generate();
        let mut headers = Headers::new();
        headers.insert("type".into(), "account".into());
        headers.insert("authority-id".into(), "canonical".into());
        headers.insert("account-id".into(), "acc-id1".into());
        headers.insert("display-name".into(), "Acc".into());
        headers.insert("validation".into(), "certified".into());
        headers.insert("timestamp".into(), "2024-01-01T00:00:00Z".into());

        let a = assemble(headers, b"", &key).unwrap();
        assert_eq!(a.sign_key_sha3_384(), key.id());
        assert_eq!(a.revision(), 0);

        let encoded = a.encode();
        let again = decode(&encoded).unwrap();
        assert_eq!(again.encode(), encoded);

        // the signature verifies against the signing key
        key.public_key()
            .verify(a.content(), a.signature().unwrap())
            .unwrap();
    }

    #[test]
    fn assemble_sets_body_length() {
        let key = PrivateKey::generate();
        let signing_key = PrivateKey::generate();
        let mut headers = Headers::new();
        headers.insert("type".into(), "account-key".into());
        headers.insert("authority-id".into(), "canonical".into());
        headers.insert("account-id".into(), "acc-id1".into());
        headers.insert("since".into(), "2020-01-01T00:00:00Z".into());
        headers.insert(
            "public-key-sha3-384".into(),
            HeaderValue::Str(key.public_key().id()),
        );

        let body = key.public_key().encode();
        let a = assemble(headers, &body, &signing_key).unwrap();
        assert_eq!(a.header_string("body-length").unwrap(), body.len().to_string());
        assert_eq!(a.body(), &body[..]);
        let encoded = a.encode();
        assert_eq!(decode(&encoded).unwrap().encode(), encoded);
    }

    #[test]
    fn revision_validation() {
        let encoded = format!(
            "type: account\nauthority-id: canonical\naccount-id: acc\ndisplay-name: A\nvalidation: unknown\ntimestamp: 2024-01-01T00:00:00Z\nrevision: -1\n{KEY_HEADER}\n\n{}",
            sig_line()
        );
        let err = decode(encoded.as_bytes()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "assertion account: \"revision\" header must be >=0: -1"
        );
    }

    #[test]
    fn prerequisites_of_snap_revision() {
        let digest_val = digest::sha3_384_base64(b"blob");
        let encoded = format!(
            "type: snap-revision\nauthority-id: store-id1\nsnap-sha3-384: {digest_val}\nsnap-id: snap-id-1\nsnap-size: 123\nsnap-revision: 1\ndeveloper-id: dev-id1\ntimestamp: 2024-01-01T00:00:00Z\n{KEY_HEADER}\n\n{}",
            sig_line()
        );
        let a = decode(encoded.as_bytes()).unwrap();
        let prereqs = a.prerequisites();
        assert_eq!(prereqs.len(), 2);
        assert_eq!(prereqs[0].assert_type.name, "snap-declaration");
        assert_eq!(prereqs[0].primary_key, vec!["16", "snap-id-1"]);
        assert_eq!(prereqs[1].assert_type.name, "account");
        assert_eq!(prereqs[1].primary_key, vec!["dev-id1"]);
    }
}
