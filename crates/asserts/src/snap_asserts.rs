//! Package-related assertions: `snap-declaration`, `snap-build`,
//! `snap-revision`, `validation`, `snap-developer` and
//! `base-declaration`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use assertd_types::time::parse_rfc3339;
use assertd_types::{HeaderValue, Headers};

use crate::assert::{build_assertion, AssertError, Assertion};
use crate::headers_check::{
    check_digest, check_flag, check_int_min, check_nonempty_string, check_optional_map,
    check_optional_string_list, check_optional_string_list_matches, check_rfc3339, check_uint,
    VALID_ACCOUNT_ID, VALID_COMMAND_NAME, VALID_PROVENANCE,
};
use crate::ifacedecls::{
    compile_device_scope, compile_plug_rule, compile_slot_rule, DeviceScopeConstraint,
    DeviceScopeError, PlugRule, SlotRule,
};
use crate::registry::BASE_DECLARATION_TYPE;

/// The provenance meaning "uploaded through the regular store path".
pub const GLOBAL_UPLOAD: &str = "global-upload";

/// A `revision-authority` entry of a snap-declaration: a delegation
/// allowing another account to sign `snap-revision`s within bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionAuthority {
    /// The delegated account.
    pub account_id: String,
    /// Provenances the delegation covers.
    pub provenance: Vec<String>,
    /// Lowest snap revision the delegate may sign; defaults to 1.
    pub min_revision: i64,
    /// Highest snap revision the delegate may sign; 0 means unbounded.
    pub max_revision: i64,
    /// Device scope the delegation is limited to.
    pub device_scope: Option<DeviceScopeConstraint>,
}

/// Failures of a revision-authority delegation check.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthorityCheckError {
    #[error("authority-id mismatch")]
    AuthorityMismatch,
    #[error("provenance mismatch")]
    ProvenanceMismatch,
    #[error("snap revision {revision} is less than min-revision {min}")]
    BelowMinRevision { revision: i64, min: i64 },
    #[error("snap revision {revision} is greater than max-revision {max}")]
    AboveMaxRevision { revision: i64, max: i64 },
    #[error("{0}")]
    DeviceScope(#[from] DeviceScopeError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RevisionAuthority {
    /// Checks whether this delegation authorizes `rev`.
    ///
    /// Device scope is validated only when a `model` assertion is
    /// supplied; `store` may additionally vouch for friendly stores.
    pub fn check(
        &self,
        rev: &Assertion,
        model: Option<&Assertion>,
        store: Option<&Assertion>,
    ) -> Result<(), AuthorityCheckError> {
        let details = rev
            .snap_revision()
            .ok_or_else(|| AuthorityCheckError::Internal("not a snap-revision".into()))?;
        if rev.authority_id() != self.account_id {
            return Err(AuthorityCheckError::AuthorityMismatch);
        }
        if !self.provenance.iter().any(|p| p == &details.provenance) {
            return Err(AuthorityCheckError::ProvenanceMismatch);
        }
        if details.snap_revision < self.min_revision {
            return Err(AuthorityCheckError::BelowMinRevision {
                revision: details.snap_revision,
                min: self.min_revision,
            });
        }
        if self.max_revision != 0 && details.snap_revision > self.max_revision {
            return Err(AuthorityCheckError::AboveMaxRevision {
                revision: details.snap_revision,
                max: self.max_revision,
            });
        }
        if let (Some(scope), Some(model)) = (&self.device_scope, model) {
            let model_details = model
                .model()
                .ok_or_else(|| AuthorityCheckError::Internal("not a model assertion".into()))?;
            let store_details = match store {
                None => None,
                Some(st) => Some(st.store().ok_or_else(|| {
                    AuthorityCheckError::Internal("not a store assertion".into())
                })?),
            };
            scope.check(model_details, store_details)?;
        }
        Ok(())
    }
}

fn stanza_int_min(
    map: &BTreeMap<String, HeaderValue>,
    name: &str,
    min: i64,
    default: i64,
) -> Result<i64, String> {
    let s = match map.get(name).and_then(HeaderValue::as_str) {
        None => return Ok(default),
        Some(s) => s,
    };
    let n: i64 = s
        .parse()
        .map_err(|_| format!("{name:?} in revision authority is not an integer: {s}"))?;
    if n < min {
        return Err(format!("{name:?} in revision authority must be >={min}: {n}"));
    }
    Ok(n)
}

fn parse_revision_authority(v: &HeaderValue) -> Result<Vec<RevisionAuthority>, String> {
    let items = v
        .as_list()
        .ok_or_else(|| "revision-authority stanza must be a list of maps".to_string())?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let map = item
            .as_map()
            .ok_or_else(|| "revision-authority stanza must be a list of maps".to_string())?;

        let account_id = map
            .get("account-id")
            .and_then(HeaderValue::as_str)
            .ok_or_else(|| "\"account-id\" in revision authority is mandatory".to_string())?;
        if !VALID_ACCOUNT_ID.is_match(account_id) {
            return Err(format!(
                "\"account-id\" in revision authority contains invalid characters: {account_id:?}"
            ));
        }

        let provenance = map
            .get("provenance")
            .and_then(HeaderValue::as_string_list)
            .ok_or_else(|| {
                "provenance in revision authority must be a list of strings".to_string()
            })?;
        for p in &provenance {
            if !VALID_PROVENANCE.is_match(p) {
                return Err(format!(
                    "provenance in revision authority contains an invalid element: {p:?}"
                ));
            }
        }

        let min_revision = stanza_int_min(map, "min-revision", 1, 1)?;
        let max_revision = stanza_int_min(map, "max-revision", 1, 0)?;
        if max_revision != 0 && max_revision < min_revision {
            return Err(
                "optional max-revision cannot be less than min-revision in revision-authority"
                    .to_string(),
            );
        }

        let device_scope = compile_device_scope("revision-authority", map)?;

        out.push(RevisionAuthority {
            account_id: account_id.to_string(),
            provenance,
            min_revision,
            max_revision,
            device_scope,
        });
    }
    Ok(out)
}

/// Decoded details of a `snap-declaration` assertion.
#[derive(Debug, Clone)]
pub struct SnapDeclarationDetails {
    pub series: String,
    pub snap_id: String,
    /// May legitimately be empty for renamed-away snaps.
    pub snap_name: String,
    pub publisher_id: String,
    pub timestamp: DateTime<Utc>,
    pub refresh_control: Vec<String>,
    pub auto_aliases: Vec<String>,
    /// Alias name to target command.
    pub aliases: BTreeMap<String, String>,
    plugs: BTreeMap<String, PlugRule>,
    slots: BTreeMap<String, SlotRule>,
    revision_authority: Vec<RevisionAuthority>,
}

impl SnapDeclarationDetails {
    /// The compiled rule for an interface's plugs, if declared.
    pub fn plug_rule(&self, interface: &str) -> Option<&PlugRule> {
        self.plugs.get(interface)
    }

    /// The compiled rule for an interface's slots, if declared.
    pub fn slot_rule(&self, interface: &str) -> Option<&SlotRule> {
        self.slots.get(interface)
    }

    /// The revision-authority entries covering `provenance`.
    pub fn revision_authority(&self, provenance: &str) -> Vec<&RevisionAuthority> {
        self.revision_authority
            .iter()
            .filter(|ra| ra.provenance.iter().any(|p| p == provenance))
            .collect()
    }
}

fn parse_aliases(headers: &Headers) -> Result<BTreeMap<String, String>, String> {
    let v = match headers.get("aliases") {
        None => return Ok(BTreeMap::new()),
        Some(v) => v,
    };
    let items = v
        .as_list()
        .ok_or_else(|| "\"aliases\" header must be a list of alias maps".to_string())?;
    let mut aliases = BTreeMap::new();
    for (i, item) in items.iter().enumerate() {
        let map = item
            .as_map()
            .ok_or_else(|| "\"aliases\" header must be a list of alias maps".to_string())?;
        let name = map
            .get("name")
            .and_then(HeaderValue::as_str)
            .ok_or_else(|| format!("\"name\" in \"aliases\" item {} is mandatory", i + 1))?;
        if !VALID_COMMAND_NAME.is_match(name) {
            return Err(format!(
                "\"name\" in \"aliases\" item {} contains invalid characters: {name:?}",
                i + 1
            ));
        }
        let target = map
            .get("target")
            .and_then(HeaderValue::as_str)
            .ok_or_else(|| format!("\"target\" for alias {name:?} is mandatory"))?;
        if !VALID_COMMAND_NAME.is_match(target) {
            return Err(format!(
                "\"target\" for alias {name:?} contains invalid characters: {target:?}"
            ));
        }
        if aliases
            .insert(name.to_string(), target.to_string())
            .is_some()
        {
            return Err(format!(
                "duplicated definition in \"aliases\" for alias {name:?}"
            ));
        }
    }
    Ok(aliases)
}

fn parse_plug_rules(headers: &Headers) -> Result<BTreeMap<String, PlugRule>, String> {
    let mut rules = BTreeMap::new();
    if let Some(map) = check_optional_map(headers, "plugs")? {
        for (iface, v) in map {
            rules.insert(iface.clone(), compile_plug_rule(iface, v)?);
        }
    }
    Ok(rules)
}

fn parse_slot_rules(headers: &Headers) -> Result<BTreeMap<String, SlotRule>, String> {
    let mut rules = BTreeMap::new();
    if let Some(map) = check_optional_map(headers, "slots")? {
        for (iface, v) in map {
            rules.insert(iface.clone(), compile_slot_rule(iface, v)?);
        }
    }
    Ok(rules)
}

pub(crate) fn validate_snap_declaration(
    headers: &Headers,
    _body: &[u8],
) -> Result<SnapDeclarationDetails, String> {
    let snap_name = crate::headers_check::check_string(headers, "snap-name")?.to_string();
    let revision_authority = match headers.get("revision-authority") {
        None => Vec::new(),
        Some(v) => parse_revision_authority(v)?,
    };
    Ok(SnapDeclarationDetails {
        series: check_nonempty_string(headers, "series")?.to_string(),
        snap_id: check_nonempty_string(headers, "snap-id")?.to_string(),
        snap_name,
        publisher_id: check_nonempty_string(headers, "publisher-id")?.to_string(),
        timestamp: check_rfc3339(headers, "timestamp")?,
        refresh_control: check_optional_string_list(headers, "refresh-control")?
            .unwrap_or_default(),
        auto_aliases: check_optional_string_list_matches(
            headers,
            "auto-aliases",
            &VALID_COMMAND_NAME,
        )?
        .unwrap_or_default(),
        aliases: parse_aliases(headers)?,
        plugs: parse_plug_rules(headers)?,
        slots: parse_slot_rules(headers)?,
        revision_authority,
    })
}

/// One dm-verity integrity block of a `snap-revision`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityData {
    pub integrity_type: String,
    pub version: u64,
    pub hash_algorithm: String,
    pub data_block_size: u64,
    pub hash_block_size: u64,
    /// Hex digest with the hash algorithm's bit length.
    pub digest: String,
    /// Hex salt with the hash algorithm's bit length.
    pub salt: String,
}

fn integrity_uint(
    map: &BTreeMap<String, HeaderValue>,
    name: &str,
    context: &str,
) -> Result<u64, String> {
    let s = map
        .get(name)
        .and_then(HeaderValue::as_str)
        .ok_or_else(|| format!("{name:?} of {context} is mandatory"))?;
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("{name:?} of {context} is not an unsigned integer: {s}"));
    }
    s.parse::<u64>()
        .map_err(|_| format!("{name:?} of {context} is out of range: {s}"))
}

fn integrity_hex(
    map: &BTreeMap<String, HeaderValue>,
    name: &str,
    context: &str,
    bits: usize,
) -> Result<String, String> {
    let s = map
        .get(name)
        .and_then(HeaderValue::as_str)
        .ok_or_else(|| format!("{name:?} of {context} is mandatory"))?;
    let raw = hex::decode(s).map_err(|e| format!("{name:?} of {context} cannot be decoded: {e}"))?;
    if raw.len() * 8 != bits {
        return Err(format!(
            "{name:?} of {context} does not have the expected bit length: {}",
            raw.len() * 8
        ));
    }
    Ok(s.to_string())
}

fn parse_integrity(headers: &Headers) -> Result<Vec<IntegrityData>, String> {
    let v = match headers.get("integrity") {
        None => return Ok(Vec::new()),
        Some(v) => v,
    };
    let items = v
        .as_list()
        .ok_or_else(|| "\"integrity\" header must contain a list of integrity data".to_string())?;
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let map = item.as_map().ok_or_else(|| {
            "\"integrity\" header must contain a list of integrity data".to_string()
        })?;
        let integrity_type = map
            .get("type")
            .and_then(HeaderValue::as_str)
            .ok_or_else(|| format!("\"type\" of integrity data [{i}] is mandatory"))?;
        if integrity_type != "dm-verity" {
            return Err(format!(
                "\"type\" of integrity data [{i}] must be one of (dm-verity)"
            ));
        }
        let typed = format!("integrity data [{i}] of type \"dm-verity\"");
        let version = integrity_uint(map, "version", &typed)?;
        if version != 1 {
            return Err(format!("version of {typed} must be one of [1]"));
        }
        let hash_algorithm = map
            .get("hash-algorithm")
            .and_then(HeaderValue::as_str)
            .ok_or_else(|| format!("\"hash-algorithm\" of {typed} is mandatory"))?;
        if hash_algorithm != "sha256" {
            return Err(format!("hash algorithm of {typed} must be one of (sha256)"));
        }
        let with_alg = format!("{typed} ({hash_algorithm})");
        out.push(IntegrityData {
            integrity_type: integrity_type.to_string(),
            version,
            hash_algorithm: hash_algorithm.to_string(),
            data_block_size: integrity_uint(map, "data-block-size", &with_alg)?,
            hash_block_size: integrity_uint(map, "hash-block-size", &with_alg)?,
            digest: integrity_hex(map, "digest", &with_alg, 256)?,
            salt: integrity_hex(map, "salt", &with_alg, 256)?,
        });
    }
    Ok(out)
}

/// Decoded details of a `snap-revision` assertion.
#[derive(Debug, Clone)]
pub struct SnapRevisionDetails {
    pub snap_sha3_384: String,
    pub snap_id: String,
    pub snap_size: u64,
    pub snap_revision: i64,
    pub developer_id: String,
    /// `global-upload` when the header is absent.
    pub provenance: String,
    pub timestamp: DateTime<Utc>,
    pub integrity: Vec<IntegrityData>,
}

impl SnapRevisionDetails {
    /// Whether the revision claims an explicit, non-default provenance.
    pub fn delegated(&self) -> bool {
        self.provenance != GLOBAL_UPLOAD
    }
}

pub(crate) fn validate_snap_revision(
    headers: &Headers,
    _body: &[u8],
) -> Result<SnapRevisionDetails, String> {
    let provenance = match headers.get("provenance") {
        None => GLOBAL_UPLOAD.to_string(),
        Some(v) => {
            let s = v
                .as_str()
                .ok_or_else(|| "\"provenance\" header must be a string".to_string())?;
            if s.is_empty() {
                return Err("\"provenance\" header should not be empty".to_string());
            }
            if !VALID_PROVENANCE.is_match(s) {
                return Err(format!(
                    "\"provenance\" header contains invalid characters: {s:?}"
                ));
            }
            s.to_string()
        }
    };
    Ok(SnapRevisionDetails {
        snap_sha3_384: check_digest(headers, "snap-sha3-384", 384)?,
        snap_id: check_nonempty_string(headers, "snap-id")?.to_string(),
        snap_size: check_uint(headers, "snap-size")?,
        snap_revision: check_int_min(headers, "snap-revision", 1)?,
        developer_id: check_nonempty_string(headers, "developer-id")?.to_string(),
        provenance,
        timestamp: check_rfc3339(headers, "timestamp")?,
        integrity: parse_integrity(headers)?,
    })
}

/// Decoded details of a `snap-build` assertion.
#[derive(Debug, Clone)]
pub struct SnapBuildDetails {
    pub snap_sha3_384: String,
    pub snap_id: String,
    pub snap_size: u64,
    pub grade: String,
    pub timestamp: DateTime<Utc>,
}

pub(crate) fn validate_snap_build(
    headers: &Headers,
    _body: &[u8],
) -> Result<SnapBuildDetails, String> {
    Ok(SnapBuildDetails {
        snap_sha3_384: check_digest(headers, "snap-sha3-384", 384)?,
        snap_id: check_nonempty_string(headers, "snap-id")?.to_string(),
        snap_size: check_uint(headers, "snap-size")?,
        grade: check_nonempty_string(headers, "grade")?.to_string(),
        timestamp: check_rfc3339(headers, "timestamp")?,
    })
}

/// Decoded details of a `validation` assertion.
#[derive(Debug, Clone)]
pub struct ValidationDetails {
    pub series: String,
    /// The gating snap.
    pub snap_id: String,
    /// The gated snap.
    pub approved_snap_id: String,
    pub approved_snap_revision: i64,
    pub revoked: bool,
    pub timestamp: DateTime<Utc>,
}

pub(crate) fn validate_validation(
    headers: &Headers,
    _body: &[u8],
) -> Result<ValidationDetails, String> {
    Ok(ValidationDetails {
        series: check_nonempty_string(headers, "series")?.to_string(),
        snap_id: check_nonempty_string(headers, "snap-id")?.to_string(),
        approved_snap_id: check_nonempty_string(headers, "approved-snap-id")?.to_string(),
        approved_snap_revision: check_int_min(headers, "approved-snap-revision", 1)?,
        revoked: check_flag(headers, "revoked")?,
        timestamp: check_rfc3339(headers, "timestamp")?,
    })
}

/// One entry of a `snap-developer`'s collaboration list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeveloperRange {
    pub developer_id: String,
    pub since: DateTime<Utc>,
    /// `None` keeps the collaboration open-ended; equal to `since` it
    /// marks a revocation.
    pub until: Option<DateTime<Utc>>,
}

impl DeveloperRange {
    /// Whether this entry revokes the developer.
    pub fn revoked(&self) -> bool {
        self.until == Some(self.since)
    }
}

/// Decoded details of a `snap-developer` assertion.
#[derive(Debug, Clone)]
pub struct SnapDeveloperDetails {
    pub snap_id: String,
    pub publisher_id: String,
    pub developers: Vec<DeveloperRange>,
}

fn parse_developers(headers: &Headers) -> Result<Vec<DeveloperRange>, String> {
    let v = match headers.get("developers") {
        None => return Ok(Vec::new()),
        Some(v) => v,
    };
    let items = v
        .as_list()
        .ok_or_else(|| "\"developers\" must be a list of developer maps".to_string())?;
    let mut developers = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let n = i + 1;
        let map = item
            .as_map()
            .ok_or_else(|| "\"developers\" must be a list of developer maps".to_string())?;
        let developer_id = map
            .get("developer-id")
            .and_then(HeaderValue::as_str)
            .ok_or_else(|| format!("\"developer-id\" in \"developers\" item {n} is mandatory"))?;
        if !VALID_ACCOUNT_ID.is_match(developer_id) {
            return Err(format!(
                "\"developer-id\" in \"developers\" item {n} contains invalid characters: {developer_id:?}"
            ));
        }
        let since_str = map
            .get("since")
            .and_then(HeaderValue::as_str)
            .ok_or_else(|| {
                format!("\"since\" in \"developers\" item {n} for developer {developer_id:?} is mandatory")
            })?;
        if since_str.is_empty() {
            return Err(format!(
                "\"since\" in \"developers\" item {n} for developer {developer_id:?} should not be empty"
            ));
        }
        let since = parse_rfc3339(since_str).map_err(|e| {
            format!(
                "\"since\" in \"developers\" item {n} for developer {developer_id:?} is not a RFC3339 date: {e}"
            )
        })?;
        let until = match map.get("until").and_then(HeaderValue::as_str) {
            None => None,
            Some(s) => Some(parse_rfc3339(s).map_err(|e| {
                format!(
                    "\"until\" in \"developers\" item {n} for developer {developer_id:?} is not a RFC3339 date: {e}"
                )
            })?),
        };
        if let Some(until) = until {
            if since > until {
                return Err(format!(
                    "\"since\" in \"developers\" item {n} for developer {developer_id:?} must be less than or equal to \"until\""
                ));
            }
        }
        developers.push(DeveloperRange {
            developer_id: developer_id.to_string(),
            since,
            until,
        });
    }

    // a revocation must be the only entry for its developer
    for d in &developers {
        if d.revoked() {
            let others = developers
                .iter()
                .filter(|o| o.developer_id == d.developer_id)
                .count();
            if others > 1 {
                return Err(format!(
                    "revocation for developer {:?} must be standalone but found other \"developers\" items",
                    d.developer_id
                ));
            }
        }
    }
    Ok(developers)
}

pub(crate) fn validate_snap_developer(
    headers: &Headers,
    _body: &[u8],
) -> Result<SnapDeveloperDetails, String> {
    Ok(SnapDeveloperDetails {
        snap_id: check_nonempty_string(headers, "snap-id")?.to_string(),
        publisher_id: check_nonempty_string(headers, "publisher-id")?.to_string(),
        developers: parse_developers(headers)?,
    })
}

/// Decoded details of a `base-declaration` assertion.
#[derive(Debug, Clone)]
pub struct BaseDeclarationDetails {
    pub series: String,
    /// Absent only on the builtin, unsigned variant.
    pub timestamp: Option<DateTime<Utc>>,
    plugs: BTreeMap<String, PlugRule>,
    slots: BTreeMap<String, SlotRule>,
}

impl BaseDeclarationDetails {
    /// The base rule for an interface's plugs, if declared.
    pub fn plug_rule(&self, interface: &str) -> Option<&PlugRule> {
        self.plugs.get(interface)
    }

    /// The base rule for an interface's slots, if declared.
    pub fn slot_rule(&self, interface: &str) -> Option<&SlotRule> {
        self.slots.get(interface)
    }
}

pub(crate) fn validate_base_declaration(
    headers: &Headers,
    _body: &[u8],
    unsigned: bool,
) -> Result<BaseDeclarationDetails, String> {
    let timestamp = if unsigned {
        match headers.get("timestamp") {
            None => None,
            Some(_) => Some(check_rfc3339(headers, "timestamp")?),
        }
    } else {
        Some(check_rfc3339(headers, "timestamp")?)
    };
    Ok(BaseDeclarationDetails {
        series: check_nonempty_string(headers, "series")?.to_string(),
        timestamp,
        plugs: parse_plug_rules(headers)?,
        slots: parse_slot_rules(headers)?,
    })
}

/// Assembles the builtin base-declaration from bare header text.
///
/// The result carries no signature: it can be encoded for display but
/// not decoded back, and the trust database serves it as predefined
/// rather than stored content.
pub fn builtin_base_declaration(headers_text: &str) -> Result<Assertion, AssertError> {
    let trimmed = headers_text.trim();
    let headers = assertd_types::codec::parse_headers(trimmed)
        .map_err(|e| AssertError::Format(e.to_string()))?;
    for (name, expected) in [
        ("type", "base-declaration"),
        ("authority-id", "canonical"),
        ("series", "16"),
    ] {
        if headers.get(name).and_then(HeaderValue::as_str) != Some(expected) {
            return Err(AssertError::Format(format!(
                "the builtin base-declaration {name:?} header is not set to expected value {expected:?}"
            )));
        }
    }
    build_assertion(
        &BASE_DECLARATION_TYPE,
        headers,
        Vec::new(),
        trimmed.as_bytes().to_vec(),
        String::new(),
        None,
    )
    .map_err(|e| match e {
        AssertError::Check { msg, .. } => {
            AssertError::Format(format!("cannot assemble the builtin base-declaration: {msg}"))
        }
        other => other,
    })
}
