//! The trust database.
//!
//! Composes a backstore, a keypair manager and the configured trusted
//! set into the ingestion pipeline: signature verification against known
//! account keys, key-validity windows, type-specific cross-assertion
//! checks, prerequisite resolution and finally the backstore's
//! revision-monotonic put.

use std::collections::{BTreeMap, HashSet};

use thiserror::Error;
use tracing::debug;

use assertd_crypto::{CryptoError, KeypairManager, MemoryKeypairManager};
use assertd_types::time::format_rfc3339;
use assertd_types::{CancelToken, HeaderValue, Headers};

use crate::account::AccountKeyDetails;
use crate::assert::{assemble, AssertError, Assertion, Ref};
use crate::backstore::{Backstore, BackstoreError, MemoryBackstore};
use crate::registry::{
    suggest_format, type_by_name, AssertionType, ACCOUNT_KEY_TYPE, ACCOUNT_TYPE,
    RELEASE_SERIES, SNAP_DECLARATION_TYPE,
};

/// Errors from trust-database operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// No assertion matches the lookup.
    #[error("assertion not found")]
    NotFound,
    /// A required referenced assertion is not present yet.
    #[error("cannot resolve prerequisite assertion: {0}")]
    PrerequisiteMissing(Ref),
    /// A signature, consistency or policy check failed.
    #[error("{0}")]
    Check(String),
    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,
    /// An error from the underlying backstore.
    #[error(transparent)]
    Backstore(BackstoreError),
    /// An error from decoding or assembling an assertion.
    #[error(transparent)]
    Assert(#[from] AssertError),
    /// An error from key handling.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl From<BackstoreError> for DbError {
    fn from(e: BackstoreError) -> DbError {
        match e {
            BackstoreError::NotFound => DbError::NotFound,
            other => DbError::Backstore(other),
        }
    }
}

/// Configuration to open a trust database.
pub struct DatabaseConfig {
    /// The persistent backstore.
    pub backstore: Box<dyn Backstore>,
    /// Where private keys for signing live.
    pub keypair_manager: Box<dyn KeypairManager>,
    /// The statically trusted `account` and `account-key` assertions.
    pub trusted: Vec<Assertion>,
    /// Further predefined assertions served by lookups but never stored,
    /// e.g. the builtin base-declaration.
    pub other_predefined: Vec<Assertion>,
    /// Token polled before writes become visible.
    pub cancel: CancelToken,
}

impl Default for DatabaseConfig {
    fn default() -> DatabaseConfig {
        DatabaseConfig {
            backstore: Box::new(MemoryBackstore::new()),
            keypair_manager: Box::new(MemoryKeypairManager::new()),
            trusted: Vec::new(),
            other_predefined: Vec::new(),
            cancel: CancelToken::new(),
        }
    }
}

/// The assertion trust database.
pub struct Database {
    backstore: Box<dyn Backstore>,
    keypair_manager: Box<dyn KeypairManager>,
    trusted: MemoryBackstore,
    predefined: MemoryBackstore,
    trusted_accounts: HashSet<String>,
    cancel: CancelToken,
}

impl Database {
    /// Opens a database over the given configuration.
    pub fn open(cfg: DatabaseConfig) -> Result<Database, DbError> {
        let trusted = MemoryBackstore::new();
        let mut trusted_accounts = HashSet::new();
        for a in &cfg.trusted {
            match a.assert_type().name {
                "account" => {
                    if let Some(acc) = a.account() {
                        trusted_accounts.insert(acc.account_id.clone());
                    }
                    trusted.put(&ACCOUNT_TYPE, a)?;
                }
                "account-key" => trusted.put(&ACCOUNT_KEY_TYPE, a)?,
                other => {
                    return Err(DbError::Check(format!(
                        "cannot predefine trusted assertions that are not account or account-key: {other}"
                    )))
                }
            }
        }
        let predefined = MemoryBackstore::new();
        for a in &cfg.other_predefined {
            predefined.put(a.assert_type(), a)?;
        }
        Ok(Database {
            backstore: cfg.backstore,
            keypair_manager: cfg.keypair_manager,
            trusted,
            predefined,
            trusted_accounts,
            cancel: cfg.cancel,
        })
    }

    /// Whether the key id belongs to the statically trusted set.
    pub fn known_trusted(&self, key_id: &str) -> bool {
        self.trusted
            .get(&ACCOUNT_KEY_TYPE, &[key_id.to_string()])
            .is_ok()
    }

    /// Whether the account is part of the statically trusted set.
    pub fn is_trusted_account(&self, account_id: &str) -> bool {
        self.trusted_accounts.contains(account_id)
    }

    /// Finds an assertion by type and primary key, consulting the
    /// trusted set, the predefined set and the backstore in that order.
    pub fn find(
        &self,
        typ: &'static AssertionType,
        key: &[&str],
    ) -> Result<Assertion, DbError> {
        if key.len() != typ.primary_key.len() {
            return Err(DbError::Check(format!(
                "primary key has wrong length for {:?} assertion",
                typ.name
            )));
        }
        if key.iter().any(|comp| comp.is_empty()) {
            return Err(DbError::Check(format!(
                "primary key has empty components for {:?} assertion",
                typ.name
            )));
        }
        let key: Vec<String> = key.iter().map(|s| s.to_string()).collect();
        for store in [&self.trusted, &self.predefined] {
            match store.get(typ, &key) {
                Ok(a) => return Ok(a),
                Err(BackstoreError::NotFound) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(self.backstore.get(typ, &key)?)
    }

    /// Finds an assertion by reference.
    pub fn find_by_ref(&self, r: &Ref) -> Result<Assertion, DbError> {
        let key: Vec<&str> = r.primary_key.iter().map(String::as_str).collect();
        self.find(r.assert_type, &key)
    }

    /// Invokes `found` on every known assertion of `typ` matching all
    /// the given headers.
    pub fn search(
        &self,
        typ: &'static AssertionType,
        headers: &BTreeMap<String, String>,
        found: &mut dyn FnMut(Assertion),
    ) -> Result<(), DbError> {
        self.trusted.search(typ, headers, found)?;
        self.predefined.search(typ, headers, found)?;
        self.backstore.search(typ, headers, found)?;
        Ok(())
    }

    fn find_signing_key(&self, key_id: &str) -> Option<AccountKeyDetails> {
        for store in [&self.trusted, &self.predefined] {
            if let Ok(a) = store.get(&ACCOUNT_KEY_TYPE, &[key_id.to_string()]) {
                return a.account_key().cloned();
            }
        }
        self.backstore
            .get(&ACCOUNT_KEY_TYPE, &[key_id.to_string()])
            .ok()
            .and_then(|a| a.account_key().cloned())
    }

    /// Runs the full acceptance pipeline without persisting.
    pub fn check(&self, assert: &Assertion) -> Result<(), DbError> {
        let typ = assert.assert_type();
        if !assert.supported_format() {
            return Err(DbError::Check(format!(
                "proposed {:?} assertion has format {} but {} is latest supported",
                typ.name,
                assert.format(),
                typ.max_supported_format
            )));
        }

        let key_id = assert.sign_key_sha3_384();
        let signing_key = self.find_signing_key(key_id).ok_or_else(|| {
            DbError::Check(format!(
                "cannot verify assertion: no known public key with key id {key_id:?}"
            ))
        })?;
        if signing_key.account_id != assert.authority_id() {
            return Err(DbError::Check(format!(
                "assertion authority {:?} does not match the signing key's account {:?}",
                assert.authority_id(),
                signing_key.account_id
            )));
        }
        let signature = assert.signature().ok_or_else(|| {
            DbError::Check("cannot accept unsigned assertion".to_string())
        })?;
        signing_key
            .public_key
            .verify(assert.content(), signature)
            .map_err(|_| DbError::Check("assertion signature verification failed".to_string()))?;

        if let Some(ts) = assert.timestamp() {
            if !signing_key.valid_at(ts) {
                return Err(DbError::Check(format!(
                    "{} assertion timestamp \"{}\" outside of signing key validity (key valid since \"{}\")",
                    typ.name,
                    format_rfc3339(ts),
                    format_rfc3339(signing_key.since)
                )));
            }
        }

        self.check_consistency(assert)?;

        for prereq in assert.prerequisites() {
            if matches!(self.find_by_ref(&prereq), Err(DbError::NotFound)) {
                return Err(DbError::PrerequisiteMissing(prereq));
            }
        }
        Ok(())
    }

    /// Checks and persists an assertion.
    pub fn add(&self, assert: &Assertion) -> Result<(), DbError> {
        if self.cancel.is_cancelled() {
            return Err(DbError::Cancelled);
        }
        self.check(assert)?;
        if self.cancel.is_cancelled() {
            return Err(DbError::Cancelled);
        }
        self.backstore.put(assert.assert_type(), assert)?;
        debug!(
            typ = assert.assert_type().name,
            key = ?assert.primary_key(),
            revision = assert.revision(),
            "assertion added"
        );
        Ok(())
    }

    /// Signs an assertion from headers and body with a stored key.
    pub fn sign(
        &self,
        type_name: &str,
        headers: Headers,
        body: &[u8],
        key_id: &str,
    ) -> Result<Assertion, DbError> {
        let typ = type_by_name(type_name)
            .ok_or_else(|| AssertError::UnknownType(type_name.to_string()))?;
        let suggested = suggest_format(typ, &headers)?;
        let declared: i32 = headers
            .get("format")
            .and_then(HeaderValue::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        if declared < suggested {
            return Err(DbError::Check(format!(
                "cannot sign {:?} assertion with format {} lower than min format {} covering included features",
                typ.name, declared, suggested
            )));
        }
        let key = self.keypair_manager.get(key_id)?;
        let mut headers = headers;
        headers.insert(
            "type".to_string(),
            HeaderValue::Str(typ.name.to_string()),
        );
        Ok(assemble(headers, body, &key)?)
    }

    fn find_account(&self, account_id: &str) -> Result<Assertion, DbError> {
        self.find(&ACCOUNT_TYPE, &[account_id])
    }

    fn find_declaration(&self, series: &str, snap_id: &str) -> Result<Assertion, DbError> {
        self.find(&SNAP_DECLARATION_TYPE, &[series, snap_id])
    }

    fn check_consistency(&self, assert: &Assertion) -> Result<(), DbError> {
        let authority = assert.authority_id();
        match assert.assert_type().name {
            "account" => {
                let acc = assert.account().ok_or_else(internal)?;
                if !self.is_trusted_account(authority) {
                    return Err(DbError::Check(format!(
                        "account assertion for {:?} is not signed by a directly trusted authority: {authority}",
                        acc.account_id
                    )));
                }
            }
            "account-key" => {
                let key = assert.account_key().ok_or_else(internal)?;
                if !self.is_trusted_account(authority) {
                    return Err(DbError::Check(format!(
                        "account-key assertion for {:?} is not signed by a directly trusted authority: {authority}",
                        key.public_key_sha3_384
                    )));
                }
                if self.find_account(&key.account_id).is_err() {
                    return Err(DbError::Check(format!(
                        "account-key assertion for {:?} does not have a matching account assertion for {:?}",
                        key.public_key_sha3_384, key.account_id
                    )));
                }
            }
            "base-declaration" => {
                let decl = assert.base_declaration().ok_or_else(internal)?;
                if !self.is_trusted_account(authority) {
                    return Err(DbError::Check(format!(
                        "base-declaration assertion for series {} is not signed by a directly trusted authority: {authority}",
                        decl.series
                    )));
                }
            }
            "snap-declaration" => {
                let decl = assert.snap_declaration().ok_or_else(internal)?;
                if !self.is_trusted_account(authority) {
                    return Err(DbError::Check(format!(
                        "snap-declaration assertion for {:?} (id {:?}) is not signed by a directly trusted authority: {authority}",
                        decl.snap_name, decl.snap_id
                    )));
                }
                if self.find_account(&decl.publisher_id).is_err() {
                    return Err(DbError::Check(format!(
                        "snap-declaration assertion for {:?} (id {:?}) does not have a matching account assertion for the publisher {:?}",
                        decl.snap_name, decl.snap_id, decl.publisher_id
                    )));
                }
            }
            "snap-revision" => {
                let rev = assert.snap_revision().ok_or_else(internal)?;
                if rev.delegated() {
                    let decl = self
                        .find_declaration(RELEASE_SERIES, &rev.snap_id)
                        .map_err(|_| {
                            DbError::Check(format!(
                                "snap-revision assertion for snap id {:?} does not have a matching snap-declaration assertion",
                                rev.snap_id
                            ))
                        })?;
                    let decl_details = decl.snap_declaration().ok_or_else(internal)?;
                    let authorized = decl_details
                        .revision_authority(&rev.provenance)
                        .iter()
                        .any(|ra| ra.check(assert, None, None).is_ok());
                    if !authorized {
                        return Err(DbError::Check(format!(
                            "snap-revision assertion with provenance {:?} for snap id {:?} is not signed by an authorized authority: {authority}",
                            rev.provenance, rev.snap_id
                        )));
                    }
                } else if !self.is_trusted_account(authority) {
                    return Err(DbError::Check(format!(
                        "snap-revision assertion for snap id {:?} is not signed by a store: {authority}",
                        rev.snap_id
                    )));
                }
                if self.find_account(&rev.developer_id).is_err() {
                    return Err(DbError::Check(format!(
                        "snap-revision assertion for snap id {:?} does not have a matching account assertion for the developer {:?}",
                        rev.snap_id, rev.developer_id
                    )));
                }
                if self.find_declaration(RELEASE_SERIES, &rev.snap_id).is_err() {
                    return Err(DbError::Check(format!(
                        "snap-revision assertion for snap id {:?} does not have a matching snap-declaration assertion",
                        rev.snap_id
                    )));
                }
            }
            "snap-build" => {
                let build = assert.snap_build().ok_or_else(internal)?;
                if let Ok(decl) = self.find_declaration(RELEASE_SERIES, &build.snap_id) {
                    let decl_details = decl.snap_declaration().ok_or_else(internal)?;
                    if decl_details.publisher_id != authority
                        && !self.is_trusted_account(authority)
                    {
                        return Err(DbError::Check(format!(
                            "snap-build assertion for snap id {:?} is not signed by the publisher or a trusted authority: {authority}",
                            build.snap_id
                        )));
                    }
                }
            }
            "validation" => {
                let v = assert.validation().ok_or_else(internal)?;
                if self.find_declaration(&v.series, &v.approved_snap_id).is_err() {
                    return Err(DbError::Check(format!(
                        "validation assertion by snap-id {:?} does not have a matching snap-declaration assertion for approved-snap-id {:?}",
                        v.snap_id, v.approved_snap_id
                    )));
                }
                let gating = self.find_declaration(&v.series, &v.snap_id).map_err(|_| {
                    DbError::Check(format!(
                        "validation assertion by snap-id {:?} does not have a matching snap-declaration assertion",
                        v.snap_id
                    ))
                })?;
                let gating_details = gating.snap_declaration().ok_or_else(internal)?;
                if gating_details.publisher_id != authority {
                    return Err(DbError::Check(format!(
                        "validation assertion by snap {:?} (id {:?}) not signed by its publisher",
                        gating_details.snap_name, v.snap_id
                    )));
                }
            }
            "snap-developer" => {
                let dev = assert.snap_developer().ok_or_else(internal)?;
                if self
                    .find_declaration(RELEASE_SERIES, &dev.snap_id)
                    .is_err()
                {
                    return Err(DbError::Check(format!(
                        "snap-developer assertion for snap id {:?} does not have a matching snap-declaration assertion",
                        dev.snap_id
                    )));
                }
                if authority != dev.publisher_id && !self.is_trusted_account(authority) {
                    return Err(DbError::Check(format!(
                        "snap-developer must be signed by the publisher or a trusted authority but got authority {:?} and publisher {:?}",
                        authority, dev.publisher_id
                    )));
                }
                if self.find_account(&dev.publisher_id).is_err() {
                    return Err(DbError::Check(format!(
                        "snap-developer assertion for snap-id {:?} does not have a matching account assertion for the publisher {:?}",
                        dev.snap_id, dev.publisher_id
                    )));
                }
                for d in &dev.developers {
                    if self.find_account(&d.developer_id).is_err() {
                        return Err(DbError::Check(format!(
                            "snap-developer assertion for snap-id {:?} does not have a matching account assertion for the developer {:?}",
                            dev.snap_id, d.developer_id
                        )));
                    }
                }
            }
            "model" => {
                let model = assert.model().ok_or_else(internal)?;
                if authority != model.brand_id && !self.is_trusted_account(authority) {
                    return Err(DbError::Check(format!(
                        "model assertion for {:?} must be signed by its brand {:?} or a trusted authority: {authority}",
                        model.model, model.brand_id
                    )));
                }
            }
            "store" => {
                let store = assert.store().ok_or_else(internal)?;
                if authority != store.operator_id && !self.is_trusted_account(authority) {
                    return Err(DbError::Check(format!(
                        "store assertion for {:?} must be signed by its operator {:?} or a trusted authority: {authority}",
                        store.store, store.operator_id
                    )));
                }
                if self.find_account(&store.operator_id).is_err() {
                    return Err(DbError::Check(format!(
                        "store assertion for {:?} does not have a matching account assertion for the operator {:?}",
                        store.store, store.operator_id
                    )));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn internal() -> DbError {
    DbError::Check("internal error: assertion details do not match its type".to_string())
}
