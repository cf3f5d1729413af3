//! The backstore contract and the in-memory implementation.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use thiserror::Error;

use crate::assert::Assertion;
use crate::registry::AssertionType;

/// Errors from backstore operations.
#[derive(Debug, Error)]
pub enum BackstoreError {
    /// No assertion is stored under the requested key.
    #[error("assertion not found")]
    NotFound,
    /// The stored assertion's revision is at least as recent.
    #[error("assertion added must have more recent revision than current one (adding {adding}, currently {current})")]
    RevisionTooOld {
        /// The revision being added.
        adding: i64,
        /// The revision already stored.
        current: i64,
    },
    /// Stored content could not be read back consistently.
    #[error("broken assertion storage, {0}")]
    Broken(String),
    /// The operation was cancelled before its write became visible.
    #[error("operation cancelled")]
    Cancelled,
    /// An underlying I/O failure.
    #[error("{0}")]
    Io(String),
}

/// Persistent keyed storage of assertions by `(type, primary key)`.
pub trait Backstore: Send + Sync {
    /// Stores an assertion, replacing only older revisions at the same
    /// primary key. The write is atomic.
    fn put(&self, typ: &'static AssertionType, assert: &Assertion) -> Result<(), BackstoreError>;

    /// Returns the assertion at the primary key.
    fn get(
        &self,
        typ: &'static AssertionType,
        key: &[String],
    ) -> Result<Assertion, BackstoreError>;

    /// Invokes `found` on every stored assertion of `typ` whose headers
    /// contain all the given values; unspecified headers are wildcards.
    fn search(
        &self,
        typ: &'static AssertionType,
        headers: &BTreeMap<String, String>,
        found: &mut dyn FnMut(Assertion),
    ) -> Result<(), BackstoreError>;
}

/// Whether an assertion carries every given header value.
pub fn search_match(assert: &Assertion, headers: &BTreeMap<String, String>) -> bool {
    headers
        .iter()
        .all(|(name, value)| assert.header_string(name) == Some(value.as_str()))
}

/// An in-memory backstore, used for trusted sets and tests.
#[derive(Default)]
pub struct MemoryBackstore {
    top: RwLock<HashMap<&'static str, BTreeMap<String, Assertion>>>,
}

impl MemoryBackstore {
    /// Creates an empty store.
    pub fn new() -> MemoryBackstore {
        MemoryBackstore::default()
    }

    fn entry_key(key: &[String]) -> String {
        // NUL never appears in header values, so the join is unambiguous
        key.join("\u{0}")
    }
}

impl Backstore for MemoryBackstore {
    fn put(&self, typ: &'static AssertionType, assert: &Assertion) -> Result<(), BackstoreError> {
        let key = MemoryBackstore::entry_key(&assert.primary_key());
        let mut top = self.top.write();
        let entries = top.entry(typ.name).or_default();
        if let Some(current) = entries.get(&key) {
            if current.revision() >= assert.revision() {
                return Err(BackstoreError::RevisionTooOld {
                    adding: assert.revision(),
                    current: current.revision(),
                });
            }
        }
        entries.insert(key, assert.clone());
        Ok(())
    }

    fn get(
        &self,
        typ: &'static AssertionType,
        key: &[String],
    ) -> Result<Assertion, BackstoreError> {
        self.top
            .read()
            .get(typ.name)
            .and_then(|entries| entries.get(&MemoryBackstore::entry_key(key)))
            .cloned()
            .ok_or(BackstoreError::NotFound)
    }

    fn search(
        &self,
        typ: &'static AssertionType,
        headers: &BTreeMap<String, String>,
        found: &mut dyn FnMut(Assertion),
    ) -> Result<(), BackstoreError> {
        if let Some(entries) = self.top.read().get(typ.name) {
            for assert in entries.values() {
                if search_match(assert, headers) {
                    found(assert.clone());
                }
            }
        }
        Ok(())
    }
}
