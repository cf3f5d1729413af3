//! The filesystem-backed assertion store.
//!
//! Layout: `<root>/asserts-v0/<type>/<escape(k1)>/…/<escape(kn)>/active`,
//! every primary-key component URL-query-escaped. Writes replace the
//! `active` file through a temp file + rename, so a half-written
//! assertion is never observable; a writer lock serializes puts while
//! readers proceed concurrently.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use thiserror::Error;
use tracing::debug;

use assertd_asserts::backstore::search_match;
use assertd_asserts::registry::AssertionType;
use assertd_asserts::{decode, Assertion, Backstore, BackstoreError};
use assertd_types::CancelToken;

const ASSERTIONS_ROOT: &str = "asserts-v0";
const ACTIVE_FNAME: &str = "active";

// the characters Go's url.QueryEscape leaves alone
const PATH_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn escape(comp: &str) -> String {
    utf8_percent_encode(comp, PATH_ESCAPE).to_string()
}

fn unescape(comp: &str) -> Result<String, String> {
    percent_decode_str(comp)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| e.to_string())
}

/// A per-entry consistency problem reported by [`FsBackstore::scan`].
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ScanError(String);

/// The filesystem backstore.
pub struct FsBackstore {
    top: PathBuf,
    lock: RwLock<()>,
    cancel: CancelToken,
}

#[cfg(unix)]
fn world_writable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o002 != 0
}

#[cfg(not(unix))]
fn world_writable(_meta: &fs::Metadata) -> bool {
    false
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

impl FsBackstore {
    /// Opens (creating if needed) a filesystem backstore under `path`.
    pub fn open(path: &Path, cancel: CancelToken) -> Result<FsBackstore, BackstoreError> {
        let top = path.join(ASSERTIONS_ROOT);
        fs::create_dir_all(&top).map_err(|e| BackstoreError::Io(e.to_string()))?;
        set_mode(&top, 0o775).map_err(|e| BackstoreError::Io(e.to_string()))?;
        Ok(FsBackstore {
            top,
            lock: RwLock::new(()),
            cancel,
        })
    }

    fn entry_path(&self, typ: &AssertionType, key: &[String]) -> PathBuf {
        let mut path = self.top.join(typ.name);
        for comp in key {
            path.push(escape(comp));
        }
        path.push(ACTIVE_FNAME);
        path
    }

    fn read_assertion(
        &self,
        typ: &'static AssertionType,
        path: &Path,
    ) -> Result<Assertion, BackstoreError> {
        let encoded = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackstoreError::NotFound)
            }
            Err(e) => {
                return Err(BackstoreError::Broken(format!(
                    "failed to read assertion: {e}"
                )))
            }
        };
        let assert = decode(&encoded)
            .map_err(|e| BackstoreError::Broken(format!("failed to decode assertion: {e}")))?;
        if assert.assert_type() != typ {
            return Err(BackstoreError::Broken(format!(
                "assertion that is not of type {:?} under its storage tree",
                typ.name
            )));
        }
        Ok(assert)
    }

    fn write_entry(&self, path: &Path, encoded: &[u8]) -> Result<(), BackstoreError> {
        let parent = path
            .parent()
            .ok_or_else(|| BackstoreError::Io("entry path has no parent".to_string()))?;
        fs::create_dir_all(parent).map_err(|e| BackstoreError::Io(e.to_string()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| BackstoreError::Io(e.to_string()))?;
        tmp.write_all(encoded)
            .and_then(|()| tmp.flush())
            .map_err(|e| BackstoreError::Io(e.to_string()))?;
        set_mode(tmp.path(), 0o644).map_err(|e| BackstoreError::Io(e.to_string()))?;
        if self.cancel.is_cancelled() {
            // the temp file is dropped, nothing became visible
            return Err(BackstoreError::Cancelled);
        }
        tmp.persist(path)
            .map_err(|e| BackstoreError::Io(e.to_string()))?;
        Ok(())
    }

    fn search_pattern(
        &self,
        typ: &AssertionType,
        headers: &BTreeMap<String, String>,
    ) -> Vec<Option<String>> {
        typ.primary_key
            .iter()
            .map(|k| headers.get(*k).map(|v| escape(v)))
            .collect()
    }

    fn find_candidates(
        &self,
        dir: &Path,
        pattern: &[Option<String>],
        candidates: &mut Vec<PathBuf>,
    ) -> Result<(), BackstoreError> {
        let (head, rest) = match pattern.split_first() {
            None => {
                let active = dir.join(ACTIVE_FNAME);
                if active.is_file() {
                    candidates.push(active);
                }
                return Ok(());
            }
            Some(split) => split,
        };
        match head {
            Some(comp) => {
                let sub = dir.join(comp);
                if sub.is_dir() {
                    self.find_candidates(&sub, rest, candidates)?;
                }
            }
            None => {
                let entries = match fs::read_dir(dir) {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                    Err(e) => return Err(BackstoreError::Io(e.to_string())),
                };
                let mut names: Vec<PathBuf> = Vec::new();
                for entry in entries {
                    let entry = entry.map_err(|e| BackstoreError::Io(e.to_string()))?;
                    names.push(entry.path());
                }
                names.sort();
                for sub in names {
                    if sub.is_dir() {
                        self.find_candidates(&sub, rest, candidates)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Walks every persisted entry of `typ`, reporting per-entry
    /// consistency problems through `visit` and continuing.
    ///
    /// A successful visit guarantees the on-disk primary-key path
    /// components agree with the assertion's headers.
    pub fn scan(
        &self,
        typ: &'static AssertionType,
        visit: &mut dyn FnMut(Result<Assertion, ScanError>),
    ) {
        let type_top = self.top.join(typ.name);
        if !type_top.exists() {
            // nothing to scan
            return;
        }
        self.scan_dir(typ, &type_top, &type_top, 0, visit);
    }

    fn scan_dir(
        &self,
        typ: &'static AssertionType,
        type_top: &Path,
        dir: &Path,
        depth: usize,
        visit: &mut dyn FnMut(Result<Assertion, ScanError>),
    ) {
        let scan_err = |path: &Path, msg: String| {
            ScanError(format!("scan {} \"{}\": {}", typ.name, path.display(), msg))
        };
        match fs::metadata(dir) {
            Ok(meta) => {
                if world_writable(&meta) {
                    visit(Err(scan_err(
                        dir,
                        "directory is unexpectedly world-writable".to_string(),
                    )));
                }
            }
            Err(e) => {
                visit(Err(scan_err(dir, e.to_string())));
                return;
            }
        }
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                visit(Err(scan_err(dir, e.to_string())));
                return;
            }
        };
        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in entries {
            match entry {
                Ok(entry) => paths.push(entry.path()),
                Err(e) => visit(Err(scan_err(dir, e.to_string()))),
            }
        }
        paths.sort();

        let n = typ.primary_key.len();
        for path in paths {
            let meta = match fs::symlink_metadata(&path) {
                Ok(meta) => meta,
                Err(e) => {
                    visit(Err(scan_err(&path, e.to_string())));
                    continue;
                }
            };
            if depth < n {
                if !meta.is_dir() {
                    visit(Err(scan_err(&path, "expected directory".to_string())));
                    continue;
                }
                self.scan_dir(typ, type_top, &path, depth + 1, visit);
                continue;
            }
            // at full primary-key depth only the active file is expected
            if !meta.is_file() {
                visit(Err(scan_err(&path, "expected regular file".to_string())));
                continue;
            }
            let fname = path.file_name().and_then(|f| f.to_str()).unwrap_or("");
            if fname != ACTIVE_FNAME {
                visit(Err(scan_err(
                    &path,
                    format!("assertion file unexpectedly not named {ACTIVE_FNAME:?}"),
                )));
                continue;
            }
            if world_writable(&meta) {
                visit(Err(scan_err(&path, "is unexpectedly world-writable".to_string())));
            }
            let assert = match self.read_assertion(typ, &path) {
                Ok(a) => a,
                Err(e) => {
                    visit(Err(scan_err(&path, e.to_string())));
                    continue;
                }
            };
            // compare escaped path components back against the headers
            let rel = match path.parent().and_then(|p| p.strip_prefix(type_top).ok()) {
                Some(rel) => rel,
                None => {
                    visit(Err(scan_err(&path, "unexpected location".to_string())));
                    continue;
                }
            };
            let comps: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            let mut mismatch = false;
            for (comp, key) in comps.iter().zip(typ.primary_key.iter()) {
                let value = match unescape(comp) {
                    Ok(v) => v,
                    Err(e) => {
                        visit(Err(scan_err(
                            &path,
                            format!(
                                "disk path {comp:?} could not be unescaped to a key value: {e}"
                            ),
                        )));
                        mismatch = true;
                        continue;
                    }
                };
                if assert.header_string(key) != Some(value.as_str()) {
                    visit(Err(scan_err(
                        &path,
                        format!(
                            "disk path key value {:?} for {:?} does not match assertion content: {:?}",
                            value,
                            key,
                            assert.header_string(key).unwrap_or("")
                        ),
                    )));
                    mismatch = true;
                }
            }
            if !mismatch {
                visit(Ok(assert));
            }
        }
    }
}

impl Backstore for FsBackstore {
    fn put(&self, typ: &'static AssertionType, assert: &Assertion) -> Result<(), BackstoreError> {
        let _w = self.lock.write();
        let path = self.entry_path(typ, &assert.primary_key());
        match self.read_assertion(typ, &path) {
            Ok(current) => {
                if current.revision() >= assert.revision() {
                    return Err(BackstoreError::RevisionTooOld {
                        adding: assert.revision(),
                        current: current.revision(),
                    });
                }
            }
            Err(BackstoreError::NotFound) => {}
            Err(e) => return Err(e),
        }
        self.write_entry(&path, &assert.encode())?;
        debug!(typ = typ.name, path = %path.display(), "assertion persisted");
        Ok(())
    }

    fn get(
        &self,
        typ: &'static AssertionType,
        key: &[String],
    ) -> Result<Assertion, BackstoreError> {
        let _r = self.lock.read();
        self.read_assertion(typ, &self.entry_path(typ, key))
    }

    fn search(
        &self,
        typ: &'static AssertionType,
        headers: &BTreeMap<String, String>,
        found: &mut dyn FnMut(Assertion),
    ) -> Result<(), BackstoreError> {
        let _r = self.lock.read();
        let type_top = self.top.join(typ.name);
        if !type_top.exists() {
            return Ok(());
        }
        let pattern = self.search_pattern(typ, headers);
        let mut candidates = Vec::new();
        self.find_candidates(&type_top, &pattern, &mut candidates)
            .map_err(|e| {
                BackstoreError::Broken(format!("searching for {}: {e}", typ.name))
            })?;
        for path in candidates {
            let assert = self.read_assertion(typ, &path)?;
            if search_match(&assert, headers) {
                found(assert);
            }
        }
        Ok(())
    }
}
