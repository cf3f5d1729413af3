//! The keypair manager seam.
//!
//! The trust database only ever talks to this trait; implementations may
//! wrap hardware key storage or, as here, a locked in-memory table.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::CryptoError;
use crate::keys::{PrivateKey, Signature};

/// Holds private keys indexed by their public-key id.
pub trait KeypairManager: Send + Sync {
    /// Stores a key, optionally under an operator-facing name.
    fn put(&self, name: Option<&str>, key: PrivateKey) -> Result<(), CryptoError>;

    /// Reports whether a key with the given id is stored.
    fn has(&self, key_id: &str) -> bool;

    /// Returns the key with the given id.
    fn get(&self, key_id: &str) -> Result<PrivateKey, CryptoError>;

    /// Returns the key stored under the given name.
    fn by_name(&self, name: &str) -> Result<PrivateKey, CryptoError>;

    /// Signs `content` with the key under `key_id`.
    fn sign(&self, key_id: &str, content: &[u8]) -> Result<Signature, CryptoError> {
        Ok(self.get(key_id)?.sign(content))
    }

    /// Iterates stored keys; the visitor returns `true` to stop early.
    fn walk(&self, visit: &mut dyn FnMut(&PrivateKey, &str) -> bool);
}

#[derive(Default)]
struct Keyring {
    by_id: HashMap<String, PrivateKey>,
    names: HashMap<String, String>,
}

/// An in-memory keypair manager.
#[derive(Default)]
pub struct MemoryKeypairManager {
    keyring: RwLock<Keyring>,
}

impl MemoryKeypairManager {
    /// Creates an empty manager.
    pub fn new() -> MemoryKeypairManager {
        MemoryKeypairManager::default()
    }
}

impl KeypairManager for MemoryKeypairManager {
    fn put(&self, name: Option<&str>, key: PrivateKey) -> Result<(), CryptoError> {
        let key_id = key.id();
        let mut keyring = self.keyring.write();
        if keyring.by_id.contains_key(&key_id) {
            return Err(CryptoError::KeyExists(key_id));
        }
        if let Some(name) = name {
            if keyring.names.contains_key(name) {
                return Err(CryptoError::KeyExists(name.to_string()));
            }
            keyring.names.insert(name.to_string(), key_id.clone());
        }
        keyring.by_id.insert(key_id, key);
        Ok(())
    }

    fn has(&self, key_id: &str) -> bool {
        self.keyring.read().by_id.contains_key(key_id)
    }

    fn get(&self, key_id: &str) -> Result<PrivateKey, CryptoError> {
        self.keyring
            .read()
            .by_id
            .get(key_id)
            .cloned()
            .ok_or_else(|| CryptoError::KeyNotFound(key_id.to_string()))
    }

    fn by_name(&self, name: &str) -> Result<PrivateKey, CryptoError> {
        let keyring = self.keyring.read();
        let key_id = keyring
            .names
            .get(name)
            .ok_or_else(|| CryptoError::KeyNameNotFound(name.to_string()))?;
        keyring
            .by_id
            .get(key_id)
            .cloned()
            .ok_or_else(|| CryptoError::KeyNotFound(key_id.clone()))
    }

    fn walk(&self, visit: &mut dyn FnMut(&PrivateKey, &str) -> bool) {
        for (key_id, key) in self.keyring.read().by_id.iter() {
            if visit(key, key_id) {
                break;
            }
        }
    }
}
