//! Durable user identity.
//!
//! The quiz service tracks players by an opaque id that a client creates once
//! and then keeps reusing. [`IdentityProvider`] owns that rule; where the id
//! lives is up to the [`IdentityStore`] it is given.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rand::distributions::Uniform;
use rand::Rng;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("failed to access identity store at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("identity store at {path} is corrupted: {source}")]
    Corrupted {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Small string key-value store that survives restarts.
pub trait IdentityStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, IdentityError>;
    fn set(&self, key: &str, value: &str) -> Result<(), IdentityError>;
}

/// Key-value pairs kept in a single JSON object on disk.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, IdentityError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(IdentityError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|source| IdentityError::Corrupted {
            path: self.path.clone(),
            source,
        })
    }

    fn write_all(&self, values: &BTreeMap<String, String>) -> Result<(), IdentityError> {
        let io_err = |source| IdentityError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let body = serde_json::to_string_pretty(values).map_err(|source| IdentityError::Corrupted {
            path: self.path.clone(),
            source,
        })?;
        // Write next to the target and rename so a crash never leaves half a file.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

impl IdentityStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, IdentityError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), IdentityError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut values = self.read_all()?;
        values.insert(key.to_string(), value.to_string());
        self.write_all(&values)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: String,
}

pub struct IdentityProvider<'a> {
    store: &'a dyn IdentityStore,
    key: String,
}

impl<'a> IdentityProvider<'a> {
    pub const DEFAULT_KEY: &'static str = "userId";

    pub fn new(store: &'a dyn IdentityStore, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Returns the stored identity, creating and persisting one on first use.
    pub fn identity(&self) -> Result<UserIdentity, IdentityError> {
        if let Some(user_id) = self.store.get(&self.key)? {
            if !user_id.is_empty() {
                return Ok(UserIdentity { user_id });
            }
        }
        let user_id = generate_user_id();
        log::info!("Assigned new user id {} under key '{}'", user_id, self.key);
        self.store.set(&self.key, &user_id)?;
        Ok(UserIdentity { user_id })
    }
}

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `user_` followed by nine random base-36 characters.
pub fn generate_user_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(Uniform::from(0..BASE36.len()))
        .take(9)
        .map(|i| BASE36[i] as char)
        .collect();
    format!("user_{}", suffix)
}
