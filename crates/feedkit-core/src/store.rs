//! # Key-Value Store
//!
//! The pipeline persists only opaque blobs: staged input rows, cached
//! per-comment analyses and final result documents. [`KeyValueStore`] is the
//! whole interface; there is no querying.
//!
//! Two implementations ship with the crate: [`MemoryStore`] for tests and
//! one-shot runs, and [`FileStore`], one file per key under a directory.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::error::{FeedkitError, Result};

/// Opaque blob storage with optional per-key expiry.
pub trait KeyValueStore: Send + Sync {
    /// Value for `key`, or `None` if missing or expired.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value. `ttl = None`
    /// keeps it forever.
    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn expiry_from(ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|ttl| now_millis().saturating_add(ttl.as_millis().min(i64::MAX as u128) as i64))
}

fn is_expired(expires_at: Option<i64>) -> bool {
    expires_at.is_some_and(|at| now_millis() >= at)
}

/// In-process store. Expired entries are dropped on read.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (Vec<u8>, Option<i64>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (Vec<u8>, Option<i64>)>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some((_, expires_at)) if is_expired(*expires_at) => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.lock()
            .insert(key.to_string(), (value.to_vec(), expiry_from(ttl)));
        Ok(())
    }
}

/// Directory-backed store.
///
/// Each key maps to `<dir>/<sha256(key)>.kv`. The first line of the file is
/// the expiry (`expires <unix-millis>` or `expires never`), the rest is the
/// raw value. Writes go to a temp file that is synced and then renamed into
/// place, so a reader never sees a half-written value.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

const HEADER_PREFIX: &str = "expires ";

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| FeedkitError::Output {
            message: format!("Failed to create store directory {}", dir.display()),
            source: e,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{:x}.kv", digest))
    }

    fn storage_err(key: &str, message: String) -> FeedkitError {
        FeedkitError::Storage {
            key: key.to_string(),
            message,
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::storage_err(key, format!("read {}: {}", path.display(), e))),
        };

        let newline = content
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| Self::storage_err(key, "missing expiry header".to_string()))?;
        let header = std::str::from_utf8(&content[..newline])
            .map_err(|e| Self::storage_err(key, format!("bad expiry header: {}", e)))?;

        let expires_at = match header.strip_prefix(HEADER_PREFIX) {
            Some("never") => None,
            Some(millis) => Some(
                millis
                    .parse::<i64>()
                    .map_err(|e| Self::storage_err(key, format!("bad expiry '{}': {}", millis, e)))?,
            ),
            None => return Err(Self::storage_err(key, format!("bad expiry header '{}'", header))),
        };

        if is_expired(expires_at) {
            tracing::debug!(key, "store entry expired");
            let _ = fs::remove_file(&path);
            return Ok(None);
        }

        Ok(Some(content[newline + 1..].to_vec()))
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let path = self.path_for(key);
        let tmp_path = path.with_extension("kv.tmp");

        let header = match expiry_from(ttl) {
            Some(at) => format!("{}{}\n", HEADER_PREFIX, at),
            None => format!("{}never\n", HEADER_PREFIX),
        };

        let write_result = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(header.as_bytes())?;
            file.write_all(value)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &path)?;
            Ok(())
        })();

        if let Err(e) = write_result {
            let _ = fs::remove_file(&tmp_path);
            return Err(Self::storage_err(key, format!("write {}: {}", path.display(), e)));
        }
        Ok(())
    }
}
