//! # Persisted State
//!
//! Rate-limit buckets, ban records and the audit snapshot all survive restarts
//! through a [`KeyValueStore`]. The in-memory store is the default; the file
//! store covers a single host; a shared backend (Redis, SQL, ...) plugs in
//! behind the same trait when more than one instance must agree.
//!
//! Each subsystem writes under its own [`Namespace`], so three subsystems can
//! share one keyspace without colliding:
//!
//! ```text
//! audit/v1/entries
//! ratelimit/v1/open_pack:device-a
//! bans/v1/records
//! ```

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use siphasher::sip128::{Hasher128, SipHasher13};
use std::collections::HashMap;
use std::hash::Hasher;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{StoreError, StoreResult};

/// A string key/value store.
///
/// Implementations must be safe to share across threads. Every call may fail;
/// callers decide how to degrade.
pub trait KeyValueStore: Send + Sync {
    /// Reads a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Writes a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write.
    fn put(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Deletes a value. Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn remove(&self, key: &str) -> StoreResult<()>;

    /// Lists keys starting with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be listed.
    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

/// Shared store handle.
pub type SharedStore = Arc<dyn KeyValueStore>;

/// A versioned key prefix owned by one subsystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Namespace {
    name: &'static str,
    version: u32,
}

impl Namespace {
    /// Creates a namespace.
    #[must_use]
    pub const fn new(name: &'static str, version: u32) -> Self {
        Self { name, version }
    }

    /// Prefix shared by every key in this namespace.
    #[must_use]
    pub fn prefix(&self) -> String {
        format!("{}/v{}/", self.name, self.version)
    }

    /// Full key for `key`.
    #[must_use]
    pub fn key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix())
    }

    /// Reads and decodes a JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or the value does not decode.
    pub fn load_json<T: DeserializeOwned>(
        &self,
        store: &dyn KeyValueStore,
        key: &str,
    ) -> StoreResult<Option<T>> {
        match store.get(&self.key(key))? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    /// Encodes and writes a JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the backend rejects the write.
    pub fn save_json<T: Serialize + ?Sized>(
        &self,
        store: &dyn KeyValueStore,
        key: &str,
        value: &T,
    ) -> StoreResult<()> {
        let text = serde_json::to_string(value)?;
        store.put(&self.key(key), &text)
    }

    /// Lists keys in this namespace with the prefix stripped.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be listed.
    pub fn list(&self, store: &dyn KeyValueStore) -> StoreResult<Vec<String>> {
        let prefix = self.prefix();
        Ok(store
            .keys_with_prefix(&prefix)?
            .into_iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }
}

/// In-memory store.
///
/// Optionally enforces a byte quota (sum of key and value lengths) and can be
/// switched offline, which lets tests exercise every degradation path.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    quota: Option<usize>,
    offline: AtomicBool,
    writes: AtomicU64,
}

impl MemoryStore {
    /// Unlimited store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that rejects writes once `bytes` would be exceeded.
    #[must_use]
    pub fn with_quota(bytes: usize) -> Self {
        Self { quota: Some(bytes), ..Self::default() }
    }

    /// Shared unlimited store.
    #[must_use]
    pub fn shared() -> SharedStore {
        Arc::new(Self::new())
    }

    /// Simulates the backend going away (`true`) or coming back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_online()?;
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check_online()?;
        let mut entries = self.entries.lock();
        if let Some(quota) = self.quota {
            let others: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let used = others + key.len() + value.len();
            if used > quota {
                return Err(StoreError::QuotaExceeded { used, quota });
            }
        }
        entries.insert(key.to_string(), value.to_string());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.check_online()?;
        self.entries.lock().remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.check_online()?;
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Longest file stem written, well under the usual 255-byte name limit.
const MAX_STEM_LEN: usize = 200;

/// One file per key under a root directory.
///
/// Keys are escaped into safe file names; writes go to a temp file first and
/// are renamed into place so a crash never leaves a torn value. A key whose
/// escaped form is too long is stored under a truncated name ending in `~`
/// and a hash, with the full key in a `.key` file beside it.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root, lock: Mutex::new(()) })
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", file_stem(key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, value: &str) -> StoreResult<()> {
        let _guard = self.lock.lock();
        let path = self.path_for(key);
        if is_hashed(&path) {
            fs::write(path.with_extension("key"), key)?;
        }
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let _guard = self.lock.lock();
        let path = self.path_for(key);
        if is_hashed(&path) {
            remove_if_present(&path.with_extension("key"))?;
        }
        remove_if_present(&path)
    }

    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let name = entry?.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            let key = if stem.contains('~') {
                fs::read_to_string(self.root.join(format!("{stem}.key"))).ok()
            } else {
                decode_key(stem)
            };
            if let Some(key) = key {
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn remove_if_present(path: &Path) -> StoreResult<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

fn is_hashed(path: &Path) -> bool {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| stem.contains('~'))
}

/// File stem for `key`: its escaped form, or a truncated prefix plus a
/// 128-bit hash when that would be too long.
fn file_stem(key: &str) -> String {
    let encoded = encode_key(key);
    if encoded.len() <= MAX_STEM_LEN {
        return encoded;
    }
    let mut hasher = SipHasher13::new();
    hasher.write(key.as_bytes());
    let hash = hasher.finish128();

    // Room for `~` and 32 hex digits; never split a `%XX` escape.
    let mut cut = MAX_STEM_LEN - 33;
    if let Some(pos) = encoded[..cut].rfind('%') {
        if pos + 3 > cut {
            cut = pos;
        }
    }
    format!("{}~{:016x}{:016x}", &encoded[..cut], hash.h1, hash.h2)
}

/// Escapes a key into `[A-Za-z0-9_.-]` plus `%XX` byte escapes.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-' | b'.') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
