//! Cache store for raw upstream documents.
//!
//! Each source key owns two files under the cache directory:
//! `<key>.raw` (the document, byte for byte) and `<key>.meta.json`
//! (`{"fetched_at": <unix secs>, "headers": {..}}`). Writes go through a
//! temp file plus rename while holding a per-key lock, so a reader never
//! observes a half-written entry.

use crate::error::CacheError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Allow-listed response headers, keyed by the configured spelling.
pub type HeaderSubset = BTreeMap<String, String>;

/// One cached document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub text: String,
    pub headers: HeaderSubset,
    pub fetched_at: SystemTime,
}

impl CacheEntry {
    pub fn new(text: impl Into<String>, headers: HeaderSubset) -> Self {
        Self {
            text: text.into(),
            headers,
            fetched_at: SystemTime::now(),
        }
    }

    /// Age relative to `now`; an entry stamped in the future counts as new.
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.fetched_at).unwrap_or_default()
    }
}

/// Persistent document cache, keyed by logical source key.
pub trait CacheStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;
    fn store(&self, key: &str, entry: &CacheEntry) -> Result<(), CacheError>;
}

/// Keys become file names: ASCII alphanumerics plus `-`, `_`, `.`, not
/// starting with a dot.
pub fn validate_key(key: &str) -> Result<(), CacheError> {
    let ok = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(CacheError::InvalidKey(key.to_string()))
    }
}

#[derive(Serialize, Deserialize)]
struct Meta {
    fetched_at: u64,
    #[serde(default)]
    headers: HeaderSubset,
}

/// Filesystem-backed store.
#[derive(Debug)]
pub struct FsCacheStore {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FsCacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn document_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.raw"))
    }

    pub fn meta_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.meta.json"))
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks.lock().entry(key.to_string()).or_default().clone()
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> CacheError + '_ {
    move |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl CacheStore for FsCacheStore {
    fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        validate_key(key)?;
        let lock = self.lock_for(key);
        let _guard = lock.lock();

        let doc_path = self.document_path(key);
        let text = match fs::read_to_string(&doc_path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&doc_path)(e)),
        };

        let meta_path = self.meta_path(key);
        let meta = fs::read(&meta_path)
            .ok()
            .and_then(|b| serde_json::from_slice::<Meta>(&b).ok());
        let (fetched_at, headers) = match meta {
            Some(m) => (UNIX_EPOCH + Duration::from_secs(m.fetched_at), m.headers),
            // Document without metadata: fall back to the file's mtime.
            None => {
                let mtime = fs::metadata(&doc_path)
                    .and_then(|m| m.modified())
                    .unwrap_or(UNIX_EPOCH);
                tracing::debug!(source = key, "cache metadata missing, using mtime");
                (mtime, HeaderSubset::new())
            }
        };
        Ok(Some(CacheEntry {
            text,
            headers,
            fetched_at,
        }))
    }

    fn store(&self, key: &str, entry: &CacheEntry) -> Result<(), CacheError> {
        validate_key(key)?;
        fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;
        let meta = Meta {
            fetched_at: entry
                .fetched_at
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            headers: entry.headers.clone(),
        };
        let meta_bytes = serde_json::to_vec_pretty(&meta)?;

        let lock = self.lock_for(key);
        let _guard = lock.lock();
        let doc_path = self.document_path(key);
        write_atomic(&doc_path, entry.text.as_bytes()).map_err(io_err(&doc_path))?;
        let meta_path = self.meta_path(key);
        write_atomic(&meta_path, &meta_bytes).map_err(io_err(&meta_path))?;
        Ok(())
    }
}

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Sibling temp name, unique per target file, process and call.
fn temp_path(path: &Path) -> io::Result<PathBuf> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::other("no parent dir"))?;
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::other("no file name"))?
        .to_string_lossy();
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    Ok(dir.join(format!(".{name}.{}.{seq}.tmp", std::process::id())))
}

/// Write `data` to a sibling temp file, fsync it, then rename over `path`.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let tmp = temp_path(path)?;

    let mut f = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&tmp)?;
    f.write_all(data)?;
    f.sync_all()?;
    drop(f);

    fs::rename(&tmp, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })
}

/// In-process store, for tests and one-shot CLI runs.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryCacheStore {
    fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        validate_key(key)?;
        Ok(self.entries.lock().get(key).cloned())
    }

    fn store(&self, key: &str, entry: &CacheEntry) -> Result<(), CacheError> {
        validate_key(key)?;
        self.entries.lock().insert(key.to_string(), entry.clone());
        Ok(())
    }
}
