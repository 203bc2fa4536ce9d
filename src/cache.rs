use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::UsiError;

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    key: String,
    value: Value,
}

/// Durable memo of successful resolutions and comparisons.
///
/// Entries live at `<root>/entries/<sha256(key)>.json` and are written once;
/// an existing entry is never replaced. Lock files under `<root>/locks` mark
/// keys that some process is currently computing.
#[derive(Debug)]
pub struct ResolutionCache {
    root: Utf8PathBuf,
    memory: Mutex<HashMap<String, Value>>,
}

impl ResolutionCache {
    pub fn open(root: Utf8PathBuf) -> Result<Self, UsiError> {
        for dir in [root.join("entries"), root.join("locks")] {
            fs::create_dir_all(dir.as_std_path())
                .map_err(|err| UsiError::Filesystem(format!("create {dir}: {err}")))?;
        }
        Ok(Self {
            root,
            memory: Mutex::new(HashMap::new()),
        })
    }

    /// `~/.cache/usi-resolver`
    pub fn default_root() -> Result<Utf8PathBuf, UsiError> {
        BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("usi-resolver")).ok()
            })
            .ok_or_else(|| UsiError::Filesystem("unable to resolve cache directory".to_string()))
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn entry_path(&self, key: &str) -> Utf8PathBuf {
        self.root.join("entries").join(format!("{}.json", digest(key)))
    }

    pub fn lock_path(&self, key: &str) -> Utf8PathBuf {
        self.root.join("locks").join(format!("{}.lock", digest(key)))
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>, UsiError> {
        if let Some(value) = self.memory_lock().get(key) {
            return Ok(Some(value.clone()));
        }
        let path = self.entry_path(key);
        let content = match fs::read_to_string(path.as_std_path()) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(UsiError::Filesystem(format!("read {path}: {err}"))),
        };
        let entry: CacheEntry = match serde_json::from_str(&content) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(%path, error = %err, "ignoring unreadable cache entry");
                return Ok(None);
            }
        };
        if entry.key != key {
            warn!(%path, "cache entry key mismatch");
            return Ok(None);
        }
        debug!(key, "cache hit on disk");
        self.memory_lock()
            .insert(key.to_string(), entry.value.clone());
        Ok(Some(entry.value))
    }

    /// Stores `value` under `key` unless an entry already exists.
    pub fn put(&self, key: &str, value: &Value) -> Result<(), UsiError> {
        let path = self.entry_path(key);
        let entry = CacheEntry {
            key: key.to_string(),
            value: value.clone(),
        };
        let content =
            serde_json::to_vec(&entry).map_err(|err| UsiError::Cache(err.to_string()))?;
        if write_new_atomic(&path, &content)? {
            self.memory_lock().insert(key.to_string(), value.clone());
        }
        Ok(())
    }

    /// Claims the cross-process lock for `key`.
    ///
    /// Returns `None` while another holder's lock is younger than `stale_after`.
    /// A held lock is touched every `stale_after / 3` so it never looks stale
    /// while its owner is alive, however long the computation takes.
    pub fn try_lock(&self, key: &str, stale_after: Duration) -> Result<Option<KeyLock>, UsiError> {
        let path = self.lock_path(key);
        let token = lock_token();
        for _ in 0..2 {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path.as_std_path())
            {
                Ok(mut file) => {
                    file.write_all(token.as_bytes())
                        .map_err(|err| UsiError::Filesystem(format!("lock {path}: {err}")))?;
                    let heartbeat = Heartbeat::start(&path, &token, stale_after / 3);
                    return Ok(Some(KeyLock {
                        path,
                        token,
                        heartbeat,
                    }));
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    if !is_stale(&path, stale_after) || !reclaim(&path, &token, stale_after)? {
                        return Ok(None);
                    }
                }
                Err(err) => return Err(UsiError::Filesystem(format!("lock {path}: {err}"))),
            }
        }
        Ok(None)
    }

    pub fn release(&self, lock: KeyLock) {
        drop(lock);
    }

    fn memory_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        self.memory.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Held cross-process lock.
///
/// The lock file carries a token unique to this holder; on drop the file is
/// removed only if it still carries that token.
#[derive(Debug)]
pub struct KeyLock {
    path: Utf8PathBuf,
    token: String,
    heartbeat: Option<Heartbeat>,
}

impl KeyLock {
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        holds(&self.path, &self.token)
    }
}

impl Drop for KeyLock {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.stop();
        }
        if !self.is_held() {
            warn!(path = %self.path, "lock was reclaimed by another holder");
            return;
        }
        if let Err(err) = fs::remove_file(self.path.as_std_path()) {
            warn!(path = %self.path, error = %err, "failed to remove lock file");
        }
    }
}

/// Background thread refreshing a held lock's modification time.
#[derive(Debug)]
struct Heartbeat {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl Heartbeat {
    fn start(path: &Utf8Path, token: &str, every: Duration) -> Option<Self> {
        let every = every.max(Duration::from_millis(10));
        let (stop, stopped) = mpsc::channel::<()>();
        let path = path.to_path_buf();
        let token = token.to_string();
        let spawned = thread::Builder::new()
            .name("usi-lock-heartbeat".to_string())
            .spawn(move || {
                while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(every) {
                    if !holds(&path, &token) {
                        return;
                    }
                    let touched = OpenOptions::new()
                        .write(true)
                        .open(path.as_std_path())
                        .and_then(|file| file.set_modified(SystemTime::now()));
                    if let Err(err) = touched {
                        warn!(%path, error = %err, "failed to refresh lock");
                    }
                }
            });
        match spawned {
            Ok(handle) => Some(Self { stop, handle }),
            Err(err) => {
                warn!(error = %err, "lock heartbeat unavailable");
                None
            }
        }
    }

    fn stop(self) {
        drop(self.stop);
        let _ = self.handle.join();
    }
}

pub fn digest(key: &str) -> String {
    let hash = Sha256::digest(key.as_bytes());
    hash.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn is_stale(path: &Utf8Path, stale_after: Duration) -> bool {
    fs::metadata(path.as_std_path())
        .and_then(|meta| meta.modified())
        .map(|modified| {
            SystemTime::now()
                .duration_since(modified)
                .unwrap_or_default()
                > stale_after
        })
        .unwrap_or(false)
}

fn holds(path: &Utf8Path, token: &str) -> bool {
    fs::read_to_string(path.as_std_path()).is_ok_and(|content| content == token)
}

fn lock_token() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    format!(
        "{}-{nanos}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Moves a stale lock aside so exactly one reclaimer gets to replace it.
///
/// Returns `false` when the lock turned out to be live after all.
fn reclaim(path: &Utf8Path, token: &str, stale_after: Duration) -> Result<bool, UsiError> {
    let tombstone = path.with_extension(format!("stale-{token}"));
    match fs::rename(path.as_std_path(), tombstone.as_std_path()) {
        Ok(()) => {}
        // Released or reclaimed by someone else meanwhile.
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(err) => return Err(UsiError::Filesystem(format!("reclaim {path}: {err}"))),
    }
    if !is_stale(&tombstone, stale_after) {
        // A fresh lock replaced the stale one before the rename; put it back.
        let _ = fs::hard_link(tombstone.as_std_path(), path.as_std_path());
        let _ = fs::remove_file(tombstone.as_std_path());
        return Ok(false);
    }
    warn!(%path, "reclaimed stale lock");
    let _ = fs::remove_file(tombstone.as_std_path());
    Ok(true)
}

/// Returns `false` when an entry was already present at `path`.
fn write_new_atomic(path: &Utf8Path, content: &[u8]) -> Result<bool, UsiError> {
    let parent = path
        .parent()
        .ok_or_else(|| UsiError::Filesystem("invalid cache entry path".to_string()))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| UsiError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix("usi-entry")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| UsiError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| UsiError::Filesystem(err.to_string()))?;
    match temp.persist_noclobber(path.as_std_path()) {
        Ok(_) => Ok(true),
        Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
            debug!(%path, "cache entry already present");
            Ok(false)
        }
        Err(err) => Err(UsiError::Filesystem(err.error.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn temp_cache() -> (tempfile::TempDir, ResolutionCache) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("cache")).unwrap();
        let cache = ResolutionCache::open(root).unwrap();
        (temp, cache)
    }

    #[test]
    fn entries_survive_reopen() {
        let (_temp, cache) = temp_cache();
        cache.put("usi", &json!({"score": 1.0})).unwrap();
        let reopened = ResolutionCache::open(cache.root().to_path_buf()).unwrap();
        assert_eq!(reopened.get("usi").unwrap(), Some(json!({"score": 1.0})));
        assert_eq!(reopened.get("other").unwrap(), None);
    }

    #[test]
    fn existing_entry_is_not_replaced() {
        let (_temp, cache) = temp_cache();
        cache.put("k", &json!(1)).unwrap();
        cache.put("k", &json!(2)).unwrap();
        assert_eq!(cache.get("k").unwrap(), Some(json!(1)));
        let reopened = ResolutionCache::open(cache.root().to_path_buf()).unwrap();
        assert_eq!(reopened.get("k").unwrap(), Some(json!(1)));
    }

    #[test]
    fn lock_is_exclusive_until_released() {
        let (_temp, cache) = temp_cache();
        let held = cache.try_lock("k", Duration::from_secs(60)).unwrap().unwrap();
        assert!(cache.try_lock("k", Duration::from_secs(60)).unwrap().is_none());
        cache.release(held);
        assert!(cache.try_lock("k", Duration::from_secs(60)).unwrap().is_some());
    }

    #[test]
    fn held_lock_stays_fresh_past_its_stale_age() {
        let (_temp, cache) = temp_cache();
        let stale_after = Duration::from_millis(90);
        let held = cache.try_lock("k", stale_after).unwrap().unwrap();
        std::thread::sleep(Duration::from_millis(400));
        assert!(cache.try_lock("k", stale_after).unwrap().is_none());
        assert!(held.is_held());
    }

    #[test]
    fn reclaimed_lock_survives_the_previous_holder_dropping() {
        let (_temp, cache) = temp_cache();
        let stale_after = Duration::from_secs(60);
        let abandoned = cache.try_lock("k", stale_after).unwrap().unwrap();
        OpenOptions::new()
            .write(true)
            .open(abandoned.path().as_std_path())
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(120))
            .unwrap();

        let current = cache.try_lock("k", stale_after).unwrap().unwrap();
        assert!(!abandoned.is_held());
        drop(abandoned);
        assert!(current.is_held());
        assert!(cache.try_lock("k", stale_after).unwrap().is_none());

        drop(current);
        assert!(!cache.lock_path("k").exists());
        let leftovers = fs::read_dir(cache.root().join("locks").as_std_path())
            .unwrap()
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn digest_is_hex_sha256() {
        assert_eq!(
            digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
