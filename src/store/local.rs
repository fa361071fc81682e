//! Local fallback key-value stores

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use log::{debug, trace};

use crate::error::{Error, Result};

/// Synchronous key-value persistence on the client device.
///
/// Implementations may be capacity-limited and may be unavailable altogether.
pub trait LocalStore: Send + Sync {
    /// Whether the store can currently be read and written.
    fn is_available(&self) -> bool;

    fn get_item(&self, key: &str) -> Result<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    fn remove_item(&self, key: &str) -> Result<()>;
}

fn check_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::validation(format!("invalid local store key '{}'", key)))
    }
}

const WRITE_CHECK_FILE: &str = "__t";

/// One JSON file per key inside a directory, limited to `quota` bytes in total.
///
/// Whether the directory is writable is checked on first use only.
#[derive(Debug, Clone)]
pub struct FileLocalStore {
    dir: PathBuf,
    quota: usize,
    available: OnceLock<bool>,
}

impl FileLocalStore {
    pub fn new(dir: impl Into<PathBuf>, quota: usize) -> Self {
        Self {
            dir: dir.into(),
            quota,
            available: OnceLock::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Bytes used by every stored key except `skip`. Temporary files and
    /// anything that is not a key file are not counted.
    fn used_bytes(&self, skip: &str) -> Result<usize> {
        let skip = format!("{}.json", skip);
        let mut total = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == skip || name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }
            let meta = entry.metadata()?;
            if meta.is_file() {
                total += meta.len() as usize;
            }
        }
        Ok(total)
    }
}

impl LocalStore for FileLocalStore {
    fn is_available(&self) -> bool {
        *self.available.get_or_init(|| {
            let marker = self.dir.join(WRITE_CHECK_FILE);
            let ok = fs::create_dir_all(&self.dir).is_ok()
                && fs::write(&marker, WRITE_CHECK_FILE).is_ok()
                && fs::remove_file(&marker).is_ok();
            if !ok {
                debug!("Local store at {} is not writable", self.dir.display());
            }
            ok
        })
    }

    fn get_item(&self, key: &str) -> Result<Option<String>> {
        check_key(key)?;
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        check_key(key)?;
        fs::create_dir_all(&self.dir)?;
        let needed = self.used_bytes(key)? + value.len();
        if needed > self.quota {
            return Err(Error::QuotaExceeded {
                key: key.to_string(),
                needed,
                capacity: self.quota,
            });
        }

        // Write then rename; readers never see a partial key.
        let tmp = self.dir.join(format!(".{}.tmp", key));
        fs::write(&tmp, value)?;
        fs::rename(&tmp, self.path_for(key))?;
        trace!("Stored {} bytes under '{}'", value.len(), key);
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        check_key(key)?;
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process store, mainly for tests.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    entries: Mutex<HashMap<String, String>>,
    quota: Option<usize>,
    disabled: bool,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: usize) -> Self {
        Self {
            quota: Some(quota),
            ..Self::default()
        }
    }

    /// A store that reports itself unavailable and rejects every call.
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Self::default()
        }
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        if self.disabled {
            return Err(Error::unavailable("local store is disabled"));
        }
        self.entries
            .lock()
            .map_err(|_| Error::unavailable("local store lock poisoned"))
    }
}

impl LocalStore for MemoryLocalStore {
    fn is_available(&self) -> bool {
        self.entries().is_ok()
    }

    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries()?;
        if let Some(capacity) = self.quota {
            let others: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| v.len())
                .sum();
            let needed = others + value.len();
            if needed > capacity {
                return Err(Error::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    capacity,
                });
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.entries()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_set_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLocalStore::new(dir.path().join("data"), 1024);
        assert!(store.is_available());

        assert_eq!(store.get_item("products").unwrap(), None);
        store.set_item("products", "[]").unwrap();
        assert_eq!(store.get_item("products").unwrap().as_deref(), Some("[]"));

        store.remove_item("products").unwrap();
        assert_eq!(store.get_item("products").unwrap(), None);
        // Removing twice is fine.
        store.remove_item("products").unwrap();
    }

    #[test]
    fn test_file_store_quota_counts_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLocalStore::new(dir.path(), 10);
        store.set_item("a", "123456").unwrap();
        // Overwriting the same key only counts the new value.
        store.set_item("a", "1234567").unwrap();

        let err = store.set_item("b", "12345").unwrap_err();
        match err {
            Error::QuotaExceeded { key, needed, capacity } => {
                assert_eq!(key, "b");
                assert_eq!(needed, 12);
                assert_eq!(capacity, 10);
            }
            other => panic!("expected QuotaExceeded, got {:?}", other),
        }
        assert_eq!(store.get_item("b").unwrap(), None);
    }

    #[test]
    fn test_file_store_quota_ignores_stray_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLocalStore::new(dir.path(), 10);
        // Left behind by an interrupted write and a crashed writability check.
        fs::write(dir.path().join(".products.tmp"), "0123456789").unwrap();
        fs::write(dir.path().join(WRITE_CHECK_FILE), "0123456789").unwrap();

        store.set_item("credits", "0123456789").unwrap();
        assert_eq!(store.get_item("credits").unwrap().as_deref(), Some("0123456789"));
    }

    #[test]
    fn test_file_store_checks_writability_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLocalStore::new(dir.path().join("data"), 1024);
        assert!(store.is_available());
        store.set_item("products", "[]").unwrap();

        // Later checks answer from the first result without touching the
        // directory.
        fs::write(dir.path().join("data").join(WRITE_CHECK_FILE), "x").unwrap();
        assert!(store.is_available());
        assert_eq!(
            fs::read_to_string(dir.path().join("data").join(WRITE_CHECK_FILE)).unwrap(),
            "x"
        );
        let names: Vec<_> = fs::read_dir(dir.path().join("data"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name != WRITE_CHECK_FILE)
            .collect();
        assert_eq!(names, vec!["products.json".to_string()]);
    }

    #[test]
    fn test_file_store_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLocalStore::new(dir.path(), 1024);
        assert!(store.set_item("../escape", "x").unwrap_err().is_validation());
    }

    #[test]
    fn test_file_store_unavailable_when_dir_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "x").unwrap();
        let store = FileLocalStore::new(blocker.join("nested"), 1024);
        assert!(!store.is_available());
        assert!(store.set_item("products", "[]").is_err());
    }

    #[test]
    fn test_memory_store_quota_and_disabled() {
        let store = MemoryLocalStore::with_quota(4);
        store.set_item("k", "1234").unwrap();
        assert!(matches!(
            store.set_item("j", "1"),
            Err(Error::QuotaExceeded { .. })
        ));

        let disabled = MemoryLocalStore::disabled();
        assert!(!disabled.is_available());
        assert!(matches!(
            disabled.get_item("k"),
            Err(Error::StoreUnavailable(_))
        ));
    }
}
