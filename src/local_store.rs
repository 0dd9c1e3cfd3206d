use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

pub const FAMILY_CODE_KEY: &str = "healthFamily_familyCode";

/// Device-local key/value persistence. Values are JSON; writes are visible
/// to subsequent reads immediately and reach durable storage on `save`.
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value) -> anyhow::Result<()>;
    fn remove(&self, key: &str) -> anyhow::Result<()>;
    fn save(&self) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, Value>>,
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.data
            .lock()
            .map(|guard| guard.get(key).cloned())
            .unwrap_or_default()
    }

    fn set(&self, key: &str, value: Value) -> anyhow::Result<()> {
        if let Ok(mut guard) = self.data.lock() {
            guard.insert(key.to_string(), value);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        if let Ok(mut guard) = self.data.lock() {
            guard.remove(key);
        }
        Ok(())
    }

    fn save(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A single JSON object file holding every key. Each `set` rewrites the
/// file through a temporary sibling and an atomic rename.
pub struct FileStore {
    path: PathBuf,
    data: Mutex<Map<String, Value>>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create store directory {}", parent.display()))?;
        }

        let data = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Map<String, Value>>(&raw) {
                Ok(map) => map,
                Err(err) => {
                    warn!(
                        target: "famhealth",
                        event = "local_store_corrupt",
                        path = %path.display(),
                        error = %err
                    );
                    Map::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(err) => {
                return Err(err).with_context(|| format!("read store file {}", path.display()))
            }
        };

        info!(
            target: "famhealth",
            event = "local_store_opened",
            path = %path.display(),
            keys = data.len()
        );
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_file(&self, data: &Map<String, Value>) -> anyhow::Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("create temp file in {}", dir.display()))?;
        let bytes = serde_json::to_vec(data).context("serialize local store")?;
        tmp.write_all(&bytes).context("write local store")?;
        tmp.as_file().sync_all().context("sync local store")?;
        tmp.persist(&self.path)
            .map_err(|err| err.error)
            .with_context(|| format!("replace store file {}", self.path.display()))?;
        Ok(())
    }
}

impl LocalStore for FileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.data
            .lock()
            .map(|guard| guard.get(key).cloned())
            .unwrap_or_default()
    }

    fn set(&self, key: &str, value: Value) -> anyhow::Result<()> {
        let mut guard = self.data.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(key.to_string(), value);
        self.write_file(&guard)
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        let mut guard = self.data.lock().unwrap_or_else(|e| e.into_inner());
        if guard.remove(key).is_some() {
            self.write_file(&guard)?;
        }
        Ok(())
    }

    fn save(&self) -> anyhow::Result<()> {
        let guard = self.data.lock().unwrap_or_else(|e| e.into_inner());
        self.write_file(&guard)
    }
}

#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<dyn LocalStore + Send + Sync>,
}

impl StoreHandle {
    pub fn file(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self::from_store(FileStore::open(path)?))
    }

    pub fn in_memory() -> Self {
        Self::from_store(MemoryStore::default())
    }

    pub fn from_store(store: impl LocalStore + 'static) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    /// Decode the value under `key`; missing or unreadable values yield the default.
    pub fn load<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        let Some(value) = self.inner.get(key) else {
            return T::default();
        };
        if value.is_null() {
            return T::default();
        }
        match serde_json::from_value(value) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(
                    target: "famhealth",
                    event = "local_store_decode_failed",
                    key,
                    error = %err
                );
                T::default()
            }
        }
    }

    /// Write `value` under `key`. Failures are logged and swallowed; the
    /// caller's in-memory copy stays authoritative.
    pub fn persist<T: Serialize>(&self, key: &str, value: &T) -> bool {
        let result = serde_json::to_value(value)
            .context("serialize value for local store")
            .and_then(|json| self.inner.set(key, json));
        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    target: "famhealth",
                    event = "local_persist_failed",
                    key,
                    error = %format!("{err:#}")
                );
                false
            }
        }
    }

    pub fn raw(&self, key: &str) -> Option<Value> {
        self.inner.get(key)
    }

    /// The joined family code. An empty stored string counts as absent.
    pub fn family_code(&self) -> Option<String> {
        self.inner
            .get(FAMILY_CODE_KEY)
            .and_then(|value| value.as_str().map(str::to_owned))
            .filter(|code| !code.is_empty())
    }

    /// Store the joined family code; `None` or an empty string removes it.
    pub fn set_family_code(&self, code: Option<&str>) {
        let result = match code.filter(|c| !c.is_empty()) {
            Some(code) => self.inner.set(FAMILY_CODE_KEY, Value::String(code.to_string())),
            None => self.inner.remove(FAMILY_CODE_KEY),
        };
        if let Err(err) = result {
            warn!(
                target: "famhealth",
                event = "family_code_store_save_failed",
                error = %format!("{err:#}")
            );
        }
    }

    pub fn flush(&self) -> anyhow::Result<()> {
        self.inner.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Member;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn load_defaults_when_missing_or_corrupt() {
        let store = StoreHandle::in_memory();
        let members: Vec<Member> = store.load("healthFamily_members");
        assert!(members.is_empty());

        store.persist("healthFamily_members", &json!("not a list"));
        let members: Vec<Member> = store.load("healthFamily_members");
        assert!(members.is_empty());
    }

    #[test]
    fn family_code_empty_string_is_absent() {
        let store = StoreHandle::in_memory();
        assert_eq!(store.family_code(), None);

        store.set_family_code(Some("AB12CD"));
        assert_eq!(store.family_code().as_deref(), Some("AB12CD"));

        store.set_family_code(Some(""));
        assert_eq!(store.family_code(), None);
        assert_eq!(store.raw(FAMILY_CODE_KEY), None);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");
        {
            let store = StoreHandle::file(&path).unwrap();
            assert!(store.persist("k", &json!({ "a": 1 })));
            store.set_family_code(Some("XYZ234"));
        }
        let reopened = StoreHandle::file(&path).unwrap();
        assert_eq!(reopened.raw("k"), Some(json!({ "a": 1 })));
        assert_eq!(reopened.family_code().as_deref(), Some("XYZ234"));
    }

    #[test]
    fn corrupt_file_opens_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "{ not json").unwrap();
        let store = StoreHandle::file(&path).unwrap();
        assert_eq!(store.raw("anything"), None);
    }
}
