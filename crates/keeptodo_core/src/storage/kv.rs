use crate::error::AppError;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// String-valued durable storage addressed by key.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, AppError>;

    fn set(&mut self, key: &str, value: &str) -> Result<(), AppError>;

    fn remove(&mut self, key: &str) -> Result<(), AppError>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Box<S> {
    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), AppError> {
        (**self).set(key, value)
    }

    fn remove(&mut self, key: &str) -> Result<(), AppError> {
        (**self).remove(key)
    }
}

/// In-process store. Clones share the same entries, so two clones behave like
/// two browser tabs looking at one origin's storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Rc<RefCell<HashMap<String, String>>>,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Rc::default(),
            quota_bytes: Some(quota_bytes),
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), AppError> {
        let mut entries = self.entries.borrow_mut();
        if let Some(quota) = self.quota_bytes {
            let others: usize = entries
                .iter()
                .filter(|(existing, _)| existing.as_str() != key)
                .map(|(existing, stored)| existing.len() + stored.len())
                .sum();
            let needed = others + key.len() + value.len();
            if needed > quota {
                return Err(AppError::quota_exceeded(format!(
                    "{needed} bytes exceeds quota of {quota} bytes"
                )));
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), AppError> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}

/// One JSON file per key inside `dir`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    quota_bytes: Option<usize>,
}

impl FileStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            quota_bytes: None,
        }
    }

    pub fn with_quota(mut self, quota_bytes: Option<usize>) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> Result<PathBuf, AppError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
        if !valid {
            return Err(AppError::invalid_input(format!(
                "storage key '{key}' is not usable as a file name"
            )));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|err| AppError::io(format!("{}: {}", path.display(), err)))?;
        Ok(Some(content))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), AppError> {
        let path = self.path_for(key)?;
        if let Some(quota) = self.quota_bytes
            && value.len() > quota
        {
            return Err(AppError::quota_exceeded(format!(
                "{} bytes exceeds quota of {quota} bytes",
                value.len()
            )));
        }

        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(&path, value)
            .map_err(|err| AppError::io(format!("{}: {}", path.display(), err)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&path, permissions)?;
        }

        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), AppError> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AppError::io(format!("{}: {}", path.display(), err))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FileStore, KeyValueStore, MemoryStore};

    #[test]
    fn memory_store_clones_share_entries() {
        let mut first = MemoryStore::new();
        let second = first.clone();

        first.set("todos", "[]").unwrap();

        assert_eq!(second.get("todos").unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn memory_store_enforces_quota() {
        let mut store = MemoryStore::with_quota(16);

        store.set("k", "0123456789").unwrap();
        let err = store.set("k", "0123456789abcdefghij").unwrap_err();

        assert_eq!(err.code(), "quota_exceeded");
        assert_eq!(store.get("k").unwrap().as_deref(), Some("0123456789"));
    }

    #[test]
    fn file_store_round_trip_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path().join("nested"));

        assert_eq!(store.get("todos").unwrap(), None);
        store.set("todos", "{\"todos\":[]}").unwrap();
        assert_eq!(store.get("todos").unwrap().as_deref(), Some("{\"todos\":[]}"));

        store.remove("todos").unwrap();
        store.remove("todos").unwrap();
        assert_eq!(store.get("todos").unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn file_store_writes_owner_only_files() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path());
        store.set("todos", "[]").unwrap();

        let mode = std::fs::metadata(store.path_for("todos").unwrap())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn file_store_rejects_path_like_keys() {
        let store = FileStore::new("/tmp");

        assert_eq!(store.path_for("../etc").unwrap_err().code(), "invalid_input");
        assert_eq!(store.path_for("a/b").unwrap_err().code(), "invalid_input");
        assert!(store.path_for("keeptodo-todos").is_ok());
    }

    #[test]
    fn file_store_quota_rejects_large_values() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path()).with_quota(Some(4));

        let err = store.set("todos", "[1,2,3]").unwrap_err();

        assert_eq!(err.code(), "quota_exceeded");
        assert_eq!(store.get("todos").unwrap(), None);
    }
}
