use crate::error::AppError;
use crate::model::{Task, now_timestamp};
use crate::storage::envelope::{
    ENVELOPE_VERSION, EnvelopeOut, ExportDocument, PayloadShape, StoredPayload,
    has_required_fields,
};
use crate::storage::kv::KeyValueStore;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const DEFAULT_STORAGE_KEY: &str = "keeptodo-todos";
pub const DEFAULT_SOURCE: &str = "keeptodo";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKey {
    pub key: String,
    /// Written into export artifacts as `source`.
    pub source: String,
}

impl Default for StorageKey {
    fn default() -> Self {
        Self {
            key: DEFAULT_STORAGE_KEY.to_string(),
            source: DEFAULT_SOURCE.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskLoad {
    pub tasks: Vec<Task>,
    pub error: Option<AppError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub exists: bool,
    pub size_bytes: usize,
    pub todo_count: usize,
    pub last_modified: Option<String>,
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Reads and writes the whole task collection under a single key.
///
/// Every public operation absorbs storage failures: they are logged and
/// surfaced as `false`, `None` or an empty collection, never as a panic or
/// an `Err` the caller has to handle.
pub struct StorageAdapter<S> {
    store: S,
    key: StorageKey,
}

impl<S: KeyValueStore> StorageAdapter<S> {
    pub fn new(store: S, key: StorageKey) -> Self {
        Self { store, key }
    }

    pub fn key(&self) -> &str {
        &self.key.key
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Current raw value under the key, `None` when absent or unreadable.
    pub fn raw(&self) -> Option<String> {
        match self.store.get(&self.key.key) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::error!(key = %self.key.key, error = %err, "failed to read storage");
                None
            }
        }
    }

    pub fn load(&self) -> TaskLoad {
        match self.try_load() {
            Ok(tasks) => TaskLoad { tasks, error: None },
            Err(err) => {
                tracing::error!(key = %self.key.key, error = %err, "failed to load todos");
                TaskLoad {
                    tasks: Vec::new(),
                    error: Some(err),
                }
            }
        }
    }

    pub fn save(&mut self, tasks: &[Task]) -> bool {
        match self.try_save(tasks) {
            Ok(()) => {
                tracing::debug!(key = %self.key.key, count = tasks.len(), "saved todos");
                true
            }
            Err(err) => {
                tracing::error!(key = %self.key.key, error = %err, "failed to save todos");
                false
            }
        }
    }

    pub fn clear(&mut self) -> bool {
        match self.store.remove(&self.key.key) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(key = %self.key.key, error = %err, "failed to clear todos");
                false
            }
        }
    }

    pub fn stats(&self) -> StorageStats {
        let empty = |error: Option<String>| StorageStats {
            exists: false,
            size_bytes: 0,
            todo_count: 0,
            last_modified: None,
            version: None,
            error,
        };

        let raw = match self.store.get(&self.key.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return empty(None),
            Err(err) => {
                tracing::error!(key = %self.key.key, error = %err, "failed to read storage stats");
                return empty(Some(err.to_string()));
            }
        };

        match StoredPayload::decode(&raw) {
            Ok(payload) => StorageStats {
                exists: true,
                size_bytes: raw.len(),
                todo_count: payload.tasks().len(),
                last_modified: payload.last_modified().map(str::to_string),
                version: Some(payload.version().to_string()),
                error: None,
            },
            Err(err) => {
                tracing::warn!(key = %self.key.key, error = %err, "stored todos are malformed");
                StorageStats {
                    exists: true,
                    size_bytes: raw.len(),
                    ..empty(Some(err.to_string()))
                }
            }
        }
    }

    pub fn export_document(&self) -> Result<ExportDocument, AppError> {
        Ok(ExportDocument {
            todos: self.load().tasks,
            export_date: now_timestamp()?,
            version: ENVELOPE_VERSION.to_string(),
            source: self.key.source.clone(),
        })
    }

    /// Writes `todos-backup-<date>.json` into `dir` and returns its path.
    pub fn export_to_file(&self, dir: &Path) -> Option<PathBuf> {
        match self.try_export(dir) {
            Ok(path) => {
                tracing::info!(path = %path.display(), "exported todos");
                Some(path)
            }
            Err(err) => {
                tracing::error!(dir = %dir.display(), error = %err, "failed to export todos");
                None
            }
        }
    }

    /// Replaces (or, with `merge_mode`, extends) the stored collection with
    /// the valid tasks found in `serialized`. Elements lacking a string id,
    /// string text or boolean completed are dropped. On merge, stored tasks
    /// win id collisions.
    pub fn import_from_file(&mut self, serialized: &str, merge_mode: bool) -> Option<Vec<Task>> {
        match self.try_import(serialized, merge_mode) {
            Ok(tasks) => Some(tasks),
            Err(err) => {
                tracing::error!(key = %self.key.key, error = %err, "failed to import todos");
                None
            }
        }
    }

    pub fn import_from_path(&mut self, path: &Path, merge_mode: bool) -> Option<Vec<Task>> {
        match std::fs::read_to_string(path) {
            Ok(content) => self.import_from_file(&content, merge_mode),
            Err(err) => {
                tracing::error!(path = %path.display(), error = %err, "failed to read import file");
                None
            }
        }
    }

    /// Rewrites a bare-array payload as an envelope tagged `migrated`.
    pub fn migrate_legacy(&mut self) -> bool {
        match self.try_migrate() {
            Ok(migrated) => migrated,
            Err(err) => {
                tracing::error!(key = %self.key.key, error = %err, "failed to migrate legacy todos");
                false
            }
        }
    }

    /// Decodes a value observed through a cross-context change notification.
    /// An absent value means the key was cleared.
    pub fn decode_snapshot(raw: Option<&str>) -> Result<Vec<Task>, AppError> {
        match raw {
            Some(raw) => Ok(StoredPayload::decode(raw)?.into_tasks()),
            None => Ok(Vec::new()),
        }
    }

    fn try_load(&self) -> Result<Vec<Task>, AppError> {
        Self::decode_snapshot(self.store.get(&self.key.key)?.as_deref())
    }

    fn try_save(&mut self, tasks: &[Task]) -> Result<(), AppError> {
        self.write_envelope(tasks, false)
    }

    fn write_envelope(&mut self, tasks: &[Task], migrated: bool) -> Result<(), AppError> {
        let last_modified = now_timestamp()?;
        let envelope = EnvelopeOut {
            todos: tasks,
            last_modified: &last_modified,
            version: ENVELOPE_VERSION,
            migrated,
        };
        let content = serde_json::to_string(&envelope)?;
        self.store.set(&self.key.key, &content)
    }

    fn try_export(&self, dir: &Path) -> Result<PathBuf, AppError> {
        let document = self.export_document()?;
        let date = document
            .export_date
            .split('T')
            .next()
            .unwrap_or(&document.export_date)
            .to_string();
        let path = dir.join(format!("todos-backup-{date}.json"));
        let content = serde_json::to_string_pretty(&document)?;

        std::fs::create_dir_all(dir)?;
        std::fs::write(&path, content)
            .map_err(|err| AppError::io(format!("{}: {}", path.display(), err)))?;
        Ok(path)
    }

    fn try_import(&mut self, serialized: &str, merge_mode: bool) -> Result<Vec<Task>, AppError> {
        let items = PayloadShape::parse(serialized)?.into_items();
        let total = items.len();
        let imported = valid_import_tasks(items);
        if imported.len() < total {
            tracing::warn!(
                dropped = total - imported.len(),
                "dropped invalid tasks from import"
            );
        }

        let tasks = if merge_mode {
            // Unreadable stored data merges as an empty collection, like load.
            let mut merged = self.load().tasks;
            let existing: HashSet<String> = merged.iter().map(|task| task.id.clone()).collect();
            merged.extend(
                imported
                    .into_iter()
                    .filter(|task| !existing.contains(&task.id)),
            );
            merged
        } else {
            imported
        };

        self.try_save(&tasks)?;
        Ok(tasks)
    }

    fn try_migrate(&mut self) -> Result<bool, AppError> {
        let Some(raw) = self.store.get(&self.key.key)? else {
            return Ok(false);
        };

        match StoredPayload::decode(&raw)? {
            StoredPayload::Envelope(_) => Ok(false),
            StoredPayload::Legacy(tasks) => {
                self.write_envelope(&tasks, true)?;
                tracing::info!(key = %self.key.key, count = tasks.len(), "migrated legacy todos");
                Ok(true)
            }
        }
    }
}

// Also drops blank text and repeated ids, which would break collection invariants.
fn valid_import_tasks(items: Vec<serde_json::Value>) -> Vec<Task> {
    let mut seen = HashSet::new();
    let mut tasks = Vec::new();

    for item in items {
        if !has_required_fields(&item) {
            continue;
        }
        let Ok(task) = serde_json::from_value::<Task>(item) else {
            continue;
        };
        if task.text.trim().is_empty() || !seen.insert(task.id.clone()) {
            continue;
        }
        tasks.push(task);
    }

    tasks
}
