mod adapter;
pub mod envelope;
mod kv;

pub use adapter::{
    DEFAULT_SOURCE, DEFAULT_STORAGE_KEY, StorageAdapter, StorageKey, StorageStats, TaskLoad,
};
pub use envelope::{ENVELOPE_VERSION, ExportDocument, StoredPayload};
pub use kv::{FileStore, KeyValueStore, MemoryStore};
