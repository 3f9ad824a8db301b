pub mod config;
pub mod error;
pub mod id;
pub mod model;
pub mod storage;
pub mod store;

pub use error::AppError;
pub use model::{Filter, Priority, Task};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageAdapter, StorageKey};
pub use store::{StoreEvent, TodoStats, TodoStore};

#[cfg(test)]
mod tests {
    use crate::error::AppError;
    use crate::model::{Priority, Task};

    #[test]
    fn task_has_required_fields() {
        let task = Task::new(
            "task-1".to_string(),
            "demo",
            Priority::Medium,
            "2025-12-20T00:00:00Z".to_string(),
        );

        assert_eq!(task.id, "task-1");
        assert_eq!(task.text, "demo");
        assert!(!task.completed);
        assert_eq!(task.created_at.as_deref(), Some("2025-12-20T00:00:00Z"));
        assert_eq!(task.updated_at, task.created_at);
        assert_eq!(task.description, None);
    }

    #[test]
    fn app_error_exposes_code_and_message() {
        let err = AppError::invalid_input("missing text");
        assert_eq!(err.code(), "invalid_input");
        assert_eq!(err.message(), "missing text");
        assert_eq!(err.to_string(), "invalid_input - missing text");
    }
}
