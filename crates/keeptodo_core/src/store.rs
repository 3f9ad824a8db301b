//! In-memory task collection with write-through persistence.
//!
//! The store is the single source of truth once loaded. Each mutation that
//! changes the collection is followed by a full save through the
//! [`StorageAdapter`] and a [`StoreEvent`] delivered to every subscriber.
//! New tasks are prepended, so the collection reads newest first.

use crate::error::AppError;
use crate::id::generate_id;
use crate::model::{Filter, Priority, Task, now_timestamp};
use crate::storage::{KeyValueStore, StorageAdapter, TaskLoad};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Uninitialized,
    Loading,
    Ready,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TodoStats {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Added(String),
    Toggled(String),
    Edited(String),
    Deleted(String),
    PriorityChanged(String),
    ClearedCompleted(usize),
    ToggledAll { completed: bool },
    Imported(usize),
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Loaded { count: usize },
    Changed { change: Change, persisted: bool },
    FilterChanged(Filter),
    ExternalReplace { count: usize },
}

pub trait ChangeListener {
    fn on_change(&mut self, event: &StoreEvent);
}

impl<F: FnMut(&StoreEvent)> ChangeListener for F {
    fn on_change(&mut self, event: &StoreEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct TodoStore<S> {
    adapter: StorageAdapter<S>,
    todos: Vec<Task>,
    filter: Filter,
    state: StoreState,
    persisted: bool,
    listeners: Vec<(SubscriptionId, Box<dyn ChangeListener>)>,
    next_subscription: u64,
}

impl<S: KeyValueStore> TodoStore<S> {
    pub fn new(adapter: StorageAdapter<S>) -> Self {
        Self {
            adapter,
            todos: Vec::new(),
            filter: Filter::default(),
            state: StoreState::Uninitialized,
            persisted: false,
            listeners: Vec::new(),
            next_subscription: 0,
        }
    }

    /// Loads the collection from storage and marks the store ready. A load
    /// failure leaves an empty, usable collection and is returned for display.
    pub fn init(&mut self) -> Option<AppError> {
        self.state = StoreState::Loading;
        let TaskLoad { tasks, error } = self.adapter.load();
        self.todos = sanitize(tasks);
        self.persisted = error.is_none();
        self.state = StoreState::Ready;

        let count = self.todos.len();
        tracing::debug!(count, "todo store ready");
        self.emit(&StoreEvent::Loaded { count });
        error
    }

    pub fn state(&self) -> StoreState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == StoreState::Ready
    }

    /// Whether the durable copy matches the in-memory collection.
    pub fn persisted(&self) -> bool {
        self.persisted
    }

    pub fn adapter(&self) -> &StorageAdapter<S> {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut StorageAdapter<S> {
        &mut self.adapter
    }

    pub fn subscribe<L: ChangeListener + 'static>(&mut self, listener: L) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    pub fn add_todo(&mut self, text: &str) -> Option<Task> {
        self.add_todo_with(text, Priority::default())
    }

    pub fn add_todo_with(&mut self, text: &str, priority: Priority) -> Option<Task> {
        if !self.accepting("add") {
            return None;
        }
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }

        let mut id = generate_id();
        while self.position(&id).is_some() {
            id = generate_id();
        }
        let created_at = match now_timestamp() {
            Ok(created_at) => created_at,
            Err(err) => {
                tracing::error!(error = %err, "failed to timestamp new todo");
                return None;
            }
        };

        let task = Task::new(id, trimmed, priority, created_at);
        self.todos.insert(0, task.clone());
        self.commit(Change::Added(task.id.clone()));
        Some(task)
    }

    pub fn toggle_todo(&mut self, id: &str) -> bool {
        self.update("toggle", id, Change::Toggled, |task| {
            task.completed = !task.completed;
        })
    }

    pub fn edit_todo(&mut self, id: &str, new_text: &str) -> bool {
        let trimmed = new_text.trim();
        if trimmed.is_empty() {
            return false;
        }
        self.update("edit", id, Change::Edited, |task| {
            task.text = trimmed.to_string();
        })
    }

    pub fn set_priority(&mut self, id: &str, priority: Priority) -> bool {
        self.update("priority", id, Change::PriorityChanged, |task| {
            task.priority = priority;
        })
    }

    pub fn delete_todo(&mut self, id: &str) -> bool {
        if !self.accepting("delete") {
            return false;
        }
        let Some(index) = self.position(id) else {
            return false;
        };

        let removed = self.todos.remove(index);
        self.commit(Change::Deleted(removed.id));
        true
    }

    pub fn clear_completed(&mut self) -> bool {
        if !self.accepting("clear completed") {
            return false;
        }
        let before = self.todos.len();
        self.todos.retain(|task| !task.completed);
        let removed = before - self.todos.len();
        if removed == 0 {
            return false;
        }

        self.commit(Change::ClearedCompleted(removed));
        true
    }

    /// Completes everything when any task is open, otherwise reopens everything.
    pub fn toggle_all_todos(&mut self) -> bool {
        if !self.accepting("toggle all") || self.todos.is_empty() {
            return false;
        }

        let completed = self.todos.iter().any(|task| !task.completed);
        let updated_at = now_timestamp().ok();
        for task in &mut self.todos {
            task.completed = completed;
            task.updated_at = updated_at.clone();
        }

        self.commit(Change::ToggledAll { completed });
        true
    }

    pub fn set_filter(&mut self, filter: Filter) {
        if self.filter == filter {
            return;
        }
        self.filter = filter;
        self.emit(&StoreEvent::FilterChanged(filter));
    }

    pub fn filter(&self) -> Filter {
        self.filter
    }

    /// The full collection, ignoring the filter.
    pub fn todos(&self) -> &[Task] {
        &self.todos
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.position(id).map(|index| &self.todos[index])
    }

    pub fn filtered_todos(&self) -> Vec<&Task> {
        self.todos
            .iter()
            .filter(|task| self.filter.matches(task))
            .collect()
    }

    pub fn todo_stats(&self) -> TodoStats {
        let completed = self.todos.iter().filter(|task| task.completed).count();
        TodoStats {
            total: self.todos.len(),
            active: self.todos.len() - completed,
            completed,
        }
    }

    pub fn all_completed(&self) -> bool {
        !self.todos.is_empty() && self.todos.iter().all(|task| task.completed)
    }

    /// Imports through the adapter and adopts the result as the collection.
    pub fn import_todos(&mut self, serialized: &str, merge_mode: bool) -> Option<Vec<Task>> {
        if !self.accepting("import") {
            return None;
        }
        // Merging reads the stored copy, so bring it up to date first.
        if merge_mode && !self.persisted && !self.adapter.save(&self.todos) {
            return None;
        }

        let imported = self.adapter.import_from_file(serialized, merge_mode)?;
        self.todos = sanitize(imported);
        self.persisted = true;
        self.emit(&StoreEvent::Changed {
            change: Change::Imported(self.todos.len()),
            persisted: true,
        });
        Some(self.todos.clone())
    }

    /// Empties the collection and removes the storage key.
    pub fn clear_all(&mut self) -> bool {
        if !self.accepting("clear all") {
            return false;
        }
        self.todos.clear();
        self.persisted = self.adapter.clear();
        self.emit(&StoreEvent::Changed {
            change: Change::Reset,
            persisted: self.persisted,
        });
        true
    }

    /// Adopts a value written under `key` by another context. `None` means the
    /// key was cleared. Nothing is written back.
    pub fn apply_external_change(&mut self, key: &str, new_value: Option<&str>) -> bool {
        if key != self.adapter.key() || !self.is_ready() {
            return false;
        }

        match StorageAdapter::<S>::decode_snapshot(new_value) {
            Ok(tasks) => {
                self.todos = sanitize(tasks);
                self.persisted = true;
                let count = self.todos.len();
                tracing::info!(count, "adopted externally written todos");
                self.emit(&StoreEvent::ExternalReplace { count });
                true
            }
            Err(err) => {
                tracing::warn!(error = %err, "ignored malformed external todos");
                false
            }
        }
    }

    fn update<F>(&mut self, action: &str, id: &str, change: fn(String) -> Change, apply: F) -> bool
    where
        F: FnOnce(&mut Task),
    {
        if !self.accepting(action) {
            return false;
        }
        let Some(index) = self.position(id) else {
            return false;
        };

        let task = &mut self.todos[index];
        apply(task);
        task.updated_at = now_timestamp().ok();
        let id = task.id.clone();
        self.commit(change(id));
        true
    }

    fn position(&self, id: &str) -> Option<usize> {
        let trimmed = id.trim();
        self.todos.iter().position(|task| task.id == trimmed)
    }

    fn accepting(&self, action: &str) -> bool {
        if self.is_ready() {
            return true;
        }
        tracing::warn!(action, state = ?self.state, "rejected mutation before store is ready");
        false
    }

    fn commit(&mut self, change: Change) {
        self.persisted = self.adapter.save(&self.todos);
        self.emit(&StoreEvent::Changed {
            change,
            persisted: self.persisted,
        });
    }

    fn emit(&mut self, event: &StoreEvent) {
        for (_, listener) in &mut self.listeners {
            listener.on_change(event);
        }
    }
}

fn sanitize(tasks: Vec<Task>) -> Vec<Task> {
    let mut seen = HashSet::new();
    let total = tasks.len();
    let kept: Vec<Task> = tasks
        .into_iter()
        .filter(|task| !task.text.trim().is_empty() && seen.insert(task.id.clone()))
        .collect();
    if kept.len() < total {
        tracing::warn!(
            dropped = total - kept.len(),
            "dropped blank or duplicate todos"
        );
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::{Change, StoreEvent, StoreState, TodoStats, TodoStore};
    use crate::model::{Filter, Priority};
    use crate::storage::{KeyValueStore, MemoryStore, StorageAdapter, StorageKey};
    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::rc::Rc;

    const KEY: &str = "keeptodo-todos";

    fn ready_store() -> (TodoStore<MemoryStore>, MemoryStore) {
        let backing = MemoryStore::new();
        let mut store = TodoStore::new(StorageAdapter::new(
            backing.clone(),
            StorageKey::default(),
        ));
        assert!(store.init().is_none());
        (store, backing)
    }

    fn stored_texts(backing: &MemoryStore) -> Vec<String> {
        let value: serde_json::Value =
            serde_json::from_str(&backing.get(KEY).unwrap().unwrap()).unwrap();
        value["todos"]
            .as_array()
            .unwrap()
            .iter()
            .map(|task| task["text"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn add_prepends_trimmed_tasks_with_unique_ids() {
        let (mut store, backing) = ready_store();

        for text in ["one", "", "  two  ", "   ", "three"] {
            store.add_todo(text);
        }

        let texts: Vec<_> = store.todos().iter().map(|task| task.text.as_str()).collect();
        assert_eq!(texts, ["three", "two", "one"]);
        let ids: HashSet<_> = store.todos().iter().map(|task| task.id.as_str()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(stored_texts(&backing), ["three", "two", "one"]);

        let task = &store.todos()[0];
        assert!(!task.completed);
        assert_eq!(task.priority, Priority::Medium);
        assert!(task.created_at.is_some());
    }

    #[test]
    fn blank_add_leaves_collection_and_storage_untouched() {
        let (mut store, backing) = ready_store();

        assert!(store.add_todo("").is_none());
        assert!(store.add_todo("   ").is_none());

        assert!(store.todos().is_empty());
        assert_eq!(backing.get(KEY).unwrap(), None);
    }

    #[test]
    fn toggle_twice_restores_completion() {
        let (mut store, _) = ready_store();
        let id = store.add_todo("a").unwrap().id;

        assert!(store.toggle_todo(&id));
        assert!(store.get(&id).unwrap().completed);
        assert!(store.toggle_todo(&id));
        assert!(!store.get(&id).unwrap().completed);
    }

    #[test]
    fn toggle_unknown_id_is_noop() {
        let (mut store, _) = ready_store();
        store.add_todo("a");
        let before = store.todos().to_vec();

        assert!(!store.toggle_todo("missing"));
        assert_eq!(store.todos(), before.as_slice());
    }

    #[test]
    fn edit_trims_and_ignores_blank_text() {
        let (mut store, backing) = ready_store();
        let id = store.add_todo("draft").unwrap().id;

        assert!(!store.edit_todo(&id, "   "));
        assert_eq!(store.get(&id).unwrap().text, "draft");

        assert!(store.edit_todo(&id, "  final  "));
        assert_eq!(store.get(&id).unwrap().text, "final");
        assert_eq!(stored_texts(&backing), ["final"]);

        assert!(!store.edit_todo("missing", "other"));
    }

    #[test]
    fn delete_unknown_id_is_noop() {
        let (mut store, _) = ready_store();
        store.add_todo("a");
        store.add_todo("b");
        let before = store.todos().to_vec();

        assert!(!store.delete_todo("missing"));
        assert_eq!(store.todos(), before.as_slice());

        let id = before[0].id.clone();
        assert!(store.delete_todo(&id));
        assert_eq!(store.todos().len(), 1);
        assert!(store.get(&id).is_none());
    }

    #[test]
    fn clear_completed_empties_completed_view() {
        let (mut store, _) = ready_store();
        let done = store.add_todo("done").unwrap().id;
        store.add_todo("open");
        store.toggle_todo(&done);

        assert!(store.clear_completed());
        store.set_filter(Filter::Completed);

        assert!(store.filtered_todos().is_empty());
        assert_eq!(store.todos().len(), 1);
        assert!(!store.clear_completed());
    }

    #[test]
    fn toggle_all_flips_aggregate_state() {
        let (mut store, _) = ready_store();
        assert!(!store.toggle_all_todos());
        assert!(!store.all_completed());

        let first = store.add_todo("a").unwrap().id;
        store.add_todo("b");
        store.toggle_todo(&first);

        assert!(store.toggle_all_todos());
        assert!(store.all_completed());
        assert!(store.toggle_all_todos());
        assert!(store.todos().iter().all(|task| !task.completed));
    }

    #[test]
    fn filters_and_stats_use_unfiltered_collection() {
        let (mut store, _) = ready_store();
        let done = store.add_todo("done").unwrap().id;
        let urgent = store.add_todo_with("urgent", Priority::High).unwrap().id;
        store.add_todo("open");
        store.toggle_todo(&done);

        store.set_filter(Filter::Active);
        assert_eq!(store.filtered_todos().len(), 2);
        store.set_filter(Filter::Urgent);
        let urgent_view: Vec<_> = store.filtered_todos().iter().map(|t| t.id.clone()).collect();
        assert_eq!(urgent_view, [urgent]);

        assert_eq!(
            store.todo_stats(),
            TodoStats {
                total: 3,
                active: 2,
                completed: 1
            }
        );
    }

    #[test]
    fn set_priority_updates_task() {
        let (mut store, _) = ready_store();
        let id = store.add_todo("a").unwrap().id;

        assert!(store.set_priority(&id, Priority::Low));
        assert_eq!(store.get(&id).unwrap().priority, Priority::Low);
        assert!(!store.set_priority("missing", Priority::High));
    }

    #[test]
    fn mutations_are_rejected_before_init() {
        let backing = MemoryStore::new();
        let mut store = TodoStore::new(StorageAdapter::new(
            backing.clone(),
            StorageKey::default(),
        ));

        assert_eq!(store.state(), StoreState::Uninitialized);
        assert!(store.add_todo("early").is_none());
        assert!(!store.toggle_all_todos());
        assert_eq!(backing.get(KEY).unwrap(), None);

        store.init();
        assert_eq!(store.state(), StoreState::Ready);
        assert!(store.add_todo("later").is_some());
    }

    #[test]
    fn init_reports_malformed_storage_and_stays_usable() {
        let mut backing = MemoryStore::new();
        backing.set(KEY, "{not json").unwrap();
        let mut store = TodoStore::new(StorageAdapter::new(
            backing.clone(),
            StorageKey::default(),
        ));

        let err = store.init().unwrap();

        assert_eq!(err.code(), "invalid_data");
        assert!(store.todos().is_empty());
        assert!(store.add_todo("fresh").is_some());
        assert_eq!(stored_texts(&backing), ["fresh"]);
    }

    #[test]
    fn partly_bad_storage_keeps_valid_tasks_through_next_write() {
        let mut backing = MemoryStore::new();
        backing
            .set(
                KEY,
                r#"{"todos":[{"id":"1","text":"keep me","completed":false},{"id":"2","text":"bad","completed":false,"priority":"urgent"}],"version":"1.0"}"#,
            )
            .unwrap();
        let mut store = TodoStore::new(StorageAdapter::new(
            backing.clone(),
            StorageKey::default(),
        ));

        assert!(store.init().is_none());
        assert!(store.persisted());
        assert_eq!(store.todos().len(), 1);

        store.add_todo("new");
        assert_eq!(stored_texts(&backing), ["new", "keep me"]);
    }

    #[test]
    fn import_returns_the_adopted_collection() {
        let (mut store, _) = ready_store();

        let imported = store
            .import_todos(
                r#"[{"id":"a","text":"one","completed":false},{"id":"b","text":"two","completed":true}]"#,
                false,
            )
            .unwrap();

        assert_eq!(imported.as_slice(), store.todos());
        assert_eq!(imported.len(), 2);
    }

    #[test]
    fn init_drops_duplicate_ids() {
        let mut backing = MemoryStore::new();
        backing
            .set(
                KEY,
                r#"[{"id":"1","text":"a","completed":false},{"id":"1","text":"b","completed":true}]"#,
            )
            .unwrap();
        let mut store = TodoStore::new(StorageAdapter::new(backing, StorageKey::default()));
        store.init();

        assert_eq!(store.todos().len(), 1);
        assert_eq!(store.todos()[0].text, "a");
    }

    #[test]
    fn write_failure_keeps_memory_state() {
        let backing = MemoryStore::with_quota(64);
        let mut store = TodoStore::new(StorageAdapter::new(
            backing.clone(),
            StorageKey::default(),
        ));
        store.init();

        let task = store.add_todo("this text is far too long to fit in the quota");

        assert!(task.is_some());
        assert_eq!(store.todos().len(), 1);
        assert!(!store.persisted());
        assert_eq!(backing.get(KEY).unwrap(), None);
    }

    #[test]
    fn subscribers_receive_change_events() {
        let (mut store, _) = ready_store();
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        let subscription = store.subscribe(move |event: &StoreEvent| {
            sink.borrow_mut().push(event.clone());
        });

        let id = store.add_todo("a").unwrap().id;
        store.add_todo(" ");
        store.set_filter(Filter::Active);
        store.set_filter(Filter::Active);
        assert!(store.unsubscribe(subscription));
        store.toggle_todo(&id);

        let events = events.borrow();
        assert_eq!(
            *events,
            vec![
                StoreEvent::Changed {
                    change: Change::Added(id.clone()),
                    persisted: true
                },
                StoreEvent::FilterChanged(Filter::Active),
            ]
        );
    }

    #[test]
    fn external_change_replaces_collection() {
        let (mut store, mut backing) = ready_store();
        store.add_todo("local");

        let external = r#"{"todos":[{"id":"e","text":"from elsewhere","completed":true}],"version":"1.0"}"#;
        backing.set(KEY, external).unwrap();

        assert!(!store.apply_external_change("other-key", Some(external)));
        assert!(store.apply_external_change(KEY, Some(external)));
        assert_eq!(store.todos().len(), 1);
        assert_eq!(store.todos()[0].id, "e");

        assert!(!store.apply_external_change(KEY, Some("garbage")));
        assert_eq!(store.todos().len(), 1);

        assert!(store.apply_external_change(KEY, None));
        assert!(store.todos().is_empty());
    }

    #[test]
    fn import_merge_prefers_existing_tasks() {
        let mut backing = MemoryStore::new();
        backing
            .set(KEY, r#"[{"id":"x","text":"mine","completed":false}]"#)
            .unwrap();
        let mut store = TodoStore::new(StorageAdapter::new(backing, StorageKey::default()));
        store.init();

        let merged = store
            .import_todos(
                r#"{"todos":[{"id":"x","text":"t","completed":false}]}"#,
                true,
            )
            .unwrap();

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].text, "mine");
        assert_eq!(store.todos()[0].text, "mine");
    }

    #[test]
    fn import_rejects_invalid_json_without_side_effects() {
        let (mut store, backing) = ready_store();
        store.add_todo("keep");
        let before = backing.get(KEY).unwrap();

        assert!(store.import_todos("not json", false).is_none());
        assert_eq!(store.todos().len(), 1);
        assert_eq!(backing.get(KEY).unwrap(), before);
    }

    #[test]
    fn clear_all_removes_storage_key() {
        let (mut store, backing) = ready_store();
        store.add_todo("a");

        assert!(store.clear_all());
        assert!(store.todos().is_empty());
        assert_eq!(backing.get(KEY).unwrap(), None);
    }
}
