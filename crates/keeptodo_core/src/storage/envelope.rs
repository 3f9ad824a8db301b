//! Persisted shapes of the task collection.
//!
//! Two shapes are accepted on read: the versioned envelope
//! `{ todos, lastModified, version }` and the legacy bare task array. Only
//! the envelope is ever written.

use crate::error::AppError;
use crate::model::Task;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const ENVELOPE_VERSION: &str = "1.0";
pub const LEGACY_VERSION: &str = "legacy";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub todos: Vec<Task>,
    pub last_modified: Option<String>,
    pub version: Option<String>,
    pub migrated: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EnvelopeOut<'a> {
    pub todos: &'a [Task],
    pub last_modified: &'a str,
    pub version: &'a str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub migrated: bool,
}

/// Backup artifact written by export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub todos: Vec<Task>,
    pub export_date: String,
    pub version: String,
    pub source: String,
}

/// Top-level shape of a stored or imported payload before task decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadShape {
    Envelope(Map<String, Value>),
    Legacy(Vec<Value>),
}

impl PayloadShape {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let value: Value = serde_json::from_str(raw)?;
        Self::classify(value)
    }

    pub fn classify(value: Value) -> Result<Self, AppError> {
        match value {
            Value::Object(map) if map.get("todos").is_some_and(Value::is_array) => {
                Ok(Self::Envelope(map))
            }
            Value::Array(items) => Ok(Self::Legacy(items)),
            _ => Err(AppError::invalid_data(
                "expected an object with a todos array or a bare task array",
            )),
        }
    }

    /// The raw task elements, whichever shape carried them.
    pub fn into_items(self) -> Vec<Value> {
        match self {
            Self::Envelope(mut map) => match map.remove("todos") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            Self::Legacy(items) => items,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredPayload {
    Envelope(Envelope),
    Legacy(Vec<Task>),
}

impl StoredPayload {
    /// Fails only on unparseable JSON or an unknown top-level shape. Elements
    /// that do not decode as a task are dropped and the rest are kept.
    pub fn decode(raw: &str) -> Result<Self, AppError> {
        match PayloadShape::parse(raw)? {
            PayloadShape::Envelope(mut map) => {
                let items = match map.remove("todos") {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                };
                let text = |field: &str| map.get(field).and_then(Value::as_str).map(str::to_string);
                Ok(Self::Envelope(Envelope {
                    todos: decode_tasks(items),
                    last_modified: text("lastModified"),
                    version: text("version"),
                    migrated: map
                        .get("migrated")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                }))
            }
            PayloadShape::Legacy(items) => Ok(Self::Legacy(decode_tasks(items))),
        }
    }

    pub fn tasks(&self) -> &[Task] {
        match self {
            Self::Envelope(envelope) => &envelope.todos,
            Self::Legacy(tasks) => tasks,
        }
    }

    pub fn into_tasks(self) -> Vec<Task> {
        match self {
            Self::Envelope(envelope) => envelope.todos,
            Self::Legacy(tasks) => tasks,
        }
    }

    pub fn version(&self) -> &str {
        match self {
            Self::Envelope(envelope) => envelope.version.as_deref().unwrap_or(LEGACY_VERSION),
            Self::Legacy(_) => LEGACY_VERSION,
        }
    }

    pub fn last_modified(&self) -> Option<&str> {
        match self {
            Self::Envelope(envelope) => envelope.last_modified.as_deref(),
            Self::Legacy(_) => None,
        }
    }
}

fn decode_tasks(items: Vec<Value>) -> Vec<Task> {
    let total = items.len();
    let tasks: Vec<Task> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();
    if tasks.len() < total {
        tracing::warn!(
            dropped = total - tasks.len(),
            "dropped undecodable stored tasks"
        );
    }
    tasks
}

/// Imported elements must carry a string id, string text and boolean completed.
pub fn has_required_fields(item: &Value) -> bool {
    item.get("id").is_some_and(Value::is_string)
        && item.get("text").is_some_and(Value::is_string)
        && item.get("completed").is_some_and(Value::is_boolean)
}
