// Interaction Log
//
// Append-only record of user interactions. The whole store is a single
// JSON document that is loaded on every read and rewritten in full on
// every append.
//
// The public surface is fail-soft: `append` reports a boolean and
// `read_all` degrades to an empty store. Errors never reach the caller.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

mod store;

pub use store::{InMemoryBackend, JsonFileBackend, LogBackend};

/// Format version written into fresh stores.
pub const FORMAT_VERSION: &str = "1.0";

/// Description written into fresh stores.
pub const STORE_DESCRIPTION: &str = "Data storage for AI web application";

/// Caller-supplied fields of an entry, in insertion order.
pub type Fields = Map<String, Value>;

/// A single recorded interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(flatten)]
    pub fields: Fields,

    /// Assigned by the log at append time.
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMetadata {
    pub version: String,
    pub description: String,
}

impl Default for LogMetadata {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION.into(),
            description: STORE_DESCRIPTION.into(),
        }
    }
}

/// Full contents of the interaction log.
///
/// Missing top-level keys take their defaults on load, so existing entries
/// survive a store written without `metadata` or `lastUpdated`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogStore {
    pub entries: Vec<LogEntry>,
    pub last_updated: Option<String>,
    pub metadata: LogMetadata,
}

impl LogStore {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.last()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not encode log store: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("stored log is malformed: {0}")]
    Deserialize(#[source] serde_json::Error),

    #[error("record must serialize to a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Durable append-only interaction log.
///
/// A mutex serialises the read-modify-write cycle for callers sharing one
/// instance. Separate processes writing the same file are not coordinated:
/// the last full rewrite wins.
#[derive(Debug)]
pub struct InteractionLog<B: LogBackend = JsonFileBackend> {
    backend: Mutex<B>,
}

impl InteractionLog<JsonFileBackend> {
    /// Open a log backed by a JSON file. The file is created on first append.
    pub fn open(path: impl Into<std::path::PathBuf>) -> Self {
        Self::new(JsonFileBackend::new(path))
    }
}

impl<B: LogBackend> InteractionLog<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Mutex::new(backend),
        }
    }

    /// Append one entry built from `fields` plus a fresh timestamp.
    ///
    /// Returns `false` if the entry was not recorded.
    pub fn append(&self, fields: Fields) -> bool {
        match self.try_append(fields) {
            Ok(count) => {
                debug!(entries = count, "interaction recorded");
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to record interaction");
                false
            }
        }
    }

    /// Append any value that serializes to a JSON object.
    pub fn append_record<T: Serialize>(&self, record: &T) -> bool {
        match to_fields(record) {
            Ok(fields) => self.append(fields),
            Err(e) => {
                warn!(error = %e, "failed to record interaction");
                false
            }
        }
    }

    /// Record a question/answer exchange.
    pub fn record_exchange(&self, question: &str, answer: &str) -> bool {
        let mut fields = Fields::new();
        fields.insert("question".into(), Value::String(question.into()));
        fields.insert("answer".into(), Value::String(answer.into()));
        self.append(fields)
    }

    /// Load the full history. Missing or corrupt storage yields an empty store.
    pub fn read_all(&self) -> LogStore {
        let backend = self.lock();
        load_store(&*backend)
    }

    fn try_append(&self, mut fields: Fields) -> Result<usize, LogError> {
        let mut backend = self.lock();
        let mut store = load_store(&*backend);

        // The log owns the timestamp.
        fields.retain(|key, _| key != "timestamp");

        let timestamp = now_timestamp();
        store.entries.push(LogEntry {
            fields,
            timestamp: timestamp.clone(),
        });
        store.last_updated = Some(timestamp);

        let contents = serde_json::to_string_pretty(&store).map_err(LogError::Serialize)?;
        backend.persist(&contents)?;

        Ok(store.entries.len())
    }

    fn lock(&self) -> MutexGuard<'_, B> {
        self.backend.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Current time as an RFC 3339 UTC string with microsecond precision.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn to_fields<T: Serialize>(record: &T) -> Result<Fields, LogError> {
    match serde_json::to_value(record).map_err(LogError::Serialize)? {
        Value::Object(fields) => Ok(fields),
        Value::Null => Err(LogError::NotAnObject("null")),
        Value::Bool(_) => Err(LogError::NotAnObject("boolean")),
        Value::Number(_) => Err(LogError::NotAnObject("number")),
        Value::String(_) => Err(LogError::NotAnObject("string")),
        Value::Array(_) => Err(LogError::NotAnObject("array")),
    }
}

fn parse_store(raw: &str) -> Result<LogStore, LogError> {
    serde_json::from_str(raw).map_err(LogError::Deserialize)
}

fn load_store<B: LogBackend>(backend: &B) -> LogStore {
    let raw = match backend.load() {
        Ok(Some(raw)) if !raw.trim().is_empty() => raw,
        Ok(_) => return LogStore::default(),
        Err(e) => {
            warn!(error = %e, "interaction log unreadable, using empty store");
            return LogStore::default();
        }
    };

    match parse_store(&raw) {
        Ok(store) => store,
        Err(e) => {
            warn!(error = %e, "interaction log corrupt, using empty store");
            LogStore::default()
        }
    }
}
