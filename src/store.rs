//! # Chat record store
//!
//! ## Responsibility
//! Load and save the complete chat collection as a single JSON document.
//! There are no row-level writes: every save replaces the whole document.
//!
//! ## On-disk shapes
//! - current: `{"chats": {"<id>": {"history": [..], "window": [..], "config": {..}}}}`
//! - legacy document: the chat map without the `"chats"` wrapper
//! - legacy entry: a bare list of outcomes instead of a record object
//!
//! Legacy shapes are decoded through explicit tagged unions
//! ([`StoredDocument`], [`StoredChat`]) and upgraded by [`migrate`].
//!
//! ## Guarantees
//! - A missing document is an empty store, not an error
//! - File saves go through a temp file and an atomic rename; a failed save
//!   leaves the previous document intact
//! - Every stored outcome is in `0..=36`, otherwise the document is corrupt

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::chat_config::ChatConfig;
use crate::error::{LedgerError, Result};
use crate::outcome::MAX_OUTCOME;
use crate::record::{ChatId, ChatRecord};

// ---------------------------------------------------------------------------
// Medium
// ---------------------------------------------------------------------------

/// The durable medium holding the serialized store.
pub trait StoreBackend: Send + Sync {
    /// Raw document bytes, or `None` when nothing has been saved yet.
    fn read(&self) -> Result<Option<Vec<u8>>>;
    /// Replace the document. Must be all-or-nothing.
    fn write(&self, bytes: &[u8]) -> Result<()>;
    /// Human-readable location used in errors and logs.
    fn describe(&self) -> String;
}

/// A JSON file on the local filesystem.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn unavailable(&self, source: std::io::Error) -> LedgerError {
        LedgerError::StorageUnavailable {
            target: self.describe(),
            source,
        }
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "store".to_string());
        self.path
            .with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4()))
    }
}

impl StoreBackend for JsonFileBackend {
    fn read(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.unavailable(e)),
        }
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.unavailable(e))?;
        }

        let temp_path = self.temp_path();
        let written = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&temp_path, &self.path)
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(self.unavailable(e));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-process medium, for tests and throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: Mutex<Option<Vec<u8>>>,
    fail_writes: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an existing raw document.
    pub fn with_document(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Mutex::new(Some(bytes.into())),
            fail_writes: false,
        }
    }

    /// Make every write fail with `StorageUnavailable`.
    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// Current raw document, if any.
    pub fn snapshot(&self) -> Option<Vec<u8>> {
        self.data.lock().ok().and_then(|d| d.clone())
    }

    fn poisoned(&self) -> LedgerError {
        LedgerError::StorageUnavailable {
            target: self.describe(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "memory backend lock poisoned"),
        }
    }
}

impl StoreBackend for MemoryBackend {
    fn read(&self) -> Result<Option<Vec<u8>>> {
        self.data
            .lock()
            .map(|d| d.clone())
            .map_err(|_| self.poisoned())
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        if self.fail_writes {
            return Err(LedgerError::StorageUnavailable {
                target: self.describe(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "writes disabled"),
            });
        }
        let mut data = self.data.lock().map_err(|_| self.poisoned())?;
        *data = Some(bytes.to_vec());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

impl<B: StoreBackend + ?Sized> StoreBackend for std::sync::Arc<B> {
    fn read(&self) -> Result<Option<Vec<u8>>> {
        (**self).read()
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        (**self).write(bytes)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Every chat known to the ledger, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Store {
    chats: BTreeMap<ChatId, ChatRecord>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ChatId) -> Option<&ChatRecord> {
        self.chats.get(id)
    }

    /// The record for `id`, materialized with `defaults` if absent.
    pub fn get_or_create(&mut self, id: &ChatId, defaults: &ChatConfig) -> &mut ChatRecord {
        self.chats
            .entry(id.clone())
            .or_insert_with(|| ChatRecord::new(defaults.clone()))
    }

    pub fn insert(&mut self, id: ChatId, record: ChatRecord) -> Option<ChatRecord> {
        self.chats.insert(id, record)
    }

    pub fn chat_ids(&self) -> impl Iterator<Item = &ChatId> {
        self.chats.keys()
    }

    pub fn len(&self) -> usize {
        self.chats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Top-level document shapes accepted on read.
#[derive(Debug)]
pub enum StoredDocument {
    /// `{"chats": {...}}`
    Current(Map<String, Value>),
    /// The chat map itself, without a wrapper.
    LegacyBare(Map<String, Value>),
}

impl StoredDocument {
    pub fn decode(value: Value) -> std::result::Result<Self, String> {
        match value {
            Value::Object(mut map) => match map.remove("chats") {
                Some(Value::Object(chats)) => Ok(StoredDocument::Current(chats)),
                Some(other) => {
                    map.insert("chats".to_string(), other);
                    Ok(StoredDocument::LegacyBare(map))
                }
                None => Ok(StoredDocument::LegacyBare(map)),
            },
            other => Err(format!("expected a JSON object at top level, found {}", kind(&other))),
        }
    }
}

/// Per-chat entry shapes accepted on read.
#[derive(Debug, PartialEq)]
pub enum StoredChat {
    /// A bare list of outcomes.
    LegacyList(Vec<u8>),
    /// A full record.
    Current(ChatRecord),
}

impl StoredChat {
    pub fn decode(value: Value) -> std::result::Result<Self, String> {
        match value {
            Value::Array(_) => {
                let outcomes: Vec<u8> =
                    serde_json::from_value(value).map_err(|e| format!("legacy list: {e}"))?;
                check_outcomes("legacy list", &outcomes)?;
                Ok(StoredChat::LegacyList(outcomes))
            }
            Value::Object(_) => {
                let record: ChatRecord =
                    serde_json::from_value(value).map_err(|e| format!("record: {e}"))?;
                check_outcomes("history", &record.history)?;
                check_outcomes("window", &record.window)?;
                Ok(StoredChat::Current(record))
            }
            other => Err(format!("expected a list or an object, found {}", kind(&other))),
        }
    }
}

/// Upgrade a legacy list to a current record.
pub fn migrate(outcomes: Vec<u8>, defaults: &ChatConfig) -> ChatRecord {
    ChatRecord::from_legacy(outcomes, defaults.clone())
}

fn check_outcomes(what: &str, outcomes: &[u8]) -> std::result::Result<(), String> {
    match outcomes.iter().find(|&&n| n > MAX_OUTCOME) {
        Some(n) => Err(format!("{what} contains out-of-range outcome {n}")),
        None => Ok(()),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// ChatStore
// ---------------------------------------------------------------------------

/// Result of a [`ChatStore::load`].
#[derive(Debug)]
pub struct Loaded {
    pub store: Store,
    /// Number of chats upgraded from a legacy list.
    pub migrated: usize,
    /// The document lacked the `"chats"` wrapper.
    pub legacy_document: bool,
}

impl Loaded {
    /// Whether the upgraded form should be written back.
    pub fn needs_write_back(&self) -> bool {
        self.migrated > 0 || self.legacy_document
    }
}

/// Whole-document load/save over a [`StoreBackend`].
pub struct ChatStore {
    backend: Box<dyn StoreBackend>,
    defaults: ChatConfig,
}

impl ChatStore {
    pub fn new(backend: impl StoreBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            defaults: ChatConfig::default(),
        }
    }

    pub fn json_file(path: impl Into<PathBuf>) -> Self {
        Self::new(JsonFileBackend::new(path))
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// Config given to newly created and migrated chats.
    pub fn with_defaults(mut self, defaults: ChatConfig) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn defaults(&self) -> &ChatConfig {
        &self.defaults
    }

    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    /// Read and decode the whole collection. Never writes.
    pub fn load(&self) -> Result<Loaded> {
        let Some(bytes) = self.backend.read()? else {
            debug!(target_store = %self.describe(), "no document yet; starting empty");
            return Ok(Loaded {
                store: Store::new(),
                migrated: 0,
                legacy_document: false,
            });
        };

        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| LedgerError::corrupt(self.describe(), format!("not valid JSON: {e}")))?;

        let (entries, legacy_document) = match StoredDocument::decode(value)
            .map_err(|reason| LedgerError::corrupt(self.describe(), reason))?
        {
            StoredDocument::Current(chats) => (chats, false),
            StoredDocument::LegacyBare(chats) => (chats, true),
        };

        let mut store = Store::new();
        let mut migrated = 0;
        for (id, entry) in entries {
            let record = match StoredChat::decode(entry)
                .map_err(|reason| LedgerError::corrupt(self.describe(), format!("chat {id}: {reason}")))?
            {
                StoredChat::Current(record) => record,
                StoredChat::LegacyList(outcomes) => {
                    migrated += 1;
                    migrate(outcomes, &self.defaults)
                }
            };
            store.insert(ChatId::from(id), record);
        }

        debug!(chats = store.len(), migrated, legacy_document, "store loaded");
        Ok(Loaded {
            store,
            migrated,
            legacy_document,
        })
    }

    /// Load, writing the upgraded document back once if anything was migrated.
    pub fn load_upgraded(&self) -> Result<Store> {
        let loaded = self.load()?;
        if loaded.needs_write_back() {
            info!(
                migrated = loaded.migrated,
                legacy_document = loaded.legacy_document,
                "upgrading legacy store document"
            );
            self.save(&loaded.store)?;
        }
        Ok(loaded.store)
    }

    pub fn save(&self, store: &Store) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(store)
            .map_err(|e| LedgerError::corrupt(self.describe(), format!("serialize: {e}")))?;
        self.backend.write(&bytes).map_err(|e| {
            warn!(error = %e, "store save failed");
            e
        })?;
        debug!(chats = store.len(), "store saved");
        Ok(())
    }
}
