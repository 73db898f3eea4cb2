//! # Ledger: the mutation and query operations
//!
//! Every operation works on the whole store: load, touch one chat record,
//! save. The ledger owns the store and an `RwLock` so that concurrent
//! callers cannot lose each other's writes.
//!
//! - mutations hold the exclusive lock from load through save
//! - queries hold the shared lock; a query that finds legacy entries
//!   re-runs under the exclusive lock so the upgrade is written back once
//!
//! A chat that does not exist yet is materialized with the store's default
//! config. Queries do not persist such a chat; the first mutation does.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::{Map, Value};
use tracing::debug;

use crate::chat_config::{ChatConfig, ConfigPatch};
use crate::error::Result;
use crate::outcome::validate_outcome;
use crate::record::{ChatId, ChatRecord};
use crate::stats::{self, StatsSnapshot};
use crate::store::{ChatStore, Store};

pub struct Ledger {
    store: ChatStore,
    lock: RwLock<()>,
}

impl Ledger {
    pub fn new(store: ChatStore) -> Self {
        Self {
            store,
            lock: RwLock::new(()),
        }
    }

    /// Ledger over an in-process store; nothing survives the process.
    pub fn in_memory() -> Self {
        Self::new(ChatStore::in_memory())
    }

    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Locking helpers
    // -----------------------------------------------------------------------

    fn write_guard(&self) -> RwLockWriteGuard<'_, ()> {
        // The guarded data is `()`, so a poisoned lock carries no broken state.
        self.lock.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Load → mutate one record → save, under the exclusive lock.
    ///
    /// `f` returns the value to hand back and whether anything changed; the
    /// store is only saved when it did.
    fn mutate<T>(
        &self,
        chat: &ChatId,
        f: impl FnOnce(&mut ChatRecord) -> Result<(T, bool)>,
    ) -> Result<T> {
        let _guard = self.write_guard();
        let mut store = self.store.load_upgraded()?;
        let record = store.get_or_create(chat, self.store.defaults());
        let (out, changed) = f(record)?;
        if changed {
            self.store.save(&store)?;
        }
        Ok(out)
    }

    /// Run `f` against the current record under the shared lock.
    fn inspect<T>(&self, chat: &ChatId, f: impl FnOnce(&ChatRecord) -> T) -> Result<T> {
        let store = self.read_store()?;
        Ok(match store.get(chat) {
            Some(record) => f(record),
            None => f(&ChatRecord::new(self.store.defaults().clone())),
        })
    }

    fn read_store(&self) -> Result<Store> {
        {
            let _guard = self.read_guard();
            let loaded = self.store.load()?;
            if !loaded.needs_write_back() {
                return Ok(loaded.store);
            }
        }
        let _guard = self.write_guard();
        self.store.load_upgraded()
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Append `n` to the history and the window.
    pub fn append_outcome(&self, chat: impl Into<ChatId>, n: i64) -> Result<()> {
        let chat = chat.into();
        let n = validate_outcome(n)?;
        self.mutate(&chat, |record| {
            record.push(n);
            debug!(%chat, outcome = n, window = record.window.len(), "outcome appended");
            Ok(((), true))
        })
    }

    /// Undo the latest outcome. A no-op on an empty history.
    pub fn rollback_last(&self, chat: impl Into<ChatId>) -> Result<Option<u8>> {
        let chat = chat.into();
        self.mutate(&chat, |record| {
            let undone = record.rollback();
            debug!(%chat, ?undone, "rollback");
            Ok((undone, undone.is_some()))
        })
    }

    /// Clear the window. The history is untouched.
    pub fn reset_window(&self, chat: impl Into<ChatId>) -> Result<()> {
        let chat = chat.into();
        self.mutate(&chat, |record| {
            record.reset_window();
            debug!(%chat, "window reset");
            Ok(((), true))
        })
    }

    /// Merge the recognised keys of `partial` into the chat's config.
    ///
    /// Invalid values reject the whole update.
    pub fn set_config(
        &self,
        chat: impl Into<ChatId>,
        partial: &Map<String, Value>,
    ) -> Result<ChatConfig> {
        let patch = ConfigPatch::from_map(partial)?;
        self.apply_config(chat, &patch)
    }

    /// Apply an already validated patch.
    pub fn apply_config(&self, chat: impl Into<ChatId>, patch: &ConfigPatch) -> Result<ChatConfig> {
        let chat = chat.into();
        self.mutate(&chat, |record| {
            record.config = record.config.apply(patch);
            debug!(%chat, ?patch, "config updated");
            Ok((record.config.clone(), true))
        })
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get_config(&self, chat: impl Into<ChatId>) -> Result<ChatConfig> {
        self.inspect(&chat.into(), |r| r.config.clone())
    }

    pub fn compute_stats(&self, chat: impl Into<ChatId>) -> Result<StatsSnapshot> {
        self.inspect(&chat.into(), stats::compute_stats)
    }

    pub fn history(&self, chat: impl Into<ChatId>) -> Result<Vec<u8>> {
        self.inspect(&chat.into(), |r| r.history.clone())
    }

    pub fn window(&self, chat: impl Into<ChatId>) -> Result<Vec<u8>> {
        self.inspect(&chat.into(), |r| r.window.clone())
    }

    /// Full copy of one chat's record.
    pub fn record(&self, chat: impl Into<ChatId>) -> Result<ChatRecord> {
        self.inspect(&chat.into(), ChatRecord::clone)
    }

    /// Every chat that has been persisted.
    pub fn chat_ids(&self) -> Result<Vec<ChatId>> {
        Ok(self.read_store()?.chat_ids().cloned().collect())
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("store", &self.store.describe())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use crate::stats::SampleSource;
    use crate::store::MemoryBackend;
    use serde_json::json;
    use std::sync::Arc;

    fn ledger_with_capacity(cap: usize) -> Ledger {
        Ledger::new(ChatStore::in_memory().with_defaults(ChatConfig::with_capacity(cap)))
    }

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_append_and_stats_scenario() {
        let ledger = ledger_with_capacity(3);
        for n in [5, 0, 17, 22] {
            ledger.append_outcome("c", n).unwrap();
        }
        assert_eq!(ledger.window("c").unwrap(), vec![0, 17, 22]);
        assert_eq!(ledger.history("c").unwrap(), vec![5, 0, 17, 22]);
        let s = ledger.compute_stats("c").unwrap();
        assert_eq!(s.meta.source, SampleSource::Window);
        assert_eq!(s.total, 3);
        assert_eq!(s.since_last_0, 2);
        assert_eq!(s.counts.zero, 1);
    }

    #[test]
    fn test_append_rejects_out_of_range_without_writing() {
        let backend = Arc::new(MemoryBackend::new());
        let ledger = Ledger::new(ChatStore::new(backend.clone()));
        assert!(matches!(
            ledger.append_outcome("c", 37),
            Err(LedgerError::InvalidOutcome { value: 37 })
        ));
        assert!(matches!(
            ledger.append_outcome("c", -1),
            Err(LedgerError::InvalidOutcome { value: -1 })
        ));
        assert!(backend.snapshot().is_none());
    }

    #[test]
    fn test_rollback_on_empty_is_noop_and_does_not_save() {
        let backend = Arc::new(MemoryBackend::new());
        let ledger = Ledger::new(ChatStore::new(backend.clone()));
        assert_eq!(ledger.rollback_last("c").unwrap(), None);
        assert!(backend.snapshot().is_none());
    }

    #[test]
    fn test_rollback_restores_history() {
        let ledger = Ledger::in_memory();
        ledger.append_outcome("c", 3).unwrap();
        ledger.append_outcome("c", 8).unwrap();
        assert_eq!(ledger.rollback_last("c").unwrap(), Some(8));
        assert_eq!(ledger.history("c").unwrap(), vec![3]);
        assert_eq!(ledger.window("c").unwrap(), vec![3]);
    }

    #[test]
    fn test_reset_then_rollback_keeps_divergence() {
        let ledger = Ledger::in_memory();
        ledger.append_outcome("c", 3).unwrap();
        ledger.append_outcome("c", 8).unwrap();
        ledger.reset_window("c").unwrap();
        ledger.rollback_last("c").unwrap();
        assert_eq!(ledger.history("c").unwrap(), vec![3]);
        assert!(ledger.window("c").unwrap().is_empty());
    }

    #[test]
    fn test_chats_are_independent() {
        let ledger = Ledger::in_memory();
        ledger.append_outcome("a", 1).unwrap();
        ledger.append_outcome(42i64, 2).unwrap();
        assert_eq!(ledger.history("a").unwrap(), vec![1]);
        assert_eq!(ledger.history("42").unwrap(), vec![2]);
        let ids: Vec<String> = ledger
            .chat_ids()
            .unwrap()
            .iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(ids, vec!["42", "a"]);
    }

    #[test]
    fn test_queries_on_unknown_chat_use_defaults_and_do_not_persist() {
        let backend = Arc::new(MemoryBackend::new());
        let ledger = Ledger::new(ChatStore::new(backend.clone()));
        assert_eq!(ledger.get_config("nobody").unwrap(), ChatConfig::default());
        assert!(ledger.compute_stats("nobody").unwrap().is_empty());
        assert!(backend.snapshot().is_none());
        assert!(ledger.chat_ids().unwrap().is_empty());
    }

    #[test]
    fn test_set_config_merges_and_returns() {
        let ledger = Ledger::in_memory();
        let cfg = ledger
            .set_config("c", &obj(json!({"window_capacity": 4, "bogus": true})))
            .unwrap();
        assert_eq!(cfg.window_capacity, 4);
        assert_eq!(ledger.get_config("c").unwrap(), cfg);
    }

    #[test]
    fn test_set_config_invalid_leaves_config_untouched() {
        let ledger = Ledger::in_memory();
        ledger
            .set_config("c", &obj(json!({"hist_tail": 5})))
            .unwrap();
        let err = ledger
            .set_config("c", &obj(json!({"hist_tail": 1, "window_capacity": 0})))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidConfigValue { .. }));
        assert_eq!(ledger.get_config("c").unwrap().hist_tail, 5);
    }

    #[test]
    fn test_shrinking_capacity_applies_on_next_append() {
        let ledger = ledger_with_capacity(10);
        for n in 1..=6 {
            ledger.append_outcome("c", n).unwrap();
        }
        ledger
            .set_config("c", &obj(json!({"window_capacity": 2})))
            .unwrap();
        // stats already respect the new capacity
        assert_eq!(ledger.compute_stats("c").unwrap().total, 2);
        ledger.append_outcome("c", 7).unwrap();
        assert_eq!(ledger.window("c").unwrap(), vec![6, 7]);
    }

    #[test]
    fn test_hist_tail_switches_source() {
        let ledger = Ledger::in_memory();
        for n in [1, 2, 3] {
            ledger.append_outcome("c", n).unwrap();
        }
        ledger.reset_window("c").unwrap();
        ledger
            .set_config("c", &obj(json!({"hist_tail": 2})))
            .unwrap();
        let s = ledger.compute_stats("c").unwrap();
        assert_eq!(s.meta.source, SampleSource::History);
        assert_eq!(s.sample().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_query_upgrades_legacy_document() {
        let backend = Arc::new(MemoryBackend::with_document(r#"{"chat1": [1,2,3,4,5]}"#));
        let ledger = Ledger::new(ChatStore::new(backend.clone()));
        assert_eq!(ledger.window("chat1").unwrap(), vec![1, 2, 3, 4, 5]);
        let raw: Value = serde_json::from_slice(&backend.snapshot().unwrap()).unwrap();
        assert!(raw.get("chats").is_some());
    }

    #[test]
    fn test_corrupt_store_is_surfaced_not_reset() {
        let backend = Arc::new(MemoryBackend::with_document("[]"));
        let ledger = Ledger::new(ChatStore::new(backend.clone()));
        assert!(matches!(
            ledger.append_outcome("c", 1),
            Err(LedgerError::StorageCorrupt { .. })
        ));
        assert_eq!(backend.snapshot().unwrap(), b"[]".to_vec());
    }

    #[test]
    fn test_failed_save_surfaces_unavailable() {
        let backend = Arc::new(MemoryBackend::with_document(r#"{"chats":{}}"#).failing_writes());
        let ledger = Ledger::new(ChatStore::new(backend));
        assert!(matches!(
            ledger.append_outcome("c", 1),
            Err(LedgerError::StorageUnavailable { .. })
        ));
        assert!(ledger.history("c").unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_appends_are_not_lost() {
        let ledger = Arc::new(Ledger::in_memory());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        ledger.append_outcome(format!("chat-{t}"), (i % 37) as i64).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        for t in 0..8 {
            assert_eq!(ledger.history(format!("chat-{t}")).unwrap().len(), 25);
        }
    }
}
