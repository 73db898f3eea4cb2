//! The per-chat ledger record: full history, bounded window, config.

use serde::{Deserialize, Serialize};

use crate::chat_config::ChatConfig;

/// Identifier of a conversation. Numeric ids are stored in decimal form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChatId {
    fn from(s: &str) -> Self {
        ChatId(s.to_string())
    }
}

impl From<String> for ChatId {
    fn from(s: String) -> Self {
        ChatId(s)
    }
}

impl From<&ChatId> for ChatId {
    fn from(id: &ChatId) -> Self {
        id.clone()
    }
}

impl From<i64> for ChatId {
    fn from(n: i64) -> Self {
        ChatId(n.to_string())
    }
}

impl From<u64> for ChatId {
    fn from(n: u64) -> Self {
        ChatId(n.to_string())
    }
}

/// State kept for one chat.
///
/// `window` normally mirrors the tail of `history`, but [`reset_window`]
/// clears it on its own, after which the two legitimately diverge.
///
/// [`reset_window`]: ChatRecord::reset_window
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChatRecord {
    #[serde(default)]
    pub history: Vec<u8>,
    #[serde(default)]
    pub window: Vec<u8>,
    #[serde(default, alias = "cfg")]
    pub config: ChatConfig,
}

impl ChatRecord {
    pub fn new(config: ChatConfig) -> Self {
        Self {
            history: Vec::new(),
            window: Vec::new(),
            config,
        }
    }

    /// Upgrade a bare list of outcomes (the pre-window document shape).
    pub fn from_legacy(outcomes: Vec<u8>, config: ChatConfig) -> Self {
        let capacity = config.effective_capacity();
        let window = tail(&outcomes, capacity).to_vec();
        Self {
            history: outcomes,
            window,
            config,
        }
    }

    /// Record an outcome in the history and the window, evicting the oldest
    /// window entries beyond capacity.
    pub fn push(&mut self, n: u8) {
        self.history.push(n);
        self.window.push(n);
        let capacity = self.config.effective_capacity();
        if self.window.len() > capacity {
            let excess = self.window.len() - capacity;
            self.window.drain(..excess);
        }
    }

    /// Undo the latest history entry. The window only loses its last entry
    /// when that entry is the value being undone.
    pub fn rollback(&mut self) -> Option<u8> {
        let last = self.history.pop()?;
        if self.window.last() == Some(&last) {
            self.window.pop();
        }
        Some(last)
    }

    pub fn reset_window(&mut self) {
        self.window.clear();
    }
}

/// Last `n` elements of `items` (all of them when shorter).
pub(crate) fn tail<T>(items: &[T], n: usize) -> &[T] {
    &items[items.len().saturating_sub(n)..]
}
