//! Per-chat configuration and its validated partial updates.
//!
//! Updates arrive as loosely-typed JSON maps from the HTTP and CLI layers.
//! [`ConfigPatch::from_map`] turns such a map into a typed patch using an
//! explicit allow-list; every recognised key goes through its own validator,
//! unknown keys are dropped.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{LedgerError, Result};

/// Window capacity used when none is configured, or when the stored value is 0.
pub const DEFAULT_WINDOW_CAPACITY: usize = 15;
pub const DEFAULT_HISTORY_DISPLAY_CAP: usize = 20;

pub const MAX_WINDOW_CAPACITY: usize = 5000;
pub const MAX_HISTORY_DISPLAY_CAP: usize = 1000;
pub const MAX_SEED_LAST: usize = 5000;
pub const MAX_HIST_TAIL: usize = 5000;

/// Configuration stored alongside each chat.
///
/// The aliases accept documents written with the older short field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Maximum length of the window.
    #[serde(alias = "window")]
    pub window_capacity: usize,
    /// How many history entries a UI should show. Not enforced here.
    #[serde(alias = "history_cap")]
    pub history_display_cap: usize,
    /// Reserved.
    pub use_zero: bool,
    /// Reserved.
    pub seed_last: usize,
    /// When non-zero, statistics sample the tail of the history instead of the window.
    pub hist_tail: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            history_display_cap: DEFAULT_HISTORY_DISPLAY_CAP,
            use_zero: true,
            seed_last: 0,
            hist_tail: 0,
        }
    }
}

impl ChatConfig {
    /// Default config with a different window capacity.
    pub fn with_capacity(window_capacity: usize) -> Self {
        Self {
            window_capacity,
            ..Self::default()
        }
    }

    /// Capacity to truncate and sample with; 0 falls back to the default.
    pub fn effective_capacity(&self) -> usize {
        if self.window_capacity > 0 {
            self.window_capacity
        } else {
            DEFAULT_WINDOW_CAPACITY
        }
    }

    /// Return a copy with every field present in `patch` replaced.
    pub fn apply(&self, patch: &ConfigPatch) -> ChatConfig {
        ChatConfig {
            window_capacity: patch.window_capacity.unwrap_or(self.window_capacity),
            history_display_cap: patch
                .history_display_cap
                .unwrap_or(self.history_display_cap),
            use_zero: patch.use_zero.unwrap_or(self.use_zero),
            seed_last: patch.seed_last.unwrap_or(self.seed_last),
            hist_tail: patch.hist_tail.unwrap_or(self.hist_tail),
        }
    }
}

/// A validated partial update. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_display_cap: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_zero: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed_last: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hist_tail: Option<usize>,
}

impl ConfigPatch {
    /// Build a patch from an arbitrary key/value map.
    ///
    /// Fails on the first recognised key whose value is out of bounds or of
    /// the wrong type; nothing is applied in that case. `null` values count
    /// as absent.
    pub fn from_map(map: &Map<String, Value>) -> Result<ConfigPatch> {
        let mut patch = ConfigPatch::default();
        for (key, value) in map {
            if value.is_null() {
                continue;
            }
            match key.as_str() {
                "window_capacity" | "window" => {
                    patch.window_capacity = Some(validate_window_capacity(value)?);
                }
                "history_display_cap" | "history_cap" => {
                    patch.history_display_cap = Some(validate_history_display_cap(value)?);
                }
                "use_zero" => patch.use_zero = Some(validate_use_zero(value)?),
                "seed_last" => patch.seed_last = Some(validate_seed_last(value)?),
                "hist_tail" => patch.hist_tail = Some(validate_hist_tail(value)?),
                other => debug!(key = other, "ignoring unrecognised config key"),
            }
        }
        Ok(patch)
    }

    pub fn is_empty(&self) -> bool {
        *self == ConfigPatch::default()
    }
}

fn integer_in(field: &str, value: &Value, min: usize, max: usize) -> Result<usize> {
    let n = value
        .as_i64()
        .ok_or_else(|| LedgerError::invalid_config(field, format!("expected an integer, got {value}")))?;
    if n < min as i64 || n > max as i64 {
        return Err(LedgerError::invalid_config(
            field,
            format!("{n} is outside {min}..={max}"),
        ));
    }
    Ok(n as usize)
}

pub fn validate_window_capacity(value: &Value) -> Result<usize> {
    integer_in("window_capacity", value, 1, MAX_WINDOW_CAPACITY)
}

pub fn validate_history_display_cap(value: &Value) -> Result<usize> {
    integer_in("history_display_cap", value, 1, MAX_HISTORY_DISPLAY_CAP)
}

pub fn validate_seed_last(value: &Value) -> Result<usize> {
    integer_in("seed_last", value, 0, MAX_SEED_LAST)
}

pub fn validate_hist_tail(value: &Value) -> Result<usize> {
    integer_in("hist_tail", value, 0, MAX_HIST_TAIL)
}

pub fn validate_use_zero(value: &Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| LedgerError::invalid_config("use_zero", format!("expected a boolean, got {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_default_config_values() {
        let cfg = ChatConfig::default();
        assert_eq!(cfg.window_capacity, 15);
        assert_eq!(cfg.history_display_cap, 20);
        assert!(cfg.use_zero);
        assert_eq!(cfg.seed_last, 0);
        assert_eq!(cfg.hist_tail, 0);
    }

    #[test]
    fn test_effective_capacity_falls_back_on_zero() {
        assert_eq!(ChatConfig::with_capacity(0).effective_capacity(), 15);
        assert_eq!(ChatConfig::with_capacity(7).effective_capacity(), 7);
    }

    #[test]
    fn test_patch_merges_only_recognised_keys() {
        let patch = ConfigPatch::from_map(&map(json!({
            "window_capacity": 30,
            "hist_tail": 10,
            "colour": "blue",
            "chat_id": 99
        })))
        .unwrap();
        let cfg = ChatConfig::default().apply(&patch);
        assert_eq!(cfg.window_capacity, 30);
        assert_eq!(cfg.hist_tail, 10);
        assert_eq!(cfg.history_display_cap, 20);
    }

    #[test]
    fn test_patch_accepts_short_aliases() {
        let patch = ConfigPatch::from_map(&map(json!({"window": 9, "history_cap": 50}))).unwrap();
        assert_eq!(patch.window_capacity, Some(9));
        assert_eq!(patch.history_display_cap, Some(50));
    }

    #[test]
    fn test_patch_rejects_out_of_range_capacity() {
        for bad in [json!(0), json!(5001), json!(-3)] {
            let err = ConfigPatch::from_map(&map(json!({ "window_capacity": bad }))).unwrap_err();
            assert!(matches!(
                err,
                LedgerError::InvalidConfigValue { ref field, .. } if field == "window_capacity"
            ));
        }
    }

    #[test]
    fn test_patch_rejects_wrong_types() {
        assert!(ConfigPatch::from_map(&map(json!({"hist_tail": "ten"}))).is_err());
        assert!(ConfigPatch::from_map(&map(json!({"hist_tail": 2.5}))).is_err());
        assert!(ConfigPatch::from_map(&map(json!({"use_zero": 1}))).is_err());
    }

    #[test]
    fn test_patch_bounds_for_each_field() {
        assert!(ConfigPatch::from_map(&map(json!({"history_display_cap": 1000}))).is_ok());
        assert!(ConfigPatch::from_map(&map(json!({"history_display_cap": 1001}))).is_err());
        assert!(ConfigPatch::from_map(&map(json!({"seed_last": 0}))).is_ok());
        assert!(ConfigPatch::from_map(&map(json!({"seed_last": 5001}))).is_err());
        assert!(ConfigPatch::from_map(&map(json!({"hist_tail": 0}))).is_ok());
        assert!(ConfigPatch::from_map(&map(json!({"hist_tail": -1}))).is_err());
    }

    #[test]
    fn test_patch_null_is_absent() {
        let patch = ConfigPatch::from_map(&map(json!({"hist_tail": null}))).unwrap();
        assert!(patch.is_empty());
    }

    #[test]
    fn test_config_deserialises_legacy_names_and_fills_defaults() {
        let cfg: ChatConfig = serde_json::from_value(json!({"window": 8, "history_cap": 40})).unwrap();
        assert_eq!(cfg.window_capacity, 8);
        assert_eq!(cfg.history_display_cap, 40);
        assert!(cfg.use_zero);
        assert_eq!(cfg.hist_tail, 0);
    }

    #[test]
    fn test_config_serialises_canonical_names() {
        let v = serde_json::to_value(ChatConfig::default()).unwrap();
        assert_eq!(v["window_capacity"], 15);
        assert_eq!(v["history_display_cap"], 20);
        assert!(v.get("window").is_none());
    }
}
