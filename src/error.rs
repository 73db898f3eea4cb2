//! Crate-level error type.
//!
//! Every fallible ledger operation returns [`LedgerError`].  The variants are
//! deliberately coarse so the HTTP and CLI layers can map them onto status
//! codes and exit messages without inspecting the underlying cause.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = LedgerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// A roulette outcome outside the closed range `[0, 36]`.
    #[error("outcome {value} is out of range (0-36)")]
    InvalidOutcome { value: i64 },

    /// A configuration value that fails its field's bounds or type check.
    #[error("invalid value for '{field}': {reason}")]
    InvalidConfigValue { field: String, reason: String },

    /// The persistence medium could not be read or written.
    #[error("storage unavailable ({target}): {source}")]
    StorageUnavailable {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// The persisted document is not a recognised store shape.
    #[error("storage corrupt ({target}): {reason}")]
    StorageCorrupt { target: String, reason: String },

    /// Process settings could not be resolved (settings file, flags).
    #[error("settings error: {0}")]
    Settings(String),
}

impl LedgerError {
    pub(crate) fn invalid_config(field: &str, reason: impl Into<String>) -> Self {
        LedgerError::InvalidConfigValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt(target: impl Into<String>, reason: impl Into<String>) -> Self {
        LedgerError::StorageCorrupt {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// `true` for errors caused by caller-supplied input.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            LedgerError::InvalidOutcome { .. } | LedgerError::InvalidConfigValue { .. }
        )
    }

    /// `true` for failures of the persistence medium.
    pub fn is_storage_error(&self) -> bool {
        matches!(
            self,
            LedgerError::StorageUnavailable { .. } | LedgerError::StorageCorrupt { .. }
        )
    }
}
