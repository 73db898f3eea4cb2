//! Per-chat roulette outcome ledger.
//!
//! Each chat keeps an unbounded history of outcomes (0-36), a bounded
//! window of recent outcomes, and a small config. The [`ledger::Ledger`]
//! applies mutations against a persisted [`store::ChatStore`];
//! [`stats`] turns a chat into a statistics snapshot and [`etag`] gives
//! that snapshot a change-detection token for the HTTP layer in [`web`].

pub mod chat_config;
pub mod cli;
pub mod error;
pub mod etag;
pub mod ledger;
pub mod outcome;
pub mod record;
pub mod settings;
pub mod stats;
pub mod store;
pub mod web;

pub use error::{LedgerError, Result};
pub use ledger::Ledger;
