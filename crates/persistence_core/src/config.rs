//! Coordinator configuration.
//!
//! # Responsibility
//! - Carry queue labels and SQLite engine knobs into the coordinator.
//! - Parse configuration documents with defaults for every field.

use crate::engine::{JournalMode, SqliteEngine};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_MAIN_QUEUE_LABEL: &str = "persistence.main";
const DEFAULT_BACKGROUND_QUEUE_LABEL: &str = "persistence.background";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Tunables for `PersistenceCoordinator::open`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Thread name of the main queue (root + foreground children).
    pub main_queue_label: String,
    /// Thread name prefix for background children; suffixed with a counter.
    pub background_queue_label: String,
    /// SQLite busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
    pub journal_mode: JournalMode,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            main_queue_label: DEFAULT_MAIN_QUEUE_LABEL.to_string(),
            background_queue_label: DEFAULT_BACKGROUND_QUEUE_LABEL.to_string(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: JournalMode::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// SQLite engine configured from this config.
    pub fn sqlite_engine(&self) -> SqliteEngine {
        SqliteEngine::new()
            .with_busy_timeout(Duration::from_millis(self.busy_timeout_ms))
            .with_journal_mode(self.journal_mode)
    }
}
