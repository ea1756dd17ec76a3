//! Durable side of the tracker.
//!  - [entities] describes the log: subject key to totals plus a bounded list of checkpoints.
//!  - [history_store] owns the bound arithmetic and reads/writes the log as a single JSON file.

pub mod entities;
pub mod history_store;

pub use entities::{CheckpointEntry, LogStore, SubjectKey, SubjectRecord};
pub use history_store::{HistoryBound, HistoryStore, JsonHistoryStore};
