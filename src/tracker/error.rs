use std::{io, path::PathBuf};

use super::storage::{HistoryBound, SubjectKey};

/// Failures surfaced by the tracker. None of them stop ticking: accumulation carries on and the
/// next checkpoint retries whatever could not be persisted.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// The backing file exists but is not a valid log. Treating it as empty would lose history,
    /// so it is reported instead.
    #[error("history log {path:?} is corrupt: {source}")]
    CorruptLog {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read history log {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to persist history log {path:?}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("history bound {0} is outside of [{min}, {max}]", min = HistoryBound::MIN, max = HistoryBound::MAX)]
    InvalidBound(i64),

    /// Folding the session into the stored totals would leave the representable range.
    #[error("totals of {0} are out of range")]
    TotalsOverflow(SubjectKey),

    #[error("no subject is being tracked")]
    NotTracking,
}

pub type TrackerResult<T> = Result<T, TrackerError>;
