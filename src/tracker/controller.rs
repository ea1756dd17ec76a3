use chrono::{DateTime, Duration, Local, Utc};
use tracing::{debug, error, info, trace, warn};

use crate::{host_api::InputEvent, utils::clock::Clock};

use super::{
    error::{TrackerError, TrackerResult},
    session_timer::{SessionDeltas, SessionTimer},
    storage::{
        history_store::{append_checkpoint, clear, truncate_history},
        CheckpointEntry, HistoryBound, HistoryStore, SubjectKey, SubjectRecord,
    },
};

/// Consecutive failed checkpoints after which failures are logged as errors.
const ESCALATE_AFTER_FAILURES: u32 = 3;

/// Durable totals of the current subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Totals {
    pub open: Duration,
    pub active: Duration,
}

struct Session {
    key: SubjectKey,
    timer: SessionTimer,
    record: SubjectRecord,
    /// Set when the log could not be read on load. The stored record is then unknown, so the
    /// first checkpoint that can read the log starts from it instead of the empty record.
    adopt_stored_record: bool,
}

/// Ties a [SessionTimer] to the [HistoryStore] across the life of a subject.
///
/// The controller is either idle or tracking exactly one subject. Time only becomes durable at
/// [TrackerController::checkpoint]: the session deltas are folded into the totals, a history entry
/// is appended and the whole log is written. Anything accrued after the last successful checkpoint
/// is lost if the process dies.
///
/// Calls must be serialized by the host; nothing in here is reentrant.
pub struct TrackerController<S: HistoryStore> {
    store: S,
    clock: Box<dyn Clock>,
    bound: HistoryBound,
    session: Option<Session>,
    persist_failures: u32,
}

impl<S: HistoryStore> TrackerController<S> {
    pub fn new(store: S, clock: Box<dyn Clock>, bound: HistoryBound) -> Self {
        Self {
            store,
            clock,
            bound,
            session: None,
            persist_failures: 0,
        }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Starts tracking `key`, unloading the current subject first.
    ///
    /// A corrupt log is reported as [TrackerError::CorruptLog], but the subject is still loaded
    /// with an empty record so that ticking is not interrupted.
    pub async fn load_subject(&mut self, key: SubjectKey) -> TrackerResult<()> {
        if self.session.is_some() {
            self.unload_subject().await?;
        }

        let now = self.clock.time();
        let (mut record, loaded) = if key.is_persistent() {
            match self.store.load().await {
                Ok(mut log) => (log.remove(&key).unwrap_or_default(), Ok(())),
                Err(e) => {
                    warn!("Starting {key} without stored history: {e}");
                    (SubjectRecord::default(), Err(e))
                }
            }
        } else {
            (SubjectRecord::default(), Ok(()))
        };
        truncate_history(&mut record.history, self.bound);

        info!(
            "Tracking {key}, stored open time {}s, {} checkpoints",
            record.total_open_time.num_seconds(),
            record.history.len()
        );
        self.session = Some(Session {
            key,
            timer: SessionTimer::new(now),
            record,
            adopt_stored_record: loaded.is_err(),
        });
        loaded
    }

    /// Feeds one observation to the session timer. Ignored while idle.
    pub fn tick(&mut self, now: DateTime<Utc>, focused: bool, input: Option<InputEvent>) {
        match self.session.as_mut() {
            Some(session) => session.timer.tick(now, focused, input),
            None => trace!("Ignoring tick without a subject"),
        }
    }

    /// Folds the session deltas into the totals, appends a history entry and persists the log.
    ///
    /// On failure nothing changes: the deltas stay pending and the next checkpoint covers them.
    pub async fn checkpoint(&mut self) -> TrackerResult<()> {
        let now = self.clock.time();
        let bound = self.bound;
        let session = self.session.as_mut().ok_or(TrackerError::NotTracking)?;
        let deltas = session.timer.pending_deltas(now);
        let entry = CheckpointEntry::stamped(
            &now.with_timezone(&Local),
            deltas.open,
            deltas.active,
        );

        if !session.key.is_persistent() {
            debug!("Keeping checkpoint of {} in memory only", session.key);
            let result = fold(&session.key, session.record.clone(), deltas, entry, bound)
                .map(|record| {
                    session.record = record;
                    session.timer.mark_flushed(deltas);
                });
            return self.settle(result, deltas);
        }

        let result = persist_checkpoint(&self.store, session, deltas, entry, bound).await;
        self.settle(result, deltas)
    }

    fn settle(&mut self, result: TrackerResult<()>, deltas: SessionDeltas) -> TrackerResult<()> {
        match &result {
            Ok(()) => {
                if self.persist_failures > 0 {
                    info!(
                        "Checkpoint succeeded after {} failed attempts",
                        self.persist_failures
                    );
                }
                self.persist_failures = 0;
                info!(
                    "Checkpoint saved: +{}ms open, +{}ms active",
                    deltas.open.num_milliseconds(),
                    deltas.active.num_milliseconds()
                );
            }
            Err(e) => {
                self.persist_failures += 1;
                if self.persist_failures >= ESCALATE_AFTER_FAILURES {
                    error!(
                        "Checkpoint failed {} times in a row, history is incomplete: {e}",
                        self.persist_failures
                    );
                } else {
                    warn!("Checkpoint failed, will retry on the next one: {e}");
                }
            }
        }
        result
    }

    /// Takes a final checkpoint and forgets the session. Does nothing while idle.
    ///
    /// If the final checkpoint fails the subject stays loaded so the caller can retry.
    pub async fn unload_subject(&mut self) -> TrackerResult<()> {
        if self.session.is_none() {
            return Ok(());
        }
        self.checkpoint().await?;
        if let Some(session) = self.session.take() {
            info!("Stopped tracking {}", session.key);
        }
        Ok(())
    }

    /// Changes the bound for every subject from now on. Out of range values are clamped. The
    /// current subject's history is truncated right away; the log itself only changes at the next
    /// checkpoint.
    pub fn set_history_bound(&mut self, value: i64) -> HistoryBound {
        let bound = HistoryBound::new(value).unwrap_or_else(|e| {
            warn!("{e}, clamping");
            HistoryBound::clamped(value)
        });
        self.bound = bound;
        if let Some(session) = self.session.as_mut() {
            truncate_history(&mut session.record.history, bound);
        }
        debug!("History bound set to {}", bound.get());
        bound
    }

    /// Resets the current subject's totals and history, in the log as well as in memory. Time
    /// accrued since the last checkpoint stays pending.
    pub async fn clear_history(&mut self) -> TrackerResult<()> {
        let session = self.session.as_mut().ok_or(TrackerError::NotTracking)?;
        if session.key.is_persistent() {
            let mut log = self.store.load().await?;
            if let Some(stored) = log.get_mut(&session.key) {
                clear(stored);
                self.store.save(&log).await?;
            }
            session.adopt_stored_record = false;
        }
        clear(&mut session.record);
        info!("Cleared history of {}", session.key);
        Ok(())
    }

    pub fn is_tracking(&self) -> bool {
        self.session.is_some()
    }

    pub fn subject(&self) -> Option<&SubjectKey> {
        self.session.as_ref().map(|v| &v.key)
    }

    pub fn bound(&self) -> HistoryBound {
        self.bound
    }

    /// Number of checkpoints that failed since the last successful one.
    pub fn persist_failures(&self) -> u32 {
        self.persist_failures
    }

    /// Wall time since the current subject was loaded.
    pub fn current_open_time(&self) -> Duration {
        let now = self.clock.time();
        self.session
            .as_ref()
            .map_or_else(Duration::zero, |v| v.timer.elapsed_open(now))
    }

    /// Active time since the current subject was loaded.
    pub fn current_active_time(&self) -> Duration {
        self.session
            .as_ref()
            .map_or_else(Duration::zero, |v| v.timer.elapsed_active())
    }

    pub fn totals(&self) -> Totals {
        self.session
            .as_ref()
            .map(|v| Totals {
                open: v.record.total_open_time,
                active: v.record.total_active_time,
            })
            .unwrap_or_default()
    }

    /// Retained checkpoints of the current subject, oldest first.
    pub fn history_snapshot(&self) -> &[CheckpointEntry] {
        self.session
            .as_ref()
            .map(|v| v.record.history.as_slice())
            .unwrap_or_default()
    }
}

fn fold(
    key: &SubjectKey,
    mut record: SubjectRecord,
    deltas: SessionDeltas,
    entry: CheckpointEntry,
    bound: HistoryBound,
) -> TrackerResult<SubjectRecord> {
    let overflow = || TrackerError::TotalsOverflow(key.clone());
    record.total_open_time = record
        .total_open_time
        .checked_add(&deltas.open)
        .ok_or_else(overflow)?;
    record.total_active_time = record
        .total_active_time
        .checked_add(&deltas.active)
        .ok_or_else(overflow)?;
    Ok(append_checkpoint(record, entry, bound))
}

/// Rewrites the log with the session's record folded forward. Other subjects come from the log as
/// it is now; this subject comes from memory. The session is only touched once the save succeeded.
async fn persist_checkpoint<S: HistoryStore>(
    store: &S,
    session: &mut Session,
    deltas: SessionDeltas,
    entry: CheckpointEntry,
    bound: HistoryBound,
) -> TrackerResult<()> {
    let mut log = store.load().await?;
    let base = if session.adopt_stored_record {
        let mut stored = log.get(&session.key).cloned().unwrap_or_default();
        truncate_history(&mut stored.history, bound);
        stored
    } else {
        session.record.clone()
    };
    let record = fold(&session.key, base, deltas, entry, bound)?;
    log.insert(session.key.clone(), record.clone());
    store.save(&log).await?;

    session.record = record;
    session.adopt_stored_record = false;
    session.timer.mark_flushed(deltas);
    Ok(())
}
