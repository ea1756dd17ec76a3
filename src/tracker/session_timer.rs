use chrono::{DateTime, Duration, Utc};
use tracing::trace;

use crate::host_api::InputEvent;

use super::storage::entities::truncate_to_millis;

/// Open and active time accrued since the last checkpoint, ready to be folded into the totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionDeltas {
    pub open: Duration,
    pub active: Duration,
}

/// Accumulates time for the subject that is currently loaded.
///
/// Open time is plain wall time since [SessionTimer::reset]. Active time only grows on ticks that
/// carry activity while the subject is focused, by the gap since the previous activity. Losing
/// focus moves the activity anchor forward so idle time spent elsewhere never counts.
#[derive(Debug, Clone)]
pub struct SessionTimer {
    open_since: DateTime<Utc>,
    active_accum: Duration,
    last_activity_at: DateTime<Utc>,
    last_pointer: Option<(i32, i32)>,
    flushed_open: Duration,
    flushed_active: Duration,
}

impl SessionTimer {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            open_since: now,
            active_accum: Duration::zero(),
            last_activity_at: now,
            last_pointer: None,
            flushed_open: Duration::zero(),
            flushed_active: Duration::zero(),
        }
    }

    pub fn reset(&mut self, now: DateTime<Utc>) {
        *self = Self::new(now);
    }

    pub fn tick(&mut self, now: DateTime<Utc>, focused: bool, input: Option<InputEvent>) {
        if !focused {
            self.last_activity_at = now;
            return;
        }
        if !input.is_some_and(|v| self.is_activity(v)) {
            return;
        }
        // A clock stepping backwards must not eat into accumulated time.
        let gap = (now - self.last_activity_at).max(Duration::zero());
        self.active_accum += gap;
        self.last_activity_at = now;
        trace!("Activity at {now}, active time is now {}", self.active_accum);
    }

    /// Pointer events only count when the pointer actually moved. Presses always count.
    fn is_activity(&mut self, input: InputEvent) -> bool {
        match input {
            InputEvent::PointerMoved { x, y } => {
                if self.last_pointer == Some((x, y)) {
                    false
                } else {
                    self.last_pointer = Some((x, y));
                    true
                }
            }
            InputEvent::Pressed => true,
        }
    }

    pub fn elapsed_open(&self, now: DateTime<Utc>) -> Duration {
        (now - self.open_since).max(Duration::zero())
    }

    pub fn elapsed_active(&self) -> Duration {
        self.active_accum
    }

    /// Time accrued since the last [SessionTimer::mark_flushed], cut to whole milliseconds. The
    /// cut off remainder stays pending for the next checkpoint.
    pub fn pending_deltas(&self, now: DateTime<Utc>) -> SessionDeltas {
        SessionDeltas {
            open: truncate_to_millis(self.elapsed_open(now) - self.flushed_open)
                .max(Duration::zero()),
            active: truncate_to_millis(self.active_accum - self.flushed_active)
                .max(Duration::zero()),
        }
    }

    /// Records that `deltas` are now part of the durable totals.
    pub fn mark_flushed(&mut self, deltas: SessionDeltas) {
        self.flushed_open += deltas.open;
        self.flushed_active += deltas.active;
    }
}
