use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use crate::host_api::ActivityOracle;

use super::{
    controller::TrackerController,
    error::TrackerError,
    storage::{HistoryStore, SubjectKey},
};

/// Subject lifecycle as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Load(SubjectKey),
    Checkpoint,
    Unload,
    SetBound(i64),
    Clear,
}

enum Step {
    Tick,
    Event(LifecycleEvent),
    Stop,
}

/// Event loop around a [TrackerController]. Polls the oracle every `tick_interval` and applies
/// lifecycle events as they arrive. On shutdown the subject is unloaded so its final checkpoint is
/// written before [TrackingModule::run] returns.
pub struct TrackingModule<S: HistoryStore> {
    controller: TrackerController<S>,
    oracle: Box<dyn ActivityOracle>,
    events: mpsc::Receiver<LifecycleEvent>,
    shutdown: CancellationToken,
    tick_interval: Duration,
    failures: Option<mpsc::UnboundedSender<TrackerError>>,
}

impl<S: HistoryStore> TrackingModule<S> {
    pub fn new(
        controller: TrackerController<S>,
        oracle: Box<dyn ActivityOracle>,
        events: mpsc::Receiver<LifecycleEvent>,
        shutdown: CancellationToken,
        tick_interval: Duration,
    ) -> Self {
        Self {
            controller,
            oracle,
            events,
            shutdown,
            tick_interval,
            failures: None,
        }
    }

    /// Failed lifecycle events are forwarded here in addition to being logged.
    pub fn with_failure_reports(mut self, failures: mpsc::UnboundedSender<TrackerError>) -> Self {
        self.failures = Some(failures);
        self
    }

    fn poll_oracle(&mut self) {
        let now = self.controller.clock().time();
        let focused = match self.oracle.is_focused() {
            Ok(v) => v,
            Err(e) => {
                error!("Couldn't query focus, skipping tick {e:?}");
                return;
            }
        };
        let input = self.oracle.drain_input().unwrap_or_else(|e| {
            error!("Couldn't read input {e:?}");
            vec![]
        });

        if input.is_empty() {
            self.controller.tick(now, focused, None);
        }
        for event in input {
            self.controller.tick(now, focused, Some(event));
        }
    }

    async fn handle(&mut self, event: LifecycleEvent) {
        let span = info_span!("Handling lifecycle event", ?event);
        let result = async {
            match event {
                LifecycleEvent::Load(key) => self.controller.load_subject(key).await,
                LifecycleEvent::Checkpoint => self.controller.checkpoint().await,
                LifecycleEvent::Unload => self.controller.unload_subject().await,
                LifecycleEvent::SetBound(value) => {
                    self.controller.set_history_bound(value);
                    Ok(())
                }
                LifecycleEvent::Clear => self.controller.clear_history().await,
            }
        }
        .instrument(span)
        .await;

        if let Err(e) = result {
            error!("Lifecycle event failed {e}");
            if let Some(failures) = &self.failures {
                let _ = failures.send(e);
            }
        }
    }

    /// Runs until cancelled or until the event channel closes, then hands the controller back.
    pub async fn run(mut self) -> Result<TrackerController<S>> {
        let mut next_tick = self.controller.clock().instant() + self.tick_interval;
        loop {
            let step = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => Step::Stop,
                event = self.events.recv() => event.map_or(Step::Stop, Step::Event),
                _ = self.controller.clock().sleep_until(next_tick) => Step::Tick,
            };

            match step {
                Step::Tick => {
                    next_tick += self.tick_interval;
                    self.poll_oracle();
                }
                Step::Event(event) => {
                    // Input that arrived before the event belongs to the interval it closes.
                    self.poll_oracle();
                    debug!("Received {event:?}");
                    self.handle(event).await;
                    if let Err(e) = self.oracle.lifecycle_applied() {
                        error!("Couldn't release input queued after the event {e:?}");
                    }
                }
                Step::Stop => break,
            }
        }

        info!("Tracking loop stopping");
        self.poll_oracle();
        self.controller.unload_subject().await.inspect_err(|e| {
            error!("Final checkpoint failed, time since the last save is lost {e}")
        })?;
        Ok(self.controller)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::Result;
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
    use tempfile::tempdir;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use crate::{
        host_api::{HostFeed, InputEvent, MockActivityOracle},
        tracker::{
            controller::TrackerController,
            error::TrackerError,
            storage::{HistoryBound, HistoryStore, JsonHistoryStore, SubjectKey},
        },
        utils::{clock::ManualClock, logging::TEST_LOGGING},
    };

    use super::{LifecycleEvent, TrackingModule};

    const TEST_START_DATE: NaiveDateTime =
        NaiveDateTime::new(NaiveDate::from_ymd_opt(2018, 7, 4).unwrap(), NaiveTime::MIN);

    #[tokio::test]
    async fn test_loop_checkpoints_and_unloads_on_close() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let path = dir.path().join("log.json");
        let clock = ManualClock::starting_at(Utc.from_utc_datetime(&TEST_START_DATE));

        let mut oracle = MockActivityOracle::new();
        oracle.expect_is_focused().returning(|| Ok(true));
        oracle.expect_lifecycle_applied().returning(|| Ok(()));
        let mut presses = 0;
        oracle.expect_drain_input().returning(move || {
            presses += 1;
            Ok(if presses % 2 == 0 {
                vec![InputEvent::Pressed]
            } else {
                vec![]
            })
        });

        let controller = TrackerController::new(
            JsonHistoryStore::new(path.clone()),
            Box::new(clock.clone()),
            HistoryBound::default(),
        );
        let (sender, receiver) = mpsc::channel(10);
        let module = TrackingModule::new(
            controller,
            Box::new(oracle),
            receiver,
            CancellationToken::new(),
            Duration::from_millis(20),
        );

        let key = SubjectKey::from_path("/work/scene.blend");
        let host = {
            let key = key.clone();
            let clock = clock.clone();
            async move {
                sender.send(LifecycleEvent::Load(key)).await?;
                tokio::time::sleep(Duration::from_millis(200)).await;
                clock.advance(chrono::Duration::seconds(10));
                sender.send(LifecycleEvent::Checkpoint).await?;
                tokio::time::sleep(Duration::from_millis(200)).await;
                clock.advance(chrono::Duration::seconds(5));
                drop(sender);
                anyhow::Ok(())
            }
        };

        let (host_result, run_result) = tokio::join!(host, module.run());
        host_result?;
        let controller = run_result?;

        assert!(!controller.is_tracking());
        let stored = JsonHistoryStore::new(path).load().await?;
        let record = &stored[&key];
        assert_eq!(record.total_open_time, chrono::Duration::seconds(15));
        assert_eq!(record.history.len(), 2);
        assert_eq!(record.history[0].open_delta, chrono::Duration::seconds(10));
        assert!(record.total_active_time <= record.total_open_time);
        Ok(())
    }

    #[tokio::test]
    async fn test_failures_are_reported() -> Result<()> {
        *TEST_LOGGING;
        let mut oracle = MockActivityOracle::new();
        oracle.expect_is_focused().returning(|| Ok(false));
        oracle.expect_drain_input().returning(|| Ok(vec![]));
        oracle.expect_lifecycle_applied().returning(|| Ok(()));

        let dir = tempdir()?;
        let controller = TrackerController::new(
            JsonHistoryStore::new(dir.path().join("log.json")),
            Box::new(ManualClock::starting_at(Utc.from_utc_datetime(
                &TEST_START_DATE,
            ))),
            HistoryBound::default(),
        );
        let (sender, receiver) = mpsc::channel(10);
        let (failure_sender, mut failures) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let module = TrackingModule::new(
            controller,
            Box::new(oracle),
            receiver,
            shutdown.clone(),
            Duration::from_millis(20),
        )
        .with_failure_reports(failure_sender);

        sender.send(LifecycleEvent::Checkpoint).await?;
        sender.send(LifecycleEvent::SetBound(1)).await?;
        let (_, run_result) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                shutdown.cancel();
            },
            module.run()
        );

        let controller = run_result?;
        assert_eq!(controller.bound().get(), HistoryBound::MIN);
        assert!(matches!(
            failures.recv().await,
            Some(TrackerError::NotTracking)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_input_sent_after_load_reaches_the_new_subject() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let path = dir.path().join("log.json");
        let clock = ManualClock::starting_at(Utc.from_utc_datetime(&TEST_START_DATE));
        let (feed, handle) = HostFeed::new();

        let controller = TrackerController::new(
            JsonHistoryStore::new(path.clone()),
            Box::new(clock.clone()),
            HistoryBound::default(),
        );
        let (sender, receiver) = mpsc::channel(10);
        let module = TrackingModule::new(
            controller,
            Box::new(feed),
            receiver,
            CancellationToken::new(),
            Duration::from_millis(20),
        );

        let key = SubjectKey::from_path("/work/scene.blend");
        let host = {
            let key = key.clone();
            let clock = clock.clone();
            async move {
                handle.mark_lifecycle()?;
                sender.send(LifecycleEvent::Load(key)).await?;
                // anchors the pointer for the new subject
                handle.push(InputEvent::PointerMoved { x: 1, y: 1 })?;
                tokio::time::sleep(Duration::from_millis(200)).await;
                clock.advance(chrono::Duration::seconds(10));
                handle.push(InputEvent::PointerMoved { x: 1, y: 1 })?;
                handle.mark_lifecycle()?;
                sender.send(LifecycleEvent::Checkpoint).await?;
                drop(sender);
                anyhow::Ok(())
            }
        };

        let (host_result, run_result) = tokio::join!(host, module.run());
        host_result?;
        run_result?;

        let stored = JsonHistoryStore::new(path).load().await?;
        let record = &stored[&key];
        assert_eq!(record.total_open_time, chrono::Duration::seconds(10));
        assert_eq!(record.total_active_time, chrono::Duration::zero());
        Ok(())
    }
}
