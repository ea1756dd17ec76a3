//! Boundary between the tracker and whatever hosts the document. The host knows whether its
//! window is focused and sees raw input; [ActivityOracle] is the contract it implements.
//! [HostFeed] is the implementation used when the host pushes that information to us, for
//! example over the line protocol in [line_protocol].

pub mod line_protocol;

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Result};

/// Raw input observed by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// Pointer position reported by the host. Reports at an unchanged position are not activity.
    PointerMoved { x: i32, y: i32 },
    /// Any key or button press.
    Pressed,
}

/// Polled once per tick by the tracking loop.
#[cfg_attr(test, mockall::automock)]
pub trait ActivityOracle: Send {
    /// Whether the subject's window currently has focus.
    fn is_focused(&mut self) -> Result<bool>;

    /// Input received since the previous call, oldest first.
    fn drain_input(&mut self) -> Result<Vec<InputEvent>>;

    /// Called once a lifecycle event has been applied. Oracles that queue input in order with
    /// lifecycle events hold back input that came after the event until then.
    fn lifecycle_applied(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
enum Queued {
    Input(InputEvent),
    /// Position of a lifecycle event in the host's stream.
    Mark,
}

#[derive(Debug)]
struct FeedState {
    focused: bool,
    pending: VecDeque<Queued>,
}

/// Oracle fed from the outside through a [FeedHandle].
pub struct HostFeed {
    state: Arc<Mutex<FeedState>>,
}

/// Producer side of a [HostFeed].
#[derive(Clone)]
pub struct FeedHandle {
    state: Arc<Mutex<FeedState>>,
}

impl HostFeed {
    /// Hosts that never report focus are assumed to be focused.
    pub fn new() -> (HostFeed, FeedHandle) {
        let state = Arc::new(Mutex::new(FeedState {
            focused: true,
            pending: VecDeque::new(),
        }));
        (
            HostFeed {
                state: state.clone(),
            },
            FeedHandle { state },
        )
    }
}

impl ActivityOracle for HostFeed {
    fn is_focused(&mut self) -> Result<bool> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow!("Host feed state is poisoned"))?;
        Ok(state.focused)
    }

    fn drain_input(&mut self) -> Result<Vec<InputEvent>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("Host feed state is poisoned"))?;
        let mut input = Vec::new();
        while let Some(Queued::Input(event)) = state.pending.front() {
            input.push(*event);
            state.pending.pop_front();
        }
        Ok(input)
    }

    fn lifecycle_applied(&mut self) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("Host feed state is poisoned"))?;
        if let Some(Queued::Mark) = state.pending.front() {
            state.pending.pop_front();
        }
        Ok(())
    }
}

impl FeedHandle {
    pub fn set_focused(&self, focused: bool) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("Host feed state is poisoned"))?;
        state.focused = focused;
        Ok(())
    }

    pub fn push(&self, event: InputEvent) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("Host feed state is poisoned"))?;
        state.pending.push_back(Queued::Input(event));
        Ok(())
    }

    /// Records that a lifecycle event was sent. Input pushed afterwards is not drained until the
    /// tracking loop reports the event as applied.
    pub fn mark_lifecycle(&self) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("Host feed state is poisoned"))?;
        state.pending.push_back(Queued::Mark);
        Ok(())
    }
}
