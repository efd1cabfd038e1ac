//! Per-room countdown with pause and panic modes.
//!
//! The countdown state lives in a [`watch`] channel so `stop`, `toggle` and `set_panic` can be
//! called from any task while another task is suspended in [`CountdownTimer::wait`].

use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, time::sleep};
use tracing::debug;

use crate::services::gateway::Gateway;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct TimerState {
    remaining: u32,
    running: bool,
    paused: bool,
    panic: bool,
}

/// Cancellable countdown emitting one `game:timer` tick per period to its room.
pub struct CountdownTimer {
    room_id: String,
    gateway: Arc<dyn Gateway>,
    tick: Duration,
    panic_tick: Duration,
    state: watch::Sender<TimerState>,
}

impl CountdownTimer {
    /// Create an idle timer for `room_id`.
    pub fn new(
        room_id: impl Into<String>,
        gateway: Arc<dyn Gateway>,
        tick: Duration,
        panic_tick: Duration,
    ) -> Self {
        let (state, _rx) = watch::channel(TimerState::default());
        Self {
            room_id: room_id.into(),
            gateway,
            tick,
            panic_tick,
            state,
        }
    }

    /// Count down from `seconds`, resolving at zero or as soon as [`stop`](Self::stop) is called.
    ///
    /// Precondition: no other countdown of this timer is outstanding.
    pub async fn start(&self, seconds: u32) {
        self.arm(seconds);
        self.wait().await;
    }

    /// Reset the countdown to `seconds` and mark it running without waiting for it.
    ///
    /// Lets a caller arm the countdown while it still holds its own lock, so a concurrent
    /// [`stop`](Self::stop) issued right after the lock is released is not lost.
    pub fn arm(&self, seconds: u32) {
        self.state.send_replace(TimerState {
            remaining: seconds,
            running: true,
            paused: false,
            panic: false,
        });
        self.gateway.send_timer_update(&self.room_id, seconds);
    }

    /// Drive an armed countdown until it elapses or is stopped.
    pub async fn wait(&self) {
        let mut rx = self.state.subscribe();
        loop {
            let current = *rx.borrow_and_update();
            if !current.running || current.remaining == 0 {
                break;
            }
            if current.paused {
                // Nothing to do until someone resumes or stops the countdown.
                if rx.changed().await.is_err() {
                    break;
                }
                continue;
            }

            let period = if current.panic {
                self.panic_tick
            } else {
                self.tick
            };
            tokio::select! {
                _ = sleep(period) => self.tick_once(),
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.state.send_if_modified(|state| {
            let was_running = state.running;
            state.running = false;
            state.paused = false;
            state.panic = false;
            was_running
        });
    }

    fn tick_once(&self) {
        let mut remaining = None;
        self.state.send_if_modified(|state| {
            if !state.running || state.paused {
                return false;
            }
            state.remaining = state.remaining.saturating_sub(1);
            remaining = Some(state.remaining);
            true
        });
        if let Some(remaining) = remaining {
            self.gateway.send_timer_update(&self.room_id, remaining);
        }
    }

    /// Cancel the running countdown. Idempotent; a no-op once the countdown has ended.
    pub fn stop(&self) {
        let stopped = self.state.send_if_modified(|state| {
            if !state.running {
                return false;
            }
            state.running = false;
            true
        });
        if stopped {
            debug!(room_id = %self.room_id, "countdown stopped early");
        }
    }

    /// Pause or resume the running countdown. Returns the new paused flag, or `None` when no
    /// countdown is running.
    pub fn toggle(&self) -> Option<bool> {
        let mut paused = None;
        self.state.send_if_modified(|state| {
            if !state.running {
                return false;
            }
            state.paused = !state.paused;
            paused = Some(state.paused);
            true
        });
        paused
    }

    /// Switch the remaining countdown to the accelerated panic tick.
    pub fn set_panic(&self, panic: bool) {
        self.state.send_if_modified(|state| {
            if !state.running || state.panic == panic {
                return false;
            }
            state.panic = panic;
            true
        });
    }

    /// Seconds left on the countdown.
    pub fn remaining(&self) -> u32 {
        self.state.borrow().remaining
    }

    /// Whether a countdown is in progress.
    pub fn is_running(&self) -> bool {
        self.state.borrow().running
    }

    /// Whether the countdown is paused.
    pub fn is_paused(&self) -> bool {
        self.state.borrow().paused
    }

    /// Whether panic mode is enabled.
    pub fn is_panicking(&self) -> bool {
        self.state.borrow().panic
    }
}
