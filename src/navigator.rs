//! Debounced sample navigation.
//!
//! The first request of a burst moves immediately. Further requests inside
//! the quiet window accumulate an offset and rearm the deadline; once the
//! window elapses, one move by the accumulated offset fires.
//!
//! Time is passed in by the caller, so the state machine never reads the
//! clock itself.

use std::time::Duration;
use web_time::Instant;

/// Receiver of coalesced navigation moves.
pub trait NavigationTarget {
    /// Called before every move (exits any open editing session).
    fn on_start(&mut self);

    /// Move by `offset` samples.
    fn go(&mut self, offset: usize);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NavState {
    Idle,
    Pending { deadline: Instant, offset: usize },
}

/// Coalesces bursts of navigation requests.
#[derive(Debug)]
pub struct DebouncedNavigator {
    /// Quiet window after the last request
    window: Duration,
    state: NavState,
}

impl DebouncedNavigator {
    /// Default quiet window.
    pub const DEFAULT_WINDOW: Duration = Duration::from_millis(150);

    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: NavState::Idle,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Request a move by one sample at `now`.
    ///
    /// `illegal` means the move cannot happen (e.g. no next sample): any
    /// pending move is cancelled and the accumulator reset.
    pub fn navigate(&mut self, now: Instant, illegal: bool, target: &mut dyn NavigationTarget) {
        if illegal {
            if let NavState::Pending { offset, .. } = self.state {
                log::debug!("Navigation blocked, dropping pending offset {}", offset);
            }
            self.state = NavState::Idle;
            return;
        }

        self.state = match self.state {
            NavState::Idle => {
                log::debug!("🧭 Navigating by 1");
                target.on_start();
                target.go(1);
                NavState::Pending {
                    deadline: now + self.window,
                    offset: 0,
                }
            }
            NavState::Pending { offset, .. } => {
                log::trace!("Navigation coalesced (offset {})", offset + 1);
                NavState::Pending {
                    deadline: now + self.window,
                    offset: offset + 1,
                }
            }
        };
    }

    /// Fire the accumulated move if the window elapsed by `now`. Returns
    /// whether a move fired.
    pub fn poll(&mut self, now: Instant, target: &mut dyn NavigationTarget) -> bool {
        let NavState::Pending { deadline, offset } = self.state else {
            return false;
        };
        if now < deadline {
            return false;
        }

        self.state = NavState::Idle;
        if offset == 0 {
            return false;
        }
        log::debug!("🧭 Navigating by {}", offset);
        target.on_start();
        target.go(offset);
        true
    }

    /// Cancel any pending move without firing.
    pub fn cleanup(&mut self) {
        if self.state != NavState::Idle {
            log::debug!("Pending navigation cancelled");
        }
        self.state = NavState::Idle;
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, NavState::Pending { .. })
    }

    /// Moves accumulated since the immediate first move of the burst.
    pub fn pending_offset(&self) -> usize {
        match self.state {
            NavState::Pending { offset, .. } => offset,
            NavState::Idle => 0,
        }
    }

    /// Deadline of the pending move, if any.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            NavState::Pending { deadline, .. } => Some(deadline),
            NavState::Idle => None,
        }
    }
}

impl Default for DebouncedNavigator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WINDOW)
    }
}
