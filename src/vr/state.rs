use serde::{Deserialize, Serialize};
use std::fmt;

xr_enum! {
    /// Session lifecycle state as reported by the runtime.
    SessionState {
        Unknown = 0 => "XR_SESSION_STATE_UNKNOWN",
        Idle = 1 => "XR_SESSION_STATE_IDLE",
        Ready = 2 => "XR_SESSION_STATE_READY",
        Synchronized = 3 => "XR_SESSION_STATE_SYNCHRONIZED",
        Visible = 4 => "XR_SESSION_STATE_VISIBLE",
        Focused = 5 => "XR_SESSION_STATE_FOCUSED",
        Stopping = 6 => "XR_SESSION_STATE_STOPPING",
        LossPending = 7 => "XR_SESSION_STATE_LOSS_PENDING",
        Exiting = 8 => "XR_SESSION_STATE_EXITING",
    }
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Unknown
    }
}

impl SessionState {
    /// Transition table. Terminal states have no successors.
    pub fn successors(self) -> &'static [SessionState] {
        use SessionState::*;
        match self {
            Unknown => &[Idle],
            Idle => &[Ready, Exiting, LossPending],
            Ready => &[Synchronized, LossPending],
            Synchronized => &[Visible, Stopping, LossPending],
            Visible => &[Focused, Synchronized, LossPending],
            Focused => &[Visible, LossPending],
            Stopping => &[Idle, Exiting, LossPending],
            LossPending | Exiting => &[],
        }
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        self.successors().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::LossPending | SessionState::Exiting)
    }

    /// The runtime is presenting frames in these states.
    pub fn is_rendering_eligible(self) -> bool {
        matches!(
            self,
            SessionState::Synchronized | SessionState::Visible | SessionState::Focused
        )
    }

    pub fn is_visible(self) -> bool {
        matches!(self, SessionState::Visible | SessionState::Focused)
    }

    /// Input is only authoritative while the session holds focus.
    pub fn is_input_authoritative(self) -> bool {
        self == SessionState::Focused
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
    /// False when the runtime reported a transition outside the table.
    pub expected: bool,
}

/// Records runtime-reported session states and yields each change once.
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    current: SessionState,
    transitions: u64,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> SessionState {
        self.current
    }

    pub fn transition_count(&self) -> u64 {
        self.transitions
    }

    /// Applies a state reported by the runtime.
    ///
    /// Returns `None` when nothing changed: a repeat of the current state, a
    /// report after a terminal state, or an attempt to re-enter `Unknown`.
    pub fn apply(&mut self, next: SessionState) -> Option<Transition> {
        if next == self.current {
            log::debug!("[xr-session] duplicate state report {next}");
            return None;
        }
        if self.current.is_terminal() {
            log::debug!(
                "[xr-session] ignoring {next} after terminal state {}",
                self.current
            );
            return None;
        }
        if next == SessionState::Unknown {
            log::warn!("[xr-session] runtime reported {next}; keeping {}", self.current);
            return None;
        }

        let expected = self.current.can_transition_to(next);
        if !expected {
            log::warn!(
                "[xr-session] unexpected transition {} -> {next}",
                self.current
            );
        }

        let transition = Transition {
            from: self.current,
            to: next,
            expected,
        };
        self.current = next;
        self.transitions += 1;
        Some(transition)
    }

    /// Starts over for a freshly created session.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
