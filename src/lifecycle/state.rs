//! Orchestrator state machine.
//!
//! ```text
//! Uninitialized → Starting → Running → ShuttingDown → Stopped
//! ```
//! Strictly linear: no restart, no pause.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

impl LifecycleState {
    /// The only state reachable from `self`.
    pub fn next(self) -> Option<Self> {
        match self {
            LifecycleState::Uninitialized => Some(LifecycleState::Starting),
            LifecycleState::Starting => Some(LifecycleState::Running),
            LifecycleState::Running => Some(LifecycleState::ShuttingDown),
            LifecycleState::ShuttingDown => Some(LifecycleState::Stopped),
            LifecycleState::Stopped => None,
        }
    }

    pub fn can_transition_to(self, to: Self) -> bool {
        self.next() == Some(to)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::ShuttingDown => "shutting_down",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_are_linear() {
        use LifecycleState::*;
        let order = [Uninitialized, Starting, Running, ShuttingDown, Stopped];

        for (i, from) in order.iter().enumerate() {
            for (j, to) in order.iter().enumerate() {
                assert_eq!(from.can_transition_to(*to), j == i + 1, "{from} -> {to}");
            }
        }
        assert_eq!(Stopped.next(), None);
    }
}
