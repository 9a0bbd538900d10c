use std::fmt;

/// Lifecycle of one tutoring session.
///
/// ```text
/// Init -> Fetching -> Composing -> Starting -> Active -> Draining -> Reporting -> Closed
///                                     |          \                      ^
///                                     |           -> ShutdownRequested -/
///                                     \-> Draining (engine failed to start)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Init,
    Fetching,
    Composing,
    Starting,
    Active,
    Draining,
    ShutdownRequested,
    Reporting,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal session transition from {from} to {to}")]
pub struct TransitionError {
    pub from: SessionState,
    pub to: SessionState,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Init, Fetching)
                | (Fetching, Composing)
                | (Composing, Starting)
                | (Starting, Active)
                | (Starting, Draining)
                | (Active, Draining)
                | (Active, ShutdownRequested)
                | (Draining, Reporting)
                | (ShutdownRequested, Reporting)
                | (Reporting, Closed)
        )
    }

    pub fn transition_to(self, next: SessionState) -> Result<SessionState, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                from: self,
                to: next,
            })
        }
    }

    pub fn is_terminal(self) -> bool {
        self == SessionState::Closed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Init => "INIT",
            SessionState::Fetching => "FETCHING",
            SessionState::Composing => "COMPOSING",
            SessionState::Starting => "STARTING",
            SessionState::Active => "ACTIVE",
            SessionState::Draining => "DRAINING",
            SessionState::ShutdownRequested => "SHUTDOWN_REQUESTED",
            SessionState::Reporting => "REPORTING",
            SessionState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}
