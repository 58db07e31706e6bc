//! Desk lifecycle states.

/// Desk operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeskState {
    /// Desk is starting up.
    Starting,
    /// Desk is running and accepting requests.
    Running,
    /// Desk is shutting down, not accepting new requests.
    ShuttingDown,
    /// Desk is stopped.
    Stopped,
}

impl DeskState {
    /// Check if the desk is accepting new requests.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, DeskState::Running)
    }

    /// Check if the desk is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeskState::Stopped)
    }
}

impl std::fmt::Display for DeskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeskState::Starting => "starting",
            DeskState::Running => "running",
            DeskState::ShuttingDown => "shutting_down",
            DeskState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}
