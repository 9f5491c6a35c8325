//! Readiness model driving the spawn event loop.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Created,
    Running,
    /// Running and confirmed healthy.
    Ready,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
}

impl State {
    /// Map a runtime status string plus health signal onto a state.
    ///
    /// Unrecognized statuses are treated as dead.
    pub fn from_runtime_status(status: &str, healthy: bool) -> Self {
        match status {
            "running" if healthy => State::Ready,
            "created" => State::Created,
            "running" => State::Running,
            "paused" => State::Paused,
            "restarting" => State::Restarting,
            "removing" => State::Removing,
            "exited" => State::Exited,
            _ => State::Dead,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Created => "created",
            State::Running => "running",
            State::Ready => "ready",
            State::Paused => "paused",
            State::Restarting => "restarting",
            State::Removing => "removing",
            State::Exited => "exited",
            State::Dead => "dead",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, State::Ready)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, State::Created | State::Restarting | State::Running)
    }

    /// Candidate for "never going to be ready" once it is no longer pending.
    pub fn is_gone(&self) -> bool {
        !matches!(self, State::Ready | State::Created)
    }

    /// No further transitions are expected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Exited | State::Dead)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observation on an instance's status stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Status(State),
    Error(String),
}

impl Event {
    pub fn is_pending(&self) -> bool {
        matches!(self, Event::Status(state) if state.is_pending())
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Event::Status(state) if state.is_ready())
    }

    pub fn is_gone(&self) -> bool {
        matches!(self, Event::Status(state) if state.is_gone())
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Event::Error(message) => Some(message),
            Event::Status(_) => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Status(state) => write!(f, "status={state}"),
            Event::Error(message) => write!(f, "error={message}"),
        }
    }
}
