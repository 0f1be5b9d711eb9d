//! Run lifecycle states and the transition table.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// Built, spec not yet confirmed.
    Created,
    /// Spec merged, waiting for dispatch.
    Ready,
    /// Handed to a framework.
    Running,
    /// Substrate reported success.
    Completed,
    /// Build, dispatch or substrate failure.
    Error,
    /// Cancelled.
    Stopped,
}

impl RunState {
    /// Terminal states accept no further events.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Ready => "READY",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Error => "ERROR",
            Self::Stopped => "STOPPED",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CREATED" => Ok(Self::Created),
            "READY" => Ok(Self::Ready),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "ERROR" => Ok(Self::Error),
            "STOPPED" => Ok(Self::Stopped),
            other => Err(CoreError::InvalidSpec(format!("unknown run state '{}'", other))),
        }
    }
}

/// Event driving a run through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunEvent {
    BuildOk,
    BuildFailed,
    Dispatched,
    SubstrateDone,
    SubstrateFailed,
    StopRequested,
}

impl RunEvent {
    pub const ALL: [RunEvent; 6] = [
        RunEvent::BuildOk,
        RunEvent::BuildFailed,
        RunEvent::Dispatched,
        RunEvent::SubstrateDone,
        RunEvent::SubstrateFailed,
        RunEvent::StopRequested,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BuildOk => "BUILD_OK",
            Self::BuildFailed => "BUILD_FAILED",
            Self::Dispatched => "DISPATCHED",
            Self::SubstrateDone => "SUBSTRATE_DONE",
            Self::SubstrateFailed => "SUBSTRATE_FAILED",
            Self::StopRequested => "STOP_REQUESTED",
        }
    }
}

impl std::fmt::Display for RunEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve the next state for `event` in state `from`.
pub fn transition(from: RunState, event: RunEvent) -> CoreResult<RunState> {
    use RunEvent::*;
    use RunState::*;

    match (from, event) {
        (Created, BuildOk) => Ok(Ready),
        (Created | Ready, BuildFailed) => Ok(Error),
        (Ready, Dispatched) => Ok(Running),
        (Running, SubstrateDone) => Ok(Completed),
        (Running, SubstrateFailed) => Ok(Error),
        (Running, StopRequested) => Ok(Stopped),
        _ => Err(CoreError::IllegalTransition { from, event }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_accepts_only_build_events() {
        for event in RunEvent::ALL {
            let result = transition(RunState::Created, event);
            match event {
                RunEvent::BuildOk => assert_eq!(result.unwrap(), RunState::Ready),
                RunEvent::BuildFailed => assert_eq!(result.unwrap(), RunState::Error),
                _ => assert!(matches!(result, Err(CoreError::IllegalTransition { .. }))),
            }
        }
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        for state in [RunState::Completed, RunState::Error, RunState::Stopped] {
            assert!(state.is_terminal());
            for event in RunEvent::ALL {
                assert!(matches!(
                    transition(state, event),
                    Err(CoreError::IllegalTransition { .. })
                ));
            }
        }
    }

    #[test]
    fn test_happy_path() {
        let mut state = RunState::Created;
        for event in [RunEvent::BuildOk, RunEvent::Dispatched, RunEvent::SubstrateDone] {
            state = transition(state, event).unwrap();
        }
        assert_eq!(state, RunState::Completed);
    }

    #[test]
    fn test_running_edges() {
        assert_eq!(
            transition(RunState::Running, RunEvent::SubstrateFailed).unwrap(),
            RunState::Error
        );
        assert_eq!(
            transition(RunState::Running, RunEvent::StopRequested).unwrap(),
            RunState::Stopped
        );
        assert!(transition(RunState::Ready, RunEvent::StopRequested).is_err());
        assert_eq!(
            transition(RunState::Ready, RunEvent::BuildFailed).unwrap(),
            RunState::Error
        );
    }

    #[test]
    fn test_state_serde() {
        assert_eq!(serde_json::to_string(&RunState::Running).unwrap(), "\"RUNNING\"");
        assert_eq!("stopped".parse::<RunState>().unwrap(), RunState::Stopped);
        assert_eq!(
            serde_json::to_string(&RunEvent::SubstrateDone).unwrap(),
            "\"SUBSTRATE_DONE\""
        );
    }
}
