// src/status/phase.rs

//! Coarse pipeline phases and the transition rules between them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Stage label on the status state machine.
///
/// The declaration order is the forward order of a build:
/// `Initializing → ContainerSetup → DependencyInstall → Building → Starting →
/// Running → Completed`. `Error` can be entered from any non-terminal phase.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Initializing,
    ContainerSetup,
    DependencyInstall,
    #[default]
    Building,
    Starting,
    Running,
    Completed,
    Error,
}

/// How a requested phase change relates to the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseTransition {
    /// Same phase, or a move further along the build.
    Forward,
    /// A move to an earlier phase; the current phase is kept.
    Backward,
    /// The current phase is terminal; nothing more is accepted.
    AfterTerminal,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Error)
    }

    /// Classify a requested move from `self` to `next`.
    pub fn transition_to(self, next: Phase) -> PhaseTransition {
        if self.is_terminal() {
            PhaseTransition::AfterTerminal
        } else if next == Phase::Error || next >= self {
            PhaseTransition::Forward
        } else {
            PhaseTransition::Backward
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Initializing => "initializing",
            Phase::ContainerSetup => "container-setup",
            Phase::DependencyInstall => "dependency-install",
            Phase::Building => "building",
            Phase::Starting => "starting",
            Phase::Running => "running",
            Phase::Completed => "completed",
            Phase::Error => "error",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let phase = match s.trim().to_lowercase().as_str() {
            "initializing" => Phase::Initializing,
            "container-setup" => Phase::ContainerSetup,
            "dependency-install" => Phase::DependencyInstall,
            "building" => Phase::Building,
            "starting" => Phase::Starting,
            "running" => Phase::Running,
            "completed" => Phase::Completed,
            "error" => Phase::Error,
            other => return Err(format!("unknown phase: {other}")),
        };
        Ok(phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_and_same_phase_moves_are_accepted() {
        assert_eq!(
            Phase::ContainerSetup.transition_to(Phase::Building),
            PhaseTransition::Forward
        );
        assert_eq!(
            Phase::Building.transition_to(Phase::Building),
            PhaseTransition::Forward
        );
    }

    #[test]
    fn backward_moves_are_held() {
        assert_eq!(
            Phase::Starting.transition_to(Phase::ContainerSetup),
            PhaseTransition::Backward
        );
    }

    #[test]
    fn error_is_reachable_from_any_non_terminal_phase() {
        for phase in [
            Phase::Initializing,
            Phase::ContainerSetup,
            Phase::DependencyInstall,
            Phase::Building,
            Phase::Starting,
            Phase::Running,
        ] {
            assert_eq!(phase.transition_to(Phase::Error), PhaseTransition::Forward);
        }
    }

    #[test]
    fn terminal_phases_reject_everything() {
        assert_eq!(
            Phase::Completed.transition_to(Phase::Error),
            PhaseTransition::AfterTerminal
        );
        assert_eq!(
            Phase::Error.transition_to(Phase::Completed),
            PhaseTransition::AfterTerminal
        );
    }

    #[test]
    fn round_trips_through_display() {
        assert_eq!("dependency-install".parse::<Phase>(), Ok(Phase::DependencyInstall));
        assert_eq!(Phase::ContainerSetup.to_string(), "container-setup");
    }
}
