//! Internal deployment status machine

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Internal status of one build or deploy phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeploymentStatus {
    /// Recorded locally, not yet accepted by the provider
    Pending,

    /// Accepted by the provider, not yet executing
    Placed,

    /// Executing on the provider
    Running,

    /// Finished successfully
    Ready,

    /// Finished with a failure
    Error,

    /// Cancelled before finishing
    Aborted,
}

impl DeploymentStatus {
    pub const ALL: [DeploymentStatus; 6] = [
        DeploymentStatus::Pending,
        DeploymentStatus::Placed,
        DeploymentStatus::Running,
        DeploymentStatus::Ready,
        DeploymentStatus::Error,
        DeploymentStatus::Aborted,
    ];

    /// Position in the progression; terminal branches share the last rank
    pub fn rank(&self) -> u8 {
        match self {
            DeploymentStatus::Pending => 0,
            DeploymentStatus::Placed => 1,
            DeploymentStatus::Running => 2,
            DeploymentStatus::Ready | DeploymentStatus::Error | DeploymentStatus::Aborted => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Ready | DeploymentStatus::Error | DeploymentStatus::Aborted
        )
    }

    pub fn is_success(&self) -> bool {
        *self == DeploymentStatus::Ready
    }

    /// Whether moving from `self` to `next` advances the machine
    pub fn can_transition_to(&self, next: DeploymentStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "PENDING",
            DeploymentStatus::Placed => "PLACED",
            DeploymentStatus::Running => "RUNNING",
            DeploymentStatus::Ready => "READY",
            DeploymentStatus::Error => "ERROR",
            DeploymentStatus::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(DeploymentStatus::Pending),
            "PLACED" => Ok(DeploymentStatus::Placed),
            "RUNNING" => Ok(DeploymentStatus::Running),
            "READY" => Ok(DeploymentStatus::Ready),
            "ERROR" => Ok(DeploymentStatus::Error),
            "ABORTED" => Ok(DeploymentStatus::Aborted),
            _ => Err(format!("Invalid deployment status: {}", s)),
        }
    }
}

/// Which provider operation an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Build,
    Deploy,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Build => "build",
            Phase::Deploy => "deploy",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of weighing a new status against the current one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The new status moves the stream forward
    Advance,

    /// Same status as already recorded
    Duplicate,

    /// Would move backwards or leave a terminal state
    Regress,
}

/// Decide what a new status means for a stream whose latest status is `current`
pub fn evaluate(current: Option<DeploymentStatus>, next: DeploymentStatus) -> Transition {
    match current {
        None => Transition::Advance,
        Some(current) if current == next => Transition::Duplicate,
        Some(current) if current.can_transition_to(next) => Transition::Advance,
        Some(_) => Transition::Regress,
    }
}
