use std::fmt;

use crate::Observation;

/// Where the control loop is. `Updating` carries the observation that
/// triggered it so the fingerprint can be committed once the swap succeeds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoopPhase {
    Bootstrapping,
    Polling,
    Updating(Observation),
    Sleeping,
    ShuttingDown,
}

impl LoopPhase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopPhase::Bootstrapping => "bootstrapping",
            LoopPhase::Polling => "polling",
            LoopPhase::Updating(_) => "updating",
            LoopPhase::Sleeping => "sleeping",
            LoopPhase::ShuttingDown => "shutting-down",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopPhase::ShuttingDown)
    }
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
