use std::fmt;

use serde::{Deserialize, Serialize};

/// Which dependency strategy the supervisor settled on for this process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProvisioningState {
    /// Isolation disabled; the base interpreter is used as-is.
    Native,
    /// Running inside the managed virtual environment.
    IsolatedEnv,
    /// No environment could be created; packages go to a local directory on
    /// the module search path.
    LocalTargetDir,
}

impl ProvisioningState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProvisioningState::Native => "native",
            ProvisioningState::IsolatedEnv => "isolated-env",
            ProvisioningState::LocalTargetDir => "local-target-dir",
        }
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
