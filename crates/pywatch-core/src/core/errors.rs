/// Failures the control loop knows how to absorb.
///
/// None of these end the loop; they are logged at the loop boundary and the
/// loop falls through to its sleep.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("network error for {url}: {reason}")]
    Network { url: String, reason: String },
    #[error("could not create an isolated environment: {0}")]
    Provisioning(String),
    #[error("failed to install {what}: {reason}")]
    Install { what: String, reason: String },
    #[error("process error: {0}")]
    Process(String),
}

impl WatchError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Provisioning(_) => "provisioning",
            Self::Install { .. } => "install",
            Self::Process(_) => "process",
        }
    }

    pub(crate) fn network(url: impl ToString, reason: impl Into<String>) -> Self {
        Self::Network {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

/// Short label for an error pulled out of an `anyhow` chain, used as a log
/// field.
pub(crate) fn error_kind(err: &anyhow::Error) -> &'static str {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<WatchError>())
        .map_or("internal", WatchError::kind)
}
