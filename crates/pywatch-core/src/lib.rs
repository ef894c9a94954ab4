#![deny(clippy::all)]

mod core;

use anyhow::Result;
use pywatch_domain::Observation;

pub use crate::core::config::{
    Config, ConfigOverrides, CoreDependency, Invocation, Layout, RuntimeConfig, SourceConfig,
    TimingConfig,
};
pub use crate::core::context::WatchContext;
pub use crate::core::control::{ControlLoop, LoopState};
pub use crate::core::detect::{parse_page, ChangeDetector};
pub use crate::core::effects::{
    ChildExit, ChildProcess, Effects, HttpClient, LaunchSpec, ProcessControl, PythonRuntime,
    RelaunchPlan, SystemEffects,
};
pub use crate::core::errors::WatchError;
pub use crate::core::fetch::PayloadFetcher;
pub use crate::core::install::{
    ActiveInterpreter, CoreInstall, DependencyInstaller, InstallStrategy, LocalTarget,
};
pub use crate::core::net::HttpResponse;
pub use crate::core::process::RunOutput;
pub use crate::core::provision::{
    EnvironmentProvisioner, EnvironmentStrategy, Provisioned, StdlibVenv, UserVirtualenv,
};
pub use crate::core::python::ActiveRuntime;
pub use crate::core::shutdown::{listen_for_signals, Shutdown};
pub use crate::core::supervise::{ChildHandle, ProcessSupervisor, ReplaceFailure, Termination};

/// Run the supervisor against the real system until `shutdown` is requested.
///
/// # Errors
/// Returns an error only when bootstrapping cannot settle on any interpreter.
pub fn watch(config: &Config, shutdown: Shutdown) -> Result<()> {
    let effects = SystemEffects::new();
    let ctx = WatchContext::new(&effects, config);
    tracing::info!(
        url = %config.source().page_url,
        workdir = %config.layout().root().display(),
        interval_secs = config.timing().poll_interval.as_secs(),
        "starting supervisor"
    );
    ControlLoop::new(ctx, shutdown).run()
}

/// Poll the page once without provisioning, installing or launching.
///
/// # Errors
/// Returns [`WatchError::Network`] when the page cannot be fetched.
pub fn probe(config: &Config) -> Result<Observation> {
    let effects = SystemEffects::new();
    let ctx = WatchContext::new(&effects, config);
    ChangeDetector::new().poll(&ctx)
}
