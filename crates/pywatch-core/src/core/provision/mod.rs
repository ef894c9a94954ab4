//! Decide which interpreter the supervisor works through.
//!
//! The provisioner prefers a private virtual environment under the working
//! directory. Creating one is attempted with each [`EnvironmentStrategy`] in
//! turn; once an environment exists the supervisor re-executes itself with
//! that environment activated, and the new process image short-circuits on
//! the "already inside" check. When no environment can be had, packages go to
//! a plain directory placed on `PYTHONPATH` instead.

mod strategies;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pywatch_domain::ProvisioningState;
use tracing::{info, warn};

use super::config::{RuntimeConfig, RELAUNCH_MARKER};
use super::context::WatchContext;
use super::effects::RelaunchPlan;
use super::errors::WatchError;
use super::python::{env_bin_dir, env_interpreter, same_location, ActiveRuntime};

pub use strategies::{default_strategies, EnvironmentStrategy, StdlibVenv, UserVirtualenv};

/// Outcome of [`EnvironmentProvisioner::provision`].
#[derive(Debug)]
pub enum Provisioned {
    Ready(ActiveRuntime),
    /// The caller must replace the current process with this plan.
    Relaunch(RelaunchPlan),
}

pub struct EnvironmentProvisioner {
    strategies: Vec<Box<dyn EnvironmentStrategy>>,
    ready: Option<ActiveRuntime>,
}

impl Default for EnvironmentProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvironmentProvisioner {
    #[must_use]
    pub fn new() -> Self {
        Self::with_strategies(default_strategies())
    }

    #[must_use]
    pub fn with_strategies(strategies: Vec<Box<dyn EnvironmentStrategy>>) -> Self {
        Self {
            strategies,
            ready: None,
        }
    }

    /// Settle on a runtime, or ask the caller to relaunch inside the
    /// environment. Once a runtime is ready, later calls return it unchanged
    /// without touching the filesystem or spawning anything.
    ///
    /// # Errors
    /// Returns an error only when no base interpreter can be found at all or
    /// the local dependency directory cannot be created.
    pub fn provision(&mut self, ctx: &WatchContext<'_>) -> Result<Provisioned> {
        if let Some(ready) = &self.ready {
            return Ok(Provisioned::Ready(ready.clone()));
        }
        let runtime_config = ctx.config().runtime();
        let env_dir = ctx.config().layout().env_dir();
        let env_python = env_interpreter(&env_dir);

        if runtime_config.isolate && inside_environment(runtime_config, &env_dir, &env_python) {
            info!(env = %env_dir.display(), "running inside the isolated environment");
            let runtime = ActiveRuntime::new(
                ProvisioningState::IsolatedEnv,
                env_python.display().to_string(),
                runtime_config.inherited_pythonpath.clone(),
            );
            return Ok(Provisioned::Ready(self.remember(runtime)));
        }

        let base = ctx
            .effects()
            .python()
            .detect_interpreter(runtime_config.python.as_deref())?;

        if !runtime_config.isolate {
            info!(python = %base, "isolation disabled; using the base interpreter");
            let runtime = ActiveRuntime::new(
                ProvisioningState::Native,
                base,
                runtime_config.inherited_pythonpath.clone(),
            );
            return Ok(Provisioned::Ready(self.remember(runtime)));
        }

        if runtime_config.relaunched {
            warn!(
                env = %env_dir.display(),
                "relaunched but the environment is not usable; not relaunching again"
            );
            return self.fall_back_to_local(ctx, base).map(Provisioned::Ready);
        }
        let Some(invocation) = runtime_config.invocation.as_ref() else {
            warn!("cannot determine how the supervisor was started; skipping isolation");
            return self.fall_back_to_local(ctx, base).map(Provisioned::Ready);
        };

        if env_python.exists() {
            info!(env = %env_dir.display(), "reusing existing environment");
        } else if let Err(err) = self.create_environment(ctx, &base, &env_dir) {
            warn!(error = %err, "falling back to a local dependency directory");
            return self.fall_back_to_local(ctx, base).map(Provisioned::Ready);
        }

        let plan = relaunch_plan(runtime_config, &env_dir, &invocation.program, &invocation.args)?;
        Ok(Provisioned::Relaunch(plan))
    }

    /// Called when the relaunch itself failed: give up on isolation for the
    /// rest of this process.
    ///
    /// # Errors
    /// Returns an error when no base interpreter can be found or the local
    /// dependency directory cannot be created.
    pub fn abandon_isolation(&mut self, ctx: &WatchContext<'_>) -> Result<ActiveRuntime> {
        if let Some(ready) = &self.ready {
            return Ok(ready.clone());
        }
        let base = ctx
            .effects()
            .python()
            .detect_interpreter(ctx.config().runtime().python.as_deref())?;
        self.fall_back_to_local(ctx, base)
    }

    #[must_use]
    pub fn state(&self) -> Option<ProvisioningState> {
        self.ready.as_ref().map(ActiveRuntime::state)
    }

    fn create_environment(
        &self,
        ctx: &WatchContext<'_>,
        python: &str,
        env_dir: &Path,
    ) -> Result<(), WatchError> {
        let mut failures = Vec::new();
        for strategy in &self.strategies {
            info!(strategy = strategy.label(), env = %env_dir.display(), "creating environment");
            match strategy.create(ctx, python, env_dir) {
                Ok(()) if env_interpreter(env_dir).exists() => {
                    info!(strategy = strategy.label(), "environment ready");
                    return Ok(());
                }
                Ok(()) => {
                    failures.push(format!("{}: no interpreter was created", strategy.label()));
                }
                Err(err) => {
                    warn!(strategy = strategy.label(), error = %format!("{err:#}"), "strategy failed");
                    failures.push(format!("{}: {err:#}", strategy.label()));
                }
            }
            remove_partial_environment(env_dir);
        }
        Err(WatchError::Provisioning(failures.join("; ")))
    }

    fn fall_back_to_local(
        &mut self,
        ctx: &WatchContext<'_>,
        python: String,
    ) -> Result<ActiveRuntime> {
        let lib_dir = ctx.config().layout().lib_dir();
        fs::create_dir_all(&lib_dir)
            .with_context(|| format!("failed to create {}", lib_dir.display()))?;
        let mut runtime = ActiveRuntime::new(
            ProvisioningState::LocalTargetDir,
            python,
            ctx.config().runtime().inherited_pythonpath.clone(),
        );
        runtime.prepend_search_path(lib_dir.clone());
        info!(lib = %lib_dir.display(), python = runtime.python(), "using local dependency directory");
        Ok(self.remember(runtime))
    }

    fn remember(&mut self, runtime: ActiveRuntime) -> ActiveRuntime {
        self.ready = Some(runtime.clone());
        runtime
    }
}

fn inside_environment(config: &RuntimeConfig, env_dir: &Path, env_python: &Path) -> bool {
    if let Some(active) = &config.virtual_env {
        if same_location(active, env_dir) {
            return true;
        }
    }
    if let Some(explicit) = &config.python {
        if same_location(Path::new(explicit), env_python) {
            return true;
        }
    }
    config.relaunched && env_python.exists()
}

fn relaunch_plan(
    config: &RuntimeConfig,
    env_dir: &Path,
    program: &Path,
    args: &[std::ffi::OsString],
) -> Result<RelaunchPlan> {
    let mut path_entries: Vec<PathBuf> = vec![env_bin_dir(env_dir)];
    if let Some(inherited) = &config.inherited_path {
        path_entries.extend(env::split_paths(inherited));
    }
    let path = env::join_paths(path_entries).context("cannot build PATH for the environment")?;
    Ok(RelaunchPlan {
        program: program.to_path_buf(),
        args: args.to_vec(),
        env: vec![
            ("VIRTUAL_ENV".to_string(), env_dir.display().to_string()),
            ("PATH".to_string(), path.to_string_lossy().into_owned()),
            (RELAUNCH_MARKER.to_string(), "1".to_string()),
        ],
    })
}

/// A strategy that died halfway can leave a directory that looks like an
/// environment but has no working pip; never reuse it.
fn remove_partial_environment(env_dir: &Path) {
    if env_dir.exists() {
        if let Err(err) = fs::remove_dir_all(env_dir) {
            warn!(env = %env_dir.display(), %err, "failed to remove partial environment");
        }
    }
}

#[cfg(test)]
mod tests;
