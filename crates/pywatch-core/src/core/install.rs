//! Make packages importable by the active runtime.
//!
//! Installs go through the active interpreter first. If that is refused
//! (a read-only site-packages, a managed system interpreter) the packages
//! are placed in the local dependency directory, which is then put on the
//! runtime's module search path.

use std::fs;

use anyhow::{Context, Result};
use pywatch_domain::DependencyManifest;
use tracing::{debug, info, warn};

use super::context::WatchContext;
use super::errors::WatchError;
use super::python::{run_python, ActiveRuntime};

/// One way of running `pip install` for a set of requirement specifiers.
pub trait InstallStrategy: Send + Sync {
    fn label(&self) -> &'static str;
    fn install(
        &self,
        ctx: &WatchContext<'_>,
        runtime: &mut ActiveRuntime,
        specs: &[String],
    ) -> Result<()>;
}

/// `pip install` into whatever the active interpreter considers its own
/// site-packages.
pub struct ActiveInterpreter;

impl InstallStrategy for ActiveInterpreter {
    fn label(&self) -> &'static str {
        "interpreter"
    }

    fn install(
        &self,
        ctx: &WatchContext<'_>,
        runtime: &mut ActiveRuntime,
        specs: &[String],
    ) -> Result<()> {
        let mut args = pip_install_args();
        args.extend(specs.iter().cloned());
        run_python(ctx, runtime.python(), &args, &runtime.envs())?;
        Ok(())
    }
}

/// `pip install --target` into the local dependency directory.
pub struct LocalTarget;

impl InstallStrategy for LocalTarget {
    fn label(&self) -> &'static str {
        "local-target"
    }

    fn install(
        &self,
        ctx: &WatchContext<'_>,
        runtime: &mut ActiveRuntime,
        specs: &[String],
    ) -> Result<()> {
        let lib_dir = ctx.config().layout().lib_dir();
        fs::create_dir_all(&lib_dir)
            .with_context(|| format!("failed to create {}", lib_dir.display()))?;
        let mut args = pip_install_args();
        args.extend([
            "--target".to_string(),
            lib_dir.display().to_string(),
            "--upgrade".to_string(),
        ]);
        args.extend(specs.iter().cloned());
        run_python(ctx, runtime.python(), &args, &runtime.envs())?;
        runtime.prepend_search_path(lib_dir);
        Ok(())
    }
}

fn pip_install_args() -> Vec<String> {
    ["-m", "pip", "install", "--disable-pip-version-check"]
        .map(String::from)
        .to_vec()
}

#[must_use]
pub fn default_install_strategies() -> Vec<Box<dyn InstallStrategy>> {
    vec![Box::new(ActiveInterpreter), Box::new(LocalTarget)]
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoreInstall {
    AlreadyPresent,
    Installed,
}

pub struct DependencyInstaller {
    strategies: Vec<Box<dyn InstallStrategy>>,
}

impl Default for DependencyInstaller {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyInstaller {
    #[must_use]
    pub fn new() -> Self {
        Self::with_strategies(default_install_strategies())
    }

    #[must_use]
    pub fn with_strategies(strategies: Vec<Box<dyn InstallStrategy>>) -> Self {
        Self { strategies }
    }

    /// Make sure the packages the supervisor itself relies on import cleanly,
    /// installing them when the probe fails.
    ///
    /// # Errors
    /// Returns [`WatchError::Install`] when every strategy failed.
    pub fn install_core(
        &self,
        ctx: &WatchContext<'_>,
        runtime: &mut ActiveRuntime,
    ) -> Result<CoreInstall> {
        let deps = &ctx.config().runtime().core_deps;
        if deps.is_empty() {
            return Ok(CoreInstall::AlreadyPresent);
        }
        let modules: Vec<&str> = deps.iter().map(|dep| dep.module.as_str()).collect();
        let probe = vec!["-c".to_string(), format!("import {}", modules.join(", "))];
        match run_python(ctx, runtime.python(), &probe, &runtime.envs()) {
            Ok(_) => {
                debug!(modules = %modules.join(","), "core packages already importable");
                return Ok(CoreInstall::AlreadyPresent);
            }
            Err(err) => debug!(error = %format!("{err:#}"), "core import probe failed"),
        }
        let specs: Vec<String> = deps.iter().map(|dep| dep.requirement.clone()).collect();
        self.install_specs(ctx, runtime, &specs, "core packages")?;
        Ok(CoreInstall::Installed)
    }

    /// Install every specifier in `manifest`. An empty manifest does nothing.
    ///
    /// # Errors
    /// Returns [`WatchError::Install`] when every strategy failed.
    pub fn install_manifest(
        &self,
        ctx: &WatchContext<'_>,
        runtime: &mut ActiveRuntime,
        manifest: &DependencyManifest,
    ) -> Result<()> {
        if manifest.is_empty() {
            debug!("dependency manifest is empty");
            return Ok(());
        }
        self.install_specs(ctx, runtime, manifest.specs(), "payload libraries")
    }

    fn install_specs(
        &self,
        ctx: &WatchContext<'_>,
        runtime: &mut ActiveRuntime,
        specs: &[String],
        what: &str,
    ) -> Result<()> {
        let mut failures = Vec::new();
        for strategy in &self.strategies {
            match strategy.install(ctx, runtime, specs) {
                Ok(()) => {
                    info!(
                        strategy = strategy.label(),
                        count = specs.len(),
                        "installed {what}"
                    );
                    return Ok(());
                }
                Err(err) => {
                    warn!(strategy = strategy.label(), error = %format!("{err:#}"), "install attempt failed");
                    failures.push(format!("{}: {err:#}", strategy.label()));
                }
            }
        }
        Err(WatchError::Install {
            what: what.to_string(),
            reason: failures.join("; "),
        }
        .into())
    }
}
