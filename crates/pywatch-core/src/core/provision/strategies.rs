use std::path::Path;

use anyhow::Result;

use crate::core::context::WatchContext;
use crate::core::python::run_python;

/// One way of materializing the isolated environment. Strategies are tried
/// in order; the first that succeeds wins.
pub trait EnvironmentStrategy: Send + Sync {
    fn label(&self) -> &'static str;
    fn create(&self, ctx: &WatchContext<'_>, python: &str, env_dir: &Path) -> Result<()>;
}

/// `python -m venv`, available wherever the standard library ships intact.
pub struct StdlibVenv;

impl EnvironmentStrategy for StdlibVenv {
    fn label(&self) -> &'static str {
        "venv"
    }

    fn create(&self, ctx: &WatchContext<'_>, python: &str, env_dir: &Path) -> Result<()> {
        let args = vec![
            "-m".to_string(),
            "venv".to_string(),
            env_dir.display().to_string(),
        ];
        run_python(ctx, python, &args, &[])?;
        Ok(())
    }
}

/// Installs `virtualenv` into user scope and lets it build the environment.
/// Covers distributions that strip `ensurepip` out of the interpreter.
pub struct UserVirtualenv;

impl EnvironmentStrategy for UserVirtualenv {
    fn label(&self) -> &'static str {
        "virtualenv"
    }

    fn create(&self, ctx: &WatchContext<'_>, python: &str, env_dir: &Path) -> Result<()> {
        let install = [
            "-m",
            "pip",
            "install",
            "--user",
            "--disable-pip-version-check",
            "virtualenv",
        ]
        .map(String::from);
        run_python(ctx, python, &install, &[])?;
        let create = vec![
            "-m".to_string(),
            "virtualenv".to_string(),
            env_dir.display().to_string(),
        ];
        run_python(ctx, python, &create, &[])?;
        Ok(())
    }
}

#[must_use]
pub fn default_strategies() -> Vec<Box<dyn EnvironmentStrategy>> {
    vec![Box::new(StdlibVenv), Box::new(UserVirtualenv)]
}
