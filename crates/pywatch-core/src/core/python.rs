use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};
use pywatch_domain::ProvisioningState;
use which::which;

use super::context::WatchContext;
use super::process::RunOutput;

/// Detects the base Python interpreter the supervisor builds on.
///
/// # Errors
///
/// Returns an error when no interpreter can be found or the detected path is
/// not valid UTF-8.
pub fn detect_interpreter(explicit: Option<&str>) -> Result<String> {
    if let Some(explicit) = explicit {
        return Ok(explicit.to_string());
    }

    for candidate in ["python3", "python"] {
        if let Ok(path) = which(candidate) {
            return path
                .into_os_string()
                .into_string()
                .map_err(|_| anyhow!("non-utf8 path"));
        }
    }

    bail!("no python interpreter found; set PYWATCH_PYTHON")
}

#[must_use]
pub fn env_bin_dir(env_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        env_dir.join("Scripts")
    } else {
        env_dir.join("bin")
    }
}

#[must_use]
pub fn env_interpreter(env_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        env_bin_dir(env_dir).join("python.exe")
    } else {
        env_bin_dir(env_dir).join("python")
    }
}

/// Compare two paths after resolving symlinks, falling back to a literal
/// comparison when either side does not exist.
pub(crate) fn same_location(left: &Path, right: &Path) -> bool {
    match (fs::canonicalize(left), fs::canonicalize(right)) {
        (Ok(left), Ok(right)) => left == right,
        _ => left == right,
    }
}

/// Run `python <args>` in the working directory and insist on a zero exit.
///
/// The error carries the tail of stderr, which is where pip and venv explain
/// themselves.
pub(crate) fn run_python(
    ctx: &WatchContext<'_>,
    python: &str,
    args: &[String],
    env: &[(String, String)],
) -> Result<RunOutput> {
    let cwd = ctx.config().layout().root();
    tracing::debug!(python, args = %args.join(" "), "running interpreter");
    let output = ctx.effects().python().run_command(python, args, env, cwd)?;
    if !output.success() {
        let tail = output.stderr_tail(5);
        if tail.is_empty() {
            bail!("`{python} {}` exited with code {}", args.join(" "), output.code);
        }
        bail!(
            "`{python} {}` exited with code {}: {tail}",
            args.join(" "),
            output.code
        );
    }
    Ok(output)
}

/// The interpreter every install and launch goes through, plus the extra
/// directories placed in front of its module search path.
#[derive(Clone, Debug)]
pub struct ActiveRuntime {
    state: ProvisioningState,
    python: String,
    search_path: Vec<PathBuf>,
    inherited_pythonpath: Option<String>,
}

impl ActiveRuntime {
    #[must_use]
    pub fn new(state: ProvisioningState, python: String, inherited_pythonpath: Option<String>) -> Self {
        Self {
            state,
            python,
            search_path: Vec::new(),
            inherited_pythonpath,
        }
    }

    #[must_use]
    pub fn state(&self) -> ProvisioningState {
        self.state
    }

    #[must_use]
    pub fn python(&self) -> &str {
        &self.python
    }

    #[must_use]
    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    /// Put `dir` in front of the module search path. Adding the same
    /// directory twice is a no-op.
    pub fn prepend_search_path(&mut self, dir: PathBuf) {
        if !self.search_path.contains(&dir) {
            self.search_path.insert(0, dir);
        }
    }

    /// Environment variables every interpreter spawned for this runtime gets.
    #[must_use]
    pub fn envs(&self) -> Vec<(String, String)> {
        if self.search_path.is_empty() {
            return Vec::new();
        }
        let mut entries: Vec<OsString> = self
            .search_path
            .iter()
            .map(|dir| dir.clone().into_os_string())
            .collect();
        if let Some(inherited) = &self.inherited_pythonpath {
            entries.extend(env::split_paths(inherited).map(PathBuf::into_os_string));
        }
        match env::join_paths(entries) {
            Ok(joined) => vec![(
                "PYTHONPATH".to_string(),
                joined.to_string_lossy().into_owned(),
            )],
            Err(err) => {
                tracing::warn!(%err, "cannot express module search path; leaving PYTHONPATH alone");
                Vec::new()
            }
        }
    }
}
