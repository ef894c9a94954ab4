use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use url::Url;

use super::net::{self, HttpResponse};
use super::process::{run_command, spawn_detached, RunOutput};
use super::python::detect_interpreter;

pub trait PythonRuntime: Send + Sync {
    fn detect_interpreter(&self, explicit: Option<&str>) -> Result<String>;
    fn run_command(
        &self,
        python: &str,
        args: &[String],
        env: &[(String, String)],
        cwd: &Path,
    ) -> Result<RunOutput>;
}

pub trait HttpClient: Send + Sync {
    fn get(&self, url: &Url, timeout: Duration) -> Result<HttpResponse>;
}

/// What to start as the supervised child.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: PathBuf,
}

/// Re-execute the supervisor itself under a different environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelaunchPlan {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(String, String)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChildExit {
    pub code: Option<i32>,
}

/// A running child as seen by the supervisor. Every method is non-blocking
/// except `wait`, which is only used to reap a child already killed.
pub trait ChildProcess: Send + fmt::Debug {
    fn id(&self) -> u32;
    fn try_wait(&mut self) -> Result<Option<ChildExit>>;
    /// Ask the child to exit on its own.
    fn request_stop(&mut self) -> Result<()>;
    fn kill(&mut self) -> Result<()>;
    fn wait(&mut self) -> Result<ChildExit>;
}

pub trait ProcessControl: Send + Sync {
    fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn ChildProcess>>;
    /// Replace the current process image. Only returns when that failed.
    fn replace_current(&self, plan: &RelaunchPlan) -> anyhow::Error;
}

pub trait Effects: Send + Sync {
    fn python(&self) -> &dyn PythonRuntime;
    fn http(&self) -> &dyn HttpClient;
    fn processes(&self) -> &dyn ProcessControl;
}

pub struct SystemEffects {
    python: Arc<SystemPythonRuntime>,
    http: Arc<SystemHttpClient>,
    processes: Arc<SystemProcessControl>,
}

impl SystemEffects {
    #[must_use]
    pub fn new() -> Self {
        Self {
            python: Arc::new(SystemPythonRuntime),
            http: Arc::new(SystemHttpClient::default()),
            processes: Arc::new(SystemProcessControl),
        }
    }
}

impl Default for SystemEffects {
    fn default() -> Self {
        Self::new()
    }
}

impl Effects for SystemEffects {
    fn python(&self) -> &dyn PythonRuntime {
        self.python.as_ref()
    }

    fn http(&self) -> &dyn HttpClient {
        self.http.as_ref()
    }

    fn processes(&self) -> &dyn ProcessControl {
        self.processes.as_ref()
    }
}

struct SystemPythonRuntime;

impl PythonRuntime for SystemPythonRuntime {
    fn detect_interpreter(&self, explicit: Option<&str>) -> Result<String> {
        detect_interpreter(explicit)
    }

    fn run_command(
        &self,
        python: &str,
        args: &[String],
        env: &[(String, String)],
        cwd: &Path,
    ) -> Result<RunOutput> {
        run_command(python, args, env, cwd)
    }
}

/// Builds its reqwest client on first use and keeps it for the lifetime of
/// the effects.
#[derive(Default)]
struct SystemHttpClient {
    client: Mutex<Option<reqwest::blocking::Client>>,
}

impl SystemHttpClient {
    fn client(&self) -> Result<reqwest::blocking::Client> {
        let mut slot = self.client.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = net::http_client()?;
        *slot = Some(client.clone());
        Ok(client)
    }
}

impl HttpClient for SystemHttpClient {
    fn get(&self, url: &Url, timeout: Duration) -> Result<HttpResponse> {
        let client = self.client()?;
        net::get_text(&client, url, timeout)
    }
}

struct SystemProcessControl;

impl ProcessControl for SystemProcessControl {
    fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn ChildProcess>> {
        let child = spawn_detached(&spec.program, &spec.args, &spec.env, &spec.cwd)?;
        Ok(Box::new(SystemChild {
            child,
            exited: None,
        }))
    }

    #[cfg(unix)]
    fn replace_current(&self, plan: &RelaunchPlan) -> anyhow::Error {
        use std::os::unix::process::CommandExt;

        let err = std::process::Command::new(&plan.program)
            .args(&plan.args)
            .envs(plan.env.iter().map(|(k, v)| (k, v)))
            .exec();
        anyhow::Error::new(err).context(format!("failed to re-execute {}", plan.program.display()))
    }

    #[cfg(not(unix))]
    fn replace_current(&self, plan: &RelaunchPlan) -> anyhow::Error {
        // No exec on this platform: run the replacement to completion and
        // leave with its exit code.
        let status = std::process::Command::new(&plan.program)
            .args(&plan.args)
            .envs(plan.env.iter().map(|(k, v)| (k, v)))
            .status();
        match status {
            Ok(status) => std::process::exit(status.code().unwrap_or(1)),
            Err(err) => anyhow::Error::new(err)
                .context(format!("failed to re-execute {}", plan.program.display())),
        }
    }
}

#[derive(Debug)]
struct SystemChild {
    child: Child,
    exited: Option<ChildExit>,
}

impl ChildProcess for SystemChild {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn try_wait(&mut self) -> Result<Option<ChildExit>> {
        if let Some(exit) = self.exited {
            return Ok(Some(exit));
        }
        let status = self
            .child
            .try_wait()
            .with_context(|| format!("failed to poll child {}", self.child.id()))?;
        if let Some(status) = status {
            tracing::debug!(
                pid = self.child.id(),
                status = %super::process::describe_status(status),
                "child exited"
            );
            self.exited = Some(ChildExit {
                code: status.code(),
            });
        }
        Ok(self.exited)
    }

    #[cfg(unix)]
    fn request_stop(&mut self) -> Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if self.exited.is_some() {
            return Ok(());
        }
        #[allow(clippy::cast_possible_wrap)]
        let pid = Pid::from_raw(self.child.id() as i32);
        match kill(pid, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(anyhow::anyhow!(
                "failed to send SIGTERM to {}: {errno}",
                self.child.id()
            )),
        }
    }

    #[cfg(not(unix))]
    fn request_stop(&mut self) -> Result<()> {
        // There is no polite stop request for arbitrary processes here.
        self.kill()
    }

    fn kill(&mut self) -> Result<()> {
        if self.exited.is_some() {
            return Ok(());
        }
        self.child
            .kill()
            .with_context(|| format!("failed to kill child {}", self.child.id()))
    }

    fn wait(&mut self) -> Result<ChildExit> {
        if let Some(exit) = self.exited {
            return Ok(exit);
        }
        let status = self
            .child
            .wait()
            .with_context(|| format!("failed to reap child {}", self.child.id()))?;
        let exit = ChildExit {
            code: status.code(),
        };
        self.exited = Some(exit);
        Ok(exit)
    }
}
