//! Lifecycle of the one supervised child.

use std::fmt;
use std::fs;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::context::WatchContext;
use super::effects::{ChildProcess, LaunchSpec};
use super::errors::WatchError;
use super::python::ActiveRuntime;

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The running payload. Dropping a handle does not stop the process.
#[derive(Debug)]
pub struct ChildHandle {
    child: Box<dyn ChildProcess>,
}

impl ChildHandle {
    pub(crate) fn new(child: Box<dyn ChildProcess>) -> Self {
        Self { child }
    }

    #[must_use]
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Non-blocking liveness check. A child that cannot be polled is treated
    /// as gone.
    pub fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => false,
            Err(err) => {
                warn!(pid = self.pid(), error = %format!("{err:#}"), "cannot poll child");
                false
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    AlreadyExited,
    /// Exited within the grace period after the stop request.
    Graceful,
    /// Still running after the grace period and killed.
    Forced,
}

impl Termination {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyExited => "already-exited",
            Self::Graceful => "graceful",
            Self::Forced => "forced",
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed [`ProcessSupervisor::replace`]. `previous` hands the old child
/// back to the caller, terminated or not, so the handle is never lost.
#[derive(Debug)]
pub struct ReplaceFailure {
    pub error: anyhow::Error,
    pub previous: Option<ChildHandle>,
}

impl fmt::Display for ReplaceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.error)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessSupervisor;

impl ProcessSupervisor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Persist `payload`, stop `previous`, and start the new payload.
    ///
    /// # Errors
    /// If the payload cannot be written, `previous` comes back untouched. If
    /// `previous` cannot be stopped, no new child is started. If the launch
    /// fails, the terminated `previous` comes back as a stale handle.
    pub fn replace(
        &self,
        ctx: &WatchContext<'_>,
        runtime: &ActiveRuntime,
        payload: &str,
        previous: Option<ChildHandle>,
    ) -> Result<ChildHandle, ReplaceFailure> {
        if let Err(error) = persist(ctx, payload) {
            return Err(ReplaceFailure { error, previous });
        }

        let mut previous = previous;
        if let Some(old) = previous.as_mut() {
            let pid = old.pid();
            match self.terminate(old, ctx.config().timing().grace_period) {
                Ok(outcome) => info!(pid, termination = %outcome, "previous payload stopped"),
                Err(error) => return Err(ReplaceFailure { error, previous }),
            }
        }

        match launch(ctx, runtime) {
            Ok(child) => Ok(child),
            Err(error) => Err(ReplaceFailure { error, previous }),
        }
    }

    /// Ask `handle` to stop, wait up to `grace`, then kill it. A child that
    /// cannot be polled is killed as well.
    ///
    /// # Errors
    /// Returns [`WatchError::Process`] when the child cannot be killed.
    pub fn terminate(&self, handle: &mut ChildHandle, grace: Duration) -> Result<Termination> {
        let pid = handle.pid();
        let child = handle.child.as_mut();
        match child.try_wait() {
            Ok(Some(_)) => return Ok(Termination::AlreadyExited),
            Ok(None) => match child.request_stop() {
                Ok(()) => {
                    if wait_for_exit(child, pid, grace) {
                        return Ok(Termination::Graceful);
                    }
                }
                Err(err) => warn!(pid, error = %format!("{err:#}"), "stop request failed; killing"),
            },
            Err(err) => warn!(pid, error = %format!("{err:#}"), "cannot poll child; killing"),
        }

        child.kill().map_err(process_error)?;
        child.wait().map_err(process_error)?;
        Ok(Termination::Forced)
    }
}

/// Poll `child` until it exits or `grace` runs out. A grace period too large
/// to represent as a deadline waits indefinitely.
fn wait_for_exit(child: &mut dyn ChildProcess, pid: u32, grace: Duration) -> bool {
    let deadline = Instant::now().checked_add(grace);
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) => {}
            Err(err) => {
                warn!(pid, error = %format!("{err:#}"), "cannot poll child; killing");
                return false;
            }
        }
        let now = Instant::now();
        let pause = match deadline {
            Some(deadline) if now >= deadline => {
                warn!(pid, grace_secs = grace.as_secs_f64(), "child ignored stop request; killing");
                return false;
            }
            Some(deadline) => STOP_POLL_INTERVAL.min(deadline - now),
            None => STOP_POLL_INTERVAL,
        };
        thread::sleep(pause);
    }
}

fn process_error(err: anyhow::Error) -> anyhow::Error {
    WatchError::Process(format!("{err:#}")).into()
}

fn persist(ctx: &WatchContext<'_>, payload: &str) -> Result<()> {
    let path = ctx.config().layout().payload_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(&path, payload).with_context(|| format!("failed to write {}", path.display()))?;
    let digest = hex::encode(Sha256::digest(payload.as_bytes()));
    info!(
        path = %path.display(),
        bytes = payload.len(),
        sha256 = %digest,
        "payload written"
    );
    Ok(())
}

fn launch(ctx: &WatchContext<'_>, runtime: &ActiveRuntime) -> Result<ChildHandle> {
    let layout = ctx.config().layout();
    let spec = LaunchSpec {
        program: runtime.python().to_string(),
        args: vec![layout.payload_path().display().to_string()],
        env: runtime.envs(),
        cwd: layout.root().to_path_buf(),
    };
    let child = ctx
        .effects()
        .processes()
        .spawn(&spec)
        .map_err(process_error)?;
    info!(pid = child.id(), python = runtime.python(), "payload started");
    Ok(ChildHandle::new(child))
}
