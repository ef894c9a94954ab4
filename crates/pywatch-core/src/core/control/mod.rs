//! The supervisor's state machine.
//!
//! `Bootstrapping` runs once and settles the runtime. After that the loop
//! alternates between `Polling` and `Sleeping`, detouring through `Updating`
//! when the page announces a new payload. Failures inside a cycle are logged
//! and turn into a transition to `Sleeping`; only a stop request ends the loop.

use anyhow::Result;
use pywatch_domain::{should_update, Fingerprint, LoopPhase, Observation};
use tracing::{debug, info, warn};

use super::context::WatchContext;
use super::detect::ChangeDetector;
use super::errors::error_kind;
use super::fetch::PayloadFetcher;
use super::install::{CoreInstall, DependencyInstaller};
use super::provision::{EnvironmentProvisioner, Provisioned};
use super::python::ActiveRuntime;
use super::shutdown::Shutdown;
use super::supervise::{ChildHandle, ProcessSupervisor};

/// Everything the loop remembers between cycles.
#[derive(Debug, Default)]
pub struct LoopState {
    last_fingerprint: Option<Fingerprint>,
    child: Option<ChildHandle>,
    runtime: Option<ActiveRuntime>,
}

pub struct ControlLoop<'a> {
    ctx: WatchContext<'a>,
    shutdown: Shutdown,
    provisioner: EnvironmentProvisioner,
    installer: DependencyInstaller,
    detector: ChangeDetector,
    fetcher: PayloadFetcher,
    supervisor: ProcessSupervisor,
    state: LoopState,
}

impl<'a> ControlLoop<'a> {
    #[must_use]
    pub fn new(ctx: WatchContext<'a>, shutdown: Shutdown) -> Self {
        Self {
            ctx,
            shutdown,
            provisioner: EnvironmentProvisioner::new(),
            installer: DependencyInstaller::new(),
            detector: ChangeDetector::new(),
            fetcher: PayloadFetcher::new(),
            supervisor: ProcessSupervisor::new(),
            state: LoopState::default(),
        }
    }

    /// Drive the loop until a stop is requested.
    ///
    /// # Errors
    /// Only bootstrapping can fail, when no interpreter is usable at all.
    pub fn run(&mut self) -> Result<()> {
        let mut phase = LoopPhase::Bootstrapping;
        loop {
            if self.shutdown.is_requested() {
                phase = LoopPhase::ShuttingDown;
            }
            if phase.is_terminal() {
                self.shut_down();
                return Ok(());
            }
            phase = self.step(phase)?;
        }
    }

    /// Execute one phase and return the next.
    ///
    /// # Errors
    /// See [`ControlLoop::run`].
    pub fn step(&mut self, phase: LoopPhase) -> Result<LoopPhase> {
        debug!(phase = %phase, "entering phase");
        let next = match phase {
            LoopPhase::Bootstrapping => {
                self.bootstrap()?;
                LoopPhase::Polling
            }
            LoopPhase::Polling => self.poll(),
            LoopPhase::Updating(observation) => {
                self.update(observation);
                LoopPhase::Sleeping
            }
            LoopPhase::Sleeping => {
                let interval = self.ctx.config().timing().poll_interval;
                if self.shutdown.wait_timeout(interval) {
                    LoopPhase::ShuttingDown
                } else {
                    LoopPhase::Polling
                }
            }
            LoopPhase::ShuttingDown => {
                self.shut_down();
                LoopPhase::ShuttingDown
            }
        };
        Ok(next)
    }

    #[must_use]
    pub fn last_fingerprint(&self) -> Option<&Fingerprint> {
        self.state.last_fingerprint.as_ref()
    }

    #[must_use]
    pub fn child_pid(&self) -> Option<u32> {
        self.state.child.as_ref().map(ChildHandle::pid)
    }

    #[must_use]
    pub fn runtime(&self) -> Option<&ActiveRuntime> {
        self.state.runtime.as_ref()
    }

    fn bootstrap(&mut self) -> Result<()> {
        let ctx = self.ctx;
        let mut runtime = match self.provisioner.provision(&ctx)? {
            Provisioned::Ready(runtime) => runtime,
            Provisioned::Relaunch(plan) => {
                info!(program = %plan.program.display(), "relaunching inside the isolated environment");
                let err = ctx.effects().processes().replace_current(&plan);
                warn!(error = %format!("{err:#}"), "relaunch failed; continuing without isolation");
                self.provisioner.abandon_isolation(&ctx)?
            }
        };
        info!(state = %runtime.state(), python = runtime.python(), "runtime ready");

        match self.installer.install_core(&ctx, &mut runtime) {
            Ok(CoreInstall::Installed) => info!("core packages installed"),
            Ok(CoreInstall::AlreadyPresent) => {}
            Err(err) => log_failure("core install", &err),
        }
        self.state.runtime = Some(runtime);
        Ok(())
    }

    fn poll(&mut self) -> LoopPhase {
        let observation = match self.detector.poll(&self.ctx) {
            Ok(observation) => observation,
            Err(err) => {
                log_failure("poll", &err);
                return LoopPhase::Sleeping;
            }
        };
        let last = self.state.last_fingerprint.as_ref();
        if should_update(last, &observation) {
            return LoopPhase::Updating(observation);
        }
        if last != Some(&observation.fingerprint) {
            info!(
                fingerprint = %observation.fingerprint,
                "page changed but links to no payload yet"
            );
        }
        LoopPhase::Sleeping
    }

    fn update(&mut self, observation: Observation) {
        let ctx = self.ctx;
        let Some(reference) = observation.reference else {
            return;
        };
        let Some(runtime) = self.state.runtime.as_mut() else {
            warn!("update requested before bootstrapping; skipping");
            return;
        };
        info!(
            from = self.state.last_fingerprint.as_ref().map(Fingerprint::as_str),
            to = %observation.fingerprint,
            url = %reference,
            "change detected"
        );

        match self.fetcher.fetch_manifest(&ctx) {
            Ok(manifest) => {
                if let Err(err) = self.installer.install_manifest(&ctx, runtime, &manifest) {
                    log_failure("manifest install", &err);
                }
            }
            Err(err) => log_failure("manifest fetch", &err),
        }

        let payload = match self.fetcher.fetch(&ctx, &reference) {
            Ok(payload) => payload,
            Err(err) => {
                log_failure("payload fetch", &err);
                return;
            }
        };

        let previous = self.state.child.take();
        match self.supervisor.replace(&ctx, runtime, &payload, previous) {
            Ok(child) => {
                info!(pid = child.pid(), fingerprint = %observation.fingerprint, "update applied");
                self.state.child = Some(child);
                self.state.last_fingerprint = Some(observation.fingerprint);
            }
            Err(failure) => {
                self.state.child = failure.previous;
                log_failure("replace", &failure.error);
            }
        }
    }

    fn shut_down(&mut self) {
        if let Some(mut child) = self.state.child.take() {
            let pid = child.pid();
            let grace = self.ctx.config().timing().grace_period;
            match self.supervisor.terminate(&mut child, grace) {
                Ok(outcome) => info!(pid, termination = %outcome, "payload stopped"),
                Err(err) => log_failure("shutdown", &err),
            }
        }
        info!("supervisor stopped");
    }
}

fn log_failure(stage: &str, err: &anyhow::Error) {
    warn!(stage, kind = error_kind(err), error = %format!("{err:#}"), "{stage} failed");
}
