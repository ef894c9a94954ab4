use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::info;

/// Cooperative stop flag shared between the signal thread and the loop.
#[derive(Clone, Debug, Default)]
pub struct Shutdown {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Shutdown {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        let (flag, wake) = &*self.inner;
        *lock(flag) = true;
        wake.notify_all();
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        *lock(&self.inner.0)
    }

    /// Sleep for `duration` or until a stop is requested. Returns whether a
    /// stop was requested. A duration too large to form a deadline waits for
    /// the stop request alone.
    #[must_use]
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let (flag, wake) = &*self.inner;
        let deadline = Instant::now().checked_add(duration);
        let mut requested = lock(flag);
        while !*requested {
            requested = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    wake.wait_timeout(requested, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => wake.wait(requested).unwrap_or_else(PoisonError::into_inner),
            };
        }
        *requested
    }
}

fn lock(flag: &Mutex<bool>) -> MutexGuard<'_, bool> {
    flag.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Flip `shutdown` on SIGTERM or SIGINT. The handlers are installed before
/// this returns; the waiting happens on a dedicated thread.
///
/// # Errors
/// Returns an error if the handlers cannot be installed.
#[cfg(unix)]
pub fn listen_for_signals(shutdown: Shutdown) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;
    let (mut sigterm, mut sigint) = {
        let _guard = runtime.enter();
        (
            signal(SignalKind::terminate()).context("failed to register SIGTERM")?,
            signal(SignalKind::interrupt()).context("failed to register SIGINT")?,
        )
    };
    thread::Builder::new()
        .name("pywatch-signals".into())
        .spawn(move || {
            runtime.block_on(async {
                loop {
                    let received = tokio::select! {
                        _ = sigterm.recv() => "SIGTERM",
                        _ = sigint.recv() => "SIGINT",
                    };
                    info!(signal = received, "shutdown requested");
                    shutdown.request();
                }
            });
        })
        .context("failed to start signal thread")?;
    Ok(())
}

/// # Errors
/// Returns an error if the handler cannot be installed.
#[cfg(not(unix))]
pub fn listen_for_signals(shutdown: Shutdown) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;
    thread::Builder::new()
        .name("pywatch-signals".into())
        .spawn(move || {
            runtime.block_on(async {
                while tokio::signal::ctrl_c().await.is_ok() {
                    info!(signal = "ctrl-c", "shutdown requested");
                    shutdown.request();
                }
            });
        })
        .context("failed to start signal thread")?;
    Ok(())
}
