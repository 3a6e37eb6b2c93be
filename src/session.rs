//! Tracer process lifecycle.
//!
//! A [`TraceSession`] brackets a region of code with an external tracer
//! attached to the current process:
//!
//! ```text
//! Idle --start--> Starting --settle--> Active --stop--> Stopping --reap--> Closed
//! ```
//!
//! Neither strace nor fs_usage signals when it has attached, so start blocks
//! for a fixed settle delay. Syscalls made before that delay is over may or
//! may not be captured. A session is single use.
//!
//! While a session is Active nothing here logs: a log line is itself a write
//! on an inherited descriptor and would show up in the capture.

use std::fmt;
use std::process::{Child, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::config::{TracerConfig, POLL_INTERVAL};
use crate::error::{Result, TraceError};
use crate::platform::Platform;
use crate::store::TraceEventStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Active,
    Stopping,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Active => "active",
            SessionState::Stopping => "stopping",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A spawned tracer.
///
/// On drop, if the tracer has not been reaped it is terminated (SIGTERM, then
/// SIGKILL) and waited on, so an early return or panic in traced code cannot
/// leak it.
struct Tracer {
    child: Child,
    escalation_delay: Duration,
    reaped: bool,
}

impl Tracer {
    fn new(child: Child, escalation_delay: Duration) -> Self {
        Tracer {
            child,
            escalation_delay,
            reaped: false,
        }
    }

    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn nix_pid(&self) -> Pid {
        Pid::from_raw(self.pid() as i32)
    }

    /// Poll until the tracer exits or `timeout` passes. Returns the exit
    /// status if it exited.
    fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<ExitStatus>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait()? {
                self.reaped = true;
                return Ok(Some(status));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Stop and reap the tracer: SIGTERM, wait up to the escalation delay,
    /// then SIGKILL. Only a failed SIGKILL is an error.
    ///
    /// Nothing is logged until the tracer is gone, so the outcome is returned
    /// for the caller to report.
    fn reclaim(&mut self) -> Result<Reclaimed> {
        if let Some(status) = self.child.try_wait()? {
            self.reaped = true;
            return Ok(Reclaimed::Exited(status));
        }

        // ESRCH here means it exited since try_wait; the wait below reaps it.
        let _ = signal::kill(self.nix_pid(), Signal::SIGTERM);
        if let Some(status) = self.wait_timeout(self.escalation_delay)? {
            return Ok(Reclaimed::Terminated(status));
        }

        if let Err(source) = signal::kill(self.nix_pid(), Signal::SIGKILL) {
            return match self.child.try_wait()? {
                Some(status) => {
                    self.reaped = true;
                    Ok(Reclaimed::Terminated(status))
                }
                None => Err(TraceError::TerminationFailed {
                    pid: self.pid(),
                    source,
                }),
            };
        }
        let status = self.child.wait()?;
        self.reaped = true;
        Ok(Reclaimed::Killed(status))
    }
}

/// How a tracer went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reclaimed {
    /// It had already exited on its own.
    Exited(ExitStatus),
    /// It exited after SIGTERM.
    Terminated(ExitStatus),
    /// It ignored SIGTERM and was killed.
    Killed(ExitStatus),
}

impl Reclaimed {
    fn log(&self, pid: u32, escalation_delay: Duration) {
        match self {
            Reclaimed::Exited(status) => debug!(pid, %status, "tracer already exited"),
            Reclaimed::Terminated(status) => debug!(pid, %status, "tracer exited after SIGTERM"),
            Reclaimed::Killed(status) => warn!(
                pid,
                %status,
                timeout_ms = escalation_delay.as_millis() as u64,
                "tracer ignored SIGTERM, killed"
            ),
        }
    }
}

impl Drop for Tracer {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        match self.reclaim() {
            Ok(outcome) => outcome.log(self.pid(), self.escalation_delay),
            Err(err) => warn!(pid = self.pid(), %err, "failed to reclaim tracer on drop"),
        }
    }
}

/// One observation window with one tracer attached to the current process.
///
/// ```no_run
/// use fdtrace::{TraceEventStore, TraceSession, TracerConfig};
///
/// let store = TraceEventStore::new()?;
/// let mut session = TraceSession::new(store, TracerConfig::default());
/// session.start()?;
/// std::fs::write("/tmp/traced.txt", b"hello")?;
/// let store = session.into_store()?;
/// println!("{:?}", store.parse_events()?);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct TraceSession {
    store: TraceEventStore,
    config: TracerConfig,
    platform: Option<Platform>,
    tracer: Option<Tracer>,
    state: SessionState,
}

impl TraceSession {
    pub fn new(store: TraceEventStore, config: TracerConfig) -> Self {
        TraceSession {
            store,
            config,
            platform: None,
            tracer: None,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Platform resolved by [`start`](Self::start).
    pub fn platform(&self) -> Option<Platform> {
        self.platform
    }

    /// Pid of the running tracer, if there is one.
    pub fn tracer_pid(&self) -> Option<u32> {
        self.tracer.as_ref().map(Tracer::pid)
    }

    pub fn store(&self) -> &TraceEventStore {
        &self.store
    }

    /// Spawn the tracer against the current process and wait for it to
    /// attach.
    ///
    /// Fails with `UnsupportedPlatform` before spawning anything if the
    /// configured OS has no tracer, and with `TracerExited` if the tracer
    /// dies during the settle delay. Any failure closes the session.
    pub fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(TraceError::UnsupportedOperation {
                operation: "start",
                state: self.state,
            });
        }
        self.state = SessionState::Starting;

        match self.spawn_and_settle() {
            Ok((platform, tracer)) => {
                self.platform = Some(platform);
                self.tracer = Some(tracer);
                self.state = SessionState::Active;
                Ok(())
            }
            Err(err) => {
                self.state = SessionState::Closed;
                Err(err)
            }
        }
    }

    fn spawn_and_settle(&self) -> Result<(Platform, Tracer)> {
        let platform = Platform::from_os_name(&self.config.target_os)?;
        let pid = std::process::id();
        let mut cmd =
            platform.tracer_command(&self.config, pid, self.store.path(), self.store.file())?;

        info!(
            tracer = platform.tracer_name(),
            program = %platform.program(&self.config).display(),
            pid,
            capture = %self.store.path().display(),
            "starting tracer"
        );
        let child = cmd.spawn().map_err(|source| TraceError::Spawn {
            program: platform.program(&self.config).to_path_buf(),
            source,
        })?;

        let mut tracer = Tracer::new(child, self.config.escalation_delay);
        if let Some(status) = tracer.wait_timeout(self.config.settle_delay)? {
            return Err(TraceError::TracerExited { status });
        }
        Ok((platform, tracer))
    }

    /// Let in-flight syscalls land, flush the capture, and stop and reap the
    /// tracer. Does nothing unless the session is Active.
    ///
    /// Reclaiming is attempted even if the flush fails; the first error is
    /// returned.
    pub fn stop(&mut self) -> Result<()> {
        if self.state != SessionState::Active {
            return Ok(());
        }
        self.state = SessionState::Stopping;

        thread::sleep(self.config.drain_delay);
        let flushed = self.store.flush();
        let reclaimed = match self.tracer.take() {
            Some(mut tracer) => tracer
                .reclaim()
                .map(|outcome| outcome.log(tracer.pid(), tracer.escalation_delay)),
            None => Ok(()),
        };
        self.state = SessionState::Closed;

        info!(capture = %self.store.path().display(), "tracer stopped");
        flushed.and(reclaimed)
    }

    /// Stop the session if it is still running and hand back the store for
    /// parsing.
    pub fn into_store(mut self) -> Result<TraceEventStore> {
        self.stop()?;
        Ok(self.store)
    }

    /// Trace `f`: start, run it, and stop whether or not it succeeded.
    /// Returns `f`'s output with the store holding the capture.
    pub fn run<F, R>(mut self, f: F) -> Result<(R, TraceEventStore)>
    where
        F: FnOnce() -> R,
    {
        self.start()?;
        let output = f();
        let store = self.into_store()?;
        Ok((output, store))
    }
}

impl fmt::Debug for TraceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceSession")
            .field("state", &self.state)
            .field("platform", &self.platform)
            .field("tracer_pid", &self.tracer_pid())
            .field("capture", &self.store.path())
            .finish()
    }
}
