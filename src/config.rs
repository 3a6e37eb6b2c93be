use std::path::PathBuf;
use std::time::Duration;

/// Time given to the tracer to attach before traced work begins.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Time given to in-flight syscalls to reach the capture before stopping.
pub const DEFAULT_DRAIN_DELAY: Duration = Duration::from_secs(1);

/// How long a tracer may take to exit after SIGTERM before it gets SIGKILL.
pub const DEFAULT_ESCALATION_DELAY: Duration = Duration::from_millis(500);

/// How often the tracer is polled while waiting on one of the delays above.
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Runtime options for a trace session.
#[derive(Debug, Clone)]
pub struct TracerConfig {
    /// strace binary used on Linux
    pub strace_path: PathBuf,
    /// fs_usage binary used on macOS
    pub fs_usage_path: PathBuf,
    /// Privilege wrapper fs_usage is launched through (`None` runs it directly).
    ///
    /// Stopping signals the wrapper. `sudo` relays SIGTERM to fs_usage, but if
    /// the tracer ignores it the follow-up SIGKILL only reaches `sudo`, and the
    /// root-owned fs_usage behind it can outlive the session.
    pub elevate: Option<PathBuf>,
    /// OS name the session resolves its platform from
    pub target_os: String,
    pub settle_delay: Duration,
    pub drain_delay: Duration,
    pub escalation_delay: Duration,
}

impl Default for TracerConfig {
    fn default() -> Self {
        TracerConfig {
            strace_path: PathBuf::from("/bin/strace"),
            fs_usage_path: PathBuf::from("/usr/bin/fs_usage"),
            elevate: Some(PathBuf::from("sudo")),
            target_os: std::env::consts::OS.to_string(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            drain_delay: DEFAULT_DRAIN_DELAY,
            escalation_delay: DEFAULT_ESCALATION_DELAY,
        }
    }
}

impl TracerConfig {
    pub fn with_strace_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.strace_path = path.into();
        self
    }

    pub fn with_fs_usage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.fs_usage_path = path.into();
        self
    }

    pub fn with_elevate(mut self, elevate: Option<PathBuf>) -> Self {
        self.elevate = elevate;
        self
    }

    pub fn with_target_os(mut self, os: impl Into<String>) -> Self {
        self.target_os = os.into();
        self
    }

    /// Override all three session delays at once.
    pub fn with_delays(mut self, settle: Duration, drain: Duration, escalation: Duration) -> Self {
        self.settle_delay = settle;
        self.drain_delay = drain;
        self.escalation_delay = escalation;
        self
    }
}
