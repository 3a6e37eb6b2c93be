//! Error type shared by the capture store and the trace session.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use crate::session::SessionState;

pub type Result<T> = std::result::Result<T, TraceError>;

/// Everything that can go wrong while tracing or parsing a capture.
#[derive(Debug)]
pub enum TraceError {
    /// The host OS has no supported tracer.
    UnsupportedPlatform { os: String },
    /// A `read`/`write` referenced a descriptor that was never opened inside
    /// the capture window.
    InconsistentTrace {
        syscall: String,
        fd: i32,
        line: String,
    },
    /// The operation is not valid in the session's current state.
    UnsupportedOperation {
        operation: &'static str,
        state: SessionState,
    },
    /// The tracer binary could not be launched.
    Spawn { program: PathBuf, source: io::Error },
    /// The tracer exited before the settle window was over.
    TracerExited { status: ExitStatus },
    /// SIGKILL could not be delivered to a tracer that ignored SIGTERM.
    TerminationFailed { pid: u32, source: nix::Error },
    Io(io::Error),
}

impl fmt::Display for TraceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceError::UnsupportedPlatform { os } => {
                write!(f, "unsupported platform '{os}': only linux and macos can be traced")
            }
            TraceError::InconsistentTrace { syscall, fd, line } => {
                write!(
                    f,
                    "{syscall} on fd {fd} has no preceding open in the capture: {line}"
                )
            }
            TraceError::UnsupportedOperation { operation, state } => {
                write!(f, "cannot {operation} a session that is {state}")
            }
            TraceError::Spawn { program, source } => {
                write!(f, "failed to spawn tracer {}: {source}", program.display())
            }
            TraceError::TracerExited { status } => {
                write!(f, "tracer exited before attaching ({status})")
            }
            TraceError::TerminationFailed { pid, source } => {
                write!(f, "failed to kill tracer {pid}: {source}")
            }
            TraceError::Io(err) => write!(f, "capture file I/O error: {err}"),
        }
    }
}

impl std::error::Error for TraceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TraceError::Spawn { source, .. } => Some(source),
            TraceError::TerminationFailed { source, .. } => Some(source),
            TraceError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for TraceError {
    fn from(err: io::Error) -> Self {
        TraceError::Io(err)
    }
}
