use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The filesystem syscalls a capture is scanned for. Everything else in the
/// tracer output is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Syscall {
    Open,
    Read,
    Write,
}

impl Syscall {
    /// Map a tracer's syscall name onto the allow-list. `openat` is what
    /// modern libcs issue for `open(2)`, so it counts as an open.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "open" | "openat" => Some(Syscall::Open),
            "read" => Some(Syscall::Read),
            "write" => Some(Syscall::Write),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Syscall::Open => "open",
            Syscall::Read => "read",
            Syscall::Write => "write",
        }
    }

    /// True for the calls that report only a descriptor and need an earlier
    /// open to resolve their path.
    pub fn is_data_transfer(&self) -> bool {
        matches!(self, Syscall::Read | Syscall::Write)
    }
}

impl fmt::Display for Syscall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A `read` or `write` resolved to the path its descriptor was opened on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyscallEvent {
    pub syscall: Syscall,
    pub path: PathBuf,
}

impl SyscallEvent {
    pub fn new(syscall: Syscall, path: impl Into<PathBuf>) -> Self {
        SyscallEvent {
            syscall,
            path: path.into(),
        }
    }
}
