//! Host platform resolution.
//!
//! The tracer binary, how it is invoked, and the layout of its output all
//! depend on the OS. [`Platform`] is resolved once from an OS name and then
//! answers both questions: which command to launch and which parser reads
//! the capture.

use std::fmt;
use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::config::TracerConfig;
use crate::error::{Result, TraceError};
use crate::parse::{FsUsageParser, StraceParser, TraceParser};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// `strace`, writing straight to the capture file.
    Linux,
    /// `fs_usage`, with stdout redirected into the capture file.
    MacOs,
}

impl Platform {
    /// Resolve an OS name as reported by `std::env::consts::OS`. `darwin` is
    /// accepted as an alias for `macos`.
    pub fn from_os_name(os: &str) -> Result<Self> {
        match os.to_ascii_lowercase().as_str() {
            "linux" => Ok(Platform::Linux),
            "macos" | "darwin" => Ok(Platform::MacOs),
            _ => Err(TraceError::UnsupportedPlatform { os: os.to_string() }),
        }
    }

    pub fn current() -> Result<Self> {
        Self::from_os_name(std::env::consts::OS)
    }

    pub fn tracer_name(&self) -> &'static str {
        match self {
            Platform::Linux => "strace",
            Platform::MacOs => "fs_usage",
        }
    }

    /// Parser for this platform's capture format.
    pub fn parser(&self) -> Box<dyn TraceParser> {
        match self {
            Platform::Linux => Box::new(StraceParser::new()),
            Platform::MacOs => Box::new(FsUsageParser::new()),
        }
    }

    /// Build the tracer invocation that attaches to `pid` and records into
    /// `capture`.
    ///
    /// strace is told where to write with `-o`; fs_usage only prints to
    /// stdout, so `capture` is cloned into the child's stdout. The macOS tool
    /// needs root and is run through `config.elevate` when one is set.
    pub fn tracer_command(
        &self,
        config: &TracerConfig,
        pid: u32,
        capture: &Path,
        capture_file: &File,
    ) -> Result<Command> {
        let cmd = match self {
            Platform::Linux => {
                let mut cmd = Command::new(&config.strace_path);
                cmd.arg("-y") // annotate descriptors with paths
                    .arg("-f") // follow forks
                    .arg("-p")
                    .arg(pid.to_string())
                    .arg("-o")
                    .arg(capture)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null());
                cmd
            }
            Platform::MacOs => {
                let mut cmd = match &config.elevate {
                    Some(elevate) => {
                        let mut cmd = Command::new(elevate);
                        cmd.arg(&config.fs_usage_path);
                        cmd
                    }
                    None => Command::new(&config.fs_usage_path),
                };
                cmd.arg("-w")
                    .arg(pid.to_string())
                    .stdin(Stdio::null())
                    .stdout(Stdio::from(capture_file.try_clone()?));
                cmd
            }
        };
        Ok(cmd)
    }

    /// Path of the binary `tracer_command` launches, for error reporting.
    pub fn program<'a>(&self, config: &'a TracerConfig) -> &'a Path {
        match self {
            Platform::Linux => config.strace_path.as_path(),
            Platform::MacOs => config
                .elevate
                .as_deref()
                .unwrap_or(config.fs_usage_path.as_path()),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Linux => f.write_str("linux"),
            Platform::MacOs => f.write_str("macos"),
        }
    }
}
