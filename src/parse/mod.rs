//! Tracer output parsing.
//!
//! Both supported tracers print one syscall per line, but only `open` names a
//! path; `read` and `write` carry just the descriptor. Each format gets a
//! [`TraceParser`] that turns a raw line into a [`TraceRecord`], and
//! [`correlate`] replays those records through an [`FdTable`] to resolve the
//! first read or write back to a path.
//!
//! - [`fs_usage`]: macOS `fs_usage -w` output
//! - [`strace`]: Linux `strace -y -f` output

pub mod fs_usage;
pub mod strace;

use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::error::{Result, TraceError};
use crate::event::{Syscall, SyscallEvent};

pub use fs_usage::FsUsageParser;
pub use strace::StraceParser;

/// An allow-listed syscall pulled out of a single line of tracer output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceRecord {
    /// `fd` now refers to `path`.
    Open { fd: i32, path: PathBuf },
    /// A read or write on `fd`.
    Transfer { syscall: Syscall, fd: i32 },
}

/// Per-format line decoder.
///
/// Parsers may keep state across lines (strace splits interrupted calls over
/// two lines), so `parse_line` takes `&mut self` and must see lines in file
/// order.
pub trait TraceParser {
    /// Returns `None` for lines that are not an allow-listed syscall or that
    /// lack the fields needed to correlate it.
    fn parse_line(&mut self, line: &str) -> Option<TraceRecord>;
}

/// Descriptor to path map built while scanning a capture.
#[derive(Debug, Default)]
pub struct FdTable {
    paths: HashMap<i32, PathBuf>,
}

impl FdTable {
    /// Record an open. Descriptors get reused, so the latest open wins.
    pub fn open(&mut self, fd: i32, path: PathBuf) {
        self.paths.insert(fd, path);
    }

    pub fn resolve(&self, fd: i32) -> Option<&Path> {
        self.paths.get(&fd).map(PathBuf::as_path)
    }
}

/// Scan `reader` line by line and return the first read or write, resolved
/// to a path.
///
/// Returns `Ok(None)` if the capture holds no read or write at all, and
/// [`TraceError::InconsistentTrace`] if one refers to a descriptor that was
/// not opened earlier in the capture.
pub fn correlate<P, R>(parser: &mut P, reader: R) -> Result<Option<SyscallEvent>>
where
    P: TraceParser + ?Sized,
    R: BufRead,
{
    let mut table = FdTable::default();

    for raw in reader.split(b'\n') {
        let raw = raw?;
        // Paths are not guaranteed to be UTF-8; tracer output is mostly ASCII.
        let line = String::from_utf8_lossy(&raw);
        let line = line.trim_end_matches('\r');

        match parser.parse_line(line) {
            Some(TraceRecord::Open { fd, path }) => {
                trace!(fd, path = %path.display(), "open");
                table.open(fd, path);
            }
            Some(TraceRecord::Transfer { syscall, fd }) => {
                return match table.resolve(fd) {
                    Some(path) => Ok(Some(SyscallEvent::new(syscall, path))),
                    None => Err(TraceError::InconsistentTrace {
                        syscall: syscall.name().to_string(),
                        fd,
                        line: line.to_string(),
                    }),
                };
            }
            None => {}
        }
    }

    Ok(None)
}
