//! The capture file and the parse that turns it into an event.

use std::cell::OnceCell;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::Result;
use crate::event::SyscallEvent;
use crate::parse::correlate;
use crate::platform::Platform;

/// Owns the temporary file a tracer writes into.
///
/// The file is created up front so its path can be handed to the tracer, and
/// that path stays fixed for the life of the store. The file is removed when
/// the store is dropped unless it is [`persist`](Self::persist)ed.
///
/// Only the first resolved read or write is reported. Once one has been found
/// it is remembered and later parses return it without touching the file.
#[derive(Debug)]
pub struct TraceEventStore {
    capture: NamedTempFile,
    matched: OnceCell<SyscallEvent>,
}

impl TraceEventStore {
    pub fn new() -> Result<Self> {
        let capture = tempfile::Builder::new()
            .prefix("fdtrace-")
            .suffix(".trace")
            .tempfile()?;
        Ok(TraceEventStore {
            capture,
            matched: OnceCell::new(),
        })
    }

    pub fn path(&self) -> &Path {
        self.capture.path()
    }

    pub(crate) fn file(&self) -> &File {
        self.capture.as_file()
    }

    /// Push anything buffered for the capture out to the filesystem so a
    /// following parse sees it.
    pub fn flush(&self) -> Result<()> {
        let mut file = self.capture.as_file();
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    /// Parse the capture using the host platform's format.
    pub fn parse_events(&self) -> Result<Option<SyscallEvent>> {
        self.parse_events_as(Platform::current()?)
    }

    /// Parse the capture as `platform`'s tracer output.
    ///
    /// Must not be called while a tracer can still be writing the file;
    /// [`TraceSession`](crate::TraceSession) only hands the store back once
    /// its tracer has been reaped.
    pub fn parse_events_as(&self, platform: Platform) -> Result<Option<SyscallEvent>> {
        if let Some(event) = self.matched.get() {
            return Ok(Some(event.clone()));
        }

        let reader = BufReader::new(File::open(self.path())?);
        let mut parser = platform.parser();
        let event = correlate(parser.as_mut(), reader)?;

        match &event {
            Some(found) => {
                debug!(
                    syscall = %found.syscall,
                    path = %found.path.display(),
                    %platform,
                    "resolved capture event"
                );
                let _ = self.matched.set(found.clone());
            }
            None => debug!(%platform, capture = %self.path().display(), "no file I/O captured"),
        }
        Ok(event)
    }

    /// Whether the capture holds a resolvable read or write.
    pub fn syscall_occurred(&self) -> Result<bool> {
        Ok(self.parse_events()?.is_some())
    }

    /// Keep the capture at `path` instead of deleting it on drop.
    pub fn persist(self, path: impl AsRef<Path>) -> Result<File> {
        self.capture.persist(path).map_err(|err| err.error.into())
    }
}
