//! fdtrace - find out which files a block of code touches.
//!
//! A [`TraceSession`] attaches `strace` (Linux) or `fs_usage` (macOS) to the
//! current process for the duration of a closure or an explicit
//! start/stop pair. The tracer writes into a capture file owned by a
//! [`TraceEventStore`], which afterwards resolves the first `read` or `write`
//! back to the path its descriptor was opened on.
//!
//! # Modules
//!
//! - [`session`] - tracer spawn, settle, terminate and reap
//! - [`store`] - the capture file and its parse
//! - [`parse`] - per-tracer line parsers and descriptor correlation
//! - [`platform`] - OS resolution and tracer command lines
//!
//! # Example
//!
//! ```no_run
//! use fdtrace::{observe, TracerConfig};
//!
//! let (_, event) = observe(TracerConfig::default(), || {
//!     std::fs::write("/tmp/fdtrace-example", b"hello")
//! })?;
//! if let Some(event) = event {
//!     println!("{} {}", event.syscall, event.path.display());
//! }
//! # Ok::<(), fdtrace::TraceError>(())
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod parse;
pub mod platform;
pub mod session;
pub mod store;

pub use config::TracerConfig;
pub use error::{Result, TraceError};
pub use event::{Syscall, SyscallEvent};
pub use platform::Platform;
pub use session::{SessionState, TraceSession};
pub use store::TraceEventStore;

/// Trace `f` with a fresh capture and return its output together with the
/// first file read or write it performed.
pub fn observe<F, R>(config: TracerConfig, f: F) -> Result<(R, Option<SyscallEvent>)>
where
    F: FnOnce() -> R,
{
    let platform = Platform::from_os_name(&config.target_os)?;
    let session = TraceSession::new(TraceEventStore::new()?, config);
    let (output, store) = session.run(f)?;
    let event = store.parse_events_as(platform)?;
    Ok((output, event))
}
