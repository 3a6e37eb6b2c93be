// Integration tests for trace sessions.
//
// fs_usage needs macOS and root and strace needs ptrace permission, so most
// of these stand a shell script in for the tracer. The macOS code path is
// used because it only needs the script to print to stdout: the session runs
// `<elevate> <fs_usage> -w <pid>`, so with elevate set to /bin/sh the script
// is interpreted rather than executed. The test that needs a real strace is
// ignored by default.

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::time::{Duration, Instant};

    use fdtrace::{
        observe, Platform, SessionState, Syscall, SyscallEvent, TraceError, TraceEventStore,
        TraceSession, TracerConfig,
    };
    use nix::sys::signal;
    use nix::unistd::Pid;

    const SETTLE: Duration = Duration::from_millis(200);
    const DRAIN: Duration = Duration::from_millis(50);
    const ESCALATION: Duration = Duration::from_millis(400);

    /// Config that runs `script` through /bin/sh in place of fs_usage.
    fn scripted_config(script: &Path) -> TracerConfig {
        TracerConfig::default()
            .with_target_os("macos")
            .with_elevate(Some(PathBuf::from("/bin/sh")))
            .with_fs_usage_path(script)
            .with_delays(SETTLE, DRAIN, ESCALATION)
    }

    /// A fake fs_usage that reports an open of `path` on fd 5 followed by a
    /// write, then blocks like the real tool until it is signalled.
    fn fake_fs_usage(dir: &Path, path: &Path, ignore_term: bool) -> PathBuf {
        let trap = if ignore_term { "trap '' TERM\n" } else { "" };
        let script = format!(
            "{trap}echo \"10:00:00.000001  open   F=5  (_WC___)  {path}  0.000010  fdtrace.$2\"\n\
             echo \"10:00:00.000002  write  F=5  B=0x5  0.000004  fdtrace.$2\"\n\
             exec sleep 30\n",
            path = path.display()
        );
        let script_path = dir.join("fs_usage.sh");
        std::fs::write(&script_path, script).unwrap();
        script_path
    }

    fn is_alive(pid: u32) -> bool {
        signal::kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    #[test]
    fn test_end_to_end_write_is_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("written.txt");
        let script = fake_fs_usage(dir.path(), &target, false);

        let session = TraceSession::new(TraceEventStore::new().unwrap(), scripted_config(&script));
        let (written, store) = session
            .run(|| std::fs::write(&target, b"hello"))
            .unwrap();
        written.unwrap();

        assert_eq!(
            store.parse_events_as(Platform::MacOs).unwrap(),
            Some(SyscallEvent::new(Syscall::Write, &target))
        );
    }

    #[test]
    fn test_explicit_start_stop() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("explicit.txt");
        let script = fake_fs_usage(dir.path(), &target, false);

        let mut session =
            TraceSession::new(TraceEventStore::new().unwrap(), scripted_config(&script));
        assert_eq!(session.state(), SessionState::Idle);
        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.platform(), Some(Platform::MacOs));
        let pid = session.tracer_pid().unwrap();
        assert!(is_alive(pid));

        session.stop().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.tracer_pid(), None);
        assert!(!is_alive(pid));

        // Stopping again is harmless.
        session.stop().unwrap();
        let store = session.into_store().unwrap();
        assert_eq!(
            store.parse_events_as(Platform::MacOs).unwrap(),
            Some(SyscallEvent::new(Syscall::Write, &target))
        );
    }

    #[test]
    fn test_observe_helper() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("observed.txt");
        let script = fake_fs_usage(dir.path(), &target, false);

        let (value, event) = observe(scripted_config(&script), || 42).unwrap();
        assert_eq!(value, 42);
        assert_eq!(event, Some(SyscallEvent::new(Syscall::Write, &target)));
    }

    #[test]
    fn test_tracer_ignoring_sigterm_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("stubborn.txt");
        let script = fake_fs_usage(dir.path(), &target, true);

        let mut session =
            TraceSession::new(TraceEventStore::new().unwrap(), scripted_config(&script));
        session.start().unwrap();
        let pid = session.tracer_pid().unwrap();

        let started = Instant::now();
        session.stop().unwrap();
        let elapsed = started.elapsed();

        assert!(!is_alive(pid));
        assert!(elapsed >= DRAIN + ESCALATION);
        assert!(elapsed < DRAIN + ESCALATION + Duration::from_secs(2));
    }

    #[test]
    fn test_drop_reclaims_tracer() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("dropped.txt");
        let script = fake_fs_usage(dir.path(), &target, true);

        let mut session =
            TraceSession::new(TraceEventStore::new().unwrap(), scripted_config(&script));
        session.start().unwrap();
        let pid = session.tracer_pid().unwrap();
        let capture = session.store().path().to_path_buf();

        drop(session);
        assert!(!is_alive(pid));
        assert!(!capture.exists());
    }

    #[test]
    fn test_unsupported_platform() {
        let mut session = TraceSession::new(
            TraceEventStore::new().unwrap(),
            TracerConfig::default().with_target_os("freebsd"),
        );
        assert!(matches!(
            session.start(),
            Err(TraceError::UnsupportedPlatform { .. })
        ));
        assert_eq!(session.tracer_pid(), None);
        assert!(matches!(
            observe(TracerConfig::default().with_target_os("freebsd"), || ()),
            Err(TraceError::UnsupportedPlatform { .. })
        ));
    }

    #[test]
    fn test_tracer_that_dies_fails_start() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("broken.sh");
        std::fs::write(&script, "echo 'fs_usage: must be run as root' >&2\nexit 1\n").unwrap();

        let mut session =
            TraceSession::new(TraceEventStore::new().unwrap(), scripted_config(&script));
        match session.start() {
            Err(TraceError::TracerExited { status }) => assert_eq!(status.code(), Some(1)),
            other => panic!("expected TracerExited, got {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    #[ignore] // Requires strace and permission to ptrace this process
    fn test_real_strace_sees_write() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("strace.txt");
        let strace = ["/usr/bin/strace", "/bin/strace"]
            .into_iter()
            .find(|p| Path::new(p).exists())
            .expect("strace not installed");

        let config = TracerConfig::default()
            .with_target_os("linux")
            .with_strace_path(strace);
        let (written, event) = observe(config, || std::fs::write(&target, b"hello")).unwrap();
        written.unwrap();
        assert_eq!(event, Some(SyscallEvent::new(Syscall::Write, &target)));
    }
}
