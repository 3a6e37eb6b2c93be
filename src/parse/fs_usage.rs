//! macOS `fs_usage -w` output.
//!
//! Lines are whitespace separated:
//!
//! ```text
//! 14:51:02.123456  open   F=3  (R_____)  /etc/hosts   0.000015   python3.1234
//! 14:51:02.123501  read   F=3  B=0x1a9                0.000004   python3.1234
//! ```
//!
//! Token 1 is the syscall, token 2 is `F=<fd>`, and for `open` token 4 is the
//! path. A failed open prints `[errno]` where the descriptor would be, which
//! fails the `name=value` check and is skipped.

use std::path::PathBuf;

use super::{TraceParser, TraceRecord};
use crate::event::Syscall;

const SYSCALL_TOKEN: usize = 1;
const FD_TOKEN: usize = 2;
const PATH_TOKEN: usize = 4;

#[derive(Debug, Default)]
pub struct FsUsageParser;

impl FsUsageParser {
    pub fn new() -> Self {
        FsUsageParser
    }
}

/// Parse the value half of a `name=value` token as a descriptor.
fn parse_fd_token(token: &str) -> Option<i32> {
    let (_, value) = token.split_once('=')?;
    value.parse().ok()
}

impl TraceParser for FsUsageParser {
    fn parse_line(&mut self, line: &str) -> Option<TraceRecord> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let syscall = Syscall::from_name(*tokens.get(SYSCALL_TOKEN)?)?;
        let fd = parse_fd_token(*tokens.get(FD_TOKEN)?)?;

        if syscall.is_data_transfer() {
            return Some(TraceRecord::Transfer { syscall, fd });
        }
        Some(TraceRecord::Open {
            fd,
            path: PathBuf::from(*tokens.get(PATH_TOKEN)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TraceError;
    use crate::event::SyscallEvent;
    use crate::parse::correlate;

    fn parse(input: &str) -> crate::Result<Option<SyscallEvent>> {
        correlate(&mut FsUsageParser::new(), input.as_bytes())
    }

    #[test]
    fn test_parse_fd_token() {
        assert_eq!(parse_fd_token("F=5"), Some(5));
        assert_eq!(parse_fd_token("fd=12"), Some(12));
        assert_eq!(parse_fd_token("F="), None);
        assert_eq!(parse_fd_token("["), None);
        assert_eq!(parse_fd_token("B=0x10"), None);
    }

    #[test]
    fn test_open_line() {
        let mut parser = FsUsageParser::new();
        let record = parser
            .parse_line("14:51:02.123456  open  F=5  (_WC___)  /tmp/a  0.000010  python3.77")
            .unwrap();
        assert_eq!(
            record,
            TraceRecord::Open {
                fd: 5,
                path: PathBuf::from("/tmp/a")
            }
        );
    }

    #[test]
    fn test_open_without_path_skipped() {
        let mut parser = FsUsageParser::new();
        assert_eq!(parser.parse_line("14:51:02.123456  open  F=5"), None);
    }

    #[test]
    fn test_failed_open_skipped() {
        let mut parser = FsUsageParser::new();
        assert_eq!(
            parser.parse_line("14:51:02.1  open  [  2]  (R_____)  /nope  0.00001  cat.9"),
            None
        );
    }

    #[test]
    fn test_short_and_blank_lines_skipped() {
        let mut parser = FsUsageParser::new();
        assert_eq!(parser.parse_line(""), None);
        assert_eq!(parser.parse_line("   "), None);
        assert_eq!(parser.parse_line("14:51:02.1"), None);
        assert_eq!(parser.parse_line("14:51:02.1  write"), None);
    }

    #[test]
    fn test_other_syscalls_ignored() {
        let capture = "\
14:51:02.1  close  F=5  0.000002  python3.77
14:51:02.2  fstat64  F=5  0.000002  python3.77
14:51:02.3  lseek  F=5  O=0x0  0.000002  python3.77
";
        assert_eq!(parse(capture).unwrap(), None);
    }

    #[test]
    fn test_write_after_open() {
        let capture = "\
14:51:02.100  open  F=5  (_WC___)  /tmp/a  0.000010  python3.77
14:51:02.200  write  F=5  B=0x5  0.000004  python3.77
";
        assert_eq!(
            parse(capture).unwrap(),
            Some(SyscallEvent::new(Syscall::Write, "/tmp/a"))
        );
    }

    #[test]
    fn test_descriptor_reuse() {
        let capture = "\
14:51:02.100  open  F=5  (R_____)  /tmp/a  0.000010  python3.77
14:51:02.150  close  F=5  0.000002  python3.77
14:51:02.200  open  F=5  (R_____)  /tmp/b  0.000010  python3.77
14:51:02.300  read  F=5  B=0x10  0.000004  python3.77
";
        assert_eq!(
            parse(capture).unwrap(),
            Some(SyscallEvent::new(Syscall::Read, "/tmp/b"))
        );
    }

    #[test]
    fn test_write_without_open_is_inconsistent() {
        let capture = "14:51:02.200  write  F=1  B=0x5  0.000004  python3.77\n";
        assert!(matches!(
            parse(capture),
            Err(TraceError::InconsistentTrace { fd: 1, .. })
        ));
    }
}
