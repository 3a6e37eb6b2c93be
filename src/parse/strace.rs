//! Linux `strace -y -f` output.
//!
//! With `-f` and `-o` every line carries the pid of the thread that made the
//! call, and `-y` decorates descriptors with the path they refer to:
//!
//! ```text
//! 4242 openat(AT_FDCWD</home/me>, "notes.txt", O_WRONLY|O_CREAT|O_TRUNC|O_CLOEXEC, 0666) = 3</home/me/notes.txt>
//! 4242 write(3</home/me/notes.txt>, "hello", 5) = 5
//! ```
//!
//! Token 0 is the pid and the syscall name leads token 1, up to the `(`. An
//! open's descriptor is its return value and its path is the `-y` annotation on
//! that value, falling back to the first quoted argument. A read or write
//! takes its descriptor from the first argument and is resolved through the
//! descriptor table like any other format.
//!
//! When another thread runs while a call is blocked strace splits it:
//!
//! ```text
//! 4243 read(5</tmp/a>,  <unfinished ...>
//! 4242 close(7</tmp/b>) = 0
//! 4243 <... read resumed>"data", 4096) = 4
//! ```
//!
//! The first half is held per pid until the matching `resumed` line arrives.
//!
//! Paths are printed C-style in both places: non-printable and non-ASCII bytes
//! become `\ooo` octal or `\xHH` escapes, so `/tmp/café` shows up as
//! `/tmp/caf\303\251`. Those are decoded back to raw bytes before the path is
//! recorded.

use std::collections::HashMap;
use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use super::{TraceParser, TraceRecord};
use crate::event::Syscall;

/// A completed call: `[pid] name(args) = ret[<path>]`.
static CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?:\[pid\s+)?(?P<pid>\d+)\]?\s+)?(?P<name>\w+)\((?P<args>.*)\)\s+=\s+(?P<ret>-?\d+)(?:<(?P<path>[^>]*)>)?",
    )
    .expect("Invalid strace call regex pattern")
});

/// First half of an interrupted call: `[pid] name(args <unfinished ...>`.
static UNFINISHED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:\[pid\s+)?(?P<pid>\d+)\]?\s+)?(?P<call>(?P<name>\w+)\(.*?)\s*<unfinished \.\.\.>$")
        .expect("Invalid strace unfinished regex pattern")
});

/// Second half of an interrupted call: `[pid] <... name resumed>rest`.
static RESUMED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:\[pid\s+)?(?P<pid>\d+)\]?\s+)?<\.\.\. (?P<name>\w+) resumed>\s*(?P<rest>.*)$")
        .expect("Invalid strace resumed regex pattern")
});

/// First double-quoted argument, honoring strace's backslash escapes.
static QUOTED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""((?:[^"\\]|\\.)*)""#).expect("Invalid strace quoted-string regex pattern")
});

#[derive(Debug, Default)]
pub struct StraceParser {
    /// Interrupted calls keyed by pid (`None` when strace printed no pid),
    /// holding `name(args` up to the `<unfinished ...>` marker.
    unfinished: HashMap<Option<u32>, String>,
}

impl StraceParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_call(&self, line: &str) -> Option<TraceRecord> {
        let caps = CALL_RE.captures(line)?;
        let syscall = Syscall::from_name(&caps["name"])?;
        let ret: i64 = caps["ret"].parse().ok()?;
        if ret < 0 {
            // Failed calls never touched a file.
            return None;
        }

        if syscall.is_data_transfer() {
            let fd = leading_fd(&caps["args"])?;
            return Some(TraceRecord::Transfer { syscall, fd });
        }

        let fd = i32::try_from(ret).ok()?;
        let quoted = match caps.name("path") {
            Some(annotated) => annotated.as_str(),
            None => QUOTED_RE.captures(&caps["args"])?.get(1)?.as_str(),
        };
        // An escape we can't decode would leave a path that was never opened.
        let path = unescape_path(quoted)?;
        Some(TraceRecord::Open { fd, path })
    }
}

/// Decode strace's C-style quoting back to the raw path bytes.
///
/// Handles `\ooo` octal (one to three digits), `\xHH` hex and the single
/// character escapes strace emits. Returns `None` on anything else, including
/// a trailing backslash.
fn unescape_path(quoted: &str) -> Option<PathBuf> {
    let mut bytes = Vec::with_capacity(quoted.len());
    let mut rest = quoted.as_bytes();

    while let Some((&b, tail)) = rest.split_first() {
        rest = tail;
        if b != b'\\' {
            bytes.push(b);
            continue;
        }

        let (&esc, tail) = rest.split_first()?;
        rest = tail;
        let decoded = match esc {
            b'n' => b'\n',
            b't' => b'\t',
            b'r' => b'\r',
            b'v' => 0x0b,
            b'f' => 0x0c,
            b'"' | b'\\' => esc,
            b'x' => {
                let hex = rest.get(..2)?;
                if !hex.iter().all(u8::is_ascii_hexdigit) {
                    return None;
                }
                rest = &rest[2..];
                u8::from_str_radix(std::str::from_utf8(hex).ok()?, 16).ok()?
            }
            b'0'..=b'7' => {
                let digits = rest
                    .iter()
                    .take(2)
                    .take_while(|c| (b'0'..=b'7').contains(*c))
                    .count();
                let value = rest[..digits]
                    .iter()
                    .fold(u32::from(esc - b'0'), |acc, d| acc * 8 + u32::from(d - b'0'));
                rest = &rest[digits..];
                u8::try_from(value).ok()?
            }
            _ => return None,
        };
        bytes.push(decoded);
    }

    Some(PathBuf::from(OsString::from_vec(bytes)))
}

/// The descriptor number at the start of an argument list, ignoring any `-y`
/// annotation that follows it.
fn leading_fd(args: &str) -> Option<i32> {
    let first = args.split(',').next()?.trim_start();
    let end = first
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(first.len());
    first[..end].parse().ok()
}

fn pid_of(caps: &regex::Captures<'_>) -> Option<u32> {
    caps.name("pid").and_then(|m| m.as_str().parse().ok())
}

impl TraceParser for StraceParser {
    fn parse_line(&mut self, line: &str) -> Option<TraceRecord> {
        if let Some(caps) = UNFINISHED_RE.captures(line) {
            if Syscall::from_name(&caps["name"]).is_some() {
                self.unfinished
                    .insert(pid_of(&caps), caps["call"].to_string());
            }
            return None;
        }

        if let Some(caps) = RESUMED_RE.captures(line) {
            let head = self.unfinished.remove(&pid_of(&caps))?;
            if !head.starts_with(&format!("{}(", &caps["name"])) {
                return None;
            }
            return self.parse_call(&format!("{head}{}", &caps["rest"]));
        }

        self.parse_call(line)
    }
}
