// crates/launcher/src/lib.rs
//! Fork/exec launcher with explicit descriptor inheritance.
//!
//! A [`ExecRequest`] describes the program image, its environment and how the
//! three standard streams are bound. [`launch`] turns it into a running child
//! and hands back a [`ChildHandle`] owning the pid and the read ends of any
//! capture pipes.

use std::collections::BTreeSet;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::os::fd::RawFd;

mod child;
mod error;
mod image;
mod os;
mod postfork;
mod sink;
mod spawn;

pub use child::{ChildHandle, ExitStatus, kill_process};
pub use error::{ChildStage, ExecError};
pub use sink::{ErrorSink, NopSink, TracingSink};
pub use spawn::{EXEC_FAILED_STATUS, NULL_DEVICE, launch, launch_with_sink};

pub use nix::sys::signal::Signal;
pub use nix::unistd::Pid;

/// Options altering how a child is started.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ExecFlags(u8);

impl ExecFlags {
    pub const NONE: Self = Self(0);
    /// Detach into a new session and let init adopt the program.
    pub const DAEMONIZE: Self = Self(1);
    /// Put the parent-side read end of capture pipes into non-blocking mode.
    pub const NONBLOCKING_OUTPUT: Self = Self(1 << 1);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ExecFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ExecFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Where a child's stdout or stderr ends up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Redirect {
    /// Bind to the null device.
    #[default]
    Null,
    /// Leave the stream as inherited from the caller.
    Inherit,
    /// Capture through a pipe; the read end is returned in the [`ChildHandle`].
    Pipe,
    /// Bind to a caller-owned descriptor. The launcher never closes it.
    Fd(RawFd),
}

/// Everything needed to start one child process.
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct ExecRequest {
    argv: Vec<OsString>,
    executable: Option<OsString>,
    env: Option<Vec<(OsString, OsString)>>,
    stdin: Option<RawFd>,
    stdout: Redirect,
    stderr: Redirect,
    keep_fds: BTreeSet<RawFd>,
    flags: ExecFlags,
}

impl ExecRequest {
    /// Create a request for `argv`. The first element names the program;
    /// emptiness is rejected at launch time.
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Self {
            argv: argv.into_iter().map(|a| a.as_ref().to_os_string()).collect(),
            executable: None,
            env: None,
            stdin: None,
            stdout: Redirect::Null,
            stderr: Redirect::Null,
            keep_fds: BTreeSet::new(),
            flags: ExecFlags::NONE,
        }
    }

    /// Execute `path` instead of `argv[0]`, which is still passed to the
    /// program unchanged. No PATH search is done on `path`.
    pub fn executable(mut self, path: impl AsRef<OsStr>) -> Self {
        self.executable = Some(path.as_ref().to_os_string());
        self
    }

    /// Add one variable to the environment override, starting an empty
    /// override if none exists yet.
    pub fn env<K, V>(mut self, key: K, value: V) -> Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.env
            .get_or_insert_with(Vec::new)
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        for (k, v) in vars {
            self = self.env(k, v);
        }
        self
    }

    /// Replace the inherited environment with an empty one.
    pub fn env_clear(mut self) -> Self {
        self.env = Some(Vec::new());
        self
    }

    pub fn stdin(mut self, fd: Option<RawFd>) -> Self {
        self.stdin = fd;
        self
    }

    pub fn stdout(mut self, redirect: Redirect) -> Self {
        self.stdout = redirect;
        self
    }

    pub fn stderr(mut self, redirect: Redirect) -> Self {
        self.stderr = redirect;
        self
    }

    /// Keep `fd` open (and inheritable) across exec.
    pub fn keep_fd(mut self, fd: RawFd) -> Self {
        if fd > libc::STDERR_FILENO {
            self.keep_fds.insert(fd);
        }
        self
    }

    pub fn keep_fds<I: IntoIterator<Item = RawFd>>(mut self, fds: I) -> Self {
        for fd in fds {
            self = self.keep_fd(fd);
        }
        self
    }

    pub fn flags(mut self, flags: ExecFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn daemonize(mut self, on: bool) -> Self {
        if on {
            self.flags |= ExecFlags::DAEMONIZE;
        } else {
            self.flags = ExecFlags(self.flags.0 & !ExecFlags::DAEMONIZE.0);
        }
        self
    }

    pub fn nonblocking_output(mut self, on: bool) -> Self {
        if on {
            self.flags |= ExecFlags::NONBLOCKING_OUTPUT;
        } else {
            self.flags = ExecFlags(self.flags.0 & !ExecFlags::NONBLOCKING_OUTPUT.0);
        }
        self
    }

    pub fn argv(&self) -> &[OsString] {
        &self.argv
    }

    pub fn program(&self) -> Option<&OsStr> {
        self.argv.first().map(OsString::as_os_str)
    }

    pub fn executable_path(&self) -> Option<&OsStr> {
        self.executable.as_deref()
    }

    pub fn env_override(&self) -> Option<&[(OsString, OsString)]> {
        self.env.as_deref()
    }

    pub fn stdin_fd(&self) -> Option<RawFd> {
        self.stdin
    }

    pub fn stdout_redirect(&self) -> Redirect {
        self.stdout
    }

    pub fn stderr_redirect(&self) -> Redirect {
        self.stderr
    }

    pub fn kept_fds(&self) -> &BTreeSet<RawFd> {
        &self.keep_fds
    }

    pub fn exec_flags(&self) -> ExecFlags {
        self.flags
    }

    /// The argument vector joined with single spaces, for logs and errors.
    pub fn command_line(&self) -> String {
        CommandLine(&self.argv).to_string()
    }
}

struct CommandLine<'a>(&'a [OsString]);

impl fmt::Display for CommandLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine() {
        let flags = ExecFlags::DAEMONIZE | ExecFlags::NONBLOCKING_OUTPUT;
        assert!(flags.contains(ExecFlags::DAEMONIZE));
        assert!(flags.contains(ExecFlags::NONBLOCKING_OUTPUT));
        assert!(!ExecFlags::NONE.contains(ExecFlags::DAEMONIZE));
        assert!(ExecFlags::default().is_empty());
    }

    #[test]
    fn toggles_clear_single_flag() {
        let req = ExecRequest::new(["true"])
            .daemonize(true)
            .nonblocking_output(true)
            .daemonize(false);
        assert_eq!(req.exec_flags(), ExecFlags::NONBLOCKING_OUTPUT);
    }

    #[test]
    fn command_line_joins_arguments() {
        let req = ExecRequest::new(["sh", "-c", "echo hi"]);
        assert_eq!(req.command_line(), "sh -c echo hi");
        assert_eq!(req.program(), Some(OsStr::new("sh")));
    }

    #[test]
    fn env_builds_override() {
        let req = ExecRequest::new(["env"]);
        assert!(req.env_override().is_none());
        let req = req.env("A", "1").envs([("B", "2")]);
        let vars = req.env_override().unwrap();
        assert_eq!(vars.len(), 2);
        assert_eq!(vars[1].0, "B");
        assert!(ExecRequest::new(["env"]).env_clear().env_override().unwrap().is_empty());
    }

    #[test]
    fn keep_fd_ignores_standard_streams() {
        let req = ExecRequest::new(["true"]).keep_fds([0, 1, 2, 7, 7, 9]);
        assert_eq!(req.kept_fds().iter().copied().collect::<Vec<_>>(), vec![7, 9]);
    }

    #[test]
    fn defaults_bind_to_null() {
        let req = ExecRequest::new(["true"]);
        assert_eq!(req.stdout_redirect(), Redirect::Null);
        assert_eq!(req.stderr_redirect(), Redirect::Null);
        assert_eq!(req.stdin_fd(), None);
    }
}
