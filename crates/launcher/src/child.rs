// crates/launcher/src/child.rs

use std::fmt;
use std::os::fd::OwnedFd;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;

/// How a child terminated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitStatus {
    /// Normal exit with the given code.
    Exited(i32),
    /// Killed by the given signal number.
    Signaled(i32),
}

impl ExitStatus {
    pub fn success(self) -> bool {
        self == ExitStatus::Exited(0)
    }

    pub fn code(self) -> Option<i32> {
        match self {
            ExitStatus::Exited(code) => Some(code),
            ExitStatus::Signaled(_) => None,
        }
    }

    pub fn signal(self) -> Option<i32> {
        match self {
            ExitStatus::Exited(_) => None,
            ExitStatus::Signaled(signo) => Some(signo),
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exit status {code}"),
            ExitStatus::Signaled(signo) => match Signal::try_from(*signo) {
                Ok(sig) => write!(f, "signal {signo} ({sig})"),
                Err(_) => write!(f, "signal {signo}"),
            },
        }
    }
}

/// A started child process.
///
/// Dropping the handle does not reap the child; call [`ChildHandle::wait`].
#[derive(Debug)]
pub struct ChildHandle {
    pid: Pid,
    stdout: Option<OwnedFd>,
    stderr: Option<OwnedFd>,
}

impl ChildHandle {
    pub(crate) fn new(pid: Pid, stdout: Option<OwnedFd>, stderr: Option<OwnedFd>) -> Self {
        Self {
            pid,
            stdout,
            stderr,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn take_stdout(&mut self) -> Option<OwnedFd> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<OwnedFd> {
        self.stderr.take()
    }

    /// Take both capture pipes, stdout first.
    pub fn take_pipes(&mut self) -> (Option<OwnedFd>, Option<OwnedFd>) {
        (self.stdout.take(), self.stderr.take())
    }

    pub fn kill(&self, signal: Signal) -> nix::Result<()> {
        kill_process(self.pid, signal)
    }

    /// Wait for the child to terminate and collect its status. Any capture
    /// pipes still held by the handle are closed first.
    pub fn wait(mut self) -> nix::Result<ExitStatus> {
        drop(self.take_pipes());
        let status = reap(self.pid)?;
        tracing::debug!(target: "debug::exit", "pid {} finished with {status}", self.pid);
        Ok(status)
    }
}

/// Send `signal` to `pid`. `None` only probes for existence.
///
/// Pids below 1 would address a process group or every process, so they are
/// rejected with `ESRCH`.
pub fn kill_process(pid: Pid, signal: impl Into<Option<Signal>>) -> nix::Result<()> {
    if pid.as_raw() < 1 {
        return Err(Errno::ESRCH);
    }
    kill(pid, signal.into())
}

/// Block until `pid` terminates, retrying interrupted waits.
pub(crate) fn reap(pid: Pid) -> nix::Result<ExitStatus> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(ExitStatus::Exited(code)),
            Ok(WaitStatus::Signaled(_, sig, _)) => return Ok(ExitStatus::Signaled(sig as i32)),
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_accessors() {
        let ok = ExitStatus::Exited(0);
        assert!(ok.success());
        assert_eq!(ok.code(), Some(0));
        let failed = ExitStatus::Exited(7);
        assert!(!failed.success());
        assert_eq!(failed.to_string(), "exit status 7");
        let killed = ExitStatus::Signaled(libc::SIGKILL);
        assert!(!killed.success());
        assert_eq!(killed.code(), None);
        assert_eq!(killed.signal(), Some(libc::SIGKILL));
        assert_eq!(killed.to_string(), "signal 9 (SIGKILL)");
    }

    #[test]
    fn kill_rejects_non_positive_pids() {
        assert_eq!(kill_process(Pid::from_raw(0), Signal::SIGTERM), Err(Errno::ESRCH));
        assert_eq!(kill_process(Pid::from_raw(-1), None), Err(Errno::ESRCH));
    }

    #[test]
    fn kill_probe_finds_self() {
        assert_eq!(kill_process(Pid::this(), None), Ok(()));
    }
}
