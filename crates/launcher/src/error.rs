// crates/launcher/src/error.rs

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::os::fd::RawFd;

use nix::errno::Errno;
use thiserror::Error;

/// Step of the post-fork child setup that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildStage {
    SignalMask,
    Redirect,
    Setsid,
    Chdir,
    Fork,
    Exec,
}

impl ChildStage {
    pub(crate) const fn code(self) -> u32 {
        match self {
            ChildStage::SignalMask => 1,
            ChildStage::Redirect => 2,
            ChildStage::Setsid => 3,
            ChildStage::Chdir => 4,
            ChildStage::Fork => 5,
            ChildStage::Exec => 6,
        }
    }

    pub(crate) const fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(ChildStage::SignalMask),
            2 => Some(ChildStage::Redirect),
            3 => Some(ChildStage::Setsid),
            4 => Some(ChildStage::Chdir),
            5 => Some(ChildStage::Fork),
            6 => Some(ChildStage::Exec),
            _ => None,
        }
    }
}

impl fmt::Display for ChildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChildStage::SignalMask => "cannot unblock signals",
            ChildStage::Redirect => "failed to set up standard stream",
            ChildStage::Setsid => "cannot become session leader",
            ChildStage::Chdir => "cannot change to root directory",
            ChildStage::Fork => "cannot fork daemon process",
            ChildStage::Exec => "cannot execute binary",
        };
        f.write_str(s)
    }
}

/// Failure to get a child process running.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("empty argument vector")]
    EmptyArgv,

    #[error("argument contains a nul byte: {0:?}")]
    Nul(OsString),

    #[error("descriptor {fd} to keep is not open: {source}")]
    KeepFd {
        fd: RawFd,
        #[source]
        source: Errno,
    },

    #[error("cannot block signals: {0}")]
    SignalMask(#[source] Errno),

    #[error("cannot open {path}: {source}")]
    NullDevice {
        path: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("cannot create pipe: {0}")]
    Pipe(#[source] Errno),

    #[error("failed to set {flag} file descriptor flag: {source}")]
    Fcntl {
        flag: &'static str,
        #[source]
        source: Errno,
    },

    #[error("cannot fork child process: {0}")]
    Fork(#[source] Errno),

    #[error("cannot execute binary '{program}': {source}")]
    Exec {
        program: String,
        #[source]
        source: Errno,
    },

    #[error("{stage}: {source}")]
    Child {
        stage: ChildStage,
        #[source]
        source: Errno,
    },

    #[error("cannot read child setup status: {0}")]
    Status(#[source] io::Error),
}

impl ExecError {
    /// The OS error code behind this failure, if there is one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            ExecError::EmptyArgv | ExecError::Nul(_) => None,
            ExecError::SignalMask(e)
            | ExecError::Pipe(e)
            | ExecError::Fork(e)
            | ExecError::Fcntl { source: e, .. }
            | ExecError::KeepFd { source: e, .. }
            | ExecError::Exec { source: e, .. }
            | ExecError::Child { source: e, .. } => Some(*e as i32),
            ExecError::NullDevice { source, .. } | ExecError::Status(source) => {
                source.raw_os_error()
            }
        }
    }
}

impl From<ExecError> for io::Error {
    fn from(err: ExecError) -> Self {
        let kind = match &err {
            ExecError::EmptyArgv | ExecError::Nul(_) => io::ErrorKind::InvalidInput,
            ExecError::Exec {
                source: Errno::ENOENT,
                ..
            } => io::ErrorKind::NotFound,
            ExecError::Exec {
                source: Errno::EACCES,
                ..
            } => io::ErrorKind::PermissionDenied,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
