// crates/launcher/src/spawn.rs
#![allow(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::unistd::{ForkResult, Pid};

use crate::child::{ChildHandle, reap};
use crate::error::{ChildStage, ExecError};
use crate::image::ExecImage;
use crate::os::{self, SignalBlock};
use crate::postfork::{ChildPlan, exec_child};
use crate::sink::{ErrorSink, TracingSink};
use crate::{ExecFlags, ExecRequest, Redirect};

/// Device bound to standard streams that are neither captured nor inherited.
pub const NULL_DEVICE: &str = "/dev/null";

/// Exit status of a child whose `exec` failed.
pub const EXEC_FAILED_STATUS: i32 = 127;

const STATUS_RECORD_LEN: usize = 8;

/// Start the program described by `req`, reporting fork failures through
/// [`TracingSink`].
pub fn launch(req: &ExecRequest) -> Result<ChildHandle, ExecError> {
    launch_with_sink(req, &TracingSink)
}

/// Start the program described by `req`.
///
/// The returned handle owns the child's pid and the read ends of any
/// [`Redirect::Pipe`] streams. With [`ExecFlags::DAEMONIZE`] the pid belongs
/// to the short-lived intermediate process; the program itself is adopted by
/// init and never becomes the caller's child.
///
/// `sink` is only consulted in the parent, and only when `fork` itself fails.
pub fn launch_with_sink(
    req: &ExecRequest,
    sink: &dyn ErrorSink,
) -> Result<ChildHandle, ExecError> {
    let image = ExecImage::new(req)?;
    let flags = req.exec_flags();
    tracing::debug!(target: "debug::cmd", "launching {}", req.command_line());

    // A closed keep fd could be reused below for the null device, a capture
    // pipe or the status pipe, and the child would then inherit it.
    for &fd in req.kept_fds() {
        os::check_open(fd).map_err(|source| ExecError::KeepFd { fd, source })?;
    }

    let block = SignalBlock::all().map_err(ExecError::SignalMask)?;

    let null = OpenOptions::new()
        .read(true)
        .write(true)
        .open(NULL_DEVICE)
        .map_err(|source| ExecError::NullDevice {
            path: NULL_DEVICE,
            source,
        })?;
    let nonblocking = flags.contains(ExecFlags::NONBLOCKING_OUTPUT);
    let stdout = Target::prepare(req.stdout_redirect(), nonblocking)?;
    let stderr = Target::prepare(req.stderr_redirect(), nonblocking)?;
    let (status_read, status_write) = os::cloexec_pipe().map_err(ExecError::Pipe)?;

    let null_fd = null.as_raw_fd();
    let stdin_fd = req.stdin_fd().unwrap_or(null_fd);
    let stdout_fd = stdout.child_fd(null_fd);
    let stderr_fd = stderr.child_fd(null_fd);
    let keep: Vec<RawFd> = req.kept_fds().iter().copied().collect();
    let mut preserve = keep.clone();
    preserve.extend([stdin_fd, null_fd, status_write.as_raw_fd()]);
    preserve.extend(stdout_fd);
    preserve.extend(stderr_fd);
    preserve.sort_unstable();
    preserve.dedup();

    let (default_action, empty_mask) = ChildPlan::signal_defaults();
    let plan = ChildPlan {
        stdin: stdin_fd,
        stdout: stdout_fd,
        stderr: stderr_fd,
        status: status_write.as_raw_fd(),
        preserve: &preserve,
        keep: &keep,
        open_max: os::open_max(),
        daemonize: flags.contains(ExecFlags::DAEMONIZE),
        default_action,
        empty_mask,
    };

    let pid = match os::fork_child() {
        Ok(ForkResult::Parent { child }) => child,
        // SAFETY: this is the child branch of the fork above and every signal
        // is still blocked.
        Ok(ForkResult::Child) => unsafe { exec_child(&image, &plan) },
        Err(errno) => {
            let err = ExecError::Fork(errno);
            sink.report(&err);
            return Err(err);
        }
    };

    drop(null);
    drop(status_write);
    let stdout = stdout.into_read_end();
    let stderr = stderr.into_read_end();
    drop(block);

    match read_status(status_read) {
        Ok(None) => {
            tracing::debug!(target: "debug::exec", "started {} as pid {pid}", image.program_name());
            Ok(ChildHandle::new(pid, stdout, stderr))
        }
        Ok(Some((stage, source))) => {
            discard(pid);
            Err(match stage {
                ChildStage::Exec => ExecError::Exec {
                    program: image.program_name(),
                    source,
                },
                stage => ExecError::Child { stage, source },
            })
        }
        Err(err) => {
            let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGKILL);
            discard(pid);
            Err(ExecError::Status(err))
        }
    }
}

/// How one output stream is wired up before fork.
enum Target {
    Inherit,
    Null,
    Fd(RawFd),
    Pipe { read: OwnedFd, write: OwnedFd },
}

impl Target {
    fn prepare(redirect: Redirect, nonblocking: bool) -> Result<Self, ExecError> {
        Ok(match redirect {
            Redirect::Inherit => Target::Inherit,
            Redirect::Null => Target::Null,
            Redirect::Fd(fd) => Target::Fd(fd),
            Redirect::Pipe => {
                let (read, write) = os::cloexec_pipe().map_err(ExecError::Pipe)?;
                if nonblocking {
                    os::set_nonblocking(read.as_fd()).map_err(|source| ExecError::Fcntl {
                        flag: "O_NONBLOCK",
                        source,
                    })?;
                }
                Target::Pipe { read, write }
            }
        })
    }

    /// Descriptor the child duplicates onto the stream, if any.
    fn child_fd(&self, null: RawFd) -> Option<RawFd> {
        match self {
            Target::Inherit => None,
            Target::Null => Some(null),
            Target::Fd(fd) => Some(*fd),
            Target::Pipe { write, .. } => Some(write.as_raw_fd()),
        }
    }

    /// Close the write end in the parent and keep the read end.
    fn into_read_end(self) -> Option<OwnedFd> {
        match self {
            Target::Pipe { read, .. } => Some(read),
            _ => None,
        }
    }
}

/// Read the child's setup status. `None` means the status pipe reached EOF
/// without a record, i.e. exec succeeded.
fn read_status(fd: OwnedFd) -> io::Result<Option<(ChildStage, Errno)>> {
    let mut file = File::from(fd);
    let mut record = [0u8; STATUS_RECORD_LEN];
    let mut filled = 0;
    while filled < record.len() {
        match file.read(&mut record[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    if filled == 0 {
        return Ok(None);
    }
    if filled < record.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "truncated child status record",
        ));
    }
    let (stage, errno) = record.split_at(4);
    let stage = u32::from_ne_bytes([stage[0], stage[1], stage[2], stage[3]]);
    let errno = i32::from_ne_bytes([errno[0], errno[1], errno[2], errno[3]]);
    let stage = ChildStage::from_code(stage).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown child setup stage {stage}"),
        )
    })?;
    Ok(Some((stage, Errno::from_raw(errno))))
}

/// Reap a child that failed during setup so it does not linger as a zombie.
fn discard(pid: Pid) {
    match reap(pid) {
        Ok(status) => {
            tracing::debug!(target: "debug::exit", "reaped failed child {pid}: {status}");
        }
        Err(err) => {
            tracing::warn!(target: "debug::exit", "cannot reap failed child {pid}: {err}");
        }
    }
}
