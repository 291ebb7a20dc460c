// crates/launcher/src/os.rs
#![allow(unsafe_code)]

use std::os::fd::{BorrowedFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, FdFlag, OFlag, fcntl};
use nix::sys::signal::{SigSet, SigmaskHow, pthread_sigmask};
use nix::unistd::{ForkResult, fork};

/// Fork the current process.
///
/// # Safety
/// This wrapper is safe to call because the child branch of every caller
/// restricts itself to async-signal-safe calls and ends in `exec` or
/// `_exit`; it never returns into code that could take a lock held by
/// another thread of the parent.
pub(crate) fn fork_child() -> nix::Result<ForkResult> {
    // SAFETY: see the `Safety` section above.
    unsafe { fork() }
}

/// Blocks every signal for the calling thread until dropped.
pub(crate) struct SignalBlock {
    saved: SigSet,
}

impl SignalBlock {
    pub(crate) fn all() -> nix::Result<Self> {
        let mut saved = SigSet::empty();
        pthread_sigmask(
            SigmaskHow::SIG_SETMASK,
            Some(&SigSet::all()),
            Some(&mut saved),
        )?;
        Ok(Self { saved })
    }
}

impl Drop for SignalBlock {
    fn drop(&mut self) {
        if let Err(err) = pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&self.saved), None) {
            tracing::warn!(target: "debug::exec", "cannot restore signal mask: {err}");
        }
    }
}

/// Create a pipe whose both ends are close-on-exec.
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
pub(crate) fn cloexec_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    nix::unistd::pipe2(OFlag::O_CLOEXEC)
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
pub(crate) fn cloexec_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    use std::os::fd::AsFd;
    let (read, write) = nix::unistd::pipe()?;
    set_cloexec(read.as_fd())?;
    set_cloexec(write.as_fd())?;
    Ok((read, write))
}

#[cfg_attr(
    any(target_os = "linux", target_os = "android", target_os = "freebsd"),
    allow(dead_code)
)]
pub(crate) fn set_cloexec(fd: BorrowedFd<'_>) -> nix::Result<()> {
    let flags = FdFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFD)?);
    fcntl(fd, FcntlArg::F_SETFD(flags | FdFlag::FD_CLOEXEC))?;
    Ok(())
}

pub(crate) fn set_nonblocking(fd: BorrowedFd<'_>) -> nix::Result<()> {
    let mut flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    flags.insert(OFlag::O_NONBLOCK);
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}

/// Fail with `EBADF` unless `fd` is currently open.
pub(crate) fn check_open(fd: RawFd) -> nix::Result<()> {
    // SAFETY: F_GETFD only inspects the descriptor table.
    Errno::result(unsafe { libc::fcntl(fd, libc::F_GETFD) }).map(drop)
}

/// Upper bound on descriptor numbers, used when `close_range` is missing.
pub(crate) fn open_max() -> libc::c_int {
    // SAFETY: sysconf has no memory-safety preconditions.
    let max = unsafe { libc::sysconf(libc::_SC_OPEN_MAX) };
    if max <= 0 {
        1024
    } else {
        libc::c_int::try_from(max).unwrap_or(libc::c_int::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsFd;

    #[test]
    fn pipe_ends_are_cloexec() {
        let (read, write) = cloexec_pipe().unwrap();
        for fd in [read.as_fd(), write.as_fd()] {
            let flags = FdFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFD).unwrap());
            assert!(flags.contains(FdFlag::FD_CLOEXEC));
        }
    }

    #[test]
    fn closed_descriptor_fails_check() {
        let (_read, write) = cloexec_pipe().unwrap();
        let fd = std::os::fd::AsRawFd::as_raw_fd(&write);
        assert_eq!(check_open(fd), Ok(()));
        // SAFETY: duplicates the pipe far above the descriptors tests allocate.
        let high = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 900) };
        assert!(high >= 900);
        unsafe { libc::close(high) };
        assert_eq!(check_open(high), Err(Errno::EBADF));
        assert_eq!(check_open(-1), Err(Errno::EBADF));
    }

    #[test]
    fn nonblocking_sets_flag() {
        let (read, _write) = cloexec_pipe().unwrap();
        set_nonblocking(read.as_fd()).unwrap();
        let flags = OFlag::from_bits_truncate(fcntl(read.as_fd(), FcntlArg::F_GETFL).unwrap());
        assert!(flags.contains(OFlag::O_NONBLOCK));
    }

    #[test]
    fn signal_block_restores_mask() {
        let before = SigSet::thread_get_mask().unwrap();
        {
            let _block = SignalBlock::all().unwrap();
            let during = SigSet::thread_get_mask().unwrap();
            assert!(during.contains(nix::sys::signal::Signal::SIGTERM));
        }
        let after = SigSet::thread_get_mask().unwrap();
        assert_eq!(
            before.contains(nix::sys::signal::Signal::SIGTERM),
            after.contains(nix::sys::signal::Signal::SIGTERM)
        );
    }

    #[test]
    fn open_max_is_positive() {
        assert!(open_max() > 2);
    }
}
