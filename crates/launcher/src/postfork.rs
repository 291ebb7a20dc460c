// crates/launcher/src/postfork.rs
//! Code that runs in the forked child between `fork` and `exec`.
//!
//! Everything here is restricted to async-signal-safe system calls on data
//! prepared by the parent. No allocation, no locks, no `tracing`, and no
//! access to the caller's error sink: the child is a disjoint copy of the
//! parent and nothing it mutates is ever seen by the caller.
#![allow(unsafe_code)]

use std::mem;
use std::os::fd::RawFd;
use std::ptr;

use libc::c_int;
use nix::errno::Errno;

use crate::error::ChildStage;
use crate::image::ExecImage;
use crate::spawn::EXEC_FAILED_STATUS;

#[cfg(any(target_os = "linux", target_os = "android"))]
const NSIG: c_int = 65;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const NSIG: c_int = 33;

/// Descriptor layout and options the child acts on, resolved before fork.
pub(crate) struct ChildPlan<'a> {
    pub(crate) stdin: RawFd,
    pub(crate) stdout: Option<RawFd>,
    pub(crate) stderr: Option<RawFd>,
    pub(crate) status: RawFd,
    /// Sorted, deduplicated descriptors that survive the close sweep.
    pub(crate) preserve: &'a [RawFd],
    /// Caller keep-set; these also lose close-on-exec.
    pub(crate) keep: &'a [RawFd],
    pub(crate) open_max: c_int,
    pub(crate) daemonize: bool,
    pub(crate) default_action: libc::sigaction,
    pub(crate) empty_mask: libc::sigset_t,
}

impl ChildPlan<'_> {
    pub(crate) fn signal_defaults() -> (libc::sigaction, libc::sigset_t) {
        // SAFETY: both structs are plain C data for which all-zero is a valid
        // starting value; sigemptyset initialises the masks properly.
        unsafe {
            let mut action: libc::sigaction = mem::zeroed();
            action.sa_sigaction = libc::SIG_DFL;
            action.sa_flags = 0;
            libc::sigemptyset(&mut action.sa_mask);
            let mut empty: libc::sigset_t = mem::zeroed();
            libc::sigemptyset(&mut empty);
            (action, empty)
        }
    }
}

/// Turn the freshly forked child into the requested program. Never returns.
///
/// # Safety
/// Must be called exactly once, in the child branch of `fork`, with the
/// parent's signals still blocked.
pub(crate) unsafe fn exec_child(image: &ExecImage, plan: &ChildPlan<'_>) -> ! {
    // SAFETY: every call below is async-signal-safe and operates on
    // descriptors and buffers owned by this process image.
    unsafe {
        for signo in 1..NSIG {
            if signo == libc::SIGKILL || signo == libc::SIGSTOP {
                continue;
            }
            // Invalid or reserved signal numbers fail with EINVAL, which is
            // expected and ignored.
            libc::sigaction(signo, &plan.default_action, ptr::null_mut());
        }
        if libc::pthread_sigmask(libc::SIG_SETMASK, &plan.empty_mask, ptr::null_mut()) != 0 {
            fail(plan.status, ChildStage::SignalMask, Errno::last());
        }

        close_descriptors(plan.preserve, plan.open_max);
        for &fd in plan.keep {
            clear_cloexec(fd);
        }

        if plan.daemonize {
            if libc::setsid() < 0 {
                fail(plan.status, ChildStage::Setsid, Errno::last());
            }
            if libc::chdir(c"/".as_ptr()) < 0 {
                fail(plan.status, ChildStage::Chdir, Errno::last());
            }
            match libc::fork() {
                -1 => fail(plan.status, ChildStage::Fork, Errno::last()),
                0 => {}
                _ => libc::_exit(0),
            }
        }

        if let Err(errno) = bind_standard_streams(plan) {
            fail(plan.status, ChildStage::Redirect, errno);
        }

        image.exec();

        let errno = Errno::last();
        write_all(libc::STDERR_FILENO, image.diagnostic());
        write_decimal(libc::STDERR_FILENO, errno as i32);
        write_all(libc::STDERR_FILENO, b"\n");
        report(plan.status, ChildStage::Exec, errno);
        libc::_exit(EXEC_FAILED_STATUS)
    }
}

/// Move input, stdout and stderr onto 0, 1 and 2 and drop the originals.
unsafe fn bind_standard_streams(plan: &ChildPlan<'_>) -> Result<(), Errno> {
    let targets = [
        (Some(plan.stdin), libc::STDIN_FILENO),
        (plan.stdout, libc::STDOUT_FILENO),
        (plan.stderr, libc::STDERR_FILENO),
    ];

    // A source sitting on a low descriptor would be clobbered by an earlier
    // dup2, so lift it above stderr first.
    let mut sources = [None; 3];
    for (slot, (src, target)) in sources.iter_mut().zip(targets) {
        let Some(fd) = src else { continue };
        // SAFETY: fcntl on a descriptor number has no memory preconditions.
        let fd = if fd <= libc::STDERR_FILENO && fd != target {
            let lifted = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 3) };
            if lifted < 0 {
                return Err(Errno::last());
            }
            lifted
        } else {
            fd
        };
        *slot = Some(fd);
    }

    for (src, (_, target)) in sources.iter().zip(targets) {
        let Some(fd) = *src else { continue };
        if fd == target {
            // dup2 onto itself keeps close-on-exec, so clear it explicitly.
            unsafe { clear_cloexec(fd) };
        } else if unsafe { libc::dup2(fd, target) } < 0 {
            return Err(Errno::last());
        }
    }

    for (i, src) in sources.iter().enumerate() {
        let Some(fd) = *src else { continue };
        if fd <= libc::STDERR_FILENO || plan.keep.binary_search(&fd).is_ok() {
            continue;
        }
        if sources[..i].contains(&Some(fd)) {
            continue;
        }
        unsafe { libc::close(fd) };
    }
    Ok(())
}

/// Close every descriptor from 3 upward that is not in `preserve`.
unsafe fn close_descriptors(preserve: &[RawFd], open_max: c_int) {
    let mut low: c_int = libc::STDERR_FILENO + 1;
    for &fd in preserve {
        if fd < low {
            continue;
        }
        if fd > low {
            unsafe { close_span(low, (fd - 1) as libc::c_uint, open_max) };
        }
        low = fd + 1;
    }
    unsafe { close_span(low, libc::c_uint::MAX, open_max) };
}

unsafe fn close_span(first: c_int, last: libc::c_uint, open_max: c_int) {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        // SAFETY: close_range only touches the descriptor table.
        let rc = unsafe {
            libc::syscall(
                libc::SYS_close_range,
                first as libc::c_uint,
                last,
                0 as libc::c_uint,
            )
        };
        if rc == 0 {
            return;
        }
    }
    let end = if last >= open_max as libc::c_uint {
        open_max
    } else {
        last as c_int + 1
    };
    for fd in first..end {
        unsafe { libc::close(fd) };
    }
}

unsafe fn clear_cloexec(fd: RawFd) {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags >= 0 && flags & libc::FD_CLOEXEC != 0 {
            libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC);
        }
    }
}

/// Report a setup failure to the parent and exit.
unsafe fn fail(status: RawFd, stage: ChildStage, errno: Errno) -> ! {
    unsafe {
        report(status, stage, errno);
        libc::_exit(1)
    }
}

/// Write the stage code and errno to the status pipe as one 8-byte record.
unsafe fn report(status: RawFd, stage: ChildStage, errno: Errno) {
    let mut record = [0u8; 8];
    record[..4].copy_from_slice(&stage.code().to_ne_bytes());
    record[4..].copy_from_slice(&(errno as i32).to_ne_bytes());
    unsafe { write_all(status, &record) };
}

unsafe fn write_all(fd: RawFd, mut buf: &[u8]) {
    while !buf.is_empty() {
        let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
        if n < 0 {
            if Errno::last() == Errno::EINTR {
                continue;
            }
            return;
        }
        if n == 0 {
            return;
        }
        buf = &buf[n as usize..];
    }
}

/// Format `value` into a stack buffer and write it; no allocation.
unsafe fn write_decimal(fd: RawFd, value: i32) {
    let mut digits = [0u8; 12];
    let mut pos = digits.len();
    let negative = value < 0;
    let mut n = value.unsigned_abs();
    loop {
        pos -= 1;
        digits[pos] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    if negative {
        pos -= 1;
        digits[pos] = b'-';
    }
    unsafe { write_all(fd, &digits[pos..]) };
}
