// crates/collector/src/lib.rs
//! Drain a child's stdout and stderr pipes into memory.
//!
//! [`drain`] multiplexes both read ends with `poll(2)` so a child that fills
//! one pipe while the caller is blocked on the other cannot deadlock.

use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsFd, OwnedFd};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use thiserror::Error;

/// Largest read issued per readiness event.
pub const CHUNK_SIZE: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        })
    }
}

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("unable to poll on child: {0}")]
    Poll(#[source] Errno),

    #[error("unable to read {stream} of child: {source}")]
    Read {
        stream: Stream,
        #[source]
        source: io::Error,
    },

    #[error("unknown poll response {events:?} on {stream} of child")]
    UnexpectedEvent { stream: Stream, events: PollFlags },
}

/// Everything a child wrote before closing its output pipes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CapturedOutput {
    pub fn stdout_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stderr_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }

    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

struct Source {
    stream: Stream,
    file: File,
    buf: Vec<u8>,
    done: bool,
}

impl Source {
    fn new(stream: Stream, fd: OwnedFd) -> Self {
        Self {
            stream,
            file: File::from(fd),
            buf: Vec::new(),
            done: false,
        }
    }

    fn dispatch(&mut self, events: PollFlags) -> Result<(), CollectError> {
        if events.is_empty() {
            return Ok(());
        }
        // Data may still be queued behind a hang-up; keep reading until EOF.
        if events.contains(PollFlags::POLLIN) {
            return self.read_chunk();
        }
        if events.contains(PollFlags::POLLHUP) {
            self.finish();
            return Ok(());
        }
        Err(CollectError::UnexpectedEvent {
            stream: self.stream,
            events,
        })
    }

    fn read_chunk(&mut self) -> Result<(), CollectError> {
        let mut chunk = [0u8; CHUNK_SIZE];
        loop {
            match self.file.read(&mut chunk) {
                Ok(0) => {
                    self.finish();
                    return Ok(());
                }
                Ok(n) => {
                    append(&mut self.buf, &chunk[..n]);
                    tracing::trace!(target: "debug::io", "read {n} bytes from {}", self.stream);
                    return Ok(());
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(source) => {
                    return Err(CollectError::Read {
                        stream: self.stream,
                        source,
                    });
                }
            }
        }
    }

    fn finish(&mut self) {
        self.done = true;
        tracing::trace!(
            target: "debug::io",
            "{} closed after {} bytes",
            self.stream,
            self.buf.len()
        );
    }
}

/// Append `data`, growing the allocation by at least half its size.
fn append(buf: &mut Vec<u8>, data: &[u8]) {
    let needed = buf.len() + data.len();
    if needed > buf.capacity() {
        let target = needed.max(buf.capacity() + buf.capacity() / 2);
        buf.reserve_exact(target - buf.len());
    }
    buf.extend_from_slice(data);
}

/// Read both pipes until each reports end-of-stream.
///
/// Either descriptor may be absent, in which case that stream is left empty.
/// Ownership of the descriptors moves in here and they are closed on return,
/// successful or not. Interrupted waits and reads are retried. Any other read
/// failure, or a readiness event that is neither readable nor hang-up,
/// aborts the drain and discards what was read so far.
pub fn drain(
    stdout: Option<OwnedFd>,
    stderr: Option<OwnedFd>,
) -> Result<CapturedOutput, CollectError> {
    let mut sources: Vec<Source> = [(Stream::Stdout, stdout), (Stream::Stderr, stderr)]
        .into_iter()
        .filter_map(|(stream, fd)| fd.map(|fd| Source::new(stream, fd)))
        .collect();

    loop {
        let pending: Vec<usize> = (0..sources.len()).filter(|&i| !sources[i].done).collect();
        if pending.is_empty() {
            break;
        }

        let mut fds: Vec<PollFd<'_>> = pending
            .iter()
            .map(|&i| PollFd::new(sources[i].file.as_fd(), PollFlags::POLLIN))
            .collect();
        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => {}
            Err(Errno::EINTR | Errno::EAGAIN) => continue,
            Err(err) => return Err(CollectError::Poll(err)),
        }
        let events: Vec<PollFlags> = fds
            .iter()
            .map(|fd| fd.revents().unwrap_or_else(PollFlags::empty))
            .collect();
        drop(fds);

        for (&i, events) in pending.iter().zip(events) {
            sources[i].dispatch(events)?;
        }
    }

    let mut output = CapturedOutput::default();
    for source in sources {
        match source.stream {
            Stream::Stdout => output.stdout = source.buf,
            Stream::Stderr => output.stderr = source.buf,
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn pipe_source(stream: Stream) -> (Source, File) {
        let (read, write) = nix::unistd::pipe().unwrap();
        (Source::new(stream, read), File::from(write))
    }

    #[test]
    fn growth_is_geometric() {
        let mut buf = Vec::new();
        append(&mut buf, &[1; 100]);
        let cap = buf.capacity();
        assert!(cap >= 100);
        append(&mut buf, &[2; 1]);
        assert!(buf.capacity() >= cap + cap / 2);
        assert_eq!(buf.len(), 101);
        assert_eq!(buf[100], 2);
    }

    #[test]
    fn readable_hangup_still_reads() {
        let (mut source, mut writer) = pipe_source(Stream::Stdout);
        writer.write_all(b"tail").unwrap();
        drop(writer);
        source
            .dispatch(PollFlags::POLLIN | PollFlags::POLLHUP)
            .unwrap();
        assert_eq!(source.buf, b"tail");
        assert!(!source.done);
        source
            .dispatch(PollFlags::POLLIN | PollFlags::POLLHUP)
            .unwrap();
        assert!(source.done);
    }

    #[test]
    fn bare_hangup_finishes() {
        let (mut source, _writer) = pipe_source(Stream::Stderr);
        source.dispatch(PollFlags::POLLHUP).unwrap();
        assert!(source.done);
        assert!(source.buf.is_empty());
    }

    #[test]
    fn invalid_descriptor_event_is_fatal() {
        let (mut source, _writer) = pipe_source(Stream::Stderr);
        let err = source.dispatch(PollFlags::POLLNVAL).unwrap_err();
        match err {
            CollectError::UnexpectedEvent { stream, events } => {
                assert_eq!(stream, Stream::Stderr);
                assert_eq!(events, PollFlags::POLLNVAL);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            source.dispatch(PollFlags::POLLERR),
            Err(CollectError::UnexpectedEvent { .. })
        ));
    }

    #[test]
    fn no_events_is_a_no_op() {
        let (mut source, _writer) = pipe_source(Stream::Stdout);
        source.dispatch(PollFlags::empty()).unwrap();
        assert!(!source.done);
    }

    #[test]
    fn lossy_views() {
        let out = CapturedOutput {
            stdout: b"ok\n".to_vec(),
            stderr: vec![0xff],
        };
        assert_eq!(out.stdout_lossy(), "ok\n");
        assert_eq!(out.stderr_lossy(), "\u{fffd}");
        assert!(!out.is_empty());
        assert!(CapturedOutput::default().is_empty());
    }
}
