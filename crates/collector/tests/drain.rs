// crates/collector/tests/drain.rs
use std::fs::File;
use std::io::Write;
use std::os::fd::OwnedFd;
use std::process::{Command, Stdio};
use std::thread;

use collector::{CHUNK_SIZE, drain};
use nix::fcntl::{FcntlArg, OFlag, fcntl};

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn writer_thread(data: Vec<u8>, step: usize) -> (OwnedFd, thread::JoinHandle<()>) {
    let (read, write) = nix::unistd::pipe().unwrap();
    let handle = thread::spawn(move || {
        let mut file = File::from(write);
        for piece in data.chunks(step) {
            file.write_all(piece).unwrap();
        }
    });
    (read, handle)
}

#[test]
fn large_stdout_is_captured_exactly() {
    let data = pattern(CHUNK_SIZE * 37 + 13);
    let (read, handle) = writer_thread(data.clone(), 333);
    let out = drain(Some(read), None).unwrap();
    handle.join().unwrap();
    assert_eq!(out.stdout, data);
    assert!(out.stderr.is_empty());
}

#[test]
fn stderr_only() {
    let (read, handle) = writer_thread(b"warning\n".to_vec(), 64);
    let out = drain(None, Some(read)).unwrap();
    handle.join().unwrap();
    assert!(out.stdout.is_empty());
    assert_eq!(out.stderr, b"warning\n");
}

#[test]
fn no_descriptors_yields_empty_output() {
    let out = drain(None, None).unwrap();
    assert!(out.is_empty());
}

#[test]
fn nonblocking_descriptors_drain_identically() {
    let data = pattern(CHUNK_SIZE * 8 + 1);
    let (read, handle) = writer_thread(data.clone(), 7);
    let flags = OFlag::from_bits_truncate(fcntl(&read, FcntlArg::F_GETFL).unwrap());
    fcntl(&read, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).unwrap();
    let out = drain(Some(read), None).unwrap();
    handle.join().unwrap();
    assert_eq!(out.stdout, data);
}

#[test]
fn interleaved_child_output_does_not_deadlock() {
    // Both streams exceed the pipe buffer, so draining one at a time would
    // stall the child.
    let script = "i=0; while [ $i -lt 5000 ]; do \
                  echo out-$i-xxxxxxxxxxxxxxxxxxxxxxxx; \
                  echo err-$i-yyyyyyyyyyyyyyyyyyyyyyyy >&2; \
                  i=$((i+1)); done";
    let mut child = Command::new("sh")
        .args(["-c", script])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    let stdout = child.stdout.take().map(OwnedFd::from);
    let stderr = child.stderr.take().map(OwnedFd::from);
    let out = drain(stdout, stderr).unwrap();
    assert!(child.wait().unwrap().success());

    let expected_out: String = (0..5000)
        .map(|i| format!("out-{i}-xxxxxxxxxxxxxxxxxxxxxxxx\n"))
        .collect();
    let expected_err: String = (0..5000)
        .map(|i| format!("err-{i}-yyyyyyyyyyyyyyyyyyyyyyyy\n"))
        .collect();
    assert_eq!(out.stdout_lossy(), expected_out);
    assert_eq!(out.stderr_lossy(), expected_err);
}
