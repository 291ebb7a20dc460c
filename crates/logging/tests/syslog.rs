// crates/logging/tests/syslog.rs
#![cfg(all(unix, feature = "syslog"))]

use logging::{SubscriberConfig, subscriber};
use serial_test::serial;
use std::os::unix::net::UnixDatagram;
use tempfile::tempdir;
use tracing::subscriber::with_default;
use tracing::warn;

#[test]
#[serial]
fn syslog_emits_message() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sock");
    let server = UnixDatagram::bind(&path).unwrap();
    // SAFETY: serialised with every other test touching the environment.
    unsafe { std::env::set_var("PROCRUN_SYSLOG_PATH", &path) };
    let cfg = SubscriberConfig::builder().syslog(true).build();
    let sub = subscriber(cfg);
    unsafe { std::env::remove_var("PROCRUN_SYSLOG_PATH") };
    with_default(sub.unwrap(), || {
        warn!(command = "false", "command failed");
    });
    let mut buf = [0u8; 256];
    let (n, _) = server.recv_from(&mut buf).unwrap();
    let msg = std::str::from_utf8(&buf[..n]).unwrap();
    let expected = format!("<12>procrun[{}]: command failed command=false", std::process::id());
    assert_eq!(msg, expected);
}
