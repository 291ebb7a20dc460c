// src/lib.rs
//! Run a program to completion and capture what it prints.
//!
//! [`run`] is the common entry point: it launches `argv` with stdout and
//! stderr captured, drains both pipes, reaps the child and maps its exit
//! status. [`run_request`] accepts a fully specified [`ExecRequest`] and
//! [`run_with_config`] additionally scopes the run under a subscriber built
//! from a [`RunConfig`].
//!
//! ```no_run
//! let out = procrun::run(["sh", "-c", "echo hello"], false).unwrap();
//! assert_eq!(out.output.stdout, b"hello\n");
//! ```

use std::ffi::OsStr;
use std::io;

use nix::errno::Errno;
use thiserror::Error;

mod config;
mod run;

pub use collector::{CHUNK_SIZE, CapturedOutput, CollectError, Stream};
pub use config::{RunConfig, RunConfigBuilder};
pub use launcher::{
    ChildHandle, ErrorSink, ExecError, ExecFlags, ExecRequest, ExitStatus, NopSink, Pid, Redirect,
    Signal, TracingSink, kill_process, launch, launch_with_sink,
};
pub use run::run_with_config;

/// Result of a completed run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunOutput {
    /// Raw exit status, present only when the caller asked for it.
    pub status: Option<ExitStatus>,
    pub output: CapturedOutput,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Launch(#[from] ExecError),

    #[error(transparent)]
    Collect(#[from] CollectError),

    #[error("cannot wait for child process '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: Errno,
    },

    #[error("'{command}' failed with {status}{}", stderr_suffix(.stderr))]
    Status {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("cannot set up logging: {0}")]
    Logging(#[source] io::Error),
}

fn stderr_suffix(stderr: &str) -> String {
    let stderr = stderr.trim_end();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

/// Run `argv` with stdout and stderr captured.
///
/// Without `want_raw_status` anything but a zero exit is an error carrying the
/// command line and captured stderr. With it, any status is returned in
/// [`RunOutput::status`] for the caller to interpret.
pub fn run<I, S>(argv: I, want_raw_status: bool) -> Result<RunOutput, RunError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let req = ExecRequest::new(argv)
        .stdout(Redirect::Pipe)
        .stderr(Redirect::Pipe);
    run_request(&req, want_raw_status)
}

/// Launch `req`, drain whatever pipes it asked for and reap it.
///
/// If draining fails the child is killed and reaped before the error is
/// returned.
pub fn run_request(req: &ExecRequest, want_raw_status: bool) -> Result<RunOutput, RunError> {
    let command = req.command_line();
    tracing::info!(target: "info::cmd", command = %command, "running {command}");

    let mut child = launcher::launch(req)?;
    let pid = child.pid();
    let (stdout, stderr) = child.take_pipes();
    let output = match collector::drain(stdout, stderr) {
        Ok(output) => output,
        Err(err) => {
            tracing::warn!(target: "debug::exit", "killing pid {pid} after failed drain");
            let _ = child.kill(Signal::SIGKILL);
            if let Err(e) = child.wait() {
                tracing::warn!(target: "debug::exit", "cannot reap pid {pid}: {e}");
            }
            return Err(err.into());
        }
    };

    let status = child.wait().map_err(|source| RunError::Wait {
        program: req
            .program()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default(),
        source,
    })?;

    log_output("stdout", &output.stdout);
    log_output("stderr", &output.stderr);
    tracing::info!(
        target: "info::exit",
        command = %command,
        pid = pid.as_raw(),
        status = %status,
        "{command} finished with {status}"
    );

    if !want_raw_status && !status.success() {
        return Err(RunError::Status {
            command,
            status,
            stderr: output.stderr_lossy().into_owned(),
        });
    }
    Ok(RunOutput {
        status: want_raw_status.then_some(status),
        output,
    })
}

fn log_output(stream: &str, data: &[u8]) {
    if data.is_empty() {
        return;
    }
    tracing::debug!(
        target: "debug::cmd",
        "{stream} ({}): {}",
        logging::human_bytes(data.len() as u64),
        logging::escape_bytes(data, false)
    );
}
