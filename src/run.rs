// src/run.rs

use std::ffi::OsStr;

use tracing::subscriber::with_default;

use crate::config::RunConfig;
use crate::{RunError, RunOutput, run_request};
use logging::subscriber;

/// Run `argv` as described by `cfg`, logging through a subscriber built from
/// the same configuration for the duration of the call.
pub fn run_with_config<I, S>(argv: I, cfg: &RunConfig) -> Result<RunOutput, RunError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let sub = subscriber(cfg.subscriber_config()).map_err(RunError::Logging)?;
    let req = cfg.request(argv);
    with_default(sub, || run_request(&req, cfg.raw_status))
}
