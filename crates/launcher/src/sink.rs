// crates/launcher/src/sink.rs
use crate::error::ExecError;

/// Receiver for launch failures the launcher reports on its own.
///
/// Only the parent side ever calls into a sink. The forked child runs in a
/// disjoint copy of the address space and never touches it.
pub trait ErrorSink: Send + Sync {
    fn report(&self, err: &ExecError);
}

/// Forwards reports to `tracing` at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, err: &ExecError) {
        tracing::error!(target: "debug::exec", "{err}");
    }
}

/// Discards every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopSink;

impl ErrorSink for NopSink {
    fn report(&self, _err: &ExecError) {}
}

impl<F> ErrorSink for F
where
    F: Fn(&ExecError) + Send + Sync,
{
    fn report(&self, err: &ExecError) {
        self(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn closure_receives_reports() {
        let seen = Mutex::new(Vec::new());
        let sink = |err: &ExecError| seen.lock().unwrap().push(err.to_string());
        let dyn_sink: &dyn ErrorSink = &sink;
        dyn_sink.report(&ExecError::EmptyArgv);
        NopSink.report(&ExecError::EmptyArgv);
        assert_eq!(*seen.lock().unwrap(), vec!["empty argument vector".to_string()]);
    }
}
