// crates/logging/src/subscriber.rs
#![allow(missing_docs)]

use crate::flags::{LogFormat, SubscriberConfig};
use crate::formatter::ExecFormatter;
use crate::json_format::JsonFormatter;
use crate::sink::{FileWriter, LogWriter};
use std::fs::OpenOptions;
use std::io;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    EnvFilter,
    filter::Directive,
    fmt as tracing_fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

#[cfg(all(unix, any(feature = "syslog", feature = "journald")))]
use std::fmt;
#[cfg(all(unix, any(feature = "syslog", feature = "journald")))]
use std::os::unix::net::UnixDatagram;
#[cfg(all(unix, any(feature = "syslog", feature = "journald")))]
use std::path::PathBuf;
#[cfg(all(unix, any(feature = "syslog", feature = "journald")))]
use tracing::field::{Field, Visit};
#[cfg(all(unix, any(feature = "syslog", feature = "journald")))]
use tracing::{Event, Level, Subscriber};
#[cfg(all(unix, any(feature = "syslog", feature = "journald")))]
use tracing_subscriber::layer::Context;

/// Name events are filed under in syslog and the journal.
pub const IDENTIFIER: &str = "procrun";

#[cfg(all(unix, any(feature = "syslog", feature = "journald")))]
struct MessageVisitor {
    msg: String,
}

#[cfg(all(unix, any(feature = "syslog", feature = "journald")))]
impl MessageVisitor {
    fn push(&mut self, name: &str, value: &str) {
        if !self.msg.is_empty() {
            self.msg.push(' ');
        }
        if name != "message" {
            self.msg.push_str(name);
            self.msg.push('=');
        }
        self.msg.push_str(value);
    }

    fn render(event: &Event<'_>) -> String {
        let mut v = MessageVisitor { msg: String::new() };
        event.record(&mut v);
        if v.msg.is_empty() {
            v.msg.push_str(event.metadata().target());
        }
        v.msg
    }
}

#[cfg(all(unix, any(feature = "syslog", feature = "journald")))]
impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field.name(), value);
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field.name(), &format!("{value:?}"));
    }
}

#[cfg(all(unix, any(feature = "syslog", feature = "journald")))]
fn severity(level: Level) -> u8 {
    match level {
        Level::ERROR => 3,
        Level::WARN => 4,
        Level::INFO => 6,
        Level::DEBUG | Level::TRACE => 7,
    }
}

#[cfg(all(unix, any(feature = "syslog", feature = "journald")))]
fn connect(var: &str, default: &str) -> io::Result<UnixDatagram> {
    let path = std::env::var_os(var)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default));
    let sock = UnixDatagram::unbound()?;
    sock.connect(path)?;
    Ok(sock)
}

#[cfg(all(unix, feature = "syslog"))]
struct SyslogLayer {
    sock: UnixDatagram,
}

#[cfg(all(unix, feature = "syslog"))]
impl SyslogLayer {
    fn new() -> io::Result<Self> {
        Ok(Self {
            sock: connect("PROCRUN_SYSLOG_PATH", "/dev/log")?,
        })
    }
}

#[cfg(all(unix, feature = "syslog"))]
impl<S> Layer<S> for SyslogLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        // facility 1 (user)
        let pri = 8 + severity(*event.metadata().level());
        let pid = std::process::id();
        let data = format!("<{pri}>{IDENTIFIER}[{pid}]: {}", MessageVisitor::render(event));
        let _ = self.sock.send(data.as_bytes());
    }
}

#[cfg(all(unix, feature = "journald"))]
struct JournaldLayer {
    sock: UnixDatagram,
}

#[cfg(all(unix, feature = "journald"))]
impl JournaldLayer {
    fn new() -> io::Result<Self> {
        Ok(Self {
            sock: connect("PROCRUN_JOURNALD_PATH", "/run/systemd/journal/socket")?,
        })
    }
}

#[cfg(all(unix, feature = "journald"))]
impl<S> Layer<S> for JournaldLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let prio = severity(*event.metadata().level());
        let data = format!(
            "PRIORITY={prio}\nSYSLOG_IDENTIFIER={IDENTIFIER}\nMESSAGE={}\n",
            MessageVisitor::render(event)
        );
        let _ = self.sock.send(data.as_bytes());
    }
}

fn directive(spec: String) -> io::Result<Directive> {
    spec.parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

/// Level implied by `-v`/`-q` and any per-target flags.
fn base_level(cfg: &SubscriberConfig) -> LevelFilter {
    if cfg.quiet {
        return LevelFilter::ERROR;
    }
    let level = match cfg.verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    if !cfg.debug.is_empty() && level < LevelFilter::DEBUG {
        LevelFilter::DEBUG
    } else if !cfg.info.is_empty() && level < LevelFilter::INFO {
        LevelFilter::INFO
    } else {
        level
    }
}

/// Build a [`tracing`] subscriber from `cfg`.
///
/// `RUST_LOG` directives are honoured on top of the configured level. Fails
/// if the log file cannot be opened.
pub fn subscriber(cfg: SubscriberConfig) -> io::Result<Box<dyn tracing::Subscriber + Send + Sync>> {
    let level = base_level(&cfg);
    let SubscriberConfig {
        format,
        info,
        debug,
        quiet,
        stderr,
        log_file,
        syslog,
        journald,
        colored,
        timestamps,
        ..
    } = cfg;

    let mut filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    if !quiet {
        for flag in &info {
            filter = filter.add_directive(directive(format!("{}=info", flag.target()))?);
        }
        for flag in &debug {
            filter = filter.add_directive(directive(format!("{}=trace", flag.target()))?);
        }
    }

    let base = tracing_fmt::layer()
        .with_writer(LogWriter { mode: stderr })
        .with_ansi(colored);
    let fmt_layer = match format {
        LogFormat::Json => base.event_format(JsonFormatter::new(timestamps)).boxed(),
        LogFormat::Text => {
            let template = timestamps.then(|| "%t %m".to_string());
            base.event_format(ExecFormatter::new(template)).boxed()
        }
    };

    #[cfg(all(unix, feature = "syslog"))]
    let syslog_layer = if syslog {
        SyslogLayer::new().ok()
    } else {
        None
    };
    #[cfg(not(all(unix, feature = "syslog")))]
    let syslog_layer: Option<tracing_subscriber::layer::Identity> = {
        let _ = syslog;
        None
    };

    #[cfg(all(unix, feature = "journald"))]
    let journald_layer = if journald {
        JournaldLayer::new().ok()
    } else {
        None
    };
    #[cfg(not(all(unix, feature = "journald")))]
    let journald_layer: Option<tracing_subscriber::layer::Identity> = {
        let _ = journald;
        None
    };

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(syslog_layer)
        .with(journald_layer);

    let file_layer = match log_file {
        Some((path, fmt)) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let base = tracing_fmt::layer()
                .with_writer(FileWriter { file })
                .with_ansi(false);
            Some(match fmt.as_deref() {
                Some("json") => base.event_format(JsonFormatter::new(true)).boxed(),
                Some(template) => base
                    .event_format(ExecFormatter::new(Some(template.to_string())))
                    .boxed(),
                None => base
                    .event_format(ExecFormatter::new(Some("%t [%p] %m".to_string())))
                    .boxed(),
            })
        }
        None => None,
    };

    Ok(Box::new(registry.with(file_layer)))
}

/// Install the global [`tracing`] subscriber.
pub fn init(cfg: SubscriberConfig) -> io::Result<()> {
    subscriber(cfg)?
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{DebugFlag, InfoFlag};

    #[test]
    fn level_follows_verbosity_and_flags() {
        let cfg = |b: crate::SubscriberConfigBuilder| b.build();
        assert_eq!(base_level(&cfg(SubscriberConfig::builder())), LevelFilter::WARN);
        assert_eq!(
            base_level(&cfg(SubscriberConfig::builder().verbose(1))),
            LevelFilter::INFO
        );
        assert_eq!(
            base_level(&cfg(SubscriberConfig::builder().verbose(9))),
            LevelFilter::TRACE
        );
        assert_eq!(
            base_level(&cfg(SubscriberConfig::builder().info([InfoFlag::Cmd]))),
            LevelFilter::INFO
        );
        assert_eq!(
            base_level(&cfg(SubscriberConfig::builder().debug([DebugFlag::Io]))),
            LevelFilter::DEBUG
        );
        assert_eq!(
            base_level(&cfg(
                SubscriberConfig::builder().verbose(3).debug([DebugFlag::Io]).quiet(true)
            )),
            LevelFilter::ERROR
        );
    }

    #[test]
    fn bad_directive_is_invalid_input() {
        let err = directive("debug::cmd=loud".to_string()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
