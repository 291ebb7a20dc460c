// crates/logging/src/flags.rs
#![allow(missing_docs)]

use clap::ValueEnum;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum, Default)]
#[clap(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, ValueEnum)]
#[clap(rename_all = "kebab-case")]
pub enum InfoFlag {
    /// Each command as it is run.
    Cmd,
    /// How each command finished.
    Exit,
}

impl InfoFlag {
    pub const fn as_str(self) -> &'static str {
        match self {
            InfoFlag::Cmd => "cmd",
            InfoFlag::Exit => "exit",
        }
    }

    pub const fn target(self) -> &'static str {
        match self {
            InfoFlag::Cmd => "info::cmd",
            InfoFlag::Exit => "info::exit",
        }
    }
}

impl From<&InfoFlag> for InfoFlag {
    fn from(flag: &InfoFlag) -> Self {
        *flag
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, ValueEnum)]
#[clap(rename_all = "kebab-case")]
pub enum DebugFlag {
    /// Command lines and captured output.
    Cmd,
    /// Fork, exec and child setup.
    Exec,
    /// Reaping and exit statuses.
    Exit,
    /// Pipe reads.
    Io,
}

impl DebugFlag {
    pub const fn as_str(self) -> &'static str {
        match self {
            DebugFlag::Cmd => "cmd",
            DebugFlag::Exec => "exec",
            DebugFlag::Exit => "exit",
            DebugFlag::Io => "io",
        }
    }

    pub const fn target(self) -> &'static str {
        match self {
            DebugFlag::Cmd => "debug::cmd",
            DebugFlag::Exec => "debug::exec",
            DebugFlag::Exit => "debug::exit",
            DebugFlag::Io => "debug::io",
        }
    }
}

impl From<&DebugFlag> for DebugFlag {
    fn from(flag: &DebugFlag) -> Self {
        *flag
    }
}

/// Which events go to stderr rather than stdout.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum, Default)]
#[clap(rename_all = "kebab-case")]
pub enum StderrMode {
    /// Warnings and errors on stderr, everything else on stdout.
    #[clap(alias = "e")]
    Errors,
    /// Everything on stderr.
    #[clap(alias = "a")]
    #[default]
    All,
}

#[derive(Clone, Debug)]
pub struct SubscriberConfig {
    pub format: LogFormat,
    pub verbose: u8,
    pub info: Vec<InfoFlag>,
    pub debug: Vec<DebugFlag>,
    pub quiet: bool,
    pub stderr: StderrMode,
    /// Log file path and its format: `"json"`, a `%` template, or the
    /// default text layout.
    pub log_file: Option<(PathBuf, Option<String>)>,
    pub syslog: bool,
    pub journald: bool,
    pub colored: bool,
    pub timestamps: bool,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            verbose: 0,
            info: Vec::new(),
            debug: Vec::new(),
            quiet: false,
            stderr: StderrMode::All,
            log_file: None,
            syslog: false,
            journald: false,
            colored: true,
            timestamps: false,
        }
    }
}

#[derive(Default)]
#[must_use]
pub struct SubscriberConfigBuilder {
    cfg: SubscriberConfig,
}

impl SubscriberConfig {
    pub fn builder() -> SubscriberConfigBuilder {
        SubscriberConfigBuilder::default()
    }
}

impl SubscriberConfigBuilder {
    pub fn format(mut self, format: LogFormat) -> Self {
        self.cfg.format = format;
        self
    }

    pub fn verbose(mut self, verbose: u8) -> Self {
        self.cfg.verbose = verbose;
        self
    }

    pub fn info<I>(mut self, info: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<InfoFlag>,
    {
        self.cfg.info = info.into_iter().map(Into::into).collect();
        self
    }

    pub fn debug<I>(mut self, debug: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<DebugFlag>,
    {
        self.cfg.debug = debug.into_iter().map(Into::into).collect();
        self
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.cfg.quiet = quiet;
        self
    }

    pub fn stderr(mut self, stderr: StderrMode) -> Self {
        self.cfg.stderr = stderr;
        self
    }

    pub fn log_file(mut self, log_file: Option<(PathBuf, Option<String>)>) -> Self {
        self.cfg.log_file = log_file;
        self
    }

    pub fn syslog(mut self, syslog: bool) -> Self {
        self.cfg.syslog = syslog;
        self
    }

    pub fn journald(mut self, journald: bool) -> Self {
        self.cfg.journald = journald;
        self
    }

    pub fn colored(mut self, colored: bool) -> Self {
        self.cfg.colored = colored;
        self
    }

    pub fn timestamps(mut self, timestamps: bool) -> Self {
        self.cfg.timestamps = timestamps;
        self
    }

    pub fn build(self) -> SubscriberConfig {
        self.cfg
    }
}
