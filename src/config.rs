// src/config.rs

use logging::{DebugFlag, InfoFlag, LogFormat, StderrMode, SubscriberConfig};
use std::env;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use launcher::{ExecRequest, Redirect};

/// Configuration for a single run: how to log and how to start the child.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub log_format: LogFormat,
    pub verbose: u8,
    pub info: Vec<InfoFlag>,
    pub debug: Vec<DebugFlag>,
    pub quiet: bool,
    pub stderr_mode: StderrMode,
    pub log_file: Option<(PathBuf, Option<String>)>,
    pub syslog: bool,
    pub journald: bool,
    pub colored: bool,
    pub timestamps: bool,
    pub raw_status: bool,
    pub nonblocking: bool,
    pub daemonize: bool,
    pub keep_fds: Vec<RawFd>,
    /// Variables set on top of the inherited environment, or on top of an
    /// empty one with `clear_env`.
    pub env: Vec<(OsString, OsString)>,
    pub clear_env: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Text,
            verbose: 0,
            info: Vec::new(),
            debug: Vec::new(),
            quiet: false,
            stderr_mode: StderrMode::All,
            log_file: None,
            syslog: false,
            journald: false,
            colored: true,
            timestamps: false,
            raw_status: false,
            nonblocking: false,
            daemonize: false,
            keep_fds: Vec::new(),
            env: Vec::new(),
            clear_env: false,
        }
    }
}

impl RunConfig {
    /// Create a new builder for [`RunConfig`].
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::default()
    }

    pub(crate) fn subscriber_config(&self) -> SubscriberConfig {
        SubscriberConfig::builder()
            .format(self.log_format)
            .verbose(self.verbose)
            .info(&self.info)
            .debug(&self.debug)
            .quiet(self.quiet)
            .stderr(self.stderr_mode)
            .log_file(self.log_file.clone())
            .syslog(self.syslog)
            .journald(self.journald)
            .colored(self.colored)
            .timestamps(self.timestamps)
            .build()
    }

    /// Build the request for `argv`.
    ///
    /// Output is captured through pipes, except for daemons: the detached
    /// program would hold the pipes open for its whole lifetime, so its
    /// streams go to the null device instead.
    pub fn request<I, S>(&self, argv: I) -> ExecRequest
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = if self.daemonize {
            Redirect::Null
        } else {
            Redirect::Pipe
        };
        let argv: Vec<OsString> = argv
            .into_iter()
            .map(|a| a.as_ref().to_os_string())
            .collect();
        let mut req = ExecRequest::new(&argv)
            .stdout(output)
            .stderr(output)
            .keep_fds(self.keep_fds.iter().copied())
            .daemonize(self.daemonize)
            .nonblocking_output(self.nonblocking);
        if !self.clear_env && self.env.is_empty() {
            return req;
        }

        // An environment override execs without a PATH search, so look the
        // program up here against the PATH the child will see.
        if let Some(path) = argv
            .first()
            .and_then(|program| find_program(program, self.search_path().as_deref()))
        {
            req = req.executable(path);
        }
        if !self.clear_env {
            let inherited =
                env::vars_os().filter(|(k, _)| !self.env.iter().any(|(key, _)| key == k));
            req = req.envs(inherited);
        }
        req.envs(self.env.iter().map(|(k, v)| (k, v)))
    }

    /// PATH as the child will see it.
    fn search_path(&self) -> Option<OsString> {
        match self.env.iter().find(|(k, _)| k == "PATH") {
            Some((_, v)) => Some(v.clone()),
            None if self.clear_env => None,
            None => env::var_os("PATH"),
        }
    }
}

/// Resolve a bare program name against `path` the way `execvp` would.
/// Names containing a slash are used as given.
fn find_program(program: &OsStr, path: Option<&OsStr>) -> Option<PathBuf> {
    if program.is_empty() || program.as_bytes().contains(&b'/') {
        return None;
    }
    env::split_paths(path?)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Builder for [`RunConfig`].
#[derive(Debug, Default)]
#[must_use]
pub struct RunConfigBuilder {
    cfg: RunConfig,
}

impl RunConfigBuilder {
    pub fn log_format(mut self, log_format: LogFormat) -> Self {
        self.cfg.log_format = log_format;
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
        let mut info = info.into_iter().map(Into::into).collect::<Vec<_>>();
        info.sort_by_key(|flag| flag.as_str());
        info.dedup();
        self.cfg.info = info;
        self
    }

    pub fn debug<I>(mut self, debug: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<DebugFlag>,
    {
        let mut debug = debug.into_iter().map(Into::into).collect::<Vec<_>>();
        debug.sort_by_key(|flag| flag.as_str());
        debug.dedup();
        self.cfg.debug = debug;
        self
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.cfg.quiet = quiet;
        self
    }

    pub fn stderr_mode(mut self, mode: StderrMode) -> Self {
        self.cfg.stderr_mode = mode;
        self
    }

    pub fn log_file(mut self, log_file: Option<(PathBuf, Option<String>)>) -> Self {
        self.cfg.log_file = log_file;
        self
    }

    pub fn syslog(mut self, enable: bool) -> Self {
        self.cfg.syslog = enable;
        self
    }

    pub fn journald(mut self, enable: bool) -> Self {
        self.cfg.journald = enable;
        self
    }

    pub fn colored(mut self, enable: bool) -> Self {
        self.cfg.colored = enable;
        self
    }

    pub fn timestamps(mut self, enable: bool) -> Self {
        self.cfg.timestamps = enable;
        self
    }

    pub fn raw_status(mut self, enable: bool) -> Self {
        self.cfg.raw_status = enable;
        self
    }

    pub fn nonblocking(mut self, enable: bool) -> Self {
        self.cfg.nonblocking = enable;
        self
    }

    pub fn daemonize(mut self, enable: bool) -> Self {
        self.cfg.daemonize = enable;
        self
    }

    pub fn keep_fds<I: IntoIterator<Item = RawFd>>(mut self, fds: I) -> Self {
        let mut fds = fds.into_iter().collect::<Vec<_>>();
        fds.sort_unstable();
        fds.dedup();
        self.cfg.keep_fds = fds;
        self
    }

    pub fn env<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<OsString>,
        V: Into<OsString>,
    {
        let key = key.into();
        let value = value.into();
        match self.cfg.env.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.cfg.env.push((key, value)),
        }
        self
    }

    pub fn clear_env(mut self, enable: bool) -> Self {
        self.cfg.clear_env = enable;
        self
    }

    pub fn build(self) -> RunConfig {
        self.cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use launcher::ExecFlags;

    #[test]
    fn info_dedupes_flags() {
        let cfg = RunConfig::builder()
            .info([InfoFlag::Cmd, InfoFlag::Cmd])
            .build();
        assert_eq!(cfg.info, vec![InfoFlag::Cmd]);
    }

    #[test]
    fn debug_flag_order_deterministic() {
        let cfg1 = RunConfig::builder()
            .debug([DebugFlag::Io, DebugFlag::Cmd, DebugFlag::Exec])
            .build();
        let cfg2 = RunConfig::builder()
            .debug([DebugFlag::Exec, DebugFlag::Io, DebugFlag::Cmd, DebugFlag::Io])
            .build();
        assert_eq!(cfg1.debug, cfg2.debug);
        assert_eq!(cfg1.debug.len(), 3);
    }

    #[test]
    fn env_later_value_wins() {
        let cfg = RunConfig::builder().env("A", "1").env("A", "2").build();
        assert_eq!(cfg.env, vec![(OsString::from("A"), OsString::from("2"))]);
    }

    #[test]
    fn request_captures_output() {
        let req = RunConfig::builder()
            .nonblocking(true)
            .keep_fds([9, 5, 9])
            .build()
            .request(["true"]);
        assert_eq!(req.stdout_redirect(), Redirect::Pipe);
        assert_eq!(req.stderr_redirect(), Redirect::Pipe);
        assert_eq!(req.exec_flags(), ExecFlags::NONBLOCKING_OUTPUT);
        assert_eq!(req.kept_fds().iter().copied().collect::<Vec<_>>(), vec![5, 9]);
        assert!(req.env_override().is_none());
    }

    #[test]
    fn daemon_request_discards_output() {
        let req = RunConfig::builder().daemonize(true).build().request(["true"]);
        assert_eq!(req.stdout_redirect(), Redirect::Null);
        assert!(req.exec_flags().contains(ExecFlags::DAEMONIZE));
    }

    #[test]
    fn clear_env_keeps_only_explicit_variables() {
        let req = RunConfig::builder()
            .clear_env(true)
            .env("ONLY", "me")
            .build()
            .request(["env"]);
        let vars = req.env_override().unwrap();
        assert_eq!(vars, &[(OsString::from("ONLY"), OsString::from("me"))]);
    }

    #[test]
    fn env_override_extends_inherited_environment() {
        let req = RunConfig::builder()
            .env("PROCRUN_CONFIG_TEST", "x")
            .build()
            .request(["env"]);
        let vars = req.env_override().unwrap();
        assert!(vars.len() > 1 || std::env::vars_os().next().is_none());
        let ours: Vec<_> = vars
            .iter()
            .filter(|(k, _)| k == "PROCRUN_CONFIG_TEST")
            .collect();
        assert_eq!(ours.len(), 1);
        assert_eq!(ours[0].1, "x");
    }

    #[test]
    fn env_override_resolves_bare_program() {
        let req = RunConfig::builder()
            .env("PATH", "/nonexistent:/bin")
            .build()
            .request(["sh", "-c", "true"]);
        assert_eq!(req.executable_path(), Some(OsStr::new("/bin/sh")));
        assert_eq!(req.program(), Some(OsStr::new("sh")));
    }

    #[test]
    fn inherited_environment_needs_no_lookup() {
        let req = RunConfig::builder().build().request(["sh"]);
        assert!(req.executable_path().is_none());
    }

    #[test]
    fn program_lookup_rules() {
        let bin = Some(OsStr::new("/bin"));
        assert_eq!(find_program(OsStr::new("sh"), bin), Some(PathBuf::from("/bin/sh")));
        assert_eq!(find_program(OsStr::new("./sh"), bin), None);
        assert_eq!(find_program(OsStr::new("sh"), None), None);
        assert_eq!(
            find_program(OsStr::new("procrun-no-such-program"), bin),
            None
        );
        let cleared = RunConfig::builder().clear_env(true).build();
        assert!(cleared.search_path().is_none());
    }

    #[test]
    fn subscriber_config_mirrors_logging_fields() {
        let cfg = RunConfig::builder()
            .verbose(2)
            .quiet(true)
            .stderr_mode(StderrMode::Errors)
            .timestamps(true)
            .build()
            .subscriber_config();
        assert_eq!(cfg.verbose, 2);
        assert!(cfg.quiet);
        assert_eq!(cfg.stderr, StderrMode::Errors);
        assert!(cfg.timestamps);
    }
}
