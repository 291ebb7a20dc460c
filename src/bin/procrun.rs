// src/bin/procrun.rs
use std::ffi::OsString;
use std::io::{self, Write};
use std::os::fd::RawFd;
use std::path::PathBuf;

use clap::{ArgAction, Parser};
use logging::{DebugFlag, InfoFlag, LogFormat};
use procrun::{ExitStatus, RunConfig, RunError, RunOutput, run_with_config};
use serde_json::{Value, json};

/// Exit code for every failure other than a usage error.
const FAILURE: i32 = 1;

#[derive(Parser, Debug)]
#[command(
    name = "procrun",
    version,
    about = "Run a program, capture its output and report how it exited"
)]
struct Opts {
    /// Do not treat a non-zero exit as an error; exit with the child's code.
    #[arg(long, help_heading = "Execution")]
    raw_status: bool,
    /// Detach the program into its own session and return immediately.
    #[arg(long, help_heading = "Execution")]
    daemonize: bool,
    /// Read the capture pipes in non-blocking mode.
    #[arg(long, help_heading = "Execution")]
    nonblocking: bool,
    /// Keep an extra descriptor open in the child (repeatable).
    #[arg(long = "keep-fd", value_name = "FD", help_heading = "Execution")]
    keep_fd: Vec<RawFd>,
    /// Set an environment variable in the child (repeatable).
    #[arg(
        long = "env",
        value_name = "KEY=VALUE",
        value_parser = parse_env,
        help_heading = "Execution"
    )]
    env: Vec<(OsString, OsString)>,
    /// Start the child with an empty environment plus any --env variables.
    #[arg(long, help_heading = "Execution")]
    clear_env: bool,
    #[arg(short, long, action = ArgAction::Count, help_heading = "Output")]
    verbose: u8,
    #[arg(short, long, help_heading = "Output")]
    quiet: bool,
    #[arg(
        long,
        value_name = "FLAGS",
        value_delimiter = ',',
        value_enum,
        help_heading = "Output"
    )]
    info: Vec<InfoFlag>,
    #[arg(
        long,
        value_name = "FLAGS",
        value_delimiter = ',',
        value_enum,
        help_heading = "Output"
    )]
    debug: Vec<DebugFlag>,
    #[arg(long = "log-file", value_name = "FILE", help_heading = "Output")]
    log_file: Option<PathBuf>,
    #[arg(long = "log-file-format", value_name = "FMT", help_heading = "Output")]
    log_file_format: Option<String>,
    #[arg(
        long = "log-format",
        value_name = "FORMAT",
        value_enum,
        default_value = "text",
        help_heading = "Output"
    )]
    log_format: LogFormat,
    /// Print a JSON summary instead of relaying the captured streams.
    #[arg(long, help_heading = "Output")]
    json: bool,
    /// Program and arguments.
    #[arg(required = true, trailing_var_arg = true, value_name = "ARGV")]
    argv: Vec<OsString>,
}

fn parse_env(s: &str) -> Result<(OsString, OsString), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.into(), value.into())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

impl Opts {
    fn config(&self) -> RunConfig {
        let mut builder = RunConfig::builder()
            .log_format(self.log_format)
            .verbose(self.verbose)
            .quiet(self.quiet)
            .info(&self.info)
            .debug(&self.debug)
            .log_file(
                self.log_file
                    .clone()
                    .map(|path| (path, self.log_file_format.clone())),
            )
            .raw_status(self.raw_status)
            .daemonize(self.daemonize)
            .nonblocking(self.nonblocking)
            .keep_fds(self.keep_fd.iter().copied())
            .clear_env(self.clear_env);
        for (key, value) in &self.env {
            builder = builder.env(key.clone(), value.clone());
        }
        builder.build()
    }
}

/// Shell-style exit code for a child's status.
fn exit_code(status: ExitStatus) -> i32 {
    match status {
        ExitStatus::Exited(code) => code,
        ExitStatus::Signaled(signo) => 128 + signo,
    }
}

fn summary(argv: &[OsString], result: &Result<RunOutput, RunError>) -> Value {
    let command: Vec<_> = argv.iter().map(|a| a.to_string_lossy()).collect();
    match result {
        Ok(out) => json!({
            "command": command,
            "status": out.status.map(|s| match s {
                ExitStatus::Exited(code) => json!({ "exited": code }),
                ExitStatus::Signaled(signo) => json!({ "signaled": signo }),
            }),
            "stdout": out.output.stdout_lossy(),
            "stderr": out.output.stderr_lossy(),
        }),
        Err(err) => json!({
            "command": command,
            "error": err.to_string(),
        }),
    }
}

fn relay(out: &RunOutput) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(&out.output.stdout)?;
    stdout.flush()?;
    let mut stderr = io::stderr().lock();
    stderr.write_all(&out.output.stderr)?;
    stderr.flush()
}

fn main() {
    let opts = Opts::parse();
    let cfg = opts.config();
    let result = run_with_config(&opts.argv, &cfg);

    if opts.json {
        println!("{}", summary(&opts.argv, &result));
    }
    let out = match result {
        Ok(out) => out,
        Err(err) => {
            if !opts.json {
                eprintln!("procrun: {err}");
            }
            std::process::exit(FAILURE);
        }
    };
    if !opts.json {
        if let Err(err) = relay(&out) {
            eprintln!("procrun: cannot relay output: {err}");
            std::process::exit(FAILURE);
        }
    }
    std::process::exit(out.status.map_or(0, exit_code));
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Opts::command().debug_assert();
    }

    #[test]
    fn env_parser_splits_on_first_equals() {
        assert_eq!(
            parse_env("A=b=c").unwrap(),
            (OsString::from("A"), OsString::from("b=c"))
        );
        assert_eq!(parse_env("EMPTY=").unwrap().1, OsString::new());
        assert!(parse_env("novalue").is_err());
        assert!(parse_env("=x").is_err());
    }

    #[test]
    fn trailing_arguments_keep_their_flags() {
        let opts = Opts::try_parse_from(["procrun", "--raw-status", "--", "ls", "-l", "--all"])
            .unwrap();
        assert!(opts.raw_status);
        assert_eq!(opts.argv, ["ls", "-l", "--all"]);
    }

    #[test]
    fn signal_death_maps_above_128() {
        assert_eq!(exit_code(ExitStatus::Signaled(9)), 137);
        assert_eq!(exit_code(ExitStatus::Exited(3)), 3);
    }

    #[test]
    fn config_carries_log_file_format() {
        let opts = Opts::try_parse_from([
            "procrun",
            "--log-file",
            "/tmp/x.log",
            "--log-file-format",
            "json",
            "--keep-fd",
            "7",
            "--env",
            "K=V",
            "true",
        ])
        .unwrap();
        let cfg = opts.config();
        assert_eq!(
            cfg.log_file,
            Some((PathBuf::from("/tmp/x.log"), Some("json".to_string())))
        );
        assert_eq!(cfg.keep_fds, vec![7]);
        assert_eq!(cfg.env, vec![(OsString::from("K"), OsString::from("V"))]);
    }
}
