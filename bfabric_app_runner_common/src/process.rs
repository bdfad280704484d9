//! Running external programs.
//!
//! Everything which shells out (SCP, rsync, the application's commands)
//! goes through a [`ProcessRunner`], so tests can substitute a recording
//! double instead of patching `std::process`.

use std::process::{self, Stdio};

use crate::prelude::*;

/// A fully-specified command line.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandLine {
    /// The program to run.
    pub program: String,
    /// Its arguments.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: BTreeMap<String, String>,
    /// The working directory, if different from ours.
    pub cwd: Option<PathBuf>,
    /// Should stdout and stderr be captured instead of passed through?
    pub capture_output: bool,
}

impl CommandLine {
    /// Create a new command line running `program` with `args`.
    pub fn new<S, I, A>(program: S, args: I) -> CommandLine
    where
        S: Into<String>,
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        CommandLine {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..CommandLine::default()
        }
    }

    /// The program followed by its arguments.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// A shell-quoted rendering, for logging.
    pub fn display(&self) -> String {
        self.argv()
            .iter()
            .map(|arg| shlex::quote(arg).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// What happened when we ran a program.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProcessOutput {
    /// The exit code, or `None` if the process was killed by a signal.
    pub code: Option<i32>,
    /// Captured standard output (empty unless captured).
    pub stdout: Vec<u8>,
    /// Captured standard error (empty unless captured).
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    /// Did the process exit with status 0?
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Describe how the process exited.
    pub fn status_description(&self) -> String {
        match self.code {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_owned(),
        }
    }
}

/// Abstract interface for running programs.
pub trait ProcessRunner {
    /// Run `cmd` to completion. Failing to start the program is an `Err`;
    /// a non-zero exit status is reported in the returned output.
    fn run(&self, cmd: &CommandLine) -> Result<ProcessOutput>;

    /// Run `cmd`, turning a non-zero exit status into a
    /// [`RunnerError::Command`].
    fn run_checked(&self, cmd: &CommandLine) -> Result<ProcessOutput> {
        let output = self.run(cmd)?;
        if !output.success() {
            let mut status = output.status_description();
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.trim().is_empty() {
                status = format!("{}: {}", status, stderr.trim());
            }
            return Err(RunnerError::Command {
                command: cmd.argv(),
                status,
            }
            .into());
        }
        Ok(output)
    }
}

/// Runs programs using `std::process`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, cmd: &CommandLine) -> Result<ProcessOutput> {
        debug!("running: {}", cmd.display());
        let mut command = process::Command::new(&cmd.program);
        command.args(&cmd.args).envs(&cmd.env);
        if let Some(cwd) = &cmd.cwd {
            command.current_dir(cwd);
        }
        if cmd.capture_output {
            let output = command
                .stdin(Stdio::null())
                .output()
                .with_context(|| format!("could not run {:?}", cmd.program))?;
            Ok(ProcessOutput {
                code: output.status.code(),
                stdout: output.stdout,
                stderr: output.stderr,
            })
        } else {
            let status = command
                .status()
                .with_context(|| format!("could not run {:?}", cmd.program))?;
            Ok(ProcessOutput {
                code: status.code(),
                ..ProcessOutput::default()
            })
        }
    }
}

#[test]
fn command_line_display_quotes_arguments() {
    let cmd = CommandLine::new("echo", vec!["hello world", "plain"]);
    assert_eq!(cmd.display(), "echo 'hello world' plain");
}

#[test]
fn run_checked_reports_failures() {
    let cmd = CommandLine::new("false", Vec::<String>::new());
    let err = SystemRunner.run_checked(&cmd).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RunnerError>(),
        Some(RunnerError::Command { .. })
    ));
    let ok = CommandLine::new("true", Vec::<String>::new());
    assert!(SystemRunner.run_checked(&ok).is_ok());
}
