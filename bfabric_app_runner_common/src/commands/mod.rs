//! Running an app's declared commands.
//!
//! The runner only sees the [`CommandPort`] trait. [`ProcessCommandPort`]
//! turns each [`Command`] variant into a [`CommandLine`] and runs it to
//! completion; a non-zero exit is a [`RunnerError::Command`].

use crate::prelude::*;
use crate::process::{CommandLine, ProcessRunner, SystemRunner};
use crate::specs::commands::{split_command, Command, ExecCommand, ShellCommand};

mod docker;
mod python_env;

pub use self::docker::docker_command_line;
pub use self::python_env::default_cache_dir;

/// Abstract interface for running app commands.
pub trait CommandPort {
    /// Run `command` with `args` appended, failing unless it exits
    /// successfully.
    fn run(&self, command: &Command, args: &[String]) -> Result<()>;
}

/// Runs app commands as local processes.
#[derive(Clone, Debug)]
pub struct ProcessCommandPort<R = SystemRunner> {
    runner: R,
    cache_dir: PathBuf,
}

impl ProcessCommandPort<SystemRunner> {
    /// Run commands with the system's process runner, caching Python
    /// environments in the default location.
    pub fn system() -> ProcessCommandPort<SystemRunner> {
        ProcessCommandPort::new(SystemRunner, default_cache_dir())
    }
}

impl<R: ProcessRunner> ProcessCommandPort<R> {
    /// Run commands using `runner`, caching Python environments below
    /// `cache_dir`.
    pub fn new(runner: R, cache_dir: PathBuf) -> ProcessCommandPort<R> {
        ProcessCommandPort { runner, cache_dir }
    }

    /// The user and group to run containers as.
    fn container_user(&self) -> Result<String> {
        let id = |flag: &str| -> Result<String> {
            let mut cmd = CommandLine::new("id", vec![flag]);
            cmd.capture_output = true;
            let output = self.runner.run_checked(&cmd)?;
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
        };
        Ok(format!("{}:{}", id("-u")?, id("-g")?))
    }
}

impl<R: ProcessRunner> CommandPort for ProcessCommandPort<R> {
    #[instrument(level = "debug", skip(self, command))]
    fn run(&self, command: &Command, args: &[String]) -> Result<()> {
        let cmd = match command {
            Command::Shell(shell) => shell_command_line(shell, args)?,
            Command::Exec(exec) => exec_command_line(exec, args)?,
            Command::Docker(docker) => {
                let work_dir = std::env::current_dir()
                    .context("could not determine the current directory")?;
                docker_command_line(docker, args, &work_dir, &self.container_user()?)?
            }
            Command::PythonEnv(python) => {
                return python_env::run(&self.runner, &self.cache_dir, python, args);
            }
        };
        info!("running: {}", cmd.display());
        self.runner.run_checked(&cmd)?;
        Ok(())
    }
}

/// Build the command line of a `shell` command.
pub fn shell_command_line(shell: &ShellCommand, args: &[String]) -> Result<CommandLine> {
    let mut argv = shell.argv();
    if argv.is_empty() {
        return Err(RunnerError::config("command must not be empty"));
    }
    argv.extend(args.iter().cloned());
    let program = argv.remove(0);
    Ok(CommandLine::new(program, argv))
}

/// Build the command line of an `exec` command, with its environment.
pub fn exec_command_line(exec: &ExecCommand, args: &[String]) -> Result<CommandLine> {
    let mut argv = split_command(&exec.command)?;
    argv.extend(args.iter().cloned());
    let program = argv.remove(0);
    let mut cmd = CommandLine::new(program, argv);
    cmd.env = command_env(&exec.env, &exec.prepend_paths)?;
    Ok(cmd)
}

/// Environment variables for a command: `env`, plus `PATH` with
/// `prepend_paths` in front of our own `PATH`.
pub(crate) fn command_env(
    env: &BTreeMap<String, String>,
    prepend_paths: &[PathBuf],
) -> Result<BTreeMap<String, String>> {
    let mut env = env.clone();
    if !prepend_paths.is_empty() {
        let existing = std::env::var_os("PATH").unwrap_or_default();
        let mut paths = prepend_paths.to_vec();
        paths.extend(std::env::split_paths(&existing));
        let joined = std::env::join_paths(paths).context("cannot build PATH")?;
        env.insert("PATH".to_owned(), joined.to_string_lossy().into_owned());
    }
    Ok(env)
}
