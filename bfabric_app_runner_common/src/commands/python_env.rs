//! `python_env` commands, run inside a virtualenv built with `uv` from a
//! lock file.
//!
//! Environments are cached below `<cache>/envs/<hash>`, where the hash
//! covers the host name, the Python version, the lock file's path and
//! modification time, and any local extra dependencies. A `.provisioned`
//! marker is written once an environment is complete, so an interrupted
//! provisioning is redone on the next run. With `refresh`, a throwaway
//! environment is built below `<cache>/ephemeral` and removed afterwards.

use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};

use super::command_env;
use crate::prelude::*;
use crate::process::{CommandLine, ProcessRunner};
use crate::specs::commands::{split_command, PythonEnvCommand};

/// The marker file of a fully provisioned environment.
const PROVISIONED_MARKER: &str = ".provisioned";

/// The default cache directory, `$XDG_CACHE_HOME/bfabric_app_runner`
/// (falling back to `~/.cache`).
pub fn default_cache_dir() -> PathBuf {
    let base = std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache")))
        .unwrap_or_else(|| PathBuf::from(".cache"));
    base.join("bfabric_app_runner")
}

/// Run `python` with `args`, provisioning its environment if needed.
pub(crate) fn run<R: ProcessRunner>(
    runner: &R,
    cache_dir: &Path,
    python: &PythonEnvCommand,
    args: &[String],
) -> Result<()> {
    if python.refresh {
        let parent = cache_dir.join("ephemeral");
        fs::create_dir_all(&parent)
            .with_context(|| format!("could not create {}", parent.display()))?;
        let dir = tempfile::Builder::new()
            .prefix("env_")
            .tempdir_in(&parent)
            .with_context(|| format!("could not create a directory in {}", parent.display()))?;
        info!("provisioning ephemeral Python environment at {}", dir.path().display());
        let env = PythonEnvironment::new(dir.path().to_owned(), python);
        let result = env.provision(runner).and_then(|()| env.run(runner, args));
        let path = dir.path().to_owned();
        if let Err(err) = dir.close() {
            warn!("could not remove ephemeral environment {}: {}", path.display(), err);
        }
        result
    } else {
        // TODO: Lock the environment directory while provisioning, so that
        // concurrent runners on one host don't build it twice.
        let env_path = cache_dir.join("envs").join(environment_hash(python)?);
        let env = PythonEnvironment::new(env_path, python);
        if env.is_provisioned() {
            debug!("reusing Python environment at {}", env.path.display());
        } else {
            info!("provisioning Python environment at {}", env.path.display());
            env.provision(runner)?;
        }
        env.run(runner, args)
    }
}

/// `path`, made absolute against the current directory.
fn absolute(path: &Path) -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("could not determine the current directory")?;
    Ok(cwd.join(path))
}

fn hostname() -> String {
    fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|name| name.trim().to_owned())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "localhost".to_owned())
}

/// The cache key of the environment `python` needs.
fn environment_hash(python: &PythonEnvCommand) -> Result<String> {
    let pylock = absolute(&python.pylock)?;
    let modified = fs::metadata(&pylock)
        .and_then(|meta| meta.modified())
        .with_context(|| format!("could not read {}", pylock.display()))?
        .duration_since(UNIX_EPOCH)
        .context("lock file modified before 1970")?;
    let mut input = format!(
        "{}:{}:{}:{}",
        hostname(),
        python.python_version.as_deref().unwrap_or(""),
        pylock.display(),
        modified.as_secs_f64(),
    );
    if !python.local_extra_deps.is_empty() {
        let deps = python
            .local_extra_deps
            .iter()
            .map(|dep| Ok(absolute(dep)?.display().to_string()))
            .collect::<Result<Vec<_>>>()?;
        input.push(':');
        input.push_str(&deps.join(","));
    }
    let hash = hex::encode(Sha256::digest(input.as_bytes()));
    trace!("environment hash of {:?} is {}", input, &hash[..16]);
    Ok(hash[..16].to_owned())
}

/// A virtualenv at a known path.
struct PythonEnvironment<'a> {
    path: PathBuf,
    command: &'a PythonEnvCommand,
}

impl<'a> PythonEnvironment<'a> {
    fn new(path: PathBuf, command: &'a PythonEnvCommand) -> PythonEnvironment<'a> {
        PythonEnvironment { path, command }
    }

    fn bin_dir(&self) -> PathBuf {
        self.path.join("bin")
    }

    fn python(&self) -> PathBuf {
        self.bin_dir().join("python")
    }

    fn is_provisioned(&self) -> bool {
        self.path.join(PROVISIONED_MARKER).is_file()
    }

    /// Create the environment and install the locked and local
    /// dependencies.
    fn provision<R: ProcessRunner>(&self, runner: &R) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("could not create {}", parent.display()))?;
        }
        let python = self.python().display().to_string();

        let mut venv = vec!["venv".to_owned()];
        if let Some(version) = &self.command.python_version {
            venv.extend(vec!["-p".to_owned(), version.clone()]);
        }
        venv.push(self.path.display().to_string());
        self.uv(runner, venv)?;

        let mut install = vec![
            "pip".to_owned(),
            "install".to_owned(),
            "-p".to_owned(),
            python.clone(),
            "-r".to_owned(),
            self.command.pylock.display().to_string(),
        ];
        if self.command.refresh {
            install.push("--reinstall".to_owned());
        }
        self.uv(runner, install)?;

        if !self.command.local_extra_deps.is_empty() {
            let mut install_local = vec![
                "pip".to_owned(),
                "install".to_owned(),
                "-p".to_owned(),
                python,
                "--no-deps".to_owned(),
            ];
            for dep in &self.command.local_extra_deps {
                install_local.push(absolute(dep)?.display().to_string());
            }
            self.uv(runner, install_local)?;
        }

        fs::create_dir_all(&self.path)
            .with_context(|| format!("could not create {}", self.path.display()))?;
        File::create(self.path.join(PROVISIONED_MARKER))
            .with_context(|| format!("could not mark {} as provisioned", self.path.display()))?;
        Ok(())
    }

    fn uv<R: ProcessRunner>(&self, runner: &R, args: Vec<String>) -> Result<()> {
        let mut cmd = CommandLine::new("uv", args);
        cmd.env = command_env(&self.command.env, &self.command.prepend_paths)?;
        runner.run_checked(&cmd)?;
        Ok(())
    }

    /// Run the command, preferring an executable of that name installed in
    /// the environment over running it with the environment's Python.
    fn run<R: ProcessRunner>(&self, runner: &R, args: &[String]) -> Result<()> {
        let mut argv = split_command(&self.command.command)?;
        argv.extend(args.iter().cloned());
        let script = self.bin_dir().join(&argv[0]);
        let program = if script.is_file() {
            debug!("running {} from the environment", script.display());
            argv.remove(0);
            script
        } else {
            debug!("running {:?} with {}", argv[0], self.python().display());
            self.python()
        };

        let mut prepend_paths = vec![self.bin_dir()];
        prepend_paths.extend(self.command.prepend_paths.iter().cloned());
        let mut cmd = CommandLine::new(program.display().to_string(), argv);
        cmd.env = command_env(&self.command.env, &prepend_paths)?;
        info!("running: {}", cmd.display());
        runner.run_checked(&cmd)?;
        Ok(())
    }
}
