//! The commands an app runs for each stage of a workunit.

use crate::prelude::*;

/// The commands of one app version.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CommandsSpec {
    /// Splits a workunit into chunks. Called with `$workunit_ref $work_dir`.
    pub dispatch: Command,
    /// Processes one chunk. Called with `$chunk_dir`.
    pub process: Command,
    /// Writes `outputs.yml` for one chunk. Called with
    /// `$workunit_ref $chunk_dir`. May be omitted if `process` already
    /// writes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collect: Option<Command>,
}

/// A declarative command. The `type` field picks the variant.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// A command split on whitespace. Not interpreted by a shell.
    Shell(ShellCommand),
    /// A command split with shell quoting rules, run directly.
    Exec(ExecCommand),
    /// A command run inside a container.
    Docker(DockerCommand),
    /// A command run inside a cached Python virtualenv.
    PythonEnv(PythonEnvCommand),
}

impl Command {
    /// The command line this will run, before any extra arguments and
    /// without the container or environment wrapping. Used for logging.
    pub fn argv_for_display(&self) -> Vec<String> {
        match self {
            Command::Shell(cmd) => cmd.argv(),
            Command::Exec(cmd) => split_command(&cmd.command).unwrap_or_default(),
            Command::Docker(cmd) => {
                let mut argv = vec![cmd.engine.as_str().to_owned(), "run".to_owned(), cmd.image.clone()];
                argv.extend(split_command(&cmd.command).unwrap_or_default());
                argv
            }
            Command::PythonEnv(cmd) => split_command(&cmd.command).unwrap_or_default(),
        }
    }
}

/// Split a command using shell quoting rules.
pub fn split_command(command: &str) -> Result<Vec<String>> {
    let argv = shlex::split(command)
        .ok_or_else(|| RunnerError::config(format!("cannot parse command {:?}", command)))?;
    if argv.is_empty() {
        return Err(RunnerError::config("command must not be empty"));
    }
    Ok(argv)
}

/// Command type `shell`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ShellCommand {
    /// The command, split on whitespace.
    pub command: String,
}

impl ShellCommand {
    /// The words of the command.
    pub fn argv(&self) -> Vec<String> {
        self.command.split_whitespace().map(str::to_owned).collect()
    }
}

/// Command type `exec`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ExecCommand {
    /// The command, split with shell quoting rules.
    pub command: String,
    /// Extra environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Directories to put in front of `PATH`, first one first.
    #[serde(default)]
    pub prepend_paths: Vec<PathBuf>,
}

/// Container engines.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerEngine {
    /// Docker.
    Docker,
    /// Podman.
    Podman,
}

impl ContainerEngine {
    /// The name of the engine's executable.
    pub fn as_str(self) -> &'static str {
        match self {
            ContainerEngine::Docker => "docker",
            ContainerEngine::Podman => "podman",
        }
    }
}

impl Default for ContainerEngine {
    fn default() -> Self {
        ContainerEngine::Docker
    }
}

/// Bind mounts for a container.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MountOptions {
    /// Where the work directory is mounted. Defaults to the same path as
    /// on the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir_target: Option<PathBuf>,
    /// Read-only `(host, container)` mounts.
    #[serde(default)]
    pub read_only: Vec<(PathBuf, PathBuf)>,
    /// Writeable `(host, container)` mounts.
    #[serde(default)]
    pub writeable: Vec<(PathBuf, PathBuf)>,
    /// Mount `~/.bfabricpy.yml` into the container.
    #[serde(default = "MountOptions::default_share_bfabric_config")]
    pub share_bfabric_config: bool,
}

impl MountOptions {
    fn default_share_bfabric_config() -> bool {
        true
    }
}

impl Default for MountOptions {
    fn default() -> Self {
        MountOptions {
            work_dir_target: None,
            read_only: vec![],
            writeable: vec![],
            share_bfabric_config: true,
        }
    }
}

/// Command type `docker`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DockerCommand {
    /// The container image.
    pub image: String,
    /// The command to run in the container.
    pub command: String,
    /// Replaces the image's entrypoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    /// The container engine.
    #[serde(default)]
    pub engine: ContainerEngine,
    /// Environment variables inside the container.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// The container's MAC address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    /// Bind mounts.
    #[serde(default)]
    pub mounts: MountOptions,
    /// The container's host name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Extra arguments for `<engine> run`.
    #[serde(default)]
    pub custom_args: Vec<String>,
}

/// Command type `python_env`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PythonEnvCommand {
    /// The lock file describing the environment.
    pub pylock: PathBuf,
    /// The command, split with shell quoting rules.
    pub command: String,
    /// The Python version to create the environment with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python_version: Option<String>,
    /// Local wheels, sdists or package directories installed without
    /// dependency resolution after the locked requirements.
    #[serde(default)]
    pub local_extra_deps: Vec<PathBuf>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Directories to put in front of `PATH`, after the environment's own
    /// `bin` directory.
    #[serde(default)]
    pub prepend_paths: Vec<PathBuf>,
    /// Build a fresh, throwaway environment instead of using the cache.
    #[serde(default)]
    pub refresh: bool,
}
