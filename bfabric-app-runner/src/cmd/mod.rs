//! Subcommands.

use bfabric_app_runner_common::{
    config::ClientConfig, entities::Storage, prelude::*, process::SystemRunner,
    scp::SystemScp,
};
use structopt::StructOpt;

pub mod chunk;
pub mod dispatch;
pub mod inputs;
pub mod outputs;
pub mod run;
pub mod validate;

/// Options shared by every subcommand.
#[derive(Debug, StructOpt)]
pub struct GlobalOpt {
    /// The LIMS config file. Defaults to `~/.bfabricpy.yml`.
    #[structopt(long = "config", global = true, parse(from_os_str))]
    pub config: Option<PathBuf>,

    /// The environment to use from the config file.
    #[structopt(long = "config-env", global = true)]
    pub config_env: Option<String>,
}

impl GlobalOpt {
    /// Connect to the LIMS.
    pub fn lims(&self) -> Result<Lims> {
        let config = match &self.config {
            Some(path) => ClientConfig::from_file(path, self.config_env.as_deref())?,
            None => ClientConfig::load(self.config_env.as_deref())?,
        };
        Ok(Lims::new(Client::connect(&config)?))
    }
}

/// The SCP port used by every command.
pub fn system_scp() -> SystemScp<SystemRunner> {
    SystemScp::new(SystemRunner)
}

/// Load the storage passed with `--force-storage`, if any.
pub fn forced_storage(path: Option<&Path>) -> Result<Option<Storage>> {
    path.map(Storage::from_yaml_file).transpose()
}
