//! The `validate` subcommand.

use bfabric_app_runner_common::{
    prelude::*,
    specs::{app::AppSpec, inputs::InputsSpec, outputs::OutputsSpec},
};
use structopt::StructOpt;

/// `validate` options.
#[derive(Debug, StructOpt)]
pub enum Opt {
    /// Check an `app.yml` and print its expanded versions.
    #[structopt(name = "app-spec")]
    AppSpec {
        /// The `app.yml` file.
        #[structopt(parse(from_os_str))]
        path: PathBuf,

        /// The application ID to expand templates with.
        #[structopt(long = "app-id", default_value = "1")]
        app_id: i64,

        /// The application name to expand templates with.
        #[structopt(long = "app-name", default_value = "app")]
        app_name: String,
    },

    /// Check an `inputs.yml`.
    #[structopt(name = "inputs")]
    Inputs {
        /// The `inputs.yml` file.
        #[structopt(parse(from_os_str))]
        path: PathBuf,
    },

    /// Check an `outputs.yml`.
    #[structopt(name = "outputs")]
    Outputs {
        /// The `outputs.yml` file.
        #[structopt(parse(from_os_str))]
        path: PathBuf,
    },
}

/// Run the `validate` subcommand.
pub fn run(opt: &Opt) -> Result<()> {
    match opt {
        Opt::AppSpec {
            path,
            app_id,
            app_name,
        } => {
            let spec = AppSpec::load(path, *app_id, app_name)?;
            print!("{}", serde_yaml::to_string(&spec.versions)?);
        }
        Opt::Inputs { path } => {
            let spec = InputsSpec::read(path)?;
            print!("{}", serde_yaml::to_string(&spec)?);
        }
        Opt::Outputs { path } => {
            let spec = OutputsSpec::read(path)?;
            print!("{}", serde_yaml::to_string(&spec)?);
        }
    }
    Ok(())
}
