//! The `outputs` subcommand.

use bfabric_app_runner_common::{
    outputs::Registrar,
    prelude::*,
    workunit_definition::{WorkunitDefinition, WorkunitRef},
};
use structopt::StructOpt;

use super::{forced_storage, system_scp, GlobalOpt};

/// `outputs` options.
#[derive(Debug, StructOpt)]
pub enum Opt {
    /// Upload and register every output in an `outputs.yml`.
    #[structopt(name = "register")]
    Register {
        /// The `outputs.yml` file.
        #[structopt(parse(from_os_str))]
        outputs_yaml: PathBuf,

        /// A workunit ID, or the path of a `workunit_definition.yml`.
        #[structopt(long = "workunit-ref")]
        workunit_ref: WorkunitRef,

        /// The user to log in as when copying files.
        #[structopt(long = "ssh-user")]
        ssh_user: Option<String>,

        /// Always create new resources, instead of filling in the
        /// workunit's pre-allocated one.
        #[structopt(long = "no-reuse-default-resource")]
        no_reuse_default_resource: bool,

        /// A YAML storage record to upload to, instead of the workunit's
        /// storage.
        #[structopt(long = "force-storage", parse(from_os_str))]
        force_storage: Option<PathBuf>,
    },
}

/// Run the `outputs` subcommand.
pub fn run(global: &GlobalOpt, opt: &Opt) -> Result<()> {
    match opt {
        Opt::Register {
            outputs_yaml,
            workunit_ref,
            ssh_user,
            no_reuse_default_resource,
            force_storage,
        } => {
            let lims = global.lims()?;
            let definition = WorkunitDefinition::from_ref(workunit_ref, &lims, None)?;
            let scp = system_scp();
            let mut registrar = Registrar::new(&lims, &scp, ssh_user.as_deref());
            if let Some(storage) = forced_storage(force_storage.as_deref())? {
                registrar = registrar.with_forced_storage(storage);
            }
            registrar.register_outputs(outputs_yaml, &definition, !no_reuse_default_resource)
        }
    }
}
