//! The `run` subcommand.

use bfabric_app_runner_common::{
    commands::ProcessCommandPort,
    prelude::*,
    process::SystemRunner,
    runner::{load_workunit_information, run_app, RunOptions, Runner},
    workunit_definition::WorkunitRef,
};
use structopt::StructOpt;

use super::{forced_storage, system_scp, GlobalOpt};

/// `run` options.
#[derive(Debug, StructOpt)]
pub struct Opt {
    /// The app's `app.yml`.
    #[structopt(long = "app-spec", parse(from_os_str))]
    pub app_spec: PathBuf,

    /// A workunit ID, or the path of a `workunit_definition.yml`.
    #[structopt(long = "workunit-ref")]
    pub workunit_ref: WorkunitRef,

    /// The directory to run the app in.
    #[structopt(long = "work-dir", parse(from_os_str))]
    pub work_dir: PathBuf,

    /// The user to log in as when copying files.
    #[structopt(long = "ssh-user")]
    pub ssh_user: Option<String>,

    /// Don't change the workunit status or register outputs.
    #[structopt(long = "read-only")]
    pub read_only: bool,

    /// A YAML storage record to upload outputs to, instead of the
    /// workunit's storage.
    #[structopt(long = "force-storage", parse(from_os_str))]
    pub force_storage: Option<PathBuf>,
}

/// Run the `run` subcommand.
pub fn run(global: &GlobalOpt, opt: &Opt) -> Result<()> {
    let lims = global.lims()?;
    let (app, workunit_ref) =
        load_workunit_information(&opt.app_spec, &lims, &opt.work_dir, &opt.workunit_ref)?;
    let options = RunOptions {
        read_only: opt.read_only,
        force_storage: forced_storage(opt.force_storage.as_deref())?,
        dispatch: true,
    };

    let commands = ProcessCommandPort::system();
    let scp = system_scp();
    let runner = Runner::new(
        &app,
        &lims,
        &commands,
        &SystemRunner,
        &scp,
        opt.ssh_user.as_deref(),
    );
    run_app(&runner, &workunit_ref, &opt.work_dir, &options)
        .with_context(|| format!("could not run workunit {}", opt.workunit_ref))
}
