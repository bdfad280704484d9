//! The `chunk` subcommand.

use bfabric_app_runner_common::{
    commands::ProcessCommandPort,
    dispatch::WORKUNIT_DEFINITION_FILE_NAME,
    prelude::*,
    process::SystemRunner,
    runner::{load_workunit_information, run_app, RunOptions, Runner},
    workunit_definition::{WorkunitDefinition, WorkunitRef},
};
use structopt::StructOpt;

use super::{system_scp, GlobalOpt};

/// `chunk` options.
#[derive(Debug, StructOpt)]
pub enum Opt {
    /// Prepare, process and register every chunk of a dispatched work
    /// directory.
    #[structopt(name = "run-all")]
    RunAll {
        /// The app's `app.yml`.
        #[structopt(long = "app-spec", parse(from_os_str))]
        app_spec: PathBuf,

        /// The dispatched work directory.
        #[structopt(long = "work-dir", parse(from_os_str))]
        work_dir: PathBuf,

        /// A workunit ID, or the path of a `workunit_definition.yml`.
        #[structopt(long = "workunit-ref")]
        workunit_ref: WorkunitRef,

        /// The user to log in as when copying files.
        #[structopt(long = "ssh-user")]
        ssh_user: Option<String>,

        /// Don't change the workunit status or register outputs.
        #[structopt(long = "read-only")]
        read_only: bool,
    },

    /// Run the `process` command on one chunk, whose inputs must already be
    /// prepared.
    #[structopt(name = "process")]
    Process {
        /// The app's `app.yml`.
        #[structopt(long = "app-spec", parse(from_os_str))]
        app_spec: PathBuf,

        /// The chunk directory.
        #[structopt(long = "chunk-dir", parse(from_os_str))]
        chunk_dir: PathBuf,
    },

    /// Run the `collect` command on one chunk and register its outputs.
    #[structopt(name = "outputs")]
    Outputs {
        /// The app's `app.yml`.
        #[structopt(long = "app-spec", parse(from_os_str))]
        app_spec: PathBuf,

        /// The chunk directory.
        #[structopt(long = "chunk-dir", parse(from_os_str))]
        chunk_dir: PathBuf,

        /// A workunit ID, or the path of a `workunit_definition.yml`.
        #[structopt(long = "workunit-ref")]
        workunit_ref: WorkunitRef,

        /// The user to log in as when copying files.
        #[structopt(long = "ssh-user")]
        ssh_user: Option<String>,

        /// Collect, but don't register anything.
        #[structopt(long = "read-only")]
        read_only: bool,
    },
}

/// Run the `chunk` subcommand.
pub fn run(global: &GlobalOpt, opt: &Opt) -> Result<()> {
    let lims = global.lims()?;
    let commands = ProcessCommandPort::system();
    let scp = system_scp();

    match opt {
        Opt::RunAll {
            app_spec,
            work_dir,
            workunit_ref,
            ssh_user,
            read_only,
        } => {
            let (app, workunit_ref) =
                load_workunit_information(app_spec, &lims, work_dir, workunit_ref)?;
            let runner = Runner::new(&app, &lims, &commands, &SystemRunner, &scp, ssh_user.as_deref());
            let options = RunOptions {
                read_only: *read_only,
                force_storage: None,
                dispatch: false,
            };
            run_app(&runner, &workunit_ref, work_dir, &options)
        }
        Opt::Process { app_spec, chunk_dir } => {
            let work_dir = parent_work_dir(chunk_dir)?;
            let definition_ref = WorkunitRef::Path(work_dir.join(WORKUNIT_DEFINITION_FILE_NAME));
            let (app, _) = load_workunit_information(app_spec, &lims, &work_dir, &definition_ref)?;
            let runner = Runner::new(&app, &lims, &commands, &SystemRunner, &scp, None);
            runner.run_process(&chunk_dir.canonicalize()?)
        }
        Opt::Outputs {
            app_spec,
            chunk_dir,
            workunit_ref,
            ssh_user,
            read_only,
        } => {
            let work_dir = parent_work_dir(chunk_dir)?;
            let (app, workunit_ref) =
                load_workunit_information(app_spec, &lims, &work_dir, workunit_ref)?;
            let runner = Runner::new(&app, &lims, &commands, &SystemRunner, &scp, ssh_user.as_deref());
            let chunk_dir = chunk_dir.canonicalize()?;
            runner.run_collect(&workunit_ref, &chunk_dir)?;
            if !read_only {
                let definition = WorkunitDefinition::from_ref(&workunit_ref, &lims, None)?;
                runner.register_outputs(&chunk_dir, &definition, None)?;
            }
            Ok(())
        }
    }
}

/// The work directory a chunk belongs to.
fn parent_work_dir(chunk_dir: &Path) -> Result<PathBuf> {
    let chunk_dir = chunk_dir
        .canonicalize()
        .with_context(|| format!("could not resolve {}", chunk_dir.display()))?;
    chunk_dir
        .parent()
        .map(Path::to_owned)
        .ok_or_else(|| format_err!("{} has no parent directory", chunk_dir.display()))
}
