//! The `inputs` subcommand.

use bfabric_app_runner_common::{
    inputs::{
        default_target_folder, list_input_states, prepare_folder, resolve_inputs_file,
        PrepareAction, Stager,
    },
    prelude::*,
    process::SystemRunner,
};
use prettytable::{cell, format::consts::FORMAT_CLEAN, row, Table};
use structopt::StructOpt;

use super::{system_scp, GlobalOpt};

/// `inputs` options.
#[derive(Debug, StructOpt)]
pub enum Opt {
    /// Download, link or write every input.
    #[structopt(name = "prepare")]
    Prepare(StageOpt),

    /// Remove every staged input.
    #[structopt(name = "clean")]
    Clean(StageOpt),

    /// List the inputs and whether they are in place.
    #[structopt(name = "list")]
    List {
        #[structopt(flatten)]
        location: Location,

        /// Verify the contents of each input.
        #[structopt(long = "check")]
        check: bool,
    },

    /// Fail unless every input is in place and correct.
    #[structopt(name = "check")]
    Check {
        #[structopt(flatten)]
        location: Location,
    },
}

/// Where the inputs are declared and staged.
#[derive(Debug, StructOpt)]
pub struct Location {
    /// The `inputs.yml` file.
    #[structopt(parse(from_os_str))]
    pub inputs_yaml: PathBuf,

    /// Where to stage the inputs. Defaults to the directory containing
    /// `inputs.yml`.
    #[structopt(parse(from_os_str))]
    pub target_folder: Option<PathBuf>,
}

/// Options for `prepare` and `clean`.
#[derive(Debug, StructOpt)]
pub struct StageOpt {
    #[structopt(flatten)]
    location: Location,

    /// The user to log in as when copying files.
    #[structopt(long = "ssh-user")]
    ssh_user: Option<String>,

    /// Only handle the input with this filename.
    #[structopt(long = "filter")]
    filter: Option<String>,
}

/// Run the `inputs` subcommand.
pub fn run(global: &GlobalOpt, opt: &Opt) -> Result<()> {
    match opt {
        Opt::Prepare(stage) => run_stage(global, stage, PrepareAction::Prepare),
        Opt::Clean(stage) => run_stage(global, stage, PrepareAction::Clean),
        Opt::List { location, check } => run_list(global, location, *check),
        Opt::Check { location } => run_check(global, location),
    }
}

fn run_stage(global: &GlobalOpt, opt: &StageOpt, action: PrepareAction) -> Result<()> {
    let lims = global.lims()?;
    let scp = system_scp();
    let stager = Stager::new(&SystemRunner, &scp, opt.ssh_user.as_deref());
    prepare_folder(
        &lims,
        &stager,
        &opt.location.inputs_yaml,
        opt.location.target_folder.as_deref(),
        opt.filter.as_deref(),
        action,
    )
}

fn run_list(global: &GlobalOpt, location: &Location, check: bool) -> Result<()> {
    let lims = global.lims()?;
    let inputs = resolve_inputs_file(&lims, &location.inputs_yaml, None)?;
    let target = default_target_folder(&location.inputs_yaml, location.target_folder.as_deref());
    let states = list_input_states(&inputs, &target, check);

    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    if check {
        table.add_row(row!["FILENAME", "SOURCE", "INTEGRITY"]);
    } else {
        table.add_row(row!["FILENAME", "SOURCE", "EXISTS"]);
    }
    for state in &states {
        if check {
            table.add_row(row![&state.filename, &state.source, state.integrity]);
        } else {
            let exists = if state.exists { "yes" } else { "no" };
            table.add_row(row![&state.filename, &state.source, exists]);
        }
    }
    table.printstd();
    Ok(())
}

fn run_check(global: &GlobalOpt, location: &Location) -> Result<()> {
    let lims = global.lims()?;
    let inputs = resolve_inputs_file(&lims, &location.inputs_yaml, None)?;
    let target = default_target_folder(&location.inputs_yaml, location.target_folder.as_deref());
    let bad = list_input_states(&inputs, &target, true)
        .into_iter()
        .filter(|state| !state.integrity.is_usable())
        .map(|state| format!("{} ({})", state.filename, state.integrity))
        .collect::<Vec<_>>();
    if bad.is_empty() {
        info!("all inputs in {} are in place", target.display());
        Ok(())
    } else {
        Err(RunnerError::integrity(format!(
            "inputs not in place: {}",
            bad.join(", ")
        )))
    }
}
