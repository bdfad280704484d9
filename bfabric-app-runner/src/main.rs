use bfabric_app_runner_common::{prelude::*, quick_main, tracing_support::initialize_tracing};
use structopt::StructOpt;

mod cmd;

/// Command-line options, parsed using `structopt`.
#[derive(Debug, StructOpt)]
#[structopt(about = "Runs B-Fabric apps: dispatches workunits, stages inputs and registers outputs.")]
struct Opt {
    #[structopt(flatten)]
    global: cmd::GlobalOpt,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Run every stage of an app for a workunit.
    #[structopt(name = "run")]
    Run(cmd::run::Opt),

    /// Split a workunit into one chunk per input resource.
    #[structopt(name = "dispatch")]
    Dispatch(cmd::dispatch::Opt),

    /// Input-related commands.
    #[structopt(name = "inputs")]
    Inputs {
        #[structopt(subcommand)]
        cmd: cmd::inputs::Opt,
    },

    /// Output-related commands.
    #[structopt(name = "outputs")]
    Outputs {
        #[structopt(subcommand)]
        cmd: cmd::outputs::Opt,
    },

    /// Run individual stages on chunks created by `dispatch`.
    #[structopt(name = "chunk")]
    Chunk {
        #[structopt(subcommand)]
        cmd: cmd::chunk::Opt,
    },

    /// Check spec files without running anything.
    #[structopt(name = "validate")]
    Validate {
        #[structopt(subcommand)]
        cmd: cmd::validate::Opt,
    },
}

quick_main!(run);

fn run() -> Result<()> {
    initialize_tracing();
    let opt = Opt::from_args();
    debug!("Args: {:?}", opt);

    match &opt.cmd {
        Command::Run(cmd) => cmd::run::run(&opt.global, cmd),
        Command::Dispatch(cmd) => cmd::dispatch::run(&opt.global, cmd),
        Command::Inputs { cmd } => cmd::inputs::run(&opt.global, cmd),
        Command::Outputs { cmd } => cmd::outputs::run(&opt.global, cmd),
        Command::Chunk { cmd } => cmd::chunk::run(&opt.global, cmd),
        Command::Validate { cmd } => cmd::validate::run(cmd),
    }
}
