//! The `dispatch` subcommand.

use bfabric_app_runner_common::{
    dispatch::{dispatch_workunit, ChunkPerResource, DispatchConfig},
    prelude::*,
    workunit_definition::{WorkunitDefinition, WorkunitRef},
};
use structopt::StructOpt;

use super::GlobalOpt;

/// How many entities to keep in the lookup cache while dispatching.
const CACHE_SIZE: usize = 10_000;

/// `dispatch` options.
#[derive(Debug, StructOpt)]
pub struct Opt {
    /// A YAML dispatch config. Defaults to dispatching `.imzML` resources
    /// and `Imzml` dataset columns.
    #[structopt(long = "dispatch-config", parse(from_os_str))]
    pub dispatch_config: Option<PathBuf>,

    /// A workunit ID, or the path of a `workunit_definition.yml`.
    #[structopt(long = "workunit-ref")]
    pub workunit_ref: WorkunitRef,

    /// The directory to create the chunks in.
    #[structopt(long = "work-dir", parse(from_os_str))]
    pub work_dir: PathBuf,
}

/// Run the `dispatch` subcommand.
pub fn run(global: &GlobalOpt, opt: &Opt) -> Result<()> {
    let config = match &opt.dispatch_config {
        Some(path) => DispatchConfig::read(path)?,
        None => DispatchConfig::msi_imzml(),
    };
    let lims = global.lims()?;
    let _cache = lims.enable_cache(&["resource", "dataset", "storage"], CACHE_SIZE);
    let definition = WorkunitDefinition::from_ref(&opt.workunit_ref, &lims, None)?;
    let chunks = dispatch_workunit(
        &lims,
        &config,
        &definition,
        &opt.work_dir,
        &mut ChunkPerResource::new(),
    )?;
    for chunk in &chunks.chunks {
        println!("{}", chunk.display());
    }
    Ok(())
}
