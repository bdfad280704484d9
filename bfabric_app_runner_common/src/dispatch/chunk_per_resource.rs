//! A ready-made dispatch job that gives every resource its own chunk.

use std::collections::BTreeSet;

use super::{DispatchJob, Params};
use crate::entities::Resource;
use crate::prelude::*;
use crate::specs::inputs::{InputSpec, InputsSpec, ResourceSpec, StaticYamlSpec};
use crate::specs::outputs::OutputsSpec;
use crate::specs::RelativePath;

/// Creates one `resource_<id>` chunk per resource, staging the resource and
/// a `params.yml` with the chunk's parameters. `outputs.yml` starts empty,
/// for the app's `collect` step to fill in.
#[derive(Debug, Default)]
pub struct ChunkPerResource {
    used_names: BTreeSet<String>,
}

impl ChunkPerResource {
    /// Create a new job.
    pub fn new() -> ChunkPerResource {
        ChunkPerResource::default()
    }

    fn chunk_name(&mut self, resource_id: i64) -> String {
        let base = format!("resource_{}", resource_id);
        let mut name = base.clone();
        let mut n = 1;
        while self.used_names.contains(&name) {
            n += 1;
            name = format!("{}_{}", base, n);
        }
        self.used_names.insert(name.clone());
        name
    }
}

impl DispatchJob for ChunkPerResource {
    fn dispatch_job(&mut self, out_dir: &Path, resource: &Resource, params: &Params) -> Result<PathBuf> {
        let name = self.chunk_name(resource.id());
        let chunk_dir = out_dir.join(&name);
        fs::create_dir_all(&chunk_dir)
            .with_context(|| format!("could not create {}", chunk_dir.display()))?;

        let inputs = InputsSpec {
            inputs: vec![
                InputSpec::BfabricResource(ResourceSpec {
                    id: resource.id(),
                    filename: None,
                    check_checksum: true,
                }),
                InputSpec::StaticYaml(StaticYamlSpec {
                    data: serde_yaml::to_value(params)?,
                    filename: RelativePath::new("params.yml")?,
                }),
            ],
        };
        inputs.write(&chunk_dir.join("inputs.yml"))?;
        OutputsSpec::default().write(&chunk_dir.join("outputs.yml"))?;
        debug!("created chunk {} for resource {}", name, resource.id());
        Ok(PathBuf::from(name))
    }
}
