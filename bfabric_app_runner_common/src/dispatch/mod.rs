//! Splitting a workunit into chunks.
//!
//! A workunit names either a list of input resources or an input dataset.
//! The dispatcher walks whichever it has and calls a [`DispatchJob`] once per
//! resource (or dataset row). The job creates a chunk directory and returns
//! its path; the dispatcher records all of them in `chunks.yml`, next to a
//! snapshot of the workunit definition.

use crate::entities::{Dataset, Resource};
use crate::prelude::*;
use crate::specs::read_yaml;
use crate::workunit_definition::WorkunitDefinition;

mod chunk_per_resource;
mod chunks;

pub use self::chunk_per_resource::*;
pub use self::chunks::*;

/// The name of the workunit definition snapshot inside a work directory.
pub const WORKUNIT_DEFINITION_FILE_NAME: &str = "workunit_definition.yml";

/// Workunit parameters, by key.
pub type Params = BTreeMap<String, Option<String>>;

/// Creates the chunk directory for one resource.
pub trait DispatchJob {
    /// Create a chunk in `out_dir` processing `resource` with `params`, and
    /// return its path relative to `out_dir`.
    fn dispatch_job(&mut self, out_dir: &Path, resource: &Resource, params: &Params) -> Result<PathBuf>;
}

/// Settings for dispatching workunits with input resources.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceFlowConfig {
    /// Only dispatch resources whose relative path ends with this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_suffix: Option<String>,
}

/// Settings for dispatching workunits with an input dataset.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetFlowConfig {
    /// The dataset column holding resource IDs.
    #[serde(default = "DatasetFlowConfig::default_resource_column")]
    pub resource_column: String,
    /// `(dataset column, parameter name)` pairs copied into each chunk's
    /// parameters.
    #[serde(default = "DatasetFlowConfig::default_param_columns")]
    pub param_columns: Vec<(String, String)>,
}

impl DatasetFlowConfig {
    fn default_resource_column() -> String {
        "Imzml".to_owned()
    }

    fn default_param_columns() -> Vec<(String, String)> {
        vec![("PanelDataset".to_owned(), "mass_list_id".to_owned())]
    }
}

impl Default for DatasetFlowConfig {
    fn default() -> Self {
        DatasetFlowConfig {
            resource_column: DatasetFlowConfig::default_resource_column(),
            param_columns: DatasetFlowConfig::default_param_columns(),
        }
    }
}

/// Which kinds of workunit we can dispatch, and how.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchConfig {
    /// How to dispatch workunits with input resources.
    #[serde(default)]
    pub resource_flow: Option<ResourceFlowConfig>,
    /// How to dispatch workunits with an input dataset.
    #[serde(default)]
    pub dataset_flow: Option<DatasetFlowConfig>,
}

impl DispatchConfig {
    /// The settings for mass spectrometry imaging apps, which take either
    /// `.imzML` resources or a dataset with `Imzml` and `PanelDataset`
    /// columns.
    pub fn msi_imzml() -> DispatchConfig {
        DispatchConfig {
            resource_flow: Some(ResourceFlowConfig {
                filter_suffix: Some(".imzML".to_owned()),
            }),
            dataset_flow: Some(DatasetFlowConfig::default()),
        }
    }

    /// Read and validate a YAML config file.
    pub fn read(path: &Path) -> Result<DispatchConfig> {
        let config: DispatchConfig = read_yaml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// At least one flow must be configured.
    pub fn validate(&self) -> Result<()> {
        if self.resource_flow.is_none() && self.dataset_flow.is_none() {
            return Err(RunnerError::config(
                "either resource_flow or dataset_flow must be provided",
            ));
        }
        Ok(())
    }
}

/// Dispatch `definition` into chunks below `out_dir`, writing the workunit
/// definition snapshot and `chunks.yml`.
#[instrument(level = "debug", skip_all, fields(out_dir = %out_dir.display()))]
pub fn dispatch_workunit(
    lims: &Lims,
    config: &DispatchConfig,
    definition: &WorkunitDefinition,
    out_dir: &Path,
    job: &mut dyn DispatchJob,
) -> Result<ChunksFile> {
    config.validate()?;
    fs::create_dir_all(out_dir)
        .with_context(|| format!("could not create {}", out_dir.display()))?;
    let params = &definition.execution.raw_parameters;
    let chunks = if !definition.execution.resource_ids.is_empty() {
        dispatch_resource_flow(lims, config, definition, out_dir, params, job)?
    } else if let Some(dataset_id) = definition.execution.dataset_id {
        dispatch_dataset_flow(lims, config, dataset_id, out_dir, params, job)?
    } else {
        return Err(RunnerError::config(
            "either dataset or resources must be provided",
        ));
    };

    definition.to_yaml(&out_dir.join(WORKUNIT_DEFINITION_FILE_NAME))?;
    let chunks = ChunksFile { chunks };
    chunks.write(out_dir)?;
    info!("dispatched {} chunks into {}", chunks.chunks.len(), out_dir.display());
    Ok(chunks)
}

fn dispatch_resource_flow(
    lims: &Lims,
    config: &DispatchConfig,
    definition: &WorkunitDefinition,
    out_dir: &Path,
    params: &Params,
    job: &mut dyn DispatchJob,
) -> Result<Vec<PathBuf>> {
    let flow = config
        .resource_flow
        .as_ref()
        .ok_or_else(|| RunnerError::config("resource_flow is not configured"))?;
    let resources = lims.find_all::<Resource>(&definition.execution.resource_ids)?;

    let mut chunks = vec![];
    for resource in resources.values() {
        let relative_path = resource.relative_path()?;
        if let Some(suffix) = &flow.filter_suffix {
            if !relative_path.ends_with(suffix.as_str()) {
                warn!(
                    "skipping resource {} ({}): does not end with {:?}",
                    resource.id(),
                    relative_path,
                    suffix
                );
                continue;
            }
        }
        chunks.push(job.dispatch_job(out_dir, resource, params)?);
    }
    Ok(chunks)
}

fn dispatch_dataset_flow(
    lims: &Lims,
    config: &DispatchConfig,
    dataset_id: i64,
    out_dir: &Path,
    params: &Params,
    job: &mut dyn DispatchJob,
) -> Result<Vec<PathBuf>> {
    let flow = config
        .dataset_flow
        .as_ref()
        .ok_or_else(|| RunnerError::config("dataset_flow is not configured"))?;
    let table = lims.find_required::<Dataset>(dataset_id)?.to_table()?;
    let column_index = |name: &str| {
        table.column_index(name).ok_or_else(|| {
            RunnerError::config(format!(
                "dataset {} has no column {:?}, only {:?}",
                dataset_id,
                name,
                table.columns()
            ))
        })
    };
    let resource_idx = column_index(&flow.resource_column)?;
    let param_indices = flow
        .param_columns
        .iter()
        .map(|(column, name)| Ok((column_index(column)?, name.as_str())))
        .collect::<Result<Vec<_>>>()?;

    let resource_ids = table
        .column_values(resource_idx)
        .map(|value| {
            value.trim().parse::<i64>().map_err(|_| {
                RunnerError::config(format!(
                    "column {:?} holds {:?}, which is not a resource ID",
                    flow.resource_column, value
                ))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let resources = lims.find_all::<Resource>(&resource_ids)?;

    let mut chunks = vec![];
    for (row, resource_id) in table.rows().iter().zip(&resource_ids) {
        let resource = resources.get(resource_id).ok_or_else(|| RunnerError::EntityNotFound {
            entity: Resource::ENDPOINT.to_owned(),
            ids: vec![*resource_id],
        })?;
        let mut row_params = params.clone();
        for (idx, name) in &param_indices {
            row_params.insert((*name).to_owned(), Some(row[*idx].clone()));
        }
        chunks.push(job.dispatch_job(out_dir, resource, &row_params)?);
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::example_dataset;
    use crate::errors::runner_error;
    use crate::workunit_definition::tests::example_lims;
    use crate::workunit_definition::WorkunitExecutionDefinition;
    use assert_matches::assert_matches;

    /// Records what it was asked to dispatch.
    #[derive(Default)]
    struct RecordingJob {
        jobs: Vec<(i64, Params)>,
    }

    impl DispatchJob for RecordingJob {
        fn dispatch_job(&mut self, _out_dir: &Path, resource: &Resource, params: &Params) -> Result<PathBuf> {
            self.jobs.push((resource.id(), params.clone()));
            Ok(PathBuf::from(format!("job_{}", self.jobs.len())))
        }
    }

    fn dataset_definition(dataset_id: i64) -> WorkunitDefinition {
        let mut raw_parameters = Params::new();
        raw_parameters.insert("mass_list_id".to_owned(), Some("1".to_owned()));
        raw_parameters.insert("tolerance".to_owned(), None);
        WorkunitDefinition {
            execution: WorkunitExecutionDefinition {
                raw_parameters,
                executable_path: None,
                dataset_id: Some(dataset_id),
                resource_ids: vec![],
            },
            registration: None,
        }
    }

    #[test]
    fn resource_flow_filters_by_suffix() {
        let lims = example_lims().lims();
        let definition = WorkunitDefinition::from_workunit_id(42, &lims).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut job = RecordingJob::default();

        let chunks =
            dispatch_workunit(&lims, &DispatchConfig::msi_imzml(), &definition, dir.path(), &mut job)
                .unwrap();
        let ids = job.jobs.iter().map(|(id, _)| *id).collect::<Vec<_>>();
        assert_eq!(ids, vec![10, 12]);
        assert_eq!(job.jobs[0].1, definition.execution.raw_parameters);
        assert_eq!(chunks.chunks, vec![PathBuf::from("job_1"), PathBuf::from("job_2")]);
        assert_eq!(ChunksFile::read(dir.path()).unwrap(), chunks);
        assert_eq!(
            WorkunitDefinition::from_yaml(&dir.path().join(WORKUNIT_DEFINITION_FILE_NAME)).unwrap(),
            definition
        );
    }

    #[test]
    fn resource_flow_without_suffix_takes_everything() {
        let lims = example_lims().lims();
        let definition = WorkunitDefinition::from_workunit_id(42, &lims).unwrap();
        let config = DispatchConfig {
            resource_flow: Some(ResourceFlowConfig::default()),
            dataset_flow: None,
        };
        let dir = tempfile::tempdir().unwrap();
        let mut job = RecordingJob::default();
        let chunks = dispatch_workunit(&lims, &config, &definition, dir.path(), &mut job).unwrap();
        assert_eq!(chunks.chunks.len(), 3);
    }

    #[test]
    fn dataset_flow_merges_row_parameters_in_row_order() {
        let fake = example_lims();
        fake.insert("dataset", example_dataset(5));
        let lims = fake.lims();
        let dir = tempfile::tempdir().unwrap();
        let mut job = RecordingJob::default();

        dispatch_workunit(&lims, &DispatchConfig::msi_imzml(), &dataset_definition(5), dir.path(), &mut job)
            .unwrap();
        assert_eq!(job.jobs.len(), 2);
        assert_eq!(job.jobs[0].0, 10);
        assert_eq!(job.jobs[0].1["mass_list_id"].as_deref(), Some("501"));
        assert_eq!(job.jobs[1].0, 11);
        assert_eq!(job.jobs[1].1["mass_list_id"].as_deref(), Some("500"));
        assert_eq!(job.jobs[1].1["tolerance"], None);
    }

    #[test]
    fn unconfigured_flows_are_config_errors() {
        let fake = example_lims();
        fake.insert("dataset", example_dataset(5));
        let lims = fake.lims();
        let config = DispatchConfig {
            resource_flow: Some(ResourceFlowConfig::default()),
            dataset_flow: None,
        };
        let dir = tempfile::tempdir().unwrap();
        let err = dispatch_workunit(&lims, &config, &dataset_definition(5), dir.path(), &mut RecordingJob::default())
            .unwrap_err();
        assert_matches!(runner_error(&err), Some(RunnerError::Config(_)));

        assert!(DispatchConfig::default().validate().is_err());
    }

    #[test]
    fn config_files_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dispatch.yml");
        fs::write(&path, "dataset_flow: {}\n").unwrap();
        let config = DispatchConfig::read(&path).unwrap();
        assert_eq!(config.dataset_flow, Some(DatasetFlowConfig::default()));
        assert_eq!(config.resource_flow, None);
    }
}
