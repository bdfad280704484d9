//! What to run, and where to register the results.
//!
//! A [`WorkunitDefinition`] is built from a LIMS workunit once, and then
//! written to `workunit_definition.yml` so that later steps (and offline
//! development runs) need not consult the LIMS again.

use std::str::FromStr;

use crate::entities::{ContainerType, Workunit};
use crate::prelude::*;

/// How to execute a workunit.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WorkunitExecutionDefinition {
    /// All parameters of the workunit, by key.
    pub raw_parameters: BTreeMap<String, Option<String>>,
    /// The executable registered for the application, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable_path: Option<PathBuf>,
    /// The input dataset.
    #[serde(default, rename = "dataset")]
    pub dataset_id: Option<i64>,
    /// The input resources.
    #[serde(default, rename = "resources")]
    pub resource_ids: Vec<i64>,
}

impl WorkunitExecutionDefinition {
    /// Check that exactly one of `dataset_id` and `resource_ids` is set.
    pub fn validate(&self) -> Result<()> {
        match (self.dataset_id, self.resource_ids.is_empty()) {
            (Some(_), false) => Err(RunnerError::config(
                "dataset and resources are mutually exclusive",
            )),
            (None, true) => Err(RunnerError::config(
                "either dataset or resources must be provided",
            )),
            _ => Ok(()),
        }
    }

    /// Build from a LIMS workunit.
    pub fn from_workunit(workunit: &Workunit, lims: &Lims) -> Result<Self> {
        let application = workunit.application(lims)?;
        let raw_parameters = workunit
            .parameters(lims)?
            .iter()
            .filter_map(|p| p.key().map(|key| (key.to_owned(), p.value())))
            .collect();
        let executable_path = application
            .executable(lims)?
            .and_then(|e| e.program().map(PathBuf::from));
        let definition = WorkunitExecutionDefinition {
            raw_parameters,
            executable_path,
            dataset_id: workunit.input_dataset(lims)?.map(|d| d.id()),
            resource_ids: workunit.input_resources(lims)?.ids(),
        };
        definition.validate()?;
        Ok(definition)
    }
}

/// Where to register the results of a workunit.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WorkunitRegistrationDefinition {
    /// The application which was run.
    pub application_id: i64,
    /// The name of that application.
    pub application_name: String,
    /// The workunit to register results with.
    pub workunit_id: i64,
    /// The name of that workunit.
    pub workunit_name: String,
    /// The owning container.
    pub container_id: i64,
    /// Is the owning container a project or an order?
    pub container_type: ContainerType,
    /// The storage receiving the outputs.
    pub storage_id: i64,
    /// The folder within that storage receiving the outputs.
    pub storage_output_folder: PathBuf,
}

impl WorkunitRegistrationDefinition {
    /// Build from a LIMS workunit.
    pub fn from_workunit(workunit: &Workunit, lims: &Lims) -> Result<Self> {
        let application = workunit.application(lims)?;
        let storage = application.storage(lims)?.ok_or_else(|| {
            format_err!("application {} has no storage", application.id())
        })?;
        let (container_type, container_id) = workunit.container_ref()?;
        Ok(WorkunitRegistrationDefinition {
            application_id: application.id(),
            application_name: application.name()?.to_owned(),
            workunit_id: workunit.id(),
            workunit_name: workunit.name().unwrap_or_default().to_owned(),
            container_id,
            container_type,
            storage_id: storage.id(),
            storage_output_folder: workunit.store_output_folder(lims)?,
        })
    }
}

/// A complete workunit definition.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WorkunitDefinition {
    /// How to execute the workunit.
    pub execution: WorkunitExecutionDefinition,
    /// Where to register its results. Offline snapshots may leave this out.
    #[serde(default)]
    pub registration: Option<WorkunitRegistrationDefinition>,
}

impl WorkunitDefinition {
    /// Build from the workunit with the specified ID.
    #[instrument(level = "debug", skip(lims))]
    pub fn from_workunit_id(id: i64, lims: &Lims) -> Result<WorkunitDefinition> {
        let workunit = lims.find_required::<Workunit>(id)?;
        Ok(WorkunitDefinition {
            execution: WorkunitExecutionDefinition::from_workunit(&workunit, lims)?,
            registration: Some(WorkunitRegistrationDefinition::from_workunit(&workunit, lims)?),
        })
    }

    /// Resolve a reference. If `cache_file` exists, it is loaded instead;
    /// otherwise the result is written to it.
    pub fn from_ref(
        workunit_ref: &WorkunitRef,
        lims: &Lims,
        cache_file: Option<&Path>,
    ) -> Result<WorkunitDefinition> {
        if let Some(cache_file) = cache_file {
            if cache_file.exists() {
                debug!("using cached workunit definition {}", cache_file.display());
                return WorkunitDefinition::from_yaml(cache_file);
            }
        }
        let definition = match workunit_ref {
            WorkunitRef::Path(path) => WorkunitDefinition::from_yaml(path)?,
            WorkunitRef::Id(id) => WorkunitDefinition::from_workunit_id(*id, lims)?,
        };
        if let Some(cache_file) = cache_file {
            if let Some(parent) = cache_file.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("could not create {}", parent.display()))?;
            }
            definition.to_yaml(cache_file)?;
        }
        Ok(definition)
    }

    /// The registration details, which are required to register outputs.
    pub fn registration(&self) -> Result<&WorkunitRegistrationDefinition> {
        self.registration.as_ref().ok_or_else(|| {
            RunnerError::config("workunit definition has no registration section")
        })
    }

    /// Parse YAML, checking all invariants.
    pub fn from_yaml_str(text: &str) -> Result<WorkunitDefinition> {
        let definition: WorkunitDefinition = serde_yaml::from_str(text)
            .map_err(|err| RunnerError::config(format!("invalid workunit definition: {}", err)))?;
        definition.execution.validate()?;
        Ok(definition)
    }

    /// Load from a YAML file.
    pub fn from_yaml(path: &Path) -> Result<WorkunitDefinition> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("could not read {}", path.display()))?;
        WorkunitDefinition::from_yaml_str(&text)
            .with_context(|| format!("could not load {}", path.display()))
    }

    /// Serialize to YAML.
    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Write to a YAML file.
    pub fn to_yaml(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_yaml_string()?)
            .with_context(|| format!("could not write {}", path.display()))
    }
}

/// A workunit, given either by ID or by a YAML snapshot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WorkunitRef {
    /// A workunit ID in the LIMS.
    Id(i64),
    /// A path to a `workunit_definition.yml`.
    Path(PathBuf),
}

impl FromStr for WorkunitRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.parse::<i64>() {
            Ok(id) => Ok(WorkunitRef::Id(id)),
            Err(_) => Ok(WorkunitRef::Path(PathBuf::from(s))),
        }
    }
}

impl fmt::Display for WorkunitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkunitRef::Id(id) => id.fmt(f),
            WorkunitRef::Path(path) => path.display().fmt(f),
        }
    }
}
