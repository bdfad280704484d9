use chrono::DateTime;

use crate::client::query_from_json;
use crate::prelude::*;

use super::{
    container_ref, Application, Container, ContainerType, Dataset, EntityList, ExternalJob,
    Parameter, ParameterContext, Resource,
};

entity_view!(
    /// A single job instance in the LIMS.
    Workunit,
    "workunit"
);

/// Names of the log resources which the scheduler attaches to workunits.
const LOG_RESOURCE_NAMES: &[&str] = &["slurm_stdout", "slurm_stderr"];

/// The lifecycle states of a workunit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkunitStatus {
    /// Submitted, not yet started.
    Pending,
    /// Being processed by the runner.
    Processing,
    /// Finished successfully.
    Available,
    /// Finished unsuccessfully.
    Failed,
}

impl fmt::Display for WorkunitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkunitStatus::Pending => "pending",
            WorkunitStatus::Processing => "processing",
            WorkunitStatus::Available => "available",
            WorkunitStatus::Failed => "failed",
        };
        s.fmt(f)
    }
}

/// A workunit's parameters, split by who set them.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ParametersByContext {
    /// Parameters from the application definition.
    pub application: BTreeMap<String, Option<String>>,
    /// Parameters from the submitter.
    pub submitter: BTreeMap<String, Option<String>>,
    /// Parameters entered by the user.
    pub workunit: BTreeMap<String, Option<String>>,
}

impl Workunit {
    /// The workunit name.
    pub fn name(&self) -> Option<&str> {
        self.entity.str_field("name")
    }

    /// The raw status string.
    pub fn status(&self) -> Option<&str> {
        self.entity.str_field("status")
    }

    /// When the workunit was created.
    pub fn created(&self) -> Result<NaiveDateTime> {
        parse_timestamp(self.entity.required_str("created")?)
    }

    /// The application this workunit runs.
    pub fn application(&self, lims: &Lims) -> Result<Application> {
        lims.has_one(&self.entity, "application")
    }

    /// The kind and ID of the owning container, without loading it.
    pub fn container_ref(&self) -> Result<(ContainerType, i64)> {
        container_ref(&self.entity, "container")
    }

    /// The owning project or order.
    pub fn container(&self, lims: &Lims) -> Result<Container> {
        Container::load(lims, &self.entity, "container")
    }

    /// The parameters of this workunit.
    pub fn parameters(&self, lims: &Lims) -> Result<EntityList<Parameter>> {
        lims.has_many(&self.entity, "parameter", true)
    }

    /// The parameters of this workunit, split by context. Parameters
    /// without a known context are left out.
    pub fn parameters_by_context(&self, lims: &Lims) -> Result<ParametersByContext> {
        let mut by_context = ParametersByContext::default();
        for param in &self.parameters(lims)? {
            let key = match param.key() {
                Some(key) => key.to_owned(),
                None => continue,
            };
            let map = match param.context() {
                Some(ParameterContext::Application) => &mut by_context.application,
                Some(ParameterContext::Submitter) => &mut by_context.submitter,
                Some(ParameterContext::Workunit) => &mut by_context.workunit,
                None => continue,
            };
            map.insert(key, param.value());
        }
        Ok(by_context)
    }

    /// The output resources of this workunit.
    pub fn resources(&self, lims: &Lims) -> Result<EntityList<Resource>> {
        lims.has_many(&self.entity, "resource", true)
    }

    /// The input resources of this workunit.
    pub fn input_resources(&self, lims: &Lims) -> Result<EntityList<Resource>> {
        lims.has_many(&self.entity, "inputresource", true)
    }

    /// The input dataset of this workunit, if it has one.
    pub fn input_dataset(&self, lims: &Lims) -> Result<Option<Dataset>> {
        lims.has_one_optional(&self.entity, "inputdataset")
    }

    /// The external jobs referencing this workunit.
    pub fn external_jobs(&self, lims: &Lims) -> Result<EntityList<ExternalJob>> {
        lims.has_many(&self.entity, "externaljob", true)
    }

    /// The pre-allocated resource which the first output should reuse: the
    /// only non-log resource, if it is still `pending`.
    pub fn default_resource(&self, lims: &Lims) -> Result<Option<Resource>> {
        let candidates = self
            .resources(lims)?
            .into_vec()
            .into_iter()
            .filter(|r| !r.name().map_or(false, |n| LOG_RESOURCE_NAMES.contains(&n)))
            .collect::<Vec<_>>();
        match candidates.as_slice() {
            [only] if only.status() == Some("pending") => Ok(Some(only.clone())),
            [_] => Ok(None),
            [] => Ok(None),
            _ => {
                debug!(
                    "workunit {} has {} candidate default resources, not reusing any",
                    self.id(),
                    candidates.len()
                );
                Ok(None)
            }
        }
    }

    /// The folder, relative to the storage base path, where outputs of this
    /// workunit are stored:
    /// `{prefix}{container}/bfabric/{technology}/{app}/YYYY/YYYY-MM/YYYY-MM-DD/workunit_{id}`.
    pub fn store_output_folder(&self, lims: &Lims) -> Result<PathBuf> {
        let application = self.application(lims)?;
        let storage = application.storage(lims)?.ok_or_else(|| {
            format_err!(
                "cannot determine output folder of workunit {}: application {} has no storage",
                self.id(),
                application.id(),
            )
        })?;
        let (_, container_id) = self.container_ref()?;
        let created = self.created()?;
        Ok(PathBuf::from(format!(
            "{}{}/bfabric/{}/{}/{}/workunit_{}",
            storage.project_folder_prefix(),
            container_id,
            application.technology_folder()?,
            path_safe(application.name()?),
            created.format("%Y/%Y-%m/%Y-%m-%d"),
            self.id(),
        )))
    }

    /// Save a new status for this workunit.
    pub fn set_status(client: &Client, id: i64, status: WorkunitStatus) -> Result<()> {
        info!("setting workunit {} status to {}", id, status);
        client
            .save(
                Self::ENDPOINT,
                query_from_json(serde_json::json!({"id": id, "status": status.to_string()})),
            )
            .with_context(|| format!("could not set status of workunit {}", id))?;
        Ok(())
    }
}

/// Parse the timestamps the LIMS sends, which are either
/// `YYYY-MM-DD HH:MM:SS` or ISO 8601.
fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    for format in &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(parsed);
        }
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.naive_local())
        .map_err(|_| format_err!("could not parse timestamp {:?}", raw))
}

/// Make a name usable as a single path component: spaces become `_`, and
/// anything other than ASCII letters, digits, `_`, `-` and `.` is dropped.
pub fn path_safe(name: &str) -> String {
    name.trim()
        .replace(' ', "_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeLims;
    use serde_json::json;

    fn s1_lims() -> FakeLims {
        let fake = FakeLims::new();
        fake.insert("storage", json!({"id": 2, "host": "fgcz-ms", "basepath": "/srv", "protocol": "scp", "projectfolderprefix": "p"}));
        fake.insert(
            "application",
            json!({"id": 7, "name": "MyApp", "technology": ["Proteomics"], "storage": {"classname": "storage", "id": 2}}),
        );
        fake.insert(
            "workunit",
            json!({
                "id": 42,
                "created": "2024-01-02 03:04:05",
                "application": {"classname": "application", "id": 7},
                "container": {"classname": "project", "id": 3000},
                "inputresource": [{"id": 10}, {"id": 11}, {"id": 12}],
            }),
        );
        fake
    }

    #[test]
    fn store_output_folder_follows_layout() {
        let fake = s1_lims();
        let lims = fake.lims();
        let workunit = lims.find_required::<Workunit>(42).unwrap();
        assert_eq!(
            workunit.store_output_folder(&lims).unwrap(),
            PathBuf::from("p3000/bfabric/Proteomics/MyApp/2024/2024-01/2024-01-02/workunit_42")
        );
    }

    #[test]
    fn parses_both_timestamp_formats() {
        let expected = NaiveDateTime::parse_from_str("2024-01-02 03:04:05", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(parse_timestamp("2024-01-02 03:04:05").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-02T03:04:05+01:00").unwrap(), expected);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn path_safe_strips_unsafe_characters() {
        assert_eq!(path_safe("My App (v2)/beta"), "My_App_v2beta");
    }

    #[test]
    fn default_resource_ignores_logs_and_requires_pending() {
        let fake = FakeLims::new();
        fake.insert("resource", json!({"id": 777, "name": "result.zip", "status": "pending"}));
        fake.insert("resource", json!({"id": 778, "name": "slurm_stdout", "status": "available"}));
        fake.insert("resource", json!({"id": 779, "name": "done.zip", "status": "available"}));
        fake.insert("workunit", json!({"id": 1, "resource": [{"id": 777}, {"id": 778}]}));
        fake.insert("workunit", json!({"id": 2, "resource": [{"id": 779}]}));
        fake.insert("workunit", json!({"id": 3, "resource": [{"id": 777}, {"id": 779}]}));
        let lims = fake.lims();
        let default_of = |id| {
            lims.find_required::<Workunit>(id)
                .unwrap()
                .default_resource(&lims)
                .unwrap()
                .map(|r| r.id())
        };
        assert_eq!(default_of(1), Some(777));
        assert_eq!(default_of(2), None);
        assert_eq!(default_of(3), None);
    }

    #[test]
    fn parameters_are_split_by_context() {
        let fake = FakeLims::new();
        fake.insert("parameter", json!({"id": 1, "key": "application_version", "value": "1.0", "context": "APPLICATION"}));
        fake.insert("parameter", json!({"id": 2, "key": "mass_tolerance", "value": 5, "context": "WORKUNIT"}));
        fake.insert("workunit", json!({"id": 9, "parameter": [{"id": 1}, {"id": 2}]}));
        let lims = fake.lims();
        let workunit = lims.find_required::<Workunit>(9).unwrap();
        let params = workunit.parameters_by_context(&lims).unwrap();
        assert_eq!(params.application["application_version"].as_deref(), Some("1.0"));
        assert_eq!(params.workunit["mass_tolerance"].as_deref(), Some("5"));
        assert!(params.submitter.is_empty());
    }
}
