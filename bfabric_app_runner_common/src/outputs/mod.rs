//! Registering a chunk's outputs with the LIMS.
//!
//! Files are always copied to storage before the resource describing them
//! is saved, so the LIMS never advertises bytes which are not there yet.

use serde_json::{json, Value};
use std::collections::BTreeSet;

use crate::checksums::md5_file;
use crate::client::query_from_json;
use crate::entities::{Link, Resource, Storage, Workunit};
use crate::prelude::*;
use crate::scp::ScpPort;
use crate::specs::outputs::{
    CopyResourceSpec, OutputSpec, OutputsSpec, SaveDatasetSpec, SaveLinkSpec, UpdateExisting,
};
use crate::tabular::Table;
use crate::workunit_definition::{WorkunitDefinition, WorkunitRegistrationDefinition};

mod dataset_upload;

pub use self::dataset_upload::*;

/// Registers outputs against one LIMS.
pub struct Registrar<'a> {
    lims: &'a Lims,
    scp: &'a dyn ScpPort,
    ssh_user: Option<&'a str>,
    force_storage: Option<Storage>,
}

impl<'a> Registrar<'a> {
    /// Create a registrar which uploads files using `scp`.
    pub fn new(lims: &'a Lims, scp: &'a dyn ScpPort, ssh_user: Option<&'a str>) -> Registrar<'a> {
        Registrar {
            lims,
            scp,
            ssh_user,
            force_storage: None,
        }
    }

    /// Upload to `storage` instead of the workunit's registered storage.
    pub fn with_forced_storage(mut self, storage: Storage) -> Registrar<'a> {
        self.force_storage = Some(storage);
        self
    }

    /// Register every output declared in `outputs_yaml`. Relative local
    /// paths are interpreted relative to the directory containing it.
    #[instrument(level = "debug", skip(self, definition))]
    pub fn register_outputs(
        &self,
        outputs_yaml: &Path,
        definition: &WorkunitDefinition,
        reuse_default_resource: bool,
    ) -> Result<()> {
        let spec = OutputsSpec::read(outputs_yaml)?;
        let base_dir = outputs_yaml.parent().unwrap_or_else(|| Path::new("."));
        self.register_all(&spec.outputs, base_dir, definition, reuse_default_resource)
    }

    /// Register `outputs` in order.
    ///
    /// When `reuse_default_resource` is set, the first `copy_resource`
    /// updates the workunit's pending default resource instead of creating
    /// a new one.
    pub fn register_all(
        &self,
        outputs: &[OutputSpec],
        base_dir: &Path,
        definition: &WorkunitDefinition,
        reuse_default_resource: bool,
    ) -> Result<()> {
        let registration = definition.registration()?;
        warn_about_duplicate_store_paths(outputs);

        let mut default_resource_available = reuse_default_resource;
        for output in outputs {
            debug!("registering {:?}", output);
            match output {
                OutputSpec::CopyResource(spec) => {
                    let default_id = if default_resource_available {
                        default_resource_available = false;
                        self.default_resource_id(registration.workunit_id)?
                    } else {
                        None
                    };
                    self.copy_resource(spec, base_dir, registration, default_id)?;
                }
                OutputSpec::SaveDataset(spec) => self.save_dataset(spec, base_dir, registration)?,
                OutputSpec::SaveLink(spec) => self.save_link(spec)?,
            }
        }
        Ok(())
    }

    fn copy_resource(
        &self,
        spec: &CopyResourceSpec,
        base_dir: &Path,
        registration: &WorkunitRegistrationDefinition,
        default_id: Option<i64>,
    ) -> Result<()> {
        let local_path = base_dir.join(&spec.local_path);
        let existing_id = self.existing_resource_id(spec, registration.workunit_id)?;
        let resource_id = match (default_id, existing_id) {
            (Some(default_id), Some(existing_id)) if default_id != existing_id => {
                return Err(RunnerError::integrity(format!(
                    "default resource {} does not match existing resource {} for {}",
                    default_id, existing_id, spec.store_entry_path
                )))
            }
            (default_id, existing_id) => existing_id.or(default_id),
        };

        let storage = self.storage(registration.storage_id)?;
        let scp_prefix = storage.scp_prefix().ok_or_else(|| {
            RunnerError::config(format!("storage {} is not reachable over scp", storage.id()))
        })?;
        let output_folder = spec
            .store_folder_path
            .as_deref()
            .unwrap_or(&registration.storage_output_folder);
        let relative_path = output_folder.join(spec.store_entry_path.as_path());
        let checksum = md5_file(&local_path)?;
        let size = fs::metadata(&local_path)
            .with_context(|| format!("could not stat {}", local_path.display()))?
            .len();

        self.scp.scp(
            &local_path.display().to_string(),
            &format!("{}{}", scp_prefix, relative_path.display()),
            self.ssh_user,
            true,
        )?;

        let mut record = query_from_json(json!({
            "name": spec.store_entry_path.file_name(),
            "workunitid": registration.workunit_id,
            "storageid": storage.id(),
            "relativepath": relative_path.display().to_string(),
            "filechecksum": checksum,
            "status": "available",
            "size": size,
        }));
        if let Some(id) = resource_id {
            record.insert("id".to_owned(), Value::from(id));
        }
        self.lims
            .client()
            .save(Resource::ENDPOINT, record)
            .with_context(|| format!("could not register {}", spec.store_entry_path))?;
        info!("registered {} as resource", relative_path.display());
        Ok(())
    }

    /// Find the resource an update should overwrite. With several matches
    /// the lowest ID wins.
    fn existing_resource_id(&self, spec: &CopyResourceSpec, workunit_id: i64) -> Result<Option<i64>> {
        let name = spec.store_entry_path.file_name();
        let query = query_from_json(json!({"name": name, "workunitid": workunit_id}));
        self.existing_id::<Resource>(spec.update_existing, &query, || {
            format!("resource {} in workunit {}", name, workunit_id)
        })
    }

    fn existing_id<T: EntityType>(
        &self,
        update_existing: UpdateExisting,
        query: &Query,
        describe: impl Fn() -> String,
    ) -> Result<Option<i64>> {
        if update_existing == UpdateExisting::No {
            return Ok(None);
        }
        let found = self.lims.find_by::<T>(query, None)?;
        if found.len() > 1 {
            warn!(
                "{} matches {} records {:?}, updating the lowest",
                describe(),
                found.len(),
                found.keys().collect::<Vec<_>>(),
            );
        }
        match found.keys().next() {
            Some(id) => Ok(Some(*id)),
            None if update_existing == UpdateExisting::Required => Err(RunnerError::integrity(
                format!("{} is required to exist, but was not found", describe()),
            )),
            None => Ok(None),
        }
    }

    fn default_resource_id(&self, workunit_id: i64) -> Result<Option<i64>> {
        let workunit = self.lims.find_required::<Workunit>(workunit_id)?;
        let id = workunit.default_resource(self.lims)?.map(|r| r.id());
        debug!("default resource of workunit {}: {:?}", workunit_id, id);
        Ok(id)
    }

    fn storage(&self, storage_id: i64) -> Result<Storage> {
        match &self.force_storage {
            Some(storage) => Ok(storage.clone()),
            None => self.lims.find_required::<Storage>(storage_id),
        }
    }

    fn save_dataset(
        &self,
        spec: &SaveDatasetSpec,
        base_dir: &Path,
        registration: &WorkunitRegistrationDefinition,
    ) -> Result<()> {
        let local_path = base_dir.join(&spec.local_path);
        let table = Table::read_csv(&local_path, spec.separator_byte()?, spec.has_header)?;
        check_invalid_characters(&table, &spec.invalid_characters)?;

        let name = match &spec.name {
            Some(name) => name.clone(),
            None => local_path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .ok_or_else(|| format_err!("{} has no file name", local_path.display()))?,
        };
        let mut record = table_to_dataset_record(&table);
        record.insert("name".to_owned(), Value::from(name.as_str()));
        record.insert("containerid".to_owned(), Value::from(registration.container_id));
        record.insert("workunitid".to_owned(), Value::from(registration.workunit_id));
        let saved = self
            .lims
            .client()
            .save("dataset", record)
            .with_context(|| format!("could not save dataset {}", name))?;
        info!(
            "saved dataset {:?} with {} rows as {:?}",
            name,
            table.rows().len(),
            saved.records.first().and_then(crate::client::record_id),
        );
        Ok(())
    }

    fn save_link(&self, spec: &SaveLinkSpec) -> Result<()> {
        let query = query_from_json(json!({
            "name": spec.name,
            "parentclassname": spec.entity_type,
            "parentid": spec.entity_id,
        }));
        let existing_id = self.existing_id::<Link>(spec.update_existing, &query, || {
            format!("link {:?} on {} {}", spec.name, spec.entity_type, spec.entity_id)
        })?;
        let mut record = query_from_json(json!({
            "name": spec.name,
            "url": spec.url,
            "parentid": spec.entity_id,
            "parentclassname": spec.entity_type,
        }));
        if let Some(id) = existing_id {
            record.insert("id".to_owned(), Value::from(id));
        }
        self.lims.client().save(Link::ENDPOINT, record)?;
        info!("saved link {:?} on {} {}", spec.name, spec.entity_type, spec.entity_id);
        Ok(())
    }
}

/// Two uploads to the same path create two resources for one file. We
/// allow it, but it is almost certainly a mistake.
fn warn_about_duplicate_store_paths(outputs: &[OutputSpec]) {
    let mut seen = BTreeSet::new();
    for output in outputs {
        if let OutputSpec::CopyResource(spec) = output {
            let path = (spec.store_folder_path.clone(), spec.store_entry_path.clone());
            if !seen.insert(path) {
                warn!(
                    "store_entry_path {} is registered more than once",
                    spec.store_entry_path
                );
            }
        }
    }
}
