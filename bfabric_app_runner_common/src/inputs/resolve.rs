//! Turning input specs into [`ResolvedInputs`].
//!
//! All LIMS lookups happen here, batched by entity type, so that listing,
//! integrity checks, staging and cleaning can share one resolution.

use crate::entities::{ContainerType, Dataset, Order, Resource, Storage, Workunit};
use crate::prelude::*;
use crate::specs::inputs::{
    ColumnRef, DatasetFormat, FastaEntity, FileSource, InputSpec, OrderFastaSpec,
    ResourceDatasetSpec,
};
use crate::specs::RelativePath;

use super::resolved::{
    ResolvedDirectory, ResolvedFile, ResolvedInput, ResolvedInputs, ResolvedStaticFile,
};
use super::PathFilter;

/// A resource together with where its bytes can be fetched from.
struct LocatedResource {
    resource: Resource,
    source: FileSource,
}

/// Resolves input specs using the LIMS.
pub struct Resolver<'a> {
    lims: &'a Lims,
}

impl<'a> Resolver<'a> {
    /// Create a resolver which looks entities up in `lims`.
    pub fn new(lims: &'a Lims) -> Resolver<'a> {
        Resolver { lims }
    }

    /// Resolve `specs`, keeping their order.
    #[instrument(level = "debug", skip_all, fields(count = specs.len()))]
    pub fn resolve(&self, specs: &[InputSpec]) -> Result<ResolvedInputs> {
        let resource_ids = specs
            .iter()
            .filter_map(|spec| match spec {
                InputSpec::BfabricResource(spec) => Some(spec.id),
                InputSpec::BfabricResourceArchive(spec) => Some(spec.id),
                _ => None,
            })
            .collect::<Vec<_>>();
        let resources = self.locate_resources(&resource_ids)?;

        let dataset_ids = specs
            .iter()
            .filter_map(|spec| match spec {
                InputSpec::BfabricDataset(spec) => Some(spec.id),
                _ => None,
            })
            .collect::<Vec<_>>();
        let datasets = self.lims.find_all::<Dataset>(&dataset_ids)?;

        let mut files = vec![];
        for spec in specs {
            match spec {
                InputSpec::BfabricResource(spec) => {
                    let located = &resources[&spec.id];
                    let filename = match &spec.filename {
                        Some(filename) => filename.clone(),
                        None => RelativePath::new(located.resource.filename()?)?,
                    };
                    files.push(ResolvedInput::File(ResolvedFile {
                        filename,
                        source: located.source.clone(),
                        link: false,
                        checksum: checksum_if(spec.check_checksum, &located.resource),
                    }));
                }
                InputSpec::BfabricResourceArchive(spec) => {
                    let located = &resources[&spec.id];
                    files.push(ResolvedInput::Directory(ResolvedDirectory {
                        filename: spec.filename.clone(),
                        source: located.source.clone(),
                        extract: spec.extract,
                        include_patterns: spec.include_patterns.clone(),
                        exclude_patterns: spec.exclude_patterns.clone(),
                        strip_root: spec.strip_root,
                        checksum: checksum_if(spec.check_checksum, &located.resource),
                    }));
                }
                InputSpec::BfabricDataset(spec) => {
                    let dataset = datasets.get(&spec.id).ok_or_else(|| RunnerError::EntityNotFound {
                        entity: Dataset::ENDPOINT.to_owned(),
                        ids: vec![spec.id],
                    })?;
                    let table = dataset.to_table()?;
                    let content = match spec.format {
                        DatasetFormat::Csv => table.to_csv(spec.separator_byte()?)?,
                        DatasetFormat::Parquet => table.to_parquet()?,
                    };
                    files.push(ResolvedInput::Static(ResolvedStaticFile {
                        filename: spec.filename.clone(),
                        content,
                    }));
                }
                InputSpec::BfabricResourceDataset(spec) => {
                    files.extend(self.resolve_resource_dataset(spec)?);
                }
                InputSpec::BfabricOrderFasta(spec) => {
                    files.push(ResolvedInput::Static(ResolvedStaticFile {
                        filename: spec.filename.clone(),
                        content: self.order_fasta(spec)?.into_bytes(),
                    }));
                }
                InputSpec::File(spec) => {
                    files.push(ResolvedInput::File(ResolvedFile {
                        filename: spec.target_filename()?,
                        source: spec.source.clone(),
                        link: spec.link,
                        checksum: spec.checksum.clone(),
                    }));
                }
                InputSpec::FileScp(spec) => {
                    files.push(ResolvedInput::File(ResolvedFile {
                        filename: spec.target_filename()?,
                        source: FileSource::Ssh {
                            host: spec.host.clone(),
                            path: spec.absolute_path.clone(),
                        },
                        link: false,
                        checksum: None,
                    }));
                }
                InputSpec::StaticYaml(spec) => {
                    files.push(ResolvedInput::Static(ResolvedStaticFile {
                        filename: spec.filename.clone(),
                        content: serde_yaml::to_string(&spec.data)?.into_bytes(),
                    }));
                }
                InputSpec::StaticFile(spec) => {
                    files.push(ResolvedInput::Static(ResolvedStaticFile {
                        filename: spec.filename.clone(),
                        content: spec.content.clone().into_bytes(),
                    }));
                }
            }
        }
        ResolvedInputs::new(files)
    }

    /// Load resources and their storages with one read per entity type.
    /// Every resource must exist.
    fn locate_resources(&self, ids: &[i64]) -> Result<BTreeMap<i64, LocatedResource>> {
        if ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let resources = self.lims.find_all::<Resource>(ids)?;
        let missing = ids
            .iter()
            .filter(|id| !resources.contains_key(id))
            .copied()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(RunnerError::EntityNotFound {
                entity: Resource::ENDPOINT.to_owned(),
                ids: missing,
            }
            .into());
        }

        let mut storage_ids = resources
            .values()
            .map(|resource| {
                resource
                    .entity()
                    .ref_id("storage")
                    .ok_or_else(|| format_err!("resource {} has no storage", resource.id()))
            })
            .collect::<Result<Vec<_>>>()?;
        storage_ids.sort_unstable();
        storage_ids.dedup();
        let storages = self.lims.find_all::<Storage>(&storage_ids)?;

        let mut located = BTreeMap::new();
        for (id, resource) in resources {
            let storage_id = resource.entity().ref_id("storage").unwrap_or_default();
            let storage = storages.get(&storage_id).ok_or_else(|| RunnerError::EntityNotFound {
                entity: Storage::ENDPOINT.to_owned(),
                ids: vec![storage_id],
            })?;
            let path = resource.storage_absolute_path(storage)?;
            let source = FileSource::Ssh {
                host: storage.host()?.to_owned(),
                path: path.to_string_lossy().into_owned(),
            };
            located.insert(id, LocatedResource { resource, source });
        }
        Ok(located)
    }

    /// Resolve every resource referenced by a dataset column, plus a table
    /// describing the staged files.
    fn resolve_resource_dataset(&self, spec: &ResourceDatasetSpec) -> Result<Vec<ResolvedInput>> {
        let dataset = self.lims.find_required::<Dataset>(spec.id)?;
        let table = dataset.to_table()?;

        let column = match &spec.column {
            ColumnRef::Index(idx) if *idx < table.columns().len() => Some(*idx),
            ColumnRef::Index(_) => None,
            ColumnRef::Name(name) => table.column_index_ignore_case(name),
        };
        let column = column.ok_or_else(|| {
            RunnerError::config(format!(
                "dataset {} has no column {} (columns: {})",
                spec.id,
                spec.column,
                table.columns().join(", ")
            ))
        })?;

        let row_ids = table
            .column_values(column)
            .map(|cell| {
                cell.trim().parse::<i64>().map_err(|_| {
                    RunnerError::config(format!(
                        "dataset {} column {} holds {:?}, which is not a resource ID",
                        spec.id, spec.column, cell
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let mut unique_ids = row_ids.clone();
        unique_ids.sort_unstable();
        unique_ids.dedup();
        let resources = self.locate_resources(&unique_ids)?;

        let filter = PathFilter::new(&spec.include_patterns, &spec.exclude_patterns)?;
        let mut kept_rows = vec![];
        for (row, id) in row_ids.iter().enumerate() {
            if filter.matches(resources[id].resource.relative_path()?) {
                kept_rows.push(row);
            }
        }

        let mut described = table.select_rows(&kept_rows);
        let file_column = unique_column_name(described.columns(), &spec.output_dataset_file_column)?;
        let filenames = kept_rows
            .iter()
            .map(|&row| Ok(resources[&row_ids[row]].resource.filename()?.to_owned()))
            .collect::<Result<Vec<_>>>()?;
        described.add_column(&file_column, filenames.clone())?;

        let mut files = vec![ResolvedInput::Static(ResolvedStaticFile {
            filename: spec.filename.join(spec.output_dataset_filename.as_str())?,
            content: described.to_parquet()?,
        })];
        if !spec.output_dataset_only {
            for (&row, filename) in kept_rows.iter().zip(&filenames) {
                let located = &resources[&row_ids[row]];
                files.push(ResolvedInput::File(ResolvedFile {
                    filename: spec.filename.join(filename)?,
                    source: located.source.clone(),
                    link: false,
                    checksum: checksum_if(spec.check_checksum, &located.resource),
                }));
            }
        }
        Ok(files)
    }

    /// Look up the FASTA sequence of an order.
    fn order_fasta(&self, spec: &OrderFastaSpec) -> Result<String> {
        let order = match spec.entity {
            FastaEntity::Order => match self.lims.find::<Order>(spec.id)? {
                Some(order) => Some(order),
                None if spec.required => {
                    return Err(RunnerError::EntityNotFound {
                        entity: Order::ENDPOINT.to_owned(),
                        ids: vec![spec.id],
                    }
                    .into())
                }
                None => {
                    warn!("order {} not found, writing an empty FASTA file", spec.id);
                    None
                }
            },
            FastaEntity::Workunit => {
                let workunit = self.lims.find_required::<Workunit>(spec.id)?;
                match workunit.container_ref()? {
                    (ContainerType::Order, order_id) => Some(self.lims.find_required::<Order>(order_id)?),
                    (ContainerType::Project, _) if spec.required => {
                        return Err(format_err!(
                            "workunit {} is not associated with an order",
                            spec.id
                        ))
                    }
                    (ContainerType::Project, _) => {
                        warn!(
                            "workunit {} is not associated with an order, writing an empty FASTA file",
                            spec.id
                        );
                        None
                    }
                }
            }
        };
        Ok(order
            .as_ref()
            .and_then(Order::fasta_sequence)
            .unwrap_or_default()
            .to_owned())
    }
}

fn checksum_if(check: bool, resource: &Resource) -> Option<String> {
    if check {
        resource.file_checksum().map(str::to_owned)
    } else {
        None
    }
}

/// Pick `name`, or `name.1` through `name.9` if it is taken.
fn unique_column_name(columns: &[String], name: &str) -> Result<String> {
    if !columns.iter().any(|c| c == name) {
        return Ok(name.to_owned());
    }
    (1..10)
        .map(|i| format!("{}.{}", name, i))
        .find(|candidate| !columns.iter().any(|c| c == candidate))
        .ok_or_else(|| format_err!("could not find a free column name for {:?}", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::example_dataset;
    use crate::errors::runner_error;
    use crate::specs::inputs::InputsSpec;
    use crate::testing::{FakeLims, LimsCall};
    use crate::workunit_definition::tests::example_lims;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn resolve(fake: &FakeLims, yaml: &str) -> Result<ResolvedInputs> {
        let spec = InputsSpec::from_yaml_str(yaml)?;
        Resolver::new(&fake.lims()).resolve(&spec.inputs)
    }

    #[test]
    fn resources_are_resolved_with_one_read_per_type() {
        let fake = example_lims();
        let inputs = resolve(
            &fake,
            r#"
inputs:
  - {type: bfabric_resource, id: 10}
  - {type: bfabric_resource, id: 11, filename: renamed.raw, check_checksum: false}
  - {type: static_yaml, data: {a: 1}, filename: params.yml}
"#,
        )
        .unwrap();
        let names = inputs
            .files()
            .iter()
            .map(|f| f.filename().as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a.imzML", "renamed.raw", "params.yml"]);
        assert_matches!(
            &inputs.files()[0],
            ResolvedInput::File(ResolvedFile { source: FileSource::Ssh { host, path }, checksum: Some(sum), .. })
                if host == "fgcz-ms" && path == "/srv/www/htdocs/p3000/a.imzML" && sum == &format!("{:032x}", 10)
        );
        assert_matches!(&inputs.files()[1], ResolvedInput::File(ResolvedFile { checksum: None, .. }));

        let reads = fake
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                LimsCall::Read { endpoint, .. } => Some(endpoint),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(reads, vec!["resource", "storage"]);
    }

    #[test]
    fn missing_resources_are_errors() {
        let fake = example_lims();
        let err = resolve(&fake, "inputs: [{type: bfabric_resource, id: 999}]").unwrap_err();
        assert_matches!(
            runner_error(&err),
            Some(RunnerError::EntityNotFound { ids, .. }) if ids == &vec![999]
        );
    }

    #[test]
    fn datasets_become_csv() {
        let fake = example_lims();
        fake.insert("dataset", example_dataset(5));
        let inputs = resolve(
            &fake,
            "inputs: [{type: bfabric_dataset, id: 5, filename: d.tsv, separator: \"\\t\"}]",
        )
        .unwrap();
        match &inputs.files()[0] {
            ResolvedInput::Static(file) => {
                assert_eq!(
                    String::from_utf8(file.content.clone()).unwrap(),
                    "Imzml\tPanelDataset\n10\t501\n11\t500\n"
                );
            }
            other => panic!("unexpected input {:?}", other),
        }
    }

    #[test]
    fn resource_datasets_are_filtered_on_storage_paths() {
        let fake = example_lims();
        fake.insert("dataset", example_dataset(5));
        let inputs = resolve(
            &fake,
            r#"
inputs:
  - type: bfabric_resource_dataset
    id: 5
    filename: runs
    column: imzml
    include_patterns: ["*.imzML"]
"#,
        )
        .unwrap();
        let names = inputs
            .files()
            .iter()
            .map(|f| f.filename().as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["runs/dataset.parquet", "runs/a.imzML"]);
    }

    #[test]
    fn resource_dataset_column_must_exist() {
        let fake = example_lims();
        fake.insert("dataset", example_dataset(5));
        let err = resolve(
            &fake,
            "inputs: [{type: bfabric_resource_dataset, id: 5, filename: runs, column: 7}]",
        )
        .unwrap_err();
        assert_matches!(runner_error(&err), Some(RunnerError::Config(_)));
    }

    #[test]
    fn order_fasta_comes_from_the_workunit_container() {
        let fake = example_lims();
        fake.insert("order", json!({"id": 80, "fastasequence": ">p1\nMKV\n"}));
        fake.insert(
            "workunit",
            json!({"id": 43, "container": {"classname": "order", "id": 80}}),
        );
        let inputs = resolve(
            &fake,
            r#"
inputs:
  - {type: bfabric_order_fasta, entity: workunit, id: 43, filename: order.fasta}
  - {type: bfabric_order_fasta, entity: workunit, id: 42, filename: none.fasta, required: false}
"#,
        )
        .unwrap();
        assert_matches!(&inputs.files()[0], ResolvedInput::Static(f) if f.content == b">p1\nMKV\n");
        assert_matches!(&inputs.files()[1], ResolvedInput::Static(f) if f.content.is_empty());

        let err = resolve(
            &fake,
            "inputs: [{type: bfabric_order_fasta, entity: workunit, id: 42, filename: x.fasta}]",
        )
        .unwrap_err();
        assert!(err.to_string().contains("not associated with an order"));
    }

    #[test]
    fn duplicate_targets_are_rejected() {
        let fake = example_lims();
        let err = resolve(
            &fake,
            r#"
inputs:
  - {type: bfabric_resource, id: 10, filename: x}
  - {type: static_file, content: hi, filename: x}
"#,
        )
        .unwrap_err();
        assert_matches!(runner_error(&err), Some(RunnerError::Integrity(_)));
    }

    #[test]
    fn unique_column_names_get_suffixes() {
        let columns = vec!["File".to_owned(), "File.1".to_owned()];
        assert_eq!(unique_column_name(&columns, "File").unwrap(), "File.2");
        assert_eq!(unique_column_name(&columns, "Path").unwrap(), "Path");
    }
}
