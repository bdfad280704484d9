//! The `inputs.yml` file, which declares what a chunk needs before it can
//! be processed.

use super::{from_yaml_str, read_yaml, write_yaml, RelativePath};
use crate::prelude::*;

/// The contents of an `inputs.yml` file.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InputsSpec {
    /// The declared inputs, in order.
    pub inputs: Vec<InputSpec>,
}

impl InputsSpec {
    /// Parse and validate an `inputs.yml` document.
    pub fn from_yaml_str(text: &str) -> Result<InputsSpec> {
        let spec: InputsSpec = from_yaml_str(text)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Read and validate an `inputs.yml` file.
    pub fn read(path: &Path) -> Result<InputsSpec> {
        let spec: InputsSpec = read_yaml(path)?;
        spec.validate()
            .with_context(|| format!("invalid inputs in {}", path.display()))?;
        Ok(spec)
    }

    /// Write an `inputs.yml` file.
    pub fn write(&self, path: &Path) -> Result<()> {
        write_yaml(path, self)
    }

    /// Check the constraints which serde cannot express.
    pub fn validate(&self) -> Result<()> {
        for input in &self.inputs {
            input.validate()?;
        }
        Ok(())
    }
}

/// A single declared input. The `type` field picks the variant.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputSpec {
    /// A resource from the LIMS.
    BfabricResource(ResourceSpec),
    /// A dataset from the LIMS, written as a table.
    BfabricDataset(DatasetSpec),
    /// Every resource referenced by the rows of a dataset.
    BfabricResourceDataset(ResourceDatasetSpec),
    /// A resource which is an archive to extract.
    BfabricResourceArchive(ResourceArchiveSpec),
    /// The FASTA sequence of an order.
    BfabricOrderFasta(OrderFastaSpec),
    /// A file on a remote host or on the local filesystem.
    File(FileSpec),
    /// A file addressed by host and absolute path, fetched with `scp`.
    FileScp(FileScpSpec),
    /// Structured data written as YAML.
    StaticYaml(StaticYamlSpec),
    /// Literal text written as-is.
    StaticFile(StaticFileSpec),
}

impl InputSpec {
    /// The value of the `type` field for this variant.
    pub fn type_name(&self) -> &'static str {
        match self {
            InputSpec::BfabricResource(_) => "bfabric_resource",
            InputSpec::BfabricDataset(_) => "bfabric_dataset",
            InputSpec::BfabricResourceDataset(_) => "bfabric_resource_dataset",
            InputSpec::BfabricResourceArchive(_) => "bfabric_resource_archive",
            InputSpec::BfabricOrderFasta(_) => "bfabric_order_fasta",
            InputSpec::File(_) => "file",
            InputSpec::FileScp(_) => "file_scp",
            InputSpec::StaticYaml(_) => "static_yaml",
            InputSpec::StaticFile(_) => "static_file",
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            InputSpec::BfabricDataset(spec) => {
                spec.separator_byte()?;
            }
            InputSpec::File(spec) => spec.validate()?,
            InputSpec::FileScp(spec) => {
                if !spec.absolute_path.starts_with('/') {
                    return Err(RunnerError::config(format!(
                        "file_scp path {:?} must be absolute",
                        spec.absolute_path
                    )));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn yes() -> bool {
    true
}

/// Input type `bfabric_resource`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceSpec {
    /// The resource ID.
    pub id: i64,
    /// Where to put it. Defaults to the resource's own file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<RelativePath>,
    /// Verify the staged file against the LIMS checksum.
    #[serde(default = "yes")]
    pub check_checksum: bool,
}

/// Output formats for datasets.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetFormat {
    /// Delimited text.
    Csv,
    /// Apache Parquet.
    Parquet,
}

impl Default for DatasetFormat {
    fn default() -> Self {
        DatasetFormat::Csv
    }
}

/// Input type `bfabric_dataset`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetSpec {
    /// The dataset ID.
    pub id: i64,
    /// Where to write the table.
    pub filename: RelativePath,
    /// The CSV separator, either `,` or a tab.
    #[serde(default = "DatasetSpec::default_separator")]
    pub separator: String,
    /// The file format.
    #[serde(default)]
    pub format: DatasetFormat,
}

impl DatasetSpec {
    fn default_separator() -> String {
        ",".to_owned()
    }

    /// The separator as a single byte.
    pub fn separator_byte(&self) -> Result<u8> {
        match self.separator.as_str() {
            "," => Ok(b','),
            "\t" => Ok(b'\t'),
            other => Err(RunnerError::config(format!(
                "unsupported dataset separator {:?}",
                other
            ))),
        }
    }
}

/// Picks a dataset column, either by name or by 0-based index.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ColumnRef {
    /// A column index.
    Index(usize),
    /// A column name, matched case-insensitively.
    Name(String),
}

impl Default for ColumnRef {
    fn default() -> Self {
        ColumnRef::Name("Resource".to_owned())
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnRef::Index(idx) => write!(f, "#{}", idx),
            ColumnRef::Name(name) => name.fmt(f),
        }
    }
}

/// Input type `bfabric_resource_dataset`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceDatasetSpec {
    /// The dataset ID.
    pub id: i64,
    /// The directory receiving the resources.
    pub filename: RelativePath,
    /// The column holding resource IDs.
    #[serde(default)]
    pub column: ColumnRef,
    /// Name of the table describing the staged files, inside `filename`.
    #[serde(default = "ResourceDatasetSpec::default_output_dataset_filename")]
    pub output_dataset_filename: RelativePath,
    /// Name of the column of that table which holds the staged paths.
    #[serde(default = "ResourceDatasetSpec::default_output_dataset_file_column")]
    pub output_dataset_file_column: String,
    /// Only write the table, not the resources.
    #[serde(default)]
    pub output_dataset_only: bool,
    /// Glob patterns on the resources' storage paths; when given, a
    /// resource must match one of them.
    #[serde(default)]
    pub include_patterns: Vec<String>,
    /// Glob patterns on the resources' storage paths which are skipped.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Verify staged files against the LIMS checksums.
    #[serde(default = "yes")]
    pub check_checksum: bool,
}

impl ResourceDatasetSpec {
    fn default_output_dataset_filename() -> RelativePath {
        RelativePath("dataset.parquet".to_owned())
    }

    fn default_output_dataset_file_column() -> String {
        "File".to_owned()
    }
}

/// Archive formats we can extract.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveFormat {
    /// A ZIP file.
    Zip,
}

/// Input type `bfabric_resource_archive`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceArchiveSpec {
    /// The resource ID.
    pub id: i64,
    /// The directory to extract into.
    pub filename: RelativePath,
    /// The archive format.
    pub extract: ArchiveFormat,
    /// Glob patterns on archive member paths; when given, a member must
    /// match one of them.
    #[serde(default)]
    pub include_patterns: Vec<String>,
    /// Glob patterns on archive member paths which are skipped.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Drop the single top-level directory of the archive.
    #[serde(default)]
    pub strip_root: bool,
    /// Verify the downloaded archive against the LIMS checksum.
    #[serde(default = "yes")]
    pub check_checksum: bool,
}

/// Which kind of entity an order FASTA is looked up from.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FastaEntity {
    /// The order itself.
    Order,
    /// A workunit, whose container should be an order.
    Workunit,
}

/// Input type `bfabric_order_fasta`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OrderFastaSpec {
    /// The kind of entity `id` refers to.
    pub entity: FastaEntity,
    /// The order or workunit ID.
    pub id: i64,
    /// Where to write the sequence.
    pub filename: RelativePath,
    /// Fail when there is no order. Otherwise an empty file is written.
    #[serde(default = "yes")]
    pub required: bool,
}

/// Where a `file` input comes from.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileSource {
    /// A path on a host reachable over SSH.
    Ssh {
        /// The host name.
        host: String,
        /// The absolute path on that host.
        path: String,
    },
    /// An absolute path on this machine.
    Local(String),
}

impl FileSource {
    /// The absolute path of the source.
    pub fn path(&self) -> &str {
        match self {
            FileSource::Ssh { path, .. } => path,
            FileSource::Local(path) => path,
        }
    }

    /// The last component of the source path.
    pub fn file_name(&self) -> &str {
        self.path().rsplit('/').next().unwrap_or_else(|| self.path())
    }
}

/// Input type `file`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileSpec {
    /// Where the file comes from.
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub source: FileSource,
    /// Where to put it. Defaults to the source file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<RelativePath>,
    /// Symlink instead of copying. Only for local sources.
    #[serde(default)]
    pub link: bool,
    /// The expected MD5 checksum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl FileSpec {
    fn validate(&self) -> Result<()> {
        if !self.source.path().starts_with('/') {
            return Err(RunnerError::config(format!(
                "file source {:?} must be an absolute path",
                self.source.path()
            )));
        }
        if self.link && matches!(self.source, FileSource::Ssh { .. }) {
            return Err(RunnerError::config(format!(
                "cannot link to remote file {:?}",
                self.source.path()
            )));
        }
        Ok(())
    }

    /// The target filename, falling back to the source file name.
    pub fn target_filename(&self) -> Result<RelativePath> {
        match &self.filename {
            Some(filename) => Ok(filename.clone()),
            None => RelativePath::new(self.source.file_name()),
        }
    }
}

/// Input type `file_scp`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileScpSpec {
    /// The host name.
    pub host: String,
    /// The absolute path on that host.
    pub absolute_path: String,
    /// Where to put it. Defaults to the source file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<RelativePath>,
}

impl FileScpSpec {
    /// The target filename, falling back to the source file name.
    pub fn target_filename(&self) -> Result<RelativePath> {
        match &self.filename {
            Some(filename) => Ok(filename.clone()),
            None => RelativePath::new(
                self.absolute_path
                    .rsplit('/')
                    .next()
                    .unwrap_or(&self.absolute_path),
            ),
        }
    }
}

/// Input type `static_yaml`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StaticYamlSpec {
    /// The data to write.
    pub data: serde_yaml::Value,
    /// Where to write it.
    pub filename: RelativePath,
}

/// Input type `static_file`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StaticFileSpec {
    /// The text to write.
    pub content: String,
    /// Where to write it.
    pub filename: RelativePath,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::runner_error;
    use assert_matches::assert_matches;

    #[test]
    fn parses_every_input_type() {
        let spec = InputsSpec::from_yaml_str(
            r#"
inputs:
  - type: bfabric_resource
    id: 10
  - type: bfabric_dataset
    id: 5
    filename: dataset.csv
    separator: "\t"
  - type: bfabric_resource_dataset
    id: 5
    filename: runs
    column: 0
  - type: bfabric_resource_archive
    id: 11
    filename: unpacked
    extract: zip
    include_patterns: ["*.txt"]
  - type: bfabric_order_fasta
    entity: workunit
    id: 42
    filename: order.fasta
    required: false
  - type: file
    source:
      ssh:
        host: fgcz-ms
        path: /srv/data/a.raw
  - type: file
    source:
      local: /tmp/b.raw
    filename: b.raw
    link: true
  - type: file_scp
    host: fgcz-ms
    absolute_path: /srv/data/c.raw
  - type: static_yaml
    data: {a: 1}
    filename: x.yml
  - type: static_file
    content: hello
    filename: hello.txt
"#,
        )
        .unwrap();
        let types = spec
            .inputs
            .iter()
            .map(InputSpec::type_name)
            .collect::<Vec<_>>();
        assert_eq!(
            types,
            &[
                "bfabric_resource",
                "bfabric_dataset",
                "bfabric_resource_dataset",
                "bfabric_resource_archive",
                "bfabric_order_fasta",
                "file",
                "file",
                "file_scp",
                "static_yaml",
                "static_file",
            ]
        );
        assert_matches!(&spec.inputs[0], InputSpec::BfabricResource(r) if r.check_checksum && r.filename.is_none());
        assert_matches!(&spec.inputs[2], InputSpec::BfabricResourceDataset(r) if r.column == ColumnRef::Index(0));
        match &spec.inputs[5] {
            InputSpec::File(file) => {
                assert_eq!(file.target_filename().unwrap().as_str(), "a.raw");
            }
            other => panic!("unexpected input {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_fields_and_types() {
        for text in &[
            "inputs: [{type: bfabric_resource, id: 1, bogus: true}]",
            "inputs: [{type: carrier_pigeon, id: 1}]",
            "inputs: [{type: static_file, content: x, filename: ../x}]",
            "inputs: [{type: static_file, content: x, filename: /etc/x}]",
        ] {
            let err = InputsSpec::from_yaml_str(text).unwrap_err();
            assert_matches!(runner_error(&err), Some(RunnerError::Config(_)), "{}", text);
        }
    }

    #[test]
    fn rejects_links_to_remote_files() {
        let err = InputsSpec::from_yaml_str(
            "inputs: [{type: file, source: {ssh: {host: h, path: /x}}, link: true}]",
        )
        .unwrap_err();
        assert!(err.to_string().contains("cannot link"));
    }

    #[test]
    fn file_source_round_trips_as_a_plain_map() {
        let spec = InputsSpec {
            inputs: vec![InputSpec::File(FileSpec {
                source: FileSource::Ssh {
                    host: "h".to_owned(),
                    path: "/data/x.raw".to_owned(),
                },
                filename: None,
                link: false,
                checksum: None,
            })],
        };
        let text = serde_yaml::to_string(&spec).unwrap();
        assert!(text.contains("ssh:"), "{}", text);
        assert!(!text.contains('!'), "{}", text);
        assert_eq!(InputsSpec::from_yaml_str(&text).unwrap(), spec);
    }
}
