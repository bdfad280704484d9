//! The `outputs.yml` file, which declares what a chunk produced and how to
//! register it.

use super::{from_yaml_str, read_yaml, write_yaml, RelativePath};
use crate::prelude::*;

/// The contents of an `outputs.yml` file.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OutputsSpec {
    /// The declared outputs, registered in order.
    pub outputs: Vec<OutputSpec>,
}

impl OutputsSpec {
    /// Parse an `outputs.yml` document.
    pub fn from_yaml_str(text: &str) -> Result<OutputsSpec> {
        from_yaml_str(text)
    }

    /// Read an `outputs.yml` file.
    pub fn read(path: &Path) -> Result<OutputsSpec> {
        read_yaml(path)
    }

    /// Write an `outputs.yml` file.
    pub fn write(&self, path: &Path) -> Result<()> {
        write_yaml(path, self)
    }
}

/// A single declared output. The `type` field picks the variant.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputSpec {
    /// Upload a file and register it as a resource.
    #[serde(alias = "bfabric_copy_resource")]
    CopyResource(CopyResourceSpec),
    /// Register a CSV file as a dataset.
    #[serde(alias = "bfabric_dataset")]
    SaveDataset(SaveDatasetSpec),
    /// Attach a URL to an entity.
    SaveLink(SaveLinkSpec),
}

/// What to do when a matching entity already exists.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateExisting {
    /// Always create a new entity.
    #[serde(alias = "NO")]
    No,
    /// Update a matching entity if there is one.
    #[serde(alias = "IF_EXISTS")]
    IfExists,
    /// Update a matching entity, and fail if there is none.
    #[serde(alias = "REQUIRED")]
    Required,
}

impl Default for UpdateExisting {
    fn default() -> Self {
        UpdateExisting::IfExists
    }
}

/// Transfer protocols for `copy_resource`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// Copy with `scp`.
    Scp,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Scp
    }
}

/// Output type `copy_resource`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CopyResourceSpec {
    /// The file to upload, relative to the chunk directory.
    pub local_path: PathBuf,
    /// Where to put it, relative to the storage folder.
    pub store_entry_path: RelativePath,
    /// Overrides the workunit's storage folder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_folder_path: Option<PathBuf>,
    /// Whether to update an existing resource of the same name.
    #[serde(default)]
    pub update_existing: UpdateExisting,
    /// How to transfer the file.
    #[serde(default)]
    pub protocol: Protocol,
}

/// Output type `save_dataset`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SaveDatasetSpec {
    /// The CSV file, relative to the chunk directory.
    pub local_path: PathBuf,
    /// The CSV separator.
    #[serde(default = "SaveDatasetSpec::default_separator")]
    pub separator: String,
    /// The dataset name. Defaults to the file stem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Does the first line hold the column names?
    #[serde(default = "SaveDatasetSpec::default_has_header")]
    pub has_header: bool,
    /// Characters which must not appear anywhere in the table.
    #[serde(default)]
    pub invalid_characters: String,
}

impl SaveDatasetSpec {
    fn default_separator() -> String {
        ",".to_owned()
    }

    fn default_has_header() -> bool {
        true
    }

    /// The separator as a single byte.
    pub fn separator_byte(&self) -> Result<u8> {
        match self.separator.as_bytes() {
            [byte] => Ok(*byte),
            _ => Err(RunnerError::config(format!(
                "dataset separator must be a single character, got {:?}",
                self.separator
            ))),
        }
    }
}

/// Output type `save_link`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SaveLinkSpec {
    /// The link text.
    pub name: String,
    /// The target URL.
    pub url: String,
    /// The endpoint of the entity to attach the link to.
    pub entity_type: String,
    /// The ID of that entity.
    pub entity_id: i64,
    /// Whether to update an existing link of the same name.
    #[serde(default)]
    pub update_existing: UpdateExisting,
}
