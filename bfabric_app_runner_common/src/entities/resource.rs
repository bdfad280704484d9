use crate::prelude::*;

use super::{Storage, Workunit};

entity_view!(
    /// A single file registered in a storage.
    Resource,
    "resource"
);

entity_view!(
    /// A biological sample.
    Sample,
    "sample"
);

impl Resource {
    /// The display name.
    pub fn name(&self) -> Option<&str> {
        self.entity.str_field("name")
    }

    /// The status, like `pending` or `available`.
    pub fn status(&self) -> Option<&str> {
        self.entity.str_field("status")
    }

    /// The stored MD5 checksum, if any.
    pub fn file_checksum(&self) -> Option<&str> {
        self.entity
            .str_field("filechecksum")
            .filter(|checksum| !checksum.is_empty())
    }

    /// The path relative to the storage base path, without a leading `/`.
    pub fn relative_path(&self) -> Result<&str> {
        Ok(self.entity.required_str("relativepath")?.trim_start_matches('/'))
    }

    /// The name of the file as stored, which may differ from [`Self::name`].
    pub fn filename(&self) -> Result<&str> {
        let path = self.relative_path()?;
        Ok(path.rsplit('/').next().unwrap_or(path))
    }

    /// The storage holding this resource.
    pub fn storage(&self, lims: &Lims) -> Result<Storage> {
        lims.has_one(&self.entity, "storage")
    }

    /// The absolute path of the resource on its storage host.
    pub fn storage_absolute_path(&self, storage: &Storage) -> Result<PathBuf> {
        Ok(Path::new(storage.base_path()?).join(self.relative_path()?))
    }

    /// The workunit which produced this resource.
    pub fn workunit(&self, lims: &Lims) -> Result<Workunit> {
        lims.has_one(&self.entity, "workunit")
    }

    /// The sample this resource belongs to, if any.
    pub fn sample(&self, lims: &Lims) -> Result<Option<Sample>> {
        lims.has_one_optional(&self.entity, "sample")
    }
}

#[test]
fn filename_comes_from_relative_path() {
    let resource = Resource::from_entity(
        super::Entity::from_json(
            "resource",
            serde_json::json!({"id": 1, "name": "Sample A", "relativepath": "/p1/data/a.raw"}),
        )
        .unwrap(),
    );
    assert_eq!(resource.relative_path().unwrap(), "p1/data/a.raw");
    assert_eq!(resource.filename().unwrap(), "a.raw");
}
