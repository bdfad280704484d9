use crate::prelude::*;

use super::Entity;

entity_view!(
    /// A location where resources are stored.
    Storage,
    "storage"
);

impl Storage {
    /// The host name of the storage server.
    pub fn host(&self) -> Result<&str> {
        self.entity.required_str("host")
    }

    /// The base path on the storage server.
    pub fn base_path(&self) -> Result<&str> {
        self.entity.required_str("basepath")
    }

    /// The protocol used to reach the storage.
    pub fn protocol(&self) -> Option<&str> {
        self.entity.str_field("protocol")
    }

    /// The prefix prepended to container IDs to build project folders.
    pub fn project_folder_prefix(&self) -> &str {
        self.entity.str_field("projectfolderprefix").unwrap_or("")
    }

    /// `{host}:{basepath}/` when the storage is reachable over SCP.
    pub fn scp_prefix(&self) -> Option<String> {
        match (self.protocol(), self.host(), self.base_path()) {
            (Some("scp"), Ok(host), Ok(base_path)) => Some(format!(
                "{}:{}/",
                host,
                base_path.trim_end_matches('/')
            )),
            _ => None,
        }
    }

    /// Load a storage record from a YAML file, used to override the storage
    /// of the LIMS when testing registration.
    pub fn from_yaml_file(path: &Path) -> Result<Storage> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("could not read {}", path.display()))?;
        let value: serde_json::Value = serde_yaml::from_str(&text)
            .with_context(|| format!("could not parse {}", path.display()))?;
        Ok(Storage::from_entity(Entity::from_json(Self::ENDPOINT, value)?))
    }
}

#[test]
fn scp_prefix_requires_scp_protocol() {
    let storage = |protocol: &str| {
        Storage::from_entity(
            Entity::from_json(
                "storage",
                serde_json::json!({"id": 1, "host": "fgcz-ms", "basepath": "/srv/www/htdocs/", "protocol": protocol}),
            )
            .unwrap(),
        )
    };
    assert_eq!(
        storage("scp").scp_prefix().as_deref(),
        Some("fgcz-ms:/srv/www/htdocs/")
    );
    assert_eq!(storage("https").scp_prefix(), None);
}
