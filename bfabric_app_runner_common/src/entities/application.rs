use serde_json::Value;

use crate::prelude::*;

use super::{Executable, Storage};

entity_view!(
    /// An application which workunits run.
    Application,
    "application"
);

impl Application {
    /// The application name.
    pub fn name(&self) -> Result<&str> {
        self.entity.required_str("name")
    }

    /// The output file format, if declared.
    pub fn output_file_format(&self) -> Option<&str> {
        self.entity.str_field("outputfileformat")
    }

    /// The technologies of this application. The LIMS sends either a single
    /// string or a list of strings.
    pub fn technology(&self) -> Vec<String> {
        match self.entity.get("technology") {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect(),
            _ => vec![],
        }
    }

    /// The folder name used for this application's technology: the
    /// alphabetically first technology, made safe for use in paths.
    pub fn technology_folder(&self) -> Result<String> {
        let mut technology = self.technology();
        technology.sort();
        let first = technology.into_iter().next().ok_or_else(|| {
            format_err!("application {} has no technology", self.entity.id())
        })?;
        Ok(first.replace('/', "_").replace(' ', "_"))
    }

    /// The default storage of this application's outputs.
    pub fn storage(&self, lims: &Lims) -> Result<Option<Storage>> {
        lims.has_one_optional(&self.entity, "storage")
    }

    /// The executable of this application.
    pub fn executable(&self, lims: &Lims) -> Result<Option<Executable>> {
        lims.has_one_optional(&self.entity, "executable")
    }
}

#[test]
fn technology_folder_takes_first_sorted_technology() {
    let app = Application::from_entity(
        super::Entity::from_json(
            "application",
            serde_json::json!({"id": 1, "name": "x", "technology": ["Proteomics", "Metabolomics/Biophysics"]}),
        )
        .unwrap(),
    );
    assert_eq!(app.technology_folder().unwrap(), "Metabolomics_Biophysics");
}
