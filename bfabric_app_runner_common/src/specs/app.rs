//! The `app.yml` file, which lists the versions of an app and the commands
//! each version runs.
//!
//! String values may use Handlebars templates over `{{app.id}}`,
//! `{{app.name}}` and `{{app.version}}`, so that one entry can describe
//! several versions:
//!
//! ```yaml
//! versions:
//!   - version: ["1.0.0", "1.0.1"]
//!     commands:
//!       dispatch:
//!         type: exec
//!         command: "/apps/{{app.name}}/{{app.version}}/dispatch"
//!       process:
//!         type: exec
//!         command: "/apps/{{app.name}}/{{app.version}}/process"
//! ```

use handlebars::Handlebars;
use lazy_static::lazy_static;
use regex::Regex;
use serde_yaml::Value;

use super::commands::CommandsSpec;
use crate::prelude::*;

/// The parameter which selects the app version.
pub const VERSION_PARAMETER: &str = "application_version";

/// One concrete version of an app.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppVersion {
    /// The version string.
    #[serde(default = "AppVersion::default_version")]
    pub version: String,
    /// What to run for each stage.
    pub commands: CommandsSpec,
    /// Should the first `copy_resource` output reuse the workunit's
    /// pre-allocated resource?
    #[serde(default = "AppVersion::default_reuse_default_resource")]
    pub reuse_default_resource: bool,
}

impl AppVersion {
    fn default_version() -> String {
        "latest".to_owned()
    }

    fn default_reuse_default_resource() -> bool {
        true
    }
}

/// Values available to templates in `app.yml`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct AppVariables {
    /// The application ID.
    pub id: i64,
    /// The application name, reduced to `[a-zA-Z0-9_-]`.
    pub name: String,
    /// The version being expanded.
    pub version: String,
}

impl AppVariables {
    /// Create variables for `version` of an application.
    pub fn new(id: i64, name: &str, version: &str) -> AppVariables {
        lazy_static! {
            static ref UNSAFE_CHARS: Regex =
                Regex::new("[^a-zA-Z0-9_-]+").expect("invalid regex in source");
        }
        AppVariables {
            id,
            name: UNSAFE_CHARS.replace_all(name, "_").into_owned(),
            version: version.to_owned(),
        }
    }
}

/// All versions of an app, with templates expanded.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AppSpec {
    /// The versions, in file order.
    pub versions: Vec<AppVersion>,
    /// Was the file a single version, to be used whatever the workunit
    /// asks for?
    single: bool,
}

impl AppSpec {
    /// Load an `app.yml` file for the given application.
    #[instrument(level = "debug", skip(app_name))]
    pub fn load(path: &Path, app_id: i64, app_name: &str) -> Result<AppSpec> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("could not read {}", path.display()))?;
        AppSpec::from_yaml_str(&text, app_id, app_name)
            .with_context(|| format!("invalid app spec {}", path.display()))
    }

    /// Parse an `app.yml` document for the given application.
    ///
    /// The document is either a single app version, or a mapping with a
    /// `versions` list whose entries may each name several versions.
    pub fn from_yaml_str(text: &str, app_id: i64, app_name: &str) -> Result<AppSpec> {
        let document: Value =
            serde_yaml::from_str(text).map_err(|err| RunnerError::config(err.to_string()))?;
        let single = document.get("versions").is_none();
        let entries = match document.get("versions") {
            Some(Value::Sequence(entries)) => {
                if document.as_mapping().map_or(0, |m| m.len()) != 1 {
                    return Err(RunnerError::config(
                        "an app spec with `versions` must not have other top-level fields",
                    ));
                }
                entries.clone()
            }
            Some(_) => return Err(RunnerError::config("`versions` must be a list")),
            None => vec![document],
        };

        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(handlebars::no_escape);

        let mut versions = vec![];
        for entry in entries {
            for version in entry_versions(&entry)? {
                let variables = AppVariables::new(app_id, app_name, &version);
                let mut expanded = entry.clone();
                if let Some(mapping) = expanded.as_mapping_mut() {
                    mapping.insert(Value::from("version"), Value::from(version.clone()));
                }
                render_strings(&handlebars, &mut expanded, &variables)
                    .with_context(|| format!("could not expand app version {:?}", version))?;
                let app_version: AppVersion = serde_yaml::from_value(expanded)
                    .map_err(|err| RunnerError::config(format!("version {:?}: {}", version, err)))?;
                versions.push(app_version);
            }
        }

        let spec = AppSpec { versions, single };
        let mut seen = std::collections::BTreeSet::new();
        for version in &spec.versions {
            if !seen.insert(version.version.as_str()) {
                return Err(RunnerError::config(format!(
                    "app version {:?} is defined more than once",
                    version.version
                )));
            }
        }
        Ok(spec)
    }

    /// The versions defined by this app, in file order.
    pub fn available_versions(&self) -> Vec<&str> {
        self.versions.iter().map(|v| v.version.as_str()).collect()
    }

    /// Look up a version.
    pub fn version(&self, version: &str) -> Option<&AppVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    /// Pick the version requested by a workunit's `application_version`
    /// parameter. A file holding a single version always yields it.
    pub fn resolve(&self, raw_parameters: &BTreeMap<String, Option<String>>) -> Result<&AppVersion> {
        if self.single {
            if let [only] = self.versions.as_slice() {
                return Ok(only);
            }
        }
        let requested = match raw_parameters.get(VERSION_PARAMETER) {
            Some(Some(requested)) => requested,
            _ => {
                return Err(RunnerError::config(format!(
                    "workunit has no `{}` parameter; available versions: {}",
                    VERSION_PARAMETER,
                    self.available_versions().join(", "),
                )))
            }
        };
        self.version(requested).ok_or_else(|| {
            RunnerError::config(format!(
                "app version {:?} is not defined; available versions: {}",
                requested,
                self.available_versions().join(", "),
            ))
        })
    }
}

/// The version strings of an entry: its `version` field is a string, a
/// list of strings, or missing (meaning `latest`).
fn entry_versions(entry: &Value) -> Result<Vec<String>> {
    match entry.get("version") {
        None => Ok(vec![AppVersion::default_version()]),
        Some(Value::String(version)) => Ok(vec![version.clone()]),
        Some(Value::Sequence(items)) if !items.is_empty() => items
            .iter()
            .map(|item| match item {
                Value::String(version) => Ok(version.clone()),
                other => Err(RunnerError::config(format!(
                    "app version must be a string, got {:?}",
                    other
                ))),
            })
            .collect(),
        Some(other) => Err(RunnerError::config(format!(
            "app version must be a string or a non-empty list, got {:?}",
            other
        ))),
    }
}

/// Render every string inside `value` as a template.
fn render_strings(handlebars: &Handlebars, value: &mut Value, variables: &AppVariables) -> Result<()> {
    #[derive(Serialize)]
    struct Params<'a> {
        app: &'a AppVariables,
    }

    match value {
        Value::String(s) if s.contains("{{") => {
            *s = handlebars
                .render_template(s, &Params { app: variables })
                .map_err(|err| RunnerError::config(format!("cannot render {:?}: {}", s, err)))?;
        }
        Value::Sequence(items) => {
            for item in items {
                render_strings(handlebars, item, variables)?;
            }
        }
        Value::Mapping(mapping) => {
            for (_, item) in mapping.iter_mut() {
                render_strings(handlebars, item, variables)?;
            }
        }
        Value::Tagged(tagged) => render_strings(handlebars, &mut tagged.value, variables)?,
        _ => {}
    }
    Ok(())
}
