//! Declarative YAML files: `app.yml`, `inputs.yml` and `outputs.yml`.
//!
//! Every spec type rejects unknown fields, and tagged unions use a `type`
//! field to pick the variant.

use serde::de::DeserializeOwned;
use std::convert::TryFrom;

use crate::prelude::*;

pub mod app;
pub mod commands;
pub mod inputs;
pub mod outputs;

/// A relative path which stays inside its base directory: it is not
/// absolute, has no `..` components and contains no `:`.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelativePath(String);

impl RelativePath {
    /// Validate a path.
    pub fn new<S: Into<String>>(path: S) -> Result<RelativePath> {
        let path = path.into();
        if path.is_empty() {
            return Err(RunnerError::config("path must not be empty"));
        }
        if path.starts_with('/') {
            return Err(RunnerError::config(format!("path {:?} must be relative", path)));
        }
        if path.contains(':') {
            return Err(RunnerError::config(format!("path {:?} must not contain ':'", path)));
        }
        if path.split('/').any(|component| component == "..") {
            return Err(RunnerError::config(format!(
                "path {:?} must not refer to a parent directory",
                path
            )));
        }
        Ok(RelativePath(path))
    }

    /// The path as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The path as a [`Path`].
    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }

    /// Append a relative path below this one. Joining onto `.` returns
    /// `child` unchanged.
    pub fn join(&self, child: &str) -> Result<RelativePath> {
        if self.0 == "." {
            RelativePath::new(child)
        } else {
            RelativePath::new(format!("{}/{}", self.0.trim_end_matches('/'), child))
        }
    }

    /// The path without `.` components, repeated slashes or a trailing
    /// slash. `./a/` and `a` both normalize to `a`, and `./` to `.`.
    pub fn normalized(&self) -> String {
        let components = self
            .0
            .split('/')
            .filter(|component| !component.is_empty() && *component != ".")
            .collect::<Vec<_>>();
        if components.is_empty() {
            ".".to_owned()
        } else {
            components.join("/")
        }
    }

    /// Is `self` strictly inside the directory `dir`?
    pub fn is_inside(&self, dir: &RelativePath) -> bool {
        let (path, dir) = (self.normalized(), dir.normalized());
        if dir == "." {
            return path != ".";
        }
        path.len() > dir.len() + 1 && path.starts_with(&dir) && path.as_bytes()[dir.len()] == b'/'
    }

    /// The last component of the path.
    pub fn file_name(&self) -> &str {
        self.0.trim_end_matches('/').rsplit('/').next().unwrap_or(&self.0)
    }
}

impl TryFrom<String> for RelativePath {
    type Error = Error;

    fn try_from(path: String) -> Result<Self> {
        RelativePath::new(path)
    }
}

impl From<RelativePath> for String {
    fn from(path: RelativePath) -> String {
        path.0
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Parse a YAML spec, turning any problem into a [`RunnerError::Config`].
pub fn from_yaml_str<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_yaml::from_str(text).map_err(|err| RunnerError::config(err.to_string()))
}

/// Read a YAML spec file.
pub fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text =
        fs::read_to_string(path).with_context(|| format!("could not read {}", path.display()))?;
    from_yaml_str(&text).with_context(|| format!("invalid spec file {}", path.display()))
}

/// Write a YAML spec file.
pub fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_yaml::to_string(value)?;
    fs::write(path, text).with_context(|| format!("could not write {}", path.display()))
}

#[test]
fn relative_path_rejects_escapes() {
    for bad in &["/etc/passwd", "../x", "a/../../b", "host:file", ""] {
        assert!(RelativePath::new(*bad).is_err(), "{:?} should be rejected", bad);
    }
    for good in &["x.yml", "a/b/c.raw", ".", "..data"] {
        assert!(RelativePath::new(*good).is_ok(), "{:?} should be accepted", good);
    }
    assert_eq!(RelativePath::new("a/b/c.raw").unwrap().file_name(), "c.raw");
}

#[test]
fn relative_path_join_and_nesting() {
    let dir = RelativePath::new("runs").unwrap();
    let file = dir.join("a.raw").unwrap();
    assert_eq!(file.as_str(), "runs/a.raw");
    assert!(file.is_inside(&dir));
    assert!(!RelativePath::new("runs2/a.raw").unwrap().is_inside(&dir));
    assert!(!dir.is_inside(&dir));
    assert_eq!(RelativePath::new(".").unwrap().join("x").unwrap().as_str(), "x");
}

#[test]
fn relative_path_normalizes_dot_components() {
    let normalized = |path: &str| RelativePath::new(path).unwrap().normalized();
    assert_eq!(normalized("./a"), "a");
    assert_eq!(normalized("a//b/./c/"), "a/b/c");
    assert_eq!(normalized("./"), ".");
    assert_eq!(normalized("..data"), "..data");
    let dir = RelativePath::new("./runs/").unwrap();
    assert!(RelativePath::new("runs/a.raw").unwrap().is_inside(&dir));
}

#[test]
fn relative_path_is_checked_when_deserializing() {
    let parsed: Result<RelativePath, _> = serde_yaml::from_str("../secret");
    assert!(parsed.is_err());
}
