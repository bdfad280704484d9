//! Client configuration, read from `~/.bfabricpy.yml`.
//!
//! The file holds a `GENERAL` section naming the default environment, plus
//! one section per environment:
//!
//! ```yaml
//! GENERAL:
//!   default_config: PRODUCTION
//! PRODUCTION:
//!   login: someone
//!   password: secret
//!   base_url: https://fgcz-bfabric.uzh.ch/bfabric
//! ```

use std::env;
use url::Url;

use crate::prelude::*;

/// Environment variable which selects an environment from the config file.
pub const CONFIG_ENV_VAR: &str = "BFABRICPY_CONFIG_ENV";

/// Environment variable which overrides the location of the config file.
pub const CONFIG_FILE_VAR: &str = "BFABRICPY_CONFIG_FILE";

/// The `GENERAL` section of the config file.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GeneralSection {
    default_config: String,
}

/// One environment section of the config file.
#[derive(Clone, Debug, Deserialize)]
struct EnvironmentSection {
    login: Option<String>,
    password: Option<String>,
    base_url: String,
    /// Other keys are tolerated, because the file is shared with other
    /// tools.
    #[serde(flatten)]
    _other: BTreeMap<String, serde_yaml::Value>,
}

/// The whole config file.
#[derive(Clone, Debug, Deserialize)]
struct ConfigFile {
    #[serde(rename = "GENERAL")]
    general: GeneralSection,
    #[serde(flatten)]
    environments: BTreeMap<String, EnvironmentSection>,
}

/// Credentials for the LIMS.
#[derive(Clone, Deserialize, Eq, PartialEq, Serialize)]
pub struct Auth {
    /// The login name.
    pub login: String,
    /// The web service password.
    pub password: String,
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Auth")
            .field("login", &self.login)
            .field("password", &"***")
            .finish()
    }
}

/// Everything we need to know to talk to the LIMS.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientConfig {
    /// The name of the selected environment.
    pub environment: String,
    /// The base URL of the LIMS web services. Always ends with `/`.
    pub base_url: Url,
    /// Our credentials, if the environment provides them.
    pub auth: Option<Auth>,
}

impl ClientConfig {
    /// Load the config from the default location (or `BFABRICPY_CONFIG_FILE`),
    /// selecting `explicit_env` if given.
    pub fn load(explicit_env: Option<&str>) -> Result<ClientConfig> {
        let path = default_config_path()?;
        Self::from_file(&path, explicit_env)
    }

    /// Load the config from `path`.
    pub fn from_file(path: &Path, explicit_env: Option<&str>) -> Result<ClientConfig> {
        debug!("reading client config from {}", path.display());
        let text = fs::read_to_string(path)
            .with_context(|| format!("could not read {}", path.display()))?;
        let env_var = env::var(CONFIG_ENV_VAR).ok();
        Self::from_yaml_str(&text, explicit_env.or_else(|| env_var.as_deref()))
            .with_context(|| format!("could not load config from {}", path.display()))
    }

    /// Parse a config file. `selected_env` takes priority over the file's
    /// `default_config`.
    pub fn from_yaml_str(text: &str, selected_env: Option<&str>) -> Result<ClientConfig> {
        let file: ConfigFile = serde_yaml::from_str(text)
            .map_err(|err| RunnerError::config(format!("malformed config file: {}", err)))?;
        if file.environments.contains_key("default") {
            return Err(RunnerError::config(
                "environment name 'default' is reserved, please rename it",
            ));
        }
        if !file.environments.contains_key(&file.general.default_config) {
            return Err(RunnerError::config(format!(
                "default config {:?} not found in {:?}",
                file.general.default_config,
                file.environments.keys().collect::<Vec<_>>(),
            )));
        }

        let environment = selected_env.unwrap_or(&file.general.default_config);
        let section = file.environments.get(environment).ok_or_else(|| {
            RunnerError::config(format!("config environment {:?} not found", environment))
        })?;
        let auth = match (&section.login, &section.password) {
            (Some(login), Some(password)) => Some(Auth {
                login: login.clone(),
                password: password.clone(),
            }),
            (None, None) => None,
            _ => {
                return Err(RunnerError::config(format!(
                    "environment {:?} must specify both login and password",
                    environment,
                )))
            }
        };
        Ok(ClientConfig {
            environment: environment.to_owned(),
            base_url: parse_base_url(&section.base_url)?,
            auth,
        })
    }
}

/// Where do we look for the config file by default?
fn default_config_path() -> Result<PathBuf> {
    if let Ok(path) = env::var(CONFIG_FILE_VAR) {
        return Ok(PathBuf::from(path));
    }
    let home = env::var("HOME").context("could not determine home directory")?;
    Ok(Path::new(&home).join(".bfabricpy.yml"))
}

/// Validate a base URL and make sure it ends with a `/`, so that endpoint
/// names can be joined onto it.
pub fn parse_base_url(raw: &str) -> Result<Url> {
    let normalized = format!("{}/", raw.trim_end_matches('/'));
    let url = Url::parse(&normalized)
        .map_err(|err| RunnerError::config(format!("invalid base_url {:?}: {}", raw, err)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(RunnerError::config(format!(
            "base_url {:?} must use http or https, not {}",
            raw, other,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
GENERAL:
  default_config: PRODUCTION
PRODUCTION:
  login: alice
  password: hunter2
  base_url: https://lims.example.org/bfabric
  application_ids: {}
TEST:
  login: alice
  password: test
  base_url: https://test.example.org/bfabric/
"#;

    #[test]
    fn selects_default_environment() {
        let config = ClientConfig::from_yaml_str(EXAMPLE, None).unwrap();
        assert_eq!(config.environment, "PRODUCTION");
        assert_eq!(config.base_url.as_str(), "https://lims.example.org/bfabric/");
        assert_eq!(config.auth.unwrap().password, "hunter2");
    }

    #[test]
    fn explicit_environment_wins() {
        let config = ClientConfig::from_yaml_str(EXAMPLE, Some("TEST")).unwrap();
        assert_eq!(config.environment, "TEST");
        assert_eq!(config.base_url.as_str(), "https://test.example.org/bfabric/");
    }

    #[test]
    fn rejects_reserved_and_unknown_environments() {
        let reserved = "GENERAL:\n  default_config: default\ndefault:\n  base_url: https://x.org\n";
        assert!(ClientConfig::from_yaml_str(reserved, None).is_err());
        assert!(ClientConfig::from_yaml_str(EXAMPLE, Some("STAGING")).is_err());
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(parse_base_url("ftp://lims.example.org").is_err());
        assert!(parse_base_url("not a url").is_err());
    }

    #[test]
    fn password_is_not_debug_printed() {
        let config = ClientConfig::from_yaml_str(EXAMPLE, None).unwrap();
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
