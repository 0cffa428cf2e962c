use std::env;
use std::path::PathBuf;

use crate::errors::ConfigError;

/// Placeholder accepted as a path segment of the credentials directory.
pub const HOME_PLACEHOLDER: &str = "$HOME";

const DEFAULT_BIND: &str = "0.0.0.0:8123";
const DEFAULT_CREDENTIALS_MOUNT: &str = "/gcp/config";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Host directory exposed read-only inside every job container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialsConfig {
    pub host_dir: PathBuf,
    pub container_dir: String,
}

/// Process configuration for the Runbox service.
#[derive(Debug, Clone)]
pub struct RunboxConfig {
    pub bind_address: String,
    pub jobs_file: Option<PathBuf>,
    pub credentials: Option<CredentialsConfig>,
    pub log_level: String,
}

impl RunboxConfig {
    /// Loads configuration from `.env` and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let bind_address = non_empty("RUNBOX_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let jobs_file = non_empty("RUNBOX_JOBS_FILE").map(PathBuf::from);
        let log_level =
            non_empty("RUNBOX_LOG").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        let credentials = match non_empty("RUNBOX_APPLICATION_DEFAULT_CREDENTIALS") {
            Some(template) => {
                let host_dir = resolve_home_placeholder(&template, lookup("HOME"))?;
                let container_dir = non_empty("RUNBOX_CREDENTIALS_MOUNT")
                    .unwrap_or_else(|| DEFAULT_CREDENTIALS_MOUNT.to_string());
                if !container_dir.starts_with('/') {
                    return Err(ConfigError::InvalidEnvVar {
                        key: "RUNBOX_CREDENTIALS_MOUNT".into(),
                        message: "must be an absolute path".into(),
                    });
                }
                Some(CredentialsConfig {
                    host_dir,
                    container_dir,
                })
            }
            None => None,
        };

        Ok(Self {
            bind_address,
            jobs_file,
            credentials,
            log_level,
        })
    }

    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    pub fn credentials(&self) -> Option<&CredentialsConfig> {
        self.credentials.as_ref()
    }
}

impl Default for RunboxConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND.to_string(),
            jobs_file: None,
            credentials: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

/// Replaces a `$HOME` path segment with the given home directory.
///
/// Templates without the placeholder are returned untouched. A template that
/// needs the placeholder while `home` is unset is a configuration error.
pub fn resolve_home_placeholder(
    template: &str,
    home: Option<String>,
) -> Result<PathBuf, ConfigError> {
    if !template.split('/').any(|segment| segment == HOME_PLACEHOLDER) {
        return Ok(PathBuf::from(template));
    }

    let home = home
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar("HOME".into()))?;

    let resolved: Vec<&str> = template
        .split('/')
        .map(|segment| {
            if segment == HOME_PLACEHOLDER {
                home.trim_end_matches('/')
            } else {
                segment
            }
        })
        .collect();

    Ok(PathBuf::from(resolved.join("/")))
}
