use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use runbox_protocol::job::{Container, EnvVar, Job, TaskTemplate, Timeout};
use serde::Deserialize;
use tracing::debug;

use crate::error::SeedError;

/// Reads statically configured jobs from a YAML or JSON file.
///
/// Accepts either `jobs: { <name>: <definition> }` or the bare map. Jobs are
/// returned sorted by name.
pub fn load_job_definitions(path: impl AsRef<Path>) -> Result<Vec<Job>, SeedError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(SeedError::MissingPath(path.display().to_string()));
    }

    let raw = fs::read_to_string(path).map_err(|err| SeedError::from_io(path, err))?;
    let definitions = parse_definitions(&raw, path)?;
    debug!(path = %path.display(), count = definitions.len(), "loaded job definitions");

    Ok(definitions
        .into_iter()
        .map(|(name, definition)| definition.into_job(name))
        .collect())
}

fn parse_definitions(
    raw: &str,
    path: &Path,
) -> Result<BTreeMap<String, JobDefinition>, SeedError> {
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let document_error = match serde_yaml::from_str::<JobsDocument>(raw) {
        Ok(doc) => return Ok(doc.jobs),
        Err(err) => err,
    };

    if let Ok(map) = serde_yaml::from_str::<BTreeMap<String, JobDefinition>>(raw) {
        return Ok(map);
    }

    Err(SeedError::parse_error(
        path,
        format!("expected a jobs document or a map of jobs: {}", document_error),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JobsDocument {
    #[serde(default)]
    jobs: BTreeMap<String, JobDefinition>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JobDefinition {
    image: String,
    #[serde(default)]
    env: Vec<EnvVar>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    timeout_seconds: Option<i64>,
}

impl JobDefinition {
    fn into_job(self, name: String) -> Job {
        let container = Container {
            image: self.image,
            env: self.env,
            args: self.args,
            ..Container::default()
        };
        let timeout = self
            .timeout_seconds
            .map(Timeout::from_secs)
            .unwrap_or_default();
        Job::new(name, TaskTemplate::new(vec![container]).with_timeout(timeout))
    }
}
