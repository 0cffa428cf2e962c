//! Resolution of run-time overrides against a stored job.
//!
//! [`resolve`] never touches its input: the effective job is always a fresh
//! value, so a stored template cannot be mutated through a run request.

use std::collections::HashMap;

use runbox_protocol::execution::{ContainerOverride, Overrides};
use runbox_protocol::job::{Container, EnvVar, Job};
use tracing::warn;

use crate::error::EngineError;

/// Produces the job that a run with `overrides` actually executes.
pub fn resolve(job: &Job, overrides: Option<&Overrides>) -> Result<Job, EngineError> {
    let mut effective = job.clone();

    let Some(overrides) = overrides else {
        return Ok(effective);
    };

    if let Some(timeout) = overrides.timeout {
        if !timeout.is_valid() {
            return Err(EngineError::InvalidArgument(format!(
                "invalid timeout override {}s {}ns: seconds must be in (0, 86400] and nanos in [0, 999999999]",
                timeout.seconds, timeout.nanos
            )));
        }
    }

    if let Some(task_count) = overrides.task_count {
        if task_count > 1 {
            warn!(job = %job.name, task_count, "taskCount is not yet supported, running only one task");
        }
    }

    if !overrides.container_overrides.is_empty() {
        let containers = &mut effective.template.containers;
        if containers.is_empty() {
            return Err(EngineError::InvalidArgument(format!(
                "invalid overrides for job {}: template has no containers",
                job.name
            )));
        }

        if overrides.container_overrides.len() > containers.len() {
            return Err(EngineError::InvalidArgument(format!(
                "invalid overrides for job {}: {} container overrides for {} containers",
                job.name,
                overrides.container_overrides.len(),
                containers.len()
            )));
        }

        for (container, container_override) in
            containers.iter_mut().zip(&overrides.container_overrides)
        {
            apply_container_override(container, container_override);
        }
    }

    if let Some(timeout) = overrides.timeout {
        effective.template.timeout = timeout;
    }

    Ok(effective)
}

fn apply_container_override(container: &mut Container, container_override: &ContainerOverride) {
    if let Some(image) = &container_override.image {
        container.image = image.clone();
    }

    if container_override.clear_args {
        container.args.clear();
    }

    if let Some(args) = &container_override.args {
        container.args = args.clone();
    }

    container.env = merge_env(&container.env, &container_override.env);
}

/// Merges `additions` on top of `base`, last write wins per variable name.
///
/// Variables keep the position of their first appearance. Entries without a
/// name or value are dropped.
pub fn merge_env(base: &[EnvVar], additions: &[EnvVar]) -> Vec<EnvVar> {
    let mut merged: Vec<EnvVar> = Vec::with_capacity(base.len() + additions.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for var in base.iter().chain(additions) {
        if !var.is_valid() {
            warn!(env_var = %var.name, "dropping env var without a name or value");
            continue;
        }

        match positions.get(&var.name) {
            Some(&index) => merged[index].value = var.value.clone(),
            None => {
                positions.insert(var.name.clone(), merged.len());
                merged.push(var.clone());
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use runbox_protocol::job::{TaskTemplate, Timeout};

    fn env(pairs: &[(&str, &str)]) -> Vec<EnvVar> {
        pairs.iter().map(|(k, v)| EnvVar::new(*k, *v)).collect()
    }

    fn two_container_job() -> Job {
        Job::new(
            "etl",
            TaskTemplate::new(vec![
                Container::new("etl:1")
                    .with_env("A", "1")
                    .with_args(["--full"]),
                Container::new("sidecar:1").with_args(["serve"]),
            ]),
        )
    }

    #[test]
    fn no_overrides_returns_equal_copy() {
        let job = two_container_job();
        assert_eq!(resolve(&job, None).expect("resolve"), job);
        assert_eq!(
            resolve(&job, Some(&Overrides::default())).expect("resolve"),
            job
        );
    }

    #[test]
    fn env_merge_is_last_write_wins() {
        let merged = merge_env(&env(&[("A", "1")]), &env(&[("A", "2"), ("B", "3")]));
        assert_eq!(merged, env(&[("A", "2"), ("B", "3")]));

        let again = merge_env(&merged, &env(&[("A", "2"), ("B", "3")]));
        assert_eq!(again, merged);
    }

    #[test]
    fn env_merge_drops_invalid_entries() {
        let merged = merge_env(
            &env(&[("A", "1"), ("", "orphan")]),
            &env(&[("B", ""), ("C", "3")]),
        );
        assert_eq!(merged, env(&[("A", "1"), ("C", "3")]));
    }

    #[test]
    fn applies_overrides_positionally() {
        let job = two_container_job();
        let overrides = Overrides {
            container_overrides: vec![ContainerOverride {
                image: Some("etl:2".into()),
                args: Some(vec!["--incremental".into()]),
                env: env(&[("A", "9"), ("B", "2")]),
                ..ContainerOverride::default()
            }],
            ..Overrides::default()
        };

        let effective = resolve(&job, Some(&overrides)).expect("resolve");
        let primary = &effective.template.containers[0];
        assert_eq!(effective.template.containers.len(), 2);
        assert_eq!(primary.image, "etl:2");
        assert_eq!(primary.args, vec!["--incremental".to_string()]);
        assert_eq!(primary.env, env(&[("A", "9"), ("B", "2")]));
        assert_eq!(effective.template.containers[1], job.template.containers[1]);
        assert_eq!(job.template.containers[0].image, "etl:1");
    }

    #[test]
    fn clear_args_runs_before_args_override() {
        let job = two_container_job();
        let cleared = Overrides {
            container_overrides: vec![ContainerOverride {
                clear_args: true,
                ..ContainerOverride::default()
            }],
            ..Overrides::default()
        };
        let effective = resolve(&job, Some(&cleared)).expect("resolve");
        assert!(effective.template.containers[0].args.is_empty());

        let replaced = Overrides {
            container_overrides: vec![ContainerOverride {
                clear_args: true,
                args: Some(vec!["--dry-run".into()]),
                ..ContainerOverride::default()
            }],
            ..Overrides::default()
        };
        let effective = resolve(&job, Some(&replaced)).expect("resolve");
        assert_eq!(effective.template.containers[0].args, vec!["--dry-run"]);
    }

    #[test]
    fn rejects_more_overrides_than_containers() {
        let job = two_container_job();
        let overrides = Overrides {
            container_overrides: vec![ContainerOverride::default(); 3],
            ..Overrides::default()
        };
        assert!(matches!(
            resolve(&job, Some(&overrides)),
            Err(EngineError::InvalidArgument(_))
        ));

        let empty = Job::new("empty", TaskTemplate::default());
        let overrides = Overrides {
            container_overrides: vec![ContainerOverride::default()],
            ..Overrides::default()
        };
        assert!(matches!(
            resolve(&empty, Some(&overrides)),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn timeout_override_is_range_checked() {
        let job = two_container_job();
        for invalid in [
            Timeout::new(0, 0),
            Timeout::new(86_401, 0),
            Timeout::new(30, -1),
            Timeout::new(30, 1_000_000_000),
        ] {
            let overrides = Overrides {
                timeout: Some(invalid),
                ..Overrides::default()
            };
            assert!(matches!(
                resolve(&job, Some(&overrides)),
                Err(EngineError::InvalidArgument(_))
            ));
        }

        let overrides = Overrides {
            timeout: Some(Timeout::new(30, 500_000_000)),
            ..Overrides::default()
        };
        let effective = resolve(&job, Some(&overrides)).expect("resolve");
        assert_eq!(effective.template.timeout, Timeout::new(30, 500_000_000));
        assert_eq!(job.template.timeout, Timeout::default());
    }

    #[test]
    fn task_count_above_one_still_resolves() {
        let job = two_container_job();
        let overrides = Overrides {
            task_count: Some(4),
            ..Overrides::default()
        };
        assert_eq!(resolve(&job, Some(&overrides)).expect("resolve"), job);
    }
}
