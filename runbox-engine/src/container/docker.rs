//! Docker implementation of [`ContainerRuntime`] backed by bollard.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info};

use super::{
    ContainerError, ContainerHandle, ContainerRuntime, ContainerSpec, ContainerStatus, LogLine,
    LogSink, LogStream,
};

#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects to the local daemon (socket or named pipe, `DOCKER_HOST` aware).
    pub fn connect() -> Result<Self, ContainerError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|err| ContainerError::Unavailable(err.to_string()))?;
        info!("docker runtime initialised");
        Ok(Self { docker })
    }

    /// Pulls `image` unless it is already present locally.
    async fn ensure_image(&self, image: &str) -> Result<(), ContainerError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        info!(%image, "pulling image");
        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(progress) = stream.next().await {
            progress.map_err(|err| {
                ContainerError::Engine(format!("failed to pull image '{}': {}", image, err))
            })?;
        }

        Ok(())
    }
}

fn map_error(err: DockerError) -> ContainerError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404,
            message,
        } => ContainerError::NotFound(message),
        other => ContainerError::Engine(other.to_string()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle, ContainerError> {
        self.ensure_image(&spec.image).await?;

        let binds: Vec<String> = spec.mounts.iter().map(|mount| mount.render()).collect();
        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            cmd: (!spec.args.is_empty()).then(|| spec.args.clone()),
            host_config: (!binds.is_empty()).then(|| HostConfig {
                binds: Some(binds),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(map_error)?;

        for warning in &response.warnings {
            debug!(container = %response.id, %warning, "docker create warning");
        }

        Ok(ContainerHandle::new(response.id))
    }

    async fn start(&self, handle: &ContainerHandle) -> Result<(), ContainerError> {
        self.docker
            .start_container(handle.id(), None::<StartContainerOptions<String>>)
            .await
            .map_err(map_error)
    }

    async fn wait(&self, handle: &ContainerHandle) -> Result<i64, ContainerError> {
        let mut stream = self
            .docker
            .wait_container(handle.id(), None::<WaitContainerOptions<String>>);

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error carrying the status.
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(err)) => Err(map_error(err)),
            None => Err(ContainerError::Engine(format!(
                "wait stream for container {} ended without a status",
                handle
            ))),
        }
    }

    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerStatus, ContainerError> {
        let response = self
            .docker
            .inspect_container(handle.id(), None::<InspectContainerOptions>)
            .await
            .map_err(map_error)?;

        let state = response.state.unwrap_or_default();
        Ok(ContainerStatus {
            running: state.running.unwrap_or(false),
            exit_code: state.exit_code,
        })
    }

    async fn kill(&self, handle: &ContainerHandle) -> Result<(), ContainerError> {
        self.docker
            .kill_container(handle.id(), None::<KillContainerOptions<String>>)
            .await
            .map_err(map_error)
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), ContainerError> {
        self.docker
            .remove_container(
                handle.id(),
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(map_error)
    }

    async fn stream_logs(
        &self,
        handle: &ContainerHandle,
        sink: LogSink,
    ) -> Result<(), ContainerError> {
        let mut stream = self.docker.logs(
            handle.id(),
            Some(LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        while let Some(chunk) = stream.next().await {
            let (stream_kind, message) = match chunk.map_err(map_error)? {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    (LogStream::Stdout, message)
                }
                LogOutput::StdErr { message } => (LogStream::Stderr, message),
                LogOutput::StdIn { .. } => continue,
            };

            for line in String::from_utf8_lossy(&message).lines() {
                let sent = sink.send(LogLine {
                    stream: stream_kind,
                    line: line.to_string(),
                });
                if sent.is_err() {
                    return Ok(());
                }
            }
        }

        Ok(())
    }
}
