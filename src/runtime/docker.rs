//! Docker Engine implementation of the container runtime seam

use crate::error::handlers::RuntimeErrorHandler;
use crate::error::{Result, TransferError};
use crate::image::{ImageRef, LocalImage};
use crate::runtime::{
    ContainerRuntime, ContainerSpec, ContainerSummary, ExecOutput, ImageConfig, MessageStream,
    RegistryCredentials, StreamMessage,
};
use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StopContainerOptions, UploadToContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{
    CommitContainerOptions, CreateImageOptions, ListImagesOptions, PushImageOptions,
    RemoveImageOptions, TagImageOptions,
};
use futures::StreamExt;
use std::collections::HashMap;

const STOP_TIMEOUT_SECS: i64 = 10;

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect through `DOCKER_HOST` or the platform default socket
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            TransferError::RuntimeUnavailable(format!("cannot connect to Docker: {}", e))
        })?;
        Ok(Self { docker })
    }

}

fn docker_credentials(credentials: Option<RegistryCredentials>) -> Option<DockerCredentials> {
    credentials.map(|c| DockerCredentials {
        username: Some(c.username),
        password: Some(c.password),
        serveraddress: Some(c.server),
        ..Default::default()
    })
}

fn is_not_found(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn size_of(bytes: i64) -> Option<u64> {
    u64::try_from(bytes).ok()
}

/// The Engine push stream does not expose layer ids, so layers are keyed by
/// arrival order: each `Preparing` opens a layer and each final status
/// closes the oldest open one.
#[derive(Debug, Default)]
struct PushLayerIds {
    opened: usize,
    closed: usize,
}

impl PushLayerIds {
    fn assign(&mut self, status: &str) -> Option<String> {
        match status {
            "Preparing" => {
                self.opened += 1;
                Some(format!("layer-{}", self.opened))
            }
            "Pushed" | "Layer already exists" => self.close(),
            s if s.starts_with("Mounted from") => self.close(),
            _ => None,
        }
    }

    fn close(&mut self) -> Option<String> {
        self.closed += 1;
        Some(format!("layer-{}", self.closed))
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<()> {
        self.docker.ping().await.map(|_| ()).map_err(|e| {
            TransferError::RuntimeUnavailable(format!("Docker daemon is not responding: {}", e))
        })
    }

    async fn list_images(&self) -> Result<Vec<LocalImage>> {
        let images = self
            .docker
            .list_images(Some(ListImagesOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await
            .map_err(|e| RuntimeErrorHandler::handle_runtime_error(e, "list images"))?;

        Ok(images
            .into_iter()
            .map(|summary| LocalImage {
                id: summary.id,
                tags: summary.repo_tags,
                repo_digests: summary.repo_digests,
                size: size_of(summary.size),
            })
            .collect())
    }

    async fn inspect_image(&self, reference: &str) -> Result<Option<LocalImage>> {
        match self.docker.inspect_image(reference).await {
            Ok(inspect) => Ok(Some(LocalImage {
                id: inspect.id.unwrap_or_default(),
                tags: inspect.repo_tags.unwrap_or_default(),
                repo_digests: inspect.repo_digests.unwrap_or_default(),
                size: inspect.size.and_then(size_of),
            })),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(RuntimeErrorHandler::handle_runtime_error(e, "inspect image")),
        }
    }

    async fn image_config(&self, reference: &str) -> Result<Option<ImageConfig>> {
        match self.docker.inspect_image(reference).await {
            Ok(inspect) => Ok(Some(
                inspect
                    .config
                    .map(|config| ImageConfig {
                        entrypoint: config.entrypoint,
                        cmd: config.cmd,
                        user: config.user.filter(|u| !u.is_empty()),
                    })
                    .unwrap_or_default(),
            )),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(RuntimeErrorHandler::handle_runtime_error(e, "inspect image")),
        }
    }

    async fn tag_image(&self, source: &ImageRef, target: &ImageRef) -> Result<()> {
        self.docker
            .tag_image(
                &source.to_string(),
                Some(TagImageOptions {
                    repo: target.repository(),
                    tag: target.tag.clone(),
                }),
            )
            .await
            .map_err(|e| RuntimeErrorHandler::handle_runtime_error(e, "tag image"))
    }

    fn push_image<'a>(
        &'a self,
        target: &ImageRef,
        credentials: Option<RegistryCredentials>,
    ) -> MessageStream<'a> {
        let mut layers = PushLayerIds::default();
        self.docker
            .push_image(
                &target.repository(),
                Some(PushImageOptions {
                    tag: target.tag.clone(),
                }),
                docker_credentials(credentials),
            )
            .map(move |item| match item {
                Ok(info) => {
                    let id = info.status.as_deref().and_then(|s| layers.assign(s));
                    Ok(StreamMessage {
                        id,
                        status: info.status,
                        progress: info.progress,
                        error: info.error,
                    })
                }
                Err(e) => Err(RuntimeErrorHandler::handle_runtime_error(e, "push image")),
            })
            .boxed()
    }

    fn pull_image<'a>(
        &'a self,
        reference: &ImageRef,
        credentials: Option<RegistryCredentials>,
    ) -> MessageStream<'a> {
        self.docker
            .create_image(
                Some(CreateImageOptions {
                    from_image: reference.repository(),
                    tag: reference.tag.clone(),
                    ..Default::default()
                }),
                None,
                docker_credentials(credentials),
            )
            .map(|item| match item {
                Ok(info) => Ok(StreamMessage {
                    id: info.id,
                    status: info.status,
                    progress: info.progress,
                    error: info.error,
                }),
                Err(e) => Err(RuntimeErrorHandler::handle_runtime_error(e, "pull image")),
            })
            .boxed()
    }

    async fn remove_image(&self, reference: &str) -> Result<()> {
        self.docker
            .remove_image(
                reference,
                Some(RemoveImageOptions {
                    force: false,
                    noprune: false,
                }),
                None,
            )
            .await
            .map(|_| ())
            .map_err(|e| RuntimeErrorHandler::handle_runtime_error(e, "remove image"))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let config = Config {
            image: Some(spec.image.clone()),
            user: spec.user.clone(),
            entrypoint: spec.entrypoint.clone(),
            cmd: Some(spec.cmd.clone()),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| RuntimeErrorHandler::handle_runtime_error(e, "create container"))?;

        for warning in &created.warnings {
            tracing::warn!(container = %spec.name, "{}", warning);
        }
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container::<String>(id, None)
            .await
            .map_err(|e| RuntimeErrorHandler::handle_runtime_error(e, "start container"))
    }

    async fn stop_container(&self, id: &str) -> Result<()> {
        self.docker
            .stop_container(id, Some(StopContainerOptions { t: STOP_TIMEOUT_SECS }))
            .await
            .map_err(|e| RuntimeErrorHandler::handle_runtime_error(e, "stop container"))
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| RuntimeErrorHandler::handle_runtime_error(e, "remove container"))
    }

    async fn list_containers(&self, prefix: &str) -> Result<Vec<ContainerSummary>> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![prefix.to_string()]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| RuntimeErrorHandler::handle_runtime_error(e, "list containers"))?;

        // The daemon's name filter is a substring match
        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let name = c
                    .names
                    .unwrap_or_default()
                    .into_iter()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .find(|n| n.starts_with(prefix))?;
                Some(ContainerSummary { id, name })
            })
            .collect())
    }

    async fn upload_archive(&self, id: &str, path: &str, archive: Vec<u8>) -> Result<()> {
        self.docker
            .upload_to_container(
                id,
                Some(UploadToContainerOptions {
                    path: path.to_string(),
                    ..Default::default()
                }),
                archive.into(),
            )
            .await
            .map_err(|e| RuntimeErrorHandler::handle_runtime_error(e, "upload archive"))
    }

    async fn exec(&self, id: &str, cmd: Vec<String>, user: Option<&str>) -> Result<ExecOutput> {
        let exec = self
            .docker
            .create_exec(
                id,
                CreateExecOptions {
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    user: user.map(str::to_string),
                    cmd: Some(cmd),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| RuntimeErrorHandler::handle_runtime_error(e, "create exec"))?;

        let mut output = String::new();
        if let StartExecResults::Attached { output: mut stream, .. } = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| RuntimeErrorHandler::handle_runtime_error(e, "start exec"))?
        {
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(msg) => output.push_str(&msg.to_string()),
                    Err(e) => return Err(RuntimeErrorHandler::handle_runtime_error(e, "exec output")),
                }
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| RuntimeErrorHandler::handle_runtime_error(e, "inspect exec"))?;

        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(-1),
            output,
        })
    }

    async fn commit(&self, id: &str, target: &ImageRef, changes: &[String]) -> Result<()> {
        self.docker
            .commit_container(
                CommitContainerOptions {
                    container: id.to_string(),
                    repo: target.repository(),
                    tag: target.tag.clone(),
                    pause: true,
                    changes: (!changes.is_empty()).then(|| changes.join("\n")),
                    ..Default::default()
                },
                Config::<String>::default(),
            )
            .await
            .map(|_| ())
            .map_err(|e| RuntimeErrorHandler::handle_runtime_error(e, "commit container"))
    }
}
