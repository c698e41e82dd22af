//! Local container runtime seam
//!
//! The transfer engine and the patcher only talk to [`ContainerRuntime`];
//! [`docker::DockerRuntime`] implements it over the Docker Engine API.

pub mod docker;

pub use docker::DockerRuntime;

use crate::config::AuthConfig;
use crate::error::Result;
use crate::image::{ImageRef, LocalImage};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Credentials attached to a push or pull for one registry host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
    pub server: String,
}

impl RegistryCredentials {
    pub fn for_host(auth: &AuthConfig, server: impl Into<String>) -> Self {
        Self {
            username: auth.username.clone(),
            password: auth.password.clone(),
            server: server.into(),
        }
    }
}

/// One message of a streamed push or pull
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamMessage {
    /// Layer id; `None` for plain status lines
    pub id: Option<String>,
    pub status: Option<String>,
    pub progress: Option<String>,
    pub error: Option<String>,
}

impl StreamMessage {
    pub fn layer(id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            status: Some(status.into()),
            ..Default::default()
        }
    }

    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Default::default()
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

pub type MessageStream<'a> = BoxStream<'a, Result<StreamMessage>>;

/// Container to create for an in-place patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub user: Option<String>,
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Vec<String>,
}

/// Process settings baked into an image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageConfig {
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Option<Vec<String>>,
    pub user: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub output: String,
}

impl ExecOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Fails with `RuntimeUnavailable` when the daemon cannot be reached
    async fn ping(&self) -> Result<()>;

    async fn list_images(&self) -> Result<Vec<LocalImage>>;

    /// `None` when the image is not present locally
    async fn inspect_image(&self, reference: &str) -> Result<Option<LocalImage>>;

    async fn image_config(&self, reference: &str) -> Result<Option<ImageConfig>>;

    async fn tag_image(&self, source: &ImageRef, target: &ImageRef) -> Result<()>;

    fn push_image<'a>(
        &'a self,
        target: &ImageRef,
        credentials: Option<RegistryCredentials>,
    ) -> MessageStream<'a>;

    fn pull_image<'a>(
        &'a self,
        reference: &ImageRef,
        credentials: Option<RegistryCredentials>,
    ) -> MessageStream<'a>;

    async fn remove_image(&self, reference: &str) -> Result<()>;

    /// Returns the container id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, id: &str) -> Result<()>;

    async fn stop_container(&self, id: &str) -> Result<()>;

    async fn remove_container(&self, id: &str) -> Result<()>;

    /// Containers, running or not, whose name starts with `prefix`
    async fn list_containers(&self, prefix: &str) -> Result<Vec<ContainerSummary>>;

    /// Extract a tar archive into `path` inside the container
    async fn upload_archive(&self, id: &str, path: &str, archive: Vec<u8>) -> Result<()>;

    async fn exec(&self, id: &str, cmd: Vec<String>, user: Option<&str>) -> Result<ExecOutput>;

    /// Commit the container as `target`, applying Dockerfile-style `changes`
    async fn commit(&self, id: &str, target: &ImageRef, changes: &[String]) -> Result<()>;
}
