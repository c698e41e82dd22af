//! In-place package patching of local images through a temporary container

use crate::error::{Result, TransferError};
use crate::image::ImageRef;
use crate::logging::Logger;
use crate::runtime::{ContainerRuntime, ContainerSpec, ImageConfig};
use chrono::Local;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const CONTAINER_PREFIX: &str = "patch_temp_";
pub const FIX_SUFFIX: &str = "_fix";
const UPLOAD_DIR: &str = "/tmp";

/// Installs package files into an image and commits the result as `<tag>_fix`
pub struct ImagePatcher {
    runtime: Arc<dyn ContainerRuntime>,
    install_command: Vec<String>,
    logger: Logger,
}

impl ImagePatcher {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, logger: Logger) -> Self {
        Self {
            runtime,
            install_command: vec!["rpm".to_string(), "-Uvh".to_string()],
            logger,
        }
    }

    /// Command run once per package file, with the file path appended
    pub fn with_install_command(mut self, command: Vec<String>) -> Self {
        self.install_command = command;
        self
    }

    /// Reference the patched image is committed under
    pub fn fixed_reference(image: &ImageRef) -> ImageRef {
        image.with_tag(&format!("{}{}", image.tag, FIX_SUFFIX))
    }

    /// Remove temporary containers left by earlier, interrupted runs
    pub async fn cleanup_leftovers(&self) -> Result<usize> {
        let leftovers = self.runtime.list_containers(CONTAINER_PREFIX).await?;
        if !leftovers.is_empty() {
            self.logger.info(&format!(
                "Found {} leftover container(s) from previous runs",
                leftovers.len()
            ));
        }

        let mut removed = 0;
        for container in &leftovers {
            match self.dispose(&container.id).await {
                Ok(()) => {
                    removed += 1;
                    self.logger
                        .detail(&format!("Cleaned up container {}", container.name));
                }
                Err(err) => self.logger.warning(&format!(
                    "Failed to clean up container {}: {}",
                    container.name, err
                )),
            }
        }
        Ok(removed)
    }

    pub async fn patch(
        &self,
        image: &ImageRef,
        package_files: &[PathBuf],
        dry_run: bool,
    ) -> Result<ImageRef> {
        verify_files(package_files)?;
        let fixed = Self::fixed_reference(image);

        if dry_run {
            self.logger
                .info(&format!("[dry run] would pull {} if not present", image));
            for file in package_files {
                self.logger
                    .info(&format!("[dry run] would install {}", file_name(file)?));
            }
            self.logger
                .info(&format!("[dry run] would create image {}", fixed));
            return Ok(fixed);
        }

        let config = self.ensure_present(image).await?;
        let name = container_name();
        let id = self
            .runtime
            .create_container(&ContainerSpec {
                name: name.clone(),
                image: image.to_string(),
                user: Some("root".to_string()),
                entrypoint: Some(vec!["sleep".to_string()]),
                cmd: vec!["infinity".to_string()],
            })
            .await?;
        self.logger.detail(&format!("Created temporary container {}", name));

        let outcome = self
            .patch_container(&id, package_files, &fixed, &config)
            .await;

        if let Err(err) = self.dispose(&id).await {
            self.logger.warning(&format!(
                "Failed to remove temporary container {}: {}",
                name, err
            ));
        }

        outcome?;
        self.logger.success(&format!("Created image {}", fixed));
        Ok(fixed)
    }

    async fn ensure_present(&self, image: &ImageRef) -> Result<ImageConfig> {
        if let Some(config) = self.runtime.image_config(&image.to_string()).await? {
            return Ok(config);
        }

        self.logger.step(&format!("Pulling {}", image));
        let mut stream = self.runtime.pull_image(image, None);
        while let Some(item) = stream.next().await {
            let message = item?;
            if let Some(error) = message.error {
                return Err(TransferError::RemoteApi(format!(
                    "pull of {} failed: {}",
                    image, error
                )));
            }
        }
        drop(stream);

        self.runtime
            .image_config(&image.to_string())
            .await?
            .ok_or_else(|| TransferError::ImageNotFoundLocally(image.to_string()))
    }

    async fn patch_container(
        &self,
        id: &str,
        package_files: &[PathBuf],
        fixed: &ImageRef,
        config: &ImageConfig,
    ) -> Result<()> {
        self.logger.step("Copying package files into the container");
        self.runtime
            .upload_archive(id, UPLOAD_DIR, build_archive(package_files)?)
            .await?;
        self.runtime.start_container(id).await?;

        let mut copies = Vec::with_capacity(package_files.len());
        for file in package_files {
            let name = file_name(file)?;
            let in_container = format!("{}/{}", UPLOAD_DIR, name);
            self.logger.step(&format!("Installing {}", name));

            let mut cmd = self.install_command.clone();
            cmd.push(in_container.clone());
            let result = self.runtime.exec(id, cmd, Some("root")).await?;
            if !result.succeeded() {
                return Err(TransferError::RemoteApi(format!(
                    "failed to install {} (exit code {}): {}",
                    name,
                    result.exit_code,
                    result.output.trim()
                )));
            }
            tracing::debug!(package = %name, output = %result.output, "package installed");
            copies.push(in_container);
        }

        let mut rm = vec!["rm".to_string(), "-f".to_string()];
        rm.extend(copies);
        let cleanup = self.runtime.exec(id, rm, Some("root")).await?;
        if !cleanup.succeeded() {
            self.logger.warning(&format!(
                "Could not remove package copies: {}",
                cleanup.output.trim()
            ));
        }

        self.runtime
            .commit(id, fixed, &restore_changes(config)?)
            .await
    }

    async fn dispose(&self, id: &str) -> Result<()> {
        if let Err(err) = self.runtime.stop_container(id).await {
            tracing::debug!(container = %id, error = %err, "stop failed, forcing removal");
        }
        self.runtime.remove_container(id).await
    }
}

fn container_name() -> String {
    let unique = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}{}_{}",
        CONTAINER_PREFIX,
        Local::now().format("%Y%m%d_%H%M%S"),
        &unique[..8]
    )
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| TransferError::Validation(format!("not a file: {}", path.display())))
}

fn verify_files(files: &[PathBuf]) -> Result<()> {
    if files.is_empty() {
        return Err(TransferError::Validation(
            "no package files given".to_string(),
        ));
    }
    for file in files {
        if !file.is_file() {
            return Err(TransferError::Validation(format!(
                "package file not found: {}",
                file.display()
            )));
        }
    }
    Ok(())
}

/// Tar archive holding each file under its bare name
pub fn build_archive(files: &[PathBuf]) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    for file in files {
        builder.append_path_with_name(file, file_name(file)?)?;
    }
    Ok(builder.into_inner()?)
}

/// Dockerfile instructions that undo the temporary container's overrides
fn restore_changes(config: &ImageConfig) -> Result<Vec<String>> {
    let entrypoint = serde_json::to_string(&config.entrypoint.clone().unwrap_or_default())?;
    let mut changes = vec![format!("ENTRYPOINT {}", entrypoint)];
    if let Some(cmd) = &config.cmd {
        changes.push(format!("CMD {}", serde_json::to_string(cmd)?));
    }
    changes.push(format!(
        "USER {}",
        config.user.as_deref().unwrap_or("root")
    ));
    Ok(changes)
}
