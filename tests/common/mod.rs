//! In-memory stand-ins for the runtime, the digest resolver and the login seam

#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use registry_transfer::config::AuthConfig;
use registry_transfer::error::{Result, TransferError};
use registry_transfer::image::{ImageRef, LocalImage};
use registry_transfer::logging::Logger;
use registry_transfer::registry::{DigestResolver, RegistryLogin};
use registry_transfer::runtime::{
    ContainerRuntime, ContainerSpec, ContainerSummary, ExecOutput, ImageConfig, MessageStream,
    RegistryCredentials, StreamMessage,
};
use registry_transfer::transfer::{EngineOptions, TransferEngine};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Remote registry contents shared by the fake runtime and the fake resolver
#[derive(Default)]
pub struct FakeRegistry {
    pub manifests: Mutex<HashMap<String, String>>,
    pub lookups: Mutex<usize>,
}

impl FakeRegistry {
    pub fn digest_of(&self, reference: &str) -> Option<String> {
        self.manifests.lock().unwrap().get(reference).cloned()
    }
}

#[async_trait]
impl DigestResolver for FakeRegistry {
    async fn remote_digest(&self, reference: &ImageRef) -> Result<Option<String>> {
        *self.lookups.lock().unwrap() += 1;
        Ok(self.digest_of(&reference.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushCall {
    pub target: String,
    pub credentials: Option<RegistryCredentials>,
}

pub struct FakeRuntime {
    pub registry: Arc<FakeRegistry>,
    pub images: Mutex<HashMap<String, LocalImage>>,
    /// Scripted push streams, consumed one per push call
    pub push_scripts: Mutex<VecDeque<Vec<StreamMessage>>>,
    pub pull_scripts: Mutex<VecDeque<Vec<StreamMessage>>>,
    pub calls: Mutex<Vec<String>>,
    pub pushes: Mutex<Vec<PushCall>>,
    /// Cancelled on the first inspect call
    pub cancel_on_inspect: Option<CancellationToken>,
    /// Exec commands containing this text exit with status 1
    pub failing_exec: Option<String>,
}

impl FakeRuntime {
    pub fn new(registry: Arc<FakeRegistry>) -> Self {
        Self {
            registry,
            images: Mutex::new(HashMap::new()),
            push_scripts: Mutex::new(VecDeque::new()),
            pull_scripts: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            pushes: Mutex::new(Vec::new()),
            cancel_on_inspect: None,
            failing_exec: None,
        }
    }

    pub fn with_image(self, reference: &str, digest: &str) -> Self {
        let image = LocalImage {
            id: format!("sha256:id-{}", reference),
            tags: vec![reference.to_string()],
            repo_digests: vec![format!("{}@{}", reference, digest)],
            size: Some(1024),
        };
        self.images
            .lock()
            .unwrap()
            .insert(reference.to_string(), image);
        self
    }

    pub fn script_push(&self, messages: Vec<StreamMessage>) {
        self.push_scripts.lock().unwrap().push_back(messages);
    }

    pub fn script_pull(&self, messages: Vec<StreamMessage>) {
        self.pull_scripts.lock().unwrap().push_back(messages);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(call)).count()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

pub fn layers_pushed(ids: &[&str]) -> Vec<StreamMessage> {
    let mut messages = vec![StreamMessage::status("The push refers to repository")];
    for id in ids {
        messages.push(StreamMessage::layer(*id, "Preparing"));
    }
    for id in ids {
        messages.push(StreamMessage::layer(*id, "Pushed"));
    }
    messages.push(StreamMessage::status("latest: digest: sha256:pushed size: 1234"));
    messages
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> Result<()> {
        self.log("ping".to_string());
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<LocalImage>> {
        self.log("list_images".to_string());
        Ok(self.images.lock().unwrap().values().cloned().collect())
    }

    async fn inspect_image(&self, reference: &str) -> Result<Option<LocalImage>> {
        self.log(format!("inspect_image {}", reference));
        if let Some(token) = &self.cancel_on_inspect {
            token.cancel();
        }
        Ok(self.images.lock().unwrap().get(reference).cloned())
    }

    async fn image_config(&self, reference: &str) -> Result<Option<ImageConfig>> {
        self.log(format!("image_config {}", reference));
        Ok(self
            .images
            .lock()
            .unwrap()
            .get(reference)
            .map(|_| ImageConfig::default()))
    }

    async fn tag_image(&self, source: &ImageRef, target: &ImageRef) -> Result<()> {
        self.log(format!("tag_image {} {}", source, target));
        let mut images = self.images.lock().unwrap();
        let image = images
            .get(&source.to_string())
            .cloned()
            .ok_or_else(|| TransferError::ImageNotFoundLocally(source.to_string()))?;
        images.insert(target.to_string(), image);
        Ok(())
    }

    fn push_image<'a>(
        &'a self,
        target: &ImageRef,
        credentials: Option<RegistryCredentials>,
    ) -> MessageStream<'a> {
        self.log(format!("push_image {}", target));
        self.pushes.lock().unwrap().push(PushCall {
            target: target.to_string(),
            credentials,
        });
        let messages = self.push_scripts.lock().unwrap().pop_front().unwrap_or_default();

        // A push without errors stores the image's digest remotely
        let failed = messages.iter().any(|m| m.error.is_some());
        if !failed {
            if let Some(image) = self.images.lock().unwrap().get(&target.to_string()) {
                if let Some(digest) = image.digests().first() {
                    self.registry
                        .manifests
                        .lock()
                        .unwrap()
                        .insert(target.to_string(), digest.clone());
                }
            }
        }

        futures::stream::iter(messages.into_iter().map(Ok)).boxed()
    }

    fn pull_image<'a>(
        &'a self,
        reference: &ImageRef,
        _credentials: Option<RegistryCredentials>,
    ) -> MessageStream<'a> {
        self.log(format!("pull_image {}", reference));
        let messages = self.pull_scripts.lock().unwrap().pop_front().unwrap_or_default();
        futures::stream::iter(messages.into_iter().map(Ok)).boxed()
    }

    async fn remove_image(&self, reference: &str) -> Result<()> {
        self.log(format!("remove_image {}", reference));
        self.images.lock().unwrap().remove(reference);
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.log(format!("create_container {}", spec.name));
        Ok(format!("id-{}", spec.name))
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.log(format!("start_container {}", id));
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> Result<()> {
        self.log(format!("stop_container {}", id));
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.log(format!("remove_container {}", id));
        Ok(())
    }

    async fn list_containers(&self, prefix: &str) -> Result<Vec<ContainerSummary>> {
        self.log(format!("list_containers {}", prefix));
        Ok(Vec::new())
    }

    async fn upload_archive(&self, id: &str, path: &str, _archive: Vec<u8>) -> Result<()> {
        self.log(format!("upload_archive {} {}", id, path));
        Ok(())
    }

    async fn exec(&self, id: &str, cmd: Vec<String>, _user: Option<&str>) -> Result<ExecOutput> {
        let line = cmd.join(" ");
        self.log(format!("exec {} {}", id, line));
        let failed = self
            .failing_exec
            .as_deref()
            .is_some_and(|needle| line.contains(needle));
        Ok(ExecOutput {
            exit_code: if failed { 1 } else { 0 },
            output: if failed {
                "error: package conflicts".to_string()
            } else {
                String::new()
            },
        })
    }

    async fn commit(&self, id: &str, target: &ImageRef, _changes: &[String]) -> Result<()> {
        self.log(format!("commit {} {}", id, target));
        Ok(())
    }
}

pub struct FakeLogin {
    pub succeed: bool,
    pub calls: Mutex<Vec<String>>,
}

impl FakeLogin {
    pub fn new(succeed: bool) -> Self {
        Self {
            succeed,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl RegistryLogin for FakeLogin {
    fn name(&self) -> &str {
        "fake"
    }

    async fn login(&self, registry_host: &str, _auth: &AuthConfig) -> Result<()> {
        self.calls.lock().unwrap().push(registry_host.to_string());
        if self.succeed {
            Ok(())
        } else {
            Err(TransferError::AuthenticationRequired("bad credentials".to_string()))
        }
    }
}

pub fn target_auth() -> Option<AuthConfig> {
    Some(AuthConfig::new("oauth2", "glpat-token"))
}

pub fn engine(
    runtime: Arc<FakeRuntime>,
    registry: Arc<FakeRegistry>,
    login: Arc<FakeLogin>,
    options: EngineOptions,
) -> TransferEngine {
    TransferEngine::new(runtime, registry, login, options, Logger::new_quiet())
}

pub fn image_ref(s: &str) -> ImageRef {
    ImageRef::parse(s).unwrap()
}
