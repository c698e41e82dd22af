//! Retag, idempotency check and push of a single job
//!
//! A push job goes through: local inspect, remote digest comparison, tag,
//! streamed push. Authentication failures during the push trigger exactly one
//! re-login against the target registry followed by one more push.

use crate::config::AuthConfig;
use crate::error::handlers::PushErrorClassifier;
use crate::error::{Result, TransferError};
use crate::image::ImageRef;
use crate::logging::Logger;
use crate::registry::{DigestResolver, RegistryLogin};
use crate::runtime::{ContainerRuntime, MessageStream, RegistryCredentials};
use crate::transfer::job::{JobKind, JobStatus, SkipReason, TransferJob, TransferResult};
use crate::transfer::progress::ProgressTracker;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

pub const NO_LAYERS_PUSHED: &str = "no layers were pushed - check authentication and permissions";

/// Maximum number of re-logins per push job
const MAX_RELOGINS: u32 = 1;

#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Credential for the target registry, used for the re-login
    pub target_auth: Option<AuthConfig>,
    /// Credential attached to pulls from source registries
    pub source_auth: Option<AuthConfig>,
    /// Remove the original local tag after a successful push
    pub remove_old: bool,
}

/// What one streamed push or pull produced
#[derive(Debug, Default)]
struct StreamOutcome {
    layers_done: usize,
    layers_seen: usize,
    errors: Vec<TransferError>,
}

impl StreamOutcome {
    /// The error that decides the job: an authentication failure wins
    fn decisive_error(&self) -> Option<&TransferError> {
        self.errors
            .iter()
            .find(|e| e.is_auth_failure())
            .or_else(|| self.errors.first())
    }
}

#[derive(Debug, Default)]
struct Attempts {
    push: u32,
    relogin: u32,
}

pub struct TransferEngine {
    runtime: Arc<dyn ContainerRuntime>,
    digests: Arc<dyn DigestResolver>,
    login: Arc<dyn RegistryLogin>,
    options: EngineOptions,
    logger: Logger,
    /// Credentials established by a re-login, by registry host
    sessions: Mutex<HashMap<String, RegistryCredentials>>,
}

impl TransferEngine {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        digests: Arc<dyn DigestResolver>,
        login: Arc<dyn RegistryLogin>,
        options: EngineOptions,
        logger: Logger,
    ) -> Self {
        Self {
            runtime,
            digests,
            login,
            options,
            logger,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Process one job to a terminal state. Never fails: errors end up in
    /// the result as a `Failed` status.
    pub async fn transfer(&self, mut job: TransferJob, dry_run: bool) -> TransferResult {
        let started = Instant::now();
        let mut attempts = Attempts::default();

        let outcome = if dry_run {
            self.logger.info(&match job.kind {
                JobKind::Push => format!("[dry run] would push {} -> {}", job.source, job.target),
                JobKind::Pull => format!("[dry run] would pull {}", job.source),
            });
            Ok(JobStatus::Skipped(SkipReason::DryRun))
        } else {
            match job.kind {
                JobKind::Push => self.run_push(&mut job, &mut attempts, started).await,
                JobKind::Pull => self.run_pull(&mut job, started).await,
            }
        };

        self.finish(job, outcome, attempts, started)
    }

    /// Pull `reference` into the local runtime
    pub async fn pull(&self, reference: ImageRef, dry_run: bool) -> TransferResult {
        self.transfer(TransferJob::pull(reference), dry_run).await
    }

    async fn run_push(
        &self,
        job: &mut TransferJob,
        attempts: &mut Attempts,
        started: Instant,
    ) -> Result<JobStatus> {
        let local = self
            .runtime
            .inspect_image(&job.source.to_string())
            .await?
            .ok_or_else(|| TransferError::ImageNotFoundLocally(job.source.to_string()))?;

        match self.digests.remote_digest(&job.target).await {
            Ok(Some(remote)) if local.has_digest(&remote) => {
                self.logger.info(&format!(
                    "{} already holds {}, skipping",
                    job.target, remote
                ));
                return Ok(JobStatus::Skipped(SkipReason::AlreadyExists));
            }
            Ok(_) => {}
            Err(err) => self.logger.warning(&format!(
                "Could not check remote digest of {}: {}",
                job.target, err
            )),
        }

        if job.source != job.target {
            self.logger
                .step(&format!("Tagging {} as {}", job.source, job.target));
            self.runtime.tag_image(&job.source, &job.target).await?;
        }

        job.advance(JobStatus::Pushing)?;
        let host = job.target.registry_host().to_string();
        // The daemon only sees the credentials sent with each push request
        let mut credentials = self.session_for(&host).or_else(|| {
            self.options
                .target_auth
                .as_ref()
                .map(|auth| RegistryCredentials::for_host(auth, host.clone()))
        });

        loop {
            attempts.push += 1;
            self.logger.step(&format!("Pushing {}", job.target));
            let outcome = self.stream_push(&job.target, credentials.clone(), started).await;
            job.layers_done = outcome.layers_done;
            job.layers_total = outcome.layers_seen;

            match outcome.decisive_error() {
                Some(err) if err.is_auth_failure() && attempts.relogin < MAX_RELOGINS => {
                    let Some(auth) = &self.options.target_auth else {
                        return Err(err.clone());
                    };
                    attempts.relogin += 1;
                    self.logger.warning(&format!(
                        "Push of {} was rejected ({}), logging in to {} again",
                        job.target, err, host
                    ));
                    match self.login.login(&host, auth).await {
                        Ok(()) => {
                            self.logger.success(&format!("Logged in to {}", host));
                            let session = RegistryCredentials::for_host(auth, host.clone());
                            self.remember_session(&host, session.clone());
                            credentials = Some(session);
                        }
                        Err(login_err) => {
                            self.logger
                                .error(&format!("Login to {} failed: {}", host, login_err));
                            return Err(err.clone());
                        }
                    }
                }
                Some(err) => return Err(err.clone()),
                None if outcome.layers_done > 0 => break,
                None => return Err(TransferError::RemoteApi(NO_LAYERS_PUSHED.to_string())),
            }
        }

        if self.options.remove_old && job.source != job.target {
            if let Err(err) = self.runtime.remove_image(&job.source.to_string()).await {
                self.logger.warning(&format!(
                    "Could not remove original tag {}: {}",
                    job.source, err
                ));
            } else {
                self.logger.detail(&format!("Removed original tag {}", job.source));
            }
        }

        Ok(JobStatus::Succeeded)
    }

    async fn run_pull(&self, job: &mut TransferJob, started: Instant) -> Result<JobStatus> {
        job.advance(JobStatus::Pushing)?;
        let credentials = self
            .options
            .source_auth
            .as_ref()
            .map(|auth| RegistryCredentials::for_host(auth, job.source.registry_host()));

        self.logger.step(&format!("Pulling {}", job.source));
        let mut tracker = ProgressTracker::new(job.source.to_string(), started);
        let mut outcome = StreamOutcome::default();
        let mut stream = self.runtime.pull_image(&job.source, credentials);
        self.drain(&mut stream, &mut tracker, &mut outcome).await;

        job.layers_done = outcome.layers_done;
        job.layers_total = outcome.layers_seen;
        match outcome.decisive_error() {
            Some(err) => Err(err.clone()),
            None => Ok(JobStatus::Succeeded),
        }
    }

    async fn stream_push(
        &self,
        target: &ImageRef,
        credentials: Option<RegistryCredentials>,
        started: Instant,
    ) -> StreamOutcome {
        let mut tracker = ProgressTracker::new(target.to_string(), started);
        let mut outcome = StreamOutcome::default();
        let mut stream = self.runtime.push_image(target, credentials);
        self.drain(&mut stream, &mut tracker, &mut outcome).await;
        outcome
    }

    /// Consume a push or pull stream, buffering every error it reports
    async fn drain(
        &self,
        stream: &mut MessageStream<'_>,
        tracker: &mut ProgressTracker,
        outcome: &mut StreamOutcome,
    ) {
        while let Some(item) = stream.next().await {
            match item {
                Ok(message) => {
                    if let Some(error) = &message.error {
                        tracing::debug!(error = %error, "stream error message");
                        outcome.errors.push(PushErrorClassifier::classify(error));
                        continue;
                    }
                    if let Some(status) = &message.status {
                        tracing::trace!(id = ?message.id, status = %status, "stream message");
                        if status.contains("digest: sha256:") {
                            self.logger.detail(status);
                        }
                    }
                    if let Some(line) = tracker.update(&message, Instant::now()) {
                        self.logger.status_line(&line);
                    }
                }
                Err(err) => {
                    outcome.errors.push(err);
                    break;
                }
            }
        }
        self.logger.clear_status();
        outcome.layers_done = tracker.done();
        outcome.layers_seen = tracker.seen();
    }

    fn session_for(&self, host: &str) -> Option<RegistryCredentials> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(host)
            .cloned()
    }

    fn remember_session(&self, host: &str, credentials: RegistryCredentials) {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(host.to_string(), credentials);
    }

    fn finish(
        &self,
        mut job: TransferJob,
        outcome: Result<JobStatus>,
        attempts: Attempts,
        started: Instant,
    ) -> TransferResult {
        job.elapsed = started.elapsed();
        let (status, failure) = match outcome {
            Ok(status) => (status, None),
            Err(err) => (JobStatus::Failed, Some(err)),
        };
        if let Err(err) = job.advance(status) {
            tracing::error!(error = %err, "job state machine rejected terminal status");
        }
        job.error = failure.as_ref().map(|e| e.to_string());

        let reference = job.display_ref().to_string();
        let outcome = match &failure {
            Some(err) => format!("failed: {}", err),
            None => status.to_string(),
        };
        let summary = format!(
            "{} {} in {} ({}/{} layers)",
            reference,
            outcome,
            self.logger.format_duration(job.elapsed),
            job.layers_done,
            job.layers_total
        );
        match status {
            JobStatus::Succeeded => self.logger.success(&summary),
            JobStatus::Failed => self.logger.error(&summary),
            _ => self.logger.detail(&summary),
        }

        TransferResult {
            job,
            outcome,
            failure,
            relogin_attempts: attempts.relogin,
            push_attempts: attempts.push,
        }
    }
}
