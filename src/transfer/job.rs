//! Transfer jobs and their forward-only status machine

use crate::error::{Result, TransferError};
use crate::image::ImageRef;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Retag a local image and push it to the target registry
    Push,
    /// Pull a source image into the local runtime
    Pull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    DryRun,
    /// Target already holds the same digest
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Skipped(SkipReason),
    /// Transfer stream in flight (a pull for pull jobs)
    Pushing,
    Succeeded,
    Failed,
}

impl JobStatus {
    fn rank(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Pushing => 1,
            JobStatus::Skipped(_) | JobStatus::Succeeded | JobStatus::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Skipped(SkipReason::DryRun) => write!(f, "skipped (dry run)"),
            JobStatus::Skipped(SkipReason::AlreadyExists) => write!(f, "skipped (exists)"),
            JobStatus::Pushing => write!(f, "in progress"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One image to move. The target is fixed when the job is created.
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub kind: JobKind,
    pub source: ImageRef,
    pub target: ImageRef,
    status: JobStatus,
    pub elapsed: Duration,
    pub layers_done: usize,
    pub layers_total: usize,
    pub error: Option<String>,
}

impl TransferJob {
    pub fn push(source: ImageRef, target: ImageRef) -> Self {
        Self::new(JobKind::Push, source, target)
    }

    /// Pull jobs fetch `reference` into the local runtime under the same name
    pub fn pull(reference: ImageRef) -> Self {
        Self::new(JobKind::Pull, reference.clone(), reference)
    }

    fn new(kind: JobKind, source: ImageRef, target: ImageRef) -> Self {
        Self {
            kind,
            source,
            target,
            status: JobStatus::Pending,
            elapsed: Duration::ZERO,
            layers_done: 0,
            layers_total: 0,
            error: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Move to `next`. Re-entering the current non-terminal state is a no-op;
    /// moving backwards or out of a terminal state is rejected.
    pub fn advance(&mut self, next: JobStatus) -> Result<()> {
        if self.status == next && !next.is_terminal() {
            return Ok(());
        }
        if self.status.is_terminal() || next.rank() <= self.status.rank() {
            return Err(TransferError::Unexpected(format!(
                "invalid job transition for {}: {} -> {}",
                self.target, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Reference shown in transcripts and summaries
    pub fn display_ref(&self) -> &ImageRef {
        match self.kind {
            JobKind::Push => &self.target,
            JobKind::Pull => &self.source,
        }
    }
}

/// Terminal record of a processed job
#[derive(Debug, Clone)]
pub struct TransferResult {
    pub job: TransferJob,
    /// Outcome text written to the transcript
    pub outcome: String,
    pub failure: Option<TransferError>,
    pub relogin_attempts: u32,
    pub push_attempts: u32,
}

impl TransferResult {
    pub fn status(&self) -> JobStatus {
        self.job.status()
    }

    pub fn succeeded(&self) -> bool {
        self.status() == JobStatus::Succeeded
    }

    pub fn skipped(&self) -> bool {
        matches!(self.status(), JobStatus::Skipped(_))
    }

    pub fn failed(&self) -> bool {
        self.status() == JobStatus::Failed
    }
}
