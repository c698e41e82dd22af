//! Sequential job loop with cancellation, transcript and run summary

use crate::error::TransferError;
use crate::logging::Logger;
use crate::transfer::engine::TransferEngine;
use crate::transfer::job::{TransferJob, TransferResult};
use crate::transfer::recorder::ResultRecorder;
use tokio_util::sync::CancellationToken;

/// Counts and failures of one run
#[derive(Debug, Default)]
pub struct RunSummary {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Jobs never started because the run was cancelled
    pub not_started: usize,
    pub cancelled: bool,
    /// Error that stopped the whole run, such as a lost runtime connection
    pub aborted: Option<TransferError>,
    pub results: Vec<TransferResult>,
}

impl RunSummary {
    fn add(&mut self, result: TransferResult) {
        if result.succeeded() {
            self.succeeded += 1;
        } else if result.skipped() {
            self.skipped += 1;
        } else {
            self.failed += 1;
        }
        self.results.push(result);
    }

    pub fn total(&self) -> usize {
        self.results.len() + self.not_started
    }

    /// 0 only when every job completed without failure
    pub fn exit_code(&self) -> i32 {
        if self.failed > 0 || self.cancelled || self.aborted.is_some() {
            1
        } else {
            0
        }
    }

    /// `(reference, error, hint)` for each failed job
    pub fn failures(&self) -> Vec<(String, String, &'static str)> {
        self.results
            .iter()
            .filter(|r| r.failed())
            .map(|r| {
                let error = r.job.error.clone().unwrap_or_default();
                let hint = r
                    .failure
                    .as_ref()
                    .map(|f| f.hint())
                    .unwrap_or("check the transcript for details");
                (r.job.display_ref().to_string(), error, hint)
            })
            .collect()
    }

    pub fn print(&self, logger: &Logger) {
        let mut items = vec![
            ("Succeeded", self.succeeded.to_string()),
            ("Skipped", self.skipped.to_string()),
            ("Failed", self.failed.to_string()),
        ];
        if self.cancelled || self.aborted.is_some() {
            items.push(("Not started", self.not_started.to_string()));
        }
        logger.summary_kv("Transfer Summary", &items);

        let failures = self.failures();
        if !failures.is_empty() {
            let lines: Vec<String> = failures
                .iter()
                .map(|(reference, error, hint)| format!("{}: {} ({})", reference, error, hint))
                .collect();
            logger.list("Failed images", &lines);
        }
    }
}

/// Runs jobs one at a time. Cancellation is checked before each job; a job
/// already in flight runs to completion.
pub struct Pipeline<'a> {
    engine: &'a TransferEngine,
    recorder: Option<ResultRecorder>,
    cancel: CancellationToken,
    logger: Logger,
}

impl<'a> Pipeline<'a> {
    pub fn new(engine: &'a TransferEngine, cancel: CancellationToken, logger: Logger) -> Self {
        Self {
            engine,
            recorder: None,
            cancel,
            logger,
        }
    }

    pub fn with_recorder(mut self, recorder: ResultRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub async fn run(&mut self, jobs: Vec<TransferJob>, dry_run: bool) -> RunSummary {
        let mut summary = RunSummary::default();
        let total = jobs.len();

        for (index, job) in jobs.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                summary.not_started = total - index;
                self.logger.warning(&format!(
                    "Interrupted, {} job(s) not started",
                    summary.not_started
                ));
                break;
            }

            self.logger
                .subsection(&format!("[{}/{}] {}", index + 1, total, job.display_ref()));
            let result = self.engine.transfer(job, dry_run).await;

            if let Some(recorder) = self.recorder.as_mut() {
                if let Err(err) = recorder.record(
                    &result.job.display_ref().to_string(),
                    &result.outcome,
                    result.job.elapsed,
                ) {
                    self.logger
                        .error(&format!("Could not write transcript line: {}", err));
                }
            }
            let fatal = result.failure.clone().filter(|f| f.is_fatal());
            summary.add(result);

            if let Some(err) = fatal {
                summary.not_started = total - index - 1;
                self.logger.error(&format!(
                    "Stopping run: {} ({})",
                    err,
                    err.hint()
                ));
                summary.aborted = Some(err);
                break;
            }
        }

        summary
    }
}
