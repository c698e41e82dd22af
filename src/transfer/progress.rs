//! Per-layer progress accounting for streamed pushes and pulls

use crate::runtime::StreamMessage;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Minimum spacing between two emitted status lines
pub const EMIT_INTERVAL: Duration = Duration::from_secs(1);

const DONE_STATUSES: &[&str] = &["Pushed", "Layer already exists", "Pull complete", "Already exists"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerProgress {
    pub id: String,
    pub status: String,
    pub updated: Instant,
}

impl LayerProgress {
    pub fn is_done(&self) -> bool {
        is_done_status(&self.status)
    }
}

pub fn is_done_status(status: &str) -> bool {
    DONE_STATUSES.contains(&status) || status.starts_with("Mounted from")
}

/// Tracks the last status of every layer of one job. Owned by the job
/// being processed; status lines are rate limited by the caller's clock.
#[derive(Debug)]
pub struct ProgressTracker {
    reference: String,
    layers: HashMap<String, LayerProgress>,
    started: Instant,
    last_emit: Option<Instant>,
    interval: Duration,
}

impl ProgressTracker {
    pub fn new(reference: impl Into<String>, started: Instant) -> Self {
        Self {
            reference: reference.into(),
            layers: HashMap::new(),
            started,
            last_emit: None,
            interval: EMIT_INTERVAL,
        }
    }

    /// Record a stream message. Returns a status line when one is due.
    pub fn update(&mut self, message: &StreamMessage, now: Instant) -> Option<String> {
        let (Some(id), Some(status)) = (&message.id, &message.status) else {
            return None;
        };

        self.layers
            .entry(id.clone())
            .and_modify(|layer| {
                // A finished layer stays finished
                if !layer.is_done() {
                    layer.status = status.clone();
                }
                layer.updated = now;
            })
            .or_insert_with(|| LayerProgress {
                id: id.clone(),
                status: status.clone(),
                updated: now,
            });

        let due = self
            .last_emit
            .is_none_or(|last| now.duration_since(last) >= self.interval);
        if !due {
            return None;
        }
        self.last_emit = Some(now);
        Some(self.status_line(now))
    }

    pub fn seen(&self) -> usize {
        self.layers.len()
    }

    pub fn done(&self) -> usize {
        self.layers.values().filter(|l| l.is_done()).count()
    }

    pub fn percent(&self) -> f64 {
        if self.layers.is_empty() {
            0.0
        } else {
            self.done() as f64 * 100.0 / self.seen() as f64
        }
    }

    pub fn status_line(&self, now: Instant) -> String {
        format!(
            "{}: {}/{} layers ({:.0}%) {:.1}s",
            self.reference,
            self.done(),
            self.seen(),
            self.percent(),
            now.duration_since(self.started).as_secs_f64()
        )
    }
}
