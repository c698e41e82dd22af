//! Transfer jobs: engine, progress, transcript, job loop and patching

pub mod engine;
pub mod job;
pub mod patch;
pub mod pipeline;
pub mod progress;
pub mod recorder;

pub use engine::{EngineOptions, NO_LAYERS_PUSHED, TransferEngine};
pub use job::{JobKind, JobStatus, SkipReason, TransferJob, TransferResult};
pub use patch::ImagePatcher;
pub use pipeline::{Pipeline, RunSummary};
pub use progress::ProgressTracker;
pub use recorder::ResultRecorder;
