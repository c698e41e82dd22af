mod common;

use common::*;
use registry_transfer::logging::Logger;
use registry_transfer::transfer::{EngineOptions, Pipeline, ResultRecorder, TransferJob};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const IMAGES: &[&str] = &[
    "microfocusidolserver/content:24.4",
    "microfocusidolserver/category:24.4",
    "microfocusidolserver/view:24.4",
];

fn jobs() -> Vec<TransferJob> {
    IMAGES
        .iter()
        .map(|source| {
            let name = source.split('/').nth(1).unwrap();
            TransferJob::push(
                image_ref(source),
                image_ref(&format!("registry.example.com/search/idol/{}", name)),
            )
        })
        .collect()
}

fn runtime_with_images(registry: Arc<FakeRegistry>) -> FakeRuntime {
    let mut runtime = FakeRuntime::new(registry);
    for (i, image) in IMAGES.iter().enumerate() {
        runtime = runtime.with_image(image, &format!("sha256:{:04}", i));
    }
    runtime
}

fn transcript_lines(path: &std::path::Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_run_records_every_job() {
    let registry = Arc::new(FakeRegistry::default());
    let runtime = Arc::new(runtime_with_images(registry.clone()));
    runtime.script_push(layers_pushed(&["l1"]));
    runtime.script_push(vec![]);
    runtime.script_push(layers_pushed(&["l1", "l2"]));
    let engine = engine(
        runtime.clone(),
        registry,
        Arc::new(FakeLogin::new(true)),
        EngineOptions::default(),
    );

    let dir = tempfile::tempdir().unwrap();
    let recorder = ResultRecorder::create(dir.path(), "push").unwrap();
    let path = recorder.path().to_path_buf();
    let mut pipeline =
        Pipeline::new(&engine, CancellationToken::new(), Logger::new_quiet()).with_recorder(recorder);

    let summary = pipeline.run(jobs(), false).await;

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.exit_code(), 1);

    let failures = summary.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "registry.example.com/search/idol/category:24.4");

    let lines = transcript_lines(&path);
    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains(", registry.example.com/search/idol/content:24.4, succeeded, Elapsed time: "));
    assert!(lines[1].contains(", failed: "));
    for line in &lines {
        assert!(line.ends_with(" seconds"));
    }
}

#[tokio::test]
async fn test_dry_run_summary_is_clean() {
    let registry = Arc::new(FakeRegistry::default());
    let runtime = Arc::new(runtime_with_images(registry.clone()));
    let engine = engine(
        runtime.clone(),
        registry,
        Arc::new(FakeLogin::new(true)),
        EngineOptions::default(),
    );

    let mut pipeline = Pipeline::new(&engine, CancellationToken::new(), Logger::new_quiet());
    let summary = pipeline.run(jobs(), true).await;

    assert_eq!(summary.skipped, 3);
    assert_eq!(summary.exit_code(), 0);
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn test_cancel_before_start_runs_nothing() {
    let registry = Arc::new(FakeRegistry::default());
    let runtime = Arc::new(runtime_with_images(registry.clone()));
    let engine = engine(
        runtime.clone(),
        registry,
        Arc::new(FakeLogin::new(true)),
        EngineOptions::default(),
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut pipeline = Pipeline::new(&engine, cancel, Logger::new_quiet());
    let summary = pipeline.run(jobs(), false).await;

    assert!(summary.cancelled);
    assert_eq!(summary.not_started, 3);
    assert!(summary.results.is_empty());
    assert_eq!(summary.exit_code(), 1);
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn test_interrupt_leaves_only_complete_transcript_lines() {
    let registry = Arc::new(FakeRegistry::default());
    let cancel = CancellationToken::new();
    let mut runtime = runtime_with_images(registry.clone());
    // The interrupt arrives while the first job is in flight
    runtime.cancel_on_inspect = Some(cancel.clone());
    let runtime = Arc::new(runtime);
    runtime.script_push(layers_pushed(&["l1"]));
    let engine = engine(
        runtime.clone(),
        registry,
        Arc::new(FakeLogin::new(true)),
        EngineOptions::default(),
    );

    let dir = tempfile::tempdir().unwrap();
    let recorder = ResultRecorder::create(dir.path(), "push").unwrap();
    let path = recorder.path().to_path_buf();
    let mut pipeline = Pipeline::new(&engine, cancel, Logger::new_quiet()).with_recorder(recorder);

    let summary = pipeline.run(jobs(), false).await;

    assert!(summary.cancelled);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.not_started, 2);
    assert_eq!(runtime.count("push_image"), 1);

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.ends_with('\n'));
    let lines = transcript_lines(&path);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("content:24.4, succeeded, Elapsed time: "));
}
