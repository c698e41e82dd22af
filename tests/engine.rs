mod common;

use common::*;
use registry_transfer::error::TransferError;
use registry_transfer::runtime::StreamMessage;
use registry_transfer::transfer::{
    EngineOptions, JobStatus, NO_LAYERS_PUSHED, SkipReason, TransferJob,
};
use std::sync::Arc;

const SOURCE: &str = "microfocusidolserver/content:24.4";
const TARGET: &str = "registry.example.com/search/idol/content:24.4";
const DIGEST: &str = "sha256:aaaa";

fn setup() -> (Arc<FakeRegistry>, Arc<FakeRuntime>, Arc<FakeLogin>) {
    let registry = Arc::new(FakeRegistry::default());
    let runtime = Arc::new(FakeRuntime::new(registry.clone()).with_image(SOURCE, DIGEST));
    let login = Arc::new(FakeLogin::new(true));
    (registry, runtime, login)
}

fn job() -> TransferJob {
    TransferJob::push(image_ref(SOURCE), image_ref(TARGET))
}

fn with_auth() -> EngineOptions {
    EngineOptions {
        target_auth: target_auth(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_dry_run_has_no_side_effects() {
    let (registry, runtime, login) = setup();
    let engine = engine(runtime.clone(), registry.clone(), login.clone(), with_auth());

    let result = engine.transfer(job(), true).await;

    assert_eq!(result.status(), JobStatus::Skipped(SkipReason::DryRun));
    assert!(runtime.calls().is_empty());
    assert_eq!(*registry.lookups.lock().unwrap(), 0);
    assert_eq!(login.count(), 0);
    assert_eq!(result.outcome, "skipped (dry run)");
}

#[tokio::test]
async fn test_equal_digest_skips_tag_and_push() {
    let (registry, runtime, login) = setup();
    registry
        .manifests
        .lock()
        .unwrap()
        .insert(TARGET.to_string(), DIGEST.to_string());
    let engine = engine(runtime.clone(), registry.clone(), login.clone(), with_auth());

    let result = engine.transfer(job(), false).await;

    assert_eq!(result.status(), JobStatus::Skipped(SkipReason::AlreadyExists));
    assert_eq!(runtime.count("tag_image"), 0);
    assert_eq!(runtime.count("push_image"), 0);
    assert_eq!(result.push_attempts, 0);
}

#[tokio::test]
async fn test_successful_push() {
    let (registry, runtime, login) = setup();
    runtime.script_push(layers_pushed(&["l1", "l2"]));
    let engine = engine(runtime.clone(), registry.clone(), login.clone(), with_auth());

    let result = engine.transfer(job(), false).await;

    assert!(result.succeeded(), "{:?}", result.failure);
    assert_eq!(result.job.layers_done, 2);
    assert_eq!(result.job.layers_total, 2);
    assert_eq!(runtime.count("tag_image"), 1);
    assert_eq!(runtime.count("push_image"), 1);
    assert_eq!(runtime.count("remove_image"), 0);
    assert_eq!(login.count(), 0);
}

#[tokio::test]
async fn test_mounted_layers_count_as_pushed() {
    let (registry, runtime, login) = setup();
    runtime.script_push(vec![
        StreamMessage::layer("layer-1", "Preparing"),
        StreamMessage::layer("layer-2", "Preparing"),
        StreamMessage::layer("layer-1", "Mounted from search/idol/content"),
        StreamMessage::layer("layer-2", "Mounted from search/idol/content"),
    ]);
    let engine = engine(runtime.clone(), registry.clone(), login.clone(), with_auth());

    let result = engine.transfer(job(), false).await;

    assert_eq!(result.status(), JobStatus::Succeeded, "{:?}", result.failure);
    assert_eq!(result.job.layers_done, 2);
    assert_eq!(result.job.layers_total, 2);
}

#[tokio::test]
async fn test_first_push_carries_target_credentials() {
    let (registry, runtime, login) = setup();
    runtime.script_push(layers_pushed(&["l1"]));
    let engine = engine(runtime.clone(), registry.clone(), login.clone(), with_auth());

    assert!(engine.transfer(job(), false).await.succeeded());

    let pushes = runtime.pushes.lock().unwrap().clone();
    let sent = pushes[0].credentials.clone().unwrap();
    assert_eq!(sent.username, "oauth2");
    assert_eq!(sent.server, "registry.example.com");
    assert_eq!(login.count(), 0);
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let (registry, runtime, login) = setup();
    runtime.script_push(layers_pushed(&["l1"]));
    let engine = engine(runtime.clone(), registry.clone(), login.clone(), with_auth());

    let first = engine.transfer(job(), false).await;
    assert!(first.succeeded());
    assert_eq!(registry.digest_of(TARGET).as_deref(), Some(DIGEST));

    let second = engine.transfer(job(), false).await;
    assert_eq!(second.status(), JobStatus::Skipped(SkipReason::AlreadyExists));
    assert_eq!(runtime.count("push_image"), 1);
}

#[tokio::test]
async fn test_auth_failure_relogs_once_and_retries() {
    let (registry, runtime, login) = setup();
    runtime.script_push(vec![
        StreamMessage::layer("l1", "Preparing"),
        StreamMessage::error("unauthorized: authentication required"),
    ]);
    runtime.script_push(layers_pushed(&["l1"]));
    let engine = engine(runtime.clone(), registry.clone(), login.clone(), with_auth());

    let result = engine.transfer(job(), false).await;

    assert!(result.succeeded(), "{:?}", result.failure);
    assert_eq!(result.relogin_attempts, 1);
    assert_eq!(result.push_attempts, 2);
    assert_eq!(*login.calls.lock().unwrap(), vec!["registry.example.com".to_string()]);

    let pushes = runtime.pushes.lock().unwrap().clone();
    assert_eq!(pushes.len(), 2);
    assert_eq!(pushes[0].credentials, pushes[1].credentials);
    let retried = pushes[1].credentials.clone().unwrap();
    assert_eq!(retried.username, "oauth2");
    assert_eq!(retried.server, "registry.example.com");
}

#[tokio::test]
async fn test_relogin_credentials_are_reused_for_later_pushes() {
    let (registry, runtime, login) = setup();
    runtime.script_push(vec![StreamMessage::error("denied: requested access to the resource is denied")]);
    runtime.script_push(layers_pushed(&["l1"]));
    runtime.script_push(layers_pushed(&["l1"]));
    let engine = engine(runtime.clone(), registry.clone(), login.clone(), with_auth());

    assert!(engine.transfer(job(), false).await.succeeded());

    let other_target = "registry.example.com/search/idol/content:24.4-b";
    let result = engine
        .transfer(TransferJob::push(image_ref(SOURCE), image_ref(other_target)), false)
        .await;
    assert!(result.succeeded());
    assert_eq!(login.count(), 1);
    let pushes = runtime.pushes.lock().unwrap().clone();
    assert!(pushes[2].credentials.is_some());
}

#[tokio::test]
async fn test_persistent_auth_failure_is_bounded() {
    let (registry, runtime, login) = setup();
    for _ in 0..3 {
        runtime.script_push(vec![StreamMessage::error("unauthorized: authentication required")]);
    }
    let engine = engine(runtime.clone(), registry.clone(), login.clone(), with_auth());

    let result = engine.transfer(job(), false).await;

    assert!(result.failed());
    assert_eq!(login.count(), 1);
    assert_eq!(runtime.count("push_image"), 2);
    assert!(matches!(
        result.failure,
        Some(TransferError::AuthenticationRequired(_))
    ));
}

#[tokio::test]
async fn test_failed_login_does_not_retry_push() {
    let (registry, runtime, _) = setup();
    let login = Arc::new(FakeLogin::new(false));
    runtime.script_push(vec![StreamMessage::error("unauthorized: authentication required")]);
    let engine = engine(runtime.clone(), registry.clone(), login.clone(), with_auth());

    let result = engine.transfer(job(), false).await;

    assert!(result.failed());
    assert_eq!(login.count(), 1);
    assert_eq!(runtime.count("push_image"), 1);
}

#[tokio::test]
async fn test_auth_failure_without_credentials_fails_fast() {
    let (registry, runtime, login) = setup();
    runtime.script_push(vec![StreamMessage::error("unauthorized: authentication required")]);
    let engine = engine(runtime.clone(), registry.clone(), login.clone(), EngineOptions::default());

    let result = engine.transfer(job(), false).await;

    assert!(result.failed());
    assert_eq!(login.count(), 0);
    assert_eq!(result.relogin_attempts, 0);
}

#[tokio::test]
async fn test_push_without_layers_fails() {
    let (registry, runtime, login) = setup();
    runtime.script_push(vec![StreamMessage::status("The push refers to repository")]);
    let engine = engine(runtime.clone(), registry.clone(), login.clone(), with_auth());

    let result = engine.transfer(job(), false).await;

    assert!(result.failed());
    assert_eq!(
        result.failure,
        Some(TransferError::RemoteApi(NO_LAYERS_PUSHED.to_string()))
    );
}

#[tokio::test]
async fn test_missing_local_image() {
    let (registry, runtime, login) = setup();
    let engine = engine(runtime.clone(), registry.clone(), login.clone(), with_auth());

    let result = engine
        .transfer(
            TransferJob::push(image_ref("microfocusidolserver/view:24.4"), image_ref(TARGET)),
            false,
        )
        .await;

    assert!(result.failed());
    assert!(matches!(
        result.failure,
        Some(TransferError::ImageNotFoundLocally(_))
    ));
    assert_eq!(result.failure.unwrap().hint(), "pull the image first");
    assert_eq!(runtime.count("push_image"), 0);
}

#[tokio::test]
async fn test_remove_old_after_success() {
    let (registry, runtime, login) = setup();
    runtime.script_push(layers_pushed(&["l1"]));
    let options = EngineOptions {
        remove_old: true,
        ..with_auth()
    };
    let engine = engine(runtime.clone(), registry.clone(), login.clone(), options);

    assert!(engine.transfer(job(), false).await.succeeded());
    assert_eq!(runtime.count("remove_image"), 1);
    assert!(runtime.calls().contains(&format!("remove_image {}", SOURCE)));
}

#[tokio::test]
async fn test_pull_job() {
    let (registry, runtime, login) = setup();
    runtime.script_pull(vec![
        StreamMessage::status("Pulling from microfocusidolserver/view"),
        StreamMessage::layer("a1", "Pulling fs layer"),
        StreamMessage::layer("a1", "Pull complete"),
        StreamMessage::status("Status: Downloaded newer image"),
    ]);
    let engine = engine(runtime.clone(), registry.clone(), login.clone(), EngineOptions::default());

    let result = engine.pull(image_ref("microfocusidolserver/view:24.4"), false).await;

    assert!(result.succeeded(), "{:?}", result.failure);
    assert_eq!(result.job.layers_done, 1);
    assert_eq!(runtime.count("pull_image"), 1);
}

#[tokio::test]
async fn test_pull_error_fails_job() {
    let (registry, runtime, login) = setup();
    runtime.script_pull(vec![StreamMessage::error(
        "manifest for microfocusidolserver/view:99 not found",
    )]);
    let engine = engine(runtime.clone(), registry.clone(), login.clone(), EngineOptions::default());

    let result = engine.pull(image_ref("microfocusidolserver/view:99"), false).await;
    assert!(result.failed());
    assert!(result.outcome.starts_with("failed: "));
}
