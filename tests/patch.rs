mod common;

use common::{FakeRegistry, FakeRuntime, image_ref};
use registry_transfer::error::TransferError;
use registry_transfer::logging::Logger;
use registry_transfer::runtime::StreamMessage;
use registry_transfer::transfer::ImagePatcher;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

const IMAGE: &str = "microfocusidolserver/content:24.4";

fn package_files(dir: &TempDir, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|name| {
            let path = dir.path().join(name);
            std::fs::write(&path, b"rpm payload").unwrap();
            path
        })
        .collect()
}

fn position(calls: &[String], prefix: &str) -> usize {
    calls
        .iter()
        .position(|c| c.starts_with(prefix))
        .unwrap_or_else(|| panic!("no call starting with '{}' in {:?}", prefix, calls))
}

#[tokio::test]
async fn test_patch_installs_packages_and_commits_fix_image() {
    let dir = TempDir::new().unwrap();
    let files = package_files(&dir, &["fix-1.rpm", "fix-2.rpm"]);
    let runtime = Arc::new(
        FakeRuntime::new(Arc::new(FakeRegistry::default())).with_image(IMAGE, "sha256:a"),
    );
    let patcher = ImagePatcher::new(runtime.clone(), Logger::new_quiet());

    let fixed = patcher
        .patch(&image_ref(IMAGE), &files, false)
        .await
        .unwrap();
    assert_eq!(fixed.to_string(), "microfocusidolserver/content:24.4_fix");

    let calls = runtime.calls();
    assert_eq!(runtime.count("pull_image"), 0);
    assert!(calls.iter().any(|c| c.contains("rpm -Uvh /tmp/fix-1.rpm")));
    assert!(calls.iter().any(|c| c.contains("rpm -Uvh /tmp/fix-2.rpm")));
    assert!(calls.iter().any(|c| c.contains("rm -f /tmp/fix-1.rpm /tmp/fix-2.rpm")));

    let create = position(&calls, "create_container patch_temp_");
    let upload = position(&calls, "upload_archive");
    let start = position(&calls, "start_container");
    let commit = position(&calls, "commit");
    let remove = position(&calls, "remove_container");
    assert!(create < upload && upload < start && start < commit && commit < remove);
    assert!(calls[commit].ends_with("microfocusidolserver/content:24.4_fix"));
}

#[tokio::test]
async fn test_patch_pulls_missing_image_first() {
    let dir = TempDir::new().unwrap();
    let files = package_files(&dir, &["fix.rpm"]);
    let runtime = Arc::new(FakeRuntime::new(Arc::new(FakeRegistry::default())));
    runtime.script_pull(vec![StreamMessage::status("Pulling from microfocusidolserver/content")]);

    let patcher = ImagePatcher::new(runtime.clone(), Logger::new_quiet());
    let err = patcher
        .patch(&image_ref(IMAGE), &files, false)
        .await
        .unwrap_err();

    // The fake pull does not materialize the image, so it stays missing
    assert_eq!(runtime.count("pull_image"), 1);
    assert!(matches!(err, TransferError::ImageNotFoundLocally(_)));
    assert_eq!(runtime.count("create_container"), 0);
}

#[tokio::test]
async fn test_patch_removes_container_when_install_fails() {
    let dir = TempDir::new().unwrap();
    let files = package_files(&dir, &["broken.rpm"]);
    let mut runtime =
        FakeRuntime::new(Arc::new(FakeRegistry::default())).with_image(IMAGE, "sha256:a");
    runtime.failing_exec = Some("broken.rpm".to_string());
    let runtime = Arc::new(runtime);

    let patcher = ImagePatcher::new(runtime.clone(), Logger::new_quiet());
    let err = patcher
        .patch(&image_ref(IMAGE), &files, false)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("broken.rpm"));
    assert_eq!(runtime.count("commit"), 0);
    assert_eq!(runtime.count("stop_container"), 1);
    assert_eq!(runtime.count("remove_container"), 1);
}

#[tokio::test]
async fn test_patch_dry_run_touches_nothing() {
    let dir = TempDir::new().unwrap();
    let files = package_files(&dir, &["fix.rpm"]);
    let runtime = Arc::new(FakeRuntime::new(Arc::new(FakeRegistry::default())));

    let patcher = ImagePatcher::new(runtime.clone(), Logger::new_quiet());
    let fixed = patcher.patch(&image_ref(IMAGE), &files, true).await.unwrap();

    assert_eq!(fixed.tag, "24.4_fix");
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn test_patch_rejects_missing_package_file() {
    let runtime = Arc::new(FakeRuntime::new(Arc::new(FakeRegistry::default())));
    let patcher = ImagePatcher::new(runtime.clone(), Logger::new_quiet());

    let err = patcher
        .patch(
            &image_ref(IMAGE),
            &[PathBuf::from("/nonexistent/fix.rpm")],
            false,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Validation(_)));
    assert!(runtime.calls().is_empty());
}
