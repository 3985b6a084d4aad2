//! End-to-end command dispatch against a temporary image layout.

use bale_cli::commands::{dispatch, Cli};
use bale_core::BaleConfig;
use bale_runtime::oci::media_types;
use bale_runtime::{put_blob_with, put_json, DirEngine, Engine, Manifest};
use clap::Parser;
use tempfile::TempDir;

fn layer_bytes() -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    let content = b"hello from bale\n";
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "etc/greeting", &content[..])
        .unwrap();
    builder.into_inner().unwrap()
}

async fn layout(temp: &TempDir) -> DirEngine {
    let engine = DirEngine::create(temp.path().join("image")).unwrap();
    let config = put_json(
        &engine,
        media_types::IMAGE_CONFIG,
        &serde_json::json!({
            "architecture": "amd64",
            "os": "linux",
            "config": {"Cmd": ["/bin/true"]},
            "rootfs": {"type": "layers", "diff_ids": []}
        }),
    )
    .await
    .unwrap();
    let layer = put_blob_with(&engine, media_types::IMAGE_LAYER, &layer_bytes())
        .await
        .unwrap();
    let manifest = put_json(
        &engine,
        media_types::IMAGE_MANIFEST,
        &Manifest::new(config, vec![layer]),
    )
    .await
    .unwrap();
    engine.put_reference("v1", &manifest).await.unwrap();
    engine.put_blob(b"orphan").await.unwrap();
    engine
}

async fn run(args: &[&str]) -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = vec!["bale"];
    argv.extend_from_slice(args);
    dispatch(Cli::parse_from(argv), BaleConfig::default()).await
}

#[tokio::test]
async fn test_gc_command() {
    let temp = TempDir::new().unwrap();
    let engine = layout(&temp).await;
    let path = engine.root_dir().to_str().unwrap().to_string();

    run(&["gc", "--layout", &path, "--dry-run"]).await.unwrap();
    assert_eq!(engine.list_blobs().await.unwrap().len(), 4);

    run(&["gc", "--layout", &path]).await.unwrap();
    assert_eq!(engine.list_blobs().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_gc_rejects_non_layout() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().to_str().unwrap().to_string();

    let err = run(&["gc", "--layout", &path]).await.unwrap_err();
    assert!(err.to_string().contains("oci-layout"));
}

#[tokio::test]
async fn test_unpack_command() {
    let temp = TempDir::new().unwrap();
    let engine = layout(&temp).await;
    let image = format!("{}:v1", engine.root_dir().display());
    let bundle = temp.path().join("bundle");
    let bundle_arg = bundle.to_str().unwrap().to_string();

    run(&["unpack", "--rootless", "--image", &image, &bundle_arg])
        .await
        .unwrap();

    assert_eq!(
        std::fs::read_to_string(bundle.join("rootfs/etc/greeting")).unwrap(),
        "hello from bale\n"
    );
    assert!(bundle.join("config.json").is_file());
    assert!(bundle.join("bale.json").is_file());
}

#[tokio::test]
async fn test_unpack_missing_tag() {
    let temp = TempDir::new().unwrap();
    let engine = layout(&temp).await;
    let image = engine.root_dir().display().to_string();
    let bundle = temp.path().join("bundle").display().to_string();

    // Defaults to "latest", which this layout does not have.
    let err = run(&["unpack", "--rootless", "--image", &image, &bundle])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("latest"));
}

#[tokio::test]
async fn test_refs_command() {
    let temp = TempDir::new().unwrap();
    let engine = layout(&temp).await;
    let path = engine.root_dir().to_str().unwrap().to_string();

    run(&["refs", "--layout", &path]).await.unwrap();
    run(&["refs", "--layout", &path, "-q"]).await.unwrap();
}
