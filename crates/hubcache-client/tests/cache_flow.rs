//! End-to-end flows over a seeded temp cache, no network.

use std::path::{Path, PathBuf};

use hubcache_cache::{local_download_paths, write_sidecar, RepoCache};
use hubcache_client::{
    CacheLookup, DownloadRequest, HubClient, HubConfig, HubError, RepoId, SnapshotRequest,
    TokenPolicy,
};

const COMMIT: &str = "deadbeefdeadbeefdeadbeefdeadbeefdeadbeef";

fn offline_client(cache: &Path) -> HubClient {
    let config = HubConfig {
        hub_cache: cache.to_path_buf(),
        offline: true,
        ..HubConfig::default()
    };
    HubClient::with_config(config, TokenPolicy::Disabled).unwrap()
}

fn seed_file(cache_root: &Path, repo: &RepoId, commit: &str, filename: &str, body: &[u8]) -> PathBuf {
    let cache = RepoCache::new(cache_root, repo);
    let blob = cache.blob_path(&format!("etag-{filename}"));
    std::fs::create_dir_all(blob.parent().unwrap()).unwrap();
    std::fs::write(&blob, body).unwrap();
    let pointer = cache.pointer_path(commit, filename).unwrap();
    cache
        .materialize_pointer(&blob, &pointer, false, false)
        .unwrap();
    pointer
}

#[tokio::test]
async fn cached_file_resolves_offline_by_hash_and_by_ref() {
    let dir = tempfile::tempdir().unwrap();
    let repo = RepoId::model("org/repo");
    let pointer = seed_file(dir.path(), &repo, COMMIT, "README.md", b"# readme");
    RepoCache::new(dir.path(), &repo)
        .update_ref("main", COMMIT)
        .unwrap();

    let client = offline_client(dir.path());

    let by_hash = client
        .download_file(&DownloadRequest::new(repo.clone(), "README.md").revision(COMMIT))
        .await
        .unwrap();
    assert_eq!(by_hash, pointer);

    let by_ref = client
        .download_file(&DownloadRequest::new(repo.clone(), "README.md"))
        .await
        .unwrap();
    assert_eq!(by_ref, pointer);
    assert_eq!(std::fs::read(&by_ref).unwrap(), b"# readme");

    // Pure-cache lookup agrees.
    assert_eq!(
        client
            .try_load_from_cache(&repo, "README.md", Some("main"))
            .unwrap(),
        CacheLookup::Found(pointer)
    );
}

#[tokio::test]
async fn pointer_content_matches_blob_through_symlink_or_copy() {
    let dir = tempfile::tempdir().unwrap();
    let repo = RepoId::model("org/repo");
    let pointer = seed_file(dir.path(), &repo, COMMIT, "weights.bin", &[7u8; 4096]);
    assert_eq!(std::fs::read(&pointer).unwrap(), vec![7u8; 4096]);
}

#[tokio::test]
async fn unknown_repo_offline_is_a_clean_error() {
    let dir = tempfile::tempdir().unwrap();
    let client = offline_client(dir.path());
    let err = client
        .download_file(&DownloadRequest::new(
            RepoId::model("nobody/nothing"),
            "missing.txt",
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::OfflineModeEnabled(_)));
}

#[tokio::test]
async fn snapshot_resolves_offline_from_refs() {
    let dir = tempfile::tempdir().unwrap();
    let repo = RepoId::model("org/repo");
    seed_file(dir.path(), &repo, COMMIT, "a.txt", b"a");
    seed_file(dir.path(), &repo, COMMIT, "b.bin", b"b");
    let cache = RepoCache::new(dir.path(), &repo);
    cache.update_ref("main", COMMIT).unwrap();

    let client = offline_client(dir.path());
    let folder = client
        .download_snapshot(&SnapshotRequest::new(repo))
        .await
        .unwrap();
    assert_eq!(folder, cache.snapshot_path(COMMIT));

    let mut entries: Vec<_> = std::fs::read_dir(&folder)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    entries.sort();
    assert_eq!(entries, vec!["a.txt", "b.bin"]);
}

#[tokio::test]
async fn snapshot_offline_without_ref_errors() {
    let dir = tempfile::tempdir().unwrap();
    let client = offline_client(dir.path());
    let err = client
        .download_snapshot(&SnapshotRequest::new(RepoId::model("org/empty")))
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::OfflineModeEnabled(_)));
}

#[tokio::test]
async fn dataset_and_model_caches_do_not_collide() {
    let dir = tempfile::tempdir().unwrap();
    let model = RepoId::model("org/name");
    let dataset = RepoId::dataset("org/name");
    seed_file(dir.path(), &model, COMMIT, "f.txt", b"model");
    seed_file(dir.path(), &dataset, COMMIT, "f.txt", b"dataset");

    let client = offline_client(dir.path());
    let model_path = client
        .download_file(&DownloadRequest::new(model, "f.txt").revision(COMMIT))
        .await
        .unwrap();
    let dataset_path = client
        .download_file(&DownloadRequest::new(dataset, "f.txt").revision(COMMIT))
        .await
        .unwrap();
    assert_ne!(model_path, dataset_path);
    assert_eq!(std::fs::read(model_path).unwrap(), b"model");
    assert_eq!(std::fs::read(dataset_path).unwrap(), b"dataset");
}

#[tokio::test]
async fn nested_filenames_materialize_under_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let repo = RepoId::model("org/repo");
    let pointer = seed_file(dir.path(), &repo, COMMIT, "onnx/sub/model.onnx", b"onnx");

    let client = offline_client(dir.path());
    let path = client
        .download_file(&DownloadRequest::new(repo, "onnx/sub/model.onnx").revision(COMMIT))
        .await
        .unwrap();
    assert_eq!(path, pointer);
    assert!(path.ends_with(
        PathBuf::from("snapshots")
            .join(COMMIT)
            .join("onnx")
            .join("sub")
            .join("model.onnx")
    ));
}

#[tokio::test]
async fn traversal_filenames_are_rejected_before_io() {
    let dir = tempfile::tempdir().unwrap();
    let client = offline_client(dir.path());
    let err = client
        .download_file(
            &DownloadRequest::new(RepoId::model("org/repo"), "../escape.txt").revision(COMMIT),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::InvalidPath { .. }));
}

#[tokio::test]
async fn mirror_short_circuits_on_pinned_sidecar() {
    let cache_dir = tempfile::tempdir().unwrap();
    let mirror_dir = tempfile::tempdir().unwrap();
    let repo = RepoId::model("org/repo");

    let paths = local_download_paths(mirror_dir.path(), "weights.bin").unwrap();
    std::fs::write(&paths.file_path, b"pinned").unwrap();
    write_sidecar(&paths, COMMIT, "etag-w").unwrap();

    let client = offline_client(cache_dir.path());
    let path = client
        .download_file(
            &DownloadRequest::new(repo, "weights.bin")
                .revision(COMMIT)
                .local_dir(mirror_dir.path()),
        )
        .await
        .unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"pinned");
}

#[tokio::test]
async fn no_exist_marker_survives_as_cached_absence() {
    let dir = tempfile::tempdir().unwrap();
    let repo = RepoId::model("org/repo");
    let cache = RepoCache::new(dir.path(), &repo);
    cache.update_ref("main", COMMIT).unwrap();
    cache.mark_no_exist(COMMIT, "tokenizer.json").unwrap();

    let client = offline_client(dir.path());
    assert_eq!(
        client
            .try_load_from_cache(&repo, "tokenizer.json", None)
            .unwrap(),
        CacheLookup::CachedAbsent
    );
    let err = client
        .download_file(&DownloadRequest::new(repo, "tokenizer.json"))
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::EntryNotFound(_)));
}
