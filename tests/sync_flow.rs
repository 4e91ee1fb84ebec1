mod common;

use common::{set_mtime, tree_contents, write_file};
use std::fs;
use std::path::Path;
use treesync_lib::core::{BrokenLinkPolicy, CompareMethod};
use treesync_lib::{SyncConfig, SyncEngine, SyncReport};

async fn sync(config: SyncConfig, src: &Path, dst: &Path) -> SyncReport {
    SyncEngine::new(config).sync(src, dst).await.unwrap()
}

fn populate(root: &Path) {
    write_file(root, "a.txt", b"0123456789");
    write_file(root, "docs/readme.md", b"# readme");
    write_file(root, "docs/deep/notes.txt", b"notes");
    fs::create_dir_all(root.join("empty")).unwrap();
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    populate(src.path());

    for method in [CompareMethod::Mtime, CompareMethod::Size, CompareMethod::Checksum] {
        let config = SyncConfig {
            method,
            ..Default::default()
        };
        sync(config.clone(), src.path(), dst.path()).await;
        let second = sync(config, src.path(), dst.path()).await;
        assert_eq!(second.stats.files_copied, 0, "{}", method);
        assert_eq!(second.stats.dirs_created, 0, "{}", method);
        assert_eq!(second.stats.files_deleted, 0, "{}", method);
        assert!(second.stats.errors.is_empty(), "{}: {:?}", method, second.stats.errors);
    }
    assert_eq!(tree_contents(src.path()), tree_contents(dst.path()));
}

#[tokio::test]
async fn test_dry_run_does_not_touch_destination() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    populate(src.path());
    write_file(dst.path(), "stale.txt", b"old");
    let before = tree_contents(dst.path());

    let report = sync(
        SyncConfig {
            dry_run: true,
            delete: true,
            ..Default::default()
        },
        src.path(),
        dst.path(),
    )
    .await;

    assert_eq!(tree_contents(dst.path()), before);
    let s = &report.stats;
    assert_eq!(s.files_to_copy, 3);
    assert_eq!(s.bytes_to_copy, 10 + 8 + 5);
    assert_eq!(s.dirs_to_create, 3);
    assert_eq!(s.files_to_delete, 1);
    assert_eq!(s.bytes_to_delete, 3);
    assert_eq!(s.files_copied + s.files_deleted + s.dirs_created, 0);
    assert!(report.render().contains("待复制文件"));
}

#[tokio::test]
async fn test_dry_run_reports_no_changes_when_in_sync() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    populate(src.path());
    sync(SyncConfig::default(), src.path(), dst.path()).await;

    let report = sync(
        SyncConfig {
            dry_run: true,
            ..Default::default()
        },
        src.path(),
        dst.path(),
    )
    .await;
    assert_eq!(report.stats.planned_operations(), 0);
    assert!(report.render().contains("无需变更"));
}

#[tokio::test]
async fn test_delete_flag_controls_stale_files() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    write_file(src.path(), "keep.txt", b"keep");
    write_file(dst.path(), "stale.txt", b"stale");

    let report = sync(SyncConfig::default(), src.path(), dst.path()).await;
    assert!(dst.path().join("stale.txt").exists());
    assert_eq!(report.stats.files_deleted, 0);

    let report = sync(
        SyncConfig {
            delete: true,
            ..Default::default()
        },
        src.path(),
        dst.path(),
    )
    .await;
    assert!(!dst.path().join("stale.txt").exists());
    assert!(dst.path().join("keep.txt").exists());
    assert_eq!(report.stats.files_deleted, 1);
    assert_eq!(report.stats.bytes_deleted, 5);
}

#[tokio::test]
async fn test_empty_directory_is_created() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    fs::create_dir(src.path().join("sub")).unwrap();

    let report = sync(SyncConfig::default(), src.path(), dst.path()).await;
    assert!(dst.path().join("sub").is_dir());
    assert_eq!(report.stats.files_copied, 0);
    assert_eq!(report.stats.dirs_created, 1);
}

#[tokio::test]
async fn test_newer_source_same_size_by_method() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let s = write_file(src.path(), "a.txt", b"new-bytes!");
    let d = write_file(dst.path(), "a.txt", b"old-bytes!");
    set_mtime(&s, 10);
    set_mtime(&d, 3600);

    let by_size = sync(
        SyncConfig {
            method: CompareMethod::Size,
            ..Default::default()
        },
        src.path(),
        dst.path(),
    )
    .await;
    assert_eq!(by_size.stats.files_copied, 0);
    assert_eq!(fs::read(&d).unwrap(), b"old-bytes!");

    let by_mtime = sync(SyncConfig::default(), src.path(), dst.path()).await;
    assert_eq!(by_mtime.stats.files_copied, 1);
    assert_eq!(fs::read(&d).unwrap(), b"new-bytes!");
    assert_eq!(
        fs::metadata(&d).unwrap().modified().unwrap(),
        fs::metadata(&s).unwrap().modified().unwrap()
    );
}

#[tokio::test]
async fn test_type_changes_are_overwritten() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    write_file(src.path(), "was_dir", b"now a file");
    write_file(src.path(), "was_file/inner.txt", b"inner");
    write_file(dst.path(), "was_dir/old.txt", b"old");
    write_file(dst.path(), "was_file", b"old file");

    let report = sync(
        SyncConfig {
            delete: true,
            ..Default::default()
        },
        src.path(),
        dst.path(),
    )
    .await;

    assert!(report.stats.errors.is_empty(), "{:?}", report.stats.errors);
    assert_eq!(tree_contents(src.path()), tree_contents(dst.path()));
}

#[tokio::test]
async fn test_non_recursive_only_top_level() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    populate(src.path());

    sync(
        SyncConfig {
            recursive: false,
            ..Default::default()
        },
        src.path(),
        dst.path(),
    )
    .await;

    assert!(dst.path().join("a.txt").is_file());
    assert!(dst.path().join("docs").is_dir());
    assert!(!dst.path().join("docs/readme.md").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_thread_count_does_not_change_outcome() {
    let src = tempfile::tempdir().unwrap();
    for i in 0..1000 {
        let rel = format!("d{:02}/f{:04}.txt", i % 40, i);
        write_file(src.path(), &rel, format!("payload {}", i).as_bytes());
    }

    let single = tempfile::tempdir().unwrap();
    let many = tempfile::tempdir().unwrap();
    let one = sync(
        SyncConfig {
            threads: 1,
            ..Default::default()
        },
        src.path(),
        single.path(),
    )
    .await;
    let eight = sync(
        SyncConfig {
            threads: 8,
            ..Default::default()
        },
        src.path(),
        many.path(),
    )
    .await;

    assert_eq!(one.stats, eight.stats);
    assert_eq!(one.stats.files_copied, 1000);
    assert_eq!(one.stats.dirs_created, 40);
    assert_eq!(tree_contents(single.path()), tree_contents(many.path()));
}

#[cfg(unix)]
#[tokio::test]
async fn test_broken_symlink_policy() {
    let src = tempfile::tempdir().unwrap();
    write_file(src.path(), "ok.txt", b"ok");
    std::os::unix::fs::symlink(src.path().join("missing"), src.path().join("dangling")).unwrap();

    let dst = tempfile::tempdir().unwrap();
    let warned = sync(SyncConfig::default(), src.path(), dst.path()).await;
    // 警告 + 复制失败
    assert_eq!(warned.stats.errors.len(), 2);
    assert_eq!(warned.stats.files_copied, 1);

    let dst = tempfile::tempdir().unwrap();
    let skipped = sync(
        SyncConfig {
            broken_links: BrokenLinkPolicy::Skip,
            ..Default::default()
        },
        src.path(),
        dst.path(),
    )
    .await;
    assert!(skipped.stats.errors.is_empty());
    assert_eq!(skipped.stats.files_copied, 1);
}
