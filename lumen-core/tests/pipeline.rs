mod support;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use lumen_core::database::Catalog;
use lumen_core::scan::hashing::digest;
use lumen_core::scan::{MediaContext, ScanEvent, ScanStage};
use lumen_core::{Result, ScanError};
use lumen_model::{MediaPurpose, MediaUrl, NewMediaUrl};
use parking_lot::Mutex;
use support::{Harness, media_paths};

fn paths(items: &[&str]) -> Vec<PathBuf> {
    items.iter().map(PathBuf::from).collect()
}

/// Records every media it processes and fails on files named `bad.*`.
#[derive(Default)]
struct Recorder {
    processed: Mutex<Vec<String>>,
}

#[async_trait]
impl ScanStage for Recorder {
    fn name(&self) -> &'static str {
        "recorder"
    }

    async fn process_media(&self, ctx: &mut MediaContext<'_>) -> Result<Vec<MediaUrl>> {
        if ctx.media.title.starts_with("bad.") {
            return Err(ScanError::Internal("cannot process".into()));
        }
        self.processed.lock().push(ctx.media.title.clone());
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn rescanning_does_not_duplicate_media() {
    let h = Harness::new();
    h.fs.add_file("/lib/a/x.jpg", 10);
    h.fs.add_file("/lib/a/y.mov", 10);
    h.fs.add_file("/lib/a/notes.txt", 10);
    let user = h.add_user("alice", &["/lib"]).await;
    let pipeline = h.pipeline(h.light_stages());

    let first = h.scan(&pipeline, &user).await;
    let new: usize = first.iter().map(|r| r.new).sum();
    assert_eq!(new, 2);

    let second = h.scan(&pipeline, &user).await;
    let new: usize = second.iter().map(|r| r.new).sum();
    assert_eq!(new, 0);

    let dump = h.dump().await;
    assert_eq!(media_paths(&dump), paths(&["/lib/a/x.jpg", "/lib/a/y.mov"]));
}

#[tokio::test]
async fn deleted_files_are_removed_from_the_catalog() {
    let h = Harness::new();
    h.fs.add_file("/lib/a.jpg", 10);
    h.fs.add_file("/lib/b.jpg", 10);
    h.fs.add_file("/lib/c.jpg", 10);
    let user = h.add_user("alice", &["/lib"]).await;
    let pipeline = h.pipeline(h.light_stages());
    h.scan(&pipeline, &user).await;

    let dump = h.dump().await;
    let b = dump
        .media
        .values()
        .find(|m| m.title == "b.jpg")
        .expect("media b")
        .clone();
    let b_cache = h.services.media_cache_dir(b.album_id, b.id);
    std::fs::create_dir_all(&b_cache).expect("seed cache");

    h.fs.remove("/lib/b.jpg");
    h.scan(&pipeline, &user).await;

    assert_eq!(
        media_paths(&h.dump().await),
        paths(&["/lib/a.jpg", "/lib/c.jpg"])
    );
    assert!(!b_cache.exists());
}

#[tokio::test]
async fn a_failing_file_does_not_stop_the_album() {
    let h = Harness::new();
    h.fs.add_file("/lib/a.jpg", 10);
    h.fs.add_file("/lib/bad.jpg", 10);
    h.fs.add_file("/lib/c.jpg", 10);
    let user = h.add_user("alice", &["/lib"]).await;
    let recorder = Arc::new(Recorder::default());
    let mut stages = h.light_stages();
    stages.insert(0, recorder.clone());
    let pipeline = h.pipeline(stages);

    let reports = h.scan(&pipeline, &user).await;

    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.found, 3);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, Path::new("/lib/bad.jpg"));
    assert!(matches!(
        report.failures[0].error,
        ScanError::Stage { stage: "recorder", .. }
    ));
    assert_eq!(*recorder.processed.lock(), vec!["a.jpg", "c.jpg"]);
    // Registered, so cleanup keeps it.
    assert_eq!(h.dump().await.media.len(), 3);
}

#[tokio::test]
async fn ignore_files_skip_matching_media() {
    let h = Harness::new();
    h.fs.add_file_with_contents("/lib/.lumenignore", "*.png\n!keep.png\n");
    h.fs.add_file("/lib/a/x.jpg", 10);
    h.fs.add_file("/lib/a/y.png", 10);
    h.fs.add_file("/lib/a/keep.png", 10);
    let user = h.add_user("alice", &["/lib"]).await;
    let pipeline = h.pipeline(h.light_stages());

    h.scan(&pipeline, &user).await;

    assert_eq!(
        media_paths(&h.dump().await),
        paths(&["/lib/a/keep.png", "/lib/a/x.jpg"])
    );
}

#[tokio::test]
async fn changed_sidecar_invalidates_artifacts() {
    let h = Harness::new();
    h.fs.add_file("/lib/x.nef", 10);
    h.fs.add_file_with_contents("/lib/x.xmp", "rating=1");
    let user = h.add_user("alice", &["/lib"]).await;
    let pipeline = h.pipeline(h.light_stages());

    h.scan(&pipeline, &user).await;
    let media = h
        .dump()
        .await
        .media
        .values()
        .next()
        .expect("media")
        .clone();
    assert_eq!(media.sidecar_hash.as_deref(), Some(digest(b"rating=1").as_str()));

    {
        let mut tx = h.catalog.begin().await.expect("begin");
        tx.upsert_media_url(NewMediaUrl {
            media_id: media.id,
            purpose: MediaPurpose::Thumbnail,
            media_name: "thumbnail.jpg".into(),
            width: 10,
            height: 10,
            content_type: "image/jpeg".into(),
            file_size: 1,
        })
        .await
        .expect("url");
        tx.commit().await.expect("commit");
    }

    // Unchanged sidecar keeps artifacts.
    h.scan(&pipeline, &user).await;
    assert_eq!(h.dump().await.media_urls.len(), 1);

    h.fs.add_file_with_contents("/lib/x.xmp", "rating=5");
    h.scan(&pipeline, &user).await;

    let dump = h.dump().await;
    assert!(dump.media_urls.is_empty());
    assert_eq!(
        dump.media[&media.id].sidecar_hash.as_deref(),
        Some(digest(b"rating=5").as_str())
    );
}

#[tokio::test]
async fn album_scans_publish_their_outcome() {
    let h = Harness::new();
    h.fs.add_file("/lib/a.jpg", 10);
    let user = h.add_user("alice", &["/lib"]).await;
    let pipeline = h.pipeline(h.light_stages());
    let mut events = h.events.subscribe();

    h.scan(&pipeline, &user).await;

    let mut scanned = Vec::new();
    while let Ok(notification) = events.try_recv() {
        if let ScanEvent::AlbumScanned { found, failed, .. } = notification.event {
            scanned.push((found, failed));
        }
    }
    assert_eq!(scanned, vec![(1, 0)]);
}

#[tokio::test]
async fn missing_album_directory_fails_the_job() {
    let h = Harness::new();
    h.fs.add_file("/lib/a/x.jpg", 10);
    let user = h.add_user("alice", &["/lib"]).await;
    let pipeline = h.pipeline(h.light_stages());
    let (report, cache) = h.discover(&user).await;

    h.fs.remove("/lib/a");
    let job = report
        .jobs(&cache)
        .into_iter()
        .find(|job| job.album.path == Path::new("/lib/a"))
        .expect("job");
    let err = pipeline.scan_album(&job).await.expect_err("album is gone");
    assert!(err.is_not_found());
}
