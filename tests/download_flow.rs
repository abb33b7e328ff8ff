//! Download, record and sync against a scratch catalog

mod common;

use common::{CopyTranscoder, FakeSource};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;
use tubeplayer_lib::commands::{self, Downloads};
use tubeplayer_lib::downloader::DownloadPipeline;
use tubeplayer_lib::Catalog;

fn downloads(dir: &TempDir, title: &str) -> Downloads<FakeSource, CopyTranscoder> {
    let catalog = Catalog::new(&dir.path().join("songs.db")).unwrap();
    let pipeline = DownloadPipeline::new(
        &dir.path().join("music"),
        FakeSource::new(title),
        CopyTranscoder,
    )
    .unwrap();
    Downloads::new(catalog, pipeline)
}

#[tokio::test]
async fn download_is_catalogued() {
    let dir = TempDir::new().unwrap();
    let downloads = downloads(&dir, "Artist - Song (Official Audio)");

    let track = downloads
        .download_and_record("https://video.example/1", None, |_| {})
        .await
        .unwrap();

    assert_eq!(track.title, "Artist - Song (Official Audio)");
    assert_eq!(track.duration, 200);
    assert_eq!(track.thumbnail, "https://img.example/cover.jpg");
    assert!(track.file_path.ends_with("Artist_Song_Official_Audio.mp3"));
    assert!(fs::metadata(&track.file_path).is_ok());
    assert!(!downloads.is_busy());
}

#[tokio::test]
async fn custom_title_overrides_remote_title() {
    let dir = TempDir::new().unwrap();
    let downloads = downloads(&dir, "Remote Title");

    let track = downloads
        .download_and_record("u", Some("  My Name  "), |_| {})
        .await
        .unwrap();
    assert_eq!(track.title, "My Name");

    let blank = downloads
        .download_and_record("u", Some("   "), |_| {})
        .await
        .unwrap();
    assert_eq!(blank.title, "Remote Title");
    assert!(blank.file_path.ends_with("Remote_Title_1.mp3"));
}

#[tokio::test]
async fn redownload_after_manual_delete_gets_a_fresh_name() {
    let dir = TempDir::new().unwrap();
    let downloads = downloads(&dir, "Lost Song");

    let first = downloads
        .download_and_record("u", None, |_| {})
        .await
        .unwrap();
    fs::remove_file(&first.file_path).unwrap();

    let second = downloads
        .download_and_record("u", None, |_| {})
        .await
        .unwrap();
    assert_ne!(second.id, first.id);
    assert!(second.file_path.ends_with("Lost_Song_1.mp3"));
    assert!(fs::metadata(&second.file_path).is_ok());
}

#[tokio::test]
async fn second_download_is_rejected_while_one_runs() {
    let dir = TempDir::new().unwrap();
    let downloads = downloads(&dir, "Song");

    let (first, second) = tokio::join!(
        downloads.download_and_record("u1", None, |_| {}),
        downloads.download_and_record("u2", None, |_| {}),
    );

    assert!(first.is_ok());
    assert_eq!(second.unwrap_err(), "A download is already in progress");

    // Free again afterwards
    assert!(downloads
        .download_and_record("u3", None, |_| {})
        .await
        .is_ok());
}

#[tokio::test]
async fn cancelled_download_leaves_nothing_behind() {
    let dir = TempDir::new().unwrap();
    let downloads = downloads(&dir, "Cancel Me");
    let cancelled = AtomicBool::new(false);

    let result = downloads
        .download_and_record("u", None, |percent| {
            if percent >= 50.0 && !cancelled.swap(true, Ordering::SeqCst) {
                downloads.cancel();
            }
        })
        .await;

    assert_eq!(result.unwrap_err(), "Download cancelled");
    let leftovers: Vec<_> = fs::read_dir(dir.path().join("music")).unwrap().collect();
    assert!(leftovers.is_empty());

    let catalog = Catalog::new(&dir.path().join("songs.db")).unwrap();
    assert!(commands::list_tracks(&catalog).unwrap().is_empty());
}

#[tokio::test]
async fn bad_url_is_reported() {
    let dir = TempDir::new().unwrap();
    let downloads = downloads(&dir, "x");

    let err = downloads
        .download_and_record("bad:url", None, |_| {})
        .await
        .unwrap_err();
    assert!(err.contains("unsupported URL"));
    assert!(downloads.get_info("bad:url").await.is_err());
    assert_eq!(downloads.get_info("ok").await.unwrap().sanitized_title, "x");
}

#[test]
fn sync_imports_and_prunes() {
    let dir = TempDir::new().unwrap();
    let music = dir.path().join("music");
    fs::create_dir_all(&music).unwrap();
    fs::write(music.join("Found_Track.mp3"), b"x").unwrap();
    fs::write(music.join("Found_Track.png"), b"png").unwrap();

    let catalog = Catalog::new(&dir.path().join("songs.db")).unwrap();
    catalog.add("Gone", "/nowhere/gone.mp3", "", 10).unwrap();

    let report = commands::sync_library(&catalog, &music).unwrap();
    assert_eq!(report.imported, 1);
    assert_eq!(report.pruned, 1);

    let tracks = commands::list_tracks(&catalog).unwrap();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].title, "Found Track");
    assert!(tracks[0].thumbnail.ends_with("Found_Track.png"));

    // Nothing new the second time
    let again = commands::sync_library(&catalog, &music).unwrap();
    assert_eq!(again, commands::SyncReport::default());
}

#[test]
fn delete_reports_unknown_ids() {
    let dir = TempDir::new().unwrap();
    let catalog = Catalog::new(&dir.path().join("songs.db")).unwrap();
    let id = catalog.add("A", "/m/a.mp3", "", 1).unwrap();

    assert_eq!(
        commands::delete_track(&catalog, id).unwrap(),
        format!("Deleted track {}.", id)
    );
    assert_eq!(
        commands::delete_track(&catalog, id).unwrap(),
        format!("No track with id {}.", id)
    );
}
