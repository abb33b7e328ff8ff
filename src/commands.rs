//! Commands Module
//! Front-end facing operations. Everything here reports failures as readable status strings
//! so the caller can show them and carry on.

use crate::audio::{AudioBackend, CpalBackend};
use crate::config::AppConfig;
use crate::database::{Catalog, Track};
use crate::downloader::{DownloadPipeline, MediaInfo};
use crate::error::{Error, Result};
use crate::extractor::{MediaSource, YtDlpSource};
use crate::ffmpeg::{FfmpegTranscoder, Transcoder};
use crate::library::LibraryScanner;
use crate::player::{PlaybackEngine, PlayerState};
use crate::queue::{LoopMode, QueueEntry, QueueManager};
use crate::share::{self, ShareTrack, SharedFile};
use crossbeam_channel::{unbounded, Receiver};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// "m:ss", or "h:mm:ss" from one hour up
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

/// Title to show for a file that is not in the catalog
fn title_from_path(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
        .replace('_', " ")
}

// Library Commands

pub fn list_tracks(catalog: &Catalog) -> std::result::Result<Vec<Track>, String> {
    catalog.list_all().map_err(|e| e.to_string())
}

pub fn delete_track(catalog: &Catalog, id: i64) -> std::result::Result<String, String> {
    match catalog.delete(id) {
        Ok(true) => Ok(format!("Deleted track {}.", id)),
        Ok(false) => Ok(format!("No track with id {}.", id)),
        Err(e) => Err(e.to_string()),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub imported: usize,
    pub pruned: usize,
}

/// Catalog audio files found in `downloads_dir` and forget rows whose file is gone
pub fn sync_library(catalog: &Catalog, downloads_dir: &Path) -> std::result::Result<SyncReport, String> {
    let pruned = catalog.prune_missing().map_err(|e| e.to_string())?;

    let mut imported = 0;
    for found in LibraryScanner::new().scan_folder(downloads_dir) {
        let file_path = found.file_path.to_string_lossy();
        if catalog.contains_path(&file_path).map_err(|e| e.to_string())? {
            continue;
        }
        let thumbnail = found
            .thumbnail
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        match catalog.add(&found.title, &file_path, &thumbnail, found.duration) {
            Ok(_) => imported += 1,
            Err(e) => log::warn!("Could not import {}: {}", file_path, e),
        }
    }

    log::info!("Library sync: {} imported, {} pruned", imported, pruned);
    Ok(SyncReport { imported, pruned })
}

// Download Commands

/// Clears the busy flag when a download call ends
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Download pipeline plus the catalog it records into. Runs one download at a time.
pub struct Downloads<S, T> {
    catalog: Catalog,
    pipeline: DownloadPipeline<S, T>,
    busy: AtomicBool,
}

impl Downloads<YtDlpSource, FfmpegTranscoder> {
    /// Fails with a configuration error if yt-dlp or ffmpeg cannot be found
    pub fn from_config(config: &AppConfig, catalog: Catalog) -> Result<Self> {
        let source = YtDlpSource::locate(config.ytdlp_path.as_deref())?;
        let transcoder =
            FfmpegTranscoder::locate(config.ffmpeg_path.as_deref(), &config.audio_bitrate)?;
        let pipeline = DownloadPipeline::new(&config.downloads_dir, source, transcoder)?
            .with_thumbnails(config.save_thumbnails);
        Ok(Self::new(catalog, pipeline))
    }
}

impl<S: MediaSource, T: Transcoder> Downloads<S, T> {
    /// Paths already in the catalog are never reused for new downloads, even when their file
    /// has been deleted
    pub fn new(catalog: Catalog, pipeline: DownloadPipeline<S, T>) -> Self {
        let known = catalog.clone();
        let pipeline = pipeline.with_reserved_paths(move |path| {
            known
                .contains_path(&path.to_string_lossy())
                .unwrap_or_else(|e| {
                    log::warn!("Catalog lookup for {:?} failed: {}", path, e);
                    false
                })
        });
        Self {
            catalog,
            pipeline,
            busy: AtomicBool::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) -> bool {
        self.pipeline.cancel()
    }

    pub async fn get_info(&self, url: &str) -> std::result::Result<MediaInfo, String> {
        self.pipeline.get_info(url).await.map_err(|e| e.to_string())
    }

    /// Download `url`, convert it and add it to the catalog under `custom_title` (or the
    /// remote title when none is given). A second call while one runs is rejected.
    pub async fn download_and_record<F>(
        &self,
        url: &str,
        custom_title: Option<&str>,
        on_progress: F,
    ) -> std::result::Result<Track, String>
    where
        F: Fn(f64) + Send + Sync,
    {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Busy.to_string());
        }
        let _busy = BusyGuard(&self.busy);

        let outcome = self
            .pipeline
            .download(url, on_progress)
            .await
            .map_err(|e| e.to_string())?;

        let title = custom_title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(outcome.info.title.as_str());
        let file_path = outcome.file_path.to_string_lossy();

        let id = self
            .catalog
            .add(
                title,
                &file_path,
                &outcome.thumbnail_ref(),
                outcome.info.duration as i64,
            )
            .map_err(|e| e.to_string())?;

        self.catalog
            .get(id)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Track {} vanished after saving", id))
    }
}

// Playback Commands

/// What the engine reported, forwarded to the thread that owns the session
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerEvent {
    Duration(f64),
    Position(f64),
    /// A track played to its end. Carries the play generation it belongs to.
    Finished(u64),
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaybackStatus {
    pub state: PlayerState,
    pub current_track: Option<String>,
    pub position: f64,
    pub duration: f64,
    pub volume: f32,
    pub loop_mode: LoopMode,
}

/// A queue row ready for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueRow {
    pub index: usize,
    pub title: String,
    pub is_current: bool,
}

/// Engine, queue and catalog wired together. Engine callbacks arrive as [`PlayerEvent`]s on
/// [`events`](Self::events); the owner feeds them back through
/// [`handle_event`](Self::handle_event), which is where the queue advances.
pub struct PlayerSession<B: AudioBackend> {
    catalog: Catalog,
    engine: PlaybackEngine<B>,
    queue: Mutex<QueueManager>,
    events: Receiver<PlayerEvent>,
    /// Bumped on every start and stop, so a queued `Finished` from an earlier play is ignored
    generation: Arc<AtomicU64>,
    active: AtomicBool,
}

impl PlayerSession<CpalBackend> {
    pub fn from_config(config: &AppConfig, catalog: Catalog) -> Result<Self> {
        let engine = PlaybackEngine::new(CpalBackend::new()?, config.poll_interval());
        Ok(Self::new(catalog, engine))
    }
}

impl<B: AudioBackend> PlayerSession<B> {
    pub fn new(catalog: Catalog, engine: PlaybackEngine<B>) -> Self {
        let (tx, events) = unbounded();

        let sender = tx.clone();
        engine.set_duration_callback(move |d| {
            let _ = sender.send(PlayerEvent::Duration(d));
        });
        let sender = tx.clone();
        engine.set_position_callback(move |p| {
            let _ = sender.send(PlayerEvent::Position(p));
        });
        let generation = Arc::new(AtomicU64::new(0));
        let current = Arc::clone(&generation);
        engine.set_completion_callback(move || {
            let _ = tx.send(PlayerEvent::Finished(current.load(Ordering::SeqCst)));
        });

        Self {
            catalog,
            engine,
            queue: Mutex::new(QueueManager::new()),
            events,
            generation,
            active: AtomicBool::new(false),
        }
    }

    pub fn events(&self) -> &Receiver<PlayerEvent> {
        &self.events
    }

    fn title_for(&self, file_path: &str) -> String {
        match self.catalog.get_by_path(file_path) {
            Ok(Some(track)) => track.title,
            _ => title_from_path(file_path),
        }
    }

    fn start(&self, entry: &QueueEntry) -> std::result::Result<String, String> {
        let title = self.title_for(&entry.file_path);
        // The old monitor is joined before the generation moves on
        self.engine.stop();
        self.generation.fetch_add(1, Ordering::SeqCst);

        match self.engine.play(Path::new(&entry.file_path)) {
            Ok(()) => {
                self.active.store(true, Ordering::SeqCst);
                Ok(format!("Now playing: {}", title))
            }
            Err(e) => {
                self.active.store(false, Ordering::SeqCst);
                Err(format!("Cannot play {}: {}", title, e))
            }
        }
    }

    /// True while a track is loaded or a finished track still has to be followed by the next
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Replace the queue with the given catalog ids (all tracks when empty) and start the first
    pub fn play_selected(&self, ids: &[i64]) -> std::result::Result<String, String> {
        let tracks = if ids.is_empty() {
            self.catalog.list_all().map_err(|e| e.to_string())?
        } else {
            ids.iter()
                .map(|&id| {
                    self.catalog
                        .get(id)
                        .map_err(|e| e.to_string())?
                        .ok_or_else(|| format!("No track with id {}.", id))
                })
                .collect::<std::result::Result<Vec<_>, String>>()?
        };

        if tracks.is_empty() {
            return Err("No tracks to play.".to_string());
        }
        self.play_entries(tracks.iter().map(QueueEntry::from).collect())
    }

    /// Replace the queue with `entries` and start the first
    pub fn play_entries(&self, entries: Vec<QueueEntry>) -> std::result::Result<String, String> {
        let first = {
            let mut queue = self.queue.lock();
            queue.clear();
            queue.add_songs(entries);
            queue.current().cloned()
        };
        match first {
            Some(entry) => self.start(&entry),
            None => Err("No tracks to play.".to_string()),
        }
    }

    pub fn enqueue(&self, entries: Vec<QueueEntry>) -> usize {
        let mut queue = self.queue.lock();
        queue.add_songs(entries);
        queue.len()
    }

    pub fn next_track(&self) -> std::result::Result<String, String> {
        let next = self.queue.lock().next().cloned();
        match next {
            Some(entry) => self.start(&entry),
            None => {
                self.stop();
                Ok("End of queue.".to_string())
            }
        }
    }

    pub fn previous_track(&self) -> std::result::Result<String, String> {
        let previous = self.queue.lock().previous().cloned();
        match previous {
            Some(entry) => self.start(&entry),
            None => Ok("Already at the first track.".to_string()),
        }
    }

    pub fn toggle_loop(&self) -> LoopMode {
        self.queue.lock().cycle_loop_mode()
    }

    pub fn set_loop_mode(&self, mode: LoopMode) {
        self.queue.lock().set_loop_mode(mode);
    }

    pub fn pause(&self) {
        self.engine.pause();
    }

    pub fn resume(&self) {
        self.engine.resume();
    }

    pub fn stop(&self) {
        self.engine.stop();
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn seek(&self, seconds: f64) -> std::result::Result<(), String> {
        self.engine.seek(seconds).map_err(|e| e.to_string())
    }

    pub fn set_volume(&self, volume: f32) {
        self.engine.set_volume(volume);
    }

    /// React to an engine event. Returns a status line when there is something to show.
    /// A `Finished` left over from before the latest start or stop is dropped.
    pub fn handle_event(&self, event: PlayerEvent) -> Option<std::result::Result<String, String>> {
        match event {
            PlayerEvent::Finished(generation)
                if generation == self.generation.load(Ordering::SeqCst) =>
            {
                Some(self.next_track())
            }
            PlayerEvent::Finished(generation) => {
                log::debug!("Ignoring completion from play generation {}", generation);
                None
            }
            PlayerEvent::Duration(_) | PlayerEvent::Position(_) => None,
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        PlaybackStatus {
            state: self.engine.state(),
            current_track: self
                .engine
                .current_file()
                .map(|p| self.title_for(&p.to_string_lossy())),
            position: self.engine.position(),
            duration: self.engine.duration(),
            volume: self.engine.volume(),
            loop_mode: self.queue.lock().loop_mode(),
        }
    }

    pub fn queue_rows(&self) -> Vec<QueueRow> {
        let entries: Vec<(usize, String, bool)> = self
            .queue
            .lock()
            .all_with_status()
            .into_iter()
            .map(|item| (item.index, item.entry.file_path.clone(), item.is_current))
            .collect();

        entries
            .into_iter()
            .map(|(index, file_path, is_current)| QueueRow {
                index,
                title: self.title_for(&file_path),
                is_current,
            })
            .collect()
    }

    /// Publish the queue to `share_dir` for the phone share page
    pub fn share_queue(&self, share_dir: &Path) -> std::result::Result<Vec<SharedFile>, String> {
        let tracks: Vec<ShareTrack> = self
            .queue
            .lock()
            .all_with_status()
            .iter()
            .map(ShareTrack::from)
            .collect();
        if tracks.is_empty() {
            return Err("No songs found in the playlist.".to_string());
        }
        share::prepare_share_dir(share_dir, &tracks).map_err(|e| e.to_string())
    }
}

/// Publish catalog tracks (all when `ids` is empty) without a player
pub fn share_tracks(
    catalog: &Catalog,
    ids: &[i64],
    share_dir: &Path,
) -> std::result::Result<Vec<SharedFile>, String> {
    let tracks = if ids.is_empty() {
        catalog.list_all().map_err(|e| e.to_string())?
    } else {
        let mut tracks = Vec::new();
        for &id in ids {
            match catalog.get(id).map_err(|e| e.to_string())? {
                Some(track) => tracks.push(track),
                None => return Err(format!("No track with id {}.", id)),
            }
        }
        tracks
    };

    let share_tracks: Vec<ShareTrack> = tracks
        .iter()
        .map(|track| ShareTrack {
            file_path: PathBuf::from(&track.file_path),
            thumbnail: track.thumbnail.clone(),
            is_current: false,
        })
        .collect();
    if share_tracks.is_empty() {
        return Err("No songs found in the playlist.".to_string());
    }
    share::prepare_share_dir(share_dir, &share_tracks).map_err(|e| e.to_string())
}
