//! Downloader Module
//! Fetch-and-transcode pipeline: URL -> metadata -> media transfer -> audio file

use crate::error::{Error, Result};
use crate::extractor::{MediaSource, RemoteMedia};
use crate::ffmpeg::Transcoder;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const MAX_TITLE_LEN: usize = 100;

static NON_ASCII: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\x00-\x7F]+").expect("valid regex"));
static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9]+").expect("valid regex"));

/// Turn a remote title into a bounded, filesystem-safe file stem
pub fn sanitize_filename(title: &str) -> String {
    let ascii = NON_ASCII.replace_all(title, "");
    let collapsed = NON_WORD.replace_all(&ascii, "_");
    let capped: String = collapsed.chars().take(MAX_TITLE_LEN).collect();
    let trimmed = capped.trim_matches('_');

    if trimmed.is_empty() {
        "track".to_string()
    } else {
        trimmed.to_string()
    }
}

/// First of `base`, `base_1`, `base_2`, ... for which no `<stem>.<ext>` exists in `dir` and
/// `reserved` claims none of those paths
pub fn unique_stem(
    dir: &Path,
    base: &str,
    extensions: &[&str],
    reserved: impl Fn(&Path) -> bool,
) -> String {
    let taken = |stem: &str| {
        extensions.iter().any(|ext| {
            let path = dir.join(format!("{}.{}", stem, ext));
            path.exists() || reserved(&path)
        })
    };

    let mut stem = base.to_string();
    let mut counter = 1;
    while taken(&stem) {
        stem = format!("{}_{}", base, counter);
        counter += 1;
    }
    stem
}

/// Cooperative cancellation flag shared between the caller and a running download
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// State of the download currently running in a pipeline
#[derive(Debug)]
struct DownloadJob {
    source_url: String,
    cancel: CancelToken,
    /// 0.0 to 1.0
    progress: Mutex<f64>,
}

impl DownloadJob {
    fn new(source_url: &str) -> Self {
        Self {
            source_url: source_url.to_string(),
            cancel: CancelToken::new(),
            progress: Mutex::new(0.0),
        }
    }
}

/// Handed to [`MediaSource::fetch`]; every chunk goes through [`tick`](Self::tick), which is
/// where cancellation is noticed. Cancellation latency is therefore one chunk.
pub struct TransferHook<'a> {
    job: &'a DownloadJob,
    on_progress: &'a (dyn Fn(f64) + Send + Sync),
}

impl<'a> TransferHook<'a> {
    fn new(job: &'a DownloadJob, on_progress: &'a (dyn Fn(f64) + Send + Sync)) -> Self {
        Self { job, on_progress }
    }

    pub fn check(&self) -> Result<()> {
        if self.job.cancel.is_cancelled() {
            Err(Error::DownloadCancelled)
        } else {
            Ok(())
        }
    }

    /// Report `downloaded` of `total` bytes. Fails once cancellation was requested.
    pub fn tick(&self, downloaded: u64, total: Option<u64>) -> Result<()> {
        self.check()?;
        if let Some(total) = total.filter(|t| *t > 0) {
            let percent = (downloaded as f64 / total as f64 * 100.0).clamp(0.0, 100.0);
            self.report(percent);
        }
        Ok(())
    }

    fn report(&self, percent: f64) {
        let fraction = percent / 100.0;
        {
            let mut progress = self.job.progress.lock();
            // Never go backwards, e.g. when a size estimate was too small
            if fraction <= *progress && !(fraction == 0.0 && *progress == 0.0) {
                return;
            }
            *progress = fraction;
        }
        (self.on_progress)(percent);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaInfo {
    pub title: String,
    pub sanitized_title: String,
    /// Whole seconds
    pub duration: u64,
    pub thumbnail: String,
}

impl From<&RemoteMedia> for MediaInfo {
    fn from(media: &RemoteMedia) -> Self {
        Self {
            title: media.title.clone(),
            sanitized_title: sanitize_filename(&media.title),
            duration: media.duration,
            thumbnail: media.thumbnail.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadOutcome {
    pub file_path: PathBuf,
    /// Saved thumbnail, when thumbnail saving is on and the fetch worked
    pub thumbnail_path: Option<PathBuf>,
    pub info: MediaInfo,
}

impl DownloadOutcome {
    /// What to store in the catalog's thumbnail column: the local copy if any, else the URL
    pub fn thumbnail_ref(&self) -> String {
        self.thumbnail_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.info.thumbnail.clone())
    }
}

/// Clears the pipeline's active job when a download call ends, however it ends
struct ActiveGuard<'a> {
    slot: &'a Mutex<Option<Arc<DownloadJob>>>,
    job: Arc<DownloadJob>,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|active| Arc::ptr_eq(active, &self.job)) {
            *slot = None;
        }
    }
}

fn remove_quietly(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            log::warn!("Could not remove {:?}: {}", path, e);
        }
    }
}

fn thumbnail_extension(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit('.').next() {
        Some(ext @ ("jpg" | "jpeg" | "png" | "webp")) if path.contains('.') => ext,
        _ => "jpg",
    }
}

type ReservedPaths = Box<dyn Fn(&Path) -> bool + Send + Sync>;

/// One pipeline per application. Callers run one download at a time.
pub struct DownloadPipeline<S, T> {
    downloads_dir: PathBuf,
    source: S,
    transcoder: T,
    save_thumbnails: bool,
    reserved: Option<ReservedPaths>,
    active: Mutex<Option<Arc<DownloadJob>>>,
}

impl<S: MediaSource, T: Transcoder> DownloadPipeline<S, T> {
    /// Fails with a configuration error if the downloads folder cannot be created
    pub fn new(downloads_dir: &Path, source: S, transcoder: T) -> Result<Self> {
        fs::create_dir_all(downloads_dir).map_err(|e| {
            Error::Config(format!(
                "Cannot create downloads folder {:?}: {}",
                downloads_dir, e
            ))
        })?;

        Ok(Self {
            downloads_dir: downloads_dir.to_path_buf(),
            source,
            transcoder,
            save_thumbnails: false,
            reserved: None,
            active: Mutex::new(None),
        })
    }

    pub fn with_thumbnails(mut self, save: bool) -> Self {
        self.save_thumbnails = save;
        self
    }

    /// Paths `reserved` returns true for are never chosen as output names, even if no file
    /// exists there
    pub fn with_reserved_paths<R>(mut self, reserved: R) -> Self
    where
        R: Fn(&Path) -> bool + Send + Sync + 'static,
    {
        self.reserved = Some(Box::new(reserved));
        self
    }

    pub fn is_busy(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Progress of the running download as a fraction, if one is running
    pub fn progress(&self) -> Option<f64> {
        self.active.lock().as_ref().map(|job| *job.progress.lock())
    }

    /// Request cancellation of the running download. Returns false when nothing is running.
    pub fn cancel(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(job) => {
                log::info!("Cancelling download of {}", job.source_url);
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn get_info(&self, url: &str) -> Result<MediaInfo> {
        let media = self.source.resolve(url).await?;
        Ok(MediaInfo::from(&media))
    }

    /// Download `url` and convert it to the transcoder's format. `on_progress` receives
    /// non-decreasing percentages from the worker running this future.
    pub async fn download<F>(&self, url: &str, on_progress: F) -> Result<DownloadOutcome>
    where
        F: Fn(f64) + Send + Sync,
    {
        let job = Arc::new(DownloadJob::new(url));
        {
            let mut active = self.active.lock();
            if let Some(previous) = active.as_ref() {
                log::warn!(
                    "Download of {} started while {} is still running",
                    url,
                    previous.source_url
                );
            }
            *active = Some(Arc::clone(&job));
        }
        let _guard = ActiveGuard {
            slot: &self.active,
            job: Arc::clone(&job),
        };

        log::info!("Resolving {}", url);
        let media = self.source.resolve(url).await?;
        let info = MediaInfo::from(&media);

        let hook = TransferHook::new(&job, &on_progress);
        hook.check()?;

        let out_ext = self.transcoder.output_extension().to_string();
        let stem = unique_stem(
            &self.downloads_dir,
            &info.sanitized_title,
            &[media.extension.as_str(), out_ext.as_str()],
            |path| self.reserved.as_ref().is_some_and(|reserved| reserved(path)),
        );
        let raw_path = if media.extension.eq_ignore_ascii_case(&out_ext) {
            self.downloads_dir
                .join(format!("{}.source.{}", stem, media.extension))
        } else {
            self.downloads_dir.join(format!("{}.{}", stem, media.extension))
        };
        let final_path = self.downloads_dir.join(format!("{}.{}", stem, out_ext));

        log::info!("Downloading \"{}\" to {:?}", info.title, raw_path);
        hook.report(0.0);
        if let Err(e) = self.source.fetch(&media, &raw_path, &hook).await {
            remove_quietly(&raw_path);
            return Err(e);
        }
        hook.report(100.0);

        if let Err(e) = hook.check() {
            remove_quietly(&raw_path);
            return Err(e);
        }

        log::info!("Converting {:?} to {}", raw_path, out_ext);
        let transcoded = self.transcoder.transcode(&raw_path, &final_path).await;
        remove_quietly(&raw_path);
        if let Err(e) = transcoded {
            remove_quietly(&final_path);
            return Err(e);
        }

        // Cancelled while the transcoder ran
        if let Err(e) = hook.check() {
            remove_quietly(&final_path);
            return Err(e);
        }

        let thumbnail_path = if self.save_thumbnails && !media.thumbnail.is_empty() {
            let dest = self.downloads_dir.join(format!(
                "{}.{}",
                stem,
                thumbnail_extension(&media.thumbnail)
            ));
            match self.source.fetch_thumbnail(&media.thumbnail, &dest).await {
                Ok(()) => Some(dest),
                Err(e) => {
                    log::warn!("Thumbnail for \"{}\" not saved: {}", info.title, e);
                    remove_quietly(&dest);
                    None
                }
            }
        } else {
            None
        };

        log::info!("Download complete: {:?}", final_path);
        Ok(DownloadOutcome {
            file_path: final_path,
            thumbnail_path,
            info,
        })
    }
}
