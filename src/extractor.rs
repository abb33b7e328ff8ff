//! Extractor Module
//! Resolves video-page URLs to audio streams (via yt-dlp) and transfers them to disk

use crate::downloader::TransferHook;
use crate::error::{Error, Result};
use crate::ffmpeg::locate_tool;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;

/// Everything needed to fetch one piece of remote media
#[derive(Debug, Clone, Default)]
pub struct RemoteMedia {
    pub title: String,
    /// Whole seconds, 0 when the site does not say
    pub duration: u64,
    pub thumbnail: String,
    pub stream_url: String,
    /// Container extension of the stream, e.g. "webm" or "m4a"
    pub extension: String,
    pub http_headers: HashMap<String, String>,
    pub filesize: Option<u64>,
}

/// Source of remote media: metadata lookup plus the actual transfers
pub trait MediaSource: Send + Sync {
    /// Look up metadata without transferring media
    fn resolve(&self, url: &str) -> impl Future<Output = Result<RemoteMedia>> + Send;

    /// Transfer the media stream to `dest`, reporting every chunk to `hook`. Must stop with
    /// the hook's error as soon as a tick fails.
    fn fetch(
        &self,
        media: &RemoteMedia,
        dest: &Path,
        hook: &TransferHook<'_>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn fetch_thumbnail(&self, url: &str, dest: &Path) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Deserialize)]
struct YtDlpFormat {
    url: Option<String>,
    ext: Option<String>,
    #[serde(default)]
    http_headers: HashMap<String, String>,
    filesize: Option<u64>,
    filesize_approx: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: String,
    duration: Option<f64>,
    thumbnail: Option<String>,
    #[serde(flatten)]
    format: YtDlpFormat,
    #[serde(default)]
    requested_formats: Vec<YtDlpFormat>,
}

impl YtDlpInfo {
    fn into_media(self, url: &str) -> Result<RemoteMedia> {
        // With a single selected format yt-dlp copies its fields to the top level
        let format = if self.format.url.is_some() {
            self.format
        } else {
            self.requested_formats
                .into_iter()
                .find(|f| f.url.is_some())
                .ok_or_else(|| Error::info(url, "no downloadable audio stream"))?
        };

        let filesize = format
            .filesize
            .or(format.filesize_approx.map(|size| size as u64));

        Ok(RemoteMedia {
            title: self.title,
            duration: self.duration.map(|d| d.round() as u64).unwrap_or(0),
            thumbnail: self.thumbnail.unwrap_or_default(),
            stream_url: format.url.unwrap_or_default(),
            extension: format.ext.unwrap_or_else(|| "webm".to_string()),
            http_headers: format.http_headers,
            filesize,
        })
    }
}

pub struct YtDlpSource {
    ytdlp_path: PathBuf,
    client: Client,
}

impl YtDlpSource {
    /// Find yt-dlp; a missing binary means the pipeline cannot be built
    pub fn locate(explicit: Option<&Path>) -> Result<Self> {
        let status = locate_tool("yt-dlp", explicit);
        let ytdlp_path = match status.path {
            Some(path) if status.installed => path,
            _ => {
                return Err(Error::Config(
                    "yt-dlp not found. Install it or set ytdlp_path in the config file."
                        .to_string(),
                ))
            }
        };
        log::info!(
            "Using yt-dlp {} at {:?}",
            status.version.as_deref().unwrap_or("?"),
            ytdlp_path
        );

        let client = Client::builder()
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) TubePlayer/1.0")
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { ytdlp_path, client })
    }
}

impl MediaSource for YtDlpSource {
    async fn resolve(&self, url: &str) -> Result<RemoteMedia> {
        let output = tokio::process::Command::new(&self.ytdlp_path)
            .args(["-J", "--no-playlist", "--no-warnings", "-f", "bestaudio/best", url])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::info(url, format!("could not run yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::info(url, stderr.trim()));
        }

        let info: YtDlpInfo = serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::info(url, format!("unexpected yt-dlp output: {}", e)))?;
        info.into_media(url)
    }

    async fn fetch(&self, media: &RemoteMedia, dest: &Path, hook: &TransferHook<'_>) -> Result<()> {
        hook.check()?;

        let mut request = self.client.get(&media.stream_url);
        for (name, value) in &media.http_headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?.error_for_status()?;
        let total = response.content_length().or(media.filesize);

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            hook.tick(downloaded, total)?;
        }

        file.flush().await?;
        log::debug!("Fetched {} bytes to {:?}", downloaded, dest);
        Ok(())
    }

    async fn fetch_thumbnail(&self, url: &str, dest: &Path) -> Result<()> {
        let bytes = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_format_output() {
        let json = r#"{
            "title": "Song Title",
            "duration": 212.4,
            "thumbnail": "https://i.ytimg.com/vi/x/hq.jpg",
            "url": "https://stream.example/a",
            "ext": "webm",
            "http_headers": {"User-Agent": "x"},
            "filesize_approx": 3400000.7
        }"#;
        let info: YtDlpInfo = serde_json::from_str(json).unwrap();
        let media = info.into_media("u").unwrap();

        assert_eq!(media.title, "Song Title");
        assert_eq!(media.duration, 212);
        assert_eq!(media.stream_url, "https://stream.example/a");
        assert_eq!(media.extension, "webm");
        assert_eq!(media.filesize, Some(3_400_000));
        assert_eq!(media.http_headers.get("User-Agent").map(String::as_str), Some("x"));
    }

    #[test]
    fn falls_back_to_requested_formats() {
        let json = r#"{
            "title": "Live",
            "duration": null,
            "requested_formats": [
                {"ext": "mp4"},
                {"url": "https://stream.example/audio", "ext": "m4a", "filesize": 10}
            ]
        }"#;
        let info: YtDlpInfo = serde_json::from_str(json).unwrap();
        let media = info.into_media("u").unwrap();

        assert_eq!(media.duration, 0);
        assert_eq!(media.thumbnail, "");
        assert_eq!(media.extension, "m4a");
        assert_eq!(media.filesize, Some(10));
    }

    #[test]
    fn missing_stream_is_an_info_error() {
        let info: YtDlpInfo = serde_json::from_str(r#"{"title": "Nothing"}"#).unwrap();
        assert!(matches!(
            info.into_media("u"),
            Err(Error::InfoResolution { .. })
        ));
    }

    #[test]
    fn missing_ytdlp_is_a_config_error() {
        let result = YtDlpSource::locate(Some(Path::new("/definitely/not/yt-dlp")));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
