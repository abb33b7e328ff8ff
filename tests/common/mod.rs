//! Fakes for driving the pipeline and the player without network, ffmpeg or a sound card

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::time::Instant;
use tubeplayer_lib::audio::AudioBackend;
use tubeplayer_lib::downloader::TransferHook;
use tubeplayer_lib::extractor::{MediaSource, RemoteMedia};
use tubeplayer_lib::ffmpeg::Transcoder;
use tubeplayer_lib::{Error, Result};

/// Serves a fixed title; the transfer is ten 10-byte chunks
pub struct FakeSource {
    pub title: String,
}

impl FakeSource {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
        }
    }
}

impl MediaSource for FakeSource {
    async fn resolve(&self, url: &str) -> Result<RemoteMedia> {
        if url.starts_with("bad:") {
            return Err(Error::InfoResolution {
                url: url.to_string(),
                reason: "unsupported URL".to_string(),
            });
        }
        Ok(RemoteMedia {
            title: self.title.clone(),
            duration: 200,
            thumbnail: "https://img.example/cover.jpg".to_string(),
            stream_url: url.to_string(),
            extension: "m4a".to_string(),
            ..Default::default()
        })
    }

    async fn fetch(&self, _media: &RemoteMedia, dest: &Path, hook: &TransferHook<'_>) -> Result<()> {
        let mut written = Vec::new();
        for chunk in 1..=10u64 {
            written.extend_from_slice(&[7u8; 10]);
            fs::write(dest, &written)?;
            hook.tick(chunk * 10, Some(100))?;
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    async fn fetch_thumbnail(&self, _url: &str, dest: &Path) -> Result<()> {
        fs::write(dest, b"jpeg")?;
        Ok(())
    }
}

pub struct CopyTranscoder;

impl Transcoder for CopyTranscoder {
    fn output_extension(&self) -> &str {
        "mp3"
    }

    async fn transcode(&self, input: &Path, output: &Path) -> Result<()> {
        fs::copy(input, output)?;
        Ok(())
    }
}

/// Wall-clock backend; a file's stem is its length in seconds ("0.05.mp3")
#[derive(Default)]
pub struct ClockBackend {
    duration: f64,
    loaded: bool,
    offset: f64,
    started: Option<Instant>,
}

impl AudioBackend for ClockBackend {
    fn load(&mut self, path: &Path) -> Result<f64> {
        let duration = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| Error::Playback(format!("cannot decode {:?}", path)))?;
        *self = ClockBackend {
            duration,
            loaded: true,
            ..Default::default()
        };
        Ok(duration)
    }

    fn play(&mut self) {
        self.started = Some(Instant::now());
    }

    fn pause(&mut self) {
        if let Some(started) = self.started.take() {
            self.offset += started.elapsed().as_secs_f64();
        }
    }

    fn resume(&mut self) {
        self.play();
    }

    fn stop(&mut self) {
        *self = ClockBackend::default();
    }

    fn seek(&mut self, seconds: f64) {
        self.offset = seconds;
        if self.started.is_some() {
            self.started = Some(Instant::now());
        }
    }

    fn set_volume(&mut self, _volume: f32) {}

    fn elapsed(&self) -> f64 {
        let running = self.started.map(|s| s.elapsed().as_secs_f64()).unwrap_or(0.0);
        (self.offset + running).min(self.duration)
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn is_finished(&self) -> bool {
        self.loaded && self.elapsed() >= self.duration
    }
}
