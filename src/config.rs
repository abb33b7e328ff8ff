//! Configuration Module
//! Locations of the catalog, downloads and share folders plus pipeline/player tuning

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR_NAME: &str = "tubeplayer";
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where downloaded and transcoded tracks are written
    pub downloads_dir: PathBuf,
    pub database_path: PathBuf,
    /// Folder served to phones by the share server
    pub share_dir: PathBuf,
    /// Explicit ffmpeg binary; searched for when unset
    pub ffmpeg_path: Option<PathBuf>,
    /// Explicit yt-dlp binary; searched for when unset
    pub ytdlp_path: Option<PathBuf>,
    pub audio_bitrate: String,
    pub poll_interval_ms: u64,
    pub share_port: u16,
    pub save_thumbnails: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = data_dir();

        // Tracks go to the user's music folder so they survive an uninstall
        let downloads_dir = dirs::audio_dir()
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("Music")
            })
            .join("TubePlayer");

        Self {
            downloads_dir,
            database_path: data_dir.join("songs.db"),
            share_dir: data_dir.join("html"),
            ffmpeg_path: None,
            ytdlp_path: None,
            audio_bitrate: "192k".to_string(),
            poll_interval_ms: 100,
            share_port: 8000,
            save_thumbnails: false,
        }
    }
}

impl AppConfig {
    /// Default location of the config file
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Load the config from `path`, or from the default location. A missing file yields
    /// the defaults; a malformed one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_path);

        if !path.exists() {
            log::debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(&path)?;
        let config: AppConfig = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid config file {:?}: {}", path, e)))?;
        log::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load(Some(&dir.path().join("nope.json"))).unwrap();
        assert_eq!(config.audio_bitrate, "192k");
        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.share_port, 8000);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "share_port": 9001, "save_thumbnails": true }"#).unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.share_port, 9001);
        assert!(config.save_thumbnails);
        assert_eq!(config.audio_bitrate, "192k");
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(AppConfig::load(Some(&path)), Err(Error::Config(_))));
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = AppConfig::default();
        config.downloads_dir = dir.path().join("music");
        config.poll_interval_ms = 50;

        config.save(Some(&path)).unwrap();
        let loaded = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.downloads_dir, dir.path().join("music"));
        assert_eq!(loaded.poll_interval(), Duration::from_millis(50));
    }
}
