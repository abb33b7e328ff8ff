//! Library Scanner Module
//! Finds audio files in the downloads folder that the catalog does not know about yet

use lofty::{Accessor, AudioFile, Probe, TaggedFileExt};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "m4a", "flac", "wav", "ogg", "opus"];
const THUMBNAIL_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// An audio file found on disk, ready to be catalogued
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedTrack {
    pub file_path: PathBuf,
    pub title: String,
    /// Whole seconds, 0 if the file could not be probed
    pub duration: i64,
    /// Image next to the track with the same stem, if any
    pub thumbnail: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct LibraryScanner;

impl LibraryScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scan_folder(&self, folder_path: &Path) -> Vec<ScannedTrack> {
        let mut tracks = Vec::new();

        for entry in WalkDir::new(folder_path)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() || !is_supported(path) {
                continue;
            }
            tracks.push(self.extract_metadata(path));
        }

        tracks.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        log::debug!("Found {} audio files in {:?}", tracks.len(), folder_path);
        tracks
    }

    fn extract_metadata(&self, path: &Path) -> ScannedTrack {
        let stem_title = || {
            path.file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("Unknown")
                .replace('_', " ")
        };

        let (title, duration) = match Probe::open(path).and_then(|probe| probe.read()) {
            Ok(tagged_file) => {
                let duration = tagged_file.properties().duration().as_secs() as i64;
                let title = tagged_file
                    .primary_tag()
                    .or_else(|| tagged_file.first_tag())
                    .and_then(|tag| tag.title().map(|t| t.to_string()))
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(stem_title);
                (title, duration)
            }
            Err(e) => {
                log::debug!("Could not read tags of {:?}: {}", path, e);
                (stem_title(), 0)
            }
        };

        ScannedTrack {
            file_path: path.to_path_buf(),
            title,
            duration,
            thumbnail: find_thumbnail(path),
        }
    }
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn find_thumbnail(track_path: &Path) -> Option<PathBuf> {
    THUMBNAIL_EXTENSIONS
        .iter()
        .map(|ext| track_path.with_extension(ext))
        .find(|candidate| candidate.is_file())
}
