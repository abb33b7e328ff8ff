//! Error Module
//! One error type shared by the catalog, the download pipeline and the player

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Could not resolve media info for {url}: {reason}")]
    InfoResolution { url: String, reason: String },
    #[error("Download cancelled")]
    DownloadCancelled,
    #[error("Transcoding failed: {0}")]
    Transcode(String),
    #[error("A track is already stored at {0}")]
    DuplicatePath(String),
    #[error("Playback failed: {0}")]
    Playback(String),
    #[error("Sharing failed: {0}")]
    Share(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("A download is already in progress")]
    Busy,
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the application can carry on after reporting this error.
    /// Only configuration problems found at startup are fatal.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Config(_))
    }

    pub(crate) fn info(url: &str, reason: impl ToString) -> Self {
        Error::InfoResolution {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_fatal() {
        assert!(!Error::Config("ffmpeg missing".into()).is_recoverable());
        assert!(Error::DownloadCancelled.is_recoverable());
        assert!(Error::Transcode("exit status 1".into()).is_recoverable());
        assert!(Error::DuplicatePath("a.mp3".into()).is_recoverable());
    }

    #[test]
    fn messages_are_readable() {
        let err = Error::info("https://example.com/v", "unsupported URL");
        assert_eq!(
            err.to_string(),
            "Could not resolve media info for https://example.com/v: unsupported URL"
        );
    }
}
