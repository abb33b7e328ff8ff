pub mod audio;
pub mod commands;
pub mod config;
pub mod database;
pub mod downloader;
pub mod error;
pub mod extractor;
pub mod ffmpeg;
pub mod library;
pub mod player;
pub mod queue;
pub mod share;

pub use config::AppConfig;
pub use database::{Catalog, Track};
pub use error::{Error, Result};
pub use queue::{LoopMode, QueueEntry, QueueManager};
