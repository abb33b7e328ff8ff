use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tubeplayer_lib::LoopMode;

/// TubePlayer: download audio from video links and play it from a local catalog.
#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true, env = "TUBEPLAYER_CONFIG", value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Download a video's audio track, convert it to MP3 and add it to the catalog.
    ///
    /// Press Ctrl-C to cancel; partial files are removed.
    Download {
        url: String,

        /// Store the track under this title instead of the video's
        #[arg(short, long)]
        title: Option<String>,
    },

    /// List the catalog, newest first
    List,

    /// Delete a track and its file
    Delete { id: i64 },

    /// Import audio files from the downloads folder and drop entries whose file is gone
    Sync,

    /// Play tracks by id (everything when none are given) with interactive controls
    Play {
        ids: Vec<i64>,

        /// no_loop, loop_one or loop_all
        #[arg(short, long = "loop", default_value = "no_loop")]
        loop_mode: LoopMode,

        /// 0 to 100
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=100))]
        volume: Option<u8>,
    },

    /// Serve tracks (everything when none are given) to phones on the local network
    Share {
        ids: Vec<i64>,

        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show or create the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the current configuration to the config file
    Init,
}
