// FFmpeg Module
// Locates the external tools and converts downloaded containers to MP3

use crate::error::{Error, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Tool installation status
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolStatus {
    pub installed: bool,
    pub path: Option<PathBuf>,
    pub version: Option<String>,
}

/// Folder where bundled copies of ffmpeg / yt-dlp may live
pub fn bundled_tools_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tubeplayer")
        .join("bin")
}

fn executable_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", name)
    } else {
        name.to_string()
    }
}

/// Find `name` (e.g. "ffmpeg"): an explicit path first, then the bundled folder, then the
/// system PATH, then a few common install folders.
pub fn locate_tool(name: &str, explicit: Option<&Path>) -> ToolStatus {
    if let Some(path) = explicit {
        let version = get_version(path);
        return ToolStatus {
            installed: version.is_some(),
            path: Some(path.to_path_buf()),
            version,
        };
    }

    let exe = executable_name(name);
    let mut candidates = vec![bundled_tools_dir().join(&exe), PathBuf::from(&exe)];

    if cfg!(windows) {
        candidates.push(PathBuf::from(format!("C:\\{}\\bin\\{}", name, exe)));
        candidates.push(PathBuf::from(format!("C:\\Program Files\\{}\\bin\\{}", name, exe)));
    } else {
        candidates.push(PathBuf::from("/usr/local/bin").join(&exe));
        candidates.push(PathBuf::from("/opt/homebrew/bin").join(&exe));
    }

    for path in candidates {
        if let Some(version) = get_version(&path) {
            log::debug!("Found {} {} at {:?}", name, version, path);
            return ToolStatus {
                installed: true,
                path: Some(path),
                version: Some(version),
            };
        }
    }

    ToolStatus {
        installed: false,
        path: None,
        version: None,
    }
}

/// Run `<tool> -version` (ffmpeg) or `<tool> --version` (yt-dlp) and return the version word
fn get_version(path: &Path) -> Option<String> {
    for flag in ["-version", "--version"] {
        let output = Command::new(path)
            .arg(flag)
            .stdin(Stdio::null())
            .output()
            .ok()?;

        if !output.status.success() {
            continue;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first_line = stdout.lines().next()?;
        // "ffmpeg version N.N.N-..." or just "2024.08.06"
        let version = match first_line.split_whitespace().nth(2) {
            Some(word) if first_line.contains("version") => word,
            _ => first_line.trim(),
        };
        return Some(version.split('-').next().unwrap_or(version).to_string());
    }
    None
}

/// Converts a downloaded media container into the target audio format
pub trait Transcoder: Send + Sync {
    /// Extension of the files this transcoder produces, without the dot
    fn output_extension(&self) -> &str;

    fn transcode(&self, input: &Path, output: &Path) -> impl Future<Output = Result<()>> + Send;
}

pub struct FfmpegTranscoder {
    ffmpeg_path: PathBuf,
    bitrate: String,
}

impl FfmpegTranscoder {
    /// Find ffmpeg; a missing binary means the pipeline cannot be built
    pub fn locate(explicit: Option<&Path>, bitrate: &str) -> Result<Self> {
        let status = locate_tool("ffmpeg", explicit);
        match status.path {
            Some(ffmpeg_path) if status.installed => {
                log::info!(
                    "Using ffmpeg {} at {:?}",
                    status.version.as_deref().unwrap_or("?"),
                    ffmpeg_path
                );
                Ok(Self {
                    ffmpeg_path,
                    bitrate: bitrate.to_string(),
                })
            }
            _ => Err(Error::Config(
                "FFmpeg not found. Install it or set ffmpeg_path in the config file.".to_string(),
            )),
        }
    }

    fn args(&self, input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-i".into(),
            input.to_string_lossy().into_owned(),
            "-vn".into(),
            "-acodec".into(),
            "libmp3lame".into(),
            "-ab".into(),
            self.bitrate.clone(),
            "-y".into(),
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            output.to_string_lossy().into_owned(),
        ]
    }
}

impl Transcoder for FfmpegTranscoder {
    fn output_extension(&self) -> &str {
        "mp3"
    }

    async fn transcode(&self, input: &Path, output: &Path) -> Result<()> {
        let mut command = tokio::process::Command::new(&self.ffmpeg_path);
        command
            .args(self.args(input, output))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        log::debug!("Transcoding {:?} -> {:?}", input, output);
        let result = command
            .output()
            .await
            .map_err(|e| Error::Transcode(format!("could not run ffmpeg: {}", e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(Error::Transcode(format!(
                "ffmpeg exited with {}: {}",
                result.status,
                stderr.trim()
            )));
        }

        if !output.exists() {
            return Err(Error::Transcode(
                "ffmpeg failed to create output file".to_string(),
            ));
        }

        Ok(())
    }
}
