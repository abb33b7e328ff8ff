//! Share Module
//! Publishes the current queue as a small web page that phones on the LAN can play from

use crate::error::{Error, Result};
use crate::queue::QueueItem;
use axum::Router;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::path::{Path, PathBuf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;

const MUSIC_DIR: &str = "music";

/// One track to publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareTrack {
    pub file_path: PathBuf,
    /// Local image path or remote URL, may be empty
    pub thumbnail: String,
    pub is_current: bool,
}

impl From<&QueueItem<'_>> for ShareTrack {
    fn from(item: &QueueItem<'_>) -> Self {
        Self {
            file_path: PathBuf::from(&item.entry.file_path),
            thumbnail: item.entry.thumbnail.clone(),
            is_current: item.is_current,
        }
    }
}

/// A track as published: display name plus the link the page uses for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFile {
    pub name: String,
    pub web_path: String,
    pub thumbnail: String,
    pub is_current: bool,
}

/// Name a published copy after its source path so repeated shares reuse the same link
fn shared_name(source: &Path) -> String {
    let hex = blake3::hash(source.to_string_lossy().as_bytes()).to_hex();
    let stem = &hex.as_str()[..16];
    match source.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}.{}", stem, ext.to_lowercase()),
        None => stem.to_string(),
    }
}

fn display_name(source: &Path) -> String {
    source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Unknown")
        .replace('_', " ")
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Replace the share folder's `music/` and `index.html` with copies of `tracks`.
/// Tracks whose file cannot be copied are skipped; sharing nothing is an error.
pub fn prepare_share_dir(share_dir: &Path, tracks: &[ShareTrack]) -> Result<Vec<SharedFile>> {
    let music_dir = share_dir.join(MUSIC_DIR);
    if music_dir.exists() {
        fs::remove_dir_all(&music_dir)?;
    }
    fs::create_dir_all(&music_dir)?;

    let mut shared = Vec::new();
    for track in tracks {
        let name = shared_name(&track.file_path);
        if let Err(e) = fs::copy(&track.file_path, music_dir.join(&name)) {
            log::warn!("Skipping {:?} for sharing: {}", track.file_path, e);
            continue;
        }

        // Local thumbnails are published too; remote ones are linked directly
        let thumbnail_path = Path::new(&track.thumbnail);
        let thumbnail = if !track.thumbnail.is_empty() && thumbnail_path.is_file() {
            let thumb_name = shared_name(thumbnail_path);
            match fs::copy(thumbnail_path, music_dir.join(&thumb_name)) {
                Ok(_) => format!("/{}/{}", MUSIC_DIR, urlencoding::encode(&thumb_name)),
                Err(_) => String::new(),
            }
        } else {
            track.thumbnail.clone()
        };

        shared.push(SharedFile {
            name: display_name(&track.file_path),
            web_path: format!("/{}/{}", MUSIC_DIR, urlencoding::encode(&name)),
            thumbnail,
            is_current: track.is_current,
        });
    }

    if shared.is_empty() {
        return Err(Error::Share("no tracks could be shared".to_string()));
    }

    fs::write(share_dir.join("index.html"), render_index(&shared))?;
    log::info!("Prepared {} tracks for sharing in {:?}", shared.len(), share_dir);
    Ok(shared)
}

fn render_index(files: &[SharedFile]) -> String {
    let cards: String = files
        .iter()
        .map(|file| {
            let name = escape_html(&file.name);
            let link = escape_html(&file.web_path);
            let status = if file.is_current { "Now Playing" } else { "In Queue" };
            format!(
                r#"
      <div class="song-card" style="background-image: url('{thumb}');">
        <div class="song-overlay">
          <h2 class="song-title">{name}</h2>
          <span class="song-status">{status}</span>
          <audio controls preload="none"><source src="{link}" type="audio/mpeg"></audio>
          <a class="download-btn" href="{link}" download="{name}.mp3">Download</a>
        </div>
      </div>"#,
                thumb = escape_html(&file.thumbnail),
            )
        })
        .collect();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>Tube Player</title>
  <style>
    * {{ margin: 0; padding: 0; box-sizing: border-box; font-family: sans-serif; }}
    body {{ background: linear-gradient(90deg, #833ab4, #fd1d1d 50%, #fcb045); min-height: 100vh; padding: 2rem 1rem; }}
    h1 {{ color: white; text-align: center; margin-bottom: 2rem; text-transform: uppercase; }}
    .song-grid {{ display: grid; grid-template-columns: repeat(auto-fit, minmax(300px, 1fr)); gap: 1.5rem; max-width: 1024px; margin: 0 auto; }}
    .song-card {{ border-radius: 1rem; overflow: hidden; min-height: 200px; background-size: cover; background-position: center; display: flex; }}
    .song-overlay {{ background: linear-gradient(180deg, rgba(0,0,0,0.3), rgba(0,0,0,0.8)); padding: 1.5rem; width: 100%; display: flex; flex-direction: column; justify-content: flex-end; gap: 0.5rem; }}
    .song-title {{ color: white; font-size: 1.2rem; }}
    .song-status {{ color: #60a5fa; font-size: 0.875rem; }}
    audio {{ width: 100%; }}
    .download-btn {{ color: white; background: rgba(59,130,246,0.8); padding: 0.5rem 1rem; border-radius: 0.5rem; text-decoration: none; align-self: flex-start; }}
  </style>
</head>
<body>
  <h1>Tube Player</h1>
  <div class="song-grid">{cards}
  </div>
  <script>
    // Only one player at a time
    const players = document.querySelectorAll('audio');
    players.forEach(p => p.addEventListener('play', () => players.forEach(o => {{ if (o !== p) o.pause(); }})));
  </script>
</body>
</html>
"#
    )
}

/// Address other devices on the LAN can reach this machine at
pub fn local_ip() -> IpAddr {
    // Connecting a UDP socket sends nothing but picks the outbound interface
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip())
    };
    probe().unwrap_or_else(|e| {
        log::warn!("Could not determine LAN address: {}", e);
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    })
}

/// Static file server for a prepared share folder
pub struct ShareServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl ShareServer {
    /// Serve `root` on all interfaces. Port 0 picks a free port.
    pub async fn start(root: &Path, port: u16) -> Result<Self> {
        let app = Router::new().fallback_service(ServeDir::new(root));

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        log::info!("Share server listening on http://{}", addr);
        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            task,
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// URL to open on a phone
    pub fn url(&self) -> String {
        format!("http://{}:{}", local_ip(), self.port())
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        match (&mut self.task).await {
            Ok(result) => result?,
            Err(e) => log::error!("Share server task failed: {}", e),
        }
        log::info!("Share server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn track(dir: &Path, name: &str, current: bool) -> ShareTrack {
        let path = dir.join(name);
        fs::write(&path, name.as_bytes()).unwrap();
        ShareTrack {
            file_path: path,
            thumbnail: "https://img.example/t.jpg".to_string(),
            is_current: current,
        }
    }

    #[test]
    fn prepares_copies_and_index() {
        let source = TempDir::new().unwrap();
        let share = TempDir::new().unwrap();
        let share_dir = share.path().join("html");
        fs::create_dir_all(share_dir.join("music")).unwrap();
        fs::write(share_dir.join("music").join("stale.mp3"), b"old").unwrap();

        let tracks = vec![
            track(source.path(), "First_Song.mp3", true),
            track(source.path(), "Rock_&_Roll.mp3", false),
        ];
        let shared = prepare_share_dir(&share_dir, &tracks).unwrap();

        assert_eq!(shared.len(), 2);
        assert_eq!(shared[0].name, "First Song");
        assert!(shared[0].is_current);
        assert!(shared[0].web_path.starts_with("/music/"));
        assert!(!share_dir.join("music").join("stale.mp3").exists());

        let copied = share_dir.join(shared[1].web_path.trim_start_matches('/'));
        assert_eq!(fs::read(copied).unwrap(), b"Rock_&_Roll.mp3");

        let index = fs::read_to_string(share_dir.join("index.html")).unwrap();
        assert!(index.contains("Now Playing"));
        assert!(index.contains("Rock &amp; Roll"));
        assert!(index.contains(&shared[0].web_path));
    }

    #[test]
    fn names_are_stable_per_source() {
        let a = shared_name(Path::new("/music/a.MP3"));
        assert_eq!(a, shared_name(Path::new("/music/a.MP3")));
        assert_ne!(a, shared_name(Path::new("/music/b.mp3")));
        assert!(a.ends_with(".mp3"));
    }

    #[test]
    fn missing_files_are_skipped() {
        let source = TempDir::new().unwrap();
        let share = TempDir::new().unwrap();
        let mut tracks = vec![track(source.path(), "ok.mp3", false)];
        tracks.push(ShareTrack {
            file_path: source.path().join("gone.mp3"),
            thumbnail: String::new(),
            is_current: false,
        });

        let shared = prepare_share_dir(share.path(), &tracks).unwrap();
        assert_eq!(shared.len(), 1);

        let err = prepare_share_dir(share.path(), &tracks[1..]).unwrap_err();
        assert!(matches!(err, Error::Share(_)));
    }

    #[tokio::test]
    async fn server_serves_index_and_music() {
        let source = TempDir::new().unwrap();
        let share = TempDir::new().unwrap();
        let shared =
            prepare_share_dir(share.path(), &[track(source.path(), "tune.mp3", false)]).unwrap();

        let server = ShareServer::start(share.path(), 0).await.unwrap();
        let base = format!("http://127.0.0.1:{}", server.port());

        let index = reqwest::get(format!("{}/", base)).await.unwrap().text().await.unwrap();
        assert!(index.contains("tune"));

        let body = reqwest::get(format!("{}{}", base, shared[0].web_path))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(&body[..], b"tune.mp3");

        server.shutdown().await.unwrap();
    }
}
