//! Player Module
//! Playback state machine over an [`AudioBackend`] with a background monitor that reports
//! position and end-of-track

use crate::audio::AudioBackend;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub type SecondsCallback = Arc<dyn Fn(f64) + Send + Sync>;
pub type CompletionCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    Stopped,
    Playing,
    Paused,
}

#[derive(Default)]
struct Callbacks {
    duration: Option<SecondsCallback>,
    position: Option<SecondsCallback>,
    completion: Option<CompletionCallback>,
}

struct Inner<B> {
    backend: B,
    state: PlayerState,
    current_file: Option<PathBuf>,
    volume: f32,
}

struct Shared<B> {
    inner: Mutex<Inner<B>>,
    callbacks: Mutex<Callbacks>,
}

struct Monitor {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Monitor {
    /// Signal the monitor and wait for it, unless called from the monitor itself
    fn retire(self) {
        self.stop.store(true, Ordering::SeqCst);
        if self.handle.thread().id() == thread::current().id() {
            return;
        }
        if self.handle.join().is_err() {
            log::error!("Playback monitor panicked");
        }
    }
}

enum Tick {
    Position(f64),
    Finished,
    Idle,
    Exit,
}

/// Plays one track at a time. All methods take `&self` so the engine can be shared with
/// callbacks through an `Arc`.
pub struct PlaybackEngine<B: AudioBackend> {
    shared: Arc<Shared<B>>,
    monitor: Mutex<Option<Monitor>>,
    poll_interval: Duration,
}

impl<B: AudioBackend> PlaybackEngine<B> {
    pub fn new(backend: B, poll_interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    backend,
                    state: PlayerState::Stopped,
                    current_file: None,
                    volume: 1.0,
                }),
                callbacks: Mutex::new(Callbacks::default()),
            }),
            monitor: Mutex::new(None),
            poll_interval,
        }
    }

    /// Called once per successful `play` with the track length in seconds
    pub fn set_duration_callback(&self, callback: impl Fn(f64) + Send + Sync + 'static) {
        self.shared.callbacks.lock().duration = Some(Arc::new(callback));
    }

    /// Called from the monitor thread with the elapsed seconds while playing
    pub fn set_position_callback(&self, callback: impl Fn(f64) + Send + Sync + 'static) {
        self.shared.callbacks.lock().position = Some(Arc::new(callback));
    }

    /// Called from the monitor thread when a track plays to its end
    pub fn set_completion_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.shared.callbacks.lock().completion = Some(Arc::new(callback));
    }

    pub fn state(&self) -> PlayerState {
        self.shared.inner.lock().state
    }

    pub fn current_file(&self) -> Option<PathBuf> {
        self.shared.inner.lock().current_file.clone()
    }

    pub fn volume(&self) -> f32 {
        self.shared.inner.lock().volume
    }

    pub fn position(&self) -> f64 {
        let inner = self.shared.inner.lock();
        match inner.state {
            PlayerState::Stopped => 0.0,
            _ => inner.backend.elapsed(),
        }
    }

    pub fn duration(&self) -> f64 {
        let inner = self.shared.inner.lock();
        match inner.state {
            PlayerState::Stopped => 0.0,
            _ => inner.backend.duration(),
        }
    }

    /// Start `path` from the beginning, replacing whatever was loaded
    pub fn play(&self, path: &Path) -> Result<()> {
        self.retire_monitor();

        let duration = {
            let mut inner = self.shared.inner.lock();
            inner.backend.stop();

            match inner.backend.load(path) {
                Ok(duration) => {
                    let volume = inner.volume;
                    inner.backend.set_volume(volume);
                    inner.backend.play();
                    inner.state = PlayerState::Playing;
                    inner.current_file = Some(path.to_path_buf());
                    duration
                }
                Err(e) => {
                    inner.state = PlayerState::Stopped;
                    inner.current_file = None;
                    return Err(match e {
                        Error::Playback(_) => e,
                        other => Error::Playback(other.to_string()),
                    });
                }
            }
        };

        log::info!("Playing {:?} ({:.1}s)", path, duration);
        let on_duration = self.shared.callbacks.lock().duration.clone();
        if let Some(callback) = on_duration {
            callback(duration);
        }

        self.start_monitor();
        Ok(())
    }

    pub fn pause(&self) {
        {
            let mut inner = self.shared.inner.lock();
            if inner.state != PlayerState::Playing {
                return;
            }
            inner.backend.pause();
            inner.state = PlayerState::Paused;
        }
        self.retire_monitor();
    }

    pub fn resume(&self) {
        {
            let mut inner = self.shared.inner.lock();
            if inner.state != PlayerState::Paused {
                return;
            }
            inner.backend.resume();
            inner.state = PlayerState::Playing;
        }
        self.start_monitor();
    }

    /// Stop and unload. No callback is delivered after this returns.
    pub fn stop(&self) {
        self.retire_monitor();

        let mut inner = self.shared.inner.lock();
        inner.backend.stop();
        inner.state = PlayerState::Stopped;
        inner.current_file = None;
    }

    pub fn seek(&self, seconds: f64) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        if inner.current_file.is_none() {
            return Err(Error::Playback("nothing is loaded".to_string()));
        }
        let target = seconds.clamp(0.0, inner.backend.duration());
        inner.backend.seek(target);
        Ok(())
    }

    /// Set the output volume, clamped to 0.0..=1.0. Applies in any state.
    pub fn set_volume(&self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        let mut inner = self.shared.inner.lock();
        inner.volume = volume;
        inner.backend.set_volume(volume);
    }

    fn retire_monitor(&self) {
        let monitor = self.monitor.lock().take();
        if let Some(monitor) = monitor {
            monitor.retire();
        }
    }

    fn start_monitor(&self) {
        self.retire_monitor();

        let stop = Arc::new(AtomicBool::new(false));
        let shared = Arc::clone(&self.shared);
        let flag = Arc::clone(&stop);
        let interval = self.poll_interval;

        let spawned = thread::Builder::new()
            .name("playback-monitor".into())
            .spawn(move || monitor_loop(shared, flag, interval));

        match spawned {
            Ok(handle) => *self.monitor.lock() = Some(Monitor { stop, handle }),
            Err(e) => log::error!("Could not start playback monitor: {}", e),
        }
    }
}

impl<B: AudioBackend> Drop for PlaybackEngine<B> {
    fn drop(&mut self) {
        self.retire_monitor();
    }
}

fn monitor_loop<B: AudioBackend>(shared: Arc<Shared<B>>, stop: Arc<AtomicBool>, interval: Duration) {
    loop {
        thread::sleep(interval);

        let tick = {
            let mut inner = shared.inner.lock();
            if stop.load(Ordering::SeqCst) {
                Tick::Exit
            } else {
                match inner.state {
                    PlayerState::Playing if inner.backend.is_finished() => {
                        inner.state = PlayerState::Stopped;
                        inner.current_file = None;
                        Tick::Finished
                    }
                    PlayerState::Playing => Tick::Position(inner.backend.elapsed()),
                    PlayerState::Paused => Tick::Idle,
                    PlayerState::Stopped => Tick::Exit,
                }
            }
        };

        match tick {
            Tick::Position(seconds) => {
                let callback = shared.callbacks.lock().position.clone();
                if let Some(callback) = callback {
                    callback(seconds);
                }
            }
            Tick::Finished => {
                log::debug!("Track finished");
                let callback = shared.callbacks.lock().completion.clone();
                if let Some(callback) = callback {
                    callback();
                }
                break;
            }
            Tick::Idle => {}
            Tick::Exit => break,
        }
    }
}
