//! Audio Engine Module
//! Decodes a track with symphonia and plays it through the default cpal output device

use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No audio device available")]
    NoDevice,
    #[error("Failed to build stream: {0}")]
    StreamBuild(String),
    #[error("Failed to decode audio: {0}")]
    Decode(String),
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("Unsupported format")]
    UnsupportedFormat,
    #[error("Audio thread is gone")]
    ThreadGone,
}

impl From<AudioError> for Error {
    fn from(err: AudioError) -> Self {
        Error::Playback(err.to_string())
    }
}

/// What the playback engine needs from an audio output.
///
/// A backend holds at most one loaded track. `load` replaces it and leaves it paused at the
/// start; `play` starts output.
pub trait AudioBackend: Send + 'static {
    /// Load `path`, returning its length in seconds
    fn load(&mut self, path: &Path) -> Result<f64>;
    fn play(&mut self);
    fn pause(&mut self);
    fn resume(&mut self);
    /// Unload the current track
    fn stop(&mut self);
    fn seek(&mut self, seconds: f64);
    /// 0.0 to 1.0
    fn set_volume(&mut self, volume: f32);
    /// Seconds played of the loaded track
    fn elapsed(&self) -> f64;
    fn duration(&self) -> f64;
    /// True once the loaded track has played to its end
    fn is_finished(&self) -> bool;
}

#[derive(Debug)]
struct OutputState {
    loaded: bool,
    is_playing: bool,
    volume: f32,
    sample_rate: u32,
    channels: u16,
    duration: f64,
}

impl Default for OutputState {
    fn default() -> Self {
        Self {
            loaded: false,
            is_playing: false,
            volume: 1.0,
            sample_rate: 44100,
            channels: 2,
            duration: 0.0,
        }
    }
}

enum AudioCommand {
    Load(PathBuf, Sender<std::result::Result<f64, AudioError>>),
    Stop,
    Shutdown,
}

/// cpal-backed [`AudioBackend`]. Output runs on a dedicated thread because `cpal::Stream`
/// is not `Send`; simple state changes go straight to the shared state the stream reads.
pub struct CpalBackend {
    state: Arc<RwLock<OutputState>>,
    sample_buffer: Arc<RwLock<Vec<f32>>>,
    buffer_position: Arc<RwLock<usize>>,
    command_tx: Sender<AudioCommand>,
    thread: Option<JoinHandle<()>>,
}

impl CpalBackend {
    pub fn new() -> Result<Self> {
        let state = Arc::new(RwLock::new(OutputState::default()));
        let sample_buffer = Arc::new(RwLock::new(Vec::new()));
        let buffer_position = Arc::new(RwLock::new(0));

        let (command_tx, command_rx) = unbounded::<AudioCommand>();

        let state_clone = Arc::clone(&state);
        let sample_buffer_clone = Arc::clone(&sample_buffer);
        let buffer_position_clone = Arc::clone(&buffer_position);

        let thread = thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || {
                // The host is created here; it never leaves this thread
                AudioThread {
                    host: default_host(),
                    stream: None,
                    state: state_clone,
                    sample_buffer: sample_buffer_clone,
                    buffer_position: buffer_position_clone,
                    command_rx,
                }
                .run()
            })?;

        Ok(Self {
            state,
            sample_buffer,
            buffer_position,
            command_tx,
            thread: Some(thread),
        })
    }

    fn frames_per_second(&self) -> f64 {
        let state = self.state.read();
        state.sample_rate as f64 * state.channels as f64
    }
}

impl AudioBackend for CpalBackend {
    fn load(&mut self, path: &Path) -> Result<f64> {
        let (reply_tx, reply_rx) = bounded(1);
        self.command_tx
            .send(AudioCommand::Load(path.to_path_buf(), reply_tx))
            .map_err(|_| AudioError::ThreadGone)?;
        let duration = reply_rx.recv().map_err(|_| AudioError::ThreadGone)??;
        Ok(duration)
    }

    fn play(&mut self) {
        let mut state = self.state.write();
        state.is_playing = state.loaded;
    }

    fn pause(&mut self) {
        self.state.write().is_playing = false;
    }

    fn resume(&mut self) {
        self.play();
    }

    fn stop(&mut self) {
        {
            let mut state = self.state.write();
            state.is_playing = false;
            state.loaded = false;
        }
        let _ = self.command_tx.send(AudioCommand::Stop);
    }

    fn seek(&mut self, seconds: f64) {
        let (duration, channels) = {
            let state = self.state.read();
            (state.duration, state.channels as usize)
        };
        let seconds = seconds.clamp(0.0, duration);
        let mut sample_position = (seconds * self.frames_per_second()) as usize;
        // Stay on a frame boundary so channels do not swap
        sample_position -= sample_position % channels.max(1);
        let len = self.sample_buffer.read().len();
        *self.buffer_position.write() = sample_position.min(len);
    }

    fn set_volume(&mut self, volume: f32) {
        self.state.write().volume = volume.clamp(0.0, 1.0);
    }

    fn elapsed(&self) -> f64 {
        if !self.state.read().loaded {
            return 0.0;
        }
        *self.buffer_position.read() as f64 / self.frames_per_second()
    }

    fn duration(&self) -> f64 {
        self.state.read().duration
    }

    fn is_finished(&self) -> bool {
        self.state.read().loaded && *self.buffer_position.read() >= self.sample_buffer.read().len()
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        let _ = self.command_tx.send(AudioCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn default_host() -> cpal::Host {
    #[cfg(target_os = "windows")]
    {
        cpal::host_from_id(cpal::HostId::Wasapi).unwrap_or_else(|_| cpal::default_host())
    }

    #[cfg(not(target_os = "windows"))]
    {
        cpal::default_host()
    }
}

/// Interleaved f32 samples of a whole track
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    pub fn duration(&self) -> f64 {
        let per_second = self.sample_rate as f64 * self.channels.max(1) as f64;
        self.samples.len() as f64 / per_second
    }
}

/// Decode an entire file into memory
pub fn decode_file(path: &Path) -> std::result::Result<DecodedAudio, AudioError> {
    if !path.exists() {
        return Err(AudioError::FileNotFound(path.to_string_lossy().into_owned()));
    }

    let file = std::fs::File::open(path).map_err(|e| AudioError::FileNotFound(e.to_string()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AudioError::Decode(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(AudioError::UnsupportedFormat)?;
    let track_id = track.id;

    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(2);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AudioError::Decode(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(_)) => break,
            Err(e) => {
                log::warn!("Error reading packet: {}", e);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count() as u16;

                let needed = decoded.capacity() * spec.channels.count();
                if sample_buf.as_ref().map_or(true, |buf| buf.capacity() < needed) {
                    sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                }
                if let Some(buf) = sample_buf.as_mut() {
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
            }
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("Decode error: {}", e);
            }
            Err(e) => return Err(AudioError::Decode(e.to_string())),
        }
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

/// Owns the non-`Send` output stream
struct AudioThread {
    host: cpal::Host,
    stream: Option<cpal::Stream>,
    state: Arc<RwLock<OutputState>>,
    sample_buffer: Arc<RwLock<Vec<f32>>>,
    buffer_position: Arc<RwLock<usize>>,
    command_rx: Receiver<AudioCommand>,
}

impl AudioThread {
    fn run(mut self) {
        while let Ok(command) = self.command_rx.recv() {
            match command {
                AudioCommand::Load(path, reply) => {
                    let result = self.load_internal(&path);
                    if let Err(e) = &result {
                        log::error!("Playback error for {:?}: {}", path, e);
                    }
                    let _ = reply.send(result);
                }
                AudioCommand::Stop => self.stop_internal(),
                AudioCommand::Shutdown => break,
            }
        }
        self.stop_internal();
        log::debug!("Audio thread exiting");
    }

    fn stop_internal(&mut self) {
        self.stream = None;
        let mut state = self.state.write();
        state.is_playing = false;
        state.loaded = false;
        drop(state);
        *self.buffer_position.write() = 0;
    }

    fn load_internal(&mut self, path: &Path) -> std::result::Result<f64, AudioError> {
        self.stop_internal();

        let decoded = decode_file(path)?;
        let duration = decoded.duration();
        let sample_rate = decoded.sample_rate;
        let channels = decoded.channels;
        log::debug!(
            "Decoded {:?}: {} Hz, {} channels, {:.1}s",
            path,
            sample_rate,
            channels,
            duration
        );

        *self.sample_buffer.write() = decoded.samples;
        *self.buffer_position.write() = 0;

        let device = self
            .host
            .default_output_device()
            .ok_or(AudioError::NoDevice)?;

        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let sample_buffer = Arc::clone(&self.sample_buffer);
        let buffer_position = Arc::clone(&self.buffer_position);
        let state = Arc::clone(&self.state);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let buffer = sample_buffer.read();
                    let mut pos = buffer_position.write();
                    let state = state.read();
                    let volume = state.volume;
                    let is_playing = state.is_playing;
                    drop(state);

                    for sample in data.iter_mut() {
                        if is_playing && *pos < buffer.len() {
                            *sample = buffer[*pos] * volume;
                            *pos += 1;
                        } else {
                            *sample = 0.0;
                        }
                    }
                },
                |err| {
                    log::error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::StreamBuild(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamBuild(e.to_string()))?;
        self.stream = Some(stream);

        let mut state = self.state.write();
        state.loaded = true;
        state.is_playing = false;
        state.sample_rate = sample_rate;
        state.channels = channels;
        state.duration = duration;

        Ok(duration)
    }
}
