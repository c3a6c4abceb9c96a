//! `autoaudiosrc` / `autoaudiosink`: the default cpal input and output
//! devices.
//!
//! A `cpal::Stream` is not `Send` on every platform, so each stream lives on
//! its own thread for as long as the node is Paused or Playing.  The node
//! talks to it through a channel (capture) or a shared sample queue
//! (playback).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::audio::{remix, resample};
use crate::graph::{
    lock, AudioChunk, Buffer, Caps, ElementContext, ElementImpl, Event, FlowError, FlowResult,
    PropertyError, State, StateChangeError, StateTransition, Value,
};

/// Captured chunks buffered while nobody pulls them.
const CAPTURE_QUEUE: usize = 64;
/// Playback queue limit before `chain` blocks.
const MAX_QUEUED: Duration = Duration::from_millis(500);
/// Extra time allowed for the device to play out its queue at EOS.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// StreamThread
// ---------------------------------------------------------------------------

/// Owns a cpal stream on a dedicated thread until dropped.
struct StreamThread {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Run `build` on a new thread and keep its stream playing there.
    /// Whatever `build` returns next to the stream is handed back.
    fn spawn<T, F>(name: String, build: F) -> Result<(Self, T), StateChangeError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<(cpal::Stream, T), String> + Send + 'static,
    {
        let (ready_tx, ready_rx) = bounded::<Result<T, String>>(1);
        let (stop, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || {
                let (stream, info) = match build() {
                    Ok(built) => built,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(format!("failed to start audio stream: {e}")));
                    return;
                }
                let _ = ready_tx.send(Ok(info));
                // Blocks until a stop request or the owner is dropped.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| StateChangeError::Thread(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(info)) => Ok((
                Self {
                    stop,
                    handle: Some(handle),
                },
                info,
            )),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(StateChangeError::Resource(e))
            }
            Err(_) => {
                let _ = handle.join();
                Err(StateChangeError::Thread("audio thread exited early".into()))
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        let _ = self.stop.try_send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn no_property(name: &str) -> PropertyError {
    PropertyError::Unknown(name.to_owned())
}

// ---------------------------------------------------------------------------
// AutoAudioSrc
// ---------------------------------------------------------------------------

/// Live capture from the default input device.
#[derive(Default)]
pub struct AutoAudioSrc {
    stream: Option<StreamThread>,
    chunks: Option<Receiver<AudioChunk>>,
}

impl AutoAudioSrc {
    fn open(&mut self, name: &str) -> Result<(), StateChangeError> {
        let (tx, rx) = bounded::<AudioChunk>(CAPTURE_QUEUE);
        let (stream, ()) = StreamThread::spawn(format!("{name}:capture"), move || {
            let host = cpal::default_host();
            let device = host
                .default_input_device()
                .ok_or("no input device found on the default audio host")?;
            let supported = device
                .default_input_config()
                .map_err(|e| format!("failed to query default input config: {e}"))?;
            let channels = supported.channels();
            let sample_rate = supported.sample_rate().0;
            let config: cpal::StreamConfig = supported.into();
            log::info!("autoaudiosrc: capturing {sample_rate} Hz × {channels} ch");

            let stream = device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let chunk = AudioChunk::new(data.to_vec(), sample_rate, channels);
                        if let Err(TrySendError::Full(_)) = tx.try_send(chunk) {
                            log::trace!("autoaudiosrc: queue full, chunk dropped");
                        }
                    },
                    |err: cpal::StreamError| log::error!("cpal stream error: {err}"),
                    None,
                )
                .map_err(|e| format!("failed to build input stream: {e}"))?;
            Ok((stream, ()))
        })?;
        self.stream = Some(stream);
        self.chunks = Some(rx);
        Ok(())
    }
}

impl ElementImpl for AutoAudioSrc {
    fn src_caps(&self) -> Option<Caps> {
        Some(Caps::RawAudio)
    }

    fn set_property(&mut self, name: &str, _: &Value, _: State) -> Result<(), PropertyError> {
        Err(no_property(name))
    }

    fn property(&self, name: &str) -> Result<Value, PropertyError> {
        Err(no_property(name))
    }

    fn change_state(
        &mut self,
        ctx: &ElementContext<'_>,
        transition: StateTransition,
    ) -> Result<(), StateChangeError> {
        match transition {
            StateTransition::ReadyToPaused => self.open(ctx.name())?,
            StateTransition::PausedToPlaying => {
                // Discard what piled up while paused.
                if let Some(rx) = &self.chunks {
                    while rx.try_recv().is_ok() {}
                }
            }
            StateTransition::PausedToReady => {
                self.stream = None;
                self.chunks = None;
            }
            _ => {}
        }
        Ok(())
    }

    fn create(&mut self, ctx: &ElementContext<'_>) -> FlowResult<Option<Buffer>> {
        let rx = self.chunks.as_ref().ok_or(FlowError::Flushing)?;
        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(chunk) => Ok(Some(Buffer::Audio(chunk))),
            Err(RecvTimeoutError::Timeout) if ctx.is_flushing() => Err(FlowError::Flushing),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(FlowError::Error("capture stream stopped".into()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// AutoAudioSink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct OutputFormat {
    sample_rate: u32,
    channels: u16,
}

/// Playback through the default output device.
#[derive(Default)]
pub struct AutoAudioSink {
    stream: Option<StreamThread>,
    queue: Arc<Mutex<VecDeque<f32>>>,
    format: Option<OutputFormat>,
}

impl AutoAudioSink {
    fn open(&mut self, name: &str) -> Result<(), StateChangeError> {
        let queue = Arc::clone(&self.queue);
        let (stream, format) = StreamThread::spawn(format!("{name}:playback"), move || {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or("no output device found on the default audio host")?;
            let supported = device
                .default_output_config()
                .map_err(|e| format!("failed to query default output config: {e}"))?;
            let format = OutputFormat {
                sample_rate: supported.sample_rate().0,
                channels: supported.channels(),
            };
            let config: cpal::StreamConfig = supported.into();

            let stream = device
                .build_output_stream(
                    &config,
                    move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut queue = lock(&queue);
                        for sample in out.iter_mut() {
                            *sample = queue.pop_front().unwrap_or(0.0);
                        }
                    },
                    |err: cpal::StreamError| log::error!("cpal stream error: {err}"),
                    None,
                )
                .map_err(|e| format!("failed to build output stream: {e}"))?;
            Ok((stream, format))
        })?;
        log::info!(
            "autoaudiosink: playing at {} Hz × {} ch",
            format.sample_rate,
            format.channels
        );
        self.stream = Some(stream);
        self.format = Some(format);
        Ok(())
    }

    fn queued(&self) -> Duration {
        let Some(format) = self.format else {
            return Duration::ZERO;
        };
        let samples = lock(&self.queue).len();
        let per_second = format.sample_rate as usize * format.channels.max(1) as usize;
        Duration::from_secs_f64(samples as f64 / per_second.max(1) as f64)
    }

    /// Wait for the device to play everything queued.
    fn drain(&self, ctx: &ElementContext<'_>) {
        let deadline = Instant::now() + self.queued() + DRAIN_GRACE;
        while !lock(&self.queue).is_empty() {
            if ctx.is_flushing() || Instant::now() >= deadline {
                lock(&self.queue).clear();
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
}

impl ElementImpl for AutoAudioSink {
    fn sink_caps(&self) -> Option<Caps> {
        Some(Caps::RawAudio)
    }

    fn set_property(&mut self, name: &str, _: &Value, _: State) -> Result<(), PropertyError> {
        Err(no_property(name))
    }

    fn property(&self, name: &str) -> Result<Value, PropertyError> {
        Err(no_property(name))
    }

    fn change_state(
        &mut self,
        ctx: &ElementContext<'_>,
        transition: StateTransition,
    ) -> Result<(), StateChangeError> {
        match transition {
            StateTransition::ReadyToPaused => self.open(ctx.name())?,
            StateTransition::PlayingToPaused => lock(&self.queue).clear(),
            StateTransition::PausedToReady => {
                self.stream = None;
                self.format = None;
                lock(&self.queue).clear();
            }
            _ => {}
        }
        Ok(())
    }

    fn chain(&mut self, ctx: &ElementContext<'_>, buffer: Buffer) -> FlowResult {
        let Buffer::Audio(chunk) = buffer else {
            return Err(FlowError::NotNegotiated("expected raw audio".into()));
        };
        let format = self.format.ok_or(FlowError::Flushing)?;

        let samples = remix(&chunk.samples, chunk.channels, format.channels);
        let samples = resample(&samples, format.channels, chunk.sample_rate, format.sample_rate);

        while self.queued() > MAX_QUEUED {
            if ctx.is_flushing() {
                return Err(FlowError::Flushing);
            }
            thread::sleep(Duration::from_millis(5));
        }
        lock(&self.queue).extend(samples);
        Ok(())
    }

    fn event(&mut self, ctx: &ElementContext<'_>, event: Event) -> bool {
        match event {
            Event::Eos => {
                self.drain(ctx);
                ctx.post_eos();
            }
            Event::FlushStart => lock(&self.queue).clear(),
            _ => {}
        }
        true
    }
}
