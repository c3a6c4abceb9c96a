//! Play an audio file to completion.
//!
//! Topology: `filesrc name=fsrc ! wavparse ! audioconvert ! audioresample !
//! <sink> name=sink`, built once and reused for every file.
//!
//! ```text
//!   start_playing ──▶ Playing ──(EOS on bus)──▶ finished ──▶ stop_playing ──▶ idle
//!        │                │
//!        │                └─(stop_playing)──▶ idle
//!        └─ notifier thread waits on the latch and emits `on_stop`
//! ```
//!
//! An engine error ends the session from the bus thread: the pipeline goes
//! to Null and no `on_stop` is emitted.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::error::{fatal, ControlError};
use super::latch::{CompletionLatch, WaitOutcome};
use super::notify::{PlaybackStarted, PlaybackStopped};
use crate::config::PlaybackConfig;
use crate::graph::{lock, Element, Message, Pipeline, State};
use crate::signal::{Signal, SubscriptionId};

const COMPONENT: &str = "playback";

/// State reachable from the bus thread and the notifier threads.
#[derive(Default)]
struct Shared {
    latch: CompletionLatch,
    /// File of the current session, `None` when idle.
    session: Mutex<Option<PathBuf>>,
    started: Signal<PlaybackStarted>,
    stopped: Signal<PlaybackStopped>,
}

impl Shared {
    fn handle(&self, pipeline: &Weak<Pipeline>, message: &Message) {
        if !self.latch.observe(COMPONENT, message) {
            return;
        }
        let Some(file) = lock(&self.session).take() else {
            return;
        };
        log::error!("playback: {} aborted after an engine error", file.display());
        if let Some(pipeline) = pipeline.upgrade() {
            if !pipeline.set_state(State::Null, false) {
                log::error!("playback: pipeline did not return to Null after the error");
            }
        }
    }
}

/// Plays one file at a time through a fixed pipeline.
pub struct PlaybackController {
    pipeline: Arc<Pipeline>,
    source: Element,
    shared: Arc<Shared>,
    notifiers: Mutex<Vec<JoinHandle<()>>>,
    completion_timeout: Duration,
}

impl PlaybackController {
    /// Build the playback pipeline.
    ///
    /// # Errors
    ///
    /// [`ControlError::Construction`] when the sink description does not
    /// name a usable node.
    pub fn new(config: &PlaybackConfig) -> Result<Self, ControlError> {
        let description = format!(
            "filesrc name=fsrc ! wavparse ! audioconvert ! audioresample ! {} name=sink",
            config.sink
        );
        let pipeline = Pipeline::parse(&description).map_err(|e| {
            fatal(
                COMPONENT,
                ControlError::Construction(format!("playback pipeline: {e}")),
            )
        })?;
        let pipeline = Arc::new(pipeline);
        let source = pipeline.by_name("fsrc");

        let shared = Arc::new(Shared::default());
        let handler = Arc::clone(&shared);
        let target = Arc::downgrade(&pipeline);
        pipeline.set_bus_callback(move |message| handler.handle(&target, message));

        log::info!("playback: ready ({})", config.sink);
        Ok(Self {
            pipeline,
            source,
            shared,
            notifiers: Mutex::new(Vec::new()),
            completion_timeout: Duration::from_secs(config.completion_timeout_secs),
        })
    }

    /// Start playing `path` without waiting for it to finish.
    ///
    /// Returns `false` without side effects while another file is still
    /// playing.  Otherwise `on_start` fires with the outcome of the attempt,
    /// and on success `on_stop` fires once the session ends.
    pub fn start_playing(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref().to_path_buf();
        let mut session = lock(&self.shared.session);
        if session.is_some() && self.shared.latch.is_pending() {
            log::warn!(
                "playback: already playing, {} rejected",
                path.display()
            );
            return false;
        }

        let generation = self.begin_session(&path);
        *session = generation.map(|_| path.clone());
        drop(session);

        let accepted = generation.is_some();
        log::info!(
            "playback: start {} ({})",
            path.display(),
            if accepted { "accepted" } else { "refused" }
        );
        self.shared.started.emit(&PlaybackStarted {
            file: path.clone(),
            accepted,
        });
        if let Some(generation) = generation {
            self.spawn_notifier(generation, path);
        }
        accepted
    }

    /// Reconfigure the source and request Playing.  Returns the latch
    /// generation of the new session.
    fn begin_session(&self, path: &Path) -> Option<u64> {
        // A finished session leaves the pipeline Playing; `location` is only
        // writable up to Ready.
        if self.pipeline.state() > State::Ready && !self.pipeline.set_state(State::Ready, false) {
            log::error!("playback: previous session could not be released");
            return None;
        }
        if let Err(e) = self.source.set_property("location", path) {
            log::error!("playback: cannot play {}: {e}", path.display());
            return None;
        }

        let generation = self.shared.latch.begin();
        if self.pipeline.set_state(State::Playing, true) {
            return Some(generation);
        }
        self.shared.latch.deactivate();
        self.pipeline.set_state(State::Null, false);
        None
    }

    fn spawn_notifier(&self, generation: u64, file: PathBuf) {
        let shared = Arc::clone(&self.shared);
        let bound = self.completion_timeout;
        let spawned = thread::Builder::new()
            .name("playback-notifier".into())
            .spawn(move || match shared.latch.wait(generation, bound) {
                WaitOutcome::Finished => shared.stopped.emit(&PlaybackStopped { file }),
                WaitOutcome::Failed(err) => {
                    log::debug!("playback: {} ended with an error: {err}", file.display());
                }
                WaitOutcome::TimedOut => {
                    log::warn!("playback: {} still playing after {bound:?}", file.display());
                }
                WaitOutcome::Superseded => {
                    log::debug!("playback: session {generation} superseded");
                }
            });

        match spawned {
            Ok(handle) => {
                let mut notifiers = lock(&self.notifiers);
                notifiers.retain(|h| !h.is_finished());
                notifiers.push(handle);
            }
            Err(e) => log::error!("playback: failed to spawn notifier: {e}"),
        }
    }

    /// End the current session and release the pipeline.  A no-op when
    /// nothing was started.
    pub fn stop_playing(&self) -> Result<(), ControlError> {
        let mut session = lock(&self.shared.session);
        let Some(file) = session.take() else {
            return Ok(());
        };
        self.shared.latch.force_finish();
        self.shared.latch.deactivate();

        if !self.pipeline.set_state(State::Null, false) {
            return Err(fatal(
                COMPONENT,
                ControlError::Transition {
                    target: State::Null,
                    context: format!("stopping {}", file.display()),
                },
            ));
        }
        log::info!("playback: stopped {}", file.display());
        Ok(())
    }

    /// Block until the current session finishes or `bound` elapses.
    ///
    /// `Ok(true)` once end-of-stream or an explicit stop was observed; the
    /// result stays `true` until the next `start_playing`.
    ///
    /// # Errors
    ///
    /// [`ControlError::Engine`] when the bus reported an error first.
    pub fn wait_for_completion(&self, bound: Duration) -> Result<bool, ControlError> {
        match self.shared.latch.wait_current(bound) {
            WaitOutcome::Finished => Ok(true),
            // Logged by the bus handler.
            WaitOutcome::Failed(err) => Err(ControlError::Engine(err)),
            WaitOutcome::TimedOut | WaitOutcome::Superseded => Ok(false),
        }
    }

    /// Play `path` to the end, then release the pipeline.
    ///
    /// # Errors
    ///
    /// - [`ControlError::Transition`] when playback could not start.
    /// - [`ControlError::Timeout`] when the file is still playing after the
    ///   configured completion timeout.  The session is left running.
    /// - [`ControlError::Engine`] when the pipeline failed; the session is
    ///   stopped.
    pub fn play_file(&self, path: impl AsRef<Path>) -> Result<(), ControlError> {
        let path = path.as_ref();
        if !self.start_playing(path) {
            return Err(fatal(
                COMPONENT,
                ControlError::Transition {
                    target: State::Playing,
                    context: format!("could not start {}", path.display()),
                },
            ));
        }

        match self.wait_for_completion(self.completion_timeout) {
            Ok(true) => self.stop_playing(),
            Ok(false) => Err(fatal(
                COMPONENT,
                ControlError::Timeout {
                    operation: "play file",
                    bound: self.completion_timeout,
                },
            )),
            Err(err) => {
                if let Err(stop) = self.stop_playing() {
                    log::warn!("playback: cleanup after failure: {stop}");
                }
                Err(err)
            }
        }
    }

    /// `true` between an accepted start and the end of that session.
    pub fn is_playing(&self) -> bool {
        lock(&self.shared.session).is_some() && self.shared.latch.is_pending()
    }

    pub fn on_start<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&PlaybackStarted) + Send + Sync + 'static,
    {
        self.shared.started.connect(handler)
    }

    pub fn on_stop<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&PlaybackStopped) + Send + Sync + 'static,
    {
        self.shared.stopped.connect(handler)
    }

    pub fn disconnect(&self, id: SubscriptionId) -> bool {
        self.shared.started.disconnect(id) || self.shared.stopped.disconnect(id)
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        if let Err(e) = self.stop_playing() {
            log::warn!("playback: teardown: {e}");
        }
        self.pipeline.clear_bus_callback();
        for handle in lock(&self.notifiers).drain(..) {
            if handle.join().is_err() {
                log::error!("playback: notifier thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for PlaybackController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackController")
            .field("pipeline", &self.pipeline)
            .field("session", &*lock(&self.shared.session))
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::wav::tests::write_clip;
    use crossbeam_channel::{unbounded, Receiver};
    use std::thread;
    use std::time::Instant;
    use tempfile::{tempdir, TempDir};

    #[derive(Debug, PartialEq)]
    enum Note {
        Start(String, bool),
        Stop(String),
    }

    fn controller(sink: &str) -> PlaybackController {
        PlaybackController::new(&PlaybackConfig {
            sink: sink.into(),
            completion_timeout_secs: 10,
        })
        .expect("controller")
    }

    fn record(controller: &PlaybackController) -> Receiver<Note> {
        let (tx, rx) = unbounded();
        let start_tx = tx.clone();
        controller.on_start(move |n| {
            let name = n.file.file_name().unwrap().to_string_lossy().into_owned();
            let _ = start_tx.send(Note::Start(name, n.accepted));
        });
        controller.on_stop(move |n| {
            let name = n.file.file_name().unwrap().to_string_lossy().into_owned();
            let _ = tx.send(Note::Stop(name));
        });
        rx
    }

    fn clip(millis: u32) -> (TempDir, PathBuf) {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("clip.wav");
        write_clip(&path, 16_000, 1, millis);
        (dir, path)
    }

    #[test]
    fn play_file_runs_to_completion() {
        let (_dir, path) = clip(200);
        let playback = controller("fakesink sync=true");
        let notes = record(&playback);

        playback.play_file(&path).expect("play");
        assert!(!playback.is_playing());

        let timeout = Duration::from_secs(5);
        assert_eq!(
            notes.recv_timeout(timeout).unwrap(),
            Note::Start("clip.wav".into(), true)
        );
        assert_eq!(
            notes.recv_timeout(timeout).unwrap(),
            Note::Stop("clip.wav".into())
        );
    }

    #[test]
    fn stop_without_start_is_silent() {
        let playback = controller("fakesink");
        let notes = record(&playback);
        playback.stop_playing().expect("stop");
        assert!(!playback.is_playing());
        assert_eq!(playback.pipeline.state(), State::Null);
        assert!(notes.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn second_start_is_rejected_while_playing() {
        let (_dir, path) = clip(2_000);
        let playback = controller("fakesink sync=true");
        let notes = record(&playback);

        assert!(playback.start_playing(&path));
        assert!(playback.is_playing());
        assert!(!playback.start_playing(&path));
        assert!(playback.is_playing());

        playback.stop_playing().expect("stop");
        assert!(!playback.is_playing());
        assert!(playback.wait_for_completion(Duration::ZERO).unwrap());

        let timeout = Duration::from_secs(5);
        assert_eq!(
            notes.recv_timeout(timeout).unwrap(),
            Note::Start("clip.wav".into(), true)
        );
        // Only one start was attempted; the explicit stop ends the session.
        assert_eq!(
            notes.recv_timeout(timeout).unwrap(),
            Note::Stop("clip.wav".into())
        );
    }

    #[test]
    fn completion_persists_until_next_start() {
        let (_dir, path) = clip(100);
        let playback = controller("fakesink");

        assert!(playback.start_playing(&path));
        assert!(playback.wait_for_completion(Duration::from_secs(5)).unwrap());
        assert!(playback.wait_for_completion(Duration::ZERO).unwrap());
        assert!(!playback.is_playing());

        // Natural completion frees the controller for the next file.
        assert!(playback.start_playing(&path));
        assert!(playback.wait_for_completion(Duration::from_secs(5)).unwrap());
        playback.stop_playing().expect("stop");
    }

    #[test]
    fn missing_file_is_refused_and_reported() {
        let dir = tempdir().expect("temp dir");
        let playback = controller("fakesink");
        let notes = record(&playback);

        assert!(!playback.start_playing(dir.path().join("absent.wav")));
        assert!(!playback.is_playing());
        assert_eq!(
            notes.recv_timeout(Duration::from_secs(1)).unwrap(),
            Note::Start("absent.wav".into(), false)
        );
        assert!(matches!(
            playback.play_file(dir.path().join("absent.wav")),
            Err(ControlError::Transition { .. })
        ));
    }

    #[test]
    fn engine_error_ends_the_wait_early() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("broken.wav");
        std::fs::write(&path, b"definitely not a riff header").unwrap();
        let playback = controller("fakesink");

        let started = Instant::now();
        match playback.play_file(&path) {
            Err(ControlError::Engine(err)) => assert_eq!(err.code, crate::graph::error_code::DECODE),
            other => panic!("expected engine error, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!playback.is_playing());
    }

    #[test]
    fn engine_error_aborts_a_running_session() {
        let (_dir, path) = clip(3_000);
        let playback = controller("fakesink sync=true");
        let notes = record(&playback);

        assert!(playback.start_playing(&path));
        assert!(playback.pipeline.post(Message::Error {
            source: "sink".into(),
            code: crate::graph::error_code::STREAM,
            description: "output device lost".into(),
        }));

        let released = || {
            lock(&playback.shared.session).is_none() && playback.pipeline.state() == State::Null
        };
        let deadline = Instant::now() + Duration::from_secs(6);
        while !released() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(released());
        assert!(!playback.is_playing());
        assert!(matches!(
            playback.wait_for_completion(Duration::ZERO),
            Err(ControlError::Engine(_))
        ));

        assert_eq!(
            notes.recv_timeout(Duration::from_secs(1)).unwrap(),
            Note::Start("clip.wav".into(), true)
        );
        assert!(notes.recv_timeout(Duration::from_millis(200)).is_err());

        // The controller accepts the next file.
        assert!(playback.start_playing(&path));
        playback.stop_playing().expect("stop");
    }

    #[test]
    fn unknown_sink_fails_construction() {
        let err = PlaybackController::new(&PlaybackConfig {
            sink: "nosuchsink".into(),
            ..PlaybackConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, ControlError::Construction(_)));
    }

    #[test]
    fn disconnected_handler_is_not_called() {
        let (_dir, path) = clip(50);
        let playback = controller("fakesink");
        let (tx, rx) = unbounded();
        let id = playback.on_start(move |n| {
            let _ = tx.send(n.accepted);
        });
        assert!(playback.disconnect(id));
        assert!(!playback.disconnect(id));

        playback.play_file(&path).expect("play");
        assert!(rx.try_recv().is_err());
    }
}
