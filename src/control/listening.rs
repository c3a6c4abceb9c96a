//! Capture live audio and report recognised phrases.
//!
//! Topology: `<source> name=asrc ! audioconvert channels=1 ! audioresample
//! rate=16000 ! recognizer name=asr ! fakesink name=sink`.
//!
//! The pipeline is brought to Ready at construction and cycles between
//! Ready and Playing afterwards.  `stop_listening` drains gracefully: it
//! injects end-of-stream at the capture source, so the recognizer closes the
//! last utterance before the sink acknowledges on the bus.
//!
//! # Threading
//!
//! `on_result` handlers run on the pipeline's bus dispatch thread.  They may
//! query the controller (`is_listening`, `mode`, ...) but must not call
//! `start_listening`, `stop_listening`, `set_mode` or `set_language`, which
//! may wait for that thread.
//!
//! An engine error during a session aborts it: the bus handler clears
//! `is_listening` and returns the pipeline to Ready.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::error::{fatal, ControlError};
use super::latch::{CompletionLatch, WaitOutcome};
use super::notify::{ListeningStarted, ListeningStopped, RecognitionResult};
use crate::audio::RECOGNITION_RATE;
use crate::config::ListeningConfig;
use crate::decoder::{into_handle, Decoder, DecoderError, DecoderHandle, SearchMode, SearchSet};
use crate::elements::recognizer::RESULT_MESSAGE;
use crate::graph::{lock, Event, Message, Pipeline, State};
use crate::signal::{Signal, SubscriptionId};

const COMPONENT: &str = "listening";

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct Session {
    /// `None` after a failed rebuild; every start is refused until a
    /// `set_language` succeeds.
    pipeline: Option<Arc<Pipeline>>,
    language: String,
    mode: SearchMode,
    listening: bool,
}

// ---------------------------------------------------------------------------
// Shared (bus side)
// ---------------------------------------------------------------------------

/// Reached from the bus thread through a weak reference.  The session lock
/// is only ever held briefly, so handlers may query the controller.
struct Shared {
    latch: CompletionLatch,
    session: Mutex<Session>,
    started: Signal<ListeningStarted>,
    stopped: Signal<ListeningStopped>,
    results: Signal<RecognitionResult>,
}

impl Shared {
    fn new(language: String, mode: SearchMode) -> Self {
        Self {
            latch: CompletionLatch::new(),
            session: Mutex::new(Session {
                pipeline: None,
                language,
                mode,
                listening: false,
            }),
            started: Signal::new(),
            stopped: Signal::new(),
            results: Signal::new(),
        }
    }

    fn handle(&self, message: &Message) {
        match message {
            Message::Element { structure, .. } if structure.has_name(RESULT_MESSAGE) => {
                let text = structure.get::<String>("hypothesis").unwrap_or_default();
                let success = structure.get::<bool>("final").unwrap_or(false) && !text.is_empty();
                log::info!("listening: recognised \"{text}\"");
                self.results.emit(&RecognitionResult { text, success });
            }
            other => {
                if self.latch.observe(COMPONENT, other) {
                    self.abort();
                }
            }
        }
    }

    /// End a session the engine failed.  A stop in progress has already
    /// cleared `listening` and reports the error itself.
    fn abort(&self) {
        let pipeline = {
            let mut session = lock(&self.session);
            if !session.listening {
                return;
            }
            session.listening = false;
            session.pipeline.clone()
        };
        log::error!("listening: session aborted after an engine error");
        if let Some(pipeline) = pipeline {
            if !pipeline.set_state(State::Ready, false) {
                log::error!("listening: pipeline did not return to Ready after the error");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ListeningController
// ---------------------------------------------------------------------------

/// Drives one capture → recognizer pipeline.
pub struct ListeningController {
    config: ListeningConfig,
    decoder: DecoderHandle,
    shared: Arc<Shared>,
    /// Serialises start, stop and reconfiguration.
    control: Mutex<()>,
    stop_timeout: Duration,
}

impl ListeningController {
    /// Load the Whisper model named by `config.model` and initialise.
    ///
    /// # Errors
    ///
    /// [`ControlError::Construction`] when no decoder can be loaded, plus
    /// everything [`with_decoder`](Self::with_decoder) reports.
    pub fn new(config: ListeningConfig) -> Result<Self, ControlError> {
        let decoder = load_decoder(&config)?;
        Self::with_decoder(config, decoder)
    }

    /// Initialise around an already constructed decoder.
    ///
    /// Loads the key phrase and grammar for `config.language`, activates
    /// `config.mode`, then brings the pipeline to Ready.
    ///
    /// # Errors
    ///
    /// - [`ControlError::Configuration`] when the decoder rejects a resource
    ///   or the mode.
    /// - [`ControlError::Construction`] when the pipeline cannot be built.
    /// - [`ControlError::Transition`] when Ready is not reached.
    pub fn with_decoder(
        config: ListeningConfig,
        decoder: Box<dyn Decoder>,
    ) -> Result<Self, ControlError> {
        let decoder = into_handle(decoder);
        let language = config.language.clone();

        configure(&mut **lock(&decoder), &config, &language, config.mode)
            .map_err(|e| fatal(COMPONENT, ControlError::Configuration(format!("{language}: {e}"))))?;
        let shared = Arc::new(Shared::new(language.clone(), config.mode));
        let pipeline = build_pipeline(&config, &decoder, &shared)?;
        lock(&shared.session).pipeline = Some(pipeline);

        log::info!("listening: initialised for {language}, {} search", config.mode);
        Ok(Self {
            stop_timeout: Duration::from_secs(config.stop_timeout_secs),
            config,
            decoder,
            shared,
            control: Mutex::new(()),
        })
    }

    /// Start capturing.
    ///
    /// Refused when already listening, when not initialised, or when no
    /// search is active.  `on_start` fires only when a start was attempted.
    pub fn start_listening(&self) -> bool {
        let _control = lock(&self.control);
        let (pipeline, mode) = {
            let session = lock(&self.shared.session);
            if session.listening {
                log::warn!("listening: already listening");
                return false;
            }
            if session.mode == SearchMode::None {
                log::warn!("listening: no search active, start refused");
                return false;
            }
            let Some(pipeline) = session.pipeline.clone() else {
                log::warn!("listening: not initialised, start refused");
                return false;
            };
            (pipeline, session.mode)
        };

        let ready = pipeline.state() == State::Ready || pipeline.set_state(State::Ready, false);
        let mut accepted = false;
        if ready {
            // Marked first, so an engine error during the request aborts it.
            lock(&self.shared.session).listening = true;
            self.shared.latch.begin();
            accepted = pipeline.set_state(State::Playing, true);
            if !accepted {
                lock(&self.shared.session).listening = false;
                self.shared.latch.deactivate();
                pipeline.set_state(State::Ready, false);
            }
        }

        log::info!(
            "listening: start in {mode} mode ({})",
            if accepted { "accepted" } else { "refused" }
        );
        self.shared.started.emit(&ListeningStarted { mode, accepted });
        accepted
    }

    /// Drain and stop capturing.  A no-op when not listening.
    ///
    /// # Errors
    ///
    /// - [`ControlError::Engine`] when the bus reported an error before the
    ///   end-of-stream acknowledgement.
    /// - [`ControlError::Timeout`] when no acknowledgement arrived within the
    ///   stop timeout.  The pipeline is left as it is.
    /// - [`ControlError::Transition`] when Ready is not reached afterwards.
    pub fn stop_listening(&self) -> Result<(), ControlError> {
        let _control = lock(&self.control);
        let pipeline = {
            let mut session = lock(&self.shared.session);
            if !session.listening {
                log::debug!("listening: stop ignored, not listening");
                return Ok(());
            }
            session.listening = false;
            session.pipeline.clone()
        };
        let Some(pipeline) = pipeline else {
            return Ok(());
        };

        // Let a start still in flight reach Playing before draining.
        pipeline.state();
        if !pipeline.by_name("asrc").send_event(Event::Eos) {
            log::warn!("listening: capture source refused end-of-stream");
        }
        let outcome = self.shared.latch.wait_current(self.stop_timeout);
        self.shared.latch.deactivate();

        match outcome {
            WaitOutcome::Finished => {}
            WaitOutcome::Failed(err) => {
                pipeline.set_state(State::Ready, false);
                // Logged by the bus handler.
                return Err(ControlError::Engine(err));
            }
            WaitOutcome::TimedOut | WaitOutcome::Superseded => {
                return Err(fatal(
                    COMPONENT,
                    ControlError::Timeout {
                        operation: "stop listening",
                        bound: self.stop_timeout,
                    },
                ));
            }
        }

        if !pipeline.set_state(State::Ready, false) {
            return Err(fatal(
                COMPONENT,
                ControlError::Transition {
                    target: State::Ready,
                    context: "stopping capture".into(),
                },
            ));
        }

        log::info!("listening: stopped");
        self.shared.stopped.emit(&ListeningStopped);
        Ok(())
    }

    /// Switch the active search.  `Ok(false)` while listening.
    ///
    /// # Errors
    ///
    /// [`ControlError::Configuration`] when the search for `mode` is not
    /// loaded.
    pub fn set_mode(&self, mode: SearchMode) -> Result<bool, ControlError> {
        let _control = lock(&self.control);
        if self.is_listening() {
            log::warn!("listening: cannot change mode while listening");
            return Ok(false);
        }
        lock(&self.decoder)
            .activate_mode(mode)
            .map_err(|e| fatal(COMPONENT, ControlError::Configuration(e.to_string())))?;
        lock(&self.shared.session).mode = mode;
        Ok(true)
    }

    /// Switch language: reload `<lang_dir>/<language>/<language>.key|.jsgf`
    /// and rebuild the pipeline around the same decoder.  `Ok(false)` while
    /// listening.
    ///
    /// Added vocabulary is kept.  On failure the controller is left
    /// uninitialised until a later `set_language` succeeds.
    ///
    /// # Errors
    ///
    /// As for [`with_decoder`](Self::with_decoder).
    pub fn set_language(&self, language: &str) -> Result<bool, ControlError> {
        let _control = lock(&self.control);
        let (old, mode) = {
            let mut session = lock(&self.shared.session);
            if session.listening {
                log::warn!("listening: cannot change language while listening");
                return Ok(false);
            }
            if session.language == language && session.pipeline.is_some() {
                return Ok(true);
            }
            (session.pipeline.take(), session.mode)
        };
        // Dropping a pipeline joins its bus thread, whose handlers lock the
        // session.
        drop(old);

        {
            let mut decoder = lock(&self.decoder);
            let mut searches = SearchSet::new();
            searches.lexicon_mut().extend(decoder.searches().lexicon());
            *decoder.searches_mut() = searches;
            configure(&mut **decoder, &self.config, language, mode).map_err(|e| {
                fatal(
                    COMPONENT,
                    ControlError::Configuration(format!("{language}: {e}")),
                )
            })?;
        }
        let pipeline = build_pipeline(&self.config, &self.decoder, &self.shared)?;
        {
            let mut session = lock(&self.shared.session);
            session.pipeline = Some(pipeline);
            session.language = language.to_owned();
        }

        log::info!("listening: language set to {language}");
        Ok(true)
    }

    /// Add word/pronunciation pairs to the vocabulary.  Returns how many
    /// were new.
    pub fn add_words(&self, words: &[(&str, &str)]) -> usize {
        let mut decoder = lock(&self.decoder);
        let mut added = 0;
        for (word, pronunciation) in words {
            if decoder.add_word(word, pronunciation) {
                added += 1;
            }
        }
        log::debug!("listening: {added} of {} words added", words.len());
        added
    }

    /// The shared decoder.  Reconfigure it only while not listening.
    pub fn decoder(&self) -> DecoderHandle {
        DecoderHandle::clone(&self.decoder)
    }

    pub fn mode(&self) -> SearchMode {
        lock(&self.shared.session).mode
    }

    pub fn language(&self) -> String {
        lock(&self.shared.session).language.clone()
    }

    pub fn is_listening(&self) -> bool {
        lock(&self.shared.session).listening
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.shared.session).pipeline.is_some()
    }

    pub fn on_start<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ListeningStarted) + Send + Sync + 'static,
    {
        self.shared.started.connect(handler)
    }

    pub fn on_stop<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ListeningStopped) + Send + Sync + 'static,
    {
        self.shared.stopped.connect(handler)
    }

    pub fn on_result<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&RecognitionResult) + Send + Sync + 'static,
    {
        self.shared.results.connect(handler)
    }

    pub fn disconnect(&self, id: SubscriptionId) -> bool {
        self.shared.started.disconnect(id)
            || self.shared.stopped.disconnect(id)
            || self.shared.results.disconnect(id)
    }
}

impl Drop for ListeningController {
    fn drop(&mut self) {
        if let Err(e) = self.stop_listening() {
            log::warn!("listening: teardown: {e}");
        }
        let pipeline = lock(&self.shared.session).pipeline.take();
        if let Some(pipeline) = pipeline {
            // No handler may outlive the controller on the bus thread.
            pipeline.clear_bus_callback();
        }
    }
}

impl std::fmt::Debug for ListeningController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = lock(&self.shared.session);
        f.debug_struct("ListeningController")
            .field("language", &session.language)
            .field("mode", &session.mode)
            .field("listening", &session.listening)
            .field("initialized", &session.pipeline.is_some())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Load searches for `language` and activate `mode`.  Inline phrases and
/// grammars win over the per-language files.
fn configure(
    decoder: &mut dyn Decoder,
    config: &ListeningConfig,
    language: &str,
    mode: SearchMode,
) -> Result<(), DecoderError> {
    decoder.set_language(language)?;

    match &config.key_phrase {
        Some(phrase) => decoder.set_key_phrase(phrase)?,
        None => {
            let file = config.resource_file(language, "key");
            if file.is_file() {
                decoder.set_key_file(&file)?;
            }
        }
    }
    match &config.grammar {
        Some(jsgf) => decoder.set_grammar(jsgf)?,
        None => {
            let file = config.resource_file(language, "jsgf");
            if file.is_file() {
                decoder.set_grammar_file(&file)?;
            }
        }
    }
    if let Some(lexicon) = &config.lexicon_file {
        decoder.load_lexicon(lexicon)?;
    }
    decoder.activate_mode(mode)
}

fn build_pipeline(
    config: &ListeningConfig,
    decoder: &DecoderHandle,
    shared: &Arc<Shared>,
) -> Result<Arc<Pipeline>, ControlError> {
    let description = format!(
        "{} name=asrc ! audioconvert channels=1 ! audioresample rate={RECOGNITION_RATE} \
         ! recognizer name=asr vad-threshold={} silence-ms={} ! fakesink name=sink",
        config.source, config.vad_threshold, config.silence_ms
    );
    let pipeline = Pipeline::parse(&description).map_err(|e| {
        fatal(
            COMPONENT,
            ControlError::Construction(format!("listening pipeline: {e}")),
        )
    })?;
    pipeline
        .by_name("asr")
        .set_property("decoder", DecoderHandle::clone(decoder))
        .map_err(|e| fatal(COMPONENT, ControlError::Construction(format!("recognizer: {e}"))))?;

    let handler = Arc::downgrade(shared);
    pipeline.set_bus_callback(move |message| {
        if let Some(shared) = handler.upgrade() {
            shared.handle(message);
        }
    });

    if !pipeline.set_state(State::Ready, false) {
        return Err(fatal(
            COMPONENT,
            ControlError::Transition {
                target: State::Ready,
                context: "listening pipeline initialisation".into(),
            },
        ));
    }
    Ok(Arc::new(pipeline))
}

#[cfg(feature = "whisper")]
fn load_decoder(config: &ListeningConfig) -> Result<Box<dyn Decoder>, ControlError> {
    let model = config.model.as_ref().ok_or_else(|| {
        fatal(
            COMPONENT,
            ControlError::Construction("no recognition model configured".into()),
        )
    })?;
    let decoder = crate::decoder::WhisperDecoder::load(model, config.vad_threshold as f32)
        .map_err(|e| fatal(COMPONENT, ControlError::Construction(e.to_string())))?;
    Ok(Box::new(decoder))
}

#[cfg(not(feature = "whisper"))]
fn load_decoder(_config: &ListeningConfig) -> Result<Box<dyn Decoder>, ControlError> {
    Err(fatal(
        COMPONENT,
        ControlError::Construction("built without a speech decoder".into()),
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::MockDecoder;
    use crate::graph::{error_code, Pad, ProbeInfo, ProbeReturn};
    use crossbeam_channel::unbounded;
    use std::path::Path;
    use std::thread;
    use std::time::Instant;
    use tempfile::tempdir;

    const LIVE_SOURCE: &str = "audiotestsrc is-live=true samplerate=16000 samples-per-buffer=320";

    fn config(lang_dir: &Path) -> ListeningConfig {
        ListeningConfig {
            source: LIVE_SOURCE.into(),
            lang_dir: lang_dir.to_path_buf(),
            key_phrase: Some("start build".into()),
            ..ListeningConfig::default()
        }
    }

    fn controller(config: ListeningConfig) -> ListeningController {
        ListeningController::with_decoder(config, Box::new(MockDecoder::hearing("please start build")))
            .expect("controller")
    }

    fn write_resource(dir: &Path, language: &str, extension: &str, content: &str) {
        let lang = dir.join(language);
        std::fs::create_dir_all(&lang).unwrap();
        std::fs::write(lang.join(format!("{language}.{extension}")), content).unwrap();
    }

    fn source_pad(controller: &ListeningController) -> Pad {
        lock(&controller.shared.session)
            .pipeline
            .as_ref()
            .expect("pipeline")
            .by_name("asrc")
            .src_pad()
    }

    fn swallow_eos(pad: &Pad) {
        pad.set_probe(|info| match info {
            ProbeInfo::Event(Event::Eos) => ProbeReturn::Drop,
            _ => ProbeReturn::Pass,
        });
    }

    #[test]
    fn start_and_stop_listening() {
        let dir = tempdir().expect("temp dir");
        let listening = controller(config(dir.path()));
        assert!(listening.is_initialized());

        let (tx, rx) = unbounded();
        let (start_tx, stop_tx) = (tx.clone(), tx.clone());
        listening.on_start(move |n| {
            let _ = start_tx.send(format!("start {} {}", n.mode, n.accepted));
        });
        listening.on_stop(move |_| {
            let _ = stop_tx.send("stop".to_owned());
        });
        listening.on_result(move |r| {
            let _ = tx.send(format!("result {} {}", r.text, r.success));
        });

        assert!(listening.start_listening());
        assert!(listening.is_listening());
        thread::sleep(Duration::from_millis(200));
        listening.stop_listening().expect("stop");
        assert!(!listening.is_listening());

        let got: Vec<String> = rx.try_iter().collect();
        assert_eq!(
            got,
            vec![
                "start key-phrase true".to_owned(),
                "result start build true".to_owned(),
                "stop".to_owned(),
            ]
        );

        // Ready again, so the cycle repeats.
        assert!(listening.start_listening());
        listening.stop_listening().expect("second stop");
    }

    #[test]
    fn stop_when_not_listening_is_silent() {
        let dir = tempdir().expect("temp dir");
        let listening = controller(config(dir.path()));
        let (tx, rx) = unbounded();
        listening.on_stop(move |_| {
            let _ = tx.send(());
        });
        listening.stop_listening().expect("stop");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn second_start_is_refused() {
        let dir = tempdir().expect("temp dir");
        let listening = controller(config(dir.path()));
        assert!(listening.start_listening());
        assert!(!listening.start_listening());
        assert!(listening.is_listening());
        listening.stop_listening().expect("stop");
    }

    #[test]
    fn mode_none_refuses_start() {
        let dir = tempdir().expect("temp dir");
        let listening = controller(ListeningConfig {
            mode: SearchMode::None,
            ..config(dir.path())
        });
        assert!(!listening.start_listening());
        assert!(listening.set_mode(SearchMode::KeyPhrase).unwrap());
        assert!(listening.start_listening());
        assert!(!listening.set_mode(SearchMode::None).unwrap());
        listening.stop_listening().expect("stop");
    }

    #[test]
    fn missing_search_fails_construction() {
        let dir = tempdir().expect("temp dir");
        let result = ListeningController::with_decoder(
            ListeningConfig {
                key_phrase: None,
                ..config(dir.path())
            },
            Box::new(MockDecoder::default()),
        );
        assert!(matches!(result, Err(ControlError::Configuration(_))));
    }

    #[test]
    fn unloaded_grammar_cannot_be_activated() {
        let dir = tempdir().expect("temp dir");
        let listening = controller(config(dir.path()));
        assert!(matches!(
            listening.set_mode(SearchMode::Grammar),
            Err(ControlError::Configuration(_))
        ));
        assert_eq!(listening.mode(), SearchMode::KeyPhrase);
    }

    #[test]
    fn resources_are_read_from_the_language_directory() {
        let dir = tempdir().expect("temp dir");
        write_resource(dir.path(), "en-US", "key", "# builds\nstart build /1e-20/\n");
        write_resource(dir.path(), "en-US", "jsgf", "#JSGF V1.0;\ngrammar cmd;\npublic <cmd> = (start | stop) build;\n");

        let listening = controller(ListeningConfig {
            key_phrase: None,
            mode: SearchMode::Grammar,
            ..config(dir.path())
        });
        let decoder = listening.decoder();
        let decoder = decoder.lock().unwrap();
        assert_eq!(decoder.mode(), SearchMode::Grammar);
        assert_eq!(decoder.searches().key_phrases()[0].phrase, "start build");
        assert!(decoder.searches().grammar().is_some_and(|g| g.accepts("stop build")));
    }

    #[test]
    fn set_language_rebuilds_and_keeps_vocabulary() {
        let dir = tempdir().expect("temp dir");
        write_resource(dir.path(), "en-US", "key", "start build\n");
        write_resource(dir.path(), "de-DE", "key", "build starten\n");
        let listening = controller(ListeningConfig {
            key_phrase: None,
            ..config(dir.path())
        });
        assert_eq!(listening.add_words(&[("jenkins", "JH EH NG K IH N Z")]), 1);

        assert!(listening.set_language("de-DE").unwrap());
        assert_eq!(listening.language(), "de-DE");
        assert!(listening.is_initialized());
        {
            let decoder = listening.decoder();
            let decoder = decoder.lock().unwrap();
            assert_eq!(decoder.searches().key_phrases()[0].phrase, "build starten");
            assert!(decoder.searches().lexicon().contains("jenkins"));
        }
        assert!(listening.start_listening());
        assert!(!listening.set_language("en-US").unwrap());
        listening.stop_listening().expect("stop");
    }

    #[test]
    fn failed_language_change_leaves_controller_uninitialised() {
        let dir = tempdir().expect("temp dir");
        let listening = controller(config(dir.path()));
        assert!(matches!(
            listening.set_language(""),
            Err(ControlError::Configuration(_))
        ));
        assert!(!listening.is_initialized());
        assert!(!listening.start_listening());

        assert!(listening.set_language("en-GB").unwrap());
        assert!(listening.start_listening());
        listening.stop_listening().expect("stop");
    }

    #[test]
    fn add_words_counts_new_entries() {
        let dir = tempdir().expect("temp dir");
        let listening = controller(config(dir.path()));
        let added = listening.add_words(&[
            ("jenkins", "JH EH NG K IH N Z"),
            ("gradle", "G R EY D AH L"),
            ("Jenkins", "JH EH N K IH N Z"),
        ]);
        assert_eq!(added, 2);
    }

    #[test]
    fn engine_error_ends_a_pending_stop() {
        let dir = tempdir().expect("temp dir");
        let listening = controller(config(dir.path()));
        swallow_eos(&source_pad(&listening));
        let bus = lock(&listening.shared.session)
            .pipeline
            .as_ref()
            .expect("pipeline")
            .bus();

        assert!(listening.start_listening());
        let poster = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            bus.post(Message::Error {
                source: "asrc".into(),
                code: error_code::STREAM,
                description: "capture device lost".into(),
            });
        });

        let started = Instant::now();
        match listening.stop_listening() {
            Err(ControlError::Engine(err)) => {
                assert_eq!(err.element, "asrc");
                assert_eq!(err.code, error_code::STREAM);
            }
            other => panic!("expected engine error, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(!listening.is_listening());
        poster.join().unwrap();

        // The controller recovers for the next session.
        source_pad(&listening).remove_probe();
        assert!(listening.start_listening());
        listening.stop_listening().expect("stop");
    }

    fn eventually(bound: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + bound;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        done()
    }

    #[test]
    fn result_handler_may_query_the_controller_during_stop() {
        let dir = tempdir().expect("temp dir");
        let listening = Arc::new(controller(ListeningConfig {
            stop_timeout_secs: 2,
            ..config(dir.path())
        }));
        let (tx, rx) = unbounded();
        let weak = Arc::downgrade(&listening);
        listening.on_result(move |r| {
            if let Some(listening) = weak.upgrade() {
                let _ = tx.send((r.text.clone(), listening.is_listening(), listening.mode()));
            }
        });

        assert!(listening.start_listening());
        thread::sleep(Duration::from_millis(200));
        listening.stop_listening().expect("stop");
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)),
            Ok(("start build".to_owned(), false, SearchMode::KeyPhrase))
        );
    }

    #[test]
    fn engine_error_aborts_the_session() {
        let dir = tempdir().expect("temp dir");
        let listening = controller(config(dir.path()));
        let pipeline = Arc::clone(
            lock(&listening.shared.session)
                .pipeline
                .as_ref()
                .expect("pipeline"),
        );
        let (tx, rx) = unbounded();
        listening.on_stop(move |_| {
            let _ = tx.send(());
        });

        assert!(listening.start_listening());
        assert!(pipeline.post(Message::Error {
            source: "asrc".into(),
            code: error_code::STREAM,
            description: "capture device lost".into(),
        }));

        assert!(eventually(Duration::from_secs(2), || !listening.is_listening()));
        assert!(eventually(Duration::from_secs(6), || pipeline.state() == State::Ready));
        drop(pipeline);

        // Nothing left to stop, and no stop notification for an aborted session.
        listening.stop_listening().expect("stop after abort");
        assert!(rx.try_recv().is_err());

        assert!(listening.start_listening());
        listening.stop_listening().expect("stop");
    }

    #[test]
    fn missing_acknowledgement_times_out() {
        let dir = tempdir().expect("temp dir");
        let listening = controller(ListeningConfig {
            stop_timeout_secs: 1,
            ..config(dir.path())
        });
        swallow_eos(&source_pad(&listening));

        assert!(listening.start_listening());
        let err = listening.stop_listening().unwrap_err();
        assert!(err.is_timeout());
        assert!(!listening.is_listening());

        source_pad(&listening).remove_probe();
        assert!(listening.start_listening());
        listening.stop_listening().expect("stop");
    }

    #[test]
    fn unknown_source_fails_construction() {
        let dir = tempdir().expect("temp dir");
        let result = ListeningController::with_decoder(
            ListeningConfig {
                source: "nosuchsrc".into(),
                ..config(dir.path())
            },
            Box::new(MockDecoder::hearing("x")),
        );
        assert!(matches!(result, Err(ControlError::Construction(_))));
    }
}
