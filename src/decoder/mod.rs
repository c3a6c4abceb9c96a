//! Speech recognition capability.
//!
//! # Overview
//!
//! [`Decoder`] is the interface the `recognizer` node drives.  It is
//! object-safe and `Send` so it can be shared behind a [`DecoderHandle`]
//! between the streaming thread and the controller that configures it.
//!
//! Search configuration (key phrases, grammars, the active [`SearchMode`],
//! added vocabulary) lives in a [`SearchSet`]; implementors only expose it
//! through [`Decoder::searches`] / [`Decoder::searches_mut`] and supply the
//! acoustic part: [`Decoder::start_utterance`], [`Decoder::process`] and
//! [`Decoder::finish_utterance`].
//!
//! [`WhisperDecoder`] (feature `whisper`) is the production implementation.

pub mod grammar;
pub mod lexicon;
pub mod search;
#[cfg(feature = "whisper")]
pub mod whisper;

use std::path::Path;
use std::sync::{Arc, Mutex};

use thiserror::Error;

pub use grammar::Grammar;
pub use lexicon::{Lexicon, LexiconEntry};
pub use search::{normalize, parse_key_list, Hypothesis, KeyPhrase, SearchMode, SearchSet};
#[cfg(feature = "whisper")]
pub use whisper::WhisperDecoder;

// ---------------------------------------------------------------------------
// DecoderError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum DecoderError {
    #[error("{path}: {message}")]
    Io { path: String, message: String },

    #[error("Invalid key phrase list: {0}")]
    KeyPhrase(String),

    #[error("Invalid grammar: {0}")]
    Grammar(String),

    #[error("Invalid lexicon: {0}")]
    Lexicon(String),

    /// A search mode was activated before its search was loaded.
    #[error("No {0} search loaded")]
    SearchNotLoaded(SearchMode),

    #[error("Unsupported language: {0}")]
    Language(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Decoder initialisation failed: {0}")]
    ContextInit(String),

    #[error("Transcription error: {0}")]
    Transcription(String),
}

impl DecoderError {
    pub(crate) fn io(path: &Path, err: std::io::Error) -> Self {
        DecoderError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Decoder trait
// ---------------------------------------------------------------------------

/// Object-safe recognition engine.
///
/// # Contract
///
/// - `process` receives **16 kHz, mono, f32** samples.
/// - An utterance is bracketed by `start_utterance` and `end_utterance`;
///   `end_utterance` returns a hypothesis only when the transcript satisfies
///   the active search.
pub trait Decoder: Send {
    fn searches(&self) -> &SearchSet;

    fn searches_mut(&mut self) -> &mut SearchSet;

    /// Begin a new utterance, discarding any audio of the previous one.
    fn start_utterance(&mut self) -> Result<(), DecoderError>;

    fn process(&mut self, samples: &[f32]) -> Result<(), DecoderError>;

    /// Transcribe the audio collected since `start_utterance`.
    ///
    /// `Ok(None)` means nothing intelligible was heard.
    fn finish_utterance(&mut self) -> Result<Option<String>, DecoderError>;

    /// Close the utterance and match it against the active search.
    fn end_utterance(&mut self) -> Result<Option<Hypothesis>, DecoderError> {
        let transcript = self.finish_utterance()?;
        let hypothesis = transcript.and_then(|t| self.searches().accept(&t));
        match &hypothesis {
            Some(h) => log::info!("decoder: hypothesis \"{}\" ({}%)", h.text, h.confidence),
            None => log::debug!("decoder: utterance rejected by {} search", self.mode()),
        }
        Ok(hypothesis)
    }

    /// Select the spoken language, e.g. `en-US`.
    fn set_language(&mut self, language: &str) -> Result<(), DecoderError> {
        log::debug!("decoder: language {language} has no effect on this decoder");
        Ok(())
    }

    fn set_key_phrase(&mut self, phrase: &str) -> Result<(), DecoderError> {
        self.searches_mut().set_key_phrase(phrase)
    }

    fn set_key_file(&mut self, path: &Path) -> Result<(), DecoderError> {
        self.searches_mut().set_key_file(path)
    }

    fn set_grammar(&mut self, jsgf: &str) -> Result<(), DecoderError> {
        self.searches_mut().set_grammar(jsgf)
    }

    fn set_grammar_file(&mut self, path: &Path) -> Result<(), DecoderError> {
        self.searches_mut().set_grammar_file(path)
    }

    fn activate_mode(&mut self, mode: SearchMode) -> Result<(), DecoderError> {
        self.searches_mut().activate(mode)?;
        log::info!("decoder: {mode} search active");
        Ok(())
    }

    fn mode(&self) -> SearchMode {
        self.searches().mode()
    }

    /// Add a word to the vocabulary; returns `true` when it was new.
    fn add_word(&mut self, word: &str, pronunciation: &str) -> bool {
        self.searches_mut().lexicon_mut().add(word, pronunciation)
    }

    fn load_lexicon(&mut self, path: &Path) -> Result<(), DecoderError> {
        let lexicon = Lexicon::load_from(path)?;
        self.searches_mut().lexicon_mut().extend(&lexicon);
        Ok(())
    }
}

// Compile-time assertion: Box<dyn Decoder> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn Decoder>) {}
};

/// Decoder shared between the recognizer node and its owner.
pub type DecoderHandle = Arc<Mutex<Box<dyn Decoder>>>;

pub fn into_handle(decoder: Box<dyn Decoder>) -> DecoderHandle {
    Arc::new(Mutex::new(decoder))
}

// ---------------------------------------------------------------------------
// MockDecoder  (test-only)
// ---------------------------------------------------------------------------

/// A test double that "hears" a fixed transcript whenever an utterance
/// received audible samples.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockDecoder {
    searches: SearchSet,
    transcript: Option<String>,
    samples: usize,
    pub utterances: usize,
    pub language: Option<String>,
}

#[cfg(test)]
impl MockDecoder {
    pub fn hearing(text: impl Into<String>) -> Self {
        Self {
            searches: SearchSet::new(),
            transcript: Some(text.into()),
            ..Self::default()
        }
    }

    /// Key-phrase search loaded with `phrase` and active.
    pub fn spotting(phrase: &str, heard: &str) -> Self {
        let mut decoder = Self::hearing(heard);
        decoder.searches.set_key_phrase(phrase).expect("phrase");
        decoder
            .searches
            .activate(SearchMode::KeyPhrase)
            .expect("activate");
        decoder
    }
}

#[cfg(test)]
impl Decoder for MockDecoder {
    fn searches(&self) -> &SearchSet {
        &self.searches
    }

    fn searches_mut(&mut self) -> &mut SearchSet {
        &mut self.searches
    }

    fn start_utterance(&mut self) -> Result<(), DecoderError> {
        self.samples = 0;
        Ok(())
    }

    /// Only audible samples count as heard.
    fn process(&mut self, samples: &[f32]) -> Result<(), DecoderError> {
        self.samples += samples.iter().filter(|s| s.abs() > 1e-3).count();
        Ok(())
    }

    fn finish_utterance(&mut self) -> Result<Option<String>, DecoderError> {
        let heard = std::mem::take(&mut self.samples) > 0;
        if heard {
            self.utterances += 1;
        }
        Ok(self.transcript.clone().filter(|_| heard))
    }

    fn set_language(&mut self, language: &str) -> Result<(), DecoderError> {
        if language.is_empty() {
            return Err(DecoderError::Language(language.into()));
        }
        self.language = Some(language.into());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
