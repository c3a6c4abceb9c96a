//! Whisper-backed [`Decoder`].
//!
//! Audio of one utterance is collected in memory, trimmed with the energy
//! VAD and transcribed in a single greedy pass when the utterance ends.  The
//! active searches are turned into an initial prompt so that key phrases and
//! grammar words are recognised more reliably.

use std::path::Path;

use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::{Decoder, DecoderError, SearchSet};
use crate::audio::VadDetector;

/// Utterances shorter than this are padded with silence (1 s at 16 kHz).
const MIN_AUDIO_SAMPLES: usize = 16_000;
/// Longer utterances keep only their last 30 s.
const MAX_AUDIO_SAMPLES: usize = 480_000;

pub struct WhisperDecoder {
    ctx: WhisperContext,
    searches: SearchSet,
    vad: VadDetector,
    language: Option<String>,
    audio: Vec<f32>,
}

impl std::fmt::Debug for WhisperDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperDecoder")
            .field("searches", &self.searches)
            .field("language", &self.language)
            .field("buffered", &self.audio.len())
            .finish_non_exhaustive()
    }
}

// SAFETY: WhisperContext only holds read-only model weights after loading
// and is declared Send+Sync by whisper-rs; the remaining fields are owned.
unsafe impl Send for WhisperDecoder {}

impl WhisperDecoder {
    /// Load a GGML model.
    ///
    /// # Errors
    ///
    /// - [`DecoderError::ModelNotFound`]: `model_path` does not exist.
    /// - [`DecoderError::ContextInit`]: whisper-rs failed to load the file.
    pub fn load(model_path: impl AsRef<Path>, vad_threshold: f32) -> Result<Self, DecoderError> {
        let path = model_path.as_ref();
        if !path.exists() {
            return Err(DecoderError::ModelNotFound(path.display().to_string()));
        }
        let path_str = path.to_str().ok_or_else(|| {
            DecoderError::ModelNotFound(format!(
                "model path contains non-UTF-8 characters: {}",
                path.display()
            ))
        })?;

        let ctx = WhisperContext::new_with_params(path_str, WhisperContextParameters::default())
            .map_err(|e| DecoderError::ContextInit(e.to_string()))?;
        log::info!("decoder: whisper model loaded from {}", path.display());

        Ok(Self {
            ctx,
            searches: SearchSet::new(),
            vad: VadDetector::new(vad_threshold),
            language: Some("en".into()),
            audio: Vec::new(),
        })
    }

    fn prompt(&self) -> String {
        self.searches
            .vocabulary()
            .into_iter()
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn transcribe(&self, audio: &[f32]) -> Result<String, DecoderError> {
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(self.language.as_deref());
        params.set_n_threads(optimal_threads());
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        let prompt = self.prompt();
        if !prompt.is_empty() {
            params.set_initial_prompt(&prompt);
        }

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| DecoderError::ContextInit(e.to_string()))?;
        state
            .full(params, audio)
            .map_err(|e| DecoderError::Transcription(e.to_string()))?;

        let n_segments = state
            .full_n_segments()
            .map_err(|e| DecoderError::Transcription(e.to_string()))?;
        let mut text = String::new();
        for i in 0..n_segments {
            let segment = state
                .full_get_segment_text(i)
                .map_err(|e| DecoderError::Transcription(format!("segment {i}: {e}")))?;
            text.push_str(&segment);
        }
        Ok(text.trim().to_string())
    }
}

impl Decoder for WhisperDecoder {
    fn searches(&self) -> &SearchSet {
        &self.searches
    }

    fn searches_mut(&mut self) -> &mut SearchSet {
        &mut self.searches
    }

    fn start_utterance(&mut self) -> Result<(), DecoderError> {
        self.audio.clear();
        Ok(())
    }

    fn process(&mut self, samples: &[f32]) -> Result<(), DecoderError> {
        self.audio.extend_from_slice(samples);
        if self.audio.len() > MAX_AUDIO_SAMPLES {
            let excess = self.audio.len() - MAX_AUDIO_SAMPLES;
            self.audio.drain(..excess);
        }
        Ok(())
    }

    fn finish_utterance(&mut self) -> Result<Option<String>, DecoderError> {
        let audio = std::mem::take(&mut self.audio);
        let speech = self.vad.trim_silence(&audio);
        if speech.is_empty() {
            return Ok(None);
        }

        let mut padded;
        let input = if speech.len() < MIN_AUDIO_SAMPLES {
            padded = speech.to_vec();
            padded.resize(MIN_AUDIO_SAMPLES, 0.0);
            &padded[..]
        } else {
            speech
        };

        let started = std::time::Instant::now();
        let text = self.transcribe(input)?;
        log::debug!(
            "decoder: transcribed {} samples in {:?}: \"{text}\"",
            input.len(),
            started.elapsed()
        );
        Ok(Some(text).filter(|t| !t.is_empty()))
    }

    fn set_language(&mut self, language: &str) -> Result<(), DecoderError> {
        self.language = whisper_language(language)?;
        Ok(())
    }
}

/// `en-US` → `en`; `auto` lets whisper detect the language.
fn whisper_language(language: &str) -> Result<Option<String>, DecoderError> {
    if language.eq_ignore_ascii_case("auto") {
        return Ok(None);
    }
    let primary = language
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    if primary.len() < 2 || primary.len() > 3 || !primary.chars().all(|c| c.is_ascii_alphabetic())
    {
        return Err(DecoderError::Language(language.into()));
    }
    Ok(Some(primary))
}

fn optimal_threads() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get().min(8) as i32)
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_tags_map_to_whisper_codes() {
        assert_eq!(whisper_language("en-US").unwrap().as_deref(), Some("en"));
        assert_eq!(whisper_language("th_TH").unwrap().as_deref(), Some("th"));
        assert_eq!(whisper_language("AUTO").unwrap(), None);
        assert!(whisper_language("").is_err());
        assert!(whisper_language("1234").is_err());
    }

    #[test]
    fn load_missing_model_is_model_not_found() {
        let err = WhisperDecoder::load("/nonexistent/ggml-base.bin", 0.01).unwrap_err();
        assert!(matches!(err, DecoderError::ModelNotFound(_)));
    }

    #[test]
    fn optimal_threads_in_range() {
        let n = optimal_threads();
        assert!((1..=8).contains(&n));
    }
}
