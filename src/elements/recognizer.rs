//! `recognizer`: feeds audio into a [`Decoder`] and reports hypotheses.
//!
//! Incoming audio is converted to 16 kHz mono for the decoder and forwarded
//! unchanged downstream.  An utterance ends on a run of silence after
//! speech, or at EOS; its hypothesis (if the active search accepts it) is
//! posted as an element message:
//!
//! ```text
//! recognizer, hypothesis=start build, final=true, confidence=100
//! ```

use super::{double_value, uint_value, str_value, writable_until_ready};
use crate::audio::{downmix_to_mono, resample_to_16k, UtteranceDetector, VadDetector, RECOGNITION_RATE};
use crate::decoder::{into_handle, DecoderHandle};
use crate::graph::{
    error_code, lock, Buffer, Caps, ElementContext, ElementImpl, Event, FlowError, FlowResult,
    FromValue, PropertyError, State, StateChangeError, StateTransition, Structure, Value,
};

/// Name of the element message carrying a result.
pub const RESULT_MESSAGE: &str = "recognizer";

pub struct Recognizer {
    decoder: Option<DecoderHandle>,
    model: Option<String>,
    vad_threshold: f64,
    silence_ms: u64,
    detector: Option<UtteranceDetector>,
}

impl Default for Recognizer {
    fn default() -> Self {
        Self {
            decoder: None,
            model: None,
            vad_threshold: 0.01,
            silence_ms: 800,
            detector: None,
        }
    }
}

impl std::fmt::Debug for Recognizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recognizer")
            .field("has_decoder", &self.decoder.is_some())
            .field("model", &self.model)
            .field("vad_threshold", &self.vad_threshold)
            .field("silence_ms", &self.silence_ms)
            .finish_non_exhaustive()
    }
}

impl Recognizer {
    fn load_decoder(&mut self) -> Result<DecoderHandle, StateChangeError> {
        if let Some(decoder) = &self.decoder {
            return Ok(DecoderHandle::clone(decoder));
        }
        let Some(model) = &self.model else {
            return Err(StateChangeError::NotConfigured(
                "neither a decoder nor a model is set".into(),
            ));
        };
        let decoder = load_model(model, self.vad_threshold as f32)?;
        self.decoder = Some(DecoderHandle::clone(&decoder));
        Ok(decoder)
    }

    fn detector(&self) -> UtteranceDetector {
        let samples = self.silence_ms.saturating_mul(u64::from(RECOGNITION_RATE)) / 1000;
        let silence = usize::try_from(samples).unwrap_or(usize::MAX);
        UtteranceDetector::new(VadDetector::new(self.vad_threshold as f32), silence)
    }

    /// Close the current utterance, post its result, and open the next one.
    fn finish(&mut self, ctx: &ElementContext<'_>) {
        let Some(decoder) = &self.decoder else {
            return;
        };
        let mut decoder = lock(decoder);
        match decoder.end_utterance() {
            Ok(Some(hypothesis)) => ctx.post_element(
                Structure::new(RESULT_MESSAGE)
                    .field("hypothesis", hypothesis.text)
                    .field("final", true)
                    .field("confidence", hypothesis.confidence),
            ),
            Ok(None) => log::debug!("{}: utterance produced no hypothesis", ctx.name()),
            Err(e) => ctx.post_error(error_code::FAILED, format!("recognition failed: {e}")),
        }
        if let Err(e) = decoder.start_utterance() {
            ctx.post_error(error_code::FAILED, format!("could not restart decoder: {e}"));
        }
    }
}

#[cfg(feature = "whisper")]
fn load_model(model: &str, vad_threshold: f32) -> Result<DecoderHandle, StateChangeError> {
    let decoder = crate::decoder::WhisperDecoder::load(model, vad_threshold)
        .map_err(|e| StateChangeError::Resource(e.to_string()))?;
    Ok(into_handle(Box::new(decoder)))
}

#[cfg(not(feature = "whisper"))]
fn load_model(model: &str, _vad_threshold: f32) -> Result<DecoderHandle, StateChangeError> {
    Err(StateChangeError::NotConfigured(format!(
        "cannot load {model}: built without whisper support"
    )))
}

impl ElementImpl for Recognizer {
    fn src_caps(&self) -> Option<Caps> {
        Some(Caps::RawAudio)
    }

    fn sink_caps(&self) -> Option<Caps> {
        Some(Caps::RawAudio)
    }

    fn set_property(&mut self, name: &str, value: &Value, state: State) -> Result<(), PropertyError> {
        match name {
            "decoder" => {
                if state != State::Null {
                    return Err(PropertyError::WrongState {
                        property: name.to_owned(),
                        state,
                    });
                }
                let decoder = DecoderHandle::from_value(value.clone())
                    .ok_or_else(|| PropertyError::type_mismatch(name, "decoder", value))?;
                self.decoder = Some(decoder);
            }
            "model" => {
                writable_until_ready(name, state)?;
                self.model = Some(str_value(name, value)?.to_owned());
            }
            "vad-threshold" => {
                let v = double_value(name, value)?;
                if !(0.0..=1.0).contains(&v) {
                    return Err(PropertyError::type_mismatch(name, "double in [0, 1]", value));
                }
                self.vad_threshold = v;
            }
            "silence-ms" => self.silence_ms = uint_value(name, value)?,
            _ => return Err(PropertyError::Unknown(name.to_owned())),
        }
        Ok(())
    }

    fn property(&self, name: &str) -> Result<Value, PropertyError> {
        match name {
            "decoder" => self
                .decoder
                .as_ref()
                .map(|d| Value::from(DecoderHandle::clone(d)))
                .ok_or_else(|| PropertyError::NotSet(name.to_owned())),
            "model" => self
                .model
                .as_deref()
                .map(Value::from)
                .ok_or_else(|| PropertyError::NotSet(name.to_owned())),
            "vad-threshold" => Ok(Value::from(self.vad_threshold)),
            "silence-ms" => Ok(Value::from(self.silence_ms)),
            _ => Err(PropertyError::Unknown(name.to_owned())),
        }
    }

    fn change_state(
        &mut self,
        ctx: &ElementContext<'_>,
        transition: StateTransition,
    ) -> Result<(), StateChangeError> {
        match transition {
            StateTransition::NullToReady => {
                self.load_decoder()?;
            }
            StateTransition::ReadyToPaused => self.detector = Some(self.detector()),
            StateTransition::PausedToPlaying => {
                if let Some(detector) = &mut self.detector {
                    detector.reset();
                }
                let decoder = self.load_decoder()?;
                lock(&decoder)
                    .start_utterance()
                    .map_err(|e| StateChangeError::Failed(e.to_string()))?;
                log::debug!("{}: utterance started", ctx.name());
            }
            StateTransition::PausedToReady => self.detector = None,
            _ => {}
        }
        Ok(())
    }

    fn chain(&mut self, ctx: &ElementContext<'_>, buffer: Buffer) -> FlowResult {
        let Buffer::Audio(chunk) = &buffer else {
            return Err(FlowError::NotNegotiated("expected raw audio".into()));
        };
        let mono = downmix_to_mono(&chunk.samples, chunk.channels);
        let samples = resample_to_16k(&mono, chunk.sample_rate);

        if let Some(decoder) = &self.decoder {
            lock(decoder).process(&samples).map_err(|e| {
                ctx.post_error(error_code::FAILED, format!("decoder rejected audio: {e}"));
                FlowError::Error(e.to_string())
            })?;
        }

        let ended = self
            .detector
            .as_mut()
            .is_some_and(|d| d.feed(&samples) == crate::audio::Activity::UtteranceEnd);
        if ended {
            self.finish(ctx);
        }

        ctx.push(buffer)
    }

    fn event(&mut self, ctx: &ElementContext<'_>, event: Event) -> bool {
        match event {
            Event::Eos => {
                self.finish(ctx);
                ctx.push_event(Event::Eos)
            }
            Event::FlushStart => {
                if let Some(detector) = &mut self.detector {
                    detector.reset();
                }
                if let Some(decoder) = &self.decoder {
                    let _ = lock(decoder).start_utterance();
                }
                ctx.push_event(event)
            }
            other => ctx.push_event(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::MockDecoder;
    use crate::graph::{Element, Message, Pipeline};
    use std::time::Duration;

    #[test]
    fn huge_silence_setting_saturates() {
        let recognizer = Recognizer {
            silence_ms: u64::MAX,
            ..Recognizer::default()
        };
        let mut detector = recognizer.detector();
        assert!(!detector.in_speech());
        detector.feed(&[0.5; 480]);
        detector.feed(&[0.0; 48_000]);
        assert!(detector.in_speech());
    }

    fn results(messages: &crossbeam_channel::Receiver<Message>) -> Vec<Structure> {
        std::iter::from_fn(|| messages.recv_timeout(Duration::from_secs(5)).ok())
            .take_while(|m| !m.is_eos())
            .filter_map(|m| match m {
                Message::Element { structure, .. } if structure.has_name(RESULT_MESSAGE) => {
                    Some(structure)
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn ready_requires_a_decoder() {
        let pipeline = Pipeline::new();
        let asr = Element::make("recognizer");
        pipeline.add(&asr);
        assert!(!pipeline.set_state(State::Ready, false));
        assert_eq!(asr.state(), State::Null);
    }

    #[test]
    fn decoder_can_only_be_set_in_null() {
        let asr = Element::make("recognizer");
        let handle = into_handle(Box::new(MockDecoder::hearing("x")));
        asr.set_property("decoder", DecoderHandle::clone(&handle)).unwrap();
        assert!(asr.set_state(State::Ready, false));
        assert!(matches!(
            asr.set_property("decoder", handle),
            Err(PropertyError::WrongState { .. })
        ));
        let back: DecoderHandle = asr.property("decoder").expect("decoder");
        assert_eq!(back.lock().unwrap().mode(), crate::decoder::SearchMode::None);
        asr.set_state(State::Null, false);
    }

    #[test]
    fn eos_ends_the_utterance_and_posts_result() {
        let pipeline = Pipeline::parse(
            "audiotestsrc num-buffers=5 samplerate=16000 samples-per-buffer=1600 \
             ! recognizer name=asr ! fakesink",
        )
        .expect("parse");
        let decoder = into_handle(Box::new(MockDecoder::spotting("start build", "please start build")));
        pipeline
            .by_name("asr")
            .set_property("decoder", DecoderHandle::clone(&decoder))
            .unwrap();

        let messages = pipeline.subscribe(256);
        assert!(pipeline.set_state(State::Playing, false));
        let found = results(&messages);
        pipeline.set_state(State::Null, false);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get::<String>("hypothesis").as_deref(), Some("start build"));
        assert_eq!(found[0].get::<bool>("final"), Some(true));
        assert_eq!(found[0].get::<i64>("confidence"), Some(66));
    }

    /// A few buffers of loud audio, then silence until stopped.
    struct Burst {
        loud: usize,
    }

    impl ElementImpl for Burst {
        fn src_caps(&self) -> Option<Caps> {
            Some(Caps::RawAudio)
        }

        fn set_property(&mut self, name: &str, _: &Value, _: State) -> Result<(), PropertyError> {
            Err(PropertyError::Unknown(name.into()))
        }

        fn property(&self, name: &str) -> Result<Value, PropertyError> {
            Err(PropertyError::Unknown(name.into()))
        }

        fn create(&mut self, _: &ElementContext<'_>) -> FlowResult<Option<Buffer>> {
            std::thread::sleep(Duration::from_millis(2));
            let level = if self.loud > 0 { 0.5 } else { 0.0 };
            self.loud = self.loud.saturating_sub(1);
            Ok(Some(Buffer::Audio(crate::graph::AudioChunk::new(
                vec![level; 1600],
                16_000,
                1,
            ))))
        }
    }

    #[test]
    fn trailing_silence_ends_an_utterance_mid_stream() {
        let pipeline = Pipeline::new();
        let src = Element::from_impl("burst", "burst", Burst { loud: 3 });
        let asr = Element::make("recognizer");
        let sink = Element::make("fakesink");
        for e in [&src, &asr, &sink] {
            pipeline.add(e);
        }
        assert!(src.link(&asr) && asr.link(&sink));
        asr.set_property("silence-ms", 200_u64).unwrap();
        let decoder = into_handle(Box::new(MockDecoder::spotting("hello", "hello")));
        asr.set_property("decoder", decoder).unwrap();

        let messages = pipeline.subscribe(256);
        assert!(pipeline.set_state(State::Playing, false));
        let result = std::iter::from_fn(|| messages.recv_timeout(Duration::from_secs(5)).ok())
            .find_map(|m| match m {
                Message::Element { structure, .. } => structure.get::<String>("hypothesis"),
                _ => None,
            });
        pipeline.set_state(State::Null, false);
        assert_eq!(result.as_deref(), Some("hello"));
    }
}
