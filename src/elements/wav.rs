//! `wavparse`: RIFF/WAVE bytes in, raw audio out.
//!
//! The byte stream is collected until EOS, decoded in one go with `hound`,
//! and pushed downstream as ~20 ms chunks followed by the EOS itself.

use std::io::Cursor;

use crate::graph::{
    error_code, AudioChunk, Buffer, Caps, ElementContext, ElementImpl, Event, FlowError,
    FlowResult, PropertyError, State, StateChangeError, StateTransition, Value,
};

/// Chunks per second emitted after decoding.
const CHUNKS_PER_SECOND: u32 = 50;

#[derive(Debug, Default)]
pub struct WavParse {
    data: Vec<u8>,
}

/// Decode a complete WAVE file into interleaved `f32` samples.
pub fn decode_wav(data: Vec<u8>) -> Result<AudioChunk, hound::Error> {
    let mut reader = hound::WavReader::new(Cursor::new(data))?;
    let spec = reader.spec();
    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };
    Ok(AudioChunk::new(samples, spec.sample_rate, spec.channels))
}

impl WavParse {
    fn push_decoded(&mut self, ctx: &ElementContext<'_>) -> bool {
        let data = std::mem::take(&mut self.data);
        let audio = match decode_wav(data) {
            Ok(audio) => audio,
            Err(e) => {
                log::warn!("{}: not a playable WAVE stream: {e}", ctx.name());
                ctx.post_error(error_code::DECODE, format!("could not decode stream: {e}"));
                return false;
            }
        };
        log::debug!(
            "{}: decoded {} Hz × {} ch, {:?}",
            ctx.name(),
            audio.sample_rate,
            audio.channels,
            audio.duration()
        );

        let frames = (audio.sample_rate / CHUNKS_PER_SECOND).max(1) as usize;
        let chunk_len = frames * audio.channels.max(1) as usize;
        for samples in audio.samples.chunks(chunk_len) {
            let chunk = AudioChunk::new(samples.to_vec(), audio.sample_rate, audio.channels);
            match ctx.push(Buffer::Audio(chunk)) {
                Ok(()) => {}
                Err(FlowError::Flushing) => return false,
                Err(e) => {
                    log::debug!("{}: push stopped: {e}", ctx.name());
                    return false;
                }
            }
        }
        true
    }
}

impl ElementImpl for WavParse {
    fn src_caps(&self) -> Option<Caps> {
        Some(Caps::RawAudio)
    }

    fn sink_caps(&self) -> Option<Caps> {
        Some(Caps::Bytes)
    }

    fn set_property(&mut self, name: &str, _: &Value, _: State) -> Result<(), PropertyError> {
        Err(PropertyError::Unknown(name.to_owned()))
    }

    fn property(&self, name: &str) -> Result<Value, PropertyError> {
        Err(PropertyError::Unknown(name.to_owned()))
    }

    fn change_state(
        &mut self,
        _ctx: &ElementContext<'_>,
        transition: StateTransition,
    ) -> Result<(), StateChangeError> {
        if transition == StateTransition::PausedToReady {
            self.data.clear();
        }
        Ok(())
    }

    fn chain(&mut self, _ctx: &ElementContext<'_>, buffer: Buffer) -> FlowResult {
        match buffer {
            Buffer::Bytes(bytes) => {
                self.data.extend_from_slice(&bytes);
                Ok(())
            }
            Buffer::Audio(_) => Err(FlowError::NotNegotiated("expected bytes".into())),
        }
    }

    fn event(&mut self, ctx: &ElementContext<'_>, event: Event) -> bool {
        match event {
            Event::Eos => self.push_decoded(ctx) && ctx.push_event(Event::Eos),
            Event::FlushStart => {
                self.data.clear();
                ctx.push_event(event)
            }
            other => ctx.push_event(other),
        }
    }
}
