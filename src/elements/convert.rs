//! `audioconvert` and `audioresample`: per-chunk format conversion.

use super::{u16_value, u32_value};
use crate::audio::{remix, resample};
use crate::graph::{
    AudioChunk, Buffer, Caps, ElementContext, ElementImpl, FlowError, FlowResult, PropertyError,
    State, Value,
};

fn audio_only(buffer: Buffer) -> FlowResult<AudioChunk> {
    match buffer {
        Buffer::Audio(chunk) => Ok(chunk),
        Buffer::Bytes(_) => Err(FlowError::NotNegotiated("expected raw audio".into())),
    }
}

// ---------------------------------------------------------------------------
// AudioConvert
// ---------------------------------------------------------------------------

/// Channel-count conversion.  `channels = 0` passes audio through.
#[derive(Debug, Default)]
pub struct AudioConvert {
    channels: u16,
}

impl ElementImpl for AudioConvert {
    fn src_caps(&self) -> Option<Caps> {
        Some(Caps::RawAudio)
    }

    fn sink_caps(&self) -> Option<Caps> {
        Some(Caps::RawAudio)
    }

    fn set_property(&mut self, name: &str, value: &Value, _: State) -> Result<(), PropertyError> {
        match name {
            "channels" => self.channels = u16_value(name, value)?,
            _ => return Err(PropertyError::Unknown(name.to_owned())),
        }
        Ok(())
    }

    fn property(&self, name: &str) -> Result<Value, PropertyError> {
        match name {
            "channels" => Ok(Value::from(self.channels)),
            _ => Err(PropertyError::Unknown(name.to_owned())),
        }
    }

    fn chain(&mut self, ctx: &ElementContext<'_>, buffer: Buffer) -> FlowResult {
        let chunk = audio_only(buffer)?;
        if self.channels == 0 || self.channels == chunk.channels {
            return ctx.push(Buffer::Audio(chunk));
        }
        let samples = remix(&chunk.samples, chunk.channels, self.channels);
        ctx.push(Buffer::Audio(AudioChunk::new(
            samples,
            chunk.sample_rate,
            self.channels,
        )))
    }
}

// ---------------------------------------------------------------------------
// AudioResample
// ---------------------------------------------------------------------------

/// Sample-rate conversion.  `rate = 0` passes audio through.
#[derive(Debug, Default)]
pub struct AudioResample {
    rate: u32,
}

impl ElementImpl for AudioResample {
    fn src_caps(&self) -> Option<Caps> {
        Some(Caps::RawAudio)
    }

    fn sink_caps(&self) -> Option<Caps> {
        Some(Caps::RawAudio)
    }

    fn set_property(&mut self, name: &str, value: &Value, _: State) -> Result<(), PropertyError> {
        match name {
            "rate" => self.rate = u32_value(name, value)?,
            _ => return Err(PropertyError::Unknown(name.to_owned())),
        }
        Ok(())
    }

    fn property(&self, name: &str) -> Result<Value, PropertyError> {
        match name {
            "rate" => Ok(Value::from(self.rate)),
            _ => Err(PropertyError::Unknown(name.to_owned())),
        }
    }

    fn chain(&mut self, ctx: &ElementContext<'_>, buffer: Buffer) -> FlowResult {
        let chunk = audio_only(buffer)?;
        if self.rate == 0 || self.rate == chunk.sample_rate {
            return ctx.push(Buffer::Audio(chunk));
        }
        let samples = resample(&chunk.samples, chunk.channels, chunk.sample_rate, self.rate);
        ctx.push(Buffer::Audio(AudioChunk::new(samples, self.rate, chunk.channels)))
    }
}
