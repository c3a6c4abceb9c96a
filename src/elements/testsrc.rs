//! `audiotestsrc`: sine-wave generator.

use std::time::{Duration, Instant};

use super::{bool_value, double_value, int_value, u16_value, u32_value};
use crate::graph::{
    AudioChunk, Buffer, Caps, ElementContext, ElementImpl, FlowError, FlowResult, PropertyError,
    State, StateChangeError, StateTransition, Value,
};

#[derive(Debug)]
pub struct AudioTestSrc {
    freq: f64,
    volume: f64,
    sample_rate: u32,
    channels: u16,
    /// Frames per buffer.
    samples_per_buffer: u32,
    /// `-1` streams forever.
    num_buffers: i64,
    is_live: bool,

    phase: f64,
    produced: i64,
    next_due: Option<Instant>,
}

impl Default for AudioTestSrc {
    fn default() -> Self {
        Self {
            freq: 440.0,
            volume: 0.8,
            sample_rate: 44_100,
            channels: 1,
            samples_per_buffer: 1024,
            num_buffers: -1,
            is_live: false,
            phase: 0.0,
            produced: 0,
            next_due: None,
        }
    }
}

impl AudioTestSrc {
    fn generate(&mut self) -> AudioChunk {
        let frames = self.samples_per_buffer as usize;
        let channels = self.channels as usize;
        let step = std::f64::consts::TAU * self.freq / f64::from(self.sample_rate);
        let mut samples = Vec::with_capacity(frames * channels);
        for _ in 0..frames {
            let v = (self.phase.sin() * self.volume) as f32;
            samples.extend(std::iter::repeat(v).take(channels));
            self.phase = (self.phase + step) % std::f64::consts::TAU;
        }
        AudioChunk::new(samples, self.sample_rate, self.channels)
    }

    /// Sleep until the buffer is due, waking early when flushing.
    fn pace(&mut self, ctx: &ElementContext<'_>, duration: Duration) -> FlowResult {
        let due = *self.next_due.get_or_insert_with(Instant::now);
        while let Some(left) = due.checked_duration_since(Instant::now()) {
            if ctx.is_flushing() {
                return Err(FlowError::Flushing);
            }
            std::thread::sleep(left.min(Duration::from_millis(10)));
        }
        self.next_due = Some(due + duration);
        Ok(())
    }
}

impl ElementImpl for AudioTestSrc {
    fn src_caps(&self) -> Option<Caps> {
        Some(Caps::RawAudio)
    }

    fn set_property(&mut self, name: &str, value: &Value, _: State) -> Result<(), PropertyError> {
        match name {
            "freq" => self.freq = double_value(name, value)?,
            "volume" => {
                let v = double_value(name, value)?;
                if !(0.0..=1.0).contains(&v) {
                    return Err(PropertyError::type_mismatch(name, "double in [0, 1]", value));
                }
                self.volume = v;
            }
            "samplerate" => {
                let rate = u32_value(name, value)?;
                if rate == 0 {
                    return Err(PropertyError::type_mismatch(name, "positive rate", value));
                }
                self.sample_rate = rate;
            }
            "channels" => {
                let channels = u16_value(name, value)?;
                if channels == 0 {
                    return Err(PropertyError::type_mismatch(name, "positive count", value));
                }
                self.channels = channels;
            }
            "samples-per-buffer" => {
                let n = u32_value(name, value)?;
                if n == 0 {
                    return Err(PropertyError::type_mismatch(name, "positive count", value));
                }
                self.samples_per_buffer = n;
            }
            "num-buffers" => self.num_buffers = int_value(name, value)?.max(-1),
            "is-live" => self.is_live = bool_value(name, value)?,
            _ => return Err(PropertyError::Unknown(name.to_owned())),
        }
        Ok(())
    }

    fn property(&self, name: &str) -> Result<Value, PropertyError> {
        Ok(match name {
            "freq" => Value::from(self.freq),
            "volume" => Value::from(self.volume),
            "samplerate" => Value::from(self.sample_rate),
            "channels" => Value::from(self.channels),
            "samples-per-buffer" => Value::from(self.samples_per_buffer),
            "num-buffers" => Value::from(self.num_buffers),
            "is-live" => Value::from(self.is_live),
            _ => return Err(PropertyError::Unknown(name.to_owned())),
        })
    }

    fn change_state(
        &mut self,
        _ctx: &ElementContext<'_>,
        transition: StateTransition,
    ) -> Result<(), StateChangeError> {
        match transition {
            StateTransition::ReadyToPaused => {
                self.phase = 0.0;
                self.produced = 0;
            }
            StateTransition::PausedToPlaying | StateTransition::PlayingToPaused => {
                self.next_due = None;
            }
            _ => {}
        }
        Ok(())
    }

    fn create(&mut self, ctx: &ElementContext<'_>) -> FlowResult<Option<Buffer>> {
        if self.num_buffers >= 0 && self.produced >= self.num_buffers {
            return Err(FlowError::Eos);
        }
        let chunk = self.generate();
        if self.is_live {
            self.pace(ctx, chunk.duration())?;
        }
        self.produced += 1;
        Ok(Some(Buffer::Audio(chunk)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Element;

    #[test]
    fn defaults_are_readable() {
        let src = Element::make("audiotestsrc");
        assert_eq!(src.property::<f64>("freq"), Ok(440.0));
        assert_eq!(src.property::<u32>("samplerate"), Ok(44_100));
        assert_eq!(src.property::<i64>("num-buffers"), Ok(-1));
        assert_eq!(src.property::<bool>("is-live"), Ok(false));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let src = Element::make("audiotestsrc");
        assert!(src.set_property("volume", 1.5).is_err());
        assert!(src.set_property("channels", 0_u32).is_err());
        assert!(src.set_property("samplerate", "fast").is_err());
        assert!(src.set_property("freq", "1000").is_ok());
    }

    #[test]
    fn generated_chunk_has_requested_shape() {
        let mut src = AudioTestSrc {
            channels: 2,
            samples_per_buffer: 100,
            volume: 0.5,
            ..AudioTestSrc::default()
        };
        let chunk = src.generate();
        assert_eq!(chunk.samples.len(), 200);
        assert_eq!(chunk.frames(), 100);
        assert!(chunk.samples.iter().all(|s| s.abs() <= 0.5));
        assert_eq!(chunk.samples[2], chunk.samples[3]);
    }
}
