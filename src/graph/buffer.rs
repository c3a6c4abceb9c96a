//! Data and control items that travel between connection points.

use std::time::Duration;

use thiserror::Error;

use super::value::Structure;

// ---------------------------------------------------------------------------
// AudioChunk
// ---------------------------------------------------------------------------

/// A block of raw audio.
///
/// Samples are interleaved `f32` in the range `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Interleaved PCM samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz (e.g. 44100, 48000, 16000).
    pub sample_rate: u32,
    /// Number of interleaved channels (1 = mono, 2 = stereo, …).
    pub channels: u16,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        match self.channels {
            0 => 0,
            n => self.samples.len() / n as usize,
        }
    }

    /// Playback duration of the chunk.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }
}

// ---------------------------------------------------------------------------
// Buffer
// ---------------------------------------------------------------------------

/// A unit of streamed data.
#[derive(Debug, Clone, PartialEq)]
pub enum Buffer {
    /// Undecoded bytes, e.g. straight from a file.
    Bytes(Vec<u8>),
    /// Decoded audio.
    Audio(AudioChunk),
}

impl Buffer {
    pub fn caps(&self) -> Caps {
        match self {
            Buffer::Bytes(_) => Caps::Bytes,
            Buffer::Audio(_) => Caps::RawAudio,
        }
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        match self {
            Buffer::Bytes(b) => b.len(),
            Buffer::Audio(chunk) => chunk.samples.len() * std::mem::size_of::<f32>(),
        }
    }
}

// ---------------------------------------------------------------------------
// Caps
// ---------------------------------------------------------------------------

/// The kind of data a connection point produces or accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Caps {
    Bytes,
    RawAudio,
    Any,
}

impl Caps {
    pub fn can_intersect(&self, other: &Caps) -> bool {
        matches!((self, other), (Caps::Any, _) | (_, Caps::Any)) || self == other
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// In-band control item that travels downstream alongside buffers.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// No more data will follow.
    Eos,
    FlushStart,
    FlushStop,
    Custom(Structure),
}

impl Event {
    pub fn name(&self) -> &str {
        match self {
            Event::Eos => "eos",
            Event::FlushStart => "flush-start",
            Event::FlushStop => "flush-stop",
            Event::Custom(s) => s.name(),
        }
    }
}

// ---------------------------------------------------------------------------
// FlowError
// ---------------------------------------------------------------------------

/// Why a buffer could not be produced or delivered.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FlowError {
    #[error("not linked")]
    NotLinked,
    /// The receiving node is shutting down or not yet running.
    #[error("flushing")]
    Flushing,
    #[error("end of stream")]
    Eos,
    #[error("not negotiated: {0}")]
    NotNegotiated(String),
    #[error("not supported")]
    NotSupported,
    #[error("{0}")]
    Error(String),
}

pub type FlowResult<T = ()> = Result<T, FlowError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
