//! Energy-based voice activity detection.
//!
//! [`VadDetector`] classifies fixed-size frames by RMS energy and trims
//! silence around a clip.  [`UtteranceDetector`] builds on it to find
//! utterance boundaries in a live stream: speech followed by a long enough
//! run of silence ends an utterance.
//!
//! ## Algorithm
//!
//! Audio is split into 30 ms frames (480 samples @ 16 kHz).  A frame is
//! classified as *voice* when its RMS amplitude exceeds the configured
//! threshold.

// ---------------------------------------------------------------------------
// VadDetector
// ---------------------------------------------------------------------------

/// Energy-based frame classifier and silence trimmer.
///
/// # Example
///
/// ```rust
/// use voice_control::audio::VadDetector;
///
/// let vad = VadDetector::new(0.01);
///
/// let mut audio = vec![0.0_f32; 480];
/// audio.extend(vec![0.5_f32; 480]);
/// audio.extend(vec![0.0_f32; 480]);
///
/// let trimmed = vad.trim_silence(&audio);
/// assert_eq!(trimmed.len(), 480);
/// ```
#[derive(Debug, Clone)]
pub struct VadDetector {
    /// RMS amplitude threshold; frames below this are considered silence.
    rms_threshold: f32,
    /// Frame size in samples.  Default: 480 samples = 30 ms at 16 kHz.
    frame_size: usize,
}

impl VadDetector {
    /// Create a [`VadDetector`] with the given RMS threshold.
    ///
    /// `rms_threshold` should be in `[0.0, 1.0]`.  A typical value is
    /// `0.01` for quiet microphones; use `0.02`–`0.05` in noisy rooms.
    pub fn new(rms_threshold: f32) -> Self {
        Self {
            rms_threshold,
            frame_size: 480,
        }
    }

    /// Create a [`VadDetector`] with a custom frame size, for sample rates
    /// other than 16 kHz.
    pub fn with_frame_size(rms_threshold: f32, frame_size: usize) -> Self {
        assert!(frame_size > 0, "frame_size must be > 0");
        Self {
            rms_threshold,
            frame_size,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.rms_threshold
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Returns `true` when `frame` contains voice activity.
    pub fn is_voice_frame(&self, frame: &[f32]) -> bool {
        rms(frame) > self.rms_threshold
    }

    /// Trim leading and trailing silence from `audio`.
    ///
    /// Returns a sub-slice of the original buffer.  If the entire signal is
    /// silent, a zero-length slice is returned.
    pub fn trim_silence<'a>(&self, audio: &'a [f32]) -> &'a [f32] {
        if audio.is_empty() {
            return audio;
        }

        let frame_size = self.frame_size;
        let total_frames = audio.len().div_ceil(frame_size);
        let frame = |i: usize| &audio[i * frame_size..((i + 1) * frame_size).min(audio.len())];

        let Some(start_frame) = (0..total_frames).find(|&i| self.is_voice_frame(frame(i))) else {
            return &audio[0..0];
        };
        let end_frame = (0..total_frames)
            .rfind(|&i| self.is_voice_frame(frame(i)))
            .unwrap_or(start_frame);

        let start = start_frame * frame_size;
        let end = ((end_frame + 1) * frame_size).min(audio.len());
        &audio[start..end]
    }
}

/// Root-mean-square amplitude; zero for an empty slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let mean_sq = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    mean_sq.sqrt()
}

// ---------------------------------------------------------------------------
// UtteranceDetector
// ---------------------------------------------------------------------------

/// What a block of streamed audio meant for the current utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// Nothing heard yet.
    Silence,
    /// Inside an utterance.
    Speech,
    /// Speech was followed by enough silence; the utterance is over.
    UtteranceEnd,
}

/// Streaming endpointer.
///
/// Frames are accumulated across calls, so chunk sizes need not align with
/// the VAD frame size.
#[derive(Debug, Clone)]
pub struct UtteranceDetector {
    vad: VadDetector,
    silence_limit: usize,
    pending: Vec<f32>,
    in_speech: bool,
    silence_run: usize,
}

impl UtteranceDetector {
    /// `silence_limit` is the number of trailing silent samples that ends
    /// an utterance.
    pub fn new(vad: VadDetector, silence_limit: usize) -> Self {
        Self {
            vad,
            silence_limit: silence_limit.max(1),
            pending: Vec::new(),
            in_speech: false,
            silence_run: 0,
        }
    }

    pub fn in_speech(&self) -> bool {
        self.in_speech
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.in_speech = false;
        self.silence_run = 0;
    }

    /// Feed mono samples; reports the state after the last complete frame.
    pub fn feed(&mut self, samples: &[f32]) -> Activity {
        self.pending.extend_from_slice(samples);
        let frame_size = self.vad.frame_size();
        let complete = self.pending.len() / frame_size * frame_size;

        let mut ended = false;
        for frame in self.pending[..complete].chunks_exact(frame_size) {
            if self.vad.is_voice_frame(frame) {
                self.in_speech = true;
                self.silence_run = 0;
            } else if self.in_speech {
                self.silence_run += frame_size;
                if self.silence_run >= self.silence_limit {
                    self.in_speech = false;
                    self.silence_run = 0;
                    ended = true;
                }
            }
        }
        self.pending.drain(..complete);

        if ended {
            Activity::UtteranceEnd
        } else if self.in_speech {
            Activity::Speech
        } else {
            Activity::Silence
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
