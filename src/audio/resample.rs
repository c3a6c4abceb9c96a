//! Sample-rate conversion and channel mixing.
//!
//! Nodes that change the audio format use these helpers:
//!
//! 1. [`downmix_to_mono`]: average interleaved channels into one.
//! 2. [`upmix_from_mono`]: duplicate a mono signal across N channels.
//! 3. [`resample`]: linear-interpolation rate conversion of interleaved
//!    audio, channel by channel.
//!
//! Conversion is stateless per call, so a stream resampled chunk by chunk
//! may show a one-sample seam at chunk boundaries.  That is inaudible for
//! playback and irrelevant for recognition.

/// Sample rate the recognizer works at.
pub const RECOGNITION_RATE: u32 = 16_000;

// ---------------------------------------------------------------------------
// Channel mixing
// ---------------------------------------------------------------------------

/// Mix interleaved multi-channel audio down to mono by averaging all channels.
///
/// The output length is `samples.len() / channels`.
///
/// * `channels == 1` copies the input.
/// * `channels == 0` yields an empty vector.
///
/// # Example
///
/// ```rust
/// use voice_control::audio::downmix_to_mono;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, 0.4]; // L R L R
/// let mono = downmix_to_mono(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[0] - 0.0).abs() < 1e-6);
/// assert!((mono[1] - 0.3).abs() < 1e-6);
/// ```
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

/// Duplicate every mono sample into `channels` interleaved channels.
pub fn upmix_from_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => samples
            .iter()
            .flat_map(|&s| std::iter::repeat(s).take(n as usize))
            .collect(),
    }
}

/// Convert interleaved audio between channel counts.
///
/// Equal counts copy; anything else goes through mono.
pub fn remix(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    if from == to {
        return samples.to_vec();
    }
    upmix_from_mono(&downmix_to_mono(samples, from), to)
}

// ---------------------------------------------------------------------------
// resample
// ---------------------------------------------------------------------------

/// Resample interleaved `samples` from `from_rate` to `to_rate` Hz using
/// linear interpolation.
///
/// * Equal rates (or a zero rate on either side) copy the input unchanged.
/// * Empty input yields empty output.
///
/// The output holds approximately `frames * to_rate / from_rate` frames.
///
/// # Example
///
/// ```rust
/// use voice_control::audio::resample;
///
/// // 10 ms of stereo at 48 kHz → 10 ms of stereo at 16 kHz
/// let hi = vec![0.5_f32; 960];
/// let lo = resample(&hi, 2, 48_000, 16_000);
/// assert_eq!(lo.len(), 320);
/// ```
pub fn resample(samples: &[f32], channels: u16, from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || channels == 0 {
        return samples.to_vec();
    }
    if samples.is_empty() {
        return Vec::new();
    }

    let ch = channels as usize;
    let frames = samples.len() / ch;
    let ratio = to_rate as f64 / from_rate as f64;
    let out_frames = (frames as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(out_frames * ch);

    for i in 0..out_frames {
        let src_pos = i as f64 / ratio;
        let idx = src_pos as usize;
        let frac = (src_pos - idx as f64) as f32;

        for c in 0..ch {
            let at = |frame: usize| samples[frame * ch + c];
            let sample = if idx + 1 < frames {
                at(idx) * (1.0 - frac) + at(idx + 1) * frac
            } else if idx < frames {
                at(idx)
            } else {
                0.0
            };
            output.push(sample);
        }
    }

    output
}

/// Mono convenience wrapper: resample to the recognition rate.
pub fn resample_to_16k(samples: &[f32], source_rate: u32) -> Vec<f32> {
    resample(samples, 1, source_rate, RECOGNITION_RATE)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
