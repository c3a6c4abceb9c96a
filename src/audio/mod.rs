//! Sample-level helpers shared by the audio nodes.
//!
//! # Conversion chain
//!
//! ```text
//! any rate / any channels ─▶ downmix_to_mono ─▶ resample ─▶ 16 kHz mono
//!                                                           │
//!                                                           ▼
//!                                            UtteranceDetector (VAD)
//! ```

pub mod resample;
pub mod vad;

pub use resample::{
    downmix_to_mono, remix, resample, resample_to_16k, upmix_from_mono, RECOGNITION_RATE,
};
pub use vad::{rms, Activity, UtteranceDetector, VadDetector};
