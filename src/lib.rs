//! Voice control: play audio files and listen for spoken commands through
//! an in-process streaming graph.
//!
//! | Module       | Contents                                                   |
//! |--------------|------------------------------------------------------------|
//! | [`graph`]    | Pads, elements, pipelines, bus, lifecycle, parser          |
//! | [`elements`] | Built-in nodes (file, WAV, convert, devices, recognizer)   |
//! | [`audio`]    | Resampling, channel mixing, energy VAD                     |
//! | [`decoder`]  | Recognition engine: searches, grammars, lexicon, Whisper   |
//! | [`control`]  | `PlaybackController`, `ListeningController`                |
//! | [`signal`]   | Multi-subscriber notifications                             |
//! | [`config`]   | TOML settings and platform paths                           |

pub mod audio;
pub mod config;
pub mod control;
pub mod decoder;
pub mod elements;
pub mod graph;
pub mod signal;
