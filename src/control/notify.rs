//! Payloads of the controllers' upward notifications.
//!
//! Handlers run on whichever thread emits: the caller of a controller
//! method, a pipeline's bus dispatch thread, or a playback notifier thread.

use std::path::PathBuf;

use crate::decoder::SearchMode;

/// A playback start was attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackStarted {
    pub file: PathBuf,
    pub accepted: bool,
}

/// A playback session finished, naturally or through `stop_playing`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackStopped {
    pub file: PathBuf,
}

/// A listening start was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListeningStarted {
    pub mode: SearchMode,
    pub accepted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListeningStopped;

/// Text accepted by the active search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    pub text: String,
    pub success: bool,
}
