//! Node lifecycle states and transitions.
//!
//! ```text
//!  Null ──▶ Ready ──▶ Paused ──▶ Playing
//!   ◀──────   ◀──────   ◀───────
//! ```
//!
//! A request for a non-adjacent state walks every intermediate step in
//! order; each step is a [`StateTransition`] handed to the node.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use super::error_code;

/// Upper bound used by synchronous state changes and state queries.
pub const STATE_CHANGE_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of a processing node or pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum State {
    /// Initial state; no resources held.
    #[default]
    Null,
    /// Resources allocated, no data flowing.
    Ready,
    /// Ready to accept data; sources do not produce.
    Paused,
    /// Data flows.
    Playing,
}

impl State {
    /// The adjacent state one step from `self` in the direction of `target`.
    ///
    /// Returns `self` when already at `target`.
    pub fn step_toward(self, target: State) -> State {
        use State::*;
        match self.cmp(&target) {
            std::cmp::Ordering::Equal => self,
            std::cmp::Ordering::Less => match self {
                Null => Ready,
                Ready => Paused,
                Paused | Playing => Playing,
            },
            std::cmp::Ordering::Greater => match self {
                Playing => Paused,
                Paused => Ready,
                Ready | Null => Null,
            },
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            State::Null => "NULL",
            State::Ready => "READY",
            State::Paused => "PAUSED",
            State::Playing => "PLAYING",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// StateTransition
// ---------------------------------------------------------------------------

/// One adjacent lifecycle step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateTransition {
    NullToReady,
    ReadyToPaused,
    PausedToPlaying,
    PlayingToPaused,
    PausedToReady,
    ReadyToNull,
}

impl StateTransition {
    /// Build the transition between two adjacent states.
    pub fn between(from: State, to: State) -> Option<Self> {
        use State::*;
        match (from, to) {
            (Null, Ready) => Some(Self::NullToReady),
            (Ready, Paused) => Some(Self::ReadyToPaused),
            (Paused, Playing) => Some(Self::PausedToPlaying),
            (Playing, Paused) => Some(Self::PlayingToPaused),
            (Paused, Ready) => Some(Self::PausedToReady),
            (Ready, Null) => Some(Self::ReadyToNull),
            _ => None,
        }
    }

    pub fn from_state(&self) -> State {
        match self {
            Self::NullToReady => State::Null,
            Self::ReadyToPaused | Self::ReadyToNull => State::Ready,
            Self::PausedToPlaying | Self::PausedToReady => State::Paused,
            Self::PlayingToPaused => State::Playing,
        }
    }

    pub fn to_state(&self) -> State {
        match self {
            Self::ReadyToNull => State::Null,
            Self::NullToReady | Self::PausedToReady => State::Ready,
            Self::ReadyToPaused | Self::PlayingToPaused => State::Paused,
            Self::PausedToPlaying => State::Playing,
        }
    }

    /// `true` when moving toward `Playing`.
    pub fn is_upward(&self) -> bool {
        self.to_state() > self.from_state()
    }
}

impl fmt::Display for StateTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from_state(), self.to_state())
    }
}

// ---------------------------------------------------------------------------
// StateChangeError
// ---------------------------------------------------------------------------

/// Why a node refused a lifecycle step.
///
/// A refusal is also reported on the owning pipeline's bus as an error
/// message; [`StateChangeError::code`] supplies the numeric code for it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StateChangeError {
    /// An external resource (file, device, model) could not be acquired.
    #[error("resource unavailable: {0}")]
    Resource(String),

    /// The node is missing required configuration.
    #[error("not configured: {0}")]
    NotConfigured(String),

    /// A streaming thread could not be started.
    #[error("could not start streaming thread: {0}")]
    Thread(String),

    /// Generic refusal.
    #[error("{0}")]
    Failed(String),
}

impl StateChangeError {
    pub fn code(&self) -> i32 {
        match self {
            StateChangeError::Failed(_) => error_code::FAILED,
            StateChangeError::NotConfigured(_) => error_code::NOT_CONFIGURED,
            StateChangeError::Resource(_) => error_code::RESOURCE,
            StateChangeError::Thread(_) => error_code::THREAD,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
