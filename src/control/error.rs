//! Failure taxonomy for the controllers.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::graph::{Message, State};

/// An asynchronous `Error` message observed on a pipeline bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    /// Name of the node that posted the error.
    pub element: String,
    pub code: i32,
    pub description: String,
}

impl EngineError {
    /// `Some` for [`Message::Error`], `None` for every other message.
    pub fn from_message(message: &Message) -> Option<Self> {
        match message {
            Message::Error {
                source,
                code,
                description,
            } => Some(Self {
                element: source.clone(),
                code: *code,
                description: description.clone(),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} reported error {}: {}",
            self.element, self.code, self.description
        )
    }
}

impl std::error::Error for EngineError {}

/// Conditions that end a playback or listening session.
///
/// "Not possible right now" outcomes (already playing, not listening) are
/// reported as `false` by the controllers, not as a `ControlError`.
#[derive(Debug, Clone, Error)]
pub enum ControlError {
    /// A pipeline or one of its nodes could not be created.
    #[error("Construction failed: {0}")]
    Construction(String),

    #[error("Could not reach {target}: {context}")]
    Transition { target: State, context: String },

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// The decoder rejected a key phrase, grammar, lexicon, language or mode.
    #[error("Configuration failed: {0}")]
    Configuration(String),

    #[error("{operation} did not finish within {bound:?}")]
    Timeout {
        operation: &'static str,
        bound: Duration,
    },
}

impl ControlError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ControlError::Timeout { .. })
    }
}

/// Log `err` at error level and hand it back for propagation.
pub(crate) fn fatal(component: &str, err: ControlError) -> ControlError {
    log::error!("{component}: {err}");
    err
}
