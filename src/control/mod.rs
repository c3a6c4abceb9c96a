//! Synchronous control surface over the asynchronous pipelines.
//!
//! # Overview
//!
//! Each controller owns one pipeline and one [`CompletionLatch`].  The
//! pipeline's bus thread feeds end-of-stream and error messages into the
//! latch; control calls block on it with a bound.
//!
//! ```text
//!  app thread ──start/stop/wait──▶ controller ──set_state / send_event──▶ pipeline
//!      ▲                               ▲                                    │
//!      │ signals                       │ latch (finish / fail)              │ bus
//!      └───────────── notifier / bus dispatch thread ◀──────────────────────┘
//! ```
//!
//! | Controller              | Topology                                              |
//! |-------------------------|-------------------------------------------------------|
//! | [`PlaybackController`]  | filesrc → wavparse → convert → resample → output sink |
//! | [`ListeningController`] | capture → convert → resample → recognizer → fakesink  |

pub mod error;
pub mod latch;
pub mod listening;
pub mod notify;
pub mod playback;

pub use error::{ControlError, EngineError};
pub use latch::{CompletionLatch, WaitOutcome};
pub use listening::ListeningController;
pub use notify::{
    ListeningStarted, ListeningStopped, PlaybackStarted, PlaybackStopped, RecognitionResult,
};
pub use playback::PlaybackController;
