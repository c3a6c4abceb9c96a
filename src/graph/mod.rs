//! In-process streaming graph engine.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────── Pipeline ─────────────────────────────┐
//! │                                                                    │
//! │  ┌─────────┐ src   sink ┌─────────┐ src   sink ┌─────────┐         │
//! │  │ source  │──────────▶│ filter  │──────────▶│  sink   │         │
//! │  └────┬────┘   Pad      └─────────┘   Pad      └────┬────┘         │
//! │       │ streaming thread pushes buffers + events     │ post         │
//! │       ▼                                              ▼              │
//! │                      bus ──▶ dispatch thread ──▶ callback /        │
//! │                                                subscribers         │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use voice_control::graph::{Message, Pipeline, State};
//!
//! let pipeline = Pipeline::parse("audiotestsrc num-buffers=10 ! fakesink").unwrap();
//! pipeline.set_bus_callback(|msg| {
//!     if let Message::Eos { .. } = msg {
//!         println!("done");
//!     }
//! });
//! pipeline.set_state(State::Playing, false);
//! ```

pub mod buffer;
pub mod bus;
pub mod element;
pub mod pad;
pub mod parse;
pub mod pipeline;
pub mod registry;
pub mod state;
pub mod value;

use std::sync::{Mutex, MutexGuard, PoisonError};

// ── Public re-exports ──────────────────────────────────────────────────────

pub use buffer::{AudioChunk, Buffer, Caps, Event, FlowError, FlowResult};
pub use bus::{Bus, Message};
pub use element::{Element, ElementContext, ElementImpl, PropertyError};
pub use pad::{Pad, PadDirection, ProbeInfo, ProbeReturn};
pub use parse::ParseError;
pub use pipeline::Pipeline;
pub use registry::{is_registered, register_element, Constructor};
pub use state::{State, StateChangeError, StateTransition, STATE_CHANGE_TIMEOUT};
pub use value::{FromValue, Structure, Value};

/// Numeric codes carried by [`Message::Error`].
pub mod error_code {
    pub const FAILED: i32 = 1;
    pub const NOT_CONFIGURED: i32 = 2;
    pub const RESOURCE: i32 = 3;
    pub const THREAD: i32 = 4;
    pub const STREAM: i32 = 5;
    pub const DECODE: i32 = 6;
}

/// Lock a mutex, recovering the data if another thread panicked while
/// holding it.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
