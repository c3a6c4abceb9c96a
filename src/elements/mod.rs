//! Built-in processing nodes.
//!
//! | Factory          | Pads            | Module        |
//! |------------------|-----------------|---------------|
//! | `filesrc`        | src             | [`file`]      |
//! | `wavparse`       | sink → src      | [`wav`]       |
//! | `audioconvert`   | sink → src      | [`convert`]   |
//! | `audioresample`  | sink → src      | [`convert`]   |
//! | `audiotestsrc`   | src             | [`testsrc`]   |
//! | `fakesink`       | sink            | [`fakesink`]  |
//! | `recognizer`     | sink → src      | [`recognizer`]|
//! | `autoaudiosrc`   | src             | `device`      |
//! | `autoaudiosink`  | sink            | `device`      |
//!
//! All of them are registered with the graph registry on first use.

pub mod convert;
#[cfg(feature = "device")]
pub mod device;
pub mod fakesink;
pub mod file;
pub mod recognizer;
pub mod testsrc;
pub mod wav;

use std::sync::Arc;

use crate::graph::{Constructor, ElementImpl, PropertyError, State, Value};

pub use convert::{AudioConvert, AudioResample};
#[cfg(feature = "device")]
pub use device::{AutoAudioSink, AutoAudioSrc};
pub use fakesink::FakeSink;
pub use file::FileSrc;
pub use recognizer::Recognizer;
pub use testsrc::AudioTestSrc;
pub use wav::WavParse;

fn constructor<T: ElementImpl + Default>() -> Constructor {
    Arc::new(|| Box::new(T::default()) as Box<dyn ElementImpl>)
}

/// Hand every built-in factory to `register`.
pub(crate) fn register_builtin(register: &mut dyn FnMut(&str, Constructor)) {
    register("filesrc", constructor::<FileSrc>());
    register("wavparse", constructor::<WavParse>());
    register("audioconvert", constructor::<AudioConvert>());
    register("audioresample", constructor::<AudioResample>());
    register("audiotestsrc", constructor::<AudioTestSrc>());
    register("fakesink", constructor::<FakeSink>());
    register("recognizer", constructor::<Recognizer>());
    #[cfg(feature = "device")]
    {
        register("autoaudiosrc", constructor::<AutoAudioSrc>());
        register("autoaudiosink", constructor::<AutoAudioSink>());
    }
}

// ---------------------------------------------------------------------------
// Property helpers
// ---------------------------------------------------------------------------

pub(crate) fn int_value(name: &str, value: &Value) -> Result<i64, PropertyError> {
    value
        .to_i64()
        .ok_or_else(|| PropertyError::type_mismatch(name, "int", value))
}

pub(crate) fn uint_value(name: &str, value: &Value) -> Result<u64, PropertyError> {
    value
        .to_u64()
        .ok_or_else(|| PropertyError::type_mismatch(name, "unsigned int", value))
}

pub(crate) fn double_value(name: &str, value: &Value) -> Result<f64, PropertyError> {
    value
        .to_f64()
        .ok_or_else(|| PropertyError::type_mismatch(name, "double", value))
}

pub(crate) fn bool_value(name: &str, value: &Value) -> Result<bool, PropertyError> {
    value
        .to_bool()
        .ok_or_else(|| PropertyError::type_mismatch(name, "bool", value))
}

pub(crate) fn str_value<'v>(name: &str, value: &'v Value) -> Result<&'v str, PropertyError> {
    value
        .as_str()
        .ok_or_else(|| PropertyError::type_mismatch(name, "string", value))
}

/// Reject a change to `name` once the node has left Null/Ready.
pub(crate) fn writable_until_ready(name: &str, state: State) -> Result<(), PropertyError> {
    if state > State::Ready {
        return Err(PropertyError::WrongState {
            property: name.to_owned(),
            state,
        });
    }
    Ok(())
}

fn u32_value(name: &str, value: &Value) -> Result<u32, PropertyError> {
    let v = uint_value(name, value)?;
    u32::try_from(v).map_err(|_| PropertyError::type_mismatch(name, "u32", value))
}

fn u16_value(name: &str, value: &Value) -> Result<u16, PropertyError> {
    let v = uint_value(name, value)?;
    u16::try_from(v).map_err(|_| PropertyError::type_mismatch(name, "u16", value))
}
