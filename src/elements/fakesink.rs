//! `fakesink`: swallows everything, reports EOS to the bus.

use std::time::{Duration, Instant};

use super::bool_value;
use crate::graph::{
    Buffer, Caps, ElementContext, ElementImpl, Event, FlowError, FlowResult, PropertyError, State,
    StateChangeError, StateTransition, Value,
};

#[derive(Debug, Default)]
pub struct FakeSink {
    /// Hold each audio buffer for its duration.
    sync: bool,
    buffers: u64,
}

impl ElementImpl for FakeSink {
    fn sink_caps(&self) -> Option<Caps> {
        Some(Caps::Any)
    }

    fn set_property(&mut self, name: &str, value: &Value, _: State) -> Result<(), PropertyError> {
        match name {
            "sync" => self.sync = bool_value(name, value)?,
            "buffers" => return Err(PropertyError::ReadOnly(name.to_owned())),
            _ => return Err(PropertyError::Unknown(name.to_owned())),
        }
        Ok(())
    }

    fn property(&self, name: &str) -> Result<Value, PropertyError> {
        match name {
            "sync" => Ok(Value::from(self.sync)),
            "buffers" => Ok(Value::from(self.buffers)),
            _ => Err(PropertyError::Unknown(name.to_owned())),
        }
    }

    fn change_state(
        &mut self,
        _ctx: &ElementContext<'_>,
        transition: StateTransition,
    ) -> Result<(), StateChangeError> {
        if transition == StateTransition::ReadyToPaused {
            self.buffers = 0;
        }
        Ok(())
    }

    fn chain(&mut self, ctx: &ElementContext<'_>, buffer: Buffer) -> FlowResult {
        self.buffers += 1;
        if let (true, Buffer::Audio(chunk)) = (self.sync, &buffer) {
            let until = Instant::now() + chunk.duration();
            while let Some(left) = until.checked_duration_since(Instant::now()) {
                if ctx.is_flushing() {
                    return Err(FlowError::Flushing);
                }
                std::thread::sleep(left.min(Duration::from_millis(10)));
            }
        }
        Ok(())
    }

    fn event(&mut self, ctx: &ElementContext<'_>, event: Event) -> bool {
        if event == Event::Eos {
            log::debug!("{}: end of stream after {} buffers", ctx.name(), self.buffers);
            ctx.post_eos();
        }
        true
    }
}
