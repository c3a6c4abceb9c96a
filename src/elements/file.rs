//! `filesrc`: reads a file and pushes it downstream in blocks.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use super::{uint_value, str_value, writable_until_ready};
use crate::graph::{
    Buffer, Caps, ElementContext, ElementImpl, FlowError, FlowResult, PropertyError, State,
    StateChangeError, StateTransition, Value,
};

const DEFAULT_BLOCKSIZE: usize = 4096;

#[derive(Debug)]
pub struct FileSrc {
    location: Option<PathBuf>,
    blocksize: usize,
    file: Option<File>,
}

impl Default for FileSrc {
    fn default() -> Self {
        Self {
            location: None,
            blocksize: DEFAULT_BLOCKSIZE,
            file: None,
        }
    }
}

impl ElementImpl for FileSrc {
    fn src_caps(&self) -> Option<Caps> {
        Some(Caps::Bytes)
    }

    fn set_property(&mut self, name: &str, value: &Value, state: State) -> Result<(), PropertyError> {
        match name {
            "location" => {
                writable_until_ready(name, state)?;
                let path = str_value(name, value)?;
                self.location = (!path.is_empty()).then(|| PathBuf::from(path));
            }
            "blocksize" => {
                let size = uint_value(name, value)?;
                self.blocksize = usize::try_from(size)
                    .ok()
                    .filter(|&s| s > 0)
                    .ok_or_else(|| PropertyError::type_mismatch(name, "positive size", value))?;
            }
            _ => return Err(PropertyError::Unknown(name.to_owned())),
        }
        Ok(())
    }

    fn property(&self, name: &str) -> Result<Value, PropertyError> {
        match name {
            "location" => self
                .location
                .as_deref()
                .map(Value::from)
                .ok_or_else(|| PropertyError::NotSet(name.to_owned())),
            "blocksize" => Ok(Value::from(self.blocksize)),
            _ => Err(PropertyError::Unknown(name.to_owned())),
        }
    }

    fn change_state(
        &mut self,
        ctx: &ElementContext<'_>,
        transition: StateTransition,
    ) -> Result<(), StateChangeError> {
        match transition {
            StateTransition::ReadyToPaused => {
                let path = self
                    .location
                    .as_ref()
                    .ok_or_else(|| StateChangeError::NotConfigured("no file location set".into()))?;
                let file = File::open(path).map_err(|e| {
                    StateChangeError::Resource(format!(
                        "could not open file \"{}\" for reading: {e}",
                        path.display()
                    ))
                })?;
                log::debug!("{}: opened {}", ctx.name(), path.display());
                self.file = Some(file);
            }
            StateTransition::PausedToReady => self.file = None,
            _ => {}
        }
        Ok(())
    }

    fn create(&mut self, _ctx: &ElementContext<'_>) -> FlowResult<Option<Buffer>> {
        let file = self.file.as_mut().ok_or(FlowError::Flushing)?;
        let mut block = vec![0_u8; self.blocksize];
        let n = file
            .read(&mut block)
            .map_err(|e| FlowError::Error(format!("read failed: {e}")))?;
        if n == 0 {
            return Err(FlowError::Eos);
        }
        block.truncate(n);
        Ok(Some(Buffer::Bytes(block)))
    }
}
