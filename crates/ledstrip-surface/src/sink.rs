use async_trait::async_trait;
use ledstrip_proto::{LedColor, LedStrip};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("pixel sink failed: {0}")]
pub struct SinkError(pub String);

/// Destination for rendered frames. Hardware drivers implement this; the
/// surface only ever hands it fully rendered pixels.
#[async_trait]
pub trait PixelSink: Send + Sync {
    async fn write(&self, pixels: &[LedColor]) -> Result<(), SinkError>;
}

/// Discards every frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl PixelSink for NullSink {
    async fn write(&self, _pixels: &[LedColor]) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Keeps every frame it receives in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    frames: parking_lot::Mutex<Vec<LedStrip>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_frame(&self) -> Option<LedStrip> {
        self.frames.lock().last().cloned()
    }
}

#[async_trait]
impl PixelSink for MemorySink {
    async fn write(&self, pixels: &[LedColor]) -> Result<(), SinkError> {
        self.frames.lock().push(LedStrip::from(pixels.to_vec()));
        Ok(())
    }
}
