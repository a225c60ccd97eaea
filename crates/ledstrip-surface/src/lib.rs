//! In-memory model of an addressable LED strip.
//!
//! Pixel writes land in a buffer; [`LedSurface::show`] renders the buffer at
//! the current brightness, hands the frame to the [`PixelSink`] and notifies
//! strip listeners. [`LedSurface::led_strip`] always returns the last rendered
//! frame, never the raw buffer.

mod sink;

use std::sync::Arc;

use ledstrip_proto::{Brightness, LedColor, LedStrip};
use thiserror::Error;
use tracing::trace;

pub use sink::{MemorySink, NullSink, PixelSink, SinkError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("led index {index} out of range (strip has {len} leds)")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("led strip must contain exactly {expected} leds (received {actual})")]
    LengthMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    Sink(#[from] SinkError),
}

pub type SurfaceResult<T> = Result<T, SurfaceError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type StripListener = Arc<dyn Fn(&LedStrip) + Send + Sync>;
type BrightnessListener = Arc<dyn Fn(Brightness) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    strip: Vec<(ListenerId, StripListener)>,
    brightness: Vec<(ListenerId, BrightnessListener)>,
}

impl Listeners {
    fn next_id(&mut self) -> ListenerId {
        self.next_id += 1;
        ListenerId(self.next_id)
    }
}

struct PixelState {
    buffer: Vec<LedColor>,
    rendered: LedStrip,
    brightness: Brightness,
}

pub struct LedSurface {
    len: usize,
    state: parking_lot::Mutex<PixelState>,
    listeners: parking_lot::RwLock<Listeners>,
    // Serializes render, sink write and notification so listeners observe
    // frames in the order they were rendered.
    show_lock: tokio::sync::Mutex<()>,
    sink: Arc<dyn PixelSink>,
}

impl LedSurface {
    pub fn new(len: usize) -> Self {
        Self::with_sink(len, Arc::new(NullSink))
    }

    pub fn with_sink(len: usize, sink: Arc<dyn PixelSink>) -> Self {
        Self {
            len,
            state: parking_lot::Mutex::new(PixelState {
                buffer: vec![LedColor::OFF; len],
                rendered: LedStrip::filled(len, LedColor::OFF),
                brightness: Brightness::default(),
            }),
            listeners: parking_lot::RwLock::new(Listeners::default()),
            show_lock: tokio::sync::Mutex::new(()),
            sink,
        }
    }

    pub fn led_count(&self) -> usize {
        self.len
    }

    pub fn set_brightness(&self, brightness: Brightness) -> &Self {
        self.state.lock().brightness = brightness;
        self.notify_brightness(brightness);
        self
    }

    /// Change the brightness without notifying brightness listeners, for a
    /// value that has already been announced.
    pub fn restore_brightness(&self, brightness: Brightness) -> &Self {
        self.state.lock().brightness = brightness;
        self
    }

    pub fn brightness(&self) -> Brightness {
        self.state.lock().brightness
    }

    pub fn set_led(&self, index: usize, color: LedColor) -> SurfaceResult<&Self> {
        let mut state = self.state.lock();
        let slot = state
            .buffer
            .get_mut(index)
            .ok_or(SurfaceError::IndexOutOfRange {
                index,
                len: self.len,
            })?;
        *slot = color;
        Ok(self)
    }

    pub fn fill_leds(&self, color: LedColor) -> &Self {
        self.state.lock().buffer.fill(color);
        self
    }

    pub fn clear_leds(&self) -> &Self {
        self.fill_leds(LedColor::OFF)
    }

    pub fn set_led_strip(&self, strip: &LedStrip) -> SurfaceResult<&Self> {
        if strip.len() != self.len {
            return Err(SurfaceError::LengthMismatch {
                expected: self.len,
                actual: strip.len(),
            });
        }
        self.state.lock().buffer.copy_from_slice(strip.as_slice());
        Ok(self)
    }

    /// The last rendered frame.
    pub fn led_strip(&self) -> LedStrip {
        self.state.lock().rendered.clone()
    }

    pub async fn show(&self) -> SurfaceResult<()> {
        let _guard = self.show_lock.lock().await;
        let rendered = {
            let mut state = self.state.lock();
            let level = effective_level(state.brightness, &state.buffer);
            let frame: LedStrip = state.buffer.iter().map(|c| c.scaled(level)).collect();
            state.rendered = frame.clone();
            frame
        };
        self.sink.write(rendered.as_slice()).await?;
        trace!(leds = rendered.len(), "rendered frame");
        self.notify_strip(&rendered);
        Ok(())
    }

    pub fn on_led_strip_changed<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&LedStrip) + Send + Sync + 'static,
    {
        let mut guard = self.listeners.write();
        let id = guard.next_id();
        guard.strip.push((id, Arc::new(listener)));
        id
    }

    pub fn on_brightness_changed<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(Brightness) + Send + Sync + 'static,
    {
        let mut guard = self.listeners.write();
        let id = guard.next_id();
        guard.brightness.push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut guard = self.listeners.write();
        let before = guard.strip.len() + guard.brightness.len();
        guard.strip.retain(|(existing, _)| *existing != id);
        guard.brightness.retain(|(existing, _)| *existing != id);
        before != guard.strip.len() + guard.brightness.len()
    }

    fn notify_strip(&self, strip: &LedStrip) {
        let pending: Vec<StripListener> = self
            .listeners
            .read()
            .strip
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in pending {
            listener(strip);
        }
    }

    fn notify_brightness(&self, brightness: Brightness) {
        let pending: Vec<BrightnessListener> = self
            .listeners
            .read()
            .brightness
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in pending {
            listener(brightness);
        }
    }
}

/// Resolve `auto` to a concrete level: full brightness until the frame would
/// draw more than half of the strip's maximum channel total, then scaled down
/// to stay at that budget.
fn effective_level(brightness: Brightness, buffer: &[LedColor]) -> u8 {
    match brightness {
        Brightness::Level(level) => level,
        Brightness::Auto => {
            let total: u64 = buffer.iter().map(|c| u64::from(c.channel_sum())).sum();
            let budget = buffer.len() as u64 * 3 * 255 / 2;
            if total <= budget {
                100
            } else {
                (100 * budget / total) as u8
            }
        }
    }
}
