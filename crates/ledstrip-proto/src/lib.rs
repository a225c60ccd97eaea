//! Shared protocol definitions for server ↔ animator communication.
//! Keeping this in a dedicated crate lets the LED surface, the animator
//! process and the HTTP server agree on value types and wire framing
//! without pulling in each other's runtime code.

mod brightness;
mod color;
mod frame;
mod message;

pub use brightness::{Brightness, BrightnessError};
pub use color::{LedColor, LedStrip};
pub use frame::{FrameReader, FrameWriter, ProtocolError, MAX_FRAME_LEN};
pub use message::{ChildMessage, ParentMessage};
