//! Draw static and animated images inside a terminal with sixel graphics.
//!
//! A [`Canvas`] is placed at a screen position, bound to an [`Image`], and
//! then drawn and cleared. Animated images play on a background thread that
//! `clear` (or dropping the canvas) stops before anything is torn down.

pub mod canvas;
pub mod config;
pub mod encoder;
pub mod error;
pub mod input;
pub mod terminal;

pub use canvas::{Canvas, Dimensions};
pub use config::CanvasConfig;
pub use error::{CanvasError, CanvasResult};
pub use input::{FrameSequence, Image};
