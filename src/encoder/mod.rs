mod palette;
mod sixel;

pub use palette::{
    Diffusion, MedianCut, Palette, PaletteBuilder, PixelFormat, Quality, MAX_PALETTE_COLORS,
};
pub use sixel::SixelEncoder;

use crate::error::CanvasResult;

/// Trait for in-band graphics encoders
///
/// Implementations must be deterministic: the same pixels and palette always
/// produce the same bytes. They append to the sink and never move the cursor.
pub trait FrameEncoder: Send {
    fn encode(
        &self,
        pixels: &[u8],
        width: usize,
        height: usize,
        palette: &Palette,
        sink: &mut OutputSink,
    ) -> CanvasResult<()>;

    fn name(&self) -> &'static str;
}

/// Reusable buffer holding one encoded frame until it is flushed to the terminal
#[derive(Debug, Default)]
pub struct OutputSink {
    buffer: Vec<u8>,
}

impl OutputSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop the contents but keep the allocation for the next frame
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_keeps_allocation() {
        let mut sink = OutputSink::new();
        sink.extend(b"\x1bPq~\x1b\\");
        let capacity = sink.buffer.capacity();

        sink.clear();
        assert!(sink.is_empty());
        assert_eq!(sink.buffer.capacity(), capacity);
    }
}
