use std::collections::BTreeMap;
use std::io::Write;
use tracing::debug;

use super::{FrameEncoder, OutputSink, Palette};
use crate::error::{CanvasError, CanvasResult};

const DCS_INTRODUCER: &[u8] = b"\x1bP0;1;0q";
const STRING_TERMINATOR: &[u8] = b"\x1b\\";
const SIXEL_OFFSET: u8 = 0x3f;
const BAND_HEIGHT: usize = 6;
// Shorter runs are cheaper spelled out than as "!n"
const MIN_REPEAT: usize = 4;

/// Encodes indexed frames as DEC sixel graphics
#[derive(Debug, Default, Clone)]
pub struct SixelEncoder;

impl SixelEncoder {
    pub fn new() -> Self {
        Self
    }

    fn check_geometry(pixels: &[u8], width: usize, height: usize, palette: &Palette) -> CanvasResult<()> {
        if width == 0 || height == 0 {
            return Err(CanvasError::encoding(format!(
                "cannot encode a {}x{} frame",
                width, height
            )));
        }

        let expected = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(3))
            .ok_or_else(|| CanvasError::encoding("frame size overflows usize"))?;
        if pixels.len() != expected {
            return Err(CanvasError::encoding(format!(
                "frame buffer holds {} bytes, {}x{} RGB needs {}",
                pixels.len(),
                width,
                height,
                expected
            )));
        }

        if palette.width() != width || palette.height() != height {
            return Err(CanvasError::encoding(format!(
                "palette was built for {}x{}, frame is {}x{}",
                palette.width(),
                palette.height(),
                width,
                height
            )));
        }

        Ok(())
    }

    fn write_header(out: &mut Vec<u8>, width: usize, height: usize, palette: &Palette) -> std::io::Result<()> {
        out.extend_from_slice(DCS_INTRODUCER);
        // Raster attributes: 1:1 aspect, full extent so the terminal can size the image up front
        write!(out, "\"1;1;{};{}", width, height)?;

        for (i, [r, g, b]) in palette.colors().iter().enumerate() {
            write!(
                out,
                "#{};2;{};{};{}",
                i,
                to_percent(*r),
                to_percent(*g),
                to_percent(*b)
            )?;
        }

        Ok(())
    }

    fn write_band(out: &mut Vec<u8>, indices: &[u8], width: usize, top: usize, rows: usize) -> std::io::Result<()> {
        // One bit row per colour present in this band, ordered by register
        let mut planes: BTreeMap<u8, Vec<u8>> = BTreeMap::new();
        for dy in 0..rows {
            let row = &indices[(top + dy) * width..(top + dy + 1) * width];
            for (x, &color) in row.iter().enumerate() {
                planes.entry(color).or_insert_with(|| vec![0; width])[x] |= 1 << dy;
            }
        }

        for (n, (color, bits)) in planes.iter().enumerate() {
            if n > 0 {
                out.push(b'$');
            }
            write!(out, "#{}", color)?;

            // Trailing blank sixels are implied by the carriage return
            let used = bits.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
            write_runs(out, &bits[..used])?;
        }

        Ok(())
    }
}

impl FrameEncoder for SixelEncoder {
    fn encode(
        &self,
        pixels: &[u8],
        width: usize,
        height: usize,
        palette: &Palette,
        sink: &mut OutputSink,
    ) -> CanvasResult<()> {
        Self::check_geometry(pixels, width, height, palette)?;

        let indices = palette.map_pixels(pixels);

        // Build the whole frame before touching the sink so a failure leaves it as it was
        let mut out = Vec::with_capacity(width * height / 2 + 64);
        Self::write_header(&mut out, width, height, palette)?;

        for top in (0..height).step_by(BAND_HEIGHT) {
            if top > 0 {
                out.push(b'-');
            }
            let rows = BAND_HEIGHT.min(height - top);
            Self::write_band(&mut out, &indices, width, top, rows)?;
        }

        out.extend_from_slice(STRING_TERMINATOR);

        debug!(width, height, bytes = out.len(), "encoded sixel frame");
        sink.extend(&out);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sixel"
    }
}

fn to_percent(channel: u8) -> u32 {
    (channel as u32 * 100 + 127) / 255
}

fn write_runs(out: &mut Vec<u8>, bits: &[u8]) -> std::io::Result<()> {
    let mut x = 0;
    while x < bits.len() {
        let value = bits[x];
        let run = bits[x..].iter().take_while(|&&b| b == value).count();
        let ch = SIXEL_OFFSET + value;

        if run >= MIN_REPEAT {
            write!(out, "!{}", run)?;
            out.push(ch);
        } else {
            out.extend(std::iter::repeat(ch).take(run));
        }

        x += run;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{MedianCut, PaletteBuilder, PixelFormat};

    const SCENARIO: [u8; 12] = [255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255];

    fn encode_to_vec(pixels: &[u8], width: usize, height: usize, palette: &Palette) -> CanvasResult<Vec<u8>> {
        let mut sink = OutputSink::new();
        SixelEncoder::new().encode(pixels, width, height, palette, &mut sink)?;
        Ok(sink.as_bytes().to_vec())
    }

    #[test]
    fn test_frame_is_self_terminating() {
        let palette = MedianCut::default()
            .build(&SCENARIO, 2, 2, PixelFormat::Rgb888)
            .unwrap();
        let bytes = encode_to_vec(&SCENARIO, 2, 2, &palette).unwrap();

        assert!(bytes.starts_with(b"\x1bP0;1;0q\"1;1;2;2"));
        assert!(bytes.ends_with(b"\x1b\\"));
        // One band, so no graphics newline
        assert!(!bytes.contains(&b'-'));
    }

    #[test]
    fn test_color_registers_in_percent() {
        let palette = Palette::new(vec![[255, 0, 0], [0, 0, 0]], 1, 1).unwrap();
        let bytes = encode_to_vec(&[255, 0, 0], 1, 1, &palette).unwrap();
        let text = String::from_utf8(bytes).unwrap();

        assert!(text.contains("#0;2;100;0;0"));
        assert!(text.contains("#1;2;0;0;0"));
        // Single top pixel of register 0: bit 0 set
        assert!(text.contains("#0@"));
    }

    #[test]
    fn test_long_runs_are_compressed() {
        let palette = Palette::new(vec![[0, 0, 0]], 10, 1).unwrap();
        let pixels = vec![0u8; 10 * 3];
        let text = String::from_utf8(encode_to_vec(&pixels, 10, 1, &palette).unwrap()).unwrap();
        assert!(text.contains("#0!10@"));
    }

    #[test]
    fn test_bands_are_separated() {
        let palette = Palette::new(vec![[0, 0, 0]], 1, 7).unwrap();
        let pixels = vec![0u8; 7 * 3];
        let text = String::from_utf8(encode_to_vec(&pixels, 1, 7, &palette).unwrap()).unwrap();
        // Six rows fill the first sixel, the seventh starts a new band
        assert!(text.contains("#0~-#0@"));
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let pixels: Vec<u8> = (0..(16 * 9 * 3)).map(|i| (i * 53 % 256) as u8).collect();
        let palette = MedianCut::new(32)
            .build(&pixels, 16, 9, PixelFormat::Rgb888)
            .unwrap();

        let first = encode_to_vec(&pixels, 16, 9, &palette).unwrap();
        for _ in 0..5 {
            assert_eq!(first, encode_to_vec(&pixels, 16, 9, &palette).unwrap());
        }
    }

    #[test]
    fn test_length_mismatch_leaves_sink_untouched() {
        let palette = MedianCut::default()
            .build(&SCENARIO, 2, 2, PixelFormat::Rgb888)
            .unwrap();
        let mut sink = OutputSink::new();
        sink.extend(b"previous");

        let err = SixelEncoder::new()
            .encode(&SCENARIO[..9], 2, 2, &palette, &mut sink)
            .unwrap_err();

        assert!(matches!(err, CanvasError::Encoding(_)));
        assert_eq!(sink.as_bytes(), b"previous");
    }

    #[test]
    fn test_palette_geometry_mismatch_rejected() {
        let palette = MedianCut::default()
            .build(&SCENARIO, 4, 1, PixelFormat::Rgb888)
            .unwrap();
        let mut sink = OutputSink::new();

        let err = SixelEncoder::new()
            .encode(&SCENARIO, 2, 2, &palette, &mut sink)
            .unwrap_err();

        assert!(matches!(err, CanvasError::Encoding(_)));
        assert!(sink.is_empty());
    }
}
