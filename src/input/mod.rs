use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Delay used when a GIF frame asks for 0 (browsers do the same)
pub const DEFAULT_FRAME_DELAY: Duration = Duration::from_millis(100);

/// Pixel source a canvas draws from
///
/// `next_frame` takes `&self`: the frame cursor lives behind interior
/// mutability so one image can be shared with the animation thread without a
/// lock. Pixel memory stays owned by the image and is never written by the
/// canvas.
pub trait Image: Send + Sync {
    /// Packed RGB888 pixels of the current frame
    fn data(&self) -> &[u8];
    fn width(&self) -> usize;
    fn height(&self) -> usize;
    fn is_animated(&self) -> bool;
    /// Advance the frame cursor, wrapping after the last frame
    fn next_frame(&self);
    /// How long the current frame stays on screen
    fn frame_delay(&self) -> Duration;
}

/// Decoded frames held in memory
pub struct FrameSequence {
    frames: Vec<Vec<u8>>,
    delays: Vec<Duration>,
    width: usize,
    height: usize,
    cursor: AtomicUsize,
}

impl FrameSequence {
    /// Build from raw RGB frames that all share `width`x`height`
    pub fn from_rgb(frames: Vec<Vec<u8>>, delays: Vec<Duration>, width: usize, height: usize) -> Result<Self> {
        if frames.is_empty() {
            bail!("image has no frames");
        }

        let expected = width * height * 3;
        if let Some((i, frame)) = frames.iter().enumerate().find(|(_, f)| f.len() != expected) {
            bail!(
                "frame {} holds {} bytes, {}x{} RGB needs {}",
                i,
                frame.len(),
                width,
                height,
                expected
            );
        }

        Ok(Self {
            frames,
            delays,
            width,
            height,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn open(path: &Path) -> Result<Self> {
        if path.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("gif")) == Some(true) {
            let file = File::open(path)
                .with_context(|| format!("Failed to open GIF: {}", path.display()))?;
            Self::decode_gif(BufReader::new(file))
                .with_context(|| format!("Failed to decode GIF: {}", path.display()))
        } else {
            let img = image::open(path)
                .with_context(|| format!("Failed to load image: {}", path.display()))?;
            Ok(Self::from_dynamic(img))
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.starts_with(b"GIF8") {
            Self::decode_gif(data).context("Failed to decode GIF")
        } else {
            let img = image::load_from_memory(data).context("Failed to load image")?;
            Ok(Self::from_dynamic(img))
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Index of the frame `data()` currently returns
    pub fn current_frame(&self) -> usize {
        self.cursor.load(Ordering::Acquire) % self.frames.len()
    }

    fn from_dynamic(img: image::DynamicImage) -> Self {
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        let mut rgb = vec![0u8; width as usize * height as usize * 3];
        blend_rgba_onto(&mut rgb, rgba.as_raw());

        Self {
            frames: vec![rgb],
            delays: vec![DEFAULT_FRAME_DELAY],
            width: width as usize,
            height: height as usize,
            cursor: AtomicUsize::new(0),
        }
    }

    fn decode_gif<R: Read>(reader: R) -> Result<Self> {
        let mut options = gif::DecodeOptions::new();
        options.set_color_output(gif::ColorOutput::RGBA);
        let mut decoder = options.read_info(reader)?;

        let width = decoder.width() as usize;
        let height = decoder.height() as usize;

        let mut frames = Vec::new();
        let mut delays = Vec::new();
        // Each GIF frame may only cover part of the screen; draw it over the previous one
        let mut screen = vec![0u8; width * height * 3];

        while let Some(frame) = decoder.read_next_frame()? {
            let left = frame.left as usize;
            let top = frame.top as usize;
            let frame_width = frame.width as usize;
            if frame_width == 0 {
                continue;
            }

            let before = match frame.dispose {
                gif::DisposalMethod::Previous => Some(screen.clone()),
                _ => None,
            };

            for (y, row) in frame.buffer.chunks_exact(frame_width * 4).enumerate() {
                if let Some((start, visible)) = clip_row(left, top + y, frame_width, width, height) {
                    blend_rgba_onto(&mut screen[start..start + visible * 3], &row[..visible * 4]);
                }
            }

            frames.push(screen.clone());
            delays.push(match frame.delay {
                0 => DEFAULT_FRAME_DELAY,
                centis => Duration::from_millis(centis as u64 * 10),
            });

            // Disposal decides what the next frame is drawn over
            match frame.dispose {
                gif::DisposalMethod::Background => {
                    for y in top..top + frame.height as usize {
                        if let Some((start, visible)) = clip_row(left, y, frame_width, width, height) {
                            screen[start..start + visible * 3].fill(0);
                        }
                    }
                }
                gif::DisposalMethod::Previous => {
                    if let Some(before) = before {
                        screen = before;
                    }
                }
                _ => {}
            }
        }

        if frames.is_empty() {
            bail!("GIF has no frames");
        }

        Ok(Self {
            frames,
            delays,
            width,
            height,
            cursor: AtomicUsize::new(0),
        })
    }
}

impl Image for FrameSequence {
    fn data(&self) -> &[u8] {
        &self.frames[self.current_frame()]
    }

    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn is_animated(&self) -> bool {
        self.frames.len() > 1
    }

    fn next_frame(&self) {
        self.cursor.fetch_add(1, Ordering::AcqRel);
    }

    fn frame_delay(&self) -> Duration {
        self.delays
            .get(self.current_frame())
            .copied()
            .unwrap_or(DEFAULT_FRAME_DELAY)
    }
}

/// Byte offset and visible pixel count of a frame row on the logical screen
fn clip_row(
    left: usize,
    screen_y: usize,
    frame_width: usize,
    width: usize,
    height: usize,
) -> Option<(usize, usize)> {
    if screen_y >= height || left >= width {
        return None;
    }
    Some(((screen_y * width + left) * 3, frame_width.min(width - left)))
}

/// Alpha blend RGBA source pixels onto an RGB destination of the same pixel count
fn blend_rgba_onto(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.chunks_exact_mut(3).zip(src.chunks_exact(4)) {
        let alpha = s[3] as u32;
        if alpha == 0 {
            continue;
        }
        for c in 0..3 {
            d[c] = ((s[c] as u32 * alpha + d[c] as u32 * (255 - alpha) + 127) / 255) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_frame_gif() -> Vec<u8> {
        let mut bytes = Vec::new();
        {
            let palette = [255, 0, 0, 0, 0, 255];
            let mut encoder = gif::Encoder::new(&mut bytes, 2, 1, &palette).unwrap();
            let mut first = gif::Frame::from_indexed_pixels(2, 1, vec![0, 0], None);
            first.delay = 5;
            encoder.write_frame(&first).unwrap();

            // Second frame only repaints the right pixel
            let mut second = gif::Frame::from_indexed_pixels(1, 1, vec![1], None);
            second.left = 1;
            second.delay = 0;
            encoder.write_frame(&second).unwrap();
        }
        bytes
    }

    /// 2x1 GIF from (left, indices, dispose) frames; index 0 is red, 1 is blue
    fn gif_with_disposal(frames: &[(u16, Vec<u8>, gif::DisposalMethod)]) -> Vec<u8> {
        let mut bytes = Vec::new();
        {
            let palette = [255, 0, 0, 0, 0, 255];
            let mut encoder = gif::Encoder::new(&mut bytes, 2, 1, &palette).unwrap();
            for (left, indices, dispose) in frames {
                let mut frame =
                    gif::Frame::from_indexed_pixels(indices.len() as u16, 1, indices.clone(), None);
                frame.left = *left;
                frame.dispose = *dispose;
                encoder.write_frame(&frame).unwrap();
            }
        }
        bytes
    }

    #[test]
    fn test_gif_background_disposal_clears_to_black() {
        let bytes = gif_with_disposal(&[
            (0, vec![0, 0], gif::DisposalMethod::Background),
            (1, vec![1], gif::DisposalMethod::Keep),
        ]);
        let image = FrameSequence::from_bytes(&bytes).unwrap();

        assert_eq!(image.data(), &[255, 0, 0, 255, 0, 0]);
        image.next_frame();
        assert_eq!(image.data(), &[0, 0, 0, 0, 0, 255]);
    }

    #[test]
    fn test_gif_previous_disposal_restores_screen() {
        let bytes = gif_with_disposal(&[
            (0, vec![0, 0], gif::DisposalMethod::Keep),
            (0, vec![1], gif::DisposalMethod::Previous),
            (1, vec![1], gif::DisposalMethod::Keep),
        ]);
        let image = FrameSequence::from_bytes(&bytes).unwrap();

        image.next_frame();
        assert_eq!(image.data(), &[0, 0, 255, 255, 0, 0]);
        image.next_frame();
        // The left pixel goes back to red before the third frame lands
        assert_eq!(image.data(), &[255, 0, 0, 0, 0, 255]);
    }

    #[test]
    fn test_gif_frames_are_composited() {
        let image = FrameSequence::from_bytes(&two_frame_gif()).unwrap();

        assert_eq!(image.frame_count(), 2);
        assert!(image.is_animated());
        assert_eq!((image.width(), image.height()), (2, 1));
        assert_eq!(image.data(), &[255, 0, 0, 255, 0, 0]);
        assert_eq!(image.frame_delay(), Duration::from_millis(50));

        image.next_frame();
        assert_eq!(image.data(), &[255, 0, 0, 0, 0, 255]);
        assert_eq!(image.frame_delay(), DEFAULT_FRAME_DELAY);
    }

    #[test]
    fn test_cursor_wraps() {
        let image = FrameSequence::from_rgb(
            vec![vec![1, 1, 1], vec![2, 2, 2], vec![3, 3, 3]],
            vec![Duration::from_millis(10); 3],
            1,
            1,
        )
        .unwrap();

        for expected in [0, 1, 2, 0, 1] {
            assert_eq!(image.current_frame(), expected);
            image.next_frame();
        }
    }

    #[test]
    fn test_single_frame_is_static() {
        let image = FrameSequence::from_rgb(vec![vec![0; 12]], Vec::new(), 2, 2).unwrap();
        assert!(!image.is_animated());
        assert_eq!(image.frame_delay(), DEFAULT_FRAME_DELAY);
    }

    #[test]
    fn test_rejects_mismatched_frame() {
        let result = FrameSequence::from_rgb(vec![vec![0; 12], vec![0; 9]], Vec::new(), 2, 2);
        assert!(result.is_err());
    }

    #[test]
    fn test_blend_over_black() {
        let mut dst = [0u8; 3];
        blend_rgba_onto(&mut dst, &[255, 255, 255, 128]);
        assert_eq!(dst, [128, 128, 128]);
    }
}
