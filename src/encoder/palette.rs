use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashMap;
use tracing::debug;

use crate::error::{CanvasError, CanvasResult};

/// Upper bound on colour registers a single sixel image may define
pub const MAX_PALETTE_COLORS: usize = 256;

// Luminance weights (per mille) used to pick which box to split and along which axis
const LUMA_WEIGHTS: [u64; 3] = [299, 587, 114];

/// Layout of the raw pixel buffer handed to a palette builder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 8-bit R, G, B
    Rgb888,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb888 => 3,
        }
    }
}

/// Histogram precision used while building the palette
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    /// Exact 24-bit colours
    #[default]
    High,
    /// 5 bits per channel, faster on photographic input
    Low,
}

/// How pixels are assigned to palette entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Diffusion {
    #[default]
    None,
    FloydSteinberg,
}

/// Strategy that derives a bounded colour table from an image
pub trait PaletteBuilder: Send + Sync {
    fn build(
        &self,
        pixels: &[u8],
        width: usize,
        height: usize,
        format: PixelFormat,
    ) -> CanvasResult<Palette>;
}

/// Colour table plus the geometry it was built for
#[derive(Debug, Clone)]
pub struct Palette {
    colors: Vec<[u8; 3]>,
    width: usize,
    height: usize,
    diffusion: Diffusion,
}

impl Palette {
    pub fn new(colors: Vec<[u8; 3]>, width: usize, height: usize) -> CanvasResult<Self> {
        if colors.is_empty() || colors.len() > MAX_PALETTE_COLORS {
            return Err(CanvasError::resource(format!(
                "palette must hold 1..={} colors, got {}",
                MAX_PALETTE_COLORS,
                colors.len()
            )));
        }

        Ok(Self {
            colors,
            width,
            height,
            diffusion: Diffusion::None,
        })
    }

    pub fn with_diffusion(mut self, diffusion: Diffusion) -> Self {
        self.diffusion = diffusion;
        self
    }

    pub fn colors(&self) -> &[[u8; 3]] {
        &self.colors
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn diffusion(&self) -> Diffusion {
        self.diffusion
    }

    /// Index of the closest entry by squared RGB distance; ties go to the lower index
    pub fn match_color_index(&self, r: i32, g: i32, b: i32) -> u8 {
        self.colors
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| {
                let dr = r - c[0] as i32;
                let dg = g - c[1] as i32;
                let db = b - c[2] as i32;
                dr * dr + dg * dg + db * db
            })
            .map(|(i, _)| i as u8)
            .unwrap_or(0)
    }

    /// Map packed RGB pixels to palette indices, one per pixel
    pub fn map_pixels(&self, pixels: &[u8]) -> Vec<u8> {
        let count = self.width * self.height;
        let pixels = &pixels[..(count * 3).min(pixels.len())];

        match self.diffusion {
            Diffusion::None => pixels
                .par_chunks_exact(3)
                .map(|p| self.match_color_index(p[0] as i32, p[1] as i32, p[2] as i32))
                .collect(),
            Diffusion::FloydSteinberg => self.map_pixels_diffused(pixels),
        }
    }

    fn map_pixels_diffused(&self, pixels: &[u8]) -> Vec<u8> {
        let width = self.width;
        let height = pixels.len() / 3 / width.max(1);
        let mut work: Vec<i32> = pixels.iter().map(|&v| v as i32).collect();
        let mut indices = Vec::with_capacity(width * height);

        for y in 0..height {
            for x in 0..width {
                let i = (y * width + x) * 3;
                let current = [
                    work[i].clamp(0, 255),
                    work[i + 1].clamp(0, 255),
                    work[i + 2].clamp(0, 255),
                ];
                let index = self.match_color_index(current[0], current[1], current[2]);
                indices.push(index);

                let chosen = self.colors[index as usize];
                for c in 0..3 {
                    let err = current[c] - chosen[c] as i32;
                    if err == 0 {
                        continue;
                    }

                    // 7/16 right, 3/16 below-left, 5/16 below, 1/16 below-right
                    if x + 1 < width {
                        work[i + 3 + c] += err * 7 / 16;
                    }
                    if y + 1 < height {
                        let below = i + width * 3;
                        if x > 0 {
                            work[below - 3 + c] += err * 3 / 16;
                        }
                        work[below + c] += err * 5 / 16;
                        if x + 1 < width {
                            work[below + 3 + c] += err / 16;
                        }
                    }
                }
            }
        }

        indices
    }
}

/// Median-cut quantizer: luminance-weighted box selection, centre-of-box representatives
#[derive(Debug, Clone)]
pub struct MedianCut {
    max_colors: usize,
    quality: Quality,
    diffusion: Diffusion,
}

impl Default for MedianCut {
    fn default() -> Self {
        Self {
            max_colors: MAX_PALETTE_COLORS,
            quality: Quality::High,
            diffusion: Diffusion::None,
        }
    }
}

impl MedianCut {
    pub fn new(max_colors: usize) -> Self {
        Self {
            max_colors: max_colors.clamp(1, MAX_PALETTE_COLORS),
            ..Self::default()
        }
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_diffusion(mut self, diffusion: Diffusion) -> Self {
        self.diffusion = diffusion;
        self
    }

    pub fn max_colors(&self) -> usize {
        self.max_colors
    }
}

impl PaletteBuilder for MedianCut {
    #[tracing::instrument(level = "debug", skip(self, pixels))]
    fn build(
        &self,
        pixels: &[u8],
        width: usize,
        height: usize,
        format: PixelFormat,
    ) -> CanvasResult<Palette> {
        if width == 0 || height == 0 {
            return Err(CanvasError::encoding(format!(
                "cannot build a palette for a {}x{} image",
                width, height
            )));
        }

        let needed = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(format.bytes_per_pixel()))
            .ok_or_else(|| CanvasError::resource("pixel count overflows usize"))?;
        if pixels.len() < needed {
            return Err(CanvasError::encoding(format!(
                "pixel buffer holds {} bytes, {}x{} RGB needs {}",
                pixels.len(),
                width,
                height,
                needed
            )));
        }

        let mask = match self.quality {
            Quality::High => 0xFF,
            Quality::Low => 0xF8,
        };

        let mut histogram: HashMap<[u8; 3], u64> = HashMap::new();
        for p in pixels[..needed].chunks_exact(3) {
            *histogram.entry([p[0] & mask, p[1] & mask, p[2] & mask]).or_insert(0) += 1;
        }

        // HashMap order is random; sort so the cut is reproducible
        let mut entries: Vec<([u8; 3], u64)> = histogram.into_iter().collect();
        entries.sort_unstable();

        let mut boxes = vec![ColorBox { entries }];
        while boxes.len() < self.max_colors {
            let candidate = boxes
                .iter()
                .enumerate()
                .filter(|(_, b)| b.entries.len() > 1)
                .max_by_key(|(i, b)| (b.weighted_extent().0, Reverse(*i)))
                .map(|(i, _)| i);

            let Some(index) = candidate else {
                break;
            };

            let (low, high) = boxes.swap_remove(index).split();
            boxes.push(low);
            boxes.push(high);
        }

        // Masked values are bucket floors; the centre spans the whole bucket
        let spread = !mask;
        let colors: Vec<[u8; 3]> = boxes.iter().map(|b| b.center(spread)).collect();
        debug!(colors = colors.len(), width, height, "built palette");

        Ok(Palette::new(colors, width, height)?.with_diffusion(self.diffusion))
    }
}

struct ColorBox {
    entries: Vec<([u8; 3], u64)>,
}

impl ColorBox {
    fn bounds(&self) -> ([u8; 3], [u8; 3]) {
        let mut min = [u8::MAX; 3];
        let mut max = [u8::MIN; 3];
        for (color, _) in &self.entries {
            for c in 0..3 {
                min[c] = min[c].min(color[c]);
                max[c] = max[c].max(color[c]);
            }
        }
        (min, max)
    }

    /// Largest luminance-weighted channel extent and the channel it belongs to
    fn weighted_extent(&self) -> (u64, usize) {
        let (min, max) = self.bounds();
        (0..3)
            .map(|c| ((max[c] - min[c]) as u64 * LUMA_WEIGHTS[c], c))
            .max_by_key(|&(score, c)| (score, Reverse(c)))
            .unwrap_or((0, 0))
    }

    /// Midpoint of the box, with each channel's upper bound raised by the low `spread` bits
    fn center(&self, spread: u8) -> [u8; 3] {
        let (min, max) = self.bounds();
        let mut center = [0u8; 3];
        for c in 0..3 {
            center[c] = ((min[c] as u16 + (max[c] | spread) as u16) / 2) as u8;
        }
        center
    }

    /// Split at the pixel-count median along the dominant axis. Needs at least two entries.
    fn split(mut self) -> (ColorBox, ColorBox) {
        let (_, axis) = self.weighted_extent();
        self.entries.sort_unstable_by_key(|(color, _)| (color[axis], *color));

        let total: u64 = self.entries.iter().map(|(_, count)| count).sum();
        let mut seen = 0;
        let mut at = self.entries.len() / 2;
        for (i, (_, count)) in self.entries.iter().enumerate() {
            seen += count;
            if seen * 2 >= total {
                at = i + 1;
                break;
            }
        }
        let at = at.clamp(1, self.entries.len() - 1);

        let high = self.entries.split_off(at);
        (self, ColorBox { entries: high })
    }
}
