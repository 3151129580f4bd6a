mod animation;

pub use animation::{AnimationScheduler, SchedulerState};

use std::io::Write;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::CanvasConfig;
use crate::encoder::{
    FrameEncoder, MedianCut, OutputSink, Palette, PaletteBuilder, PixelFormat, SixelEncoder,
};
use crate::error::{CanvasError, CanvasResult};
use crate::input::Image;
use crate::terminal::TerminalCompositor;

/// Placement of a canvas on screen
///
/// `x`/`y` are the 1-based column/row of the top-left cell; `max_w`/`max_h`
/// bound the area the canvas may ever cover and therefore what `clear` erases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dimensions {
    pub x: u16,
    pub y: u16,
    pub max_w: u16,
    pub max_h: u16,
}

/// Everything needed to put one frame on screen
///
/// Owned by the canvas, or by the animation thread while an animation plays.
struct Renderer {
    encoder: Box<dyn FrameEncoder>,
    palette: Option<Palette>,
    sink: OutputSink,
    compositor: TerminalCompositor,
    row: u16,
    col: u16,
}

impl Renderer {
    /// Encode first, then composite; a failed encode writes nothing to the terminal
    fn render_frame(&mut self, image: &dyn Image) -> CanvasResult<()> {
        let palette = self.palette.as_ref().ok_or(CanvasError::NotInitialized)?;

        self.sink.clear();
        self.encoder.encode(
            image.data(),
            image.width(),
            image.height(),
            palette,
            &mut self.sink,
        )?;

        let written = self
            .compositor
            .composite(self.row, self.col, self.sink.as_bytes());
        self.sink.clear();

        if let Err(e) = written {
            warn!("dropped frame, terminal write failed: {}", e);
        }
        Ok(())
    }
}

pub struct Canvas {
    x: u16,
    y: u16,
    max_width: u16,
    max_height: u16,
    image: Option<Arc<dyn Image>>,
    palette_builder: Box<dyn PaletteBuilder>,
    // None while the animation thread holds it
    renderer: Option<Renderer>,
    scheduler: AnimationScheduler<Renderer>,
}

impl Canvas {
    /// Canvas drawing to stdout with the default quantizer and sixel encoder
    pub fn new() -> Self {
        Self::with_writer(std::io::stdout())
    }

    pub fn with_writer<W: Write + Send + 'static>(out: W) -> Self {
        Self {
            x: 0,
            y: 0,
            max_width: 0,
            max_height: 0,
            image: None,
            palette_builder: Box::new(MedianCut::default()),
            renderer: Some(Renderer {
                encoder: Box::new(SixelEncoder::new()),
                palette: None,
                sink: OutputSink::new(),
                compositor: TerminalCompositor::new(Box::new(out)),
                row: 0,
                col: 0,
            }),
            scheduler: AnimationScheduler::new(),
        }
    }

    pub fn from_config<W: Write + Send + 'static>(config: &CanvasConfig, out: W) -> Self {
        Self::with_writer(out).with_palette_builder(config.palette_builder())
    }

    pub fn with_palette_builder<B: PaletteBuilder + 'static>(mut self, builder: B) -> Self {
        self.palette_builder = Box::new(builder);
        self
    }

    pub fn with_encoder<E: FrameEncoder + 'static>(mut self, encoder: E) -> Self {
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.encoder = Box::new(encoder);
        }
        self
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            x: self.x,
            y: self.y,
            max_w: self.max_width,
            max_h: self.max_height,
        }
    }

    pub fn is_animating(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Bind the canvas to an image and placement and build its palette
    ///
    /// Any running animation is stopped first. If the palette cannot be built
    /// the previous image, palette and placement stay as they were.
    pub fn init(&mut self, dimensions: Dimensions, image: Arc<dyn Image>) -> CanvasResult<()> {
        self.stop_animation();

        let palette = self.palette_builder.build(
            image.data(),
            image.width(),
            image.height(),
            PixelFormat::Rgb888,
        )?;
        debug!(
            colors = palette.len(),
            width = image.width(),
            height = image.height(),
            "canvas palette ready"
        );

        let renderer = self.renderer_mut()?;
        renderer.palette = Some(palette);
        renderer.sink.clear();
        renderer.row = dimensions.y;
        renderer.col = dimensions.x;

        self.x = dimensions.x;
        self.y = dimensions.y;
        self.max_width = dimensions.max_w;
        self.max_height = dimensions.max_h;
        self.image = Some(image);
        Ok(())
    }

    /// Put the image on screen
    ///
    /// Static images are drawn before this returns. Animated images start
    /// playing on a background thread and this returns right away.
    pub fn draw(&mut self) -> CanvasResult<()> {
        self.stop_animation();

        let image = self.image.clone().ok_or(CanvasError::NotInitialized)?;
        let renderer = self.renderer_mut()?;
        if renderer.palette.is_none() {
            return Err(CanvasError::NotInitialized);
        }

        if !image.is_animated() {
            return renderer.render_frame(image.as_ref());
        }

        let Some(renderer) = self.renderer.take() else {
            return Err(render_state_lost());
        };
        self.scheduler
            .start(renderer, image, |renderer, image| renderer.render_frame(image))
    }

    /// Stop any animation, drop the palette and blank the canvas area
    ///
    /// Does nothing on a canvas that was never given a size.
    pub fn clear(&mut self) {
        if self.max_width == 0 && self.max_height == 0 {
            return;
        }

        self.stop_animation();

        let (x, y, max_width, max_height) = (self.x, self.y, self.max_width, self.max_height);
        let Ok(renderer) = self.renderer_mut() else {
            warn!("cannot clear canvas, render state was lost");
            return;
        };
        renderer.palette = None;
        renderer.sink.clear();

        let last_row = max_height.saturating_add(2);
        let rows = last_row.checked_sub(y).map_or(0, |span| span.saturating_add(1));
        if let Err(e) = renderer.compositor.clear_region(y, x, rows, max_width) {
            warn!("failed to clear canvas area: {}", e);
        }
    }

    /// Blocks until the animation thread has exited and takes the render state back
    fn stop_animation(&mut self) {
        if !self.scheduler.is_running() {
            return;
        }
        if let Some(renderer) = self.scheduler.stop() {
            self.renderer = Some(renderer);
        }
    }

    fn renderer_mut(&mut self) -> CanvasResult<&mut Renderer> {
        self.renderer.as_mut().ok_or_else(render_state_lost)
    }
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Canvas {
    fn drop(&mut self) {
        // The thread may still be reading the palette; it has to go before the fields do
        self.stop_animation();
    }
}

fn render_state_lost() -> CanvasError {
    CanvasError::resource("render state was lost when the animation thread panicked")
}
