use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, BufRead};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ttysixel::{Canvas, CanvasConfig, Dimensions, FrameSequence, Image};

mod cli;

// Cell size assumed when the terminal does not report its pixel size
const FALLBACK_CELL: (u16, u16) = (8, 16);

fn main() -> Result<()> {
    let args = cli::Args::parse();

    let mut config = match args.config {
        Some(ref path) => CanvasConfig::load(path)?,
        None => CanvasConfig::discover()?,
    };
    if let Some(colors) = args.colors {
        config.palette.max_colors = colors;
    }
    if let Some(diffusion) = args.diffusion {
        config.palette.diffusion = diffusion;
    }
    config.validate()?;

    init_logging(&config);

    let image = FrameSequence::open(&args.input)?;
    let (cell_width, cell_height) = cell_size();
    let dimensions = Dimensions {
        x: args.x,
        y: args.y,
        max_w: args
            .max_width
            .unwrap_or_else(|| cells(image.width(), cell_width)),
        max_h: args
            .max_height
            .unwrap_or_else(|| cells(image.height(), cell_height)),
    };

    info!(
        input = %args.input.display(),
        width = image.width(),
        height = image.height(),
        frames = image.frame_count(),
        ?dimensions,
        "displaying image"
    );

    let mut canvas = Canvas::from_config(&config, io::stdout());
    canvas.init(dimensions, Arc::new(image))?;
    canvas.draw()?;

    match args.duration {
        Some(secs) => {
            let wait = Duration::try_from_secs_f64(secs).context("Invalid --duration")?;
            std::thread::sleep(wait);
        }
        None => {
            let mut line = String::new();
            io::stdin()
                .lock()
                .read_line(&mut line)
                .context("Failed to read from stdin")?;
        }
    }

    canvas.clear();
    Ok(())
}

fn init_logging(config: &CanvasConfig) {
    // stdout carries the graphics, so logs go to stderr
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn cell_size() -> (u16, u16) {
    match crossterm::terminal::window_size() {
        Ok(size) if size.width > 0 && size.height > 0 && size.columns > 0 && size.rows > 0 => (
            (size.width / size.columns).max(1),
            (size.height / size.rows).max(1),
        ),
        _ => FALLBACK_CELL,
    }
}

/// Cells needed to cover `pixels` at `cell` pixels per cell
fn cells(pixels: usize, cell: u16) -> u16 {
    let cell = cell.max(1) as usize;
    pixels.div_ceil(cell).min(u16::MAX as usize) as u16
}
