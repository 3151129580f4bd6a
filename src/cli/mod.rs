use clap::Parser;
use std::path::PathBuf;

use ttysixel::encoder::Diffusion;

#[derive(Parser, Debug)]
#[command(name = "ttysixel")]
#[command(version)]
#[command(about = "Show an image or animated GIF in the terminal using sixel graphics", long_about = None)]
pub struct Args {
    /// Image to display (GIF animations play until the display time is up)
    pub input: PathBuf,

    /// Column of the top-left corner (1-based)
    #[arg(short = 'x', long, default_value = "1")]
    pub x: u16,

    /// Row of the top-left corner (1-based)
    #[arg(short = 'y', long, default_value = "1")]
    pub y: u16,

    /// Width in cells to reserve (defaults to the image size in cells)
    #[arg(long)]
    pub max_width: Option<u16>,

    /// Height in cells to reserve (defaults to the image size in cells)
    #[arg(long)]
    pub max_height: Option<u16>,

    /// Config file (defaults to config.yaml in the user config directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Palette size (1-256), overrides the config file
    #[arg(long)]
    pub colors: Option<usize>,

    /// Error diffusion, overrides the config file
    #[arg(long, value_parser = parse_diffusion)]
    pub diffusion: Option<Diffusion>,

    /// Seconds to keep the image up; waits for Enter if not given
    #[arg(short, long)]
    pub duration: Option<f64>,
}

fn parse_diffusion(value: &str) -> Result<Diffusion, String> {
    match value.to_lowercase().as_str() {
        "none" => Ok(Diffusion::None),
        "fs" | "floyd_steinberg" | "floyd-steinberg" => Ok(Diffusion::FloydSteinberg),
        other => Err(format!("unknown diffusion '{}', expected none or floyd_steinberg", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let args = Args::parse_from(["ttysixel", "cat.gif"]);
        assert_eq!(args.input, PathBuf::from("cat.gif"));
        assert_eq!((args.x, args.y), (1, 1));
        assert!(args.duration.is_none());
    }

    #[test]
    fn test_parse_overrides() {
        let args = Args::parse_from([
            "ttysixel", "cat.png", "-x", "5", "-y", "3", "--max-width", "20", "--colors", "16",
            "--diffusion", "fs",
        ]);
        assert_eq!((args.x, args.y), (5, 3));
        assert_eq!(args.max_width, Some(20));
        assert_eq!(args.colors, Some(16));
        assert_eq!(args.diffusion, Some(Diffusion::FloydSteinberg));
    }

    #[test]
    fn test_rejects_unknown_diffusion() {
        assert!(Args::try_parse_from(["ttysixel", "a.png", "--diffusion", "bayer"]).is_err());
    }
}
