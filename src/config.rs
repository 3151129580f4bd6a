use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::encoder::{Diffusion, MedianCut, Quality, MAX_PALETTE_COLORS};
use crate::error::{CanvasError, CanvasResult};

const CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasConfig {
    #[serde(default)]
    pub palette: PaletteConfig,

    /// tracing filter used when RUST_LOG is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaletteConfig {
    #[serde(default = "default_max_colors")]
    pub max_colors: usize,

    #[serde(default)]
    pub quality: Quality,

    #[serde(default)]
    pub diffusion: Diffusion,
}

fn default_max_colors() -> usize {
    MAX_PALETTE_COLORS
}

fn default_log_filter() -> String {
    "warn".to_string()
}

impl Default for PaletteConfig {
    fn default() -> Self {
        Self {
            max_colors: default_max_colors(),
            quality: Quality::default(),
            diffusion: Diffusion::default(),
        }
    }
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            palette: PaletteConfig::default(),
            log_filter: default_log_filter(),
        }
    }
}

impl CanvasConfig {
    pub fn load(path: &Path) -> CanvasResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CanvasError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
            .map_err(|e| CanvasError::config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_yaml(content: &str) -> CanvasResult<Self> {
        let config: CanvasConfig = serde_yaml::from_str(content)
            .map_err(|e| CanvasError::config(format!("invalid YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `config.yaml` from the user config directory, or defaults if there is none
    pub fn discover() -> CanvasResult<Self> {
        match Self::default_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "ttysixel")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    pub fn validate(&self) -> CanvasResult<()> {
        if !(1..=MAX_PALETTE_COLORS).contains(&self.palette.max_colors) {
            return Err(CanvasError::config(format!(
                "palette.max_colors must be between 1 and {}, got {}",
                MAX_PALETTE_COLORS, self.palette.max_colors
            )));
        }
        Ok(())
    }

    pub fn palette_builder(&self) -> MedianCut {
        MedianCut::new(self.palette.max_colors)
            .with_quality(self.palette.quality)
            .with_diffusion(self.palette.diffusion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CanvasConfig::default();
        assert_eq!(config.palette.max_colors, 256);
        assert_eq!(config.palette.quality, Quality::High);
        assert_eq!(config.palette.diffusion, Diffusion::None);
        assert_eq!(config.log_filter, "warn");
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config = CanvasConfig::from_yaml("palette:\n  diffusion: floyd_steinberg\n").unwrap();
        assert_eq!(config.palette.diffusion, Diffusion::FloydSteinberg);
        assert_eq!(config.palette.max_colors, 256);
        assert_eq!(config.log_filter, "warn");
    }

    #[test]
    fn test_rejects_out_of_range_colors() {
        let err = CanvasConfig::from_yaml("palette:\n  max_colors: 0\n").unwrap_err();
        assert!(matches!(err, CanvasError::Config(_)));

        let err = CanvasConfig::from_yaml("palette:\n  max_colors: 300\n").unwrap_err();
        assert!(err.to_string().contains("max_colors"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "palette:\n  max_colors: 16\n  quality: low\nlog_filter: debug").unwrap();

        let config = CanvasConfig::load(file.path()).unwrap();
        assert_eq!(config.palette.max_colors, 16);
        assert_eq!(config.palette.quality, Quality::Low);
        assert_eq!(config.log_filter, "debug");
        assert_eq!(config.palette_builder().max_colors(), 16);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = CanvasConfig::load(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, CanvasError::Config(_)));
    }
}
