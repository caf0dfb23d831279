//! User-level defaults for CLI flags left unset, such as DPI and rows per
//! TIFF strip, loaded from a YAML file in the user's config directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Default dots-per-inch when `-p/--dpi` is not given.
    #[serde(default = "default_dpi")]
    pub dots_per_inch: f64,

    /// Default rows-per-strip when `--strip-rows` is not given.
    #[serde(default = "default_strip_rows")]
    pub strip_rows: u32,

    /// Default output directory when `-o/--output` is not given; the output
    /// filename is derived from the first input file's stem.
    pub default_output_directory: Option<PathBuf>,
}

fn default_dpi() -> f64 {
    2400.0
}

fn default_strip_rows() -> u32 {
    64
}

impl Default for Config {
    fn default() -> Self {
        Config {
            dots_per_inch: default_dpi(),
            strip_rows: default_strip_rows(),
            default_output_directory: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::get_path()?)
    }

    pub fn get_path() -> Result<PathBuf> {
        let home_dir = home::home_dir().context("Failed to get user's home directory.")?;
        Ok(home_dir.join(".config/gerber_raster/config.yaml"))
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let config = std::fs::read_to_string(path).context("Failed to read config file.")?;
        let config: Self =
            serde_yaml::from_str(&config).context("Failed to decode config file.")?;

        Ok(config)
    }
}
