//! Command-line interface options for the `tstools` binary.

use clap::Parser;
use std::path::PathBuf;

/// Retrieve and fit the time series of one pixel of a NetCDF image stack
#[derive(Parser, Debug)]
#[command(
    name = "tstools",
    version,
    about = "Pixel time series retrieval for remote sensing image stacks"
)]
pub struct Args {
    /// Path to the NetCDF image stack
    #[arg(short, long)]
    pub file: PathBuf,

    /// Pixel to retrieve, formatted as <col>,<row>
    #[arg(long, value_parser = parse_pair::<usize>, conflicts_with = "coord", required_unless_present_any = ["coord", "list_images"])]
    pub pixel: Option<(usize, usize)>,

    /// Map coordinate to retrieve, formatted as <x>,<y>
    #[arg(long, value_parser = parse_pair::<f64>, allow_hyphen_values = true)]
    pub coord: Option<(f64, f64)>,

    /// Band to print and plot. Defaults to the settings file's band.
    #[arg(short, long)]
    pub band: Option<usize>,

    /// Keep sentinel values instead of masking them
    #[arg(long, default_value_t = false)]
    pub no_mask: bool,

    /// Fit the harmonic model and report breaks
    #[arg(long, default_value_t = false)]
    pub fit: bool,

    /// Milliseconds of work per retrieval tick
    #[arg(long)]
    pub tick_ms: Option<u64>,

    /// Stop at the first unreadable image instead of skipping it
    #[arg(long, default_value_t = false)]
    pub fail_fast: bool,

    /// Folder for per-pixel cache files
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// JSON settings file (retrieval, plot and symbology)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// JSON file of driver options
    #[arg(long)]
    pub driver_config: Option<PathBuf>,

    /// Print observations by day of year
    #[arg(long, default_value_t = false)]
    pub doy: bool,

    /// Print the image table and exit
    #[arg(long, default_value_t = false)]
    pub list_images: bool,

    /// Print the views as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Enable debug logging.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

fn parse_pair<T: std::str::FromStr>(s: &str) -> Result<(T, T), String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    match parts.as_slice() {
        [a, b] => {
            let a = a
                .parse::<T>()
                .map_err(|_| format!("Invalid value '{}'", a))?;
            let b = b
                .parse::<T>()
                .map_err(|_| format!("Invalid value '{}'", b))?;
            Ok((a, b))
        }
        _ => Err("Invalid format: Expected '<a>,<b>'.".to_string()),
    }
}
