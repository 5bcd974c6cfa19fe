//! Explicit configuration objects for retrieval, plotting and image symbology
//!
//! Everything here is plain serde data so a host can load it from JSON,
//! tweak it and hand it back to the [`Controller`](crate::controller::Controller).

use crate::errors::{Result, TsToolsError};
use crate::retrieval::RetrievalConfig;
use crate::series::Series;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Default symbology and plot scaling when a dataset gives no usable hint
pub const DEFAULT_MIN: f64 = 0.0;
pub const DEFAULT_MAX: f64 = 10000.0;

/// Time series plot options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotSettings {
    /// Band drawn on the y axis
    pub band: usize,
    /// Hide sentinel values
    pub mask: bool,
    pub fit: bool,
    pub breaks: bool,
    /// Recompute `min`/`max` from the data after every retrieval
    pub auto_scale: bool,
    /// Per-band y axis limits
    pub min: Vec<f64>,
    pub max: Vec<f64>,
    /// Optional x axis limits, as years
    pub xmin: Option<i32>,
    pub xmax: Option<i32>,
    pub picker_tol: f64,
}

impl Default for PlotSettings {
    fn default() -> Self {
        Self {
            band: 0,
            mask: true,
            fit: true,
            breaks: true,
            auto_scale: true,
            min: Vec::new(),
            max: Vec::new(),
            xmin: None,
            xmax: None,
            picker_tol: 2.0,
        }
    }
}

impl PlotSettings {
    /// y axis limits of `band`, falling back to the defaults
    pub fn limits(&self, band: usize) -> (f64, f64) {
        (
            self.min.get(band).copied().unwrap_or(DEFAULT_MIN),
            self.max.get(band).copied().unwrap_or(DEFAULT_MAX),
        )
    }
}

/// How raster values map onto display intensities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContrastEnhancement {
    NoEnhancement,
    #[default]
    StretchToMinMax,
    StretchAndClipToMinMax,
    ClipToMinMax,
}

/// RGB image symbology
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbologySettings {
    pub band_red: usize,
    pub band_green: usize,
    pub band_blue: usize,
    /// Per-band stretch limits
    pub min: Vec<f64>,
    pub max: Vec<f64>,
    pub contrast: ContrastEnhancement,
}

impl Default for SymbologySettings {
    fn default() -> Self {
        Self {
            band_red: 3,
            band_green: 2,
            band_blue: 1,
            min: Vec::new(),
            max: Vec::new(),
            contrast: ContrastEnhancement::default(),
        }
    }
}

impl SymbologySettings {
    pub fn rgb(&self) -> [usize; 3] {
        [self.band_red, self.band_green, self.band_blue]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub retrieval: RetrievalConfig,
    pub plot: PlotSettings,
    pub symbology: SymbologySettings,
}

impl Settings {
    /// Read settings from a JSON file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| TsToolsError::Configuration(format!("{}: {}", path.display(), e)))
    }

    /// Defaults initialised from a dataset's symbology hints
    pub fn for_series(series: &Series) -> Self {
        let mut settings = Self::default();
        settings.init_for_series(series);
        settings
    }

    /// Apply dataset hints and make every band reference valid for `series`
    pub fn init_for_series(&mut self, series: &Series) {
        let n_bands = series.n_bands();
        let [red, green, blue] = series.symbology_hint_indices;
        self.symbology.band_red = red;
        self.symbology.band_green = green;
        self.symbology.band_blue = blue;
        self.clamp_bands(n_bands);

        match series.symbology_hint_minmax.expand(n_bands) {
            Some((min, max)) => {
                debug!("Applying RGB min/max symbology hint");
                self.symbology.min = min;
                self.symbology.max = max;
            }
            None => {
                warn!("Could not use symbology min/max hint");
                self.symbology.min = vec![DEFAULT_MIN; n_bands];
                self.symbology.max = vec![DEFAULT_MAX; n_bands];
            }
        }

        if self.plot.min.len() != n_bands || self.plot.max.len() != n_bands {
            self.plot.min = vec![DEFAULT_MIN; n_bands];
            self.plot.max = vec![DEFAULT_MAX; n_bands];
        }
    }

    fn clamp_bands(&mut self, n_bands: usize) {
        let last = n_bands.saturating_sub(1);
        let symbology = &mut self.symbology;
        for (name, band) in [
            ("red", &mut symbology.band_red),
            ("green", &mut symbology.band_green),
            ("blue", &mut symbology.band_blue),
        ] {
            if *band >= n_bands {
                warn!("Fixing {} band to largest band in dataset", name);
                *band = last;
            }
        }
        if self.plot.band >= n_bands {
            warn!(
                "Plot band {} is out of range, showing band {} instead",
                self.plot.band, last
            );
            self.plot.band = last;
        }
    }
}
