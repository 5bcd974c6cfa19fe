//! The time series driver contract
//!
//! A driver hides one on-disk time series format behind a fixed capability
//! set. The retrieval engine, the controller and the views only ever talk to
//! a dataset through [`TimeSeriesDriver`], so adding a format means adding one
//! implementation and nothing else.

use crate::errors::{Result, TsToolsError};
use crate::geo::{PixelPos, RasterExtent};
use crate::model::{fit_segments, ModelConfig, SegmentFit};
use crate::pixel::PixelData;
use crate::series::Series;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};

/// Driver construction options and runtime custom controls, as key/value pairs
pub type DriverConfig = serde_json::Map<String, JsonValue>;

/// One x/y sequence pair: a fitted curve segment or a break marker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Curve {
    /// Day ordinals
    pub x: Vec<i32>,
    pub y: Vec<f64>,
}

/// Options every bundled driver understands
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverOptions {
    /// Sentinel values treated as no-data
    pub mask_values: Option<Vec<i64>>,
    /// Fit a model and detect breaks after retrieval
    pub fit: bool,
    pub model: ModelConfig,
    /// Folder holding per-pixel cache files
    pub cache_dir: Option<PathBuf>,
}

impl DriverOptions {
    pub fn from_config(config: Option<&DriverConfig>) -> Result<Self> {
        match config {
            Some(map) => serde_json::from_value(JsonValue::Object(map.clone()))
                .map_err(|e| TsToolsError::Configuration(format!("Invalid driver options: {}", e))),
            None => Ok(Self::default()),
        }
    }
}

/// Parse runtime custom controls into a model configuration
pub fn parse_model_controls(controls: &DriverConfig, n_bands: usize) -> Result<ModelConfig> {
    let config: ModelConfig = serde_json::from_value(JsonValue::Object(controls.clone()))
        .map_err(|e| TsToolsError::Configuration(format!("Invalid custom controls: {}", e)))?;
    config.validate(n_bands)?;
    Ok(config)
}

/// A remote sensing time series data source
pub trait TimeSeriesDriver {
    /// Short description of the time series type
    fn description(&self) -> &str;

    /// Root location of the dataset
    fn location(&self) -> &Path;

    fn series(&self) -> &Series;

    fn mask_values(&self) -> Option<&[i64]>;

    fn set_mask_values(&mut self, mask_values: Option<Vec<i64>>);

    /// Whether model fit and break queries are supported
    fn has_results(&self) -> bool;

    fn pixel(&self) -> &PixelData;

    fn pixel_mut(&mut self) -> &mut PixelData;

    /// Raster size and georeferencing shared by every image
    fn extent(&self) -> &RasterExtent;

    /// Dataset coordinate reference system as WKT, when known
    fn crs_wkt(&self) -> Option<&str> {
        None
    }

    /// Read every band of image `index` at the selected pixel
    fn retrieve_pixel(&mut self, index: usize) -> Result<()>;

    /// Compute or load model results for the selected pixel
    fn fetch_results(&mut self) -> Result<()>;

    /// Fill the selected pixel from cache; `Ok(false)` when no usable cache
    fn read_cache(&mut self) -> Result<bool> {
        Ok(false)
    }

    /// Persist the selected pixel; `Ok(false)` when caching is not configured
    fn write_cache(&self) -> Result<bool> {
        Ok(false)
    }

    /// Apply driver-specific runtime options before a retrieval
    fn set_custom_controls(&mut self, controls: &DriverConfig) -> Result<()> {
        if controls.is_empty() {
            Ok(())
        } else {
            Err(TsToolsError::Configuration(format!(
                "{} has no custom controls",
                self.description()
            )))
        }
    }

    fn len(&self) -> usize {
        self.series().len()
    }

    fn is_empty(&self) -> bool {
        self.series().is_empty()
    }

    fn band_names(&self) -> &[String] {
        &self.series().band_names
    }

    fn dates(&self) -> Vec<NaiveDate> {
        self.series().dates()
    }

    /// Pixel under a map coordinate. `crs_wkt` describes the coordinate; it
    /// must match the dataset's reference system when both are known.
    fn locate(&self, x: f64, y: f64, crs_wkt: Option<&str>) -> Result<PixelPos> {
        check_crs(self.crs_wkt(), crs_wkt)?;
        self.extent().locate(x, y)
    }

    fn pixel_pos(&self) -> Option<PixelPos> {
        self.pixel().pos()
    }

    /// Select a pixel and discard all state of the previous one
    fn set_pixel(&mut self, pos: PixelPos) {
        self.pixel_mut().reset(pos);
    }

    /// Locate `(x, y)` and return a lazy sequence of progress fractions,
    /// reading one image per step. The last value is exactly 1.
    fn fetch_data(&mut self, x: f64, y: f64, crs_wkt: Option<&str>) -> Result<FetchProgress<'_, Self>>
    where
        Self: Sized,
    {
        let pos = self.locate(x, y, crs_wkt)?;
        self.set_pixel(pos);
        let total = self.len();
        Ok(FetchProgress {
            driver: self,
            index: 0,
            total,
            finished: false,
        })
    }

    /// Samples of one band, sentinel values replaced by `None` when `mask`
    fn get_data(&self, band: usize, mask: bool) -> Result<Vec<Option<f64>>> {
        let mask_values = if mask { self.mask_values() } else { None };
        self.pixel().band(band, mask_values)
    }

    /// Fitted curve per segment; empty without results
    fn get_prediction(&self, band: usize) -> Vec<Curve> {
        if !self.has_results() {
            return Vec::new();
        }
        self.pixel()
            .results()
            .iter()
            .filter_map(|seg| seg.curve(band))
            .map(|(x, y)| Curve { x, y })
            .collect()
    }

    /// Break markers at the observed value, one per segment except the last
    fn get_breaks(&self, band: usize) -> Vec<Curve> {
        let results = self.pixel().results();
        if !self.has_results() || results.len() < 2 {
            return Vec::new();
        }
        let Ok(values) = self.get_data(band, true) else {
            return Vec::new();
        };
        results[..results.len() - 1]
            .iter()
            .filter_map(|seg| {
                let day = seg.break_day?;
                let value = values.get(seg.break_index?).copied().flatten()?;
                Some(Curve {
                    x: vec![day],
                    y: vec![value],
                })
            })
            .collect()
    }
}

/// Refuse a coordinate given in a different reference system than the dataset
pub fn check_crs(dataset: Option<&str>, requested: Option<&str>) -> Result<()> {
    match (dataset, requested) {
        (Some(a), Some(b)) if !a.split_whitespace().eq(b.split_whitespace()) => {
            Err(TsToolsError::retrieval(
                "coordinate reference system differs from the dataset and cannot be reprojected",
            ))
        }
        _ => Ok(()),
    }
}

/// Fit segments over the selected pixel's masked samples
pub fn fit_pixel<D: TimeSeriesDriver + ?Sized>(
    driver: &D,
    config: &ModelConfig,
) -> Result<Vec<SegmentFit>> {
    let samples = driver.pixel().masked(driver.mask_values());
    fit_segments(&driver.series().ordinals(), &samples, config)
}

/// Progress of a [`TimeSeriesDriver::fetch_data`] call. Not restartable.
pub struct FetchProgress<'a, D: ?Sized> {
    driver: &'a mut D,
    index: usize,
    total: usize,
    finished: bool,
}

impl<'a, D: TimeSeriesDriver + ?Sized> Iterator for FetchProgress<'a, D> {
    type Item = Result<f64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.total == 0 {
            self.finished = true;
            return Some(Ok(1.0));
        }
        let index = self.index;
        self.index += 1;
        if self.index == self.total {
            self.finished = true;
        }
        Some(
            self.driver
                .retrieve_pixel(index)
                .map(|()| self.index as f64 / self.total as f64),
        )
    }
}
