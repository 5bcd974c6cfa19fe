//! Driver over an in-memory image stack, for synthetic data and tests

use crate::cache::PixelCache;
use crate::driver::{fit_pixel, parse_model_controls, DriverConfig, DriverOptions, TimeSeriesDriver};
use crate::errors::{Result, TsToolsError};
use crate::geo::{GeoTransform, RasterExtent};
use crate::model::ModelConfig;
use crate::pixel::PixelData;
use crate::series::Series;
use ndarray::{Array4, Axis};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Stack held as an `images × bands × rows × cols` array
pub struct MemoryDriver {
    location: PathBuf,
    series: Series,
    values: Array4<f64>,
    extent: RasterExtent,
    crs_wkt: Option<String>,
    mask_values: Option<Vec<i64>>,
    has_results: bool,
    model: ModelConfig,
    cache: Option<PixelCache>,
    unreadable: HashSet<usize>,
    reads: usize,
    pixel: PixelData,
}

impl MemoryDriver {
    /// Images are sorted by date, and `values` reordered along its first axis
    /// to match.
    pub fn new(location: impl Into<PathBuf>, mut series: Series, values: Array4<f64>) -> Result<Self> {
        let (n_images, n_bands, rows, cols) = values.dim();
        if n_images != series.len() || n_bands != series.n_bands() {
            return Err(TsToolsError::Configuration(format!(
                "stack holds {} images of {} bands, series describes {} images of {} bands",
                n_images,
                n_bands,
                series.len(),
                series.n_bands()
            )));
        }
        let order = series.sort_by_date();
        let values = if order.iter().enumerate().all(|(k, &i)| k == i) {
            values
        } else {
            values.select(Axis(0), &order)
        };
        Ok(Self {
            location: location.into(),
            pixel: PixelData::new(n_bands, n_images),
            series,
            values,
            extent: RasterExtent::new(cols, rows, GeoTransform::default()),
            crs_wkt: None,
            mask_values: None,
            has_results: false,
            model: ModelConfig::default(),
            cache: None,
            unreadable: HashSet::new(),
            reads: 0,
        })
    }

    /// Apply the shared driver options (mask values, fit, cache folder)
    pub fn with_config(mut self, config: &DriverConfig) -> Result<Self> {
        let options = DriverOptions::from_config(Some(config))?;
        options.model.validate(self.series.n_bands())?;
        self.mask_values = options.mask_values;
        self.has_results = options.fit;
        self.model = options.model;
        self.cache = options
            .cache_dir
            .map(|dir| PixelCache::for_dataset(dir, &self.location));
        Ok(self)
    }

    pub fn with_transform(mut self, transform: GeoTransform) -> Self {
        self.extent.transform = transform;
        self
    }

    pub fn with_crs(mut self, crs_wkt: impl Into<String>) -> Self {
        self.crs_wkt = Some(crs_wkt.into());
        self
    }

    pub fn with_mask_values(mut self, mask_values: Vec<i64>) -> Self {
        self.mask_values = Some(mask_values);
        self
    }

    pub fn with_results(mut self, model: ModelConfig) -> Self {
        self.has_results = true;
        self.model = model;
        self
    }

    pub fn with_cache(mut self, cache: PixelCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Make reads of these image indices fail
    pub fn with_unreadable(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.unreadable.extend(indices);
        self
    }

    pub fn model(&self) -> &ModelConfig {
        &self.model
    }

    /// Image reads performed so far
    pub fn reads(&self) -> usize {
        self.reads
    }
}

impl TimeSeriesDriver for MemoryDriver {
    fn description(&self) -> &str {
        "In-memory image stack"
    }

    fn location(&self) -> &Path {
        &self.location
    }

    fn series(&self) -> &Series {
        &self.series
    }

    fn mask_values(&self) -> Option<&[i64]> {
        self.mask_values.as_deref()
    }

    fn set_mask_values(&mut self, mask_values: Option<Vec<i64>>) {
        self.mask_values = mask_values;
    }

    fn has_results(&self) -> bool {
        self.has_results
    }

    fn pixel(&self) -> &PixelData {
        &self.pixel
    }

    fn pixel_mut(&mut self) -> &mut PixelData {
        &mut self.pixel
    }

    fn extent(&self) -> &RasterExtent {
        &self.extent
    }

    fn crs_wkt(&self) -> Option<&str> {
        self.crs_wkt.as_deref()
    }

    fn retrieve_pixel(&mut self, index: usize) -> Result<()> {
        let pos = self
            .pixel
            .pos()
            .ok_or_else(|| TsToolsError::image(index, "no pixel selected"))?;
        if index >= self.series.len() {
            return Err(TsToolsError::image(index, "image index out of range"));
        }
        self.reads += 1;
        if self.unreadable.contains(&index) {
            return Err(TsToolsError::image(index, "image is unreadable"));
        }
        let values: Vec<Option<f64>> = (0..self.series.n_bands())
            .map(|band| Some(self.values[[index, band, pos.row, pos.col]]).filter(|v| v.is_finite()))
            .collect();
        self.pixel.set_image(index, &values)
    }

    fn fetch_results(&mut self) -> Result<()> {
        if !self.has_results {
            return Ok(());
        }
        let results = fit_pixel(&*self, &self.model)?;
        self.pixel.set_results(results);
        Ok(())
    }

    fn read_cache(&mut self) -> Result<bool> {
        let (Some(cache), Some(pos)) = (&self.cache, self.pixel.pos()) else {
            return Ok(false);
        };
        match cache.read(pos, &self.series)? {
            Some(samples) => {
                self.pixel.replace_samples(samples)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn write_cache(&self) -> Result<bool> {
        let (Some(cache), Some(pos)) = (&self.cache, self.pixel.pos()) else {
            return Ok(false);
        };
        cache.write(pos, &self.series, self.pixel.samples())?;
        Ok(true)
    }

    fn set_custom_controls(&mut self, controls: &DriverConfig) -> Result<()> {
        if controls.is_empty() {
            return Ok(());
        }
        self.model = parse_model_controls(controls, self.series.n_bands())?;
        Ok(())
    }
}
