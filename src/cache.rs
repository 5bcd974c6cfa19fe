//! Per-pixel JSON cache
//!
//! One file per pixel under the cache folder. A cache entry is only reused
//! when it was written for the same images and bands the dataset has now.

use crate::errors::{Result, TsToolsError};
use crate::geo::PixelPos;
use crate::series::Series;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
struct CachedPixel {
    col: usize,
    row: usize,
    image_ids: Vec<String>,
    band_names: Vec<String>,
    /// One row per band
    samples: Vec<Vec<Option<f64>>>,
}

/// Cache folder plus a key naming the dataset
#[derive(Debug, Clone, PartialEq)]
pub struct PixelCache {
    dir: PathBuf,
    key: String,
}

impl PixelCache {
    pub fn new(dir: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            key: key.into(),
        }
    }

    /// Key the cache by the dataset's file stem
    pub fn for_dataset(dir: impl Into<PathBuf>, location: &Path) -> Self {
        let key = location
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("dataset")
            .to_string();
        Self::new(dir, key)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, pos: PixelPos) -> PathBuf {
        self.dir
            .join(format!("{}_x{}_y{}.json", self.key, pos.col, pos.row))
    }

    /// Cached samples for `pos`, or `None` when missing or stale
    pub fn read(&self, pos: PixelPos, series: &Series) -> Result<Option<Array2<Option<f64>>>> {
        let path = self.path_for(pos);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let cached: CachedPixel = serde_json::from_str(&content)?;

        if cached.col != pos.col
            || cached.row != pos.row
            || cached.image_ids != series.image_ids()
            || cached.band_names != series.band_names
        {
            debug!("Cache file {} does not match dataset, ignoring", path.display());
            return Ok(None);
        }

        let n_bands = cached.samples.len();
        let n_images = series.len();
        if cached.samples.iter().any(|band| band.len() != n_images) {
            debug!("Cache file {} has ragged samples, ignoring", path.display());
            return Ok(None);
        }
        let flat: Vec<Option<f64>> = cached.samples.into_iter().flatten().collect();
        Ok(Some(Array2::from_shape_vec((n_bands, n_images), flat)?))
    }

    /// Write samples for `pos`, creating the cache folder if needed
    pub fn write(&self, pos: PixelPos, series: &Series, samples: &Array2<Option<f64>>) -> Result<()> {
        let cached = CachedPixel {
            col: pos.col,
            row: pos.row,
            image_ids: series.image_ids(),
            band_names: series.band_names.clone(),
            samples: samples.outer_iter().map(|band| band.to_vec()).collect(),
        };
        let path = self.path_for(pos);
        let json = serde_json::to_string(&cached)
            .map_err(|e| TsToolsError::CacheWrite(e.to_string()))?;
        fs::create_dir_all(&self.dir)
            .and_then(|()| fs::write(&path, json))
            .map_err(|e| TsToolsError::CacheWrite(format!("{}: {}", path.display(), e)))
    }
}
