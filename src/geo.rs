//! Map coordinate to raster pixel conversion

use crate::errors::{Result, TsToolsError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A raster pixel, column then row, 0-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelPos {
    pub col: usize,
    pub row: usize,
}

impl PixelPos {
    pub fn new(col: usize, row: usize) -> Self {
        Self { col, row }
    }
}

impl fmt::Display for PixelPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x={}, y={}", self.col, self.row)
    }
}

/// Affine transform in GDAL order: origin x, pixel width, row rotation,
/// origin y, column rotation, pixel height
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform(pub [f64; 6]);

impl Default for GeoTransform {
    /// Map coordinates equal pixel coordinates
    fn default() -> Self {
        GeoTransform([0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
    }
}

impl GeoTransform {
    pub fn from_slice(values: &[f64]) -> Result<Self> {
        let gt: [f64; 6] = values.try_into().map_err(|_| {
            TsToolsError::Configuration(format!(
                "Geotransform needs 6 coefficients, got {}",
                values.len()
            ))
        })?;
        if gt[1] == 0.0 || gt[5] == 0.0 {
            return Err(TsToolsError::Configuration(
                "Geotransform pixel size must be non-zero".to_string(),
            ));
        }
        Ok(GeoTransform(gt))
    }

    /// Fractional pixel coordinates of a map location (rotation terms ignored)
    pub fn to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let gt = &self.0;
        ((x - gt[0]) / gt[1], (y - gt[3]) / gt[5])
    }

    /// Map coordinates of a pixel's upper left corner
    pub fn to_map(&self, col: f64, row: f64) -> (f64, f64) {
        let gt = &self.0;
        (gt[0] + col * gt[1] + row * gt[2], gt[3] + col * gt[4] + row * gt[5])
    }

    /// Closed ring outlining a pixel in map coordinates
    pub fn footprint(&self, pos: PixelPos) -> [(f64, f64); 5] {
        let (c, r) = (pos.col as f64, pos.row as f64);
        let ul = self.to_map(c, r);
        [ul, self.to_map(c + 1.0, r), self.to_map(c + 1.0, r + 1.0), self.to_map(c, r + 1.0), ul]
    }
}

/// Raster size plus its georeferencing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterExtent {
    pub cols: usize,
    pub rows: usize,
    pub transform: GeoTransform,
}

impl RasterExtent {
    pub fn new(cols: usize, rows: usize, transform: GeoTransform) -> Self {
        Self {
            cols,
            rows,
            transform,
        }
    }

    pub fn contains(&self, pos: PixelPos) -> bool {
        pos.col < self.cols && pos.row < self.rows
    }

    /// Pixel containing a map location
    pub fn locate(&self, x: f64, y: f64) -> Result<PixelPos> {
        let (px, py) = self.transform.to_pixel(x, y);
        let (px, py) = (px.floor(), py.floor());
        if !px.is_finite() || !py.is_finite() || px < 0.0 || py < 0.0 {
            return Err(TsToolsError::OutOfExtent { x, y });
        }
        let pos = PixelPos::new(px as usize, py as usize);
        if !self.contains(pos) {
            return Err(TsToolsError::OutOfExtent { x, y });
        }
        Ok(pos)
    }
}
