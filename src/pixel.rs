//! Per-pixel state owned by a driver: the selected position, the
//! `bands × images` sample matrix and any fitted model segments.

use crate::errors::{Result, TsToolsError};
use crate::geo::PixelPos;
use crate::model::SegmentFit;
use ndarray::{Array2, Axis};

/// True when `value` equals one of the integer sentinels
pub fn is_masked(value: f64, mask_values: &[i64]) -> bool {
    mask_values.iter().any(|&m| value == m as f64)
}

/// Samples of the selected pixel. `None` marks an image not fetched yet or
/// one whose read failed.
#[derive(Debug, Clone)]
pub struct PixelData {
    pos: Option<PixelPos>,
    samples: Array2<Option<f64>>,
    results: Vec<SegmentFit>,
}

impl PixelData {
    pub fn new(n_bands: usize, n_images: usize) -> Self {
        Self {
            pos: None,
            samples: Array2::from_elem((n_bands, n_images), None),
            results: Vec::new(),
        }
    }

    /// Select a new pixel, discarding every sample and result of the last one
    pub fn reset(&mut self, pos: PixelPos) {
        self.pos = Some(pos);
        self.samples.fill(None);
        self.results.clear();
    }

    pub fn pos(&self) -> Option<PixelPos> {
        self.pos
    }

    pub fn n_bands(&self) -> usize {
        self.samples.nrows()
    }

    pub fn n_images(&self) -> usize {
        self.samples.ncols()
    }

    /// Store one image's values, one per band
    pub fn set_image(&mut self, index: usize, values: &[Option<f64>]) -> Result<()> {
        if index >= self.n_images() {
            return Err(TsToolsError::image(index, "image index out of range"));
        }
        if values.len() != self.n_bands() {
            return Err(TsToolsError::image(
                index,
                format!("expected {} band values, got {}", self.n_bands(), values.len()),
            ));
        }
        for (cell, value) in self.samples.column_mut(index).iter_mut().zip(values) {
            *cell = *value;
        }
        Ok(())
    }

    pub fn samples(&self) -> &Array2<Option<f64>> {
        &self.samples
    }

    /// Replace the whole matrix, e.g. from a cache
    pub fn replace_samples(&mut self, samples: Array2<Option<f64>>) -> Result<()> {
        if samples.dim() != self.samples.dim() {
            return Err(TsToolsError::retrieval(format!(
                "sample matrix has shape {:?}, expected {:?}",
                samples.dim(),
                self.samples.dim()
            )));
        }
        self.samples = samples;
        Ok(())
    }

    /// Samples with sentinel values replaced by `None`
    pub fn masked(&self, mask_values: Option<&[i64]>) -> Array2<Option<f64>> {
        match mask_values {
            Some(mask) if !mask.is_empty() => self
                .samples
                .mapv(|v| v.filter(|value| !is_masked(*value, mask))),
            _ => self.samples.clone(),
        }
    }

    /// One band's samples in image order
    pub fn band(&self, band: usize, mask_values: Option<&[i64]>) -> Result<Vec<Option<f64>>> {
        if band >= self.n_bands() {
            return Err(TsToolsError::BandOutOfRange {
                band,
                n_bands: self.n_bands(),
            });
        }
        let row = self.samples.index_axis(Axis(0), band);
        Ok(match mask_values {
            Some(mask) => row
                .iter()
                .map(|v| v.filter(|value| !is_masked(*value, mask)))
                .collect(),
            None => row.to_vec(),
        })
    }

    /// Number of images with at least one band value
    pub fn populated(&self) -> usize {
        self.samples
            .axis_iter(Axis(1))
            .filter(|image| image.iter().any(Option::is_some))
            .count()
    }

    pub fn results(&self) -> &[SegmentFit] {
        &self.results
    }

    pub fn set_results(&mut self, results: Vec<SegmentFit>) {
        self.results = results;
    }

    pub fn clear_results(&mut self) {
        self.results.clear();
    }
}
