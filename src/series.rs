//! Dataset-level description of a time series: dated images, band names and
//! display hints shared by every driver.

use crate::errors::{Result, TsToolsError};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One dated image of the stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub filename: String,
    pub path: PathBuf,
    pub id: String,
    pub date: NaiveDate,
    /// Proleptic Gregorian day number, 0001-01-01 is day 1
    pub ordinal: i32,
}

impl ImageRecord {
    pub fn new(
        filename: impl Into<String>,
        path: impl Into<PathBuf>,
        id: impl Into<String>,
        date: NaiveDate,
    ) -> Self {
        Self {
            filename: filename.into(),
            path: path.into(),
            id: id.into(),
            date,
            ordinal: date.num_days_from_ce(),
        }
    }

    /// Day of year, 1-based
    pub fn doy(&self) -> u32 {
        self.date.ordinal()
    }
}

/// Convert a day ordinal back into a calendar date.
pub fn date_from_ordinal(ordinal: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(ordinal)
}

/// Default raster scaling hint: one pair for every band, or one pair per band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MinMaxHint {
    Uniform(f64, f64),
    PerBand(Vec<f64>, Vec<f64>),
}

impl MinMaxHint {
    /// Expand to per-band minimum and maximum vectors
    pub fn expand(&self, n_bands: usize) -> Option<(Vec<f64>, Vec<f64>)> {
        match self {
            MinMaxHint::Uniform(min, max) => Some((vec![*min; n_bands], vec![*max; n_bands])),
            MinMaxHint::PerBand(min, max) if min.len() == n_bands && max.len() == n_bands => {
                Some((min.clone(), max.clone()))
            }
            MinMaxHint::PerBand(..) => None,
        }
    }
}

/// A named per-image attribute (sensor, cloud cover, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataColumn {
    pub name: String,
    pub values: Vec<String>,
    /// Whether the column is shown in the image table
    pub in_table: bool,
}

/// Images and bands of one opened dataset
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub images: Vec<ImageRecord>,
    pub band_names: Vec<String>,
    pub symbology_hint_indices: [usize; 3],
    pub symbology_hint_minmax: MinMaxHint,
    pub metadata: Vec<MetadataColumn>,
}

impl Series {
    /// Images are kept in the given order; see [`Series::sort_by_date`].
    pub fn new(images: Vec<ImageRecord>, band_names: Vec<String>) -> Self {
        Self {
            images,
            band_names,
            symbology_hint_indices: [3, 2, 1],
            symbology_hint_minmax: MinMaxHint::Uniform(0.0, 1.0),
            metadata: Vec::new(),
        }
    }

    /// Attach a metadata column, which must hold one value per image
    pub fn with_metadata(mut self, column: MetadataColumn) -> Result<Self> {
        if column.values.len() != self.images.len() {
            return Err(TsToolsError::Configuration(format!(
                "Metadata '{}' has {} values for {} images",
                column.name,
                column.values.len(),
                self.images.len()
            )));
        }
        self.metadata.push(column);
        Ok(self)
    }

    /// Stable sort of the images (and metadata values) by date. Returns the
    /// previous index of each image in its new position.
    pub fn sort_by_date(&mut self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.images.len()).collect();
        order.sort_by_key(|&i| self.images[i].ordinal);
        if order.iter().enumerate().all(|(k, &i)| k == i) {
            return order;
        }
        self.images = order.iter().map(|&i| self.images[i].clone()).collect();
        for column in &mut self.metadata {
            column.values = order.iter().map(|&i| column.values[i].clone()).collect();
        }
        order
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn n_bands(&self) -> usize {
        self.band_names.len()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.images.iter().map(|img| img.date).collect()
    }

    pub fn ordinals(&self) -> Vec<i32> {
        self.images.iter().map(|img| img.ordinal).collect()
    }

    pub fn image_ids(&self) -> Vec<String> {
        self.images.iter().map(|img| img.id.clone()).collect()
    }

    pub fn metadata_column(&self, name: &str) -> Option<&MetadataColumn> {
        self.metadata.iter().find(|c| c.name == name)
    }
}
