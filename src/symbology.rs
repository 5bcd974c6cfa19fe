//! Plot symbology from image metadata, and RGB contrast stretching

use crate::errors::{Result, TsToolsError};
use crate::series::MetadataColumn;
use crate::settings::{ContrastEnhancement, SymbologySettings};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Single character marker codes understood by common plotting backends
pub const MARKERS: [char; 10] = ['o', 's', '^', 'v', 'D', 'x', '+', '*', 'p', 'h'];

const PALETTE: [[u8; 3]; 8] = [
    [0, 0, 0],
    [228, 26, 28],
    [55, 126, 184],
    [77, 175, 74],
    [152, 78, 163],
    [255, 127, 0],
    [166, 86, 40],
    [247, 129, 191],
];

/// Images sharing one metadata value, drawn with one marker and colour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolGroup {
    pub value: String,
    /// Image indices, ascending
    pub indices: Vec<usize>,
    pub marker: char,
    pub color: [u8; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotSymbology {
    /// Metadata column the groups were built from
    pub metadata: String,
    /// Sorted by value
    pub groups: Vec<SymbolGroup>,
}

impl PlotSymbology {
    /// Group images by unique value of `column`, cycling markers and colours
    pub fn from_metadata(column: &MetadataColumn) -> Self {
        let mut by_value: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (index, value) in column.values.iter().enumerate() {
            by_value.entry(value.as_str()).or_default().push(index);
        }
        let groups = by_value
            .into_iter()
            .enumerate()
            .map(|(i, (value, indices))| SymbolGroup {
                value: value.to_string(),
                indices,
                marker: MARKERS[i % MARKERS.len()],
                color: PALETTE[i % PALETTE.len()],
            })
            .collect::<Vec<_>>();
        debug!(
            "Plot symbology for '{}' has {} groups",
            column.name,
            groups.len()
        );
        Self {
            metadata: column.name.clone(),
            groups,
        }
    }

    pub fn group(&self, value: &str) -> Option<&SymbolGroup> {
        self.groups.iter().find(|g| g.value == value)
    }

    /// Change the marker and colour of one value's group
    pub fn set_style(&mut self, value: &str, marker: char, color: [u8; 3]) -> Result<()> {
        if !MARKERS.contains(&marker) {
            return Err(TsToolsError::Configuration(format!(
                "Unknown marker '{}'",
                marker
            )));
        }
        let group = self
            .groups
            .iter_mut()
            .find(|g| g.value == value)
            .ok_or_else(|| {
                TsToolsError::Configuration(format!(
                    "'{}' is not a value of metadata '{}'",
                    value, self.metadata
                ))
            })?;
        group.marker = marker;
        group.color = color;
        Ok(())
    }
}

impl ContrastEnhancement {
    /// Display intensity of `value` for a `min..max` stretch. `None` means
    /// the value is not drawn.
    pub fn apply(&self, value: f64, min: f64, max: f64) -> Option<u8> {
        if !value.is_finite() {
            return None;
        }
        let outside = value < min || value > max;
        match self {
            ContrastEnhancement::NoEnhancement => Some(value.clamp(0.0, 255.0) as u8),
            ContrastEnhancement::StretchToMinMax => Some(stretch(value, min, max)),
            ContrastEnhancement::StretchAndClipToMinMax => {
                (!outside).then(|| stretch(value, min, max))
            }
            ContrastEnhancement::ClipToMinMax => {
                (!outside).then(|| value.clamp(0.0, 255.0) as u8)
            }
        }
    }
}

fn stretch(value: f64, min: f64, max: f64) -> u8 {
    if max <= min {
        return if value >= max { 255 } else { 0 };
    }
    ((value - min) / (max - min) * 255.0).round().clamp(0.0, 255.0) as u8
}

/// RGB colour of one image at the selected pixel, from its band values
pub fn render_rgb(values: &[Option<f64>], symbology: &SymbologySettings) -> Option<[u8; 3]> {
    let channel = |band: usize| {
        let value = values.get(band).copied().flatten()?;
        let min = symbology.min.get(band).copied()?;
        let max = symbology.max.get(band).copied()?;
        symbology.contrast.apply(value, min, max)
    };
    Some([
        channel(symbology.band_red)?,
        channel(symbology.band_green)?,
        channel(symbology.band_blue)?,
    ])
}
