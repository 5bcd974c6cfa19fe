//! Driver for a NetCDF image stack
//!
//! Expected layout:
//! - dimensions `time`, `y`, `x`
//! - a `time` variable holding day ordinals (0001-01-01 is day 1), or
//!   offsets when its `units` attribute reads `days since YYYY-MM-DD`
//! - one `(time, y, x)` variable per band; the global `bands` attribute
//!   (comma separated) selects and orders them, otherwise every such variable
//!   is used in file order
//! - optional global attributes: `geo_transform` (6 doubles, GDAL order),
//!   `crs_wkt`, `image_ids` (one string per time step), `metadata` (comma
//!   separated column names, each stored as `metadata_<name>` strings),
//!   `symbology_hint_indices` (3 ints) and `symbology_hint_minmax` (2 doubles)

use crate::cache::PixelCache;
use crate::driver::{fit_pixel, parse_model_controls, DriverConfig, DriverOptions, TimeSeriesDriver};
use crate::errors::{Result, TsToolsError};
use crate::geo::{GeoTransform, RasterExtent};
use crate::model::ModelConfig;
use crate::pixel::PixelData;
use crate::series::{date_from_ordinal, ImageRecord, MetadataColumn, MinMaxHint, Series};
use chrono::{Datelike, NaiveDate};
use netcdf::{AttributeValue, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const STACK_DIMS: [&str; 3] = ["time", "y", "x"];

pub struct NetCdfStackDriver {
    location: PathBuf,
    file: File,
    series: Series,
    band_vars: Vec<String>,
    /// Series index to position along the file's time dimension
    time_index: Vec<usize>,
    extent: RasterExtent,
    crs_wkt: Option<String>,
    mask_values: Option<Vec<i64>>,
    has_results: bool,
    model: ModelConfig,
    cache: Option<PixelCache>,
    pixel: PixelData,
}

impl NetCdfStackDriver {
    /// Open a stack. `config` accepts the shared [`DriverOptions`] keys.
    pub fn open(location: impl AsRef<Path>, config: Option<&DriverConfig>) -> Result<Self> {
        let location = location.as_ref().to_path_buf();
        let options = DriverOptions::from_config(config)?;
        let file = netcdf::open(&location)?;

        let n_time = dimension_len(&file, "time")?;
        let rows = dimension_len(&file, "y")?;
        let cols = dimension_len(&file, "x")?;

        let ordinals = read_time_ordinals(&file)?;
        if ordinals.len() != n_time {
            return Err(TsToolsError::Configuration(format!(
                "'time' variable has {} values for {} time steps",
                ordinals.len(),
                n_time
            )));
        }
        let band_vars = band_variables(&file)?;
        options.model.validate(band_vars.len())?;

        let transform = match global_doubles(&file, "geo_transform")? {
            Some(gt) => GeoTransform::from_slice(&gt)?,
            None => GeoTransform::default(),
        };
        let crs_wkt = global_str(&file, "crs_wkt")?;

        let stem = location
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image")
            .to_string();
        let filename = location
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let dates = ordinals
            .iter()
            .map(|&o| {
                date_from_ordinal(o).ok_or_else(|| {
                    TsToolsError::Configuration(format!("time value {} is not a valid date", o))
                })
            })
            .collect::<Result<Vec<NaiveDate>>>()?;
        let ids = match global_strs(&file, "image_ids")? {
            Some(ids) if ids.len() == n_time => ids,
            Some(ids) => {
                return Err(TsToolsError::Configuration(format!(
                    "{} image ids for {} time steps",
                    ids.len(),
                    n_time
                )))
            }
            None => dates
                .iter()
                .map(|d| format!("{}_{:04}{:03}", stem, d.year(), d.ordinal()))
                .collect(),
        };

        // Stable sort so equal dates keep file order
        let mut time_index: Vec<usize> = (0..n_time).collect();
        time_index.sort_by_key(|&t| ordinals[t]);

        let images = time_index
            .iter()
            .map(|&t| ImageRecord::new(filename.clone(), location.clone(), ids[t].clone(), dates[t]))
            .collect();
        let mut series = Series::new(images, band_vars.clone());

        if let Some(names) = global_str(&file, "metadata")? {
            for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                let values = global_strs(&file, &format!("metadata_{}", name))?.ok_or_else(|| {
                    TsToolsError::Configuration(format!("metadata column '{}' is missing", name))
                })?;
                if values.len() != n_time {
                    return Err(TsToolsError::Configuration(format!(
                        "metadata column '{}' has {} values for {} time steps",
                        name,
                        values.len(),
                        n_time
                    )));
                }
                series = series.with_metadata(MetadataColumn {
                    name: name.to_string(),
                    values: time_index.iter().map(|&t| values[t].clone()).collect(),
                    in_table: true,
                })?;
            }
        }
        if let Some(hint) = global_doubles(&file, "symbology_hint_indices")? {
            if let [r, g, b] = hint[..] {
                series.symbology_hint_indices = [r as usize, g as usize, b as usize];
            }
        }
        if let Some(hint) = global_doubles(&file, "symbology_hint_minmax")? {
            if let [min, max] = hint[..] {
                series.symbology_hint_minmax = MinMaxHint::Uniform(min, max);
            }
        }

        let mask_values = match options.mask_values {
            Some(values) => Some(values),
            None => fill_value(&file, &band_vars[0])?.map(|v| vec![v]),
        };
        let cache = options
            .cache_dir
            .map(|dir| PixelCache::for_dataset(dir, &location));

        info!(
            "Opened {} with {} images of {} bands ({} x {} pixels)",
            location.display(),
            n_time,
            band_vars.len(),
            cols,
            rows
        );

        Ok(Self {
            pixel: PixelData::new(band_vars.len(), n_time),
            location,
            file,
            series,
            band_vars,
            time_index,
            extent: RasterExtent::new(cols, rows, transform),
            crs_wkt,
            mask_values,
            has_results: options.fit,
            model: options.model,
            cache,
        })
    }

    pub fn model(&self) -> &ModelConfig {
        &self.model
    }
}

impl TimeSeriesDriver for NetCdfStackDriver {
    fn description(&self) -> &str {
        "NetCDF image stack"
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
        let t = *self
            .time_index
            .get(index)
            .ok_or_else(|| TsToolsError::image(index, "image index out of range"))?;

        let mut values = Vec::with_capacity(self.band_vars.len());
        for name in &self.band_vars {
            let var = self
                .file
                .variable(name)
                .ok_or_else(|| TsToolsError::image(index, format!("variable '{}' not found", name)))?;
            let read: Vec<f32> = var
                .get_values::<f32, _>((t..t + 1, pos.row..pos.row + 1, pos.col..pos.col + 1))
                .map_err(|e| TsToolsError::image(index, format!("{}: {}", name, e)))?;
            values.push(read.first().map(|&v| f64::from(v)).filter(|v| v.is_finite()));
        }
        self.pixel.set_image(index, &values)
    }

    fn fetch_results(&mut self) -> Result<()> {
        if !self.has_results {
            return Ok(());
        }
        let results = fit_pixel(&*self, &self.model)?;
        debug!("Fit {} segments", results.len());
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
        self.model = parse_model_controls(controls, self.band_vars.len())?;
        Ok(())
    }
}

fn dimension_len(file: &File, name: &str) -> Result<usize> {
    file.dimension(name)
        .map(|d| d.len())
        .ok_or_else(|| TsToolsError::Configuration(format!("dimension '{}' not found", name)))
}

fn has_stack_dims(var: &netcdf::Variable) -> bool {
    let dims: Vec<String> = var
        .dimensions()
        .iter()
        .map(|d| d.name().to_string())
        .collect();
    dims == STACK_DIMS
}

fn band_variables(file: &File) -> Result<Vec<String>> {
    let bands: Vec<String> = match global_str(file, "bands")? {
        Some(list) => {
            let names: Vec<String> = list
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .collect();
            for name in &names {
                let var = file.variable(name).ok_or_else(|| {
                    TsToolsError::Configuration(format!("band variable '{}' not found", name))
                })?;
                if !has_stack_dims(&var) {
                    return Err(TsToolsError::Configuration(format!(
                        "band variable '{}' must have dimensions (time, y, x)",
                        name
                    )));
                }
            }
            names
        }
        None => file
            .variables()
            .filter(|var| has_stack_dims(var))
            .map(|var| var.name().to_string())
            .collect(),
    };
    if bands.is_empty() {
        return Err(TsToolsError::Configuration(
            "no (time, y, x) band variables found".to_string(),
        ));
    }
    Ok(bands)
}

fn read_time_ordinals(file: &File) -> Result<Vec<i32>> {
    let var = file
        .variable("time")
        .ok_or_else(|| TsToolsError::Configuration("'time' variable not found".to_string()))?;
    let values: Vec<f64> = var.get_values::<f64, _>(..)?;
    let base = match var.attribute("units").map(|a| a.value()).transpose()? {
        Some(AttributeValue::Str(units)) => parse_days_since(&units)?,
        _ => 0,
    };
    Ok(values.iter().map(|v| base + v.round() as i32).collect())
}

/// Ordinal of day zero for `days since YYYY-MM-DD[ ...]` units
fn parse_days_since(units: &str) -> Result<i32> {
    let unsupported = || TsToolsError::Configuration(format!("unsupported time units '{}'", units));
    let rest = units.trim().strip_prefix("days since ").ok_or_else(unsupported)?;
    let date = rest.get(..10).ok_or_else(unsupported)?;
    let base = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| unsupported())?;
    // Offset 0 falls on the base date itself
    Ok(base.num_days_from_ce())
}

fn fill_value(file: &File, band: &str) -> Result<Option<i64>> {
    let Some(var) = file.variable(band) else {
        return Ok(None);
    };
    let value = var
        .attribute("_FillValue")
        .map(|attr| attr.value())
        .transpose()?
        .and_then(|value| match value {
            AttributeValue::Float(v) => Some(f64::from(v)),
            AttributeValue::Double(v) => Some(v),
            AttributeValue::Short(v) => Some(f64::from(v)),
            AttributeValue::Int(v) => Some(f64::from(v)),
            _ => None,
        });
    Ok(value.filter(|v| v.fract() == 0.0).map(|v| v as i64))
}

fn global_value(file: &File, name: &str) -> Result<Option<AttributeValue>> {
    Ok(file.attribute(name).map(|attr| attr.value()).transpose()?)
}

fn global_str(file: &File, name: &str) -> Result<Option<String>> {
    match global_value(file, name)? {
        Some(AttributeValue::Str(s)) => Ok(Some(s)),
        Some(_) => Err(TsToolsError::Configuration(format!(
            "attribute '{}' must be a string",
            name
        ))),
        None => Ok(None),
    }
}

fn global_strs(file: &File, name: &str) -> Result<Option<Vec<String>>> {
    match global_value(file, name)? {
        Some(AttributeValue::Strs(values)) => Ok(Some(values)),
        Some(AttributeValue::Str(s)) => Ok(Some(vec![s])),
        Some(_) => Err(TsToolsError::Configuration(format!(
            "attribute '{}' must hold strings",
            name
        ))),
        None => Ok(None),
    }
}

fn global_doubles(file: &File, name: &str) -> Result<Option<Vec<f64>>> {
    let values = match global_value(file, name)? {
        Some(AttributeValue::Doubles(v)) => v,
        Some(AttributeValue::Double(v)) => vec![v],
        Some(AttributeValue::Floats(v)) => v.into_iter().map(f64::from).collect(),
        Some(AttributeValue::Ints(v)) => v.into_iter().map(f64::from).collect(),
        Some(AttributeValue::Int(v)) => vec![f64::from(v)],
        Some(_) => {
            return Err(TsToolsError::Configuration(format!(
                "attribute '{}' must be numeric",
                name
            )))
        }
        None => return Ok(None),
    };
    Ok(Some(values))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn days_since_units() {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap().num_days_from_ce();
        assert_eq!(parse_days_since("days since 1970-01-01").unwrap(), epoch);
        assert_eq!(parse_days_since("days since 1970-01-01 00:00:00").unwrap(), epoch);
        assert!(parse_days_since("hours since 1970-01-01").is_err());
        assert!(parse_days_since("days since 1970").is_err());
    }
}
