//! Plot-ready views of the selected pixel
//!
//! Views carry everything a host needs to draw, with no drawing backend
//! attached.

use crate::driver::{Curve, TimeSeriesDriver};
use crate::errors::Result;
use crate::settings::PlotSettings;
use crate::symbology::PlotSymbology;
use chrono::{Datelike, NaiveDate};
use serde::Serialize;

/// Points drawn with one marker and colour
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointSeries {
    pub label: Option<String>,
    pub marker: char,
    pub color: [u8; 3],
    pub x: Vec<NaiveDate>,
    pub y: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesView {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub y_limits: (f64, f64),
    pub x_limits: Option<(NaiveDate, NaiveDate)>,
    pub points: Vec<PointSeries>,
    pub fit: Vec<Curve>,
    pub breaks: Vec<Curve>,
}

impl TimeSeriesView {
    pub fn build<D: TimeSeriesDriver + ?Sized>(
        driver: &D,
        plot: &PlotSettings,
        symbology: Option<&PlotSymbology>,
    ) -> Result<Self> {
        let dates = driver.dates();
        let values = driver.get_data(plot.band, plot.mask)?;

        let points = match symbology {
            Some(symbology) => symbology
                .groups
                .iter()
                .filter(|g| !g.indices.is_empty())
                .map(|g| {
                    let (x, y) = g
                        .indices
                        .iter()
                        .filter_map(|&i| Some((*dates.get(i)?, *values.get(i)?)))
                        .unzip();
                    PointSeries {
                        label: Some(g.value.clone()),
                        marker: g.marker,
                        color: g.color,
                        x,
                        y,
                    }
                })
                .collect(),
            None => vec![PointSeries {
                label: None,
                marker: 'o',
                color: [0, 0, 0],
                x: dates,
                y: values,
            }],
        };

        let n_results = driver.pixel().results().len();
        let fit = if plot.fit && n_results > 0 {
            driver.get_prediction(plot.band)
        } else {
            Vec::new()
        };
        let breaks = if plot.breaks && n_results > 1 {
            driver.get_breaks(plot.band)
        } else {
            Vec::new()
        };

        Ok(Self {
            title: title("Time series", driver),
            x_label: "Date".to_string(),
            y_label: band_label(driver, plot.band),
            y_limits: plot.limits(plot.band),
            x_limits: x_limits(plot),
            points,
            fit,
            breaks,
        })
    }
}

/// One observation placed by day of year
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DoyPoint {
    pub doy: u32,
    pub year: i32,
    pub value: f64,
}

/// Observations folded onto a single year, coloured by acquisition year
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoyView {
    pub title: String,
    pub y_label: String,
    pub y_limits: (f64, f64),
    pub points: Vec<DoyPoint>,
    /// First and last year present, for the colour ramp
    pub years: Option<(i32, i32)>,
}

impl DoyView {
    /// Masked or missing observations are left out
    pub fn build<D: TimeSeriesDriver + ?Sized>(driver: &D, plot: &PlotSettings) -> Result<Self> {
        let values = driver.get_data(plot.band, plot.mask)?;
        let points: Vec<DoyPoint> = driver
            .series()
            .images
            .iter()
            .zip(values)
            .filter_map(|(image, value)| {
                Some(DoyPoint {
                    doy: image.doy(),
                    year: image.date.year(),
                    value: value?,
                })
            })
            .collect();
        let years = points
            .iter()
            .map(|p| p.year)
            .min()
            .zip(points.iter().map(|p| p.year).max());

        Ok(Self {
            title: title("DOY plot", driver),
            y_label: band_label(driver, plot.band),
            y_limits: plot.limits(plot.band),
            points,
            years,
        })
    }
}

/// Plot title with the selected pixel, 1-based
fn title<D: TimeSeriesDriver + ?Sized>(prefix: &str, driver: &D) -> String {
    match driver.pixel_pos() {
        Some(pos) => format!("{} - row: {} col: {}", prefix, pos.row + 1, pos.col + 1),
        None => prefix.to_string(),
    }
}

fn band_label<D: TimeSeriesDriver + ?Sized>(driver: &D, band: usize) -> String {
    driver
        .band_names()
        .get(band)
        .cloned()
        .unwrap_or_else(|| "Band".to_string())
}

fn x_limits(plot: &PlotSettings) -> Option<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::from_ymd_opt(plot.xmin?, 1, 1)?;
    let end = NaiveDate::from_ymd_opt(plot.xmax?, 12, 31)?;
    Some((start, end))
}
