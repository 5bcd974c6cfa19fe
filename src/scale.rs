//! Automatic y axis scaling for the time series plot

use crate::settings::{PlotSettings, DEFAULT_MAX, DEFAULT_MIN};
use ndarray::{Array2, Axis};
use rayon::prelude::*;
use tracing::{debug, info};

/// Padding added outside the 2nd and 98th percentiles
pub const SCALE_PADDING: f64 = 500.0;

/// Percentile `q` (0 to 100) with linear interpolation between closest ranks.
/// `None` for empty input.
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64))
}

/// Padded 2nd/98th percentile limits of every band of a `bands × images`
/// matrix. A band without valid values gets `None`.
pub fn band_limits(data: &Array2<Option<f64>>) -> Vec<Option<(f64, f64)>> {
    data.axis_iter(Axis(0))
        .into_par_iter()
        .map(|band| {
            let valid: Vec<f64> = band.iter().filter_map(|v| *v).collect();
            let low = percentile(&valid, 2.0)?;
            let high = percentile(&valid, 98.0)?;
            Some((low - SCALE_PADDING, high + SCALE_PADDING))
        })
        .collect()
}

/// Update plot limits from `data`. Leaves the settings untouched and returns
/// `false` when the plotted band is entirely masked.
pub fn auto_scale(plot: &mut PlotSettings, data: &Array2<Option<f64>>) -> bool {
    let limits = band_limits(data);
    if limits.get(plot.band).copied().flatten().is_none() {
        info!("Cannot scale 100% masked data");
        return false;
    }

    let n_bands = limits.len();
    plot.min.resize(n_bands, DEFAULT_MIN);
    plot.max.resize(n_bands, DEFAULT_MAX);
    for (band, limit) in limits.into_iter().enumerate() {
        if let Some((min, max)) = limit {
            plot.min[band] = min;
            plot.max[band] = max;
        }
    }
    debug!("Scaled plot to min {:?}, max {:?}", plot.min, plot.max);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_interpolates() {
        let values: Vec<f64> = (1..=5).map(f64::from).collect();
        assert_eq!(percentile(&values, 0.0), Some(1.0));
        assert_eq!(percentile(&values, 50.0), Some(3.0));
        assert_eq!(percentile(&values, 100.0), Some(5.0));
        // rank 0.08 between 1 and 2
        assert!((percentile(&values, 2.0).unwrap() - 1.08).abs() < 1e-12);
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn band_limits_keep_band_order() {
        let data = Array2::from_shape_fn((6, 11), |(band, i)| {
            (band != 3).then(|| (band * 1000 + i * 10) as f64)
        });
        let limits = band_limits(&data);
        assert_eq!(limits.len(), 6);
        assert_eq!(limits[3], None);
        for band in [0, 1, 2, 4, 5] {
            let (low, high) = limits[band].unwrap();
            let base = (band * 1000) as f64;
            assert!((low - (base + 2.0 - SCALE_PADDING)).abs() < 1e-9);
            assert!((high - (base + 98.0 + SCALE_PADDING)).abs() < 1e-9);
        }
    }

    #[test]
    fn masked_band_keeps_limits() {
        let data = Array2::from_shape_vec(
            (2, 3),
            vec![None, None, None, Some(100.0), Some(200.0), Some(300.0)],
        )
        .unwrap();
        let mut plot = PlotSettings {
            min: vec![-1.0, -1.0],
            max: vec![1.0, 1.0],
            ..PlotSettings::default()
        };

        assert!(!auto_scale(&mut plot, &data));
        assert_eq!(plot.min, vec![-1.0, -1.0]);

        plot.band = 1;
        assert!(auto_scale(&mut plot, &data));
        assert_eq!(plot.min[0], -1.0);
        assert!((plot.min[1] - (104.0 - SCALE_PADDING)).abs() < 1e-9);
        assert!((plot.max[1] - (296.0 + SCALE_PADDING)).abs() < 1e-9);
    }
}
