//! Harmonic regression with sequential break detection
//!
//! Each segment is modeled per band as
//! `y = b0 + b1·t + b2·cos(ωt) + b3·sin(ωt)` with `ω = 2π / 365.25`, where the
//! trend term is measured in years from the segment start. A segment is first
//! fit on `min_obs` valid observations; each following observation is then
//! scored by its residual over the segment RMSE, averaged across the test
//! bands. `consecutive` anomalous observations in a row close the segment
//! with a break at the first of them, and the next segment starts there.
//! A break needs `min_obs` valid observations after it to open a segment;
//! otherwise the current segment runs on to the end of the data, so the last
//! segment never carries a break.

use crate::errors::{Result, TsToolsError};
use nalgebra::DMatrix;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Number of regression coefficients
pub const N_COEF: usize = 4;

const DAYS_PER_YEAR: f64 = 365.25;
const OMEGA: f64 = 2.0 * PI / DAYS_PER_YEAR;
const MIN_RMSE: f64 = 1e-3;
/// Singular values below this share of the largest count as zero
const RANK_TOL: f64 = 1e-10;

/// Tunables for the fit, settable as driver custom controls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    /// Observations used to initialise a segment
    pub min_obs: usize,
    /// Anomalies in a row needed to confirm a break
    pub consecutive: usize,
    /// Normalized residual above which an observation is anomalous
    pub threshold: f64,
    /// Bands scored for anomalies, all bands when unset
    pub test_bands: Option<Vec<usize>>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            min_obs: 12,
            consecutive: 3,
            threshold: 3.0,
            test_bands: None,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self, n_bands: usize) -> Result<()> {
        if self.min_obs < N_COEF + 1 {
            return Err(TsToolsError::Configuration(format!(
                "min_obs must be at least {}",
                N_COEF + 1
            )));
        }
        if self.consecutive == 0 {
            return Err(TsToolsError::Configuration(
                "consecutive must be at least 1".to_string(),
            ));
        }
        if !(self.threshold > 0.0) {
            return Err(TsToolsError::Configuration(
                "threshold must be positive".to_string(),
            ));
        }
        if let Some(bands) = &self.test_bands {
            if let Some(&band) = bands.iter().find(|&&b| b >= n_bands) {
                return Err(TsToolsError::BandOutOfRange { band, n_bands });
            }
        }
        Ok(())
    }
}

/// One fitted period of the series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentFit {
    /// Ordinal of the first observation in the segment
    pub start: i32,
    /// Ordinal of the last observation in the segment
    pub end: i32,
    /// Ordinal of the observation that opened the next segment
    pub break_day: Option<i32>,
    /// Image index of that observation
    pub break_index: Option<usize>,
    /// Coefficients per band
    pub coef: Vec<[f64; N_COEF]>,
    /// Root mean squared error per band
    pub rmse: Vec<f64>,
}

impl SegmentFit {
    pub fn predict(&self, band: usize, ordinal: i32) -> Option<f64> {
        let coef = self.coef.get(band)?;
        let row = design_row(ordinal, self.start);
        Some(coef.iter().zip(row.iter()).map(|(c, x)| c * x).sum())
    }

    /// Daily predicted curve over the segment
    pub fn curve(&self, band: usize) -> Option<(Vec<i32>, Vec<f64>)> {
        let x: Vec<i32> = (self.start..=self.end).collect();
        let y = x
            .iter()
            .map(|&t| self.predict(band, t))
            .collect::<Option<Vec<f64>>>()?;
        Some((x, y))
    }
}

fn design_row(ordinal: i32, origin: i32) -> [f64; N_COEF] {
    let t = f64::from(ordinal);
    [
        1.0,
        f64::from(ordinal - origin) / DAYS_PER_YEAR,
        (OMEGA * t).cos(),
        (OMEGA * t).sin(),
    ]
}

struct Fit {
    coef: Vec<[f64; N_COEF]>,
    rmse: Vec<f64>,
}

/// Least-squares fit of every band over the observations at `obs` (image
/// indices), solved through one SVD of the shared design matrix
fn fit_window(
    ordinals: &[i32],
    samples: &Array2<Option<f64>>,
    obs: &[usize],
    origin: i32,
) -> Result<Fit> {
    let design = DMatrix::from_row_iterator(
        obs.len(),
        N_COEF,
        obs.iter().flat_map(|&i| design_row(ordinals[i], origin)),
    );
    // Valid observations have a value in every band
    let observed = DMatrix::from_fn(obs.len(), samples.nrows(), |r, band| {
        samples[[band, obs[r]]].unwrap_or(f64::NAN)
    });

    let svd = design.clone().svd(true, true);
    let eps = RANK_TOL * svd.singular_values.max();
    if svd.rank(eps) < N_COEF {
        return Err(TsToolsError::ResultComputation(format!(
            "rank-deficient design matrix over {} observations",
            obs.len()
        )));
    }
    let beta = svd
        .solve(&observed, eps)
        .map_err(|e| TsToolsError::ResultComputation(e.to_string()))?;
    let residuals = observed - &design * &beta;

    let dof = if obs.len() > N_COEF { obs.len() - N_COEF } else { obs.len() };
    let coef = beta
        .column_iter()
        .map(|c| [c[0], c[1], c[2], c[3]])
        .collect();
    let rmse = residuals
        .column_iter()
        .map(|r| (r.norm_squared() / dof as f64).sqrt())
        .collect();
    Ok(Fit { coef, rmse })
}

fn anomaly_score(
    fit: &Fit,
    ordinals: &[i32],
    samples: &Array2<Option<f64>>,
    index: usize,
    origin: i32,
    test_bands: &[usize],
) -> f64 {
    let row = design_row(ordinals[index], origin);
    let total: f64 = test_bands
        .iter()
        .map(|&band| {
            let fitted: f64 = fit.coef[band].iter().zip(row.iter()).map(|(a, x)| a * x).sum();
            let observed = samples[[band, index]].unwrap_or(fitted);
            (observed - fitted).abs() / fit.rmse[band].max(MIN_RMSE)
        })
        .sum();
    total / test_bands.len() as f64
}

/// Fit segments over already-masked samples (`bands × images`)
pub fn fit_segments(
    ordinals: &[i32],
    samples: &Array2<Option<f64>>,
    config: &ModelConfig,
) -> Result<Vec<SegmentFit>> {
    if ordinals.len() < 2 {
        return Err(TsToolsError::ResultComputation(format!(
            "need at least 2 images to fit a model, have {}",
            ordinals.len()
        )));
    }
    if samples.ncols() != ordinals.len() {
        return Err(TsToolsError::ResultComputation(format!(
            "{} sample columns for {} images",
            samples.ncols(),
            ordinals.len()
        )));
    }
    config.validate(samples.nrows())?;

    let test_bands: Vec<usize> = match &config.test_bands {
        Some(bands) if !bands.is_empty() => bands.clone(),
        _ => (0..samples.nrows()).collect(),
    };
    let valid: Vec<usize> = (0..ordinals.len())
        .filter(|&i| samples.column(i).iter().all(Option::is_some))
        .collect();
    if valid.len() < config.min_obs {
        return Err(TsToolsError::ResultComputation(format!(
            "{} valid observations, need {}",
            valid.len(),
            config.min_obs
        )));
    }

    let mut segments = Vec::new();
    let mut start = 0;
    while valid.len() - start >= config.min_obs {
        let origin = ordinals[valid[start]];
        let mut end = start + config.min_obs;
        let mut fit = fit_window(ordinals, samples, &valid[start..end], origin)?;

        let mut pending: Vec<usize> = Vec::new();
        let mut break_at = None;
        let mut pos = end;
        while pos < valid.len() {
            let index = valid[pos];
            let score = anomaly_score(&fit, ordinals, samples, index, origin, &test_bands);
            if score > config.threshold {
                pending.push(pos);
                if pending.len() == config.consecutive {
                    break_at = Some(pending[0]);
                    break;
                }
            } else {
                pending.clear();
                end = pos + 1;
                fit = fit_window(ordinals, samples, &valid[start..end], origin)?;
            }
            pos += 1;
        }

        match break_at {
            // Too few observations left to open a segment after the break
            Some(next) if valid.len() - next < config.min_obs => {
                segments.push(SegmentFit {
                    start: origin,
                    end: ordinals[valid[valid.len() - 1]],
                    break_day: None,
                    break_index: None,
                    coef: fit.coef,
                    rmse: fit.rmse,
                });
                break;
            }
            Some(next) => {
                let break_index = valid[next];
                segments.push(SegmentFit {
                    start: origin,
                    end: ordinals[valid[end - 1]],
                    break_day: Some(ordinals[break_index]),
                    break_index: Some(break_index),
                    coef: fit.coef,
                    rmse: fit.rmse,
                });
                start = next;
            }
            None => {
                // Trailing unconfirmed anomalies stay with the last segment
                segments.push(SegmentFit {
                    start: origin,
                    end: ordinals[valid[valid.len() - 1]],
                    break_day: None,
                    break_index: None,
                    coef: fit.coef,
                    rmse: fit.rmse,
                });
                break;
            }
        }
    }
    Ok(segments)
}
