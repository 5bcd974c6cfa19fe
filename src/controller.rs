//! Glue between a driver, the retriever and the host's settings
//!
//! The [`Controller`] owns one opened dataset. It validates new pixel
//! selections, applies runtime driver controls, drives retrieval and, once a
//! pixel completes, rescales the plot and builds the views.

use crate::driver::{DriverConfig, TimeSeriesDriver};
use crate::errors::{Result, TsToolsError};
use crate::geo::PixelPos;
use crate::retrieval::{
    CancelHandle, RetrievalObserver, RetrievalSession, RetrievalState, Retriever, TickOutcome,
};
use crate::scale::auto_scale;
use crate::settings::Settings;
use crate::symbology::{render_rgb, PlotSymbology};
use crate::views::{DoyView, TimeSeriesView};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// One row of the image table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRow {
    pub index: usize,
    pub id: String,
    pub date: NaiveDate,
    pub doy: u32,
    /// Values of the metadata columns flagged for the table
    pub metadata: Vec<String>,
    /// Symbology colour at the selected pixel, when every channel is valid
    pub rgb: Option<[u8; 3]>,
}

pub struct Controller<D: TimeSeriesDriver> {
    driver: D,
    settings: Settings,
    retriever: Retriever,
    custom_controls: DriverConfig,
    plot_symbology: Option<PlotSymbology>,
}

impl<D: TimeSeriesDriver> Controller<D> {
    /// Take ownership of an opened dataset. Symbology defaults and band
    /// indices are fitted to the dataset.
    pub fn new(driver: D, mut settings: Settings) -> Self {
        settings.init_for_series(driver.series());
        info!(
            "Loaded {} from {} ({} images)",
            driver.description(),
            driver.location().display(),
            driver.len()
        );
        Self {
            retriever: Retriever::new(settings.retrieval.clone()),
            driver,
            settings,
            custom_controls: DriverConfig::new(),
            plot_symbology: None,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn session(&self) -> Option<&RetrievalSession> {
        self.retriever.session()
    }

    pub fn state(&self) -> RetrievalState {
        self.retriever.state()
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    /// Replace all settings. Refused while a pixel is being fetched.
    pub fn set_settings(&mut self, mut settings: Settings) -> Result<()> {
        self.retriever.ensure_idle()?;
        settings.init_for_series(self.driver.series());
        self.retriever.set_config(settings.retrieval.clone());
        self.settings = settings;
        Ok(())
    }

    /// Runtime driver options, applied at the next selection
    pub fn set_custom_controls(&mut self, controls: DriverConfig) {
        self.custom_controls = controls;
    }

    /// Start retrieving the pixel under a map coordinate
    pub fn select_pixel(&mut self, x: f64, y: f64, crs_wkt: Option<&str>) -> Result<RetrievalState> {
        self.retriever.ensure_idle()?;
        self.apply_custom_controls()?;
        let state = self.retriever.select_pixel(&mut self.driver, x, y, crs_wkt)?;
        self.after_transition(state);
        Ok(state)
    }

    /// Start retrieving a known pixel
    pub fn select_position(&mut self, pos: PixelPos) -> Result<RetrievalState> {
        self.retriever.ensure_idle()?;
        self.apply_custom_controls()?;
        let state = self.retriever.select_position(&mut self.driver, pos)?;
        self.after_transition(state);
        Ok(state)
    }

    fn apply_custom_controls(&mut self) -> Result<()> {
        if let Err(e) = self.driver.set_custom_controls(&self.custom_controls) {
            error!("Could not apply custom controls: {}", e);
            self.retriever.cancel();
            return Err(e);
        }
        Ok(())
    }

    pub fn tick(&mut self) -> Result<TickOutcome> {
        let outcome = self.retriever.tick(&mut self.driver)?;
        if outcome.progress.is_some() {
            self.after_transition(outcome.state);
        }
        Ok(outcome)
    }

    pub fn cancel(&self) {
        self.retriever.cancel();
    }

    /// Handle for cancelling the current session from another task. Take it
    /// after the selection: each session gets a new one.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.retriever.cancel_handle()
    }

    /// Drive the current session to its end
    pub async fn run<O: RetrievalObserver + ?Sized>(&mut self, observer: &mut O) -> Result<RetrievalState> {
        let state = self.retriever.run(&mut self.driver, observer).await?;
        self.after_transition(state);
        Ok(state)
    }

    fn after_transition(&mut self, state: RetrievalState) {
        if state != RetrievalState::Complete {
            return;
        }
        if let Some(session) = self.retriever.session() {
            debug!(
                "Pixel {} done in {} ticks, {} skipped, cache hit: {}",
                session.pixel,
                session.ticks,
                session.skipped.len(),
                session.cache_hit
            );
        }
        self.rescale();
    }

    /// Recompute plot limits when auto-scaling is on
    pub fn rescale(&mut self) -> bool {
        if !self.settings.plot.auto_scale || self.driver.pixel_pos().is_none() {
            return false;
        }
        let mask = if self.settings.plot.mask {
            self.driver.mask_values()
        } else {
            None
        };
        let data = self.driver.pixel().masked(mask);
        auto_scale(&mut self.settings.plot, &data)
    }

    /// Change the sentinel values, refit the current pixel and rescale
    pub fn update_masks(&mut self, mask_values: Option<Vec<i64>>) -> Result<()> {
        self.retriever.ensure_idle()?;
        self.driver.set_mask_values(mask_values);
        if self.state() == RetrievalState::Complete && self.driver.has_results() {
            if let Err(e) = self.driver.fetch_results() {
                warn!("Could not refit pixel after mask change: {}", e);
                self.driver.pixel_mut().clear_results();
            }
        }
        self.rescale();
        Ok(())
    }

    /// Group plotted points by a metadata column; `None` draws plain points
    pub fn set_plot_symbology(&mut self, metadata: Option<&str>) -> Result<()> {
        self.plot_symbology = match metadata {
            None => None,
            Some(name) => {
                let column = self.driver.series().metadata_column(name).ok_or_else(|| {
                    TsToolsError::Configuration(format!("No metadata named '{}'", name))
                })?;
                Some(PlotSymbology::from_metadata(column))
            }
        };
        Ok(())
    }

    pub fn plot_symbology(&self) -> Option<&PlotSymbology> {
        self.plot_symbology.as_ref()
    }

    pub fn plot_symbology_mut(&mut self) -> Option<&mut PlotSymbology> {
        self.plot_symbology.as_mut()
    }

    pub fn time_series_view(&self) -> Result<TimeSeriesView> {
        TimeSeriesView::build(&self.driver, &self.settings.plot, self.plot_symbology.as_ref())
    }

    pub fn doy_view(&self) -> Result<DoyView> {
        DoyView::build(&self.driver, &self.settings.plot)
    }

    /// Names of the metadata columns shown in [`ImageRow::metadata`]
    pub fn image_table_columns(&self) -> Vec<&str> {
        self.driver
            .series()
            .metadata
            .iter()
            .filter(|c| c.in_table)
            .map(|c| c.name.as_str())
            .collect()
    }

    pub fn image_table(&self) -> Vec<ImageRow> {
        let series = self.driver.series();
        let samples = self.driver.pixel().samples();
        let has_pixel = self.driver.pixel_pos().is_some();
        series
            .images
            .iter()
            .enumerate()
            .map(|(index, image)| {
                let rgb = if has_pixel {
                    let values = samples.column(index).to_vec();
                    render_rgb(&values, &self.settings.symbology)
                } else {
                    None
                };
                ImageRow {
                    index,
                    id: image.id.clone(),
                    date: image.date,
                    doy: image.doy(),
                    metadata: series
                        .metadata
                        .iter()
                        .filter(|c| c.in_table)
                        .map(|c| c.values.get(index).cloned().unwrap_or_default())
                        .collect(),
                    rgb,
                }
            })
            .collect()
    }
}
