//! tstools: interactive pixel time series retrieval for remote sensing stacks
//!
//! A dataset of co-registered, dated images is opened through a
//! [`TimeSeriesDriver`](driver::TimeSeriesDriver). Selecting a map location
//! starts a retrieval session that reads the pixel's values image by image in
//! short, cancellable ticks so a host interface stays responsive. Once all
//! images are read, the samples are cached and an optional harmonic model with
//! break detection is fitted.
//!
//! ## Module Organization
//!
//! - [`driver`]: the driver contract shared by every format
//! - [`drivers`]: bundled NetCDF stack and in-memory drivers
//! - [`retrieval`]: the tick-based retrieval state machine
//! - [`controller`]: selection handling, masking, scaling and views
//! - [`model`]: harmonic regression and break detection
//! - [`cache`]: per-pixel JSON cache
//! - [`settings`]: serde configuration objects
//! - [`errors`]: centralized error handling
//!
//! ## Usage
//! ```rust,no_run
//! use tstools::prelude::*;
//!
//! let driver = NetCdfStackDriver::open("stack.nc", None).unwrap();
//! let mut controller = Controller::new(driver, Settings::default());
//!
//! controller.select_position(PixelPos::new(10, 20)).unwrap();
//! while controller.tick().unwrap().state == RetrievalState::Fetching {}
//!
//! let view = controller.time_series_view().unwrap();
//! println!("{}", view.title);
//! ```

pub mod cache;
pub mod cli;
pub mod controller;
pub mod driver;
pub mod drivers;
pub mod errors;
pub mod geo;
pub mod model;
pub mod pixel;
pub mod retrieval;
pub mod scale;
pub mod series;
pub mod settings;
pub mod symbology;
pub mod views;

pub use errors::{Result, TsToolsError};

pub mod prelude {
    //! Commonly used imports for convenience
    pub use crate::controller::Controller;
    pub use crate::driver::{DriverConfig, TimeSeriesDriver};
    pub use crate::drivers::{MemoryDriver, NetCdfStackDriver};
    pub use crate::errors::{Result, TsToolsError};
    pub use crate::geo::{GeoTransform, PixelPos};
    pub use crate::model::ModelConfig;
    pub use crate::retrieval::{
        CancelHandle, FailurePolicy, RetrievalConfig, RetrievalObserver, RetrievalState,
        Retriever, TickBudget,
    };
    pub use crate::series::{ImageRecord, Series};
    pub use crate::settings::Settings;
}
