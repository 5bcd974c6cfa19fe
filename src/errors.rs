//! Centralized error handling for tstools
//!
//! Every fallible operation in the crate returns [`Result`]. None of these
//! errors is fatal to the host process: retrieval, result and cache failures
//! degrade to partial or missing data plus a logged diagnostic.

use std::fmt;

/// Main error type for tstools operations
#[derive(Debug)]
pub enum TsToolsError {
    /// Reading pixel data failed, either for one image or for the whole request
    Retrieval {
        index: Option<usize>,
        message: String,
    },

    /// Map coordinate lies outside the raster extent
    OutOfExtent { x: f64, y: f64 },

    /// A retrieval session is still fetching
    Busy,

    /// Model fit or break detection failed
    ResultComputation(String),

    /// Writing the pixel cache failed
    CacheWrite(String),

    /// Invalid driver options or custom controls
    Configuration(String),

    /// Band index outside `[0, n_bands)`
    BandOutOfRange { band: usize, n_bands: usize },

    /// NetCDF file operation errors
    NetCDFError(netcdf::Error),

    /// I/O operation errors
    IoError(std::io::Error),

    /// JSON (de)serialization errors
    JsonError(serde_json::Error),

    /// Array shape or dimension error
    ArrayError(ndarray::ShapeError),
}

impl TsToolsError {
    /// Retrieval failure tied to one image index
    pub fn image(index: usize, message: impl Into<String>) -> Self {
        TsToolsError::Retrieval {
            index: Some(index),
            message: message.into(),
        }
    }

    /// Retrieval failure not tied to any image
    pub fn retrieval(message: impl Into<String>) -> Self {
        TsToolsError::Retrieval {
            index: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for TsToolsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TsToolsError::Retrieval {
                index: Some(index),
                message,
            } => write!(f, "Retrieval error for image {}: {}", index, message),
            TsToolsError::Retrieval {
                index: None,
                message,
            } => write!(f, "Retrieval error: {}", message),
            TsToolsError::OutOfExtent { x, y } => {
                write!(f, "Coordinate ({}, {}) is outside the raster extent", x, y)
            }
            TsToolsError::Busy => write!(f, "Currently fetching data, cancel or wait for completion"),
            TsToolsError::ResultComputation(msg) => write!(f, "Result computation error: {}", msg),
            TsToolsError::CacheWrite(msg) => write!(f, "Cache write error: {}", msg),
            TsToolsError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            TsToolsError::BandOutOfRange { band, n_bands } => {
                write!(f, "Band {} out of range (dataset has {} bands)", band, n_bands)
            }
            TsToolsError::NetCDFError(e) => write!(f, "NetCDF error: {}", e),
            TsToolsError::IoError(e) => write!(f, "I/O error: {}", e),
            TsToolsError::JsonError(e) => write!(f, "JSON error: {}", e),
            TsToolsError::ArrayError(e) => write!(f, "Array error: {}", e),
        }
    }
}

impl std::error::Error for TsToolsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TsToolsError::NetCDFError(e) => Some(e),
            TsToolsError::IoError(e) => Some(e),
            TsToolsError::JsonError(e) => Some(e),
            TsToolsError::ArrayError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<netcdf::Error> for TsToolsError {
    fn from(error: netcdf::Error) -> Self {
        TsToolsError::NetCDFError(error)
    }
}

impl From<std::io::Error> for TsToolsError {
    fn from(error: std::io::Error) -> Self {
        TsToolsError::IoError(error)
    }
}

impl From<serde_json::Error> for TsToolsError {
    fn from(error: serde_json::Error) -> Self {
        TsToolsError::JsonError(error)
    }
}

impl From<ndarray::ShapeError> for TsToolsError {
    fn from(error: ndarray::ShapeError) -> Self {
        TsToolsError::ArrayError(error)
    }
}

/// Result type alias for tstools operations
pub type Result<T> = std::result::Result<T, TsToolsError>;
