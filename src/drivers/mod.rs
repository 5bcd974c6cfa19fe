//! Bundled time series drivers

pub mod memory;
pub mod netcdf_stack;

pub use memory::MemoryDriver;
pub use netcdf_stack::NetCdfStackDriver;
