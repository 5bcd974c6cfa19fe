//! Shared builders for integration tests

#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use ndarray::Array4;
use std::f64::consts::PI;
use tstools::drivers::MemoryDriver;
use tstools::series::{ImageRecord, MetadataColumn, Series};

pub const ROWS: usize = 4;
pub const COLS: usize = 5;

/// Images every 16 days from 2000-01-01
pub fn series(n_images: usize, bands: &[&str]) -> Series {
    let start = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
    let images = (0..n_images)
        .map(|i| {
            let date = start + Duration::days(16 * i as i64);
            let id = format!("LT5_{}", date.format("%Y%j"));
            ImageRecord::new(format!("{id}.tif"), format!("/data/{id}.tif"), id, date)
        })
        .collect();
    Series::new(images, bands.iter().map(|b| b.to_string()).collect())
}

/// Distinct value for every image, band and pixel
pub fn pixel_value(image: usize, band: usize, row: usize, col: usize) -> f64 {
    (image * 1000 + band * 100 + row * 10 + col) as f64
}

pub fn memory_driver(n_images: usize) -> MemoryDriver {
    let series = series(n_images, &["red", "nir"]);
    let values = Array4::from_shape_fn((n_images, 2, ROWS, COLS), |(i, b, r, c)| {
        pixel_value(i, b, r, c)
    });
    MemoryDriver::new("/data/stack.nc", series, values).expect("Failed to build driver")
}

/// Two-band seasonal signal with a jump of 2000 from `break_at` on
pub fn stepped_driver(n_images: usize, break_at: usize) -> MemoryDriver {
    steps_driver(n_images, &[break_at])
}

/// Two-band seasonal signal rising by 2000 at each index in `steps`
pub fn steps_driver(n_images: usize, steps: &[usize]) -> MemoryDriver {
    let series = series(n_images, &["red", "nir"]);
    let ordinals = series.ordinals();
    let omega = 2.0 * PI / 365.25;
    let values = Array4::from_shape_fn((n_images, 2, ROWS, COLS), |(i, b, _, _)| {
        let jumps = steps.iter().filter(|&&s| i >= s).count();
        let offset = 1000.0 + 2000.0 * jumps as f64;
        offset + 100.0 * b as f64 + 300.0 * (omega * f64::from(ordinals[i])).cos()
    });
    MemoryDriver::new("/data/stepped.nc", series, values).expect("Failed to build driver")
}

pub fn sensor_column(n_images: usize) -> MetadataColumn {
    MetadataColumn {
        name: "sensor".to_string(),
        values: (0..n_images)
            .map(|i| if i % 3 == 0 { "LE7" } else { "LT5" }.to_string())
            .collect(),
        in_table: true,
    }
}
