mod common;

use chrono::{Duration, NaiveDate};
use common::{memory_driver, pixel_value, stepped_driver, steps_driver, COLS, ROWS};
use ndarray::Array4;
use tempfile::tempdir;
use tstools::cache::PixelCache;
use tstools::driver::TimeSeriesDriver;
use tstools::drivers::MemoryDriver;
use tstools::errors::TsToolsError;
use tstools::geo::PixelPos;
use tstools::model::ModelConfig;
use tstools::retrieval::{
    CancelHandle, FailurePolicy, Progress, RetrievalConfig, RetrievalObserver, RetrievalSession,
    RetrievalState, Retriever, TickBudget,
};
use tstools::series::{ImageRecord, Series};

fn retriever(images_per_tick: usize) -> Retriever {
    Retriever::new(RetrievalConfig {
        tick_budget: TickBudget::Images(images_per_tick),
        ..RetrievalConfig::default()
    })
}

fn fractions(progress: &[Progress]) -> Vec<f64> {
    progress.iter().map(|p| p.fraction).collect()
}

#[test]
fn five_images_over_two_ticks() {
    let mut driver = memory_driver(5);
    let mut retriever = retriever(3);

    let state = retriever
        .select_position(&mut driver, PixelPos::new(1, 2))
        .expect("Failed to select pixel");
    assert_eq!(state, RetrievalState::Fetching);

    let first = retriever.tick(&mut driver).unwrap();
    assert_eq!(first.state, RetrievalState::Fetching);
    assert_eq!(first.progress.map(|p| p.fraction), Some(0.6));

    let second = retriever.tick(&mut driver).unwrap();
    assert_eq!(second.state, RetrievalState::Complete);
    assert_eq!(second.progress.map(|p| p.fraction), Some(1.0));

    let session = retriever.session().unwrap();
    assert_eq!(session.ticks, 2);
    assert_eq!(session.target_index, 5);
    assert_eq!(driver.get_data(0, true).unwrap().len(), 5);
    assert_eq!(driver.reads(), 5);
}

#[test]
fn complete_session_fills_every_band() {
    let mut driver = memory_driver(12);
    let mut retriever = retriever(5);
    retriever
        .select_position(&mut driver, PixelPos::new(4, 3))
        .unwrap();
    retriever.run_blocking(&mut driver).unwrap();

    for band in 0..driver.band_names().len() {
        let data = driver.get_data(band, true).unwrap();
        assert_eq!(data.len(), driver.len());
        for (image, value) in data.iter().enumerate() {
            assert_eq!(*value, Some(pixel_value(image, band, 3, 4)));
        }
    }
}

#[test]
fn progress_is_non_decreasing_and_ends_at_one() {
    let mut driver = memory_driver(9);
    let mut retriever = retriever(2);
    retriever
        .select_position(&mut driver, PixelPos::new(0, 0))
        .unwrap();
    let progress = fractions(&retriever.run_blocking(&mut driver).unwrap());

    assert_eq!(progress.len(), 5);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last().copied(), Some(1.0));
    assert_eq!(retriever.state(), RetrievalState::Complete);
}

#[test]
fn cancel_keeps_fetched_images() {
    let mut driver = memory_driver(10);
    let mut retriever = retriever(3);
    retriever
        .select_position(&mut driver, PixelPos::new(2, 1))
        .unwrap();
    retriever.tick(&mut driver).unwrap();
    retriever.cancel();

    let outcome = retriever.tick(&mut driver).unwrap();
    assert_eq!(outcome.state, RetrievalState::Cancelled);
    assert_eq!(outcome.progress, None);
    assert_eq!(retriever.session().unwrap().progress().fraction, 0.3);

    let data = driver.get_data(0, true).expect("Partial data must stay readable");
    assert_eq!(data.len(), 10);
    assert!(data[..3].iter().all(Option::is_some));
    assert!(data[3..].iter().all(Option::is_none));
    assert_eq!(driver.pixel().populated(), 3);

    // A cancelled session stays cancelled
    assert_eq!(
        retriever.tick(&mut driver).unwrap().state,
        RetrievalState::Cancelled
    );
}

#[test]
fn selection_while_fetching_is_rejected() {
    let mut driver = memory_driver(10);
    let mut retriever = retriever(2);
    retriever
        .select_position(&mut driver, PixelPos::new(0, 0))
        .unwrap();
    retriever.tick(&mut driver).unwrap();

    assert!(matches!(
        retriever.select_position(&mut driver, PixelPos::new(1, 1)),
        Err(TsToolsError::Busy)
    ));
    assert_eq!(driver.pixel_pos(), Some(PixelPos::new(0, 0)));

    retriever.cancel();
    assert_eq!(
        retriever
            .select_position(&mut driver, PixelPos::new(1, 1))
            .unwrap(),
        RetrievalState::Fetching
    );
    assert_eq!(driver.pixel_pos(), Some(PixelPos::new(1, 1)));
}

#[test]
fn stale_cancel_handle_does_not_touch_new_session() {
    let mut driver = memory_driver(6);
    let mut retriever = retriever(2);
    retriever
        .select_position(&mut driver, PixelPos::new(0, 0))
        .unwrap();
    let old_handle = retriever.cancel_handle();
    retriever.run_blocking(&mut driver).unwrap();

    retriever
        .select_position(&mut driver, PixelPos::new(1, 0))
        .unwrap();
    old_handle.cancel();
    assert!(retriever.is_running());
    retriever.run_blocking(&mut driver).unwrap();
    assert_eq!(retriever.state(), RetrievalState::Complete);
}

#[test]
fn revisiting_a_pixel_refetches_the_same_samples() {
    let mut driver = memory_driver(7);
    let mut retriever = retriever(3);
    let a = PixelPos::new(1, 1);
    let b = PixelPos::new(3, 2);

    retriever.select_position(&mut driver, a).unwrap();
    retriever.run_blocking(&mut driver).unwrap();
    let first_visit = driver.pixel().samples().clone();

    retriever.select_position(&mut driver, b).unwrap();
    retriever.run_blocking(&mut driver).unwrap();
    assert_ne!(driver.pixel().samples(), &first_visit);

    retriever.select_position(&mut driver, a).unwrap();
    retriever.run_blocking(&mut driver).unwrap();
    assert_eq!(driver.pixel().samples(), &first_visit);
    assert_eq!(driver.reads(), 21);
}

#[test]
fn cache_hit_completes_without_ticks() {
    let dir = tempdir().expect("Failed to create temp dir");
    let cache = PixelCache::new(dir.path(), "stack");
    let mut driver = memory_driver(5).with_cache(cache.clone());
    let mut retriever = retriever(3);
    let pos = PixelPos::new(2, 2);

    retriever.select_position(&mut driver, pos).unwrap();
    retriever.run_blocking(&mut driver).unwrap();
    let session = retriever.session().unwrap();
    assert!(session.cache_written);
    assert!(!session.cache_hit);
    assert!(cache.path_for(pos).exists());
    let fetched = driver.pixel().samples().clone();
    let reads = driver.reads();

    let state = retriever.select_position(&mut driver, pos).unwrap();
    assert_eq!(state, RetrievalState::Complete);
    let session = retriever.session().unwrap();
    assert!(session.cache_hit);
    assert!(!session.cache_written);
    assert_eq!(session.ticks, 0);
    assert_eq!(driver.reads(), reads);
    assert_eq!(driver.pixel().samples(), &fetched);

    // Nothing left to do, and no progress to report
    let progress = retriever.run_blocking(&mut driver).unwrap();
    assert!(progress.is_empty());
}

#[test]
fn cache_can_be_disabled() {
    let dir = tempdir().expect("Failed to create temp dir");
    let mut driver = memory_driver(4).with_cache(PixelCache::new(dir.path(), "stack"));
    let mut retriever = Retriever::new(RetrievalConfig {
        tick_budget: TickBudget::Images(4),
        read_cache: false,
        write_cache: false,
        ..RetrievalConfig::default()
    });
    let pos = PixelPos::new(0, 1);
    retriever.select_position(&mut driver, pos).unwrap();
    retriever.run_blocking(&mut driver).unwrap();
    assert!(!retriever.session().unwrap().cache_written);
    assert!(!PixelCache::new(dir.path(), "stack").path_for(pos).exists());
}

#[test]
fn unreadable_image_is_skipped_by_default() {
    let mut driver = memory_driver(6).with_unreadable([2]);
    let mut retriever = retriever(4);
    retriever
        .select_position(&mut driver, PixelPos::new(0, 0))
        .unwrap();
    let progress = retriever.run_blocking(&mut driver).unwrap();

    assert_eq!(progress.last().map(|p| p.fraction), Some(1.0));
    assert_eq!(retriever.state(), RetrievalState::Complete);
    assert_eq!(retriever.session().unwrap().skipped, vec![2]);
    let data = driver.get_data(1, false).unwrap();
    assert_eq!(data[2], None);
    assert_eq!(data[3], Some(pixel_value(3, 1, 0, 0)));
}

#[test]
fn fail_fast_stops_at_unreadable_image() {
    let mut driver = memory_driver(6).with_unreadable([2]);
    let mut retriever = Retriever::new(RetrievalConfig {
        tick_budget: TickBudget::Images(4),
        failure_policy: FailurePolicy::FailFast,
        ..RetrievalConfig::default()
    });
    retriever
        .select_position(&mut driver, PixelPos::new(0, 0))
        .unwrap();

    let err = retriever.tick(&mut driver).unwrap_err();
    assert!(matches!(
        err,
        TsToolsError::Retrieval {
            index: Some(2),
            ..
        }
    ));
    assert_eq!(retriever.state(), RetrievalState::Cancelled);
    assert!(!retriever.is_running());
    assert_eq!(driver.pixel().populated(), 2);
}

#[test]
fn selection_outside_raster_is_refused() {
    let mut driver = memory_driver(3);
    let mut retriever = retriever(3);
    assert!(matches!(
        retriever.select_position(&mut driver, PixelPos::new(COLS, 0)),
        Err(TsToolsError::OutOfExtent { .. })
    ));
    assert!(matches!(
        retriever.select_pixel(&mut driver, -0.5, 1.0, None),
        Err(TsToolsError::OutOfExtent { .. })
    ));
    assert_eq!(retriever.state(), RetrievalState::Idle);
}

#[test]
fn map_coordinates_select_the_containing_pixel() {
    let mut driver = memory_driver(3).with_crs("EPSG:32619");
    let mut retriever = retriever(3);
    retriever
        .select_pixel(&mut driver, 2.5, 1.25, Some("EPSG:32619"))
        .unwrap();
    assert_eq!(driver.pixel_pos(), Some(PixelPos::new(2, 1)));

    retriever.run_blocking(&mut driver).unwrap();
    assert!(matches!(
        retriever.select_pixel(&mut driver, 2.5, 1.25, Some("EPSG:4326")),
        Err(TsToolsError::Retrieval { index: None, .. })
    ));
}

#[test]
fn fetch_data_reports_fraction_per_image() {
    let mut driver = memory_driver(4);
    let progress: Vec<f64> = driver
        .fetch_data(3.5, 0.5, None)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(progress, vec![0.25, 0.5, 0.75, 1.0]);
    assert_eq!(driver.pixel_pos(), Some(PixelPos::new(3, 0)));
    assert_eq!(
        driver.get_data(0, false).unwrap()[3],
        Some(pixel_value(3, 0, 0, 3))
    );
}

#[test]
fn masking_hides_sentinel_values() {
    let sentinel = pixel_value(1, 0, 0, 0) as i64;
    let mut driver = memory_driver(3).with_mask_values(vec![sentinel]);
    let mut retriever = retriever(3);
    retriever
        .select_position(&mut driver, PixelPos::new(0, 0))
        .unwrap();
    retriever.run_blocking(&mut driver).unwrap();

    assert_eq!(driver.get_data(0, true).unwrap()[1], None);
    assert_eq!(driver.get_data(0, false).unwrap()[1], Some(sentinel as f64));
    assert!(matches!(
        driver.get_data(5, true),
        Err(TsToolsError::BandOutOfRange { band: 5, .. })
    ));
}

#[test]
fn results_are_empty_without_a_model() {
    let mut driver = memory_driver(5);
    let mut retriever = retriever(5);
    retriever
        .select_position(&mut driver, PixelPos::new(0, 0))
        .unwrap();
    retriever.run_blocking(&mut driver).unwrap();

    assert!(!driver.has_results());
    assert!(driver.get_prediction(0).is_empty());
    assert!(driver.get_breaks(0).is_empty());
}

#[test]
fn failed_fit_still_completes() {
    // Too few images for the default model
    let mut driver = memory_driver(5).with_results(ModelConfig::default());
    let mut retriever = retriever(5);
    retriever
        .select_position(&mut driver, PixelPos::new(0, 0))
        .unwrap();
    retriever.run_blocking(&mut driver).unwrap();

    assert_eq!(retriever.state(), RetrievalState::Complete);
    assert!(driver.pixel().results().is_empty());
    assert!(driver.get_prediction(0).is_empty());
    assert!(driver.get_breaks(0).is_empty());
}

#[test]
fn single_segment_has_no_breaks() {
    let mut driver = stepped_driver(30, 30).with_results(ModelConfig::default());
    let mut retriever = retriever(10);
    retriever
        .select_position(&mut driver, PixelPos::new(1, 1))
        .unwrap();
    retriever.run_blocking(&mut driver).unwrap();

    assert_eq!(driver.pixel().results().len(), 1);
    assert_eq!(driver.get_prediction(0).len(), 1);
    assert!(driver.get_breaks(0).is_empty());
}

#[test]
fn step_change_yields_one_break() {
    let mut driver = stepped_driver(60, 30).with_results(ModelConfig::default());
    let mut retriever = retriever(16);
    retriever
        .select_position(&mut driver, PixelPos::new(2, 3))
        .unwrap();
    retriever.run_blocking(&mut driver).unwrap();

    let ordinals = driver.series().ordinals();
    assert_eq!(driver.pixel().results().len(), 2);

    let fit = driver.get_prediction(1);
    assert_eq!(fit.len(), 2);
    assert_eq!(fit[0].x.first().copied(), Some(ordinals[0]));
    assert_eq!(fit[0].x.last().copied(), Some(ordinals[29]));
    assert_eq!(fit[1].x.first().copied(), Some(ordinals[30]));

    let breaks = driver.get_breaks(1);
    assert_eq!(breaks.len(), 1);
    assert_eq!(breaks[0].x, vec![ordinals[30]]);
    let observed = driver.get_data(1, true).unwrap()[30].unwrap();
    assert_eq!(breaks[0].y, vec![observed]);
}

fn fitted(mut driver: MemoryDriver) -> MemoryDriver {
    let mut retriever = retriever(20);
    retriever
        .select_position(&mut driver, PixelPos::new(0, 1))
        .unwrap();
    retriever.run_blocking(&mut driver).unwrap();
    assert_eq!(retriever.state(), RetrievalState::Complete);
    driver
}

#[test]
fn two_step_changes_yield_two_breaks() {
    let driver = fitted(steps_driver(80, &[25, 50]).with_results(ModelConfig::default()));
    let ordinals = driver.series().ordinals();

    assert_eq!(driver.pixel().results().len(), 3);
    let breaks = driver.get_breaks(0);
    assert_eq!(breaks.len(), 2);
    assert_eq!(breaks[0].x, vec![ordinals[25]]);
    assert_eq!(breaks[1].x, vec![ordinals[50]]);
    let fit = driver.get_prediction(0);
    assert_eq!(fit[2].x.last().copied(), Some(ordinals[79]));
}

#[test]
fn late_step_change_is_not_reported_as_a_break() {
    // Seven images after the jump cannot open a segment
    let driver = fitted(stepped_driver(40, 33).with_results(ModelConfig::default()));
    let ordinals = driver.series().ordinals();
    assert_eq!(driver.pixel().results().len(), 1);
    assert!(driver.get_breaks(0).is_empty());
    let fit = driver.get_prediction(0);
    assert_eq!(fit[0].x.last().copied(), Some(ordinals[39]));

    // The earlier break stays, the last segment runs to the end
    let driver = fitted(steps_driver(60, &[20, 52]).with_results(ModelConfig::default()));
    let ordinals = driver.series().ordinals();
    assert_eq!(driver.pixel().results().len(), 2);
    let breaks = driver.get_breaks(1);
    assert_eq!(breaks.len(), 1);
    assert_eq!(breaks[0].x, vec![ordinals[20]]);
    let fit = driver.get_prediction(1);
    assert_eq!(fit[1].x.last().copied(), Some(ordinals[59]));
}

#[test]
fn memory_driver_sorts_images_by_date() {
    let start = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
    let images = [32, 0, 16]
        .into_iter()
        .map(|days| {
            let date = start + Duration::days(days);
            let id = format!("LT5_{}", date.format("%Y%j"));
            ImageRecord::new(format!("{id}.tif"), format!("/data/{id}.tif"), id, date)
        })
        .collect();
    let series = Series::new(images, vec!["red".to_string()]);
    let values = Array4::from_shape_fn((3, 1, ROWS, COLS), |(i, b, r, c)| pixel_value(i, b, r, c));
    let mut driver = MemoryDriver::new("/data/unsorted.nc", series, values).unwrap();

    let ordinals = driver.series().ordinals();
    assert!(ordinals.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(driver.series().images[0].date, start);

    let mut retriever = retriever(3);
    retriever
        .select_position(&mut driver, PixelPos::new(2, 1))
        .unwrap();
    retriever.run_blocking(&mut driver).unwrap();
    assert_eq!(
        driver.get_data(0, false).unwrap(),
        vec![
            Some(pixel_value(1, 0, 1, 2)),
            Some(pixel_value(2, 0, 1, 2)),
            Some(pixel_value(0, 0, 1, 2)),
        ]
    );
}

#[derive(Default)]
struct Recorder {
    progress: Vec<f64>,
    completed: Option<RetrievalSession>,
    cancelled: Option<RetrievalSession>,
    cancel_after_first: Option<CancelHandle>,
}

impl RetrievalObserver for Recorder {
    fn on_progress(&mut self, progress: Progress) {
        self.progress.push(progress.fraction);
        if let Some(handle) = self.cancel_after_first.take() {
            handle.cancel();
        }
    }

    fn on_complete(&mut self, session: &RetrievalSession) {
        self.completed = Some(session.clone());
    }

    fn on_cancelled(&mut self, session: &RetrievalSession) {
        self.cancelled = Some(session.clone());
    }
}

#[tokio::test]
async fn async_run_reports_progress_and_completion() {
    let mut driver = memory_driver(5);
    let mut retriever = retriever(3);
    retriever
        .select_position(&mut driver, PixelPos::new(0, 0))
        .unwrap();

    let mut recorder = Recorder::default();
    let state = retriever.run(&mut driver, &mut recorder).await.unwrap();

    assert_eq!(state, RetrievalState::Complete);
    assert_eq!(recorder.progress, vec![0.6, 1.0]);
    assert_eq!(recorder.completed.map(|s| s.ticks), Some(2));
    assert!(recorder.cancelled.is_none());
}

#[tokio::test]
async fn cancel_handle_stops_async_run() {
    let mut driver = memory_driver(10);
    let mut retriever = retriever(3);
    retriever
        .select_position(&mut driver, PixelPos::new(0, 0))
        .unwrap();

    let mut recorder = Recorder {
        cancel_after_first: Some(retriever.cancel_handle()),
        ..Recorder::default()
    };
    let state = retriever.run(&mut driver, &mut recorder).await.unwrap();

    assert_eq!(state, RetrievalState::Cancelled);
    assert_eq!(recorder.progress, vec![0.3]);
    assert_eq!(recorder.cancelled.map(|s| s.target_index), Some(3));
    assert!(recorder.completed.is_none());
}

#[test]
fn cache_hit_notifies_completion_only() {
    let dir = tempdir().expect("Failed to create temp dir");
    let mut driver = memory_driver(5).with_cache(PixelCache::new(dir.path(), "stack"));
    let mut retriever = retriever(2);
    let pos = PixelPos::new(1, 0);
    retriever.select_position(&mut driver, pos).unwrap();
    retriever.run_blocking(&mut driver).unwrap();

    retriever.select_position(&mut driver, pos).unwrap();
    let mut recorder = Recorder::default();
    let state = tokio_test::block_on(retriever.run(&mut driver, &mut recorder)).unwrap();

    assert_eq!(state, RetrievalState::Complete);
    assert!(recorder.progress.is_empty());
    assert_eq!(recorder.completed.map(|s| s.cache_hit), Some(true));
}
