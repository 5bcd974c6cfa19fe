//! Entry point for the tstools application.
//! Opens an image stack, retrieves one pixel and prints its time series.

use clap::Parser;
use serde_json::Value as JsonValue;
use std::fs;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tstools::cli::Args;
use tstools::controller::Controller;
use tstools::driver::{DriverConfig, TimeSeriesDriver};
use tstools::drivers::NetCdfStackDriver;
use tstools::geo::PixelPos;
use tstools::retrieval::{
    FailurePolicy, Progress, RetrievalObserver, RetrievalSession, RetrievalState, TickBudget,
};
use tstools::settings::Settings;
use tstools::views::{DoyView, TimeSeriesView};

struct StderrProgress;

impl RetrievalObserver for StderrProgress {
    fn on_progress(&mut self, progress: Progress) {
        eprint!(
            "\rRetrieving {}/{} images ({:.0}%)",
            progress.index,
            progress.total,
            progress.fraction * 100.0
        );
    }

    fn on_complete(&mut self, session: &RetrievalSession) {
        eprintln!();
        if !session.skipped.is_empty() {
            eprintln!("Skipped unreadable images: {:?}", session.skipped);
        }
    }

    fn on_cancelled(&mut self, session: &RetrievalSession) {
        eprintln!();
        eprintln!(
            "Retrieval cancelled after {} of {} images",
            session.target_index, session.total
        );
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(ms) = args.tick_ms {
        settings.retrieval.tick_budget = TickBudget::Millis(ms);
    }
    if args.fail_fast {
        settings.retrieval.failure_policy = FailurePolicy::FailFast;
    }
    if let Some(band) = args.band {
        settings.plot.band = band;
    }
    if args.no_mask {
        settings.plot.mask = false;
    }

    let mut driver_config: DriverConfig = match &args.driver_config {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => DriverConfig::new(),
    };
    if args.fit {
        driver_config.insert("fit".to_string(), JsonValue::Bool(true));
    }
    if let Some(dir) = &args.cache_dir {
        driver_config.insert(
            "cache_dir".to_string(),
            JsonValue::String(dir.display().to_string()),
        );
    }

    let driver = NetCdfStackDriver::open(&args.file, Some(&driver_config))?;
    let mut controller = Controller::new(driver, settings);

    if args.list_images {
        print_image_table(&controller);
        return Ok(());
    }

    let state = match (args.pixel, args.coord) {
        (Some((col, row)), _) => controller.select_position(PixelPos::new(col, row))?,
        (None, Some((x, y))) => controller.select_pixel(x, y, None)?,
        (None, None) => return Err("either --pixel or --coord is required".into()),
    };
    let state = match state {
        RetrievalState::Fetching => controller.run(&mut StderrProgress).await?,
        other => other,
    };
    if state != RetrievalState::Complete {
        return Err(format!("retrieval ended in state {:?}", state).into());
    }
    info!("Retrieval complete");

    let view = controller.time_series_view()?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print_time_series(&view);
    }

    if args.doy {
        let doy = controller.doy_view()?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&doy)?);
        } else {
            print_doy(&doy);
        }
    }

    Ok(())
}

fn print_image_table<D: TimeSeriesDriver>(controller: &Controller<D>) {
    let columns = controller.image_table_columns();
    println!("index\tid\tdate\tdoy\t{}", columns.join("\t"));
    for row in controller.image_table() {
        println!(
            "{}\t{}\t{}\t{}\t{}",
            row.index,
            row.id,
            row.date,
            row.doy,
            row.metadata.join("\t")
        );
    }
}

fn print_time_series(view: &TimeSeriesView) {
    println!("{}", view.title);
    println!("{}\t{}", view.x_label, view.y_label);
    for points in &view.points {
        for (date, value) in points.x.iter().zip(&points.y) {
            match value {
                Some(v) => println!("{}\t{}", date, v),
                None => println!("{}\t-", date),
            }
        }
    }
    println!(
        "y limits: {:.1} to {:.1}",
        view.y_limits.0, view.y_limits.1
    );

    for (i, segment) in view.fit.iter().enumerate() {
        if let (Some(start), Some(end)) = (segment.x.first(), segment.x.last()) {
            println!(
                "segment {}: {} to {} ({} days)",
                i + 1,
                format_ordinal(*start),
                format_ordinal(*end),
                segment.x.len()
            );
        }
    }
    for marker in &view.breaks {
        if let (Some(day), Some(value)) = (marker.x.first(), marker.y.first()) {
            println!("break: {} at {}", format_ordinal(*day), value);
        }
    }
}

fn print_doy(view: &DoyView) {
    println!("{}", view.title);
    println!("doy\tyear\t{}", view.y_label);
    for point in &view.points {
        println!("{}\t{}\t{}", point.doy, point.year, point.value);
    }
}

fn format_ordinal(ordinal: i32) -> String {
    tstools::series::date_from_ordinal(ordinal)
        .map(|d| d.to_string())
        .unwrap_or_else(|| ordinal.to_string())
}
