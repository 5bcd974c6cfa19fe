//! Incremental, cancellable pixel retrieval
//!
//! A [`Retriever`] runs one [`RetrievalSession`] per pixel selection through
//! `Idle → Fetching → (Complete | Cancelled)`. Work happens in ticks: each
//! tick reads images in ascending index order until its budget is spent, then
//! hands control back so the host can redraw and process a cancel request.
//! Cancellation is checked once per tick and never interrupts an image read.
//! Images fetched before a cancel stay in the driver's pixel state.

use crate::driver::TimeSeriesDriver;
use crate::errors::{Result, TsToolsError};
use crate::geo::PixelPos;
use futures::{pin_mut, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Default wall-clock slice per tick
pub const DEFAULT_TICK_MILLIS: u64 = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetrievalState {
    Idle,
    Fetching,
    Complete,
    Cancelled,
}

/// What to do when one image cannot be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log, leave the image empty and continue with the next index
    #[default]
    SkipAndContinue,
    /// Stop the session and surface the error
    FailFast,
}

/// How much work one tick may do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickBudget {
    /// Wall-clock milliseconds
    Millis(u64),
    /// Fixed number of images
    Images(usize),
}

impl Default for TickBudget {
    fn default() -> Self {
        TickBudget::Millis(DEFAULT_TICK_MILLIS)
    }
}

impl TickBudget {
    /// At least one image is read per tick so every tick makes progress
    fn exhausted(&self, started: Instant, fetched: usize) -> bool {
        if fetched == 0 {
            return false;
        }
        match *self {
            TickBudget::Millis(ms) => started.elapsed() >= Duration::from_millis(ms),
            TickBudget::Images(n) => fetched >= n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub tick_budget: TickBudget,
    pub failure_policy: FailurePolicy,
    pub read_cache: bool,
    pub write_cache: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            tick_budget: TickBudget::default(),
            failure_policy: FailurePolicy::default(),
            read_cache: true,
            write_cache: true,
        }
    }
}

/// Progress after a tick: `index` images of `total` done
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub index: usize,
    pub total: usize,
    pub fraction: f64,
}

impl Progress {
    fn new(index: usize, total: usize) -> Self {
        let fraction = if total == 0 { 1.0 } else { index as f64 / total as f64 };
        Self {
            index,
            total,
            fraction,
        }
    }
}

/// State of one pixel request
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalSession {
    pub pixel: PixelPos,
    /// Next image index to fetch
    pub target_index: usize,
    pub total: usize,
    /// Satisfied from cache without reading images
    pub cache_hit: bool,
    pub cache_written: bool,
    /// Indices whose read failed under skip-and-continue
    pub skipped: Vec<usize>,
    pub ticks: usize,
    state: RetrievalState,
}

impl RetrievalSession {
    fn new(pixel: PixelPos, total: usize) -> Self {
        Self {
            pixel,
            target_index: 0,
            total,
            cache_hit: false,
            cache_written: false,
            skipped: Vec::new(),
            ticks: 0,
            state: RetrievalState::Fetching,
        }
    }

    pub fn state(&self) -> RetrievalState {
        self.state
    }

    pub fn progress(&self) -> Progress {
        Progress::new(self.target_index, self.total)
    }
}

/// Clears the running flag of the session it was taken from
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickOutcome {
    pub state: RetrievalState,
    /// Set when the tick fetched images
    pub progress: Option<Progress>,
}

/// Notifications for the host interface
pub trait RetrievalObserver {
    fn on_progress(&mut self, _progress: Progress) {}
    fn on_complete(&mut self, _session: &RetrievalSession) {}
    fn on_cancelled(&mut self, _session: &RetrievalSession) {}
}

impl RetrievalObserver for () {}

/// Events produced by [`Retriever::progress_stream`]
#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalEvent {
    Progress(Progress),
    Complete(RetrievalSession),
    Cancelled(RetrievalSession),
}

pub struct Retriever {
    config: RetrievalConfig,
    running: Arc<AtomicBool>,
    session: Option<RetrievalSession>,
}

impl Default for Retriever {
    fn default() -> Self {
        Self::new(RetrievalConfig::default())
    }
}

impl Retriever {
    pub fn new(config: RetrievalConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            session: None,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: RetrievalConfig) {
        self.config = config;
    }

    pub fn state(&self) -> RetrievalState {
        self.session
            .as_ref()
            .map_or(RetrievalState::Idle, RetrievalSession::state)
    }

    pub fn session(&self) -> Option<&RetrievalSession> {
        self.session.as_ref()
    }

    /// True while a session is fetching and has not been cancelled
    pub fn is_running(&self) -> bool {
        self.state() == RetrievalState::Fetching && self.running.load(Ordering::SeqCst)
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.running))
    }

    pub fn cancel(&self) {
        if self.state() == RetrievalState::Fetching {
            warn!("Canceling retrieval");
        }
        self.running.store(false, Ordering::SeqCst);
    }

    /// Drop the finished session and return to idle
    pub fn reset(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(TsToolsError::Busy);
        }
        self.session = None;
        Ok(())
    }

    /// Fails with [`TsToolsError::Busy`] while a session is still fetching
    pub fn ensure_idle(&self) -> Result<()> {
        if self.is_running() {
            warn!("Currently fetching data, rejecting new pixel selection");
            return Err(TsToolsError::Busy);
        }
        Ok(())
    }

    /// Start a session for the pixel under a map coordinate
    pub fn select_pixel<D: TimeSeriesDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        x: f64,
        y: f64,
        crs_wkt: Option<&str>,
    ) -> Result<RetrievalState> {
        self.ensure_idle()?;
        let pos = driver.locate(x, y, crs_wkt)?;
        self.select_position(driver, pos)
    }

    /// Start a session for a known pixel. A usable cache completes it at once.
    pub fn select_position<D: TimeSeriesDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        pos: PixelPos,
    ) -> Result<RetrievalState> {
        self.ensure_idle()?;
        if !driver.extent().contains(pos) {
            return Err(TsToolsError::OutOfExtent {
                x: pos.col as f64,
                y: pos.row as f64,
            });
        }
        info!("Fetching data for pixel {}", pos);

        driver.set_pixel(pos);
        let mut session = RetrievalSession::new(pos, driver.len());
        // A fresh flag per session so stale handles cannot cancel it
        self.running = Arc::new(AtomicBool::new(true));

        if self.config.read_cache {
            match driver.read_cache() {
                Ok(hit) => session.cache_hit = hit,
                Err(e) => warn!("Could not read cache for pixel {}: {}", pos, e),
            }
        }

        if session.cache_hit {
            debug!("Read pixel {} from cache", pos);
            self.running.store(false, Ordering::SeqCst);
            self.finalize(driver, &mut session);
            self.session = Some(session);
            return Ok(RetrievalState::Complete);
        }

        self.session = Some(session);
        Ok(RetrievalState::Fetching)
    }

    /// Run one budgeted slice of the current session
    pub fn tick<D: TimeSeriesDriver + ?Sized>(&mut self, driver: &mut D) -> Result<TickOutcome> {
        let Some(mut session) = self.session.take() else {
            return Ok(TickOutcome {
                state: RetrievalState::Idle,
                progress: None,
            });
        };
        let outcome = self.advance(driver, &mut session);
        self.session = Some(session);
        outcome
    }

    fn advance<D: TimeSeriesDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        session: &mut RetrievalSession,
    ) -> Result<TickOutcome> {
        if session.state != RetrievalState::Fetching {
            return Ok(TickOutcome {
                state: session.state,
                progress: None,
            });
        }
        if !self.running.load(Ordering::SeqCst) {
            info!(
                "Retrieval for pixel {} cancelled at image {} of {}",
                session.pixel, session.target_index, session.total
            );
            session.state = RetrievalState::Cancelled;
            return Ok(TickOutcome {
                state: session.state,
                progress: None,
            });
        }

        session.ticks += 1;
        let started = Instant::now();
        let mut fetched = 0;
        while session.target_index < session.total
            && !self.config.tick_budget.exhausted(started, fetched)
        {
            let index = session.target_index;
            if let Err(e) = driver.retrieve_pixel(index) {
                match self.config.failure_policy {
                    FailurePolicy::SkipAndContinue => {
                        warn!("Skipping image {}: {}", index, e);
                        session.skipped.push(index);
                    }
                    FailurePolicy::FailFast => {
                        error!("Stopping retrieval at image {}: {}", index, e);
                        self.running.store(false, Ordering::SeqCst);
                        session.state = RetrievalState::Cancelled;
                        return Err(e);
                    }
                }
            }
            session.target_index += 1;
            fetched += 1;
        }

        let progress = session.progress();
        if session.target_index >= session.total {
            self.running.store(false, Ordering::SeqCst);
            self.finalize(driver, session);
            info!("Completed data retrieval for pixel {}", session.pixel);
        }
        Ok(TickOutcome {
            state: session.state,
            progress: Some(progress),
        })
    }

    /// Cache and fit a fully fetched pixel. Failures here are logged only.
    fn finalize<D: TimeSeriesDriver + ?Sized>(&self, driver: &mut D, session: &mut RetrievalSession) {
        // Masking is applied on read by `get_data`, so the samples stay raw here
        if self.config.write_cache && !session.cache_hit {
            match driver.write_cache() {
                Ok(written) => {
                    session.cache_written = written;
                    if written {
                        debug!("Wrote pixel {} to cache", session.pixel);
                    }
                }
                Err(e) => error!("Could not write to cache file: {}", e),
            }
        }

        if driver.has_results() {
            if let Err(e) = driver.fetch_results() {
                warn!("No model results for pixel {}: {}", session.pixel, e);
                driver.pixel_mut().clear_results();
            }
        }
        session.state = RetrievalState::Complete;
    }

    /// Tick until the session completes or is cancelled, collecting progress
    pub fn run_blocking<D: TimeSeriesDriver + ?Sized>(&mut self, driver: &mut D) -> Result<Vec<Progress>> {
        let mut reported = Vec::new();
        loop {
            let outcome = self.tick(driver)?;
            reported.extend(outcome.progress);
            if outcome.state != RetrievalState::Fetching {
                return Ok(reported);
            }
        }
    }

    /// Session events, yielding to the async scheduler between ticks
    pub fn progress_stream<'a, D: TimeSeriesDriver + ?Sized>(
        &'a mut self,
        driver: &'a mut D,
    ) -> impl Stream<Item = Result<RetrievalEvent>> + 'a {
        async_stream::stream! {
            loop {
                let outcome = match self.tick(driver) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                };
                if let Some(progress) = outcome.progress {
                    yield Ok(RetrievalEvent::Progress(progress));
                }
                match outcome.state {
                    RetrievalState::Fetching => tokio::task::yield_now().await,
                    RetrievalState::Complete => {
                        if let Some(session) = self.session.clone() {
                            yield Ok(RetrievalEvent::Complete(session));
                        }
                        break;
                    }
                    RetrievalState::Cancelled => {
                        if let Some(session) = self.session.clone() {
                            yield Ok(RetrievalEvent::Cancelled(session));
                        }
                        break;
                    }
                    RetrievalState::Idle => break,
                }
            }
        }
    }

    /// Drive the current session to its end, forwarding events to `observer`
    pub async fn run<D, O>(&mut self, driver: &mut D, observer: &mut O) -> Result<RetrievalState>
    where
        D: TimeSeriesDriver + ?Sized,
        O: RetrievalObserver + ?Sized,
    {
        {
            let stream = self.progress_stream(driver);
            pin_mut!(stream);
            while let Some(event) = stream.next().await {
                match event? {
                    RetrievalEvent::Progress(progress) => observer.on_progress(progress),
                    RetrievalEvent::Complete(session) => observer.on_complete(&session),
                    RetrievalEvent::Cancelled(session) => observer.on_cancelled(&session),
                }
            }
        }
        Ok(self.state())
    }
}
