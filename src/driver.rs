//! Drive a whole run through the feature finding pipeline in overlapping windows of scans.
//!
//! Each window is processed independently. A feature is kept only by the window whose
//! core contains its representative scan, so features near the seams between windows
//! are reported exactly once.
use std::borrow::Cow;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use cfg_if::cfg_if;
use log::{debug, info};
use thiserror::Error;

use crate::config::{ConfigurationError, FeatureFinderConfig};
use crate::feature::{Feature, FeatureSet, Provenance};
use crate::pipeline::{FeatureStrategy, Pipeline};
use crate::refine::AccurateMassRefiner;
use crate::resample::ResampleError;
use crate::run::{RunSource, Scan};

#[cfg(feature = "parallelism")]
use rayon::prelude::*;

/// A flag shared with the caller to stop processing between windows
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Receives the percentage of windows completed, from 0 to 100
pub trait ProgressReporter: Sync {
    fn report(&self, percent: f64);
}

impl<F: Fn(f64) + Sync> ProgressReporter for F {
    fn report(&self, percent: f64) {
        self(percent)
    }
}

#[derive(Debug, Error)]
pub enum FeatureFindingError {
    #[error("The run contains no scans")]
    EmptyRun,
    #[error("The run has no scan at position {0}")]
    MissingScan(usize),
    #[error("Scan {number} is invalid: {source}")]
    InvalidScan {
        number: u32,
        #[source]
        source: ResampleError,
    },
    #[error("Failed to resample a window: {0}")]
    Resample(#[from] ResampleError),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigurationError),
    #[error("Cancelled after {completed_windows} of {total_windows} windows")]
    Cancelled {
        completed_windows: usize,
        total_windows: usize,
        /// The features of the windows which completed. These do not cover the whole run.
        partial: Box<FeatureSet>,
    },
}

/// A span of scans processed together, and the part of it whose features it reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    pub start: usize,
    pub end: usize,
    pub core_start: usize,
    pub core_end: usize,
}

impl ScanWindow {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Whether the global scan index `scan` falls in this window's core
    pub fn owns(&self, scan: usize) -> bool {
        self.core_start <= scan && scan < self.core_end
    }
}

/// Partition `n_scans` into windows `width` scans wide overlapping by `2 * margin`.
///
/// The cores of consecutive windows tile `0..n_scans` exactly. The first and last
/// windows extend their cores to the ends of the run.
pub fn plan_windows(n_scans: usize, width: usize, margin: usize) -> Vec<ScanWindow> {
    if n_scans == 0 {
        return Vec::new();
    }
    let step = width.saturating_sub(2 * margin).max(1);
    let mut windows = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + width).min(n_scans);
        let last = end == n_scans;
        let core_start = if start == 0 { 0 } else { start + margin };
        let core_end = if last { n_scans } else { start + width - margin };
        windows.push(ScanWindow {
            start,
            end,
            core_start,
            core_end,
        });
        if last {
            break;
        }
        start += step;
    }
    windows
}

/// Move a window-relative feature and its alternatives into run coordinates
fn translate(feature: &mut Feature, window: &ScanWindow, scans: &[Cow<'_, Scan>]) {
    let at = |local: usize| {
        let i = local.min(scans.len() - 1);
        (window.start + i, scans[i].number, scans[i].time)
    };
    (feature.scan, feature.scan_number, feature.time) = at(feature.scan);
    (feature.scan_first, feature.scan_number_first, feature.time_first) = at(feature.scan_first);
    (feature.scan_last, feature.scan_number_last, feature.time_last) = at(feature.scan_last);
    for peak in feature.comprised.iter_mut().flatten() {
        peak.scan += window.start;
    }
    if let Some(next) = feature.next.as_deref_mut() {
        translate(next, window, scans);
    }
}

/// The features one window reported, in run coordinates
#[derive(Debug, Default)]
struct WindowFeatures {
    features: Vec<Feature>,
}

/// Finds features across a whole run
#[derive(Default)]
pub struct FeatureFinder {
    config: FeatureFinderConfig,
    cancellation: Option<CancellationToken>,
    progress: Option<Box<dyn ProgressReporter>>,
}

impl Debug for FeatureFinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureFinder")
            .field("config", &self.config)
            .field("cancellation", &self.cancellation)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl FeatureFinder {
    pub fn new(config: FeatureFinderConfig) -> Result<Self, FeatureFindingError> {
        config.validate()?;
        Ok(Self {
            config,
            cancellation: None,
            progress: None,
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_progress<P: ProgressReporter + 'static>(mut self, progress: P) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn config(&self) -> &FeatureFinderConfig {
        &self.config
    }

    pub fn plan_windows(&self, n_scans: usize) -> Vec<ScanWindow> {
        plan_windows(n_scans, self.config.window.width, self.config.window.margin)
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|t| t.is_cancelled())
    }

    fn report(&self, completed: usize, total: usize) {
        if let Some(progress) = self.progress.as_ref() {
            progress.report(completed as f64 / total as f64 * 100.0);
        }
    }

    /// Find the features of `run` over its whole m/z range
    pub fn find_features<R: RunSource + ?Sized>(&self, run: &R) -> Result<FeatureSet, FeatureFindingError> {
        self.find_features_in_range(run, run.mz_range())
    }

    /// Find the features of `run` between `mz_range.0` and `mz_range.1`
    pub fn find_features_in_range<R: RunSource + ?Sized>(
        &self,
        run: &R,
        mz_range: (f64, f64),
    ) -> Result<FeatureSet, FeatureFindingError> {
        let pipeline = Pipeline::from_config(&self.config, mz_range);
        self.find_features_with(run, &pipeline)
    }

    /// Find the features of `run` with an arbitrary window `strategy`, one window at a time
    pub fn find_features_with<R: RunSource + ?Sized, S: FeatureStrategy + ?Sized>(
        &self,
        run: &R,
        strategy: &S,
    ) -> Result<FeatureSet, FeatureFindingError> {
        if run.is_empty() {
            return Err(FeatureFindingError::EmptyRun);
        }
        let started = Instant::now();
        let windows = self.plan_windows(run.len());
        let total = windows.len();
        let mut completed = Vec::with_capacity(total);
        for window in windows.iter() {
            if self.is_cancelled() {
                return Err(self.cancelled(completed, total));
            }
            completed.push(self.process_window(run, strategy, window)?);
            self.report(completed.len(), total);
        }
        let features = self.assemble(run, completed);
        info!(
            "Found {} features in {total} windows in {:0.3} seconds",
            features.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(features)
    }

    /// Find the features of `run` over its whole m/z range, processing windows on the
    /// thread pool. The result is identical to [`FeatureFinder::find_features`].
    ///
    /// Progress is reported as windows complete, which may not be in window order.
    pub fn find_features_parallel<R: RunSource + ?Sized>(&self, run: &R) -> Result<FeatureSet, FeatureFindingError> {
        if run.is_empty() {
            return Err(FeatureFindingError::EmptyRun);
        }
        let started = Instant::now();
        let pipeline = Pipeline::from_config(&self.config, run.mz_range());
        let windows = self.plan_windows(run.len());
        let total = windows.len();
        let finished = AtomicUsize::new(0);

        let task = |window: &ScanWindow| -> Option<Result<WindowFeatures, FeatureFindingError>> {
            if self.is_cancelled() {
                return None;
            }
            let result = self.process_window(run, &pipeline, window);
            let done = finished.fetch_add(1, Ordering::SeqCst) + 1;
            self.report(done, total);
            Some(result)
        };

        cfg_if! {
            if #[cfg(feature = "parallelism")] {
                let results: Vec<_> = windows.par_iter().map(task).collect();
            } else {
                let results: Vec<_> = windows.iter().map(task).collect();
            }
        }

        let mut completed = Vec::with_capacity(total);
        let mut cancelled = false;
        for result in results {
            match result {
                Some(window) => completed.push(window?),
                None => cancelled = true,
            }
        }
        if cancelled {
            return Err(self.cancelled(completed, total));
        }
        let features = self.assemble(run, completed);
        info!(
            "Found {} features in {total} windows in {:0.3} seconds",
            features.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(features)
    }

    fn process_window<R: RunSource + ?Sized, S: FeatureStrategy + ?Sized>(
        &self,
        run: &R,
        strategy: &S,
        window: &ScanWindow,
    ) -> Result<WindowFeatures, FeatureFindingError> {
        let scans = (window.start..window.end)
            .map(|i| run.scan(i).ok_or(FeatureFindingError::MissingScan(i)))
            .collect::<Result<Vec<_>, _>>()?;
        for scan in scans.iter() {
            scan.validate()
                .map_err(|source| FeatureFindingError::InvalidScan {
                    number: scan.number,
                    source,
                })?;
        }
        let spectra: Vec<_> = scans.iter().map(|s| &s.spectrum).collect();
        let times: Vec<f64> = scans.iter().map(|s| s.time).collect();

        let result = strategy.process_window(&spectra, &times)?;
        let found = result.features.len();
        let mut features: Vec<Feature> = result
            .features
            .into_iter()
            .filter(|f| window.owns(window.start + f.scan))
            .collect();
        for feature in features.iter_mut() {
            translate(feature, window, &scans);
        }
        debug!(
            "Scans {}-{}: {} peaks, {} unexplained, kept {} of {found} features",
            window.start,
            window.end,
            result.peak_count,
            result.unexplained_count,
            features.len(),
        );
        Ok(WindowFeatures { features })
    }

    fn cancelled(&self, completed: Vec<WindowFeatures>, total: usize) -> FeatureFindingError {
        let completed_windows = completed.len();
        let features = completed.into_iter().flat_map(|w| w.features).collect();
        let mut partial = FeatureSet::new(features, Provenance::new(self.config.clone()));
        partial.sort();
        FeatureFindingError::Cancelled {
            completed_windows,
            total_windows: total,
            partial: Box::new(partial),
        }
    }

    /// Merge window results in window order, then refine, filter and sort them
    fn assemble<R: RunSource + ?Sized>(&self, run: &R, completed: Vec<WindowFeatures>) -> FeatureSet {
        let mut features: Vec<Feature> = completed.into_iter().flat_map(|w| w.features).collect();
        AccurateMassRefiner::new(self.config.refine.clone()).refine_all(&mut features, run);
        let mut set = FeatureSet::new(features, Provenance::new(self.config.clone()));
        let rejected = set.retain_accepted(&self.config.filter);
        if rejected > 0 {
            debug!("Filtered out {rejected} features");
        }
        set.sort();
        set
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    use crate::run::MemoryRun;

    #[rstest]
    #[case(10, 256, 32)]
    #[case(256, 256, 32)]
    #[case(257, 256, 32)]
    #[case(1000, 256, 32)]
    #[case(80, 40, 8)]
    #[case(100, 10, 4)]
    fn test_windows_tile(#[case] n: usize, #[case] width: usize, #[case] margin: usize) {
        let windows = plan_windows(n, width, margin);
        assert_eq!(windows[0].start, 0);
        assert_eq!(windows[0].core_start, 0);
        assert_eq!(windows.last().unwrap().end, n);
        assert_eq!(windows.last().unwrap().core_end, n);
        for pair in windows.windows(2) {
            assert_eq!(pair[0].core_end, pair[1].core_start);
        }
        for scan in 0..n {
            assert_eq!(windows.iter().filter(|w| w.owns(scan)).count(), 1, "{scan}");
        }
        for w in windows.iter() {
            assert!(w.len() <= width);
            assert!(w.start <= w.core_start && w.core_end <= w.end);
        }
    }

    #[test]
    fn test_seam_ownership() {
        let windows = plan_windows(80, 40, 8);
        assert_eq!(windows.len(), 3);
        assert!(!windows[0].owns(32));
        assert!(windows[1].owns(32));
        assert_eq!(windows[1].start, 24);
    }

    #[test]
    fn test_empty_run() {
        let finder = FeatureFinder::default();
        let run = MemoryRun::default();
        assert!(matches!(
            finder.find_features(&run),
            Err(FeatureFindingError::EmptyRun)
        ));
        assert!(plan_windows(0, 10, 2).is_empty());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = FeatureFinderConfig::default();
        config.window.margin = 200;
        assert!(matches!(
            FeatureFinder::new(config),
            Err(FeatureFindingError::InvalidConfiguration(
                ConfigurationError::WindowTooNarrow { .. }
            ))
        ));
    }

    #[test]
    fn test_invalid_scan() {
        let run: MemoryRun = vec![
            Scan::new(1, 0.0, vec![500.0, 501.0], vec![1.0, 1.0]),
            Scan::new(2, 1.0, vec![501.0, 500.0], vec![1.0, 1.0]),
        ]
        .into_iter()
        .collect();
        let err = FeatureFinder::default().find_features(&run).unwrap_err();
        assert!(matches!(
            err,
            FeatureFindingError::InvalidScan {
                number: 2,
                source: ResampleError::MZNotSorted
            }
        ));
    }

    #[test]
    fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let finder = FeatureFinder::default().with_cancellation(token);
        let run: MemoryRun = (0..5)
            .map(|i| Scan::new(i, i as f64, vec![500.0, 501.0], vec![1.0, 1.0]))
            .collect();
        match finder.find_features(&run) {
            Err(FeatureFindingError::Cancelled {
                completed_windows,
                total_windows,
                partial,
            }) => {
                assert_eq!(completed_windows, 0);
                assert_eq!(total_windows, 1);
                assert!(partial.is_empty());
            }
            other => panic!("Expected cancellation, got {other:?}"),
        }
    }
}
