//! Separate the resampled intensity surface into background, local median and
//! signal components.
//!
//! The background of each scan is estimated independently in neighborhoods one Dalton
//! wide. Within a neighborhood the `K` most intense samples are assumed to belong to
//! real peaks, where `K` scales with the maximum charge state because a charge `z`
//! envelope places `z` isotope peaks in every Dalton. The `2K`-th most intense sample is
//! then taken as representative of the background, and a sliding-scale cutoff between
//! the two is used to clip every sample to its background contribution.
use cfg_if::cfg_if;

#[cfg(feature = "parallelism")]
use rayon::prelude::*;

use crate::arrayops::{median_inplace, Matrix};
use crate::config::BackgroundParams;
use crate::smooth::{centered_moving_average, Smoother};

/// The components of a window's intensity surface
#[derive(Debug, Clone, Default)]
pub struct SmoothedSurface {
    /// The low-passed, background-subtracted surface peaks are detected on
    pub smoothed: Matrix<f32>,
    /// The unsmoothed, background-subtracted surface
    pub signal: Matrix<f32>,
    pub background: Matrix<f32>,
    /// The elementwise maximum of the per-scan and per-bin windowed medians
    pub median: Matrix<f32>,
}

impl SmoothedSurface {
    pub fn shape(&self) -> (usize, usize) {
        self.smoothed.shape()
    }
}

#[derive(Debug, Clone)]
pub struct BackgroundEstimator {
    /// The number of samples per neighborhood assumed to be dense signal
    pub top_k: usize,
    /// The width of a neighborhood in grid points
    pub neighborhood_bins: usize,
    pub passes: usize,
    pub median_span_mz: usize,
    pub median_span_scans: usize,
}

impl BackgroundEstimator {
    pub fn new(params: &BackgroundParams, max_charge: i32, bins_per_dalton: f64) -> Self {
        let top_k = (params.top_k_per_charge * max_charge.max(1) as usize).max(1);
        let neighborhood_bins = (params.neighborhood * bins_per_dalton).round().max(1.0) as usize;
        Self {
            top_k,
            neighborhood_bins,
            passes: params.passes,
            median_span_mz: params.median_span_mz,
            median_span_scans: params.median_span_scans,
        }
    }

    /// The cutoff separating dense signal from background in one neighborhood
    pub fn dense_cutoff(&self, neighborhood: &[f32], buffer: &mut Vec<f32>) -> f32 {
        if neighborhood.is_empty() {
            return 0.0;
        }
        buffer.clear();
        buffer.extend_from_slice(neighborhood);
        buffer.sort_unstable_by(|a, b| b.total_cmp(a));
        let last = buffer.len() - 1;
        let v_k = buffer[(self.top_k - 1).min(last)];
        let v_2k = buffer[(2 * self.top_k - 1).min(last)];
        if v_k <= 0.0 {
            return v_k.max(0.0);
        }
        let ratio = v_2k / v_k;
        let weight = ratio * ratio;
        v_2k + weight * (v_k - v_2k)
    }

    /// The background of a single scan, before smoothing.
    ///
    /// Only the span between the first and last positive samples is treated as data.
    /// A neighborhood cut short by either end of that span takes its cutoff from the
    /// nearest full neighborhood's worth of data, so the step into the zero padding
    /// of the grid is not mistaken for a sparse neighborhood of peaks.
    pub fn scan_background(&self, row: &[f32]) -> Vec<f32> {
        let mut out = vec![0.0f32; row.len()];
        let (first, last) = match (
            row.iter().position(|v| *v > 0.0),
            row.iter().rposition(|v| *v > 0.0),
        ) {
            (Some(first), Some(last)) => (first, last + 1),
            _ => return out,
        };
        let width = self.neighborhood_bins;
        let mut buffer = Vec::with_capacity(width);
        for start in (0..row.len()).step_by(width) {
            let end = (start + width).min(row.len());
            let lo = start.max(first);
            let hi = end.min(last);
            if lo >= hi {
                continue;
            }
            let (a, b) = if last - first < width {
                (start, end)
            } else if hi - lo < width {
                let a = hi.saturating_sub(width).max(first);
                (a, a + width)
            } else {
                (lo, hi)
            };
            let cutoff = self.dense_cutoff(&row[a..b], &mut buffer);
            for (o, v) in out[lo..hi].iter_mut().zip(row[lo..hi].iter()) {
                *o = v.min(cutoff).max(0.0);
            }
        }
        out
    }

    /// Estimate the background of every scan of `surface` and lightly smooth it
    /// along the m/z axis. Smoothing never lowers a sample's background below its
    /// clipped intensity.
    pub fn background(&self, surface: &Matrix<f32>) -> Matrix<f32> {
        let (n_scans, n_bins) = surface.shape();
        let passes = self.passes;
        let process = |row: &[f32]| -> Vec<f32> {
            let clipped = self.scan_background(row);
            let mut bg = clipped.clone();
            for _ in 0..passes {
                bg = centered_moving_average(&bg, 1);
            }
            for (b, c) in bg.iter_mut().zip(clipped) {
                *b = b.max(c);
            }
            bg
        };
        cfg_if! {
            if #[cfg(feature = "parallelism")] {
                let rows: Vec<Vec<f32>> = surface.rows_iter().collect::<Vec<_>>().into_par_iter().map(process).collect();
            } else {
                let rows: Vec<Vec<f32>> = surface.rows_iter().map(process).collect();
            }
        }
        if rows.is_empty() {
            return Matrix::new(n_scans, n_bins);
        }
        Matrix::from_rows(rows)
    }

    /// The elementwise maximum of the windowed median along each scan and the
    /// windowed median along each bin's elution trace.
    ///
    /// [`BackgroundEstimator::separate`] takes this over the background surface, so
    /// the median tracks the noise floor under a peak rather than the peak itself.
    pub fn local_median(&self, surface: &Matrix<f32>) -> Matrix<f32> {
        let (n_scans, n_bins) = surface.shape();
        if n_scans == 0 || n_bins == 0 {
            return Matrix::new(n_scans, n_bins);
        }
        let span_mz = self.median_span_mz;
        cfg_if! {
            if #[cfg(feature = "parallelism")] {
                let rows: Vec<Vec<f32>> = surface.rows_iter().collect::<Vec<_>>().into_par_iter().map(|row| windowed_median(row, span_mz)).collect();
            } else {
                let rows: Vec<Vec<f32>> = surface.rows_iter().map(|row| windowed_median(row, span_mz)).collect();
            }
        }
        let mut out = Matrix::from_rows(rows);
        for j in 0..n_bins {
            let trace = windowed_median(&surface.column(j), self.median_span_scans);
            for (i, v) in trace.into_iter().enumerate() {
                let cell = &mut out[(i, j)];
                if v > *cell {
                    *cell = v;
                }
            }
        }
        out
    }

    /// Split `surface` into its components, smoothing the background-subtracted signal
    /// with `smoother`
    pub fn separate(&self, surface: &Matrix<f32>, smoother: &Smoother) -> SmoothedSurface {
        let background = self.background(surface);
        assert_eq!(
            background.shape(),
            surface.shape(),
            "background must match the shape of the surface"
        );
        let median = self.local_median(&background);
        let signal = surface.zip_map(&background, |v, b| (v - b).max(0.0));
        let smoothed = smoother.smooth(&signal);
        SmoothedSurface {
            smoothed,
            signal,
            background,
            median,
        }
    }
}

/// The median of the `span` values centered on each point of `values`, truncated at
/// the ends
pub fn windowed_median(values: &[f32], span: usize) -> Vec<f32> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }
    let half = span.max(1) / 2;
    let mut buffer = Vec::with_capacity(2 * half + 1);
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(n);
            buffer.clear();
            buffer.extend_from_slice(&values[lo..hi]);
            median_inplace(&mut buffer)
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::SmoothingParams;

    fn estimator() -> BackgroundEstimator {
        BackgroundEstimator::new(&BackgroundParams::default(), 2, 10.0)
    }

    #[test]
    fn test_dense_cutoff() {
        let est = estimator();
        assert_eq!(est.top_k, 2);
        assert_eq!(est.neighborhood_bins, 10);
        let mut buffer = Vec::new();

        // Two dense samples over an empty baseline leave no background
        let chunk = [0.0, 0.0, 50.0, 0.0, 0.0, 0.0, 40.0, 0.0, 0.0, 0.0];
        assert_eq!(est.dense_cutoff(&chunk, &mut buffer), 0.0);

        // A flat neighborhood is all background
        let flat = [3.0f32; 10];
        assert_eq!(est.dense_cutoff(&flat, &mut buffer), 3.0);

        // v_k = 40, v_2k = 10, w = 1/16
        let mixed = [10.0, 10.0, 50.0, 10.0, 10.0, 10.0, 40.0, 10.0, 10.0, 10.0];
        let cutoff = est.dense_cutoff(&mixed, &mut buffer);
        assert!((cutoff - (10.0 + 30.0 / 16.0)).abs() < 1e-6);
    }

    #[test]
    fn test_scan_background() {
        let est = estimator();
        let mut row = vec![2.0f32; 20];
        row[5] = 100.0;
        row[6] = 80.0;
        let bg = est.scan_background(&row);
        assert_eq!(bg.len(), 20);
        // The peaks are clipped to just above the baseline
        assert!(bg[5] >= 2.0 && bg[5] < 2.1);
        assert!(bg.iter().all(|v| (*v - 2.0).abs() < 0.05));
        assert!((bg[15] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_data_edges_are_background() {
        let est = estimator();
        // A flat baseline that stops one sample into its last neighborhood, then padding
        let mut row = vec![0.0f32; 50];
        row[10..31].iter_mut().for_each(|v| *v = 50.0);
        let bg = est.scan_background(&row);
        assert!(bg[10..31].iter().all(|v| *v == 50.0), "{bg:?}");
        assert!(bg[..10].iter().chain(bg[31..].iter()).all(|v| *v == 0.0));

        let surface = Matrix::from_rows(vec![row; 5]);
        let smoother = Smoother::from_params(&SmoothingParams::default());
        let parts = est.separate(&surface, &smoother);
        for i in 0..5 {
            assert!(parts.signal.row(i).iter().all(|v| *v == 0.0), "{:?}", parts.signal.row(i));
            assert!(parts.smoothed.row(i).iter().all(|v| v.abs() < 1e-6));
        }
        // Smoothing may spread the background into the padding but never below the data
        assert!(parts.background[(0, 9)] > 0.0);
        assert_eq!(parts.background[(0, 10)], 50.0);
        assert_eq!(parts.background[(0, 30)], 50.0);
    }

    #[test]
    fn test_median_follows_background() {
        let est = estimator();
        let mut rows = vec![vec![1.0f32; 30]; 9];
        for (i, row) in rows.iter_mut().enumerate() {
            let d = i as f32 - 4.0;
            row[12] = 1.0 + 500.0 * (-0.5 * d * d / 9.0).exp();
        }
        let surface = Matrix::from_rows(rows);
        let smoother = Smoother::from_params(&SmoothingParams::default());
        let parts = est.separate(&surface, &smoother);
        assert!((parts.median[(4, 12)] - 1.0).abs() < 1e-6, "{}", parts.median[(4, 12)]);
        assert!(parts.signal[(4, 12)] > 2.0 * parts.median[(4, 12)]);
        assert!(parts.signal[(4, 12)] > 400.0);
    }

    #[test]
    fn test_windowed_median() {
        let values = [1.0, 9.0, 2.0, 8.0, 3.0];
        assert_eq!(windowed_median(&values, 3), vec![5.0, 2.0, 8.0, 3.0, 5.5]);
        assert!(windowed_median(&[], 3).is_empty());
    }

    #[test]
    fn test_separate() {
        let est = estimator();
        let mut rows = vec![vec![1.0f32; 30]; 7];
        rows[3][12] = 50.0;
        let surface = Matrix::from_rows(rows);
        let smoother = Smoother::from_params(&SmoothingParams::default());
        let parts = est.separate(&surface, &smoother);
        assert_eq!(parts.shape(), (7, 30));
        assert_eq!(parts.background.shape(), (7, 30));
        assert!((parts.signal[(3, 12)] - 49.0).abs() < 1e-4);
        assert!(parts.signal[(0, 0)].abs() < 1e-5);
        assert!((parts.median[(3, 12)] - 1.0).abs() < 1e-6);
        assert!(parts.smoothed[(3, 12)] > parts.smoothed[(2, 12)]);
    }
}
