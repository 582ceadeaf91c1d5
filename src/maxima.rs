//! Locate candidate isotope peaks on a window's smoothed intensity surface.
//!
//! Two detectors are provided. [`MaximaDetector`] reports every two dimensional local
//! maximum and is the precise default. [`EdgeDetector`] finds coarse peak locations by
//! intersecting one dimensional edge maps computed along each axis, and is intended for
//! fast, low precision passes.
use std::fmt::Debug;

use log::{trace, warn};

use crate::arrayops::{median, Matrix};
use crate::background::SmoothedSurface;
use crate::config::DetectorParams;
use crate::peak::Peak;
use crate::resample::ResampledMatrix;

/// Produces the peak list the isotope clusterer works on
pub trait PeakDetector: Debug + Send + Sync {
    fn detect(&self, surface: &SmoothedSurface, matrix: &ResampledMatrix) -> Vec<Peak>;
}

/// Fit a parabola through three equally spaced points and return the offset of its
/// vertex from the middle point, in units of the spacing
#[inline]
fn quadratic_vertex(left: f32, center: f32, right: f32) -> f64 {
    let denominator = (left - 2.0 * center + right) as f64;
    if denominator >= 0.0 {
        return 0.0;
    }
    (0.5 * (left - right) as f64 / denominator).clamp(-0.5, 0.5)
}

/// Reports each point of the smoothed surface that is not exceeded by any of its eight
/// neighbors.
///
/// The smoothed surface alone can produce maxima on the shoulders of over-smoothed
/// ridges, so in the scans either side of a maximum its smoothed value is compared
/// against the unsmoothed signal instead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaximaDetector {
    /// Maxima must be strictly greater than this. May be `-inf`.
    pub min_intensity: f32,
    /// Maxima must be at least this multiple of the local median
    pub median_factor: f32,
    /// Maxima must be greater than this fraction of the most intense point of the window
    pub relative_floor: f32,
}

impl Default for MaximaDetector {
    fn default() -> Self {
        Self {
            min_intensity: 0.0,
            median_factor: 0.0,
            relative_floor: 0.0,
        }
    }
}

impl MaximaDetector {
    pub fn new(min_intensity: f32, median_factor: f32) -> Self {
        Self {
            min_intensity,
            median_factor,
            relative_floor: 0.0,
        }
    }

    pub fn with_relative_floor(mut self, relative_floor: f32) -> Self {
        self.relative_floor = relative_floor;
        self
    }

    pub fn from_params(params: &DetectorParams) -> Self {
        Self::new(params.min_intensity, params.median_factor).with_relative_floor(params.relative_floor)
    }

    /// Whether `(scan, bin)` is a local maximum. The caller guarantees the point is not
    /// on the first or last scan nor within two bins of either end.
    ///
    /// The smoothed value at `(scan, bin)` must not be exceeded by the smoothed values
    /// either side of it in the same scan, nor by the unsmoothed signal of the three
    /// nearest bins in the scans before and after.
    pub fn is_maximum(&self, surface: &SmoothedSurface, scan: usize, bin: usize) -> bool {
        let smoothed = &surface.smoothed;
        let signal = &surface.signal;
        let value = smoothed[(scan, bin)];
        if !(value > self.min_intensity) {
            return false;
        }
        if value < self.median_factor * surface.median[(scan, bin)] {
            return false;
        }
        if !(signal[(scan, bin)] > 0.0) {
            return false;
        }
        if smoothed[(scan, bin - 1)] > value || smoothed[(scan, bin + 1)] > value {
            return false;
        }
        for s in [scan - 1, scan + 1] {
            for m in bin - 1..=bin + 1 {
                if signal[(s, m)] > value {
                    return false;
                }
            }
        }
        true
    }

    pub fn find_maxima(&self, surface: &SmoothedSurface, matrix: &ResampledMatrix) -> Vec<Peak> {
        let (n_scans, n_bins) = surface.shape();
        if n_scans < 3 {
            warn!("Cannot search for 2D maxima in a window of {n_scans} scans");
            return Vec::new();
        }
        if n_bins < 5 {
            return Vec::new();
        }
        let smoothed = &surface.smoothed;
        let top = smoothed.as_slice().iter().copied().fold(0.0f32, f32::max);
        let floor = self.relative_floor * top;
        let mut peaks = Vec::new();
        for scan in 1..n_scans - 1 {
            for bin in 2..n_bins - 2 {
                if !(smoothed[(scan, bin)] > floor) || !self.is_maximum(surface, scan, bin) {
                    continue;
                }
                let offset = quadratic_vertex(
                    smoothed[(scan, bin - 1)],
                    smoothed[(scan, bin)],
                    smoothed[(scan, bin + 1)],
                );
                let mz = matrix.mz_at_fractional(bin as f64 + offset);
                peaks.push(
                    Peak::new(scan, bin, mz, smoothed[(scan, bin)]).with_estimates(
                        surface.background[(scan, bin)],
                        surface.median[(scan, bin)],
                    ),
                );
            }
        }
        trace!("Found {} 2D maxima", peaks.len());
        peaks
    }
}

impl PeakDetector for MaximaDetector {
    fn detect(&self, surface: &SmoothedSurface, matrix: &ResampledMatrix) -> Vec<Peak> {
        self.find_maxima(surface, matrix)
    }
}

/// Average `trace` with a centered box `2^level + 1` points wide, the scaling function
/// of a Haar decomposition at that level. Level 0 is the identity.
pub fn haar_smooth(trace: &[f32], level: u32) -> Vec<f32> {
    if level == 0 || trace.is_empty() {
        return trace.to_vec();
    }
    let half = 1usize << (level - 1);
    let n = trace.len();
    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0f64);
    let mut acc = 0.0f64;
    for v in trace {
        acc += *v as f64;
        prefix.push(acc);
    }
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(n);
            ((prefix[hi] - prefix[lo]) / (hi - lo) as f64) as f32
        })
        .collect()
}

/// Marks the apex of each rise of a trace.
///
/// The trace is smoothed with [`haar_smooth`] and its slope followed. A run of rising
/// points above `threshold` times the trace median ends where the slope crosses to zero
/// or below, and the last point of the run is marked if it peaked above `min_factor`
/// times the median.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeScanner {
    pub level: u32,
    /// The multiple of the trace median subtracted before scanning
    pub threshold: f32,
    /// A rise only counts if it peaks above this multiple of the trace median
    pub min_factor: f32,
}

impl EdgeScanner {
    pub fn scan(&self, trace: &[f32]) -> Vec<bool> {
        let n = trace.len();
        let mut marks = vec![false; n];
        if n < 2 {
            return marks;
        }
        let transformed = haar_smooth(trace, self.level);
        let med = median(&transformed);
        let offset = self.threshold * med;
        let floor = self.min_factor * med;

        let mut peak: Option<f32> = None;
        for i in 1..n {
            let slope = transformed[i] - transformed[i - 1];
            if slope > 0.0 && transformed[i] - offset > 0.0 {
                peak = Some(peak.map_or(transformed[i], |p| p.max(transformed[i])));
            } else if slope <= 0.0 {
                if let Some(p) = peak.take() {
                    if p > floor {
                        marks[i - 1] = true;
                    }
                }
            }
        }
        marks
    }
}

/// Sum `marks` over a `(2 * half_scans + 1) x (2 * half_bins + 1)` window centered
/// on every point
pub fn dilate_counts(marks: &Matrix<bool>, half_scans: usize, half_bins: usize) -> Matrix<u32> {
    let (n_scans, n_bins) = marks.shape();
    let mut counts = Matrix::new(n_scans, n_bins);
    for s in 0..n_scans {
        for m in 0..n_bins {
            if !marks[(s, m)] {
                continue;
            }
            let s_lo = s.saturating_sub(half_scans);
            let s_hi = (s + half_scans).min(n_scans - 1);
            let m_lo = m.saturating_sub(half_bins);
            let m_hi = (m + half_bins).min(n_bins - 1);
            for i in s_lo..=s_hi {
                for j in m_lo..=m_hi {
                    counts[(i, j)] += 1;
                }
            }
        }
    }
    counts
}

/// Reduce every 8-connected island of non-zero values in `values` to its single
/// largest point, zeroing the rest. Ties go to the earliest point in scan-major order.
///
/// Returns the representative `(scan, bin, value)` of each island, scan-major.
pub fn collapse_islands(values: &mut Matrix<u32>) -> Vec<(usize, usize, u32)> {
    let (n_scans, n_bins) = values.shape();
    let mut visited = Matrix::<bool>::new(n_scans, n_bins);
    let mut stack = Vec::new();
    let mut members = Vec::new();
    let mut representatives = Vec::new();

    for s in 0..n_scans {
        for m in 0..n_bins {
            if visited[(s, m)] || values[(s, m)] == 0 {
                continue;
            }
            visited[(s, m)] = true;
            stack.push((s, m));
            members.clear();
            let mut best = (s, m, values[(s, m)]);
            while let Some((i, j)) = stack.pop() {
                members.push((i, j));
                let v = values[(i, j)];
                if v > best.2 || (v == best.2 && (i, j) < (best.0, best.1)) {
                    best = (i, j, v);
                }
                for i2 in i.saturating_sub(1)..=(i + 1).min(n_scans - 1) {
                    for j2 in j.saturating_sub(1)..=(j + 1).min(n_bins - 1) {
                        if !visited[(i2, j2)] && values[(i2, j2)] != 0 {
                            visited[(i2, j2)] = true;
                            stack.push((i2, j2));
                        }
                    }
                }
            }
            for (i, j) in members.iter().copied() {
                if (i, j) != (best.0, best.1) {
                    values[(i, j)] = 0;
                }
            }
            representatives.push(best);
        }
    }
    representatives.sort_by_key(|(s, m, _)| (*s, *m));
    representatives
}

/// Finds coarse peak locations from the agreement of edge maps along the elution and
/// m/z axes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeDetector {
    pub scanner: EdgeScanner,
    pub elution_dilation: (usize, usize),
    pub mz_dilation: (usize, usize),
    pub min_elution_count: u32,
    pub min_mz_count: u32,
    pub min_intensity: f32,
}

impl EdgeDetector {
    pub fn from_params(params: &DetectorParams) -> Self {
        Self {
            scanner: EdgeScanner {
                level: params.haar_level,
                threshold: params.edge_threshold,
                min_factor: params.edge_min_factor,
            },
            elution_dilation: params.elution_dilation,
            mz_dilation: params.mz_dilation,
            min_elution_count: params.min_elution_count,
            min_mz_count: params.min_mz_count,
            min_intensity: params.min_intensity,
        }
    }

    /// The edge marks of every elution trace and of every scan
    pub fn edge_maps(&self, values: &Matrix<f32>) -> (Matrix<bool>, Matrix<bool>) {
        let (n_scans, n_bins) = values.shape();
        let mut elution = Matrix::<bool>::new(n_scans, n_bins);
        for m in 0..n_bins {
            let marks = self.scanner.scan(&values.column(m));
            elution.set_column(m, &marks);
        }
        let mut mz = Matrix::<bool>::new(n_scans, n_bins);
        for s in 0..n_scans {
            let marks = self.scanner.scan(values.row(s));
            mz.row_mut(s).copy_from_slice(&marks);
        }
        (elution, mz)
    }

    /// The combined axis counts of accepted points, zero elsewhere
    pub fn accepted_counts(&self, values: &Matrix<f32>) -> Matrix<u32> {
        let (elution, mz) = self.edge_maps(values);
        let elution_counts = dilate_counts(&elution, self.elution_dilation.0, self.elution_dilation.1);
        let mz_counts = dilate_counts(&mz, self.mz_dilation.0, self.mz_dilation.1);
        let (min_e, min_m) = (self.min_elution_count.max(1), self.min_mz_count.max(1));
        elution_counts.zip_map(&mz_counts, |e, m| {
            if e >= min_e && m >= min_m {
                e + m
            } else {
                0
            }
        })
    }

    /// Move a representative point to the most intense point of the smoothed surface
    /// within the dilation window around it
    fn snap_to_apex(&self, smoothed: &Matrix<f32>, scan: usize, bin: usize) -> (usize, usize) {
        let (n_scans, n_bins) = smoothed.shape();
        let half_scans = self.elution_dilation.0.max(self.mz_dilation.0);
        let half_bins = self.elution_dilation.1.max(self.mz_dilation.1);
        let mut best = (scan, bin);
        let mut best_value = smoothed[(scan, bin)];
        for s in scan.saturating_sub(half_scans)..=(scan + half_scans).min(n_scans - 1) {
            for m in bin.saturating_sub(half_bins)..=(bin + half_bins).min(n_bins - 1) {
                if smoothed[(s, m)] > best_value {
                    best_value = smoothed[(s, m)];
                    best = (s, m);
                }
            }
        }
        best
    }

    pub fn find_edges(&self, surface: &SmoothedSurface, matrix: &ResampledMatrix) -> Vec<Peak> {
        let (n_scans, n_bins) = surface.shape();
        if n_scans == 0 || n_bins == 0 {
            return Vec::new();
        }
        let mut counts = self.accepted_counts(&surface.signal);
        let representatives = collapse_islands(&mut counts);
        let smoothed = &surface.smoothed;
        let mut seen = std::collections::HashSet::new();
        let mut peaks = Vec::with_capacity(representatives.len());
        for (scan, bin, count) in representatives {
            let (scan, bin) = self.snap_to_apex(smoothed, scan, bin);
            let intensity = smoothed[(scan, bin)];
            if !(intensity > self.min_intensity) || !seen.insert((scan, bin)) {
                continue;
            }
            let offset = if bin > 0 && bin + 1 < n_bins {
                quadratic_vertex(
                    smoothed[(scan, bin - 1)],
                    intensity,
                    smoothed[(scan, bin + 1)],
                )
            } else {
                0.0
            };
            peaks.push(
                Peak::new(scan, bin, matrix.mz_at_fractional(bin as f64 + offset), intensity)
                    .with_estimates(surface.background[(scan, bin)], surface.median[(scan, bin)])
                    .with_score(count as f32),
            );
        }
        trace!("Found {} gross edge features", peaks.len());
        peaks
    }
}

impl PeakDetector for EdgeDetector {
    fn detect(&self, surface: &SmoothedSurface, matrix: &ResampledMatrix) -> Vec<Peak> {
        self.find_edges(surface, matrix)
    }
}
