//! Re-sample irregularly spaced spectra onto a shared, uniform m/z grid so that a
//! window of scans can be treated as a dense scan × m/z matrix.
//!
//! The grid origin is always aligned to a whole Dalton, so grids built over different
//! ranges with the same resolution share their points.
use log::warn;
use thiserror::Error;

#[cfg(feature = "parallelism")]
use rayon::prelude::*;

use crate::arrayops::{ArrayPair, MZGrid, Matrix};

/// The least padding applied around the requested m/z range, in Daltons
pub const MINIMUM_PADDING: f64 = 0.5;

/// All the ways resampling can fail
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResampleError {
    #[error("The m/z array is not sorted")]
    MZNotSorted,
    #[error("The m/z and intensity arrays do not match in length ({mz} != {intensity})")]
    MZIntensityMismatch { mz: usize, intensity: usize },
    #[error("The m/z range {start}-{end} is empty")]
    EmptyRange { start: f64, end: f64 },
}

trait MZInterpolator: MZGrid {
    /// Linear interpolation between two control points to find the intensity
    /// at a third point between them.
    #[inline]
    fn interpolate_point(
        &self,
        mz_j: f64,
        mz_x: f64,
        mz_j1: f64,
        inten_j: f64,
        inten_j1: f64,
    ) -> f64 {
        ((inten_j * (mz_j1 - mz_x)) + (inten_j1 * (mz_x - mz_j))) / (mz_j1 - mz_j)
    }
}

/// Maps spectra onto a uniform m/z axis at a fixed number of samples per Dalton.
#[derive(Debug, Clone, PartialEq)]
pub struct Resampler {
    /// The evenly spaced m/z axis
    pub mz_grid: Vec<f64>,
    /// The first point of the grid, a whole number of Daltons
    pub mz_start: f64,
    /// The end of the grid, exclusive
    pub mz_end: f64,
    /// The number of grid points per Dalton
    pub bins_per_dalton: f64,
    /// Consecutive raw samples further apart than this many Daltons are not
    /// interpolated between. Samples which are isolated on both sides are instead
    /// added to their nearest grid point.
    pub max_gap: f64,
}

impl Resampler {
    /// Create a grid covering `mz_low` to `mz_high` padded by [`MINIMUM_PADDING`]
    pub fn new(mz_low: f64, mz_high: f64, bins_per_dalton: f64) -> Self {
        Self::with_padding(mz_low, mz_high, bins_per_dalton, MINIMUM_PADDING, 2.0)
    }

    /// Create a grid covering `mz_low` to `mz_high` padded by `padding` Daltons on each side.
    ///
    /// `max_gap_bins` controls how far apart, in grid points, two raw samples may be and still
    /// be interpolated between.
    pub fn with_padding(
        mz_low: f64,
        mz_high: f64,
        bins_per_dalton: f64,
        padding: f64,
        max_gap_bins: f64,
    ) -> Self {
        let padding = if padding < MINIMUM_PADDING {
            warn!("Raising m/z padding {padding} to the minimum of {MINIMUM_PADDING}");
            MINIMUM_PADDING
        } else {
            padding
        };
        let mz_start = (mz_low - padding).floor().max(0.0);
        let mz_end = (mz_high + padding).ceil();
        let n = ((mz_end - mz_start) * bins_per_dalton).round().max(0.0) as usize;
        let mz_grid = (0..n)
            .map(|i| mz_start + i as f64 / bins_per_dalton)
            .collect();
        Self {
            mz_grid,
            mz_start,
            mz_end,
            bins_per_dalton,
            max_gap: max_gap_bins / bins_per_dalton,
        }
    }

    /// The spacing between grid points
    pub fn dx(&self) -> f64 {
        1.0 / self.bins_per_dalton
    }

    pub fn len(&self) -> usize {
        self.mz_grid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mz_grid.is_empty()
    }

    /// The m/z of grid point `bin`
    pub fn mz_at(&self, bin: usize) -> f64 {
        self.mz_start + bin as f64 / self.bins_per_dalton
    }

    /// The grid point nearest to `mz`, if it falls on the grid
    pub fn bin_of(&self, mz: f64) -> Option<usize> {
        nearest_bin(self.mz_start, self.bins_per_dalton, self.mz_grid.len(), mz)
    }

    fn validate(&self, pair: &ArrayPair<'_>) -> Result<(), ResampleError> {
        if pair.mz_array.len() != pair.intensity_array.len() {
            return Err(ResampleError::MZIntensityMismatch {
                mz: pair.mz_array.len(),
                intensity: pair.intensity_array.len(),
            });
        }
        if !pair.is_sorted() {
            return Err(ResampleError::MZNotSorted);
        }
        if self.mz_grid.is_empty() {
            return Err(ResampleError::EmptyRange {
                start: self.mz_start,
                end: self.mz_end,
            });
        }
        Ok(())
    }

    /// Linearly interpolate `pair` onto the grid, writing into `out`, which must be
    /// as long as the grid.
    ///
    /// Raw points outside the grid are ignored.
    pub fn resample_into(&self, pair: &ArrayPair<'_>, out: &mut [f32]) -> Result<(), ResampleError> {
        self.validate(pair)?;
        assert_eq!(out.len(), self.mz_grid.len());
        let lo = pair.mz_array.partition_point(|x| *x < self.mz_start);
        let hi = pair.mz_array.partition_point(|x| *x < self.mz_end);
        let mz_array = &pair.mz_array[lo..hi];
        let intensity_array = &pair.intensity_array[lo..hi];
        let n = mz_array.len();
        if n == 0 {
            return Ok(());
        }

        let mut j = 0;
        for (i, x) in self.mz_grid.iter().copied().enumerate() {
            while j < n && mz_array[j] < x {
                j += 1;
            }
            if j < n && mz_array[j] == x {
                out[i] += intensity_array[j];
                continue;
            }
            if j == 0 || j == n {
                continue;
            }
            let (mz_j, mz_j1) = (mz_array[j - 1], mz_array[j]);
            if mz_j1 - mz_j > self.max_gap {
                continue;
            }
            let interp = self.interpolate_point(
                mz_j,
                x,
                mz_j1,
                intensity_array[j - 1] as f64,
                intensity_array[j] as f64,
            );
            out[i] += interp as f32;
        }

        // Isolated samples, e.g. centroids, would never be interpolated, so drop them
        // onto their nearest grid point.
        for k in 0..n {
            let left_isolated = k == 0 || mz_array[k] - mz_array[k - 1] > self.max_gap;
            let right_isolated = k + 1 == n || mz_array[k + 1] - mz_array[k] > self.max_gap;
            if left_isolated && right_isolated {
                if let Some(bin) = self.bin_of(mz_array[k]) {
                    if self.mz_grid[bin] != mz_array[k] {
                        out[bin] += intensity_array[k];
                    }
                }
            }
        }
        Ok(())
    }

    /// Allocate a new intensity array and [`Resampler::resample_into`] it
    pub fn resample(&self, pair: &ArrayPair<'_>) -> Result<Vec<f32>, ResampleError> {
        let mut out = self.create_intensity_array();
        self.resample_into(pair, &mut out)?;
        Ok(out)
    }

    /// Accumulate every raw sample onto its nearest grid point without interpolation.
    pub fn zero_order(&self, pair: &ArrayPair<'_>) -> Result<Vec<f32>, ResampleError> {
        self.validate(pair)?;
        let mut out = self.create_intensity_array();
        for (mz, inten) in pair.iter() {
            if mz < self.mz_start || mz >= self.mz_end {
                continue;
            }
            if let Some(bin) = self.bin_of(mz) {
                out[bin] += inten;
            }
        }
        Ok(out)
    }

    /// Produce both the interpolated vector and its zero-order companion
    pub fn resample_with_companion(
        &self,
        pair: &ArrayPair<'_>,
    ) -> Result<(Vec<f32>, Vec<f32>), ResampleError> {
        let resampled = self.resample(pair)?;
        let companion = self.zero_order(pair)?;
        Ok((resampled, companion))
    }

    fn resample_rows(&self, spectra: &[&ArrayPair<'_>]) -> Result<Vec<Vec<f32>>, ResampleError> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "parallelism")] {
                spectra.par_iter().map(|s| self.resample(s)).collect()
            } else {
                spectra.iter().map(|s| self.resample(s)).collect()
            }
        }
    }

    /// Resample each spectrum in `spectra` as one row of a [`ResampledMatrix`].
    ///
    /// When `with_companion` is set, the zero-order companion matrix is built too.
    pub fn resample_matrix(
        &self,
        spectra: &[&ArrayPair<'_>],
        with_companion: bool,
    ) -> Result<ResampledMatrix, ResampleError> {
        if self.mz_grid.is_empty() {
            return Err(ResampleError::EmptyRange {
                start: self.mz_start,
                end: self.mz_end,
            });
        }
        let cols = self.mz_grid.len();
        let rows = self.resample_rows(spectra)?;
        let intensities = if rows.is_empty() {
            Matrix::new(0, cols)
        } else {
            Matrix::from_rows(rows)
        };
        let companion = if with_companion {
            let rows: Vec<Vec<f32>> = spectra
                .iter()
                .map(|s| self.zero_order(s))
                .collect::<Result<_, _>>()?;
            Some(if rows.is_empty() {
                Matrix::new(0, cols)
            } else {
                Matrix::from_rows(rows)
            })
        } else {
            None
        };
        Ok(ResampledMatrix {
            intensities,
            companion,
            mz_start: self.mz_start,
            bins_per_dalton: self.bins_per_dalton,
        })
    }
}

impl MZGrid for Resampler {
    fn mz_grid(&self) -> &[f64] {
        &self.mz_grid
    }
}

impl MZInterpolator for Resampler {}

fn nearest_bin(mz_start: f64, bins_per_dalton: f64, n_bins: usize, mz: f64) -> Option<usize> {
    let offset = ((mz - mz_start) * bins_per_dalton).round();
    if offset < 0.0 || offset as usize >= n_bins {
        None
    } else {
        Some(offset as usize)
    }
}

/// A dense scan × m/z bin intensity surface for one window of a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResampledMatrix {
    /// One row per scan, one column per grid point
    pub intensities: Matrix<f32>,
    /// The zero-order companion surface, when requested
    pub companion: Option<Matrix<f32>>,
    pub mz_start: f64,
    pub bins_per_dalton: f64,
}

impl ResampledMatrix {
    pub fn n_scans(&self) -> usize {
        self.intensities.rows()
    }

    pub fn n_bins(&self) -> usize {
        self.intensities.cols()
    }

    pub fn bin_width(&self) -> f64 {
        1.0 / self.bins_per_dalton
    }

    pub fn mz_at(&self, bin: usize) -> f64 {
        self.mz_start + bin as f64 / self.bins_per_dalton
    }

    /// Like [`ResampledMatrix::mz_at`], but for fractional bin positions
    pub fn mz_at_fractional(&self, bin: f64) -> f64 {
        self.mz_start + bin / self.bins_per_dalton
    }

    pub fn bin_of(&self, mz: f64) -> Option<usize> {
        nearest_bin(self.mz_start, self.bins_per_dalton, self.n_bins(), mz)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_grid_alignment() {
        let resampler = Resampler::new(500.2, 501.7, 36.0);
        assert_eq!(resampler.mz_start, 499.0);
        assert_eq!(resampler.mz_end, 503.0);
        assert_eq!(resampler.len(), 144);
        let bin = resampler.bin_of(500.5).unwrap();
        assert_eq!(resampler.mz_grid[bin], 500.5);
        assert_eq!(resampler.mz_at(bin), 500.5);
    }

    #[test]
    fn test_resample_native_grid_is_identity() {
        let resampler = Resampler::new(100.0, 110.0, 10.0);
        let mz_array = resampler.mz_grid.clone();
        let intensity_array: Vec<f32> = mz_array
            .iter()
            .map(|mz| ((mz - 105.0) * 3.0).sin().abs() as f32 * 100.0)
            .collect();
        let pair = ArrayPair::wrap(&mz_array, &intensity_array);
        let yhat = resampler.resample(&pair).unwrap();
        for (a, b) in yhat.iter().zip(intensity_array.iter()) {
            assert!((a - b).abs() < 1e-4, "{a} != {b}");
        }
    }

    #[test]
    fn test_linear_interpolation() {
        let resampler = Resampler::new(100.0, 101.0, 4.0);
        let mz_array = vec![100.1, 100.4];
        let intensity_array = vec![10.0f32, 40.0];
        let pair = ArrayPair::wrap(&mz_array, &intensity_array);
        let yhat = resampler.resample(&pair).unwrap();
        let bin = resampler.bin_of(100.25).unwrap();
        assert!((yhat[bin] - 25.0).abs() < 1e-4);
        assert_eq!(yhat[resampler.bin_of(100.0).unwrap()], 0.0);
        assert_eq!(yhat[resampler.bin_of(100.5).unwrap()], 0.0);
    }

    #[test]
    fn test_isolated_centroids_accumulate() {
        let resampler = Resampler::new(100.0, 110.0, 36.0);
        let mz_array = vec![101.001, 105.499];
        let intensity_array = vec![50.0f32, 70.0];
        let pair = ArrayPair::wrap(&mz_array, &intensity_array);
        let yhat = resampler.resample(&pair).unwrap();
        assert_eq!(yhat[resampler.bin_of(101.0).unwrap()], 50.0);
        assert_eq!(yhat[resampler.bin_of(105.5).unwrap()], 70.0);
        assert!((yhat.iter().sum::<f32>() - 120.0).abs() < 1e-3);
    }

    #[test]
    fn test_companion() {
        let resampler = Resampler::new(100.0, 101.0, 10.0);
        let mz_array = vec![100.0, 100.04, 100.08];
        let intensity_array = vec![1.0f32, 2.0, 3.0];
        let pair = ArrayPair::wrap(&mz_array, &intensity_array);
        let (yhat, zero) = resampler.resample_with_companion(&pair).unwrap();
        assert_eq!(yhat.len(), zero.len());
        assert_eq!(zero[resampler.bin_of(100.0).unwrap()], 3.0);
        assert_eq!(zero[resampler.bin_of(100.1).unwrap()], 3.0);
    }

    #[test]
    fn test_unsorted_is_an_error() {
        let resampler = Resampler::new(100.0, 101.0, 10.0);
        let mz_array = vec![100.5, 100.1];
        let intensity_array = vec![1.0f32, 2.0];
        let pair = ArrayPair::wrap(&mz_array, &intensity_array);
        assert_eq!(resampler.resample(&pair), Err(ResampleError::MZNotSorted));

        let intensity_array = vec![1.0f32];
        let mz_array = vec![100.1, 100.5];
        let pair = ArrayPair::wrap(&mz_array, &intensity_array);
        assert!(matches!(
            resampler.resample(&pair),
            Err(ResampleError::MZIntensityMismatch { .. })
        ));
    }

    #[test]
    fn test_matrix() {
        let resampler = Resampler::new(100.0, 101.0, 10.0);
        let mz_array = vec![100.0, 100.05, 100.1];
        let intensity_array = vec![1.0f32, 2.0, 3.0];
        let pair = ArrayPair::wrap(&mz_array, &intensity_array);
        let matrix = resampler.resample_matrix(&[&pair, &pair], true).unwrap();
        assert_eq!(matrix.n_scans(), 2);
        assert_eq!(matrix.n_bins(), resampler.len());
        assert!(matrix.companion.is_some());
        assert_eq!(matrix.mz_at(5), resampler.mz_at(5));
    }
}
