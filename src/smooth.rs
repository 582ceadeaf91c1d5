//! Low-pass filters applied to the rows and columns of an intensity surface, and the
//! moving averages used to lightly smooth the background estimate.
use std::collections::VecDeque;
use std::fmt::Debug;
use std::f64::consts::PI;
use std::ops::{AddAssign, SubAssign};

use num_traits::Float;
use rustfft::{num_complex::Complex, FftPlanner};

use crate::arrayops::{median_inplace, Matrix};
use crate::config::{LowPassKind, SmoothingParams};

#[derive(Debug, Clone)]
struct RingBuffer<F: Float + AddAssign> {
    buffer: VecDeque<F>,
}

impl<F: Float + AddAssign> RingBuffer<F> {
    pub fn new(capacity: usize) -> Self {
        let mut buffer = VecDeque::with_capacity(capacity);
        buffer.extend((0..capacity).map(|_| F::zero()));
        Self { buffer }
    }

    pub fn add(&mut self, value: F) -> Option<F> {
        let first = self.buffer.pop_front();
        self.buffer.push_back(value);
        first
    }
}

/// A trailing average over the last `width` values
#[derive(Debug, Clone)]
struct MovingAverage<F: Float + AddAssign + SubAssign> {
    buffer: RingBuffer<F>,
    running_sum: F,
    count: usize,
    width: usize,
}

impl<F: Float + AddAssign + SubAssign> MovingAverage<F> {
    pub fn new(width: usize) -> Self {
        let width = width.max(1);
        Self {
            buffer: RingBuffer::new(width),
            running_sum: F::zero(),
            count: 0,
            width,
        }
    }

    pub fn add(&mut self, value: F) {
        self.running_sum += value;
        if let Some(last_value) = self.buffer.add(value) {
            self.running_sum -= last_value
        };
        self.count = (self.count + 1).min(self.width);
    }

    pub fn average(&self) -> F {
        self.running_sum / F::from(self.count.max(1)).unwrap_or_else(F::one)
    }
}

/// A moving average of `xdata` over `2 * half_width + 1` points centered on each point.
///
/// The ends are padded by repeating the edge values so the output has the same length
/// as the input and constant signals are preserved exactly.
pub fn centered_moving_average<F: Float + AddAssign + SubAssign>(
    xdata: &[F],
    half_width: usize,
) -> Vec<F> {
    let n = xdata.len();
    if n == 0 || half_width == 0 {
        return xdata.to_vec();
    }
    let first = xdata[0];
    let last = xdata[n - 1];
    let padded = std::iter::repeat(first)
        .take(half_width)
        .chain(xdata.iter().copied())
        .chain(std::iter::repeat(last).take(half_width));
    let width = 2 * half_width + 1;
    let mut state = MovingAverage::new(width);
    let mut out = Vec::with_capacity(n);
    for (i, x) in padded.enumerate() {
        state.add(x);
        if i + 1 >= width {
            out.push(state.average());
        }
    }
    out
}

/// A one dimensional low-pass filter applied to every row or column of a surface
pub trait LowPassFilter: Debug + Send + Sync {
    /// Filter each of `lanes` in place. All lanes have the same length.
    fn filter_lanes(&self, lanes: &mut [Vec<f32>]);

    fn filter(&self, signal: &[f32]) -> Vec<f32> {
        let mut lanes = vec![signal.to_vec()];
        self.filter_lanes(&mut lanes);
        lanes.pop().unwrap_or_default()
    }
}

/// Leaves its input untouched
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityFilter;

impl LowPassFilter for IdentityFilter {
    fn filter_lanes(&self, _lanes: &mut [Vec<f32>]) {}
}

/// A Gaussian low-pass applied in the frequency domain.
///
/// Each lane is zero-padded by four standard deviations on either side before the
/// transform so the circular convolution does not wrap the ends into one another.
#[derive(Debug, Clone, Copy)]
pub struct FftLowPass {
    /// The standard deviation of the equivalent Gaussian kernel in samples
    pub sigma: f64,
}

impl FftLowPass {
    pub fn new(sigma: f64) -> Self {
        Self { sigma }
    }

    fn transfer(&self, n: usize) -> Vec<f64> {
        let scale = 2.0 * PI * PI * self.sigma * self.sigma;
        (0..n)
            .map(|k| {
                let f = k.min(n - k) as f64 / n as f64;
                (-scale * f * f).exp()
            })
            .collect()
    }
}

impl LowPassFilter for FftLowPass {
    fn filter_lanes(&self, lanes: &mut [Vec<f32>]) {
        let n = match lanes.first() {
            Some(lane) => lane.len(),
            None => return,
        };
        if n == 0 || !(self.sigma > 0.0) {
            return;
        }
        let pad = (4.0 * self.sigma).ceil() as usize + 1;
        let size = n + 2 * pad;

        let mut planner = FftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let gain = self.transfer(size);
        let norm = size as f64;

        let mut buffer = vec![Complex::new(0.0, 0.0); size];
        for lane in lanes.iter_mut() {
            debug_assert_eq!(lane.len(), n);
            buffer.iter_mut().for_each(|c| *c = Complex::new(0.0, 0.0));
            for (c, v) in buffer.iter_mut().zip(lane.iter()) {
                c.re = *v as f64;
            }
            forward.process(&mut buffer);
            for (c, g) in buffer.iter_mut().zip(gain.iter()) {
                *c *= *g;
            }
            inverse.process(&mut buffer);
            for (v, c) in lane.iter_mut().zip(buffer.iter()) {
                *v = (c.re / norm) as f32;
            }
        }
    }
}

/// An à trous multiresolution low-pass.
///
/// Each level splits the current approximation with a dilated `[1, 2, 1] / 4` kernel
/// into a coarser approximation and a detail band. Detail coefficients whose magnitude
/// is below `threshold` times the band's robust noise deviation are discarded and the
/// remainder is added back onto the coarsest approximation.
#[derive(Debug, Clone, Copy)]
pub struct WaveletLowPass {
    pub levels: usize,
    pub threshold: f32,
}

impl WaveletLowPass {
    pub fn new(levels: usize, threshold: f32) -> Self {
        Self { levels, threshold }
    }

    fn smooth_level(signal: &[f32], step: usize) -> Vec<f32> {
        let n = signal.len() as isize;
        let step = step as isize;
        let at = |i: isize| -> f32 {
            // Mirror at the boundaries
            let mut i = i;
            if i < 0 {
                i = -i;
            }
            if i >= n {
                i = 2 * (n - 1) - i;
            }
            signal[i.clamp(0, n - 1) as usize]
        };
        (0..n)
            .map(|i| 0.25 * at(i - step) + 0.5 * at(i) + 0.25 * at(i + step))
            .collect()
    }

    pub fn filter_one(&self, signal: &mut [f32]) {
        if signal.len() < 3 || self.levels == 0 {
            return;
        }
        let mut approx = signal.to_vec();
        let mut kept = vec![0.0f32; signal.len()];
        for level in 0..self.levels {
            let coarse = Self::smooth_level(&approx, 1 << level);
            let mut detail: Vec<f32> = approx.iter().zip(coarse.iter()).map(|(a, c)| a - c).collect();
            let mut magnitudes: Vec<f32> = detail.iter().map(|d| d.abs()).collect();
            let noise = median_inplace(&mut magnitudes) / 0.6745;
            let cutoff = self.threshold * noise;
            for (k, d) in kept.iter_mut().zip(detail.iter_mut()) {
                if d.abs() > cutoff {
                    *k += *d;
                }
            }
            approx = coarse;
        }
        for ((v, a), k) in signal.iter_mut().zip(approx.iter()).zip(kept.iter()) {
            *v = a + k;
        }
    }
}

impl LowPassFilter for WaveletLowPass {
    fn filter_lanes(&self, lanes: &mut [Vec<f32>]) {
        for lane in lanes.iter_mut() {
            self.filter_one(lane);
        }
    }
}

/// Low-pass `lanes` with `filter`, then rescale each lane so its tallest point is as
/// tall as the tallest point of the input lane
fn filter_preserving_height(filter: &dyn LowPassFilter, lanes: &mut [Vec<f32>]) {
    let heights: Vec<f32> = lanes
        .iter()
        .map(|lane| lane.iter().copied().fold(0.0f32, f32::max))
        .collect();
    filter.filter_lanes(lanes);
    for (lane, height) in lanes.iter_mut().zip(heights) {
        let top = lane.iter().copied().fold(0.0f32, f32::max);
        if height > 0.0 && top > 0.0 {
            let scale = height / top;
            lane.iter_mut().for_each(|v| *v *= scale);
        }
    }
}

/// Smooths a scan-by-bin surface along both of its axes.
///
/// The low-pass attenuates the apex of a peak, so every smoothed row and column is
/// rescaled to keep the height of its tallest point. The smoothed value at a peak's
/// apex then stays comparable with the unsmoothed signal around it.
#[derive(Debug)]
pub struct Smoother {
    pub elution: Box<dyn LowPassFilter>,
    pub mz: Box<dyn LowPassFilter>,
}

impl Smoother {
    pub fn new(elution: Box<dyn LowPassFilter>, mz: Box<dyn LowPassFilter>) -> Self {
        Self { elution, mz }
    }

    pub fn from_params(params: &SmoothingParams) -> Self {
        let build = |width: f64| -> Box<dyn LowPassFilter> {
            if !(width > 0.0) {
                return Box::new(IdentityFilter);
            }
            match params.kind {
                LowPassKind::Fft => Box::new(FftLowPass::new(width)),
                LowPassKind::Wavelet => Box::new(WaveletLowPass::new(
                    params.wavelet_levels,
                    params.wavelet_threshold,
                )),
            }
        };
        Self::new(build(params.elution_width), build(params.mz_width))
    }

    /// Smooth each column of `surface` along the elution axis, then each row along m/z
    pub fn smooth(&self, surface: &Matrix<f32>) -> Matrix<f32> {
        let (n_scans, n_bins) = surface.shape();
        if n_scans == 0 || n_bins == 0 {
            return surface.clone();
        }
        let mut columns: Vec<Vec<f32>> = (0..n_bins).map(|j| surface.column(j)).collect();
        filter_preserving_height(self.elution.as_ref(), &mut columns);

        let mut out = Matrix::new(n_scans, n_bins);
        for (j, col) in columns.iter().enumerate() {
            out.set_column(j, col);
        }
        let mut rows: Vec<Vec<f32>> = out.rows_iter().map(|r| r.to_vec()).collect();
        filter_preserving_height(self.mz.as_ref(), &mut rows);
        for (i, row) in rows.into_iter().enumerate() {
            out.row_mut(i).copy_from_slice(&row);
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn gaussian(n: usize, center: f64, sigma: f64) -> Vec<f32> {
        (0..n)
            .map(|i| {
                let d = (i as f64 - center) / sigma;
                (100.0 * (-0.5 * d * d).exp()) as f32
            })
            .collect()
    }

    #[test]
    fn test_centered_moving_average() {
        let data = [1.0f32, 2.0, 3.0, 4.0];
        let centered = centered_moving_average(&data, 1);
        assert_eq!(centered.len(), 4);
        assert!((centered[0] - 4.0 / 3.0).abs() < 1e-6);
        assert!((centered[1] - 2.0).abs() < 1e-6);
        assert!((centered[3] - 11.0 / 3.0).abs() < 1e-6);

        let flat = centered_moving_average(&[5.0f64; 7], 2);
        assert!(flat.iter().all(|v| (*v - 5.0).abs() < 1e-12));
    }

    #[test]
    fn test_fft_low_pass_preserves_area_and_apex() {
        let signal = gaussian(64, 32.0, 3.0);
        let filtered = FftLowPass::new(1.0).filter(&signal);
        let total_in: f32 = signal.iter().sum();
        let total_out: f32 = filtered.iter().sum();
        assert!((total_in - total_out).abs() / total_in < 1e-3);

        let apex = filtered
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(apex, 32);
        assert!(filtered[32] < signal[32]);
        // A Gaussian convolved with a Gaussian widens in quadrature
        let expected = 100.0 * 3.0 / (10.0f32).sqrt();
        assert!((filtered[32] - expected).abs() < 0.5, "{}", filtered[32]);
    }

    #[test]
    fn test_fft_low_pass_removes_alternation() {
        let signal: Vec<f32> = (0..32).map(|i| if i % 2 == 0 { 10.0 } else { 0.0 }).collect();
        let filtered = FftLowPass::new(2.0).filter(&signal);
        for v in &filtered[8..24] {
            assert!((v - 5.0).abs() < 0.1, "{v}");
        }
    }

    #[test]
    fn test_wavelet_low_pass() {
        let mut signal = gaussian(64, 20.0, 4.0);
        for (i, v) in signal.iter_mut().enumerate() {
            *v += if i % 2 == 0 { 0.5 } else { -0.5 };
        }
        let filtered = WaveletLowPass::new(2, 3.0).filter(&signal);
        let apex = filtered
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(apex, 20);
        let tail_noise: f32 = filtered[50..].iter().map(|v| v.abs()).sum::<f32>() / 14.0;
        assert!(tail_noise < 0.25, "{tail_noise}");
    }

    #[test]
    fn test_smoother_surface() {
        let mut surface = Matrix::<f32>::new(21, 41);
        surface[(10, 20)] = 100.0;
        let smoother = Smoother::from_params(&SmoothingParams::default());
        let smoothed = smoother.smooth(&surface);
        assert_eq!(smoothed.shape(), (21, 41));
        let apex = smoothed[(10, 20)];
        assert!((apex - 100.0).abs() < 1e-3, "{apex}");
        assert!(smoothed[(9, 20)] < apex);
        assert!(smoothed[(10, 21)] < apex);
        assert!((smoothed[(9, 20)] - smoothed[(11, 20)]).abs() < 1e-3);
    }
}
