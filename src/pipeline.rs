//! The per-window feature finding pipeline.
//!
//! A window of scans passes through four stages: resampling onto a uniform grid,
//! smoothing and background separation, peak detection and isotope clustering.
//! [`FeatureStrategy`] names those stages so alternative implementations can be
//! composed, and [`Pipeline`] assembles the standard components selected by a
//! [`FeatureFinderConfig`].
use log::debug;

use crate::arrayops::{trapz, ArrayPair};
use crate::background::{BackgroundEstimator, SmoothedSurface};
use crate::cluster::{ClusterResult, IsotopeClusterer};
use crate::config::{DetectorKind, FeatureFinderConfig};
use crate::feature::Feature;
use crate::maxima::{EdgeDetector, MaximaDetector, PeakDetector};
use crate::peak::Peak;
use crate::resample::{ResampleError, ResampledMatrix, Resampler};
use crate::smooth::Smoother;

/// The features found in one window, with scans relative to the window
#[derive(Debug, Clone, Default)]
pub struct WindowResult {
    pub features: Vec<Feature>,
    /// The number of peaks the detector reported
    pub peak_count: usize,
    /// The number of peaks no feature explained
    pub unexplained_count: usize,
}

/// The stages of processing a window of scans into features
pub trait FeatureStrategy: Send + Sync {
    fn resample(&self, spectra: &[&ArrayPair<'_>]) -> Result<ResampledMatrix, ResampleError>;

    fn smooth(&self, matrix: &ResampledMatrix) -> SmoothedSurface;

    fn detect_peaks(&self, surface: &SmoothedSurface, matrix: &ResampledMatrix) -> Vec<Peak>;

    fn cluster(&self, peaks: Vec<Peak>) -> ClusterResult;

    /// Fill in the elution extent and integrated intensity of `features`. `times` holds
    /// the retention time of each scan of the window.
    fn measure(&self, _features: &mut [Feature], _surface: &SmoothedSurface, _times: &[f64]) {}

    /// Run every stage over one window of spectra
    fn process_window(&self, spectra: &[&ArrayPair<'_>], times: &[f64]) -> Result<WindowResult, ResampleError> {
        let matrix = self.resample(spectra)?;
        if matrix.n_scans() == 0 || matrix.n_bins() == 0 {
            return Ok(WindowResult::default());
        }
        let surface = self.smooth(&matrix);
        let peaks = self.detect_peaks(&surface, &matrix);
        let peak_count = peaks.len();
        let result = self.cluster(peaks);
        let unexplained_count = result.ownership.unclaimed().count();
        let mut features = result.features;
        self.measure(&mut features, &surface, times);
        debug!(
            "Window of {} scans produced {peak_count} peaks and {} features",
            matrix.n_scans(),
            features.len()
        );
        Ok(WindowResult {
            features,
            peak_count,
            unexplained_count,
        })
    }
}

/// The standard composition of feature finding components
#[derive(Debug)]
pub struct Pipeline {
    pub resampler: Resampler,
    pub companion: bool,
    pub smoother: Smoother,
    pub background: BackgroundEstimator,
    pub detector: Box<dyn PeakDetector>,
    pub clusterer: IsotopeClusterer,
    pub extent_fraction: f32,
}

impl Pipeline {
    /// Assemble the components `config` selects for analysing `mz_range`
    pub fn from_config(config: &FeatureFinderConfig, mz_range: (f64, f64)) -> Self {
        let bins_per_dalton = config.resample.bins_per_dalton;
        let resampler = Resampler::with_padding(
            mz_range.0,
            mz_range.1,
            bins_per_dalton,
            config.resample.mz_padding,
            config.resample.max_gap_bins,
        );
        let detector: Box<dyn PeakDetector> = match config.detector.kind {
            DetectorKind::Maxima2D => Box::new(MaximaDetector::from_params(&config.detector)),
            DetectorKind::GrossEdges => Box::new(EdgeDetector::from_params(&config.detector)),
        };
        Self {
            resampler,
            companion: config.resample.companion,
            smoother: Smoother::from_params(&config.smoothing),
            background: BackgroundEstimator::new(
                &config.background,
                config.cluster.max_charge,
                bins_per_dalton,
            ),
            detector,
            clusterer: IsotopeClusterer::new(&config.cluster, bins_per_dalton),
            extent_fraction: config.extent_fraction,
        }
    }

    /// Walk the elution trace of `feature`'s leading peak out from its apex while it
    /// stays above the extent fraction, then integrate every comprised slot over it
    pub fn measure_extent(&self, feature: &mut Feature, surface: &SmoothedSurface, times: &[f64]) {
        let signal = &surface.signal;
        let (n_scans, n_bins) = signal.shape();
        let anchor = *feature.anchor();
        if anchor.scan >= n_scans || anchor.bin >= n_bins {
            return;
        }
        let apex = signal[(anchor.scan, anchor.bin)];
        let threshold = apex * self.extent_fraction;

        let mut first = anchor.scan;
        let mut last = anchor.scan;
        if apex > 0.0 {
            while first > 0 && signal[(first - 1, anchor.bin)] > threshold {
                first -= 1;
            }
            while last + 1 < n_scans && signal[(last + 1, anchor.bin)] > threshold {
                last += 1;
            }
        }
        feature.scan_first = first;
        feature.scan_last = last;

        let bins: Vec<usize> = feature
            .peaks()
            .map(|p| p.bin)
            .filter(|b| *b < n_bins)
            .collect();
        let trace: Vec<f32> = (first..=last)
            .map(|s| bins.iter().map(|b| signal[(s, *b)]).sum())
            .collect();
        feature.total_intensity = trace.iter().sum();
        feature.area = if times.len() >= last + 1 {
            trapz(&times[first..=last], &trace)
        } else {
            0.0
        };
    }
}

impl FeatureStrategy for Pipeline {
    fn resample(&self, spectra: &[&ArrayPair<'_>]) -> Result<ResampledMatrix, ResampleError> {
        self.resampler.resample_matrix(spectra, self.companion)
    }

    fn smooth(&self, matrix: &ResampledMatrix) -> SmoothedSurface {
        self.background.separate(&matrix.intensities, &self.smoother)
    }

    fn detect_peaks(&self, surface: &SmoothedSurface, matrix: &ResampledMatrix) -> Vec<Peak> {
        self.detector.detect(surface, matrix)
    }

    fn cluster(&self, peaks: Vec<Peak>) -> ClusterResult {
        self.clusterer.cluster(peaks)
    }

    fn measure(&self, features: &mut [Feature], surface: &SmoothedSurface, times: &[f64]) {
        for feature in features.iter_mut() {
            self.measure_extent(feature, surface, times);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn gaussian_scan(center: f64, scale: f32) -> (Vec<f64>, Vec<f32>) {
        let mz: Vec<f64> = (0..400).map(|i| 499.0 + i as f64 * 0.01).collect();
        let inten = mz
            .iter()
            .map(|x| scale * (-0.5 * ((x - center) / 0.02f64).powi(2)).exp() as f32)
            .collect();
        (mz, inten)
    }

    #[test]
    fn test_from_config() {
        let config = FeatureFinderConfig::default();
        let pipeline = Pipeline::from_config(&config, (500.0, 510.0));
        assert_eq!(pipeline.resampler.mz_start, 499.0);
        assert_eq!(pipeline.background.top_k, 6);
        assert!((pipeline.clusterer.distance_tolerance - 2.0 / 35.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_window() {
        let pipeline = Pipeline::from_config(&FeatureFinderConfig::default(), (500.0, 510.0));
        let result = pipeline.process_window(&[], &[]).unwrap();
        assert!(result.features.is_empty());
        assert_eq!(result.peak_count, 0);
    }

    #[test]
    fn test_singleton_extent() {
        let pipeline = Pipeline::from_config(&FeatureFinderConfig::default(), (500.0, 502.0));
        let arrays: Vec<(Vec<f64>, Vec<f32>)> = (0..15)
            .map(|s| {
                let d = (s as f64 - 7.0) / 2.0;
                gaussian_scan(500.3, (1000.0 * (-0.5 * d * d).exp()) as f32)
            })
            .collect();
        let pairs: Vec<ArrayPair> = arrays
            .iter()
            .map(|(mz, inten)| ArrayPair::wrap(mz, inten))
            .collect();
        let refs: Vec<&ArrayPair> = pairs.iter().collect();
        let times: Vec<f64> = (0..15).map(|i| i as f64 * 0.5).collect();
        let result = pipeline.process_window(&refs, &times).unwrap();
        assert_eq!(result.features.len(), 1, "{:?}", result.features);
        let f = &result.features[0];
        assert_eq!(f.charge, 0);
        assert_eq!(f.scan, 7);
        assert!((f.mz - 500.3).abs() < 0.01);
        assert!(f.scan_first < 7 && f.scan_last > 7);
        assert_eq!(7 - f.scan_first, f.scan_last - 7);
        assert!(f.total_intensity > f.intensity);
        assert!(f.area > 0.0);
    }
}
