//! The parameters controlling every stage of feature finding.
//!
//! A [`FeatureFinderConfig`] is built once, validated, and then shared by reference with
//! each component. The defaults reproduce the reference tuning of the algorithm; the
//! search radii and score cutoffs in particular are empirical and may need re-tuning for
//! instruments with very different resolution.
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::feature::FeatureFilter;

/// The low-pass strategy used to smooth the intensity surface
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LowPassKind {
    /// A Gaussian low-pass applied in the frequency domain
    #[default]
    Fft,
    /// An à trous multiresolution decomposition whose detail coefficients are thresholded
    Wavelet,
}

/// The peak detection strategy used to produce candidate peaks for clustering
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DetectorKind {
    /// Report every 2D local maximum of the smoothed surface
    #[default]
    Maxima2D,
    /// Report the collapsed intersections of 1D edge maps along each axis
    GrossEdges,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ResampleParams {
    /// Samples per Dalton on the uniform m/z grid
    pub bins_per_dalton: f64,
    /// Padding added to each side of the analysed m/z range, at least 0.5 Da
    pub mz_padding: f64,
    /// The widest gap, in grid points, that is linearly interpolated across
    pub max_gap_bins: f64,
    /// Build the zero-order companion surface as well
    pub companion: bool,
}

impl Default for ResampleParams {
    fn default() -> Self {
        Self {
            bins_per_dalton: 36.0,
            mz_padding: 1.0,
            max_gap_bins: 2.0,
            companion: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SmoothingParams {
    pub kind: LowPassKind,
    /// The smoothing width along the elution axis, in scans. Zero disables it.
    pub elution_width: f64,
    /// The smoothing width along the m/z axis, in grid points. Zero disables it.
    pub mz_width: f64,
    /// The number of decomposition levels for [`LowPassKind::Wavelet`]
    pub wavelet_levels: usize,
    /// Detail coefficients smaller than this many noise deviations are discarded
    pub wavelet_threshold: f32,
}

impl Default for SmoothingParams {
    fn default() -> Self {
        Self {
            kind: LowPassKind::Fft,
            elution_width: 1.0,
            mz_width: 0.5,
            wavelet_levels: 2,
            wavelet_threshold: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BackgroundParams {
    /// The number of dense samples expected per charge state in each neighborhood
    pub top_k_per_charge: usize,
    /// The width of a background neighborhood in Daltons
    pub neighborhood: f64,
    /// How many times the background surface is lightly smoothed, 1 or 2
    pub passes: usize,
    /// The median window along the m/z axis, in grid points
    pub median_span_mz: usize,
    /// The median window along the elution axis, in scans
    pub median_span_scans: usize,
}

impl Default for BackgroundParams {
    fn default() -> Self {
        Self {
            top_k_per_charge: 1,
            neighborhood: 1.0,
            passes: 1,
            median_span_mz: 73,
            median_span_scans: 9,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DetectorParams {
    pub kind: DetectorKind,
    /// Peaks must be strictly more intense than this. May be `-inf`.
    pub min_intensity: f32,
    /// Peaks must be at least this multiple of their local median
    pub median_factor: f32,
    /// Peaks must be more intense than this fraction of the most intense point of
    /// their window
    pub relative_floor: f32,
    /// The level of the Haar transform applied to each trace by the edge detector
    pub haar_level: u32,
    /// The multiple of the trace median subtracted before searching for crossings
    pub edge_threshold: f32,
    /// A rise must peak above this multiple of the trace median to count
    pub edge_min_factor: f32,
    /// Half-widths (scans, bins) of the dilation applied to the elution edge map
    pub elution_dilation: (usize, usize),
    /// Half-widths (scans, bins) of the dilation applied to the m/z edge map
    pub mz_dilation: (usize, usize),
    pub min_elution_count: u32,
    pub min_mz_count: u32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            kind: DetectorKind::Maxima2D,
            min_intensity: 0.0,
            median_factor: 0.0,
            relative_floor: 1e-4,
            haar_level: 1,
            edge_threshold: 1.0,
            edge_min_factor: 1.0,
            elution_dilation: (1, 2),
            mz_dilation: (2, 1),
            min_elution_count: 1,
            min_mz_count: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClusterParams {
    pub max_charge: i32,
    /// Scans either side of an anchor searched for envelope members
    pub scan_radius: usize,
    /// Daltons below the anchor searched for a leading peak
    pub mz_before: f64,
    /// Daltons above the anchor searched for envelope members
    pub mz_after: f64,
    /// A leading peak must be at least this fraction of the anchor's intensity
    pub min_lead_ratio: f32,
    /// The number of isotope slots compared against the theoretical pattern
    pub isotope_slots: usize,
    /// The tolerance on `distance * charge` being integral. Derived from the
    /// resampling resolution when absent.
    pub distance_tolerance: Option<f64>,
    /// The slot search tolerance, as a multiple of the distance tolerance
    pub slot_tolerance_factor: f64,
    /// Candidates scoring worse than the best by more than this are discarded
    pub divergence_cutoff: f32,
    /// Slots count towards the peak count when above this fraction of the envelope maximum
    pub peak_count_fraction: f32,
    /// ...and above this multiple of the local median
    pub peak_count_median_factor: f32,
    /// A slot more intense than this multiple of its predicted intensity truncates the envelope
    pub anomaly_factor: f32,
    /// Missing slots are assigned this fraction of the envelope maximum before normalization
    pub missing_slot_floor: f32,
    /// Envelopes with fewer matched slots than this are not isotope candidates
    pub min_matched_slots: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            max_charge: 6,
            scan_radius: 9,
            mz_before: 2.1,
            mz_after: 6.1,
            min_lead_ratio: 0.1,
            isotope_slots: 6,
            distance_tolerance: None,
            slot_tolerance_factor: 2.5,
            divergence_cutoff: 0.5,
            peak_count_fraction: 0.05,
            peak_count_median_factor: 2.0,
            anomaly_factor: 3.0,
            missing_slot_floor: 0.001,
            min_matched_slots: 2,
        }
    }
}

impl ClusterParams {
    /// The tolerance on the fractional part of `distance * charge` for a grid with
    /// `bins_per_dalton` resolution
    pub fn distance_tolerance_for(&self, bins_per_dalton: f64) -> f64 {
        self.distance_tolerance
            .unwrap_or_else(|| 2.0 / (bins_per_dalton - 1.0).max(1.0))
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WindowParams {
    /// The number of scans in each window, margins included
    pub width: usize,
    /// The number of scans at each end of a window whose features are left to the
    /// neighboring window
    pub margin: usize,
}

impl Default for WindowParams {
    fn default() -> Self {
        Self {
            width: 256,
            margin: 32,
        }
    }
}

impl WindowParams {
    /// The distance between the starts of consecutive windows
    pub fn step(&self) -> usize {
        self.width.saturating_sub(2 * self.margin).max(1)
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RefineParams {
    /// The number of scans examined around each feature. Zero disables refinement.
    pub scans: usize,
    /// The half-width of the search for raw centroids around each isotope slot, in Daltons
    pub centroid_window: f64,
    /// The half-width of the center-of-mass window for profile spectra, in Daltons
    pub profile_window: f64,
    /// The largest disagreement between the refined and observed m/z that is accepted
    pub ppm_tolerance: f64,
}

impl Default for RefineParams {
    fn default() -> Self {
        Self {
            scans: 3,
            centroid_window: 0.05,
            profile_window: 0.05,
            ppm_tolerance: 5.0,
        }
    }
}

/// Ways a configuration can be inconsistent
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("The resampling resolution must be positive, received {0}")]
    InvalidResolution(f64),
    #[error("The window width {width} must exceed twice the margin {margin}")]
    WindowTooNarrow { width: usize, margin: usize },
    #[error("The maximum charge must be at least 1, received {0}")]
    InvalidCharge(i32),
    #[error("At least one isotope slot is required")]
    NoIsotopeSlots,
    #[error("The background must be smoothed once or twice, received {0} passes")]
    InvalidBackgroundPasses(usize),
}

/// Every parameter of the feature finding pipeline
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FeatureFinderConfig {
    pub resample: ResampleParams,
    pub smoothing: SmoothingParams,
    pub background: BackgroundParams,
    pub detector: DetectorParams,
    pub cluster: ClusterParams,
    pub window: WindowParams,
    pub refine: RefineParams,
    pub filter: FeatureFilter,
    /// A feature's elution extent continues while its anchor trace stays above this
    /// fraction of the apex
    pub extent_fraction: f32,
}

impl Default for FeatureFinderConfig {
    fn default() -> Self {
        Self {
            resample: ResampleParams::default(),
            smoothing: SmoothingParams::default(),
            background: BackgroundParams::default(),
            detector: DetectorParams::default(),
            cluster: ClusterParams::default(),
            window: WindowParams::default(),
            refine: RefineParams::default(),
            filter: FeatureFilter::default(),
            extent_fraction: 0.05,
        }
    }
}

impl FeatureFinderConfig {
    pub fn builder() -> FeatureFinderConfigBuilder {
        FeatureFinderConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.resample.bins_per_dalton > 1.0) {
            return Err(ConfigurationError::InvalidResolution(
                self.resample.bins_per_dalton,
            ));
        }
        if self.window.width <= 2 * self.window.margin {
            return Err(ConfigurationError::WindowTooNarrow {
                width: self.window.width,
                margin: self.window.margin,
            });
        }
        if self.cluster.max_charge < 1 {
            return Err(ConfigurationError::InvalidCharge(self.cluster.max_charge));
        }
        if self.cluster.isotope_slots == 0 {
            return Err(ConfigurationError::NoIsotopeSlots);
        }
        if !(1..=2).contains(&self.background.passes) {
            return Err(ConfigurationError::InvalidBackgroundPasses(
                self.background.passes,
            ));
        }
        Ok(())
    }
}

/// A builder for configuring [`FeatureFinderConfig`]
#[derive(Debug, Clone, Default)]
pub struct FeatureFinderConfigBuilder {
    config: FeatureFinderConfig,
}

impl FeatureFinderConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bins_per_dalton(&mut self, bins_per_dalton: f64) -> &mut Self {
        self.config.resample.bins_per_dalton = bins_per_dalton;
        self
    }

    pub fn window(&mut self, width: usize, margin: usize) -> &mut Self {
        self.config.window = WindowParams { width, margin };
        self
    }

    pub fn max_charge(&mut self, max_charge: i32) -> &mut Self {
        self.config.cluster.max_charge = max_charge;
        self
    }

    pub fn low_pass(&mut self, kind: LowPassKind) -> &mut Self {
        self.config.smoothing.kind = kind;
        self
    }

    pub fn detector(&mut self, kind: DetectorKind) -> &mut Self {
        self.config.detector.kind = kind;
        self
    }

    pub fn min_intensity(&mut self, min_intensity: f32) -> &mut Self {
        self.config.detector.min_intensity = min_intensity;
        self
    }

    pub fn accurate_mass_scans(&mut self, scans: usize) -> &mut Self {
        self.config.refine.scans = scans;
        self
    }

    pub fn filter(&mut self, filter: FeatureFilter) -> &mut Self {
        self.config.filter = filter;
        self
    }

    pub fn build(&self) -> Result<FeatureFinderConfig, ConfigurationError> {
        self.config.validate()?;
        Ok(self.config.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = FeatureFinderConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.window.step(), 192);
        let tol = config.cluster.distance_tolerance_for(config.resample.bins_per_dalton);
        assert!((tol - 2.0 / 35.0).abs() < 1e-12);
    }

    #[test]
    fn test_builder_validation() {
        let err = FeatureFinderConfig::builder().window(64, 32).build();
        assert_eq!(
            err,
            Err(ConfigurationError::WindowTooNarrow {
                width: 64,
                margin: 32
            })
        );
        let config = FeatureFinderConfig::builder()
            .window(40, 8)
            .max_charge(4)
            .build()
            .unwrap();
        assert_eq!(config.window.step(), 24);
        assert_eq!(config.cluster.max_charge, 4);
        assert!(FeatureFinderConfig::builder().max_charge(0).build().is_err());
    }
}
