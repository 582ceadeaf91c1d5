use std::cmp::Ordering;
use std::fmt;
use std::ops::Index;

use mzpeaks::{CoordinateLike, IntensityMeasurement, MZ};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::FeatureFinderConfig;
use crate::isotopes::neutral_mass;
use crate::peak::Peak;

/// The divergence assigned to features for which no isotope pattern was found
pub const NO_PATTERN_DIVERGENCE: f32 = f32::INFINITY;

/// A charge-resolved isotope envelope.
///
/// While a window is being processed `scan`, `scan_first` and `scan_last` are relative
/// to the window. The run driver translates them into run-level scan indices and fills
/// in the external scan numbers and retention times.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Feature {
    /// The representative scan of the envelope, that of its leading peak
    pub scan: usize,
    pub scan_number: u32,
    pub time: f64,
    /// The m/z of the leading, presumably monoisotopic, peak
    pub mz: f64,
    /// The charge state, or 0 when no isotope pattern was found
    pub charge: i32,
    pub intensity: f32,
    /// The symmetric KL divergence between the envelope and the theoretical isotope
    /// pattern. Lower is better.
    pub kl: f32,
    /// The number of well-supported isotope slots
    pub peak_count: usize,
    /// The peaks matched to each isotope slot. The first slot is always occupied.
    pub comprised: Vec<Option<Peak>>,
    /// The neutral mass implied by `mz` and `charge`
    pub mass: f64,
    pub background: f32,
    pub median: f32,
    pub scan_first: usize,
    pub scan_last: usize,
    pub scan_number_first: u32,
    pub scan_number_last: u32,
    pub time_first: f64,
    pub time_last: f64,
    /// The summed signal of the comprised slots over the elution extent
    pub total_intensity: f32,
    /// The integrated signal of the comprised slots over retention time
    pub area: f32,
    /// Whether `mz` was refined against the raw spectra
    pub accurate: bool,
    /// The runner-up explanations for the same anchor peak, kept for diagnostics
    pub next: Option<Box<Feature>>,
}

impl Feature {
    /// Create a feature for the envelope whose slots are `comprised`.
    ///
    /// # Panics
    /// If the first slot is empty
    pub fn new(mz: f64, charge: i32, kl: f32, comprised: Vec<Option<Peak>>) -> Self {
        let anchor = match comprised.first() {
            Some(Some(p)) => *p,
            _ => panic!("A feature's first isotope slot must be occupied"),
        };
        let mut feature = Self {
            scan: anchor.scan,
            mz,
            charge,
            intensity: anchor.intensity,
            kl,
            peak_count: 1,
            comprised,
            background: anchor.background,
            median: anchor.median,
            scan_first: anchor.scan,
            scan_last: anchor.scan,
            ..Default::default()
        };
        feature.update_mass();
        feature
    }

    /// A charge 0 feature for a peak which could not be placed in any envelope
    pub fn singleton(peak: Peak, slots: usize) -> Self {
        let mut comprised = vec![None; slots.max(1)];
        comprised[0] = Some(peak);
        Self::new(peak.mz, 0, NO_PATTERN_DIVERGENCE, comprised)
    }

    pub fn anchor(&self) -> &Peak {
        match self.comprised.first() {
            Some(Some(p)) => p,
            _ => panic!("A feature's first isotope slot must be occupied"),
        }
    }

    pub fn is_singleton(&self) -> bool {
        self.charge == 0
    }

    /// The number of occupied isotope slots
    pub fn matched_count(&self) -> usize {
        self.comprised.iter().filter(|p| p.is_some()).count()
    }

    pub fn peaks(&self) -> impl Iterator<Item = &Peak> {
        self.comprised.iter().flatten()
    }

    /// Recompute `mass` from `mz` and `charge`. Charge 0 features are treated as
    /// singly charged.
    pub fn update_mass(&mut self) {
        self.mass = neutral_mass(self.mz, self.charge.max(1));
    }

    /// The runner-up explanations of this feature's anchor, best first
    pub fn alternatives(&self) -> impl Iterator<Item = &Feature> {
        std::iter::successors(self.next.as_deref(), |f| f.next.as_deref())
    }

    /// The elution duration between the first and last scans
    pub fn duration(&self) -> f64 {
        self.time_last - self.time_first
    }

    /// The order features are reported in
    pub fn report_order(&self, other: &Self) -> Ordering {
        self.scan
            .cmp(&other.scan)
            .then_with(|| self.mz.total_cmp(&other.mz))
            .then_with(|| self.charge.cmp(&other.charge))
            .then_with(|| other.intensity.total_cmp(&self.intensity))
    }

    /// The rank used to choose between candidate envelopes, higher is better
    pub fn rank(&self) -> f32 {
        0.1 * self.peak_count as f32 - self.kl
    }
}

impl CoordinateLike<MZ> for Feature {
    #[inline]
    fn coordinate(&self) -> f64 {
        self.mz
    }
}

impl IntensityMeasurement for Feature {
    #[inline]
    fn intensity(&self) -> f32 {
        self.intensity
    }
}

impl PartialOrd for Feature {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.report_order(other))
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Feature({}, {:.4}, {}, {}, {:.4}, {})",
            self.scan_number, self.mz, self.charge, self.intensity, self.kl, self.peak_count
        )
    }
}

/// Restricts which features are reported
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FeatureFilter {
    pub min_charge: i32,
    pub max_charge: Option<i32>,
    /// The largest divergence accepted. Charge 0 features are only kept when unset.
    pub max_kl: Option<f32>,
    pub min_peaks: usize,
    pub min_intensity: f32,
}

impl Default for FeatureFilter {
    fn default() -> Self {
        Self {
            min_charge: 0,
            max_charge: None,
            max_kl: None,
            min_peaks: 0,
            min_intensity: 0.0,
        }
    }
}

impl FeatureFilter {
    pub fn accepts(&self, feature: &Feature) -> bool {
        feature.charge >= self.min_charge
            && self.max_charge.map_or(true, |z| feature.charge <= z)
            && self.max_kl.map_or(true, |kl| feature.kl <= kl)
            && feature.peak_count >= self.min_peaks
            && feature.intensity >= self.min_intensity
    }
}

/// How a [`FeatureSet`] was produced
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Provenance {
    pub algorithm: String,
    pub version: String,
    pub config: FeatureFinderConfig,
}

impl Provenance {
    pub fn new(config: FeatureFinderConfig) -> Self {
        let algorithm = format!("{:?}/{:?}", config.detector.kind, config.smoothing.kind);
        Self {
            algorithm,
            version: env!("CARGO_PKG_VERSION").to_string(),
            config,
        }
    }
}

impl Default for Provenance {
    fn default() -> Self {
        Self::new(FeatureFinderConfig::default())
    }
}

/// The features detected in a run and how they were found
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FeatureSet {
    pub features: Vec<Feature>,
    pub provenance: Provenance,
}

impl FeatureSet {
    pub fn new(features: Vec<Feature>, provenance: Provenance) -> Self {
        Self {
            features,
            provenance,
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Feature> {
        self.features.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Feature> {
        self.features.iter_mut()
    }

    /// Put the features in reporting order
    pub fn sort(&mut self) {
        self.features.sort_by(|a, b| a.report_order(b));
    }

    /// Drop the features `filter` rejects, returning how many were removed
    pub fn retain_accepted(&mut self, filter: &FeatureFilter) -> usize {
        let before = self.features.len();
        self.features.retain(|f| filter.accepts(f));
        before - self.features.len()
    }

    pub fn by_charge(&self, charge: i32) -> impl Iterator<Item = &Feature> {
        self.features.iter().filter(move |f| f.charge == charge)
    }
}

impl Index<usize> for FeatureSet {
    type Output = Feature;

    fn index(&self, index: usize) -> &Self::Output {
        &self.features[index]
    }
}

impl IntoIterator for FeatureSet {
    type Item = Feature;
    type IntoIter = std::vec::IntoIter<Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.features.into_iter()
    }
}

impl<'a> IntoIterator for &'a FeatureSet {
    type Item = &'a Feature;
    type IntoIter = std::slice::Iter<'a, Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.features.iter()
    }
}
