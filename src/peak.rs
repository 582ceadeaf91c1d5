use std::cmp::Ordering;
use std::fmt;

use mzpeaks::{CoordinateLike, IntensityMeasurement, MZ};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The position of a [`Peak`] in the list it was detected in
pub type PeakId = usize;

/// The position of a feature in the list of features found in a window
pub type FeatureId = usize;

/// A candidate isotope peak detected on a window's intensity surface.
///
/// Peaks carry no mutable state. Which feature a peak belongs to is recorded in a
/// [`PeakOwnership`] table instead.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Peak {
    /// The scan index, relative to the window the peak was found in
    pub scan: usize,
    /// The m/z bin of the apex
    pub bin: usize,
    pub mz: f64,
    pub intensity: f32,
    /// The background estimate under the apex
    pub background: f32,
    /// The local median intensity around the apex
    pub median: f32,
    /// A detector-specific quality value, if the detector produces one
    pub score: Option<f32>,
}

impl Peak {
    pub fn new(scan: usize, bin: usize, mz: f64, intensity: f32) -> Self {
        Self {
            scan,
            bin,
            mz,
            intensity,
            ..Default::default()
        }
    }

    pub fn with_estimates(mut self, background: f32, median: f32) -> Self {
        self.background = background;
        self.median = median;
        self
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }
}

impl CoordinateLike<MZ> for Peak {
    #[inline]
    fn coordinate(&self) -> f64 {
        self.mz
    }
}

impl IntensityMeasurement for Peak {
    #[inline]
    fn intensity(&self) -> f32 {
        self.intensity
    }
}

impl PartialEq for Peak {
    fn eq(&self, other: &Self) -> bool {
        self.scan == other.scan && self.mz == other.mz && self.intensity == other.intensity
    }
}

impl PartialOrd for Peak {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(
            self.scan
                .cmp(&other.scan)
                .then_with(|| self.mz.total_cmp(&other.mz)),
        )
    }
}

impl fmt::Display for Peak {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Peak({}, {:.4}, {}, {}, {})",
            self.scan, self.mz, self.intensity, self.background, self.median
        )
    }
}

/// A two dimensional range query structure over a list of [`Peak`]s, bucketing
/// them by scan and ordering each bucket by m/z.
#[derive(Debug, Clone, Default)]
pub struct PeakIndex {
    peaks: Vec<Peak>,
    by_scan: Vec<Vec<PeakId>>,
}

impl PeakIndex {
    pub fn new(peaks: Vec<Peak>) -> Self {
        let n_scans = peaks.iter().map(|p| p.scan + 1).max().unwrap_or(0);
        let mut by_scan: Vec<Vec<PeakId>> = vec![Vec::new(); n_scans];
        for (i, p) in peaks.iter().enumerate() {
            by_scan[p.scan].push(i);
        }
        for bucket in by_scan.iter_mut() {
            bucket.sort_by(|a, b| peaks[*a].mz.total_cmp(&peaks[*b].mz).then(a.cmp(b)));
        }
        Self { peaks, by_scan }
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn get(&self, id: PeakId) -> &Peak {
        &self.peaks[id]
    }

    pub fn peaks(&self) -> &[Peak] {
        &self.peaks
    }

    pub fn into_peaks(self) -> Vec<Peak> {
        self.peaks
    }

    /// The number of scans spanned by the indexed peaks
    pub fn n_scans(&self) -> usize {
        self.by_scan.len()
    }

    /// Peak ids in descending order of intensity. Ties are broken by position so the
    /// order is fully determined by the input.
    pub fn by_intensity(&self) -> Vec<PeakId> {
        let mut order: Vec<PeakId> = (0..self.peaks.len()).collect();
        order.sort_by(|a, b| {
            self.peaks[*b]
                .intensity
                .total_cmp(&self.peaks[*a].intensity)
                .then_with(|| self.peaks[*a].partial_cmp(&self.peaks[*b]).unwrap_or(Ordering::Equal))
                .then(a.cmp(b))
        });
        order
    }

    fn bucket_range(&self, scan: usize, mz_low: f64, mz_high: f64) -> &[PeakId] {
        let bucket = match self.by_scan.get(scan) {
            Some(b) => b,
            None => return &[],
        };
        let start = bucket.partition_point(|i| self.peaks[*i].mz < mz_low);
        let end = bucket.partition_point(|i| self.peaks[*i].mz <= mz_high);
        if start >= end {
            &[]
        } else {
            &bucket[start..end]
        }
    }

    /// All peaks with scan in `[scan_low, scan_high]` and m/z in `[mz_low, mz_high]`,
    /// scan-major, ordered by m/z within each scan
    pub fn query(&self, scan_low: usize, scan_high: usize, mz_low: f64, mz_high: f64) -> Vec<PeakId> {
        let mut out = Vec::new();
        if self.by_scan.is_empty() || scan_low > scan_high {
            return out;
        }
        let scan_high = scan_high.min(self.by_scan.len() - 1);
        for scan in scan_low..=scan_high {
            out.extend_from_slice(self.bucket_range(scan, mz_low, mz_high));
        }
        out
    }

    /// The peak in `scan` closest to `mz` within `tolerance` that `accept` allows
    pub fn nearest_in_scan<F: Fn(PeakId) -> bool>(
        &self,
        scan: usize,
        mz: f64,
        tolerance: f64,
        accept: F,
    ) -> Option<PeakId> {
        self.bucket_range(scan, mz - tolerance, mz + tolerance)
            .iter()
            .copied()
            .filter(|i| accept(*i))
            .min_by(|a, b| {
                let da = (self.peaks[*a].mz - mz).abs();
                let db = (self.peaks[*b].mz - mz).abs();
                da.total_cmp(&db).then(a.cmp(b))
            })
    }
}

/// Records which feature, if any, has claimed each peak of a [`PeakIndex`].
///
/// A peak may be claimed at most once. Attempting to claim a peak a second time is a
/// logic error and panics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeakOwnership {
    owners: Vec<Option<FeatureId>>,
}

impl PeakOwnership {
    pub fn new(n_peaks: usize) -> Self {
        Self {
            owners: vec![None; n_peaks],
        }
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn owner(&self, peak: PeakId) -> Option<FeatureId> {
        self.owners[peak]
    }

    pub fn is_claimed(&self, peak: PeakId) -> bool {
        self.owners[peak].is_some()
    }

    /// Assign `peak` to `feature`.
    ///
    /// # Panics
    /// If `peak` is already owned by any feature
    pub fn claim(&mut self, peak: PeakId, feature: FeatureId) {
        let slot = &mut self.owners[peak];
        if let Some(existing) = slot {
            panic!("Peak {peak} is already owned by feature {existing}, cannot assign it to {feature}");
        }
        *slot = Some(feature);
    }

    pub fn claimed_count(&self) -> usize {
        self.owners.iter().filter(|o| o.is_some()).count()
    }

    /// The peaks no feature has claimed
    pub fn unclaimed(&self) -> impl Iterator<Item = PeakId> + '_ {
        self.owners
            .iter()
            .enumerate()
            .filter(|(_, o)| o.is_none())
            .map(|(i, _)| i)
    }

    /// The peaks owned by `feature`
    pub fn owned_by(&self, feature: FeatureId) -> impl Iterator<Item = PeakId> + '_ {
        self.owners
            .iter()
            .enumerate()
            .filter(move |(_, o)| **o == Some(feature))
            .map(|(i, _)| i)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use mzpeaks::prelude::*;

    fn peaks() -> Vec<Peak> {
        vec![
            Peak::new(0, 10, 500.0, 10.0),
            Peak::new(1, 28, 500.5, 50.0),
            Peak::new(1, 10, 500.0, 80.0),
            Peak::new(3, 46, 501.0, 20.0),
            Peak::new(1, 5, 499.86, 20.0),
        ]
    }

    #[test]
    fn test_coordinates() {
        let p = Peak::new(2, 10, 500.25, 3.0).with_estimates(1.0, 0.5).with_score(2.0);
        assert_eq!(p.mz(), 500.25);
        assert_eq!(p.intensity(), 3.0);
        assert_eq!(p.background, 1.0);
        assert_eq!(p.score, Some(2.0));
    }

    #[test]
    fn test_index_query() {
        let index = PeakIndex::new(peaks());
        assert_eq!(index.n_scans(), 4);
        assert_eq!(index.query(0, 9, 499.9, 500.6), vec![0, 2, 1]);
        assert_eq!(index.query(1, 1, 499.0, 502.0), vec![4, 2, 1]);
        assert!(index.query(2, 2, 0.0, 1000.0).is_empty());
        assert_eq!(index.by_intensity(), vec![2, 1, 4, 3, 0]);
        assert_eq!(index.nearest_in_scan(1, 500.45, 0.1, |_| true), Some(1));
        assert_eq!(index.nearest_in_scan(1, 500.45, 0.1, |i| i != 1), None);
        assert_eq!(index.nearest_in_scan(1, 500.03, 0.2, |_| true), Some(2));
    }

    #[test]
    fn test_ownership() {
        let mut owners = PeakOwnership::new(4);
        owners.claim(1, 0);
        owners.claim(3, 0);
        owners.claim(2, 1);
        assert!(owners.is_claimed(1));
        assert_eq!(owners.owner(2), Some(1));
        assert_eq!(owners.unclaimed().collect::<Vec<_>>(), vec![0]);
        assert_eq!(owners.owned_by(0).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(owners.claimed_count(), 3);
    }

    #[test]
    #[should_panic]
    fn test_double_claim() {
        let mut owners = PeakOwnership::new(2);
        owners.claim(0, 0);
        owners.claim(0, 1);
    }
}
