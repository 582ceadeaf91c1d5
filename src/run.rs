//! Access to the scans of an LC-MS run.
//!
//! Reading runs from files is left to the caller. Anything that can hand out scans by
//! position implements [`RunSource`], and [`MemoryRun`] is provided for runs that are
//! already in memory.
use std::borrow::Cow;
use std::collections::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::ArrayPair;
use crate::resample::ResampleError;

/// A single spectrum acquisition
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Scan {
    /// The instrument's scan number. Increasing, but not necessarily contiguous.
    pub number: u32,
    /// The retention time in seconds
    pub time: f64,
    pub spectrum: ArrayPair<'static>,
}

impl Scan {
    pub fn new(number: u32, time: f64, mz_array: Vec<f64>, intensity_array: Vec<f32>) -> Self {
        Self {
            number,
            time,
            spectrum: ArrayPair::from((mz_array, intensity_array)),
        }
    }

    /// Check that the spectrum's arrays are parallel and sorted by m/z
    pub fn validate(&self) -> Result<(), ResampleError> {
        let spectrum = &self.spectrum;
        if spectrum.mz_array.len() != spectrum.intensity_array.len() {
            return Err(ResampleError::MZIntensityMismatch {
                mz: spectrum.mz_array.len(),
                intensity: spectrum.intensity_array.len(),
            });
        }
        if !spectrum.is_sorted() {
            return Err(ResampleError::MZNotSorted);
        }
        Ok(())
    }
}

/// An ordered sequence of scans addressable by position and by scan number
pub trait RunSource: Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The scan at position `index`
    fn scan(&self, index: usize) -> Option<Cow<'_, Scan>>;

    /// The position of the scan with the instrument scan number `number`
    fn index_of(&self, number: u32) -> Option<usize>;

    /// The m/z range covered by the run
    fn mz_range(&self) -> (f64, f64);

    /// Whether the spectra are centroided rather than profile
    fn is_centroided(&self) -> bool {
        false
    }
}

/// A run held entirely in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryRun {
    scans: Vec<Scan>,
    by_number: HashMap<u32, usize>,
    mz_range: (f64, f64),
    centroided: bool,
}

impl MemoryRun {
    pub fn new(scans: Vec<Scan>, centroided: bool) -> Self {
        let by_number = scans
            .iter()
            .enumerate()
            .map(|(i, s)| (s.number, i))
            .collect();
        let mz_range = scans
            .iter()
            .filter(|s| !s.spectrum.is_empty())
            .fold(None, |acc: Option<(f64, f64)>, s| {
                let lo = s.spectrum.min_mz;
                let hi = s.spectrum.max_mz;
                Some(match acc {
                    Some((a, b)) => (a.min(lo), b.max(hi)),
                    None => (lo, hi),
                })
            })
            .unwrap_or((0.0, 0.0));
        Self {
            scans,
            by_number,
            mz_range,
            centroided,
        }
    }

    pub fn scans(&self) -> &[Scan] {
        &self.scans
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Scan> {
        self.scans.iter()
    }
}

impl FromIterator<Scan> for MemoryRun {
    fn from_iter<T: IntoIterator<Item = Scan>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect(), false)
    }
}

impl RunSource for MemoryRun {
    fn len(&self) -> usize {
        self.scans.len()
    }

    fn scan(&self, index: usize) -> Option<Cow<'_, Scan>> {
        self.scans.get(index).map(Cow::Borrowed)
    }

    fn index_of(&self, number: u32) -> Option<usize> {
        self.by_number.get(&number).copied()
    }

    fn mz_range(&self) -> (f64, f64) {
        self.mz_range
    }

    fn is_centroided(&self) -> bool {
        self.centroided
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn run() -> MemoryRun {
        vec![
            Scan::new(10, 1.0, vec![400.0, 410.0], vec![1.0, 2.0]),
            Scan::new(12, 2.0, vec![], vec![]),
            Scan::new(15, 3.0, vec![390.5, 420.0, 421.0], vec![1.0, 2.0, 3.0]),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_memory_run() {
        let run = run();
        assert_eq!(run.len(), 3);
        assert!(!run.is_empty());
        assert_eq!(run.index_of(15), Some(2));
        assert_eq!(run.index_of(11), None);
        assert_eq!(run.mz_range(), (390.5, 421.0));
        assert_eq!(run.scan(1).unwrap().number, 12);
        assert!(run.scan(3).is_none());
        assert!(!run.is_centroided());
    }

    #[test]
    fn test_validate() {
        assert!(Scan::new(1, 0.0, vec![1.0, 2.0], vec![1.0, 1.0]).validate().is_ok());
        assert_eq!(
            Scan::new(1, 0.0, vec![2.0, 1.0], vec![1.0, 1.0]).validate(),
            Err(ResampleError::MZNotSorted)
        );
        assert_eq!(
            Scan::new(1, 0.0, vec![1.0], vec![1.0, 1.0]).validate(),
            Err(ResampleError::MZIntensityMismatch {
                mz: 1,
                intensity: 2
            })
        );
    }
}
