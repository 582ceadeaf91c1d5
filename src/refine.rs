//! Recompute feature m/z values against the raw spectra.
//!
//! Resampling onto a coarse grid limits the precision of the m/z of each feature.
//! Once a run has been processed, each feature's m/z can be re-estimated from the
//! unresampled spectra around its representative scan.
use log::debug;
use mzpeaks::Tolerance;

use crate::config::RefineParams;
use crate::feature::Feature;
use crate::isotopes::isotopic_shift;
use crate::run::{RunSource, Scan};

/// Re-estimates feature m/z from raw spectra
#[derive(Debug, Clone, PartialEq)]
pub struct AccurateMassRefiner {
    pub params: RefineParams,
}

impl AccurateMassRefiner {
    pub fn new(params: RefineParams) -> Self {
        Self { params }
    }

    pub fn is_enabled(&self) -> bool {
        self.params.scans > 0
    }

    /// The most intense raw point within the centroid window of `mz`
    fn most_intense_near(&self, scan: &Scan, mz: f64) -> Option<(f64, f32)> {
        let spectrum = &scan.spectrum;
        let window = self.params.centroid_window;
        spectrum
            .indices_between(mz - window, mz + window)
            .filter_map(|i| spectrum.get(i))
            .filter(|(_, inten)| *inten > 0.0)
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Refine `feature` against the centroids of `scan`, using up to its first two
    /// isotope slots.
    ///
    /// Returns `None` when the leading slot has no centroid or the refined value
    /// strays from it by more than the ppm tolerance.
    pub fn refine_centroided(&self, feature: &Feature, scan: &Scan) -> Option<f64> {
        let slots = if feature.charge > 0 { 2 } else { 1 };
        let spacing = if feature.charge > 0 {
            isotopic_shift(feature.charge)
        } else {
            0.0
        };
        let (first_mz, _) = self.most_intense_near(scan, feature.mz)?;
        let mut weighted = 0.0;
        let mut total = 0.0;
        for i in 0..slots {
            let predicted = feature.mz + i as f64 * spacing;
            if let Some((mz, inten)) = self.most_intense_near(scan, predicted) {
                weighted += (mz - i as f64 * spacing) * inten as f64;
                total += inten as f64;
            }
        }
        let refined = weighted / total;
        if Tolerance::PPM(self.params.ppm_tolerance).test(refined, first_mz) {
            Some(refined)
        } else {
            None
        }
    }

    /// Refine `feature` from the intensity-weighted center of mass around its m/z in the
    /// profile spectra of the scans surrounding `center`.
    ///
    /// Scans without signal in the window are skipped. Returns `None` if no scan has any.
    pub fn refine_profile<R: RunSource + ?Sized>(&self, feature: &Feature, run: &R, center: usize) -> Option<f64> {
        let n = self.params.scans;
        if n == 0 || run.is_empty() {
            return None;
        }
        let start = center.saturating_sub(n / 2);
        let end = (start + n).min(run.len());
        let window = self.params.profile_window;
        let mut centers = Vec::with_capacity(n);
        for index in start..end {
            let scan = match run.scan(index) {
                Some(scan) => scan,
                None => continue,
            };
            let spectrum = &scan.spectrum;
            let mut weighted = 0.0;
            let mut total = 0.0;
            for i in spectrum.indices_between(feature.mz - window, feature.mz + window) {
                if let Some((mz, inten)) = spectrum.get(i) {
                    weighted += mz * inten as f64;
                    total += inten as f64;
                }
            }
            if total > 0.0 {
                centers.push(weighted / total);
            }
        }
        if centers.is_empty() {
            None
        } else {
            Some(centers.iter().sum::<f64>() / centers.len() as f64)
        }
    }

    /// Refine `feature` in place, returning whether a refinement was found. The
    /// feature's `scan` must be an index into `run`.
    pub fn refine<R: RunSource + ?Sized>(&self, feature: &mut Feature, run: &R) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let refined = if run.is_centroided() {
            run.scan(feature.scan)
                .and_then(|scan| self.refine_centroided(feature, &scan))
        } else {
            self.refine_profile(feature, run, feature.scan)
        };
        match refined {
            Some(mz) => {
                feature.mz = mz;
                feature.accurate = true;
                feature.update_mass();
                true
            }
            None => false,
        }
    }

    /// Refine every feature of `features`, returning how many were refined
    pub fn refine_all<R: RunSource + ?Sized>(&self, features: &mut [Feature], run: &R) -> usize {
        if !self.is_enabled() {
            return 0;
        }
        let mut refined = 0;
        for feature in features.iter_mut() {
            if self.refine(feature, run) {
                refined += 1;
            }
        }
        debug!("Refined the m/z of {refined} of {} features", features.len());
        refined
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::peak::Peak;
    use crate::run::MemoryRun;

    fn feature(mz: f64, charge: i32, scan: usize) -> Feature {
        let mut f = Feature::new(mz, charge, 0.0, vec![Some(Peak::new(scan, 0, mz, 100.0)), None]);
        f.scan = scan;
        f
    }

    #[test]
    fn test_centroided() {
        let refiner = AccurateMassRefiner::new(RefineParams::default());
        let scan = Scan::new(
            1,
            0.0,
            vec![499.98, 500.0012, 500.0013, 500.5014, 501.2],
            vec![5.0, 100.0, 20.0, 50.0, 9.0],
        );
        let f = feature(500.01, 2, 0);
        let mz = refiner.refine_centroided(&f, &scan).unwrap();
        let expected = (500.0012 * 100.0 + 500.0014 * 50.0) / 150.0;
        assert!((mz - expected).abs() < 1e-9);

        // The second slot disagrees by far more than 5 ppm
        let scan = Scan::new(1, 0.0, vec![500.0, 500.54], vec![10.0, 100.0]);
        assert!(refiner.refine_centroided(&f, &scan).is_none());

        let empty = Scan::new(1, 0.0, vec![600.0], vec![10.0]);
        assert!(refiner.refine_centroided(&f, &empty).is_none());
    }

    #[test]
    fn test_profile() {
        let refiner = AccurateMassRefiner::new(RefineParams::default());
        let scans: Vec<Scan> = (0..5)
            .map(|i| {
                let mz: Vec<f64> = (0..21).map(|k| 499.95 + k as f64 * 0.005).collect();
                let scale = if i == 1 { 0.0 } else { 1.0 };
                let inten: Vec<f32> = mz
                    .iter()
                    .map(|x| scale * (100.0 * (-0.5 * ((x - 500.002) / 0.01f64).powi(2)).exp()) as f32)
                    .collect();
                Scan::new(i as u32, i as f64, mz, inten)
            })
            .collect();
        let run = MemoryRun::new(scans, false);
        let mut f = feature(500.0, 2, 2);
        assert!(refiner.refine(&mut f, &run));
        assert!(f.accurate);
        assert!((f.mz - 500.002).abs() < 5e-4, "{}", f.mz);

        let far = feature(700.0, 2, 2);
        assert!(refiner.refine_profile(&far, &run, 2).is_none());

        let disabled = AccurateMassRefiner::new(RefineParams {
            scans: 0,
            ..Default::default()
        });
        let mut f = feature(500.0, 2, 2);
        assert!(!disabled.refine(&mut f, &run));
        assert_eq!(f.mz, 500.0);
    }
}
