#![allow(dead_code)]
use mzfeatures::isotopes::{neutral_mass, PoissonIsotopeModel};
use mzfeatures::{MemoryRun, Scan};

/// The spacing of the synthetic profile spectra
pub const PROFILE_SPACING: f64 = 0.005;

/// A synthetic isotope envelope eluting with a Gaussian profile
#[derive(Debug, Clone, Copy)]
pub struct Envelope {
    pub mz: f64,
    /// Zero places a single peak with no isotopes
    pub charge: i32,
    pub apex_scan: f64,
    pub elution_width: f64,
    pub height: f32,
    pub isotopes: usize,
    pub peak_width: f64,
}

impl Envelope {
    pub fn new(mz: f64, charge: i32, apex_scan: f64) -> Self {
        Self {
            mz,
            charge,
            apex_scan,
            elution_width: 3.0,
            height: 1e5,
            isotopes: 5,
            peak_width: 0.03,
        }
    }

    /// The m/z and apex height of each isotope peak
    pub fn peaks(&self) -> Vec<(f64, f32)> {
        if self.charge == 0 {
            return vec![(self.mz, self.height)];
        }
        let dist = PoissonIsotopeModel::new(self.isotopes).distribution(neutral_mass(self.mz, self.charge));
        let top = dist.iter().copied().fold(0.0f32, f32::max);
        dist.iter()
            .enumerate()
            .map(|(i, d)| {
                (
                    self.mz + i as f64 / self.charge as f64,
                    self.height * d / top,
                )
            })
            .collect()
    }

    pub fn intensity_at(&self, scan: usize, mz: f64) -> f32 {
        let elution = (-0.5 * ((scan as f64 - self.apex_scan) / self.elution_width).powi(2)).exp();
        if elution < 1e-6 {
            return 0.0;
        }
        self.peaks()
            .into_iter()
            .map(|(center, height)| {
                let shape = (-0.5 * ((mz - center) / self.peak_width).powi(2)).exp();
                height * (shape * elution) as f32
            })
            .sum()
    }
}

/// A profile mode run of `n_scans` scans spanning `mz_range`, containing `envelopes`
/// over a flat `baseline`
pub fn synthetic_run(n_scans: usize, mz_range: (f64, f64), envelopes: &[Envelope], baseline: f32) -> MemoryRun {
    let n_points = ((mz_range.1 - mz_range.0) / PROFILE_SPACING).round() as usize + 1;
    let mz_array: Vec<f64> = (0..n_points)
        .map(|i| mz_range.0 + i as f64 * PROFILE_SPACING)
        .collect();
    let scans = (0..n_scans)
        .map(|scan| {
            let intensity: Vec<f32> = mz_array
                .iter()
                .map(|mz| {
                    baseline
                        + envelopes
                            .iter()
                            .map(|e| e.intensity_at(scan, *mz))
                            .sum::<f32>()
                })
                .collect();
            Scan::new(
                1000 + 2 * scan as u32,
                60.0 + scan as f64 * 1.5,
                mz_array.clone(),
                intensity,
            )
        })
        .collect();
    MemoryRun::new(scans, false)
}

/// The reference scenario: one charge 2 envelope at m/z 500 centered on scan 25
pub fn peptide_run() -> MemoryRun {
    synthetic_run(50, (497.0, 505.0), &[Envelope::new(500.0, 2, 25.0)], 0.0)
}
