//! `mzfeatures` detects isotopic features, the elution profiles of charged molecules,
//! in LC-MS runs.
//!
//! A run is processed in overlapping windows of scans. Each window is resampled onto a
//! uniform m/z grid, smoothed and separated from its background, searched for local
//! maxima and then explained as a set of isotope envelopes by comparing observed peak
//! intensities with a Poisson isotope model. Features found near the seams between
//! windows are reported once, and their m/z can be refined against the raw spectra.
//!
//! The whole process is driven by [`FeatureFinder`], configured by a
//! [`FeatureFinderConfig`]. Runs are read through the [`RunSource`] trait, and
//! [`MemoryRun`] holds a run already loaded into memory.
//!
//! # Usage
//! ```
//! use mzfeatures::prelude::*;
//!
//! // A single charge 2 envelope eluting around scan 10
//! let scans: Vec<Scan> = (0..20u32)
//!     .map(|i| {
//!         let elution = (-0.5 * ((i as f64 - 10.0) / 2.5).powi(2)).exp();
//!         let mz: Vec<f64> = (0..1200).map(|k| 498.0 + k as f64 * 0.005).collect();
//!         let intensity: Vec<f32> = mz
//!             .iter()
//!             .map(|x| {
//!                 (0..4)
//!                     .map(|iso| {
//!                         let center = 500.0 + iso as f64 * 0.5;
//!                         let height = [1.0, 0.57, 0.16, 0.03][iso];
//!                         height * (-0.5 * ((x - center) / 0.02).powi(2)).exp()
//!                     })
//!                     .sum::<f64>() as f32
//!                     * 1e4
//!                     * elution as f32
//!             })
//!             .collect();
//!         Scan::new(i + 1, i as f64 * 2.0, mz, intensity)
//!     })
//!     .collect();
//! let run = MemoryRun::new(scans, false);
//!
//! let finder = FeatureFinder::new(FeatureFinderConfig::default()).unwrap();
//! let features = finder.find_features(&run).unwrap();
//! for feature in features.iter() {
//!     println!("{}", feature);
//! }
//! ```
//!
//! ## Features
//! - `parallelism`: process rows of a window and whole windows on the `rayon` thread pool.
//!   Enabled by default.
//! - `serde`: serialize configurations, peaks and features.
pub mod arrayops;
pub mod background;
pub mod cluster;
pub mod config;
pub mod driver;
pub mod feature;
pub mod isotopes;
pub mod maxima;
pub mod peak;
pub mod pipeline;
pub mod refine;
pub mod resample;
pub mod run;
pub mod search;
pub mod smooth;

pub mod prelude;

pub use crate::arrayops::{ArrayPair, MZGrid, Matrix};
pub use crate::config::{
    ConfigurationError, DetectorKind, FeatureFinderConfig, FeatureFinderConfigBuilder,
    LowPassKind,
};
pub use crate::driver::{
    CancellationToken, FeatureFinder, FeatureFindingError, ProgressReporter, ScanWindow,
};
pub use crate::feature::{Feature, FeatureFilter, FeatureSet};
pub use crate::peak::{Peak, PeakIndex, PeakOwnership};
pub use crate::pipeline::{FeatureStrategy, Pipeline};
pub use crate::resample::{ResampleError, ResampledMatrix, Resampler};
pub use crate::run::{MemoryRun, RunSource, Scan};
