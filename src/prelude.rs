pub use crate::arrayops::{ArrayPair, MZGrid};
pub use crate::config::{DetectorKind, FeatureFinderConfig, LowPassKind};
pub use crate::driver::{CancellationToken, FeatureFinder, FeatureFindingError, ProgressReporter};
pub use crate::feature::{Feature, FeatureFilter, FeatureSet};
pub use crate::pipeline::FeatureStrategy;
pub use crate::run::{MemoryRun, RunSource, Scan};
