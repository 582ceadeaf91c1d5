//! Group detected peaks into charge-resolved isotope envelopes.
//!
//! Peaks are visited from most to least intense. Each unclaimed peak becomes the
//! anchor of a search for a lower m/z leading peak whose distance to the anchor is a
//! whole number of isotope spacings for some charge state. Every such pairing is
//! expanded into a full envelope by walking the isotope slots, and scored against a
//! Poisson model of isotope abundance. The best scoring envelope claims all of its
//! peaks, so peaks explained by a more intense envelope are never reused by a weaker
//! one.
use std::cmp::Ordering;
use std::collections::HashMap;

use log::{log_enabled, trace, Level};

use crate::config::ClusterParams;
use crate::feature::Feature;
use crate::isotopes::{isotopic_shift, neutral_mass, normalize_with_floor, symmetric_kl, PoissonIsotopeModel};
use crate::peak::{Peak, PeakId, PeakIndex, PeakOwnership};

/// The distance from `value` to the nearest integer
#[inline]
pub fn distance_to_nearest_integer(value: f64) -> f64 {
    (value - value.round()).abs()
}

/// A scored envelope hypothesis, along with the peaks it matched
#[derive(Debug, Clone)]
pub struct Candidate {
    pub feature: Feature,
    pub slots: Vec<Option<PeakId>>,
}

impl Candidate {
    pub fn matched_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn contains(&self, peak: PeakId) -> bool {
        self.slots.iter().any(|s| *s == Some(peak))
    }

    /// The peak the envelope starts from
    pub fn lead(&self) -> PeakId {
        match self.slots.first() {
            Some(Some(id)) => *id,
            _ => panic!("A candidate envelope's first isotope slot must be occupied"),
        }
    }

    /// The order candidates are preferred in, best first
    fn preference(&self, other: &Self) -> Ordering {
        other
            .feature
            .rank()
            .total_cmp(&self.feature.rank())
            .then_with(|| other.feature.charge.cmp(&self.feature.charge))
            .then_with(|| self.feature.mz.total_cmp(&other.feature.mz))
            .then_with(|| self.lead().cmp(&other.lead()))
    }
}

/// The features explaining a peak list, and which peaks each of them claimed
#[derive(Debug, Clone, Default)]
pub struct ClusterResult {
    pub features: Vec<Feature>,
    pub ownership: PeakOwnership,
    pub index: PeakIndex,
}

impl ClusterResult {
    /// The peaks no feature explained
    pub fn unexplained(&self) -> impl Iterator<Item = &Peak> {
        self.ownership.unclaimed().map(|i| self.index.get(i))
    }
}

/// Converts peak lists into isotope envelope features
#[derive(Debug, Clone)]
pub struct IsotopeClusterer {
    pub params: ClusterParams,
    /// The tolerance on `distance * charge` being integral
    pub distance_tolerance: f64,
    /// The m/z tolerance when searching for the peak of an isotope slot
    pub slot_tolerance: f64,
    pub model: PoissonIsotopeModel,
}

impl IsotopeClusterer {
    pub fn new(params: &ClusterParams, bins_per_dalton: f64) -> Self {
        let distance_tolerance = params.distance_tolerance_for(bins_per_dalton);
        Self {
            params: params.clone(),
            distance_tolerance,
            slot_tolerance: distance_tolerance * params.slot_tolerance_factor,
            model: PoissonIsotopeModel::new(params.isotope_slots),
        }
    }

    /// The unclaimed peaks around `anchor`. Peaks with identical m/z are reduced to
    /// the one closest in scan to the anchor.
    pub fn neighborhood(&self, index: &PeakIndex, ownership: &PeakOwnership, anchor: PeakId) -> Vec<PeakId> {
        let a = index.get(anchor);
        let hits = index.query(
            a.scan.saturating_sub(self.params.scan_radius),
            a.scan + self.params.scan_radius,
            a.mz - self.params.mz_before,
            a.mz + self.params.mz_after,
        );
        let mut by_mz: HashMap<u64, PeakId> = HashMap::with_capacity(hits.len());
        for id in hits {
            if ownership.is_claimed(id) {
                continue;
            }
            let p = index.get(id);
            by_mz
                .entry(p.mz.to_bits())
                .and_modify(|current| {
                    let c = index.get(*current);
                    let d_new = p.scan.abs_diff(a.scan);
                    let d_cur = c.scan.abs_diff(a.scan);
                    if d_new < d_cur || (d_new == d_cur && id < *current) {
                        *current = id;
                    }
                })
                .or_insert(id);
        }
        let mut out: Vec<PeakId> = by_mz.into_values().collect();
        out.sort_by(|x, y| {
            index
                .get(*x)
                .mz
                .total_cmp(&index.get(*y).mz)
                .then(x.cmp(y))
        });
        out
    }

    /// The neighborhood peak closest to `mz` within the slot tolerance that is not
    /// already in `taken`, breaking ties by proximity in scan to `scan`
    fn closest_peak(
        &self,
        index: &PeakIndex,
        neighborhood: &[PeakId],
        mz: f64,
        scan: usize,
        taken: &[Option<PeakId>],
    ) -> Option<PeakId> {
        let lo = neighborhood.partition_point(|i| index.get(*i).mz < mz - self.slot_tolerance);
        neighborhood[lo..]
            .iter()
            .copied()
            .take_while(|i| index.get(*i).mz <= mz + self.slot_tolerance)
            .filter(|i| !taken.contains(&Some(*i)))
            .min_by(|x, y| {
                let px = index.get(*x);
                let py = index.get(*y);
                (px.mz - mz)
                    .abs()
                    .total_cmp(&(py.mz - mz).abs())
                    .then_with(|| px.scan.abs_diff(scan).cmp(&py.scan.abs_diff(scan)))
                    .then(x.cmp(y))
            })
    }

    /// Build and score the envelope starting at `lead` with `charge`.
    ///
    /// Returns `None` if the envelope matches fewer than the required number of slots
    /// or does not include `anchor`.
    pub fn score_candidate(
        &self,
        index: &PeakIndex,
        neighborhood: &[PeakId],
        lead: PeakId,
        charge: i32,
        anchor: PeakId,
    ) -> Option<Candidate> {
        let n_slots = self.params.isotope_slots;
        let lead_peak = index.get(lead);
        let mz0 = lead_peak.mz;
        let spacing = isotopic_shift(charge);
        let theoretical = self.model.distribution(neutral_mass(mz0, charge));

        let mut slots: Vec<Option<PeakId>> = vec![None; n_slots];
        let mut residual_sum = 0.0;
        let mut residual_count = 0usize;
        let mut misses = 0;
        let mut previous: Option<(f32, f32)> = None;

        for i in 0..n_slots {
            let nominal = mz0 + i as f64 * spacing;
            let offset = if residual_count > 0 {
                residual_sum / residual_count as f64
            } else {
                0.0
            };
            let hit = if i == 0 {
                Some(lead)
            } else {
                self.closest_peak(index, neighborhood, nominal + offset, lead_peak.scan, &slots)
            };
            match hit {
                Some(id) => {
                    let p = index.get(id);
                    if let Some((prev_obs, prev_theo)) = previous {
                        let expected = prev_obs * theoretical[i] / prev_theo.max(f32::MIN_POSITIVE);
                        if p.intensity > prev_obs && p.intensity > expected * self.params.anomaly_factor {
                            // Most likely the start of an overlapping envelope
                            break;
                        }
                    }
                    slots[i] = Some(id);
                    misses = 0;
                    residual_sum += p.mz - nominal;
                    residual_count += 1;
                    previous = Some((p.intensity, theoretical[i]));
                }
                None => {
                    misses += 1;
                    if misses >= 2 {
                        break;
                    }
                }
            }
        }

        let matched = slots.iter().filter(|s| s.is_some()).count();
        if matched < self.params.min_matched_slots || !slots.contains(&Some(anchor)) {
            return None;
        }

        let mut weighted = 0.0;
        let mut weights = 0.0;
        let mut observed = vec![0.0f32; n_slots];
        let mut comprised = vec![None; n_slots];
        for (i, slot) in slots.iter().enumerate() {
            if let Some(id) = slot {
                let p = index.get(*id);
                let w = p.intensity as f64;
                weighted += w * (p.mz - i as f64 * spacing);
                weights += w;
                observed[i] = p.intensity;
                comprised[i] = Some(*p);
            }
        }
        let mz = if weights > 0.0 { weighted / weights } else { mz0 };

        let normalized = normalize_with_floor(&observed, self.params.missing_slot_floor);
        let kl = symmetric_kl(&normalized, &theoretical);

        let max_intensity = observed.iter().copied().fold(0.0f32, f32::max);
        let peak_count = comprised
            .iter()
            .flatten()
            .filter(|p: &&Peak| {
                p.intensity > self.params.peak_count_fraction * max_intensity
                    && p.intensity > self.params.peak_count_median_factor * p.median
            })
            .count();

        let mut feature = Feature::new(mz, charge, kl, comprised);
        feature.peak_count = peak_count;
        feature.intensity = max_intensity;
        Some(Candidate { feature, slots })
    }

    /// Every envelope hypothesis for `anchor`
    pub fn candidates_for(&self, index: &PeakIndex, ownership: &PeakOwnership, anchor: PeakId) -> Vec<Candidate> {
        let a = *index.get(anchor);
        let neighborhood = self.neighborhood(index, ownership, anchor);
        let min_lead = a.intensity * self.params.min_lead_ratio;
        let mut candidates = Vec::new();
        for lead in neighborhood.iter().copied() {
            let p = index.get(lead);
            if p.mz > a.mz || p.intensity < min_lead {
                continue;
            }
            let distance = a.mz - p.mz;
            for charge in (1..=self.params.max_charge).rev() {
                if distance_to_nearest_integer(distance * charge as f64) > self.distance_tolerance {
                    continue;
                }
                if let Some(candidate) = self.score_candidate(index, &neighborhood, lead, charge, anchor) {
                    candidates.push(candidate);
                }
            }
        }
        candidates
    }

    /// Choose the best of `candidates`, linking the runners-up to it in order of
    /// preference
    pub fn select(&self, mut candidates: Vec<Candidate>) -> Option<Candidate> {
        let min_kl = candidates
            .iter()
            .map(|c| c.feature.kl)
            .fold(f32::INFINITY, f32::min);
        let cutoff = min_kl + self.params.divergence_cutoff;
        candidates.retain(|c| c.feature.kl <= cutoff);

        let n = candidates.len();
        let mut aliased = vec![false; n];
        for (j, b) in candidates.iter().enumerate() {
            let b_lead = b.lead();
            let b_matched = b.matched_count();
            for (i, a) in candidates.iter().enumerate() {
                if i == j || a.feature.charge == b.feature.charge {
                    continue;
                }
                let a_matched = a.matched_count();
                if a.feature.charge % b.feature.charge == 0
                    && a.contains(b_lead)
                    && (a_matched >= 6 || a_matched > b_matched)
                {
                    aliased[j] = true;
                    break;
                }
            }
        }
        let mut survivors: Vec<Candidate> = candidates
            .into_iter()
            .zip(aliased)
            .filter(|(_, alias)| !alias)
            .map(|(c, _)| c)
            .collect();
        survivors.sort_by(|a, b| a.preference(b));

        let mut iter = survivors.into_iter();
        let mut best = iter.next()?;
        let mut runners_up: Vec<Feature> = iter.map(|c| c.feature).collect();
        let mut next: Option<Box<Feature>> = None;
        while let Some(mut f) = runners_up.pop() {
            f.next = next.take();
            next = Some(Box::new(f));
        }
        best.feature.next = next;
        Some(best)
    }

    /// Explain `peaks` as a list of features
    pub fn cluster(&self, peaks: Vec<Peak>) -> ClusterResult {
        let index = PeakIndex::new(peaks);
        let mut ownership = PeakOwnership::new(index.len());
        let mut features = Vec::new();

        for anchor in index.by_intensity() {
            if ownership.is_claimed(anchor) {
                continue;
            }
            let candidates = self.candidates_for(&index, &ownership, anchor);
            let n_candidates = candidates.len();
            let feature_id = features.len();
            let feature = match self.select(candidates) {
                Some(best) => {
                    assert!(
                        best.slots.first().is_some_and(|s| s.is_some()),
                        "The winning envelope for peak {anchor} has no leading peak"
                    );
                    for id in best.slots.iter().flatten() {
                        ownership.claim(*id, feature_id);
                    }
                    best.feature
                }
                None => {
                    ownership.claim(anchor, feature_id);
                    Feature::singleton(*index.get(anchor), self.params.isotope_slots)
                }
            };
            if log_enabled!(Level::Trace) {
                trace!(
                    "Anchor {} at {:.4} from {n_candidates} candidates chose charge {} with kl {:.4}",
                    anchor,
                    index.get(anchor).mz,
                    feature.charge,
                    feature.kl,
                );
            }
            features.push(feature);
        }

        ClusterResult {
            features,
            ownership,
            index,
        }
    }
}
