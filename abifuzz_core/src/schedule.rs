use crate::corpus::{Population, Seed};
use crate::feedback::{PathId, TransitionId};
use rand::Rng;
use rand_core::RngCore;
use std::collections::HashMap;

/// Which feedback channel(s) drive seed admission and energy weighting.
/// Fixed for the lifetime of one campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Coverage,
    State,
    Combined,
}

const DEFAULT_EXPONENT: i32 = 5;
const DEFAULT_TRANS_COEF: f64 = 0.5;

/// The power schedule: frequency tables for observed coverage paths and state
/// transitions, converted into a sampling distribution that favors rare
/// feedback. Counts only grow; nothing is ever evicted.
#[derive(Debug, Clone)]
pub struct PowerSchedule {
    path_frequency: HashMap<PathId, u64>,
    transition_frequency: HashMap<TransitionId, u64>,
    exponent: i32,
    trans_coef: f64,
}

impl Default for PowerSchedule {
    fn default() -> Self {
        Self::new(DEFAULT_EXPONENT, DEFAULT_TRANS_COEF)
    }
}

impl PowerSchedule {
    pub fn new(exponent: i32, trans_coef: f64) -> Self {
        Self {
            path_frequency: HashMap::new(),
            transition_frequency: HashMap::new(),
            exponent,
            trans_coef,
        }
    }

    /// Preset configuration for a driver mode: coverage-only weights paths
    /// exclusively, state-only weights transitions exclusively, combined uses
    /// the supplied blend coefficient (clamped to [0, 1]).
    pub fn for_driver(driver: Driver, schedule_coef: f64) -> Self {
        let trans_coef = match driver {
            Driver::Coverage => 0.0,
            Driver::State => 1.0,
            Driver::Combined => {
                if (0.0..=1.0).contains(&schedule_coef) {
                    schedule_coef
                } else {
                    DEFAULT_TRANS_COEF
                }
            }
        };
        Self::new(DEFAULT_EXPONENT, trans_coef)
    }

    /// Counts one occurrence of a coverage path; returns whether this was its
    /// first occurrence in the campaign.
    pub fn record_path(&mut self, id: PathId) -> bool {
        let count = self.path_frequency.entry(id).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Counts one occurrence of a state transition; returns whether this was
    /// its first occurrence in the campaign.
    pub fn record_transition(&mut self, id: TransitionId) -> bool {
        let count = self.transition_frequency.entry(id).or_insert(0);
        *count += 1;
        *count == 1
    }

    pub fn distinct_paths(&self) -> usize {
        self.path_frequency.len()
    }

    pub fn distinct_transitions(&self) -> usize {
        self.transition_frequency.len()
    }

    pub fn known_transitions(&self) -> impl Iterator<Item = &TransitionId> {
        self.transition_frequency.keys()
    }

    pub fn known_paths(&self) -> impl Iterator<Item = &PathId> {
        self.path_frequency.keys()
    }

    /// Recomputes every seed's energy from the *current* global frequency
    /// counts: `energy = 1 / weighted_freq^exponent`, where the weighted
    /// frequency blends the transition and path counts of the ids the seed
    /// recorded at admission. Rarer feedback classes end up with sharply
    /// higher energy.
    pub fn assign_energy(&self, population: &mut Population) {
        for seed in population.iter_mut() {
            seed.energy = self.seed_energy(seed);
        }
    }

    fn seed_energy(&self, seed: &Seed) -> f64 {
        let trans_freq = seed
            .transition_id
            .and_then(|id| self.transition_frequency.get(&id))
            .copied()
            .unwrap_or(0) as f64;
        let path_freq = seed
            .path_id
            .and_then(|id| self.path_frequency.get(&id))
            .copied()
            .unwrap_or(0) as f64;

        let weighted = self.trans_coef * trans_freq + (1.0 - self.trans_coef) * path_freq;
        1.0 / weighted.powi(self.exponent)
    }

    /// Reassigns energies, normalizes them into a probability distribution,
    /// and samples one seed.
    ///
    /// # Panics
    ///
    /// Panics when the population's total energy is zero or non-finite. That
    /// means a seed was admitted without any recorded feedback id for the
    /// active channel, which is a bookkeeping bug in the caller, not a
    /// runtime condition.
    pub fn choose<'a>(
        &self,
        population: &'a mut Population,
        rng: &mut dyn RngCore,
    ) -> &'a Seed {
        assert!(!population.is_empty(), "cannot choose from an empty population");
        self.assign_energy(population);

        let total: f64 = population.iter().map(|seed| seed.energy).sum();
        assert!(
            total.is_finite() && total > 0.0,
            "population energy must normalize to a positive finite total, got {total}"
        );

        let mut remaining = rng.random_range(0.0..total);
        let mut chosen = 0;
        for (index, seed) in population.iter().enumerate() {
            chosen = index;
            if remaining < seed.energy {
                break;
            }
            remaining -= seed.energy;
        }
        population.get(chosen).unwrap_or_else(|| {
            unreachable!("weighted sampling selected an out-of-range index")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{AbiValue, AccountRef};
    use crate::candidate::Candidate;
    use crate::feedback::{path_id, transition_id};
    use crate::state::{Scalar, StateSnapshot};
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;
    use std::collections::BTreeSet;
    use std::collections::HashMap as StdHashMap;

    fn some_path(n: u32) -> crate::feedback::PathId {
        let lines: BTreeSet<u32> = [n, n + 1].into_iter().collect();
        path_id(&lines)
    }

    fn some_transition(n: u64) -> crate::feedback::TransitionId {
        let mut snap = StateSnapshot::default();
        snap.global.insert("k".to_string(), Scalar::Uint(n));
        transition_id(&StateSnapshot::default(), &snap)
    }

    fn seed_with(path: Option<PathId>, trans: Option<TransitionId>) -> Seed {
        let candidate = Candidate::new(
            "m",
            vec![AbiValue::Uint(0)],
            AccountRef("ADDR".to_string()),
        );
        Seed::new(candidate, path, trans)
    }

    #[test]
    fn record_path_reports_first_occurrence_only() {
        let mut schedule = PowerSchedule::default();
        let id = some_path(10);
        assert!(schedule.record_path(id));
        assert!(!schedule.record_path(id));
        assert!(!schedule.record_path(id));
        assert!(schedule.record_path(some_path(20)));
        assert_eq!(schedule.distinct_paths(), 2);
    }

    #[test]
    fn record_transition_reports_first_occurrence_only() {
        let mut schedule = PowerSchedule::default();
        let id = some_transition(1);
        assert!(schedule.record_transition(id));
        assert!(!schedule.record_transition(id));
        assert_eq!(schedule.distinct_transitions(), 1);
    }

    #[test]
    fn energy_strictly_decreases_as_frequency_grows() {
        let mut schedule = PowerSchedule::new(5, 0.5);
        let path = some_path(1);
        let trans = some_transition(1);
        schedule.record_path(path);
        schedule.record_transition(trans);

        let mut population = Population::new();
        population.push(seed_with(Some(path), Some(trans)));

        let mut last_energy = f64::INFINITY;
        for _ in 0..5 {
            schedule.assign_energy(&mut population);
            let energy = population.get(0).unwrap().energy;
            assert!(energy > 0.0);
            assert!(
                energy < last_energy,
                "energy must strictly decrease as frequency increases"
            );
            last_energy = energy;
            schedule.record_path(path);
            schedule.record_transition(trans);
        }
    }

    #[test]
    fn energy_uses_current_counts_not_admission_counts() {
        let mut schedule = PowerSchedule::new(5, 0.0);
        let rare = some_path(1);
        let common = some_path(2);
        schedule.record_path(rare);
        schedule.record_path(common);

        let mut population = Population::new();
        population.push(seed_with(Some(rare), None));
        population.push(seed_with(Some(common), None));

        // Both were admitted at count 1; only `common` keeps occurring.
        for _ in 0..9 {
            schedule.record_path(common);
        }
        schedule.assign_energy(&mut population);
        let rare_energy = population.get(0).unwrap().energy;
        let common_energy = population.get(1).unwrap().energy;
        assert!(rare_energy > common_energy * 1000.0);
    }

    #[test]
    fn choose_prefers_rare_feedback() {
        let mut schedule = PowerSchedule::new(5, 0.0);
        let rare = some_path(1);
        let common = some_path(2);
        schedule.record_path(rare);
        schedule.record_path(common);
        for _ in 0..3 {
            schedule.record_path(common);
        }

        let mut population = Population::new();
        population.push(seed_with(Some(common), None));
        population.push(seed_with(Some(rare), None));

        let mut rng = ChaCha8Rng::from_seed([3u8; 32]);
        let mut picks: StdHashMap<usize, usize> = StdHashMap::new();
        for _ in 0..500 {
            let seed = schedule.choose(&mut population, &mut rng);
            let index = if seed.path_id == Some(rare) { 1 } else { 0 };
            *picks.entry(index).or_insert(0) += 1;
        }
        let rare_picks = *picks.get(&1).unwrap_or(&0);
        assert!(
            rare_picks > 450,
            "rare path should dominate selection, got {rare_picks}/500"
        );
    }

    #[test]
    #[should_panic(expected = "empty population")]
    fn choose_from_empty_population_panics() {
        let schedule = PowerSchedule::default();
        let mut population = Population::new();
        let mut rng = ChaCha8Rng::from_seed([0u8; 32]);
        schedule.choose(&mut population, &mut rng);
    }

    #[test]
    #[should_panic(expected = "positive finite total")]
    fn zero_total_energy_is_a_bookkeeping_bug() {
        // A seed with no recorded ids has zero weighted frequency, which the
        // schedule must treat as a programming error rather than mask.
        let schedule = PowerSchedule::new(5, 0.5);
        let mut population = Population::new();
        population.push(seed_with(None, None));
        let mut rng = ChaCha8Rng::from_seed([0u8; 32]);
        schedule.choose(&mut population, &mut rng);
    }

    #[test]
    fn driver_presets_pin_the_blend_coefficient() {
        let coverage = PowerSchedule::for_driver(Driver::Coverage, 0.9);
        assert_eq!(coverage.trans_coef, 0.0);
        let state = PowerSchedule::for_driver(Driver::State, 0.1);
        assert_eq!(state.trans_coef, 1.0);
        let combined = PowerSchedule::for_driver(Driver::Combined, 0.25);
        assert_eq!(combined.trans_coef, 0.25);
        let out_of_range = PowerSchedule::for_driver(Driver::Combined, 1.5);
        assert_eq!(out_of_range.trans_coef, 0.5);
    }
}
