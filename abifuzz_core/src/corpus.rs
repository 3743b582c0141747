use crate::candidate::Candidate;
use crate::feedback::{PathId, TransitionId};

/// A retained candidate together with the feedback it produced when it was
/// admitted. The energy field is scratch space, recomputed by the power
/// schedule on every selection round; everything else is immutable after
/// admission.
#[derive(Debug, Clone)]
pub struct Seed {
    pub candidate: Candidate,
    pub path_id: Option<PathId>,
    pub transition_id: Option<TransitionId>,
    pub energy: f64,
}

impl Seed {
    pub fn new(
        candidate: Candidate,
        path_id: Option<PathId>,
        transition_id: Option<TransitionId>,
    ) -> Self {
        Self {
            candidate,
            path_id,
            transition_id,
            energy: 0.0,
        }
    }
}

/// Append-only pool of admitted seeds, scoped either to one method (partial
/// mode) or to the whole contract (total mode). Admission is a one-time
/// judgement made by the control loop; the population never re-evaluates or
/// evicts.
#[derive(Debug, Clone, Default)]
pub struct Population {
    seeds: Vec<Seed>,
}

impl Population {
    pub fn new() -> Self {
        Self { seeds: Vec::new() }
    }

    pub fn push(&mut self, seed: Seed) {
        self.seeds.push(seed);
    }

    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Seed> {
        self.seeds.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Seed> {
        self.seeds.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Seed> {
        self.seeds.iter_mut()
    }
}
