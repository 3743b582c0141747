//! The fuzzing control loop.
//!
//! A campaign walks a simple state machine: `Seeding` drains an initial queue
//! of canonical seed candidates, `Mutating` generates candidates by stacking
//! mutations onto population picks, and `Stopped` is reached by budget
//! exhaustion or a fatal oracle/assertion failure. All scheduler, population,
//! and counter state is owned by one `Campaign` value, constructed fresh per
//! run.

use crate::abi::{AbiContract, AccountRef};
use crate::candidate::Candidate;
use crate::corpus::{Population, Seed};
use crate::executor::{AccountFunder, Backend, BackendError, BackendInfo, Outcome};
use crate::feedback::{path_id, transition_id};
use crate::mutator::{MethodMutator, MutationCtx, MutatorError};
use crate::oracle::Oracle;
use crate::report::{MetricsRow, MetricsWriter, ReportError};
use crate::schedule::{Driver, PowerSchedule};
use crate::state::StateTracker;
use rand::Rng;
use rand_core::RngCore;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Scheduling granularity: one population/schedule per method, or one shared
/// across the whole contract (method choice then lives in the candidate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Partial,
    Total,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Seeding,
    Mutating,
    Stopped,
}

pub const DEFAULT_BREAKOUT_COEF: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct CampaignConfig {
    pub runs: u64,
    pub timeout: Option<Duration>,
    pub driver: Driver,
    pub granularity: Granularity,
    /// Transition/path blend for the combined driver, in [0, 1].
    pub schedule_coef: f64,
    /// Probability of restarting mutation from an original seed instead of a
    /// population pick.
    pub breakout_coef: f64,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            runs: 1000,
            timeout: None,
            driver: Driver::Combined,
            granularity: Granularity::Total,
            schedule_coef: 0.5,
            breakout_coef: DEFAULT_BREAKOUT_COEF,
        }
    }
}

/// Monotonic per-campaign statistics; reset only by constructing a new
/// campaign.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CampaignCounters {
    pub call_count: u64,
    pub rejected_calls: u64,
    pub covered_lines: BTreeSet<u32>,
    pub covered_paths: usize,
    pub transitions: usize,
}

/// Why the campaign stopped. A failed verdict carries the exact candidate
/// needed to reproduce the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Exhausted,
    PropertyViolated(Candidate),
    AssertionFailed(Candidate),
}

#[derive(Debug, Clone)]
pub struct CampaignReport {
    pub verdict: Verdict,
    pub counters: CampaignCounters,
    pub elapsed: Duration,
}

#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("failed to load baseline state: {0}")]
    Baseline(#[source] BackendError),
    #[error(transparent)]
    Mutator(#[from] MutatorError),
    #[error(transparent)]
    Report(#[from] ReportError),
}

/// One scheduling domain: its own population, schedule, seed queue, and the
/// mutators for the methods it covers. Partial mode builds one pool per
/// method; total mode builds a single pool spanning the contract.
struct Pool {
    mutators: BTreeMap<String, MethodMutator>,
    originals: Vec<Candidate>,
    queue: VecDeque<Candidate>,
    population: Population,
    schedule: PowerSchedule,
}

impl Pool {
    fn new(
        mutators: BTreeMap<String, MethodMutator>,
        originals: Vec<Candidate>,
        driver: Driver,
        schedule_coef: f64,
    ) -> Self {
        Self {
            queue: originals.iter().cloned().collect(),
            mutators,
            originals,
            population: Population::new(),
            schedule: PowerSchedule::for_driver(driver, schedule_coef),
        }
    }

    /// Next candidate for this pool: a queued seed while still seeding,
    /// otherwise a stacked mutation of either a population pick or (with
    /// breakout probability, and always while the population is empty) an
    /// original seed.
    fn next_candidate(
        &mut self,
        accounts: &[AccountRef],
        breakout_coef: f64,
        rng: &mut dyn RngCore,
        funder: &mut dyn AccountFunder,
    ) -> Result<Candidate, MutatorError> {
        if let Some(seeded) = self.queue.pop_front() {
            return Ok(seeded);
        }

        let base = if self.population.is_empty() || rng.random_bool(breakout_coef) {
            self.originals[rng.random_range(0..self.originals.len())].clone()
        } else {
            self.schedule
                .choose(&mut self.population, rng)
                .candidate
                .clone()
        };

        // Index panics only if the base names a method outside this pool,
        // which would be a seeding bug.
        let mutator = &self.mutators[&base.method];
        let stack = base.args.len().min(1usize << rng.random_range(1u32..=5));
        let mut args = base.args.clone();
        let mut ctx = MutationCtx {
            accounts,
            sender: &base.sender,
            funder,
        };
        for _ in 0..stack {
            args = mutator.mutate_one(&args, rng, &mut ctx)?;
        }
        Ok(Candidate::new(base.method, args, base.sender))
    }
}

/// One fuzzing run over one contract. Owns every piece of mutable search
/// state; nothing here is shared across concurrent campaigns.
pub struct Campaign {
    config: CampaignConfig,
    accounts: Vec<AccountRef>,
    line_count: usize,
    pools: Vec<Pool>,
    counters: CampaignCounters,
}

impl Campaign {
    pub fn new(contract: &AbiContract, info: &BackendInfo, config: CampaignConfig) -> Self {
        assert!(
            !contract.methods.is_empty(),
            "contract declares no methods to fuzz"
        );
        let accounts = info.accounts.clone();
        let senders: Vec<AccountRef> = if accounts.is_empty() {
            vec![AccountRef(String::new())]
        } else {
            accounts.clone()
        };

        let pools = match config.granularity {
            Granularity::Partial => contract
                .methods
                .iter()
                .map(|method| {
                    let mutator = MethodMutator::new(method);
                    let seed = Candidate::new(
                        method.name.clone(),
                        mutator.seed_args(&accounts),
                        senders[0].clone(),
                    );
                    let mutators = BTreeMap::from([(method.name.clone(), mutator)]);
                    Pool::new(mutators, vec![seed], config.driver, config.schedule_coef)
                })
                .collect(),
            Granularity::Total => {
                let mut mutators = BTreeMap::new();
                let mut originals = Vec::new();
                for method in &contract.methods {
                    let mutator = MethodMutator::new(method);
                    for sender in &senders {
                        originals.push(Candidate::new(
                            method.name.clone(),
                            mutator.seed_args(&accounts),
                            sender.clone(),
                        ));
                    }
                    mutators.insert(method.name.clone(), mutator);
                }
                vec![Pool::new(
                    mutators,
                    originals,
                    config.driver,
                    config.schedule_coef,
                )]
            }
        };

        Self {
            config,
            accounts,
            line_count: info.line_count,
            pools,
            counters: CampaignCounters::default(),
        }
    }

    pub fn counters(&self) -> &CampaignCounters {
        &self.counters
    }

    pub fn phase(&self) -> Phase {
        if self.pools.iter().any(|pool| !pool.queue.is_empty()) {
            Phase::Seeding
        } else {
            Phase::Mutating
        }
    }

    /// All seeds admitted so far, across every pool.
    pub fn seeds(&self) -> impl Iterator<Item = &Seed> {
        self.pools.iter().flat_map(|pool| pool.population.iter())
    }

    /// Runs the campaign to completion. Backend communication failures are
    /// folded into the rejected-call count; only a broken baseline load, a
    /// mutator invariant violation, or a metrics write failure aborts the
    /// run with an error. A funding failure during mutation also consumes a
    /// run from the budget even though nothing was dispatched, so a
    /// permanently broken funder cannot spin the loop forever.
    ///
    /// `progress` is called with a fresh metrics sample after every
    /// iteration; throttling any display is the callback's job.
    pub fn run(
        &mut self,
        backend: &mut dyn Backend,
        oracle: Option<&dyn Oracle>,
        rng: &mut dyn RngCore,
        mut reporter: Option<&mut MetricsWriter>,
        mut progress: Option<&mut dyn FnMut(&MetricsRow)>,
    ) -> Result<CampaignReport, CampaignError> {
        let started = Instant::now();
        info!(
            runs = self.config.runs,
            pools = self.pools.len(),
            "campaign started"
        );
        let baseline = backend.load_state().map_err(CampaignError::Baseline)?;
        let mut tracker = StateTracker::new(baseline);
        let mut seeding_done = false;

        let verdict = loop {
            if self.counters.call_count >= self.config.runs {
                break Verdict::Exhausted;
            }
            if let Some(timeout) = self.config.timeout {
                if started.elapsed() >= timeout {
                    debug!("wall-clock budget reached");
                    break Verdict::Exhausted;
                }
            }
            if !seeding_done && self.phase() == Phase::Mutating {
                seeding_done = true;
                debug!(
                    calls = self.counters.call_count,
                    "seed queue exhausted, now mutating"
                );
            }

            let pool_index = if self.pools.len() == 1 {
                0
            } else {
                rng.random_range(0..self.pools.len())
            };
            let candidate = match self.pools[pool_index].next_candidate(
                &self.accounts,
                self.config.breakout_coef,
                rng,
                &mut *backend,
            ) {
                Ok(candidate) => candidate,
                Err(MutatorError::Backend(e)) => {
                    warn!(error = %e, "backend failed during mutation, counting as rejection");
                    self.counters.call_count += 1;
                    self.counters.rejected_calls += 1;
                    self.offer_metrics(&mut reporter, &mut progress, started)?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            self.counters.call_count += 1;
            let outcome = match backend.dispatch(&candidate) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, %candidate, "dispatch failed, counting as rejection");
                    self.counters.rejected_calls += 1;
                    self.offer_metrics(&mut reporter, &mut progress, started)?;
                    continue;
                }
            };

            match outcome {
                Outcome::Rejected => {
                    self.counters.rejected_calls += 1;
                }
                Outcome::AssertionFailed => {
                    if oracle.is_none() {
                        break Verdict::AssertionFailed(candidate);
                    }
                    // The oracle is authoritative; a backend assertion is
                    // bucketed with rejections.
                    self.counters.rejected_calls += 1;
                }
                Outcome::Accepted { coverage } => {
                    self.counters.covered_lines.extend(coverage.iter().copied());
                    let fresh = match backend.load_state() {
                        Ok(snapshot) => snapshot,
                        Err(e) => {
                            warn!(error = %e, "state reload failed, counting as rejection");
                            self.counters.rejected_calls += 1;
                            self.offer_metrics(&mut reporter, &mut progress, started)?;
                            continue;
                        }
                    };
                    let (old, new) = tracker.advance(fresh);
                    let lines: BTreeSet<u32> = coverage.into_iter().collect();
                    let pid = path_id(&lines);
                    let tid = transition_id(&old, &new);

                    let pool = &mut self.pools[pool_index];
                    let is_new_path = pool.schedule.record_path(pid);
                    let is_new_transition = pool.schedule.record_transition(tid);
                    if is_new_path {
                        self.counters.covered_paths += 1;
                    }
                    if is_new_transition {
                        self.counters.transitions += 1;
                    }

                    let interesting = match self.config.driver {
                        Driver::Coverage => is_new_path,
                        Driver::State => is_new_transition,
                        Driver::Combined => is_new_path || is_new_transition,
                    };
                    if interesting {
                        debug!(%candidate, path = %pid, transition = %tid, "admitting seed");
                        pool.population
                            .push(Seed::new(candidate.clone(), Some(pid), Some(tid)));
                    }

                    if let Some(oracle) = oracle {
                        if !oracle.evaluate(&candidate.sender, tracker.current()) {
                            break Verdict::PropertyViolated(candidate);
                        }
                    }
                }
            }

            self.offer_metrics(&mut reporter, &mut progress, started)?;
        };

        let elapsed = started.elapsed();
        let final_row = self.metrics_row(started);
        if let Some(writer) = reporter.as_deref_mut() {
            writer.emit(&final_row)?;
        }
        if let Some(callback) = progress.as_deref_mut() {
            callback(&final_row);
        }
        info!(
            ?verdict,
            calls = self.counters.call_count,
            rejected = self.counters.rejected_calls,
            "campaign stopped"
        );
        Ok(CampaignReport {
            verdict,
            counters: self.counters.clone(),
            elapsed,
        })
    }

    fn offer_metrics(
        &self,
        reporter: &mut Option<&mut MetricsWriter>,
        progress: &mut Option<&mut dyn FnMut(&MetricsRow)>,
        started: Instant,
    ) -> Result<(), ReportError> {
        let row = self.metrics_row(started);
        if let Some(writer) = reporter.as_deref_mut() {
            writer.offer(&row)?;
        }
        if let Some(callback) = progress.as_deref_mut() {
            callback(&row);
        }
        Ok(())
    }

    fn metrics_row(&self, started: Instant) -> MetricsRow {
        let lines = self.counters.covered_lines.len();
        MetricsRow {
            lines_covered: lines,
            coverage: if self.line_count == 0 {
                0.0
            } else {
                lines as f64 / self.line_count as f64
            },
            covered_paths: self.counters.covered_paths,
            transitions: self.counters.transitions,
            rejected_calls: self.counters.rejected_calls,
            call_count: self.counters.call_count,
            elapsed_secs: started.elapsed().as_secs_f64(),
        }
    }
}
