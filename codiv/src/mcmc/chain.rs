//! The Metropolis-Hastings driver and independent parallel chains.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;

use crate::error::{CodivError, Result};
use crate::io::StateLogWriter;
use crate::mcmc::samplers::{Operator, Proposal};
use crate::mcmc::schedule::{OperatorSchedule, ScheduleSettings};
use crate::mcmc::{Link, Sampler};
use crate::models::state::State;
use crate::models::{Collection, Likelihood};

/// Number of progress messages a full run logs.
const PROGRESS_REPORTS: usize = 10;

/// Length of a run and how often it is sampled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct McmcSettings {
    pub chain_length: usize,
    pub sample_frequency: usize,
}

impl McmcSettings {
    pub fn new(chain_length: usize, sample_frequency: usize) -> Result<Self> {
        if sample_frequency == 0 {
            return Err(CodivError::config("sample_frequency must be at least 1"));
        }
        Ok(Self {
            chain_length,
            sample_frequency,
        })
    }

    /// Rows a complete run logs, the starting state included.
    #[must_use]
    pub const fn n_samples(&self) -> usize {
        self.chain_length / self.sample_frequency + 1
    }
}

/// One Markov chain: an operator schedule and a generation counter.
///
/// Every generation draws one operator, accepts or rejects its proposal and
/// reports the outcome back to the schedule for auto-optimisation.
#[derive(Clone, Debug)]
pub struct Chain {
    schedule: OperatorSchedule,
    generation: usize,
}

impl Chain {
    #[must_use]
    pub const fn new(schedule: OperatorSchedule) -> Self {
        Self {
            schedule,
            generation: 0,
        }
    }

    /// Continue counting from `generation`, for resumed runs.
    #[must_use]
    pub const fn starting_at(mut self, generation: usize) -> Self {
        self.generation = generation;
        self
    }

    #[must_use]
    pub const fn generation(&self) -> usize {
        self.generation
    }

    #[must_use]
    pub const fn schedule(&self) -> &OperatorSchedule {
        &self.schedule
    }

    /// Run `settings.chain_length` generations from `start`, logging a row at
    /// the start and every `sample_frequency` generations after it.
    ///
    /// Stops early, between generations, once `stop` is set.
    pub fn run<L, W, R>(
        &mut self,
        start: Link<State>,
        collection: &Collection<L>,
        settings: &McmcSettings,
        writer: &mut StateLogWriter<W>,
        stop: &AtomicBool,
        rng: &mut R,
    ) -> Result<RunSummary>
    where
        L: Likelihood,
        W: Write,
        R: Rng,
    {
        if !start.ln_posterior().is_finite() {
            tracing::warn!(
                "starting state has log posterior {}; the chain moves on once a proposal is accepted",
                start.ln_posterior()
            );
        }
        tracing::info!(
            "running {} generations from generation {}, sampling every {}",
            settings.chain_length,
            self.generation,
            settings.sample_frequency
        );

        let first = self.generation;
        let report_every = (settings.chain_length / PROGRESS_REPORTS).max(1);
        writer.write_row(self.generation, &start, collection)?;
        let mut n_samples = 1;
        let mut interrupted = false;

        let mut link = start;
        for step in 1..=settings.chain_length {
            if stop.load(Ordering::Relaxed) {
                interrupted = true;
                tracing::info!("stopping at generation {}", self.generation);
                break;
            }
            link = self.step(link, collection, rng);
            if step % settings.sample_frequency == 0 {
                writer.write_row(self.generation, &link, collection)?;
                n_samples += 1;
            }
            if step % report_every == 0 {
                tracing::info!(
                    "generation {} ({}%): ln posterior {:.4}, {} events",
                    self.generation,
                    100 * step / settings.chain_length,
                    link.ln_posterior(),
                    link.model.n_events()
                );
            }
        }
        writer.flush()?;

        self.schedule.log_summary();
        tracing::info!(
            "finished after {} generations with {n_samples} samples",
            self.generation - first
        );
        Ok(RunSummary {
            last: link,
            generation: self.generation,
            n_samples,
            interrupted,
        })
    }
}

impl<L: Likelihood> Sampler<Link<State>, Collection<L>> for Chain {
    fn step<R: Rng>(
        &mut self,
        current: Link<State>,
        collection: &Collection<L>,
        rng: &mut R,
    ) -> Link<State> {
        let index = self.schedule.next_operator(rng);
        let scheduled = self.schedule.get(index);
        let proposal = scheduled.operator.propose(
            &current.model,
            collection,
            scheduled.tuning.value(),
            rng,
        );

        let (next, accepted) = match proposal {
            Proposal::Gibbs { state } => (Link::new(state, collection), true),
            Proposal::Metropolis { state, ln_hastings } => {
                let proposed = Link::new(state, collection);
                let ln_ratio = proposed.ln_posterior() - current.ln_posterior() + ln_hastings;
                // NaN compares false and rejects
                if rng.random::<f64>().ln() < ln_ratio {
                    (proposed, true)
                } else {
                    (current, false)
                }
            }
            Proposal::OutOfSupport => (current, false),
        };

        self.schedule.update(index, accepted, self.generation);
        self.generation += 1;
        next
    }
}

/// Where a run ended.
#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub last: Link<State>,
    pub generation: usize,
    pub n_samples: usize,
    pub interrupted: bool,
}

/// Shared description of a set of independent chains.
#[derive(Clone, Debug)]
pub struct ChainSet<'a, L> {
    pub collection: &'a Collection<L>,
    pub schedule: &'a ScheduleSettings,
    pub mcmc: McmcSettings,
    pub seed: u64,
    /// Resume every chain from this state and generation.
    pub resume: Option<(usize, State)>,
}

impl<L: Likelihood> ChainSet<'_, L> {
    /// Run `n_chains` independent chains in parallel.
    ///
    /// Chain `i` draws from `Xoshiro256PlusPlus` seeded with `seed + i` and
    /// logs to the writer `make_writer(i)` returns. The first error of any
    /// chain is returned.
    pub fn run<W, F>(
        &self,
        n_chains: usize,
        make_writer: F,
        stop: &AtomicBool,
    ) -> Result<Vec<RunSummary>>
    where
        W: Write + Send,
        F: Fn(usize) -> Result<W> + Sync,
    {
        tracing::info!("starting {n_chains} chains with seed {}", self.seed);
        (0..n_chains)
            .into_par_iter()
            .map(|i| {
                let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.seed.wrapping_add(i as u64));
                let schedule = OperatorSchedule::new(self.schedule, &self.collection.settings)?;
                let (generation, state) = match &self.resume {
                    Some((generation, state)) => (*generation, state.clone()),
                    None => (0, State::initial(&self.collection.settings, &mut rng)),
                };
                let mut writer = StateLogWriter::new(make_writer(i)?, &self.collection.settings)?;
                let mut chain = Chain::new(schedule).starting_at(generation);
                let span = tracing::info_span!("chain", index = i);
                let _guard = span.enter();
                chain.run(
                    Link::new(state, self.collection),
                    self.collection,
                    &self.mcmc,
                    &mut writer,
                    stop,
                    &mut rng,
                )
            })
            .collect()
    }
}
