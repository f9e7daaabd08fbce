use std::f64::consts::LN_2;

use rand::Rng;

use crate::data::partition::EventPartition;
use crate::mcmc::samplers::{Operator, Proposal, TuningKind};
use crate::models::state::State;
use crate::models::{Collection, Likelihood, ModelSettings};

/// Reversible jump split-merge sampler.
///
/// A split picks an event with at least two members uniformly, moves a
/// uniformly chosen nonempty proper subset of its members to a new event
/// whose time is drawn from the event time prior, and keeps the old time for
/// the rest. A merge picks an ordered pair of events uniformly and moves every
/// member of the first into the second, which keeps its time. Each move is
/// the other's reverse and the Hastings ratio carries the event time prior
/// density of the time that appears or disappears.
///
/// Reference: Green (1995) <https://doi.org/10.1093/biomet/82.4.711>
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SplitMergeSampler {}

impl SplitMergeSampler {
    #[must_use]
    pub const fn new() -> Self {
        Self {}
    }
}

/// Probability of attempting a split from `partition`.
fn split_probability(partition: &EventPartition) -> f64 {
    if partition.n_events() == 1 {
        1.0
    } else if partition.splittable_events().is_empty() {
        0.0
    } else {
        0.5
    }
}

/// `ln(2^n - 2)`, the number of ways to split `n` labelled members in two
/// ordered nonempty groups.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap
)]
fn ln_n_splits(n: usize) -> f64 {
    debug_assert!(n >= 2);
    (n as f64).mul_add(LN_2, (-(2.0_f64.powi(1 - n as i32))).ln_1p())
}

#[allow(clippy::cast_precision_loss)]
fn ln_usize(n: usize) -> f64 {
    (n as f64).ln()
}

impl SplitMergeSampler {
    fn split<L: Likelihood, R: Rng>(
        state: &State,
        collection: &Collection<L>,
        p_split: f64,
        rng: &mut R,
    ) -> Proposal {
        let partition = &state.partition;
        let k = partition.n_events();
        let splittable = partition.splittable_events();
        let event = splittable[rng.random_range(0..splittable.len())];
        let members: Vec<usize> = partition.members(event).collect();

        let moved: Vec<usize> = loop {
            let subset: Vec<usize> = members
                .iter()
                .copied()
                .filter(|_| rng.random::<bool>())
                .collect();
            if !subset.is_empty() && subset.len() < members.len() {
                break subset;
            }
        };

        let time_prior = &collection.settings.event_time_prior;
        let time = time_prior.draw(rng);

        let mut proposed = state.clone();
        proposed.partition.split_event(event, &moved, time);
        proposed.partition.canonicalize();

        #[allow(clippy::cast_precision_loss)]
        let ln_pairs = ((k + 1) as f64).ln() + (k as f64).ln();
        let ln_hastings = (1.0 - split_probability(&proposed.partition)).ln() - ln_pairs
            - p_split.ln()
            + ln_usize(splittable.len())
            + ln_n_splits(members.len())
            - time_prior.ln_f(time);

        Proposal::Metropolis {
            state: proposed,
            ln_hastings,
        }
    }

    fn merge<L: Likelihood, R: Rng>(
        state: &State,
        collection: &Collection<L>,
        p_split: f64,
        rng: &mut R,
    ) -> Proposal {
        let partition = &state.partition;
        let k = partition.n_events();
        let from = rng.random_range(0..k);
        let into = {
            let other = rng.random_range(0..(k - 1));
            if other >= from { other + 1 } else { other }
        };
        let removed_time = partition.event_time(from);
        let merged_size = partition.event_sizes()[from] + partition.event_sizes()[into];

        let mut proposed = state.clone();
        proposed.partition.merge_events(from, into);
        proposed.partition.canonicalize();

        #[allow(clippy::cast_precision_loss)]
        let ln_pairs = (k as f64).ln() + ((k - 1) as f64).ln();
        let ln_hastings = split_probability(&proposed.partition).ln()
            - ln_usize(proposed.partition.splittable_events().len())
            - ln_n_splits(merged_size)
            + collection.settings.event_time_prior.ln_f(removed_time)
            - (1.0 - p_split).ln()
            + ln_pairs;

        Proposal::Metropolis {
            state: proposed,
            ln_hastings,
        }
    }
}

impl Operator for SplitMergeSampler {
    fn propose<L, R>(
        &self,
        state: &State,
        collection: &Collection<L>,
        _tuning: f64,
        rng: &mut R,
    ) -> Proposal
    where
        L: Likelihood,
        R: Rng,
    {
        if state.partition.len() < 2 || !state.process.is_variable() {
            return Proposal::OutOfSupport;
        }
        let p_split = split_probability(&state.partition);
        if rng.random::<f64>() < p_split {
            Self::split(state, collection, p_split, rng)
        } else {
            Self::merge(state, collection, p_split, rng)
        }
    }

    fn is_applicable(&self, settings: &ModelSettings) -> bool {
        settings.event_model.process.is_variable() && settings.n_comparisons() > 1
    }

    fn tuning_kind(&self) -> TuningKind {
        TuningKind::Untuned
    }
}
