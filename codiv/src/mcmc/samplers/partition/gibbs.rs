use rand::Rng;
use rand::seq::SliceRandom;

use crate::mcmc::samplers::{Operator, Proposal, TuningKind};
use crate::models::partition::RandomPartitionModel;
use crate::models::state::State;
use crate::models::{Collection, Likelihood, ModelSettings};
use crate::utils::draw_category;

/// Gibbs based sampling on the space of partitions.
///
/// Each comparison in turn is removed and reassigned to an existing event or
/// to one of `n_auxiliary` candidate new events whose times are drawn from the
/// event time prior (Neal 2000, algorithm 8). When the removed comparison was
/// alone in its event, that event's time is the first candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionGibbs {
    n_auxiliary: usize,
}

impl Default for PartitionGibbs {
    fn default() -> Self {
        Self::new(4)
    }
}

impl PartitionGibbs {
    /// A sampler proposing `n_auxiliary` candidate new events per
    /// reassignment. `n_auxiliary` must be positive.
    #[must_use]
    pub const fn new(n_auxiliary: usize) -> Self {
        debug_assert!(n_auxiliary > 0);
        Self { n_auxiliary }
    }

    #[must_use]
    pub const fn n_auxiliary(&self) -> usize {
        self.n_auxiliary
    }
}

impl Operator for PartitionGibbs {
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
        let time_prior = &collection.settings.event_time_prior;
        #[allow(clippy::cast_precision_loss)]
        let ln_n_auxiliary = (self.n_auxiliary as f64).ln();

        let mut model = state.clone();
        let mut indices: Vec<usize> = (0..model.partition.len()).collect();
        indices.shuffle(rng);

        for index in indices {
            let removed = model.partition.unassign(index);
            let Some(weights) = model
                .process
                .conditional_category_log_weights(model.partition.event_sizes())
            else {
                return Proposal::OutOfSupport;
            };

            let auxiliary_times: Vec<f64> = (0..self.n_auxiliary)
                .map(|j| match (j, removed) {
                    (0, Some(event)) => event.time,
                    _ => time_prior.draw(rng),
                })
                .collect();

            let mut log_weights: Vec<f64> = weights
                .existing
                .iter()
                .zip(model.partition.events())
                .map(|(w, event)| w + collection.ln_likelihood_at(&model, index, event.time))
                .collect();
            log_weights.extend(auxiliary_times.iter().map(|&time| {
                weights.new - ln_n_auxiliary + collection.ln_likelihood_at(&model, index, time)
            }));

            if log_weights.iter().all(|w| *w == f64::NEG_INFINITY) {
                return Proposal::OutOfSupport;
            }

            let n_existing = weights.existing.len();
            let choice = draw_category(&log_weights, rng);
            if choice < n_existing {
                model.partition.assign(index, choice);
            } else {
                model
                    .partition
                    .assign_new(index, auxiliary_times[choice - n_existing]);
            }
        }

        model.partition.canonicalize();
        Proposal::Gibbs { state: model }
    }

    fn is_applicable(&self, settings: &ModelSettings) -> bool {
        settings.event_model.process.is_variable() && settings.n_comparisons() > 1
    }

    fn tuning_kind(&self) -> TuningKind {
        TuningKind::Untuned
    }
}
