//! Multiplicative moves on positive parameters.
//!
//! `x' = x m` with `m = exp(λ (u - 0.5))`. The move is a symmetric random
//! walk on `ln x`, so the Hastings ratio is the Jacobian `x' / x = m`.

use rand::Rng;

use crate::Lens;
use crate::mcmc::samplers::{Operator, Proposal, choose, scale_factor};
use crate::models::comparison::ComparisonParameter;
use crate::models::partition::Hyperparameter;
use crate::models::state::State;
use crate::models::{Collection, Likelihood, ModelSettings};

/// Scales the time of one event chosen uniformly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventTimeScaler;

impl Operator for EventTimeScaler {
    fn propose<L, R>(
        &self,
        state: &State,
        _collection: &Collection<L>,
        tuning: f64,
        rng: &mut R,
    ) -> Proposal
    where
        L: Likelihood,
        R: Rng,
    {
        let event = rng.random_range(0..state.n_events());
        let m = scale_factor(tuning, rng);

        let mut proposed = state.clone();
        let time = proposed.partition.event_time(event);
        proposed.partition.set_event_time(event, time * m);

        Proposal::Metropolis {
            state: proposed,
            ln_hastings: m.ln(),
        }
    }

    fn is_applicable(&self, _settings: &ModelSettings) -> bool {
        true
    }
}

/// Which comparison parameter a [`ComparisonScaler`] moves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalerTarget {
    /// Root size, or the relative root size.
    RootSize,
    /// One leaf size, chosen uniformly.
    LeafSize,
    MeanSize,
    MutationRate,
}

impl ScalerTarget {
    const fn parameter(self, leaf: usize) -> ComparisonParameter {
        match self {
            Self::RootSize => ComparisonParameter::RootSize,
            Self::LeafSize => ComparisonParameter::LeafSize(leaf),
            Self::MeanSize => ComparisonParameter::MeanSize,
            Self::MutationRate => ComparisonParameter::MutationRate,
        }
    }
}

/// Scales one parameter of one comparison, chosen uniformly among the
/// comparisons that estimate it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComparisonScaler {
    target: ScalerTarget,
}

impl ComparisonScaler {
    #[must_use]
    pub const fn new(target: ScalerTarget) -> Self {
        Self { target }
    }

    fn candidates(&self, settings: &ModelSettings) -> Vec<usize> {
        let parameter = self.target.parameter(0);
        settings
            .comparisons
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.is_estimated(parameter).then_some(i))
            .collect()
    }
}

impl Operator for ComparisonScaler {
    fn propose<L, R>(
        &self,
        state: &State,
        collection: &Collection<L>,
        tuning: f64,
        rng: &mut R,
    ) -> Proposal
    where
        L: Likelihood,
        R: Rng,
    {
        let settings = &collection.settings;
        let Some(i) = choose(&self.candidates(settings), rng) else {
            return Proposal::OutOfSupport;
        };
        let leaf = match self.target {
            ScalerTarget::LeafSize => rng.random_range(0..settings.comparisons[i].n_leaves()),
            _ => 0,
        };
        let parameter = self.target.parameter(leaf);
        let Some(x) = parameter.get(&state.comparisons[i]) else {
            return Proposal::OutOfSupport;
        };
        let m = scale_factor(tuning, rng);

        let mut proposed = state.clone();
        parameter.set(&mut proposed.comparisons[i], x * m);

        Proposal::Metropolis {
            state: proposed,
            ln_hastings: m.ln(),
        }
    }

    fn is_applicable(&self, settings: &ModelSettings) -> bool {
        !self.candidates(settings).is_empty()
    }
}

/// Scales a positive hyperparameter of the partition prior.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HyperparameterScaler {
    parameter: Hyperparameter,
}

impl HyperparameterScaler {
    #[must_use]
    pub const fn new(parameter: Hyperparameter) -> Self {
        Self { parameter }
    }
}

impl Operator for HyperparameterScaler {
    fn propose<L, R>(
        &self,
        state: &State,
        _collection: &Collection<L>,
        tuning: f64,
        rng: &mut R,
    ) -> Proposal
    where
        L: Likelihood,
        R: Rng,
    {
        let Some(x) = self.parameter.get(&state.process) else {
            return Proposal::OutOfSupport;
        };
        let m = scale_factor(tuning, rng);

        let mut proposed = state.clone();
        self.parameter.set(&mut proposed.process, x * m);

        Proposal::Metropolis {
            state: proposed,
            ln_hastings: m.ln(),
        }
    }

    fn is_applicable(&self, settings: &ModelSettings) -> bool {
        let event_model = &settings.event_model;
        match self.parameter {
            Hyperparameter::Concentration => event_model.concentration_prior.is_some(),
            Hyperparameter::Discount => event_model.discount_prior.is_some(),
            Hyperparameter::SplitWeight => event_model.split_weight_prior.is_some(),
        }
    }
}
