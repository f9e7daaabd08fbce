//! Joint moves on correlated parameters.
//!
//! An [`EventMixer`] multiplies an event time and some parameters of the
//! event's members by one factor `m` (and others by `1 / m`). On the log
//! scale this shifts `p` coordinates by `ln m` and `q` coordinates by
//! `-ln m`, so the Hastings ratio is `m^(p - q)`.

use rand::Rng;

use crate::Lens;
use crate::mcmc::samplers::{Operator, Proposal, choose, scale_factor};
use crate::models::comparison::{ComparisonModel, ComparisonParameter};
use crate::models::state::State;
use crate::models::{Collection, Likelihood, ModelSettings};
use crate::rvs::DirichletPrior;

/// Which parameters move together with the event time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MixerKind {
    /// Every estimated size scale up, every estimated mutation rate down.
    TimeSizeRate,
    /// The root size (or relative root size) up.
    TimeRootSize,
    /// The mean size up and the mutation rate down, for comparisons
    /// parameterised by size multipliers.
    TimeMeanSizeRate,
}

impl MixerKind {
    /// Coordinates of one comparison scaled by `m` and by `1 / m`.
    fn coordinates(
        self,
        model: &ComparisonModel,
    ) -> (Vec<ComparisonParameter>, Vec<ComparisonParameter>) {
        let rate = || {
            if model.is_estimated(ComparisonParameter::MutationRate) {
                vec![ComparisonParameter::MutationRate]
            } else {
                Vec::new()
            }
        };
        match self {
            Self::TimeSizeRate => (model.size_scale_coordinates(), rate()),
            Self::TimeRootSize => {
                let up = if !model.uses_multipliers()
                    && model.is_estimated(ComparisonParameter::RootSize)
                {
                    vec![ComparisonParameter::RootSize]
                } else {
                    Vec::new()
                };
                (up, Vec::new())
            }
            Self::TimeMeanSizeRate => {
                if !model.uses_multipliers() {
                    return (Vec::new(), Vec::new());
                }
                let up = if model.is_estimated(ComparisonParameter::MeanSize) {
                    vec![ComparisonParameter::MeanSize]
                } else {
                    Vec::new()
                };
                (up, rate())
            }
        }
    }
}

/// Scales the time of an event chosen uniformly together with the member
/// parameters picked out by its [`MixerKind`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventMixer {
    kind: MixerKind,
}

impl EventMixer {
    #[must_use]
    pub const fn new(kind: MixerKind) -> Self {
        Self { kind }
    }
}

impl Operator for EventMixer {
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
        let event = rng.random_range(0..state.n_events());
        let m = scale_factor(tuning, rng);

        let mut proposed = state.clone();
        let time = state.partition.event_time(event);
        proposed.partition.set_event_time(event, time * m);

        // the event time itself
        let mut n_up: i32 = 1;
        let mut n_down: i32 = 0;
        for i in state.partition.members(event) {
            let (up, down) = self.kind.coordinates(&collection.settings.comparisons[i]);
            let comparison = &mut proposed.comparisons[i];
            for parameter in up {
                if let Some(x) = parameter.get(comparison) {
                    parameter.set(comparison, x * m);
                    n_up += 1;
                }
            }
            for parameter in down {
                if let Some(x) = parameter.get(comparison) {
                    parameter.set(comparison, x / m);
                    n_down += 1;
                }
            }
        }

        Proposal::Metropolis {
            state: proposed,
            ln_hastings: f64::from(n_up - n_down) * m.ln(),
        }
    }

    fn is_applicable(&self, settings: &ModelSettings) -> bool {
        settings.comparisons.iter().any(|c| {
            let (up, down) = self.kind.coordinates(c);
            !up.is_empty() || !down.is_empty()
        })
    }

    fn target_acceptance(&self) -> f64 {
        0.234
    }
}

/// Redraws the relative branch sizes of one comparison.
///
/// The proposal is `π' ~ Dirichlet(κ π)` with concentration `κ = 1 / λ`, so
/// smaller tuning values make smaller moves. The Hastings ratio is
/// `Dir(π | κ π') / Dir(π' | κ π)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelativePopulationSizeMixer;

impl RelativePopulationSizeMixer {
    fn candidates(settings: &ModelSettings) -> Vec<usize> {
        settings
            .comparisons
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.multipliers_estimated().then_some(i))
            .collect()
    }
}

fn scaled_dirichlet(kappa: f64, center: &[f64]) -> Option<DirichletPrior> {
    let alphas: Vec<f64> = center.iter().map(|p| kappa * p).collect();
    if alphas.iter().any(|a| !(a.is_finite() && *a > 0.0)) {
        return None;
    }
    DirichletPrior::new(alphas).ok()
}

impl Operator for RelativePopulationSizeMixer {
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
        let Some(i) = choose(&Self::candidates(&collection.settings), rng) else {
            return Proposal::OutOfSupport;
        };
        let Some(current) = state.comparisons[i].multipliers() else {
            return Proposal::OutOfSupport;
        };
        let kappa = tuning.recip();

        let Some(forward) = scaled_dirichlet(kappa, current) else {
            return Proposal::OutOfSupport;
        };
        let next: Vec<f64> = forward.draw(rng);
        let Some(backward) = scaled_dirichlet(kappa, &next) else {
            return Proposal::OutOfSupport;
        };

        let ln_hastings = backward.ln_f(current) - forward.ln_f(&next);
        if ln_hastings.is_nan() {
            return Proposal::OutOfSupport;
        }

        let mut proposed = state.clone();
        if let Some(multipliers) = proposed.comparisons[i].multipliers_mut() {
            *multipliers = next;
        }

        Proposal::Metropolis {
            state: proposed,
            ln_hastings,
        }
    }

    fn is_applicable(&self, settings: &ModelSettings) -> bool {
        !Self::candidates(settings).is_empty()
    }

    fn target_acceptance(&self) -> f64 {
        0.234
    }
}
