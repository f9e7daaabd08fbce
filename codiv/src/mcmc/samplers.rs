//! Moves on [`State`].
//!
//! Every operator proposes a new state from the current one; the chain scores
//! the proposal and decides whether to keep it. Operators never fail: a
//! proposal that leaves the support of a parameter is reported as
//! [`Proposal::OutOfSupport`] and rejected.

use std::fmt;
use std::str::FromStr;

use rand::Rng;

use crate::error::{CodivError, Result};
use crate::models::partition::{Hyperparameter, PartitionProcess};
use crate::models::state::State;
use crate::models::{Collection, Likelihood, ModelSettings};

pub mod continuous;
pub mod partition;

use continuous::mixers::{EventMixer, MixerKind, RelativePopulationSizeMixer};
use continuous::scalers::{ComparisonScaler, EventTimeScaler, HyperparameterScaler, ScalerTarget};
use continuous::window::{WindowMover, WindowTarget};
use partition::gibbs::PartitionGibbs;
use partition::split_merge::SplitMergeSampler;

/// Outcome of one call to [`Operator::propose`].
#[derive(Clone, Debug, PartialEq)]
pub enum Proposal {
    /// Accept with probability `min(1, exp(Δ ln posterior + ln_hastings))`.
    Metropolis { state: State, ln_hastings: f64 },
    /// A draw from a full conditional, always accepted.
    Gibbs { state: State },
    /// The move left the support of a parameter and is rejected outright.
    OutOfSupport,
}

/// Behaviour shared by every move.
pub trait Operator {
    fn propose<L, R>(
        &self,
        state: &State,
        collection: &Collection<L>,
        tuning: f64,
        rng: &mut R,
    ) -> Proposal
    where
        L: Likelihood,
        R: Rng;

    /// Whether the move can change anything under `settings`.
    fn is_applicable(&self, settings: &ModelSettings) -> bool;

    /// Acceptance rate that auto-optimisation steers towards.
    fn target_acceptance(&self) -> f64 {
        0.44
    }

    fn tuning_kind(&self) -> TuningKind {
        TuningKind::Scale
    }
}

/// What an operator's tuning parameter means.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TuningKind {
    /// Multiplicative step size, adapted on the log scale.
    Scale,
    /// Additive window on the unit interval, never wider than 1.
    Window,
    /// Nothing to tune.
    Untuned,
}

/// Multiplier `exp(λ (u - 0.5))` with `u ~ U(0, 1)`.
pub(crate) fn scale_factor<R: Rng>(lambda: f64, rng: &mut R) -> f64 {
    (lambda * (rng.random::<f64>() - 0.5)).exp()
}

/// Uniform choice from `candidates`, `None` when there are none.
pub(crate) fn choose<R: Rng>(candidates: &[usize], rng: &mut R) -> Option<usize> {
    if candidates.is_empty() {
        None
    } else {
        Some(candidates[rng.random_range(0..candidates.len())])
    }
}

/// Names that operators are configured by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperatorName {
    ModelOperator,
    ConcentrationScaler,
    DiscountMover,
    SplitWeightScaler,
    EventTimeScaler,
    FreqMover,
    MutationRateScaler,
    RootPopulationSizeScaler,
    LeafPopulationSizeScaler,
    MeanPopulationSizeScaler,
    RelativePopulationSizeMixer,
    TimeSizeRateMixer,
    TimeRootSizeMixer,
    TimeMeanSizeRateMixer,
}

impl OperatorName {
    pub const ALL: [Self; 14] = [
        Self::ModelOperator,
        Self::ConcentrationScaler,
        Self::DiscountMover,
        Self::SplitWeightScaler,
        Self::EventTimeScaler,
        Self::FreqMover,
        Self::MutationRateScaler,
        Self::RootPopulationSizeScaler,
        Self::LeafPopulationSizeScaler,
        Self::MeanPopulationSizeScaler,
        Self::RelativePopulationSizeMixer,
        Self::TimeSizeRateMixer,
        Self::TimeRootSizeMixer,
        Self::TimeMeanSizeRateMixer,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ModelOperator => "ModelOperator",
            Self::ConcentrationScaler => "ConcentrationScaler",
            Self::DiscountMover => "DiscountMover",
            Self::SplitWeightScaler => "SplitWeightScaler",
            Self::EventTimeScaler => "EventTimeScaler",
            Self::FreqMover => "FreqMover",
            Self::MutationRateScaler => "MutationRateScaler",
            Self::RootPopulationSizeScaler => "RootPopulationSizeScaler",
            Self::LeafPopulationSizeScaler => "LeafPopulationSizeScaler",
            Self::MeanPopulationSizeScaler => "MeanPopulationSizeScaler",
            Self::RelativePopulationSizeMixer => "RelativePopulationSizeMixer",
            Self::TimeSizeRateMixer => "TimeSizeRateMixer",
            Self::TimeRootSizeMixer => "TimeRootSizeMixer",
            Self::TimeMeanSizeRateMixer => "TimeMeanSizeRateMixer",
        }
    }

    /// Relative weight used when the configuration gives none.
    #[must_use]
    pub const fn default_weight(self) -> f64 {
        match self {
            Self::ModelOperator => 5.0,
            Self::EventTimeScaler | Self::TimeSizeRateMixer => 2.0,
            _ => 1.0,
        }
    }

    /// Starting scale or window used when the configuration gives none.
    #[must_use]
    pub const fn default_tuning(self) -> f64 {
        match self {
            Self::DiscountMover | Self::FreqMover => 0.1,
            Self::RelativePopulationSizeMixer => 0.01,
            Self::TimeSizeRateMixer | Self::TimeRootSizeMixer | Self::TimeMeanSizeRateMixer => 0.5,
            _ => 1.0,
        }
    }
}

impl fmt::Display for OperatorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatorName {
    type Err = CodivError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| CodivError::config(format!("unknown operator {s}")))
    }
}

/// How `ModelOperator` updates the partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionSampler {
    Gibbs { n_auxiliary: usize },
    ReversibleJump,
}

impl PartitionSampler {
    /// Reversible jump for the uniform prior, Gibbs for the processes.
    #[must_use]
    pub const fn default_for(process: &PartitionProcess, n_auxiliary: usize) -> Self {
        match process {
            PartitionProcess::Uniform(_) => Self::ReversibleJump,
            _ => Self::Gibbs { n_auxiliary },
        }
    }
}

/// The closed set of moves a schedule can hold.
#[derive(Clone, Debug, PartialEq)]
pub enum OperatorKind {
    EventTimeScaler(EventTimeScaler),
    ComparisonScaler(ComparisonScaler),
    HyperparameterScaler(HyperparameterScaler),
    WindowMover(WindowMover),
    EventMixer(EventMixer),
    RelativePopulationSizeMixer(RelativePopulationSizeMixer),
    PartitionGibbs(PartitionGibbs),
    SplitMerge(SplitMergeSampler),
}

impl OperatorKind {
    /// The operator configured as `name`.
    #[must_use]
    pub const fn from_name(name: OperatorName, partition_sampler: PartitionSampler) -> Self {
        match name {
            OperatorName::ModelOperator => match partition_sampler {
                PartitionSampler::Gibbs { n_auxiliary } => {
                    Self::PartitionGibbs(PartitionGibbs::new(n_auxiliary))
                }
                PartitionSampler::ReversibleJump => Self::SplitMerge(SplitMergeSampler::new()),
            },
            OperatorName::ConcentrationScaler => {
                Self::HyperparameterScaler(HyperparameterScaler::new(Hyperparameter::Concentration))
            }
            OperatorName::SplitWeightScaler => {
                Self::HyperparameterScaler(HyperparameterScaler::new(Hyperparameter::SplitWeight))
            }
            OperatorName::DiscountMover => Self::WindowMover(WindowMover::new(WindowTarget::Discount)),
            OperatorName::FreqMover => Self::WindowMover(WindowMover::new(WindowTarget::Freq1)),
            OperatorName::EventTimeScaler => Self::EventTimeScaler(EventTimeScaler),
            OperatorName::MutationRateScaler => {
                Self::ComparisonScaler(ComparisonScaler::new(ScalerTarget::MutationRate))
            }
            OperatorName::RootPopulationSizeScaler => {
                Self::ComparisonScaler(ComparisonScaler::new(ScalerTarget::RootSize))
            }
            OperatorName::LeafPopulationSizeScaler => {
                Self::ComparisonScaler(ComparisonScaler::new(ScalerTarget::LeafSize))
            }
            OperatorName::MeanPopulationSizeScaler => {
                Self::ComparisonScaler(ComparisonScaler::new(ScalerTarget::MeanSize))
            }
            OperatorName::RelativePopulationSizeMixer => {
                Self::RelativePopulationSizeMixer(RelativePopulationSizeMixer)
            }
            OperatorName::TimeSizeRateMixer => Self::EventMixer(EventMixer::new(MixerKind::TimeSizeRate)),
            OperatorName::TimeRootSizeMixer => Self::EventMixer(EventMixer::new(MixerKind::TimeRootSize)),
            OperatorName::TimeMeanSizeRateMixer => {
                Self::EventMixer(EventMixer::new(MixerKind::TimeMeanSizeRate))
            }
        }
    }
}

impl Operator for OperatorKind {
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
        match self {
            Self::EventTimeScaler(op) => op.propose(state, collection, tuning, rng),
            Self::ComparisonScaler(op) => op.propose(state, collection, tuning, rng),
            Self::HyperparameterScaler(op) => op.propose(state, collection, tuning, rng),
            Self::WindowMover(op) => op.propose(state, collection, tuning, rng),
            Self::EventMixer(op) => op.propose(state, collection, tuning, rng),
            Self::RelativePopulationSizeMixer(op) => op.propose(state, collection, tuning, rng),
            Self::PartitionGibbs(op) => op.propose(state, collection, tuning, rng),
            Self::SplitMerge(op) => op.propose(state, collection, tuning, rng),
        }
    }

    fn is_applicable(&self, settings: &ModelSettings) -> bool {
        match self {
            Self::EventTimeScaler(op) => op.is_applicable(settings),
            Self::ComparisonScaler(op) => op.is_applicable(settings),
            Self::HyperparameterScaler(op) => op.is_applicable(settings),
            Self::WindowMover(op) => op.is_applicable(settings),
            Self::EventMixer(op) => op.is_applicable(settings),
            Self::RelativePopulationSizeMixer(op) => op.is_applicable(settings),
            Self::PartitionGibbs(op) => op.is_applicable(settings),
            Self::SplitMerge(op) => op.is_applicable(settings),
        }
    }

    fn target_acceptance(&self) -> f64 {
        match self {
            Self::EventTimeScaler(op) => op.target_acceptance(),
            Self::ComparisonScaler(op) => op.target_acceptance(),
            Self::HyperparameterScaler(op) => op.target_acceptance(),
            Self::WindowMover(op) => op.target_acceptance(),
            Self::EventMixer(op) => op.target_acceptance(),
            Self::RelativePopulationSizeMixer(op) => op.target_acceptance(),
            Self::PartitionGibbs(op) => op.target_acceptance(),
            Self::SplitMerge(op) => op.target_acceptance(),
        }
    }

    fn tuning_kind(&self) -> TuningKind {
        match self {
            Self::EventTimeScaler(op) => op.tuning_kind(),
            Self::ComparisonScaler(op) => op.tuning_kind(),
            Self::HyperparameterScaler(op) => op.tuning_kind(),
            Self::WindowMover(op) => op.tuning_kind(),
            Self::EventMixer(op) => op.tuning_kind(),
            Self::RelativePopulationSizeMixer(op) => op.tuning_kind(),
            Self::PartitionGibbs(op) => op.tuning_kind(),
            Self::SplitMerge(op) => op.tuning_kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    #[test]
    fn operator_names_round_trip() {
        for name in OperatorName::ALL {
            assert_eq!(name.as_str().parse::<OperatorName>().expect("known"), name);
        }
        assert!("BogusOperator".parse::<OperatorName>().is_err());
    }

    #[test]
    fn scale_factor_is_bounded() {
        let mut rng = SmallRng::seed_from_u64(99);
        for _ in 0..1000 {
            let m = scale_factor(2.0, &mut rng);
            assert!(m > (-1.0_f64).exp() && m < 1.0_f64.exp());
        }
    }

    #[test]
    fn choose_from_nothing() {
        let mut rng = SmallRng::seed_from_u64(1);
        assert_eq!(choose(&[], &mut rng), None);
        assert_eq!(choose(&[4], &mut rng), Some(4));
    }
}
