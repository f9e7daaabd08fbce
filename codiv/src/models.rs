use crate::Lens;
use crate::error::{CodivError, Result};
use crate::models::comparison::ComparisonModel;
use crate::models::partition::{Hyperparameter, PartitionProcess};
use crate::rvs::Prior;

pub mod comparison;
pub mod partition;
pub mod state;

/// A generic trait for models which have some scoring function.
pub trait Model<D> {
    /// Log likelihood of the data.
    fn ln_likelihood(&self, data: &D) -> f64;

    /// Log prior density of the model.
    fn ln_prior(&self, data: &D) -> f64;

    /// Log posterior probability, with anything that is not a number
    /// treated as impossible.
    ///
    /// Arguments
    /// =========
    ///
    /// * `data` - The data to which the model is being applied.
    fn ln_score(&self, data: &D) -> f64 {
        let ln_prior = self.ln_prior(data);
        if ln_prior == f64::NEG_INFINITY {
            return ln_prior;
        }
        finite_or_neg_infinity(ln_prior + self.ln_likelihood(data))
    }
}

/// Map NaN and `+inf` to `-inf` so the value can only cause rejections.
#[must_use]
pub fn finite_or_neg_infinity(x: f64) -> f64 {
    if x.is_nan() || x == f64::INFINITY {
        f64::NEG_INFINITY
    } else {
        x
    }
}

/// Parameters of one comparison as seen by a likelihood evaluator.
#[derive(Clone, Debug, PartialEq)]
pub struct ComparisonView {
    /// Divergence time of the comparison's event.
    pub time: f64,
    pub root_size: f64,
    pub leaf_sizes: Vec<f64>,
    pub mutation_rate: f64,
    pub freq_1: f64,
}

/// Log likelihood of a comparison's character data.
///
/// Evaluators are shared between independent chains.
pub trait Likelihood: Send + Sync {
    fn ln_likelihood(&self, comparison: usize, parameters: &ComparisonView) -> f64;
}

/// Likelihood that ignores the data, turning the chain into a sampler of the
/// prior.
#[derive(Clone, Copy, Debug, Default)]
pub struct IgnoreData;

impl Likelihood for IgnoreData {
    fn ln_likelihood(&self, _comparison: usize, _parameters: &ComparisonView) -> f64 {
        0.0
    }
}

/// Partition prior together with the priors on its hyperparameters.
#[derive(Clone, Debug, PartialEq)]
pub struct EventModel {
    /// Starting hyperparameter values.
    pub process: PartitionProcess,
    pub concentration_prior: Option<Prior>,
    pub discount_prior: Option<Prior>,
    pub split_weight_prior: Option<Prior>,
}

impl EventModel {
    /// A process whose hyperparameters are all fixed.
    #[must_use]
    pub const fn fixed_hyperparameters(process: PartitionProcess) -> Self {
        Self {
            process,
            concentration_prior: None,
            discount_prior: None,
            split_weight_prior: None,
        }
    }

    pub fn new(
        process: PartitionProcess,
        concentration_prior: Option<Prior>,
        discount_prior: Option<Prior>,
        split_weight_prior: Option<Prior>,
    ) -> Result<Self> {
        let checks = [
            (Hyperparameter::Concentration, &concentration_prior),
            (Hyperparameter::Discount, &discount_prior),
            (Hyperparameter::SplitWeight, &split_weight_prior),
        ];
        for (parameter, prior) in checks {
            let Some(prior) = prior else { continue };
            if parameter.get(&process).is_none() {
                return Err(CodivError::config(format!(
                    "the {} event model has no {} to estimate",
                    process.name(),
                    parameter.name()
                )));
            }
            parameter.check_prior(prior)?;
        }
        Ok(Self {
            process,
            concentration_prior,
            discount_prior,
            split_weight_prior,
        })
    }

    /// Log prior density of the current hyperparameter values.
    #[must_use]
    pub fn ln_hyperprior(&self, process: &PartitionProcess) -> f64 {
        let term = |prior: &Option<Prior>, value: Option<f64>| match (prior, value) {
            (Some(prior), Some(value)) => prior.ln_f(value),
            _ => 0.0,
        };
        term(&self.concentration_prior, process.concentration())
            + term(&self.discount_prior, process.discount())
            + term(&self.split_weight_prior, process.split_weight())
    }
}

/// Everything about the model that does not change while sampling.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSettings {
    pub comparisons: Vec<ComparisonModel>,
    pub event_time_prior: Prior,
    pub event_model: EventModel,
}

impl ModelSettings {
    pub fn new(
        comparisons: Vec<ComparisonModel>,
        event_time_prior: Prior,
        event_model: EventModel,
    ) -> Result<Self> {
        if comparisons.is_empty() {
            return Err(CodivError::config("at least one comparison is required"));
        }
        if !matches!(event_time_prior, Prior::Gamma(_)) {
            return Err(CodivError::config(
                "event_time_prior must be a gamma_distribution",
            ));
        }
        for (i, c) in comparisons.iter().enumerate() {
            if comparisons[..i].iter().any(|other| other.label == c.label) {
                return Err(CodivError::config(format!(
                    "comparison label {} is used twice",
                    c.label
                )));
            }
        }
        if let PartitionProcess::Fixed(fixed) = &event_model.process
            && fixed.labels().len() != comparisons.len()
        {
            return Err(CodivError::config(format!(
                "fixed partition has {} entries for {} comparisons",
                fixed.labels().len(),
                comparisons.len()
            )));
        }
        if let PartitionProcess::Uniform(uniform) = &event_model.process
            && uniform.n_items() != comparisons.len()
        {
            return Err(CodivError::config(format!(
                "uniform event model built for {} comparisons, got {}",
                uniform.n_items(),
                comparisons.len()
            )));
        }
        Ok(Self {
            comparisons,
            event_time_prior,
            event_model,
        })
    }

    #[must_use]
    pub fn n_comparisons(&self) -> usize {
        self.comparisons.len()
    }
}

/// The model settings paired with the evaluator for the data.
#[derive(Clone, Debug)]
pub struct Collection<L> {
    pub settings: ModelSettings,
    pub likelihood: L,
}

impl<L: Likelihood> Collection<L> {
    pub const fn new(settings: ModelSettings, likelihood: L) -> Self {
        Self {
            settings,
            likelihood,
        }
    }

    /// Log likelihood of each comparison under `state`.
    #[must_use]
    pub fn comparison_ln_likelihoods(&self, state: &state::State) -> Vec<f64> {
        (0..state.comparisons.len())
            .map(|i| self.likelihood.ln_likelihood(i, &state.view(i)))
            .collect()
    }

    /// Log likelihood of comparison `i` if its event were at `time`.
    #[must_use]
    pub fn ln_likelihood_at(&self, state: &state::State, i: usize, time: f64) -> f64 {
        finite_or_neg_infinity(self.likelihood.ln_likelihood(i, &state.view_at(i, time)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::partition::{DirichletProcess, PitmanYorProcess, UniformPartition};

    #[test]
    fn nan_scores_become_impossible() {
        assert_eq!(finite_or_neg_infinity(f64::NAN), f64::NEG_INFINITY);
        assert_eq!(finite_or_neg_infinity(f64::INFINITY), f64::NEG_INFINITY);
        assert_eq!(finite_or_neg_infinity(-3.0), -3.0);
    }

    #[test]
    fn hyperpriors_must_match_the_process() {
        let gamma = Prior::gamma(2.0, 1.0).expect("valid");
        let dp = PartitionProcess::DirichletProcess(DirichletProcess::new(1.0).expect("valid"));
        assert!(EventModel::new(dp.clone(), Some(gamma.clone()), None, None).is_ok());
        assert!(EventModel::new(dp, None, None, Some(gamma.clone())).is_err());

        let uniform = PartitionProcess::Uniform(UniformPartition::new(3, 1.0).expect("valid"));
        let model = EventModel::new(uniform.clone(), None, None, Some(gamma.clone())).expect("valid");
        assert::close(model.ln_hyperprior(&uniform), gamma.ln_f(1.0), 1e-12);
    }

    #[test]
    fn hyperpriors_must_be_of_the_right_family() {
        let gamma = Prior::gamma(1.0, 0.5).expect("valid");
        let beta = Prior::beta(2.0, 2.0).expect("valid");
        let dp = PartitionProcess::DirichletProcess(DirichletProcess::new(1.0).expect("valid"));
        assert!(EventModel::new(dp, Some(beta.clone()), None, None).is_err());

        let pyp = PartitionProcess::PitmanYor(PitmanYorProcess::new(1.0, 0.2).expect("valid"));
        assert!(EventModel::new(pyp.clone(), None, Some(gamma.clone()), None).is_err());
        assert!(EventModel::new(pyp, Some(gamma), Some(beta.clone()), None).is_ok());

        let uniform = PartitionProcess::Uniform(UniformPartition::new(3, 1.0).expect("valid"));
        assert!(EventModel::new(uniform, None, None, Some(beta)).is_err());
    }
}
