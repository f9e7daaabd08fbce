//! Run configuration.
//!
//! [`Config`] mirrors the configuration file and is deserialised with serde;
//! [`Config::into_settings`] checks it and builds the typed settings the
//! sampler runs on. Every problem is reported here, before any sampling.
//!
//! Priors are written as externally tagged tables, for example
//! `{ gamma_distribution = { shape = 5.0, scale = 0.1 } }`. A parameter is
//! estimated when it has a prior unless `estimate = false`, and fixed
//! parameters need a `value`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CodivError, Result};
use crate::mcmc::chain::McmcSettings;
use crate::mcmc::samplers::{
    Operator, OperatorKind, OperatorName, PartitionSampler, TuningKind,
};
use crate::mcmc::schedule::{OperatorSettings, ScheduleSettings};
use crate::models::comparison::{
    ComparisonModel, MultiplierModel, ParameterModel, PopulationSizeModel,
};
use crate::models::partition::{
    DirichletProcess, FixedPartition, Hyperparameter, PartitionProcess, PitmanYorProcess,
    UniformPartition,
};
use crate::models::{EventModel, ModelSettings};
use crate::rvs::{DirichletPrior, Prior};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorSettings {
    GammaDistribution { shape: f64, scale: f64 },
    BetaDistribution { alpha: f64, beta: f64 },
}

impl PriorSettings {
    pub fn build(&self) -> Result<Prior> {
        match *self {
            Self::GammaDistribution { shape, scale } => Prior::gamma(shape, scale),
            Self::BetaDistribution { alpha, beta } => Prior::beta(alpha, beta),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirichletSettings {
    DirichletDistribution { alpha: Vec<f64> },
}

/// A scalar parameter: a fixed value, or a prior with an optional start.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterSettings {
    pub value: Option<f64>,
    pub estimate: Option<bool>,
    pub prior: Option<PriorSettings>,
}

impl ParameterSettings {
    #[must_use]
    pub const fn fixed(value: f64) -> Self {
        Self {
            value: Some(value),
            estimate: Some(false),
            prior: None,
        }
    }

    fn is_estimated(&self) -> bool {
        self.estimate.unwrap_or(self.prior.is_some())
    }

    pub fn build(&self, what: &str) -> Result<ParameterModel> {
        match (self.is_estimated(), &self.prior, self.value) {
            (true, Some(prior), value) => ParameterModel::estimated(prior.build()?, value),
            (true, None, _) => Err(CodivError::config(format!(
                "{what} is estimated but has no prior"
            ))),
            (false, _, Some(value)) => Ok(ParameterModel::fixed(value)),
            (false, _, None) => Err(CodivError::config(format!(
                "{what} is fixed but has no value"
            ))),
        }
    }

    /// Starting value and prior of a partition hyperparameter.
    ///
    /// The prior family is checked before its mean is used as a starting
    /// value.
    fn hyperparameter(&self, parameter: Hyperparameter) -> Result<(f64, Option<Prior>)> {
        let what = parameter.name();
        if self.is_estimated() {
            let Some(prior) = &self.prior else {
                return Err(CodivError::config(format!(
                    "{what} is estimated but has no prior"
                )));
            };
            let prior = prior.build()?;
            parameter.check_prior(&prior)?;
            let value = self.value.unwrap_or_else(|| prior.mean());
            Ok((value, Some(prior)))
        } else {
            let value = self
                .value
                .ok_or_else(|| CodivError::config(format!("{what} is fixed but has no value")))?;
            Ok((value, None))
        }
    }
}

/// Relative branch sizes that share out a mean population size.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MultiplierSettings {
    pub value: Option<Vec<f64>>,
    pub estimate: Option<bool>,
    pub prior: Option<DirichletSettings>,
}

impl MultiplierSettings {
    fn build(&self, what: &str) -> Result<MultiplierModel> {
        let estimate = self.estimate.unwrap_or(self.prior.is_some());
        match (estimate, &self.prior, &self.value) {
            (true, Some(DirichletSettings::DirichletDistribution { alpha }), value) => {
                MultiplierModel::estimated(DirichletPrior::new(alpha.clone())?, value.clone())
            }
            (true, None, _) => Err(CodivError::config(format!(
                "{what} is estimated but has no prior"
            ))),
            (false, _, Some(value)) => MultiplierModel::fixed(value.clone()),
            (false, _, None) => Err(CodivError::config(format!(
                "{what} is fixed but has no value"
            ))),
        }
    }
}

/// Population size parameters of one comparison.
///
/// `leaf` with an optional `root` (defaulting to the leaf settings) gives
/// independent sizes, `leaf` with `relative_root` ties the root to the mean
/// leaf size, and `mean` with `multipliers` shares one size out over the
/// branches.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PopulationSizeSettings {
    pub leaf: Option<ParameterSettings>,
    pub root: Option<ParameterSettings>,
    pub relative_root: Option<ParameterSettings>,
    pub mean: Option<ParameterSettings>,
    pub multipliers: Option<MultiplierSettings>,
}

impl PopulationSizeSettings {
    fn build(&self, label: &str) -> Result<PopulationSizeModel> {
        match (
            &self.leaf,
            &self.root,
            &self.relative_root,
            &self.mean,
            &self.multipliers,
        ) {
            (Some(leaf), root, None, None, None) => Ok(PopulationSizeModel::Independent {
                root: root
                    .as_ref()
                    .unwrap_or(leaf)
                    .build(&format!("root population size of {label}"))?,
                leaf: leaf.build(&format!("population size of {label}"))?,
            }),
            (Some(leaf), None, Some(relative_root), None, None) => {
                Ok(PopulationSizeModel::RootRelative {
                    leaf: leaf.build(&format!("population size of {label}"))?,
                    relative_root: relative_root
                        .build(&format!("relative root population size of {label}"))?,
                })
            }
            (None, None, None, Some(mean), Some(multipliers)) => {
                Ok(PopulationSizeModel::Multipliers {
                    mean: mean.build(&format!("mean population size of {label}"))?,
                    multipliers: multipliers
                        .build(&format!("population size multipliers of {label}"))?,
                })
            }
            _ => Err(CodivError::config(format!(
                "population sizes of {label} need leaf (with root or relative_root) or mean with multipliers"
            ))),
        }
    }
}

fn default_mutation_rate() -> ParameterSettings {
    ParameterSettings::fixed(1.0)
}

fn default_freq_1() -> ParameterSettings {
    ParameterSettings::fixed(0.5)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComparisonSettings {
    pub label: String,
    pub populations: Vec<String>,
    /// Character data, opaque to the sampler.
    pub path: Option<String>,
    pub population_sizes: PopulationSizeSettings,
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: ParameterSettings,
    #[serde(default = "default_freq_1")]
    pub freq_1: ParameterSettings,
}

impl ComparisonSettings {
    pub fn build(&self) -> Result<ComparisonModel> {
        ComparisonModel::new(
            self.label.clone(),
            self.populations.clone(),
            self.path.clone(),
            self.population_sizes.build(&self.label)?,
            self.mutation_rate
                .build(&format!("mutation rate of {}", self.label))?,
            self.freq_1.build(&format!("freq_1 of {}", self.label))?,
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventModelSettings {
    /// Event index of every comparison.
    Fixed(Vec<usize>),
    Uniform {
        #[serde(default)]
        split_weight: Option<ParameterSettings>,
    },
    DirichletProcess {
        concentration: ParameterSettings,
    },
    PitmanYorProcess {
        concentration: ParameterSettings,
        discount: ParameterSettings,
    },
}

impl EventModelSettings {
    pub fn build(&self, n_comparisons: usize) -> Result<EventModel> {
        match self {
            Self::Fixed(labels) => Ok(EventModel::fixed_hyperparameters(PartitionProcess::Fixed(
                FixedPartition::new(labels)?,
            ))),
            Self::Uniform { split_weight } => {
                let (split_weight, prior) = split_weight
                    .clone()
                    .unwrap_or_else(|| ParameterSettings::fixed(1.0))
                    .hyperparameter(Hyperparameter::SplitWeight)?;
                EventModel::new(
                    PartitionProcess::Uniform(UniformPartition::new(n_comparisons, split_weight)?),
                    None,
                    None,
                    prior,
                )
            }
            Self::DirichletProcess { concentration } => {
                let (concentration, prior) =
                    concentration.hyperparameter(Hyperparameter::Concentration)?;
                EventModel::new(
                    PartitionProcess::DirichletProcess(DirichletProcess::new(concentration)?),
                    prior,
                    None,
                    None,
                )
            }
            Self::PitmanYorProcess {
                concentration,
                discount,
            } => {
                let (concentration, concentration_prior) =
                    concentration.hyperparameter(Hyperparameter::Concentration)?;
                let (discount, discount_prior) = discount.hyperparameter(Hyperparameter::Discount)?;
                EventModel::new(
                    PartitionProcess::PitmanYor(PitmanYorProcess::new(concentration, discount)?),
                    concentration_prior,
                    discount_prior,
                    None,
                )
            }
        }
    }
}

const fn default_chain_length() -> usize {
    100_000
}

const fn default_sample_frequency() -> usize {
    100
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct McmcConfig {
    #[serde(default = "default_chain_length")]
    pub chain_length: usize,
    #[serde(default = "default_sample_frequency")]
    pub sample_frequency: usize,
}

impl Default for McmcConfig {
    fn default() -> Self {
        Self {
            chain_length: default_chain_length(),
            sample_frequency: default_sample_frequency(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionSamplerSettings {
    Gibbs,
    ReversibleJump,
}

/// Settings of one named operator; anything missing takes its default.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperatorEntry {
    pub weight: Option<f64>,
    pub scale: Option<f64>,
    pub window: Option<f64>,
    pub number_of_auxiliary_categories: Option<usize>,
    pub sampler: Option<PartitionSamplerSettings>,
}

const fn default_auto_optimize() -> bool {
    true
}

const fn default_auto_optimize_delay() -> usize {
    1000
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperatorConfig {
    #[serde(default = "default_auto_optimize")]
    pub auto_optimize: bool,
    #[serde(default = "default_auto_optimize_delay")]
    pub auto_optimize_delay: usize,
    #[serde(default)]
    pub operators: BTreeMap<String, OperatorEntry>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            auto_optimize: default_auto_optimize(),
            auto_optimize_delay: default_auto_optimize_delay(),
            operators: BTreeMap::new(),
        }
    }
}

impl OperatorConfig {
    pub fn build(&self) -> Result<ScheduleSettings> {
        let mut operators = BTreeMap::new();
        let mut partition_sampler = None;

        for (key, entry) in &self.operators {
            let name: OperatorName = key.parse()?;
            let defaults = OperatorSettings::default_for(name);
            // The partition sampler does not change the tuning kind of any
            // other operator.
            let kind = OperatorKind::from_name(name, PartitionSampler::ReversibleJump).tuning_kind();

            let tuning = match (kind, entry.scale, entry.window) {
                (TuningKind::Scale, scale, None) => scale.unwrap_or(defaults.tuning),
                (TuningKind::Window, None, window) => window.unwrap_or(defaults.tuning),
                (TuningKind::Untuned, None, None) => defaults.tuning,
                _ => {
                    return Err(CodivError::config(format!(
                        "{name} takes {}",
                        match kind {
                            TuningKind::Scale => "a scale, not a window",
                            TuningKind::Window => "a window, not a scale",
                            TuningKind::Untuned => "neither a scale nor a window",
                        }
                    )));
                }
            };

            if name == OperatorName::ModelOperator {
                partition_sampler = match (entry.sampler, entry.number_of_auxiliary_categories) {
                    (Some(PartitionSamplerSettings::ReversibleJump), Some(_)) => {
                        return Err(CodivError::config(
                            "number_of_auxiliary_categories only applies to the gibbs sampler",
                        ));
                    }
                    (Some(PartitionSamplerSettings::ReversibleJump), None) => {
                        Some(PartitionSampler::ReversibleJump)
                    }
                    (Some(PartitionSamplerSettings::Gibbs), n_auxiliary) => {
                        Some(PartitionSampler::Gibbs {
                            n_auxiliary: n_auxiliary.unwrap_or(4),
                        })
                    }
                    // auxiliary categories only mean something to the gibbs sampler
                    (None, Some(n_auxiliary)) => Some(PartitionSampler::Gibbs { n_auxiliary }),
                    (None, None) => None,
                };
                if entry.number_of_auxiliary_categories == Some(0) {
                    return Err(CodivError::config(
                        "number_of_auxiliary_categories must be at least 1",
                    ));
                }
            } else if entry.sampler.is_some() || entry.number_of_auxiliary_categories.is_some() {
                return Err(CodivError::config(format!(
                    "only ModelOperator takes a sampler or number_of_auxiliary_categories, not {name}"
                )));
            }

            operators.insert(
                name,
                OperatorSettings {
                    weight: entry.weight.unwrap_or(defaults.weight),
                    tuning,
                },
            );
        }

        Ok(ScheduleSettings {
            auto_optimize: self.auto_optimize,
            auto_optimize_delay: self.auto_optimize_delay,
            operators,
            partition_sampler,
        })
    }
}

/// A complete configuration file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub comparisons: Vec<ComparisonSettings>,
    pub event_time_prior: PriorSettings,
    pub event_model_prior: EventModelSettings,
    #[serde(default)]
    pub mcmc_settings: McmcConfig,
    #[serde(default)]
    pub operator_settings: OperatorConfig,
}

/// Validated settings of a run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunSettings {
    pub model: ModelSettings,
    pub mcmc: McmcSettings,
    pub schedule: ScheduleSettings,
}

impl Config {
    pub fn into_settings(self) -> Result<RunSettings> {
        let comparisons = self
            .comparisons
            .iter()
            .map(ComparisonSettings::build)
            .collect::<Result<Vec<_>>>()?;
        let event_model = self.event_model_prior.build(comparisons.len())?;
        let schedule = self.operator_settings.build()?;
        let model = ModelSettings::new(comparisons, self.event_time_prior.build()?, event_model)?;
        let mcmc = McmcSettings::new(
            self.mcmc_settings.chain_length,
            self.mcmc_settings.sample_frequency,
        )?;
        Ok(RunSettings {
            model,
            mcmc,
            schedule,
        })
    }
}
