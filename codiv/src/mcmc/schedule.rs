//! Weighted choice of operators and adaptation of their step sizes.
//!
//! With auto-optimisation on, every tuned operator adapts from generation
//! `auto_optimize_delay` onwards with the Robbins-Monro rule
//!
//! ```text
//! ln λ ← ln λ + t^(-0.6) (accepted - target)
//! ```
//!
//! where `t` counts that operator's own adaptations. The step shrinks to zero
//! so adaptation diminishes, and `λ` stays inside `[1e-4, 1e4]` (windows never
//! exceed 1) so the kernels stay contained (Roberts and Rosenthal 2007).

use std::collections::BTreeMap;

use rand::Rng;

use crate::error::{CodivError, Result};
use crate::mcmc::samplers::{Operator, OperatorKind, OperatorName, PartitionSampler, TuningKind};
use crate::models::ModelSettings;
use crate::utils::draw_category;

const ADAPTATION_EXPONENT: f64 = 0.6;
const MIN_TUNING: f64 = 1e-4;
const MAX_TUNING: f64 = 1e4;
const DEFAULT_AUXILIARY_CATEGORIES: usize = 4;

/// The adaptable step size of one operator with its acceptance counts.
#[derive(Clone, Debug, PartialEq)]
pub struct Tuning {
    value: f64,
    kind: TuningKind,
    n_proposed: usize,
    n_accepted: usize,
    n_adapted: usize,
}

impl Tuning {
    #[must_use]
    pub const fn new(value: f64, kind: TuningKind) -> Self {
        Self {
            value,
            kind,
            n_proposed: 0,
            n_accepted: 0,
            n_adapted: 0,
        }
    }

    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    #[must_use]
    pub const fn kind(&self) -> TuningKind {
        self.kind
    }

    #[must_use]
    pub const fn n_proposed(&self) -> usize {
        self.n_proposed
    }

    #[must_use]
    pub const fn n_accepted(&self) -> usize {
        self.n_accepted
    }

    /// Fraction of accepted proposals, `None` before the first proposal.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn acceptance_rate(&self) -> Option<f64> {
        (self.n_proposed > 0).then(|| self.n_accepted as f64 / self.n_proposed as f64)
    }

    fn record(&mut self, accepted: bool) {
        self.n_proposed += 1;
        if accepted {
            self.n_accepted += 1;
        }
    }

    fn adapt(&mut self, accepted: bool, target: f64) {
        let upper = match self.kind {
            TuningKind::Untuned => return,
            TuningKind::Scale => MAX_TUNING,
            TuningKind::Window => 1.0,
        };
        self.n_adapted += 1;
        #[allow(clippy::cast_precision_loss)]
        let step = (self.n_adapted as f64).powf(-ADAPTATION_EXPONENT);
        let observed = if accepted { 1.0 } else { 0.0 };
        let ln_value = step.mul_add(observed - target, self.value.ln());
        self.value = ln_value.exp().clamp(MIN_TUNING, upper);
    }
}

/// Weight and starting step size of one operator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OperatorSettings {
    pub weight: f64,
    pub tuning: f64,
}

impl OperatorSettings {
    #[must_use]
    pub const fn default_for(name: OperatorName) -> Self {
        Self {
            weight: name.default_weight(),
            tuning: name.default_tuning(),
        }
    }
}

/// Validated operator configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct ScheduleSettings {
    pub auto_optimize: bool,
    pub auto_optimize_delay: usize,
    /// Operators missing here use [`OperatorSettings::default_for`].
    pub operators: BTreeMap<OperatorName, OperatorSettings>,
    /// `None` picks the sampler suited to the partition prior.
    pub partition_sampler: Option<PartitionSampler>,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            auto_optimize: true,
            auto_optimize_delay: 1000,
            operators: BTreeMap::new(),
            partition_sampler: None,
        }
    }
}

impl ScheduleSettings {
    #[must_use]
    pub fn operator(&self, name: OperatorName) -> OperatorSettings {
        self.operators
            .get(&name)
            .copied()
            .unwrap_or_else(|| OperatorSettings::default_for(name))
    }
}

/// An operator in a schedule with its weight and tuning.
#[derive(Clone, Debug, PartialEq)]
pub struct ScheduledOperator {
    pub name: OperatorName,
    pub operator: OperatorKind,
    pub weight: f64,
    pub tuning: Tuning,
}

/// The operators a chain draws from.
#[derive(Clone, Debug, PartialEq)]
pub struct OperatorSchedule {
    operators: Vec<ScheduledOperator>,
    ln_weights: Vec<f64>,
    auto_optimize: bool,
    auto_optimize_delay: usize,
}

impl OperatorSchedule {
    /// Every operator with positive weight that can move something under
    /// `model`.
    pub fn new(settings: &ScheduleSettings, model: &ModelSettings) -> Result<Self> {
        let partition_sampler = settings.partition_sampler.unwrap_or_else(|| {
            PartitionSampler::default_for(&model.event_model.process, DEFAULT_AUXILIARY_CATEGORIES)
        });

        let mut operators = Vec::new();
        for name in OperatorName::ALL {
            let OperatorSettings { weight, tuning } = settings.operator(name);
            if !weight.is_finite() || weight < 0.0 {
                return Err(CodivError::config(format!(
                    "weight of {name} must be a non-negative number, got {weight}"
                )));
            }
            let operator = OperatorKind::from_name(name, partition_sampler);
            let kind = operator.tuning_kind();
            match kind {
                TuningKind::Scale if !(tuning.is_finite() && tuning > 0.0) => {
                    return Err(CodivError::config(format!(
                        "scale of {name} must be positive, got {tuning}"
                    )));
                }
                TuningKind::Window if !(tuning > 0.0 && tuning <= 1.0) => {
                    return Err(CodivError::config(format!(
                        "window of {name} must be in (0, 1], got {tuning}"
                    )));
                }
                _ => {}
            }
            if weight == 0.0 || !operator.is_applicable(model) {
                tracing::debug!("operator {name} is not scheduled");
                continue;
            }
            operators.push(ScheduledOperator {
                name,
                operator,
                weight,
                tuning: Tuning::new(tuning, kind),
            });
        }

        if operators.is_empty() {
            return Err(CodivError::config("no operator can move this model"));
        }

        let ln_weights = operators.iter().map(|op| op.weight.ln()).collect();
        Ok(Self {
            operators,
            ln_weights,
            auto_optimize: settings.auto_optimize,
            auto_optimize_delay: settings.auto_optimize_delay,
        })
    }

    #[must_use]
    pub fn operators(&self) -> &[ScheduledOperator] {
        &self.operators
    }

    #[must_use]
    pub fn get(&self, index: usize) -> &ScheduledOperator {
        &self.operators[index]
    }

    /// Index of the next operator, drawn proportional to weight.
    pub fn next_operator<R: Rng>(&self, rng: &mut R) -> usize {
        draw_category(&self.ln_weights, rng)
    }

    /// Record the outcome of operator `index` at `generation` and adapt its
    /// tuning when auto-optimisation is active.
    pub fn update(&mut self, index: usize, accepted: bool, generation: usize) {
        let op = &mut self.operators[index];
        op.tuning.record(accepted);
        if self.auto_optimize && generation >= self.auto_optimize_delay {
            let target = op.operator.target_acceptance();
            op.tuning.adapt(accepted, target);
        }
    }

    /// Log acceptance rates and current tuning of every operator.
    pub fn log_summary(&self) {
        for op in &self.operators {
            tracing::debug!(
                "{}: weight {}, tuning {:.4}, accepted {} of {} ({:.3})",
                op.name,
                op.weight,
                op.tuning.value(),
                op.tuning.n_accepted(),
                op.tuning.n_proposed(),
                op.tuning.acceptance_rate().unwrap_or(f64::NAN),
            );
        }
    }
}
