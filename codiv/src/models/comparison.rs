use rand::Rng;

use crate::Lens;
use crate::error::{CodivError, Result};
use crate::rvs::{DirichletPrior, Prior, on_simplex};

/// A scalar parameter that is either fixed or estimated under a prior.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterModel {
    value: Option<f64>,
    prior: Option<Prior>,
}

impl ParameterModel {
    #[must_use]
    pub const fn fixed(value: f64) -> Self {
        Self {
            value: Some(value),
            prior: None,
        }
    }

    /// Estimated under `prior`, starting from `value` or from a prior draw.
    pub fn estimated(prior: Prior, value: Option<f64>) -> Result<Self> {
        if let Some(v) = value
            && !prior.supports(v)
        {
            return Err(CodivError::config(format!(
                "initial value {v} is outside the support of its prior"
            )));
        }
        Ok(Self {
            value,
            prior: Some(prior),
        })
    }

    #[must_use]
    pub const fn is_estimated(&self) -> bool {
        self.prior.is_some()
    }

    #[must_use]
    pub const fn prior(&self) -> Option<&Prior> {
        self.prior.as_ref()
    }

    /// Log prior density; fixed parameters contribute nothing.
    #[must_use]
    pub fn ln_prior(&self, x: f64) -> f64 {
        self.prior.as_ref().map_or(0.0, |prior| prior.ln_f(x))
    }

    /// Configured starting value, or a prior draw when none was given.
    pub fn initial_value<R: Rng>(&self, rng: &mut R) -> f64 {
        match (self.value, &self.prior) {
            (Some(v), _) => v,
            (None, Some(prior)) => prior.draw(rng),
            (None, None) => unreachable!("fixed parameters always carry a value"),
        }
    }

    /// A draw from the prior, or the fixed value.
    pub fn draw<R: Rng>(&self, rng: &mut R) -> f64 {
        match (&self.prior, self.value) {
            (Some(prior), _) => prior.draw(rng),
            (None, Some(v)) => v,
            (None, None) => unreachable!("fixed parameters always carry a value"),
        }
    }

    pub(crate) fn check_support(&self, what: &str, lower: f64, upper: f64) -> Result<()> {
        match self.value {
            Some(v) if !(v > lower && v < upper) => Err(CodivError::config(format!(
                "{what} must lie in ({lower}, {upper}), got {v}"
            ))),
            _ => Ok(()),
        }
    }
}

/// Dirichlet distributed relative sizes of the branches of a comparison
/// (leaves first, then the root).
#[derive(Clone, Debug, PartialEq)]
pub struct MultiplierModel {
    value: Option<Vec<f64>>,
    prior: Option<DirichletPrior>,
}

impl MultiplierModel {
    pub fn fixed(value: Vec<f64>) -> Result<Self> {
        if !on_simplex(&value) {
            return Err(CodivError::config(format!(
                "population size multipliers must be positive and sum to 1, got {value:?}"
            )));
        }
        Ok(Self {
            value: Some(value),
            prior: None,
        })
    }

    pub fn estimated(prior: DirichletPrior, value: Option<Vec<f64>>) -> Result<Self> {
        if let Some(v) = &value
            && (v.len() != prior.k() || !on_simplex(v))
        {
            return Err(CodivError::config(format!(
                "initial population size multipliers {v:?} do not match their prior"
            )));
        }
        Ok(Self {
            value,
            prior: Some(prior),
        })
    }

    #[must_use]
    pub const fn is_estimated(&self) -> bool {
        self.prior.is_some()
    }

    #[must_use]
    pub fn n_branches(&self) -> usize {
        self.prior
            .as_ref()
            .map_or_else(|| self.value.as_ref().map_or(0, Vec::len), DirichletPrior::k)
    }

    #[must_use]
    pub fn ln_prior(&self, x: &[f64]) -> f64 {
        self.prior.as_ref().map_or(0.0, |prior| prior.ln_f(x))
    }

    /// Configured starting value, otherwise equal multipliers.
    #[must_use]
    pub fn initial_value(&self) -> Vec<f64> {
        self.value.clone().unwrap_or_else(|| {
            let k = self.n_branches();
            #[allow(clippy::cast_precision_loss)]
            let p = (k as f64).recip();
            vec![p; k]
        })
    }

    pub fn draw<R: Rng>(&self, rng: &mut R) -> Vec<f64> {
        self.prior
            .as_ref()
            .map_or_else(|| self.initial_value(), |prior| prior.draw(rng))
    }
}

/// How the population sizes of a comparison are parameterised.
#[derive(Clone, Debug, PartialEq)]
pub enum PopulationSizeModel {
    /// The root and every leaf carry their own size.
    Independent {
        root: ParameterModel,
        leaf: ParameterModel,
    },
    /// Leaf sizes are free; the root is `relative_root` times their mean.
    RootRelative {
        leaf: ParameterModel,
        relative_root: ParameterModel,
    },
    /// A mean size shared out over the branches by Dirichlet multipliers:
    /// branch `b` has size `mean * B * multipliers[b]` with `B` branches.
    Multipliers {
        mean: ParameterModel,
        multipliers: MultiplierModel,
    },
}

/// Fixed description of one comparison.
#[derive(Clone, Debug, PartialEq)]
pub struct ComparisonModel {
    pub label: String,
    /// One label for a single population, two for a pair.
    pub populations: Vec<String>,
    /// Path of the character data, read only by likelihood evaluators.
    pub data_path: Option<String>,
    pub population_sizes: PopulationSizeModel,
    pub mutation_rate: ParameterModel,
    pub freq_1: ParameterModel,
}

impl ComparisonModel {
    pub fn new(
        label: String,
        populations: Vec<String>,
        data_path: Option<String>,
        population_sizes: PopulationSizeModel,
        mutation_rate: ParameterModel,
        freq_1: ParameterModel,
    ) -> Result<Self> {
        if !(1..=2).contains(&populations.len()) {
            return Err(CodivError::config(format!(
                "comparison {label} needs one or two populations, got {}",
                populations.len()
            )));
        }
        if let PopulationSizeModel::Multipliers { multipliers, .. } = &population_sizes
            && multipliers.n_branches() != populations.len() + 1
        {
            return Err(CodivError::config(format!(
                "comparison {label} has {} branches but {} population size multipliers",
                populations.len() + 1,
                multipliers.n_branches()
            )));
        }
        match &population_sizes {
            PopulationSizeModel::Independent { root, leaf } => {
                root.check_support("root population_size", 0.0, f64::INFINITY)?;
                leaf.check_support("population_size", 0.0, f64::INFINITY)?;
            }
            PopulationSizeModel::RootRelative {
                leaf,
                relative_root,
            } => {
                leaf.check_support("population_size", 0.0, f64::INFINITY)?;
                relative_root.check_support("root_relative_population_size", 0.0, f64::INFINITY)?;
            }
            PopulationSizeModel::Multipliers { mean, .. } => {
                mean.check_support("mean_population_size", 0.0, f64::INFINITY)?;
            }
        }
        mutation_rate.check_support("mutation_rate", 0.0, f64::INFINITY)?;
        freq_1.check_support("freq_1", 0.0, 1.0)?;

        Ok(Self {
            label,
            populations,
            data_path,
            population_sizes,
            mutation_rate,
            freq_1,
        })
    }

    #[must_use]
    pub fn n_leaves(&self) -> usize {
        self.populations.len()
    }

    /// Log prior of every parameter of the comparison.
    #[must_use]
    pub fn ln_prior(&self, state: &ComparisonState) -> f64 {
        let ln_sizes = match (&self.population_sizes, &state.population_sizes) {
            (
                PopulationSizeModel::Independent { root, leaf },
                PopulationSizes::Independent {
                    root: root_size,
                    leaves,
                },
            ) => root.ln_prior(*root_size) + leaves.iter().map(|&x| leaf.ln_prior(x)).sum::<f64>(),
            (
                PopulationSizeModel::RootRelative {
                    leaf,
                    relative_root,
                },
                PopulationSizes::RootRelative {
                    relative_root: relative,
                    leaves,
                },
            ) => {
                relative_root.ln_prior(*relative)
                    + leaves.iter().map(|&x| leaf.ln_prior(x)).sum::<f64>()
            }
            (
                PopulationSizeModel::Multipliers { mean, multipliers },
                PopulationSizes::Multipliers {
                    mean: mean_size,
                    multipliers: pi,
                },
            ) => mean.ln_prior(*mean_size) + multipliers.ln_prior(pi),
            _ => f64::NEG_INFINITY,
        };
        ln_sizes
            + self.mutation_rate.ln_prior(state.mutation_rate)
            + self.freq_1.ln_prior(state.freq_1)
    }

    fn build_state<R, F, G>(&self, rng: &mut R, scalar: F, vector: G) -> ComparisonState
    where
        R: Rng,
        F: Fn(&ParameterModel, &mut R) -> f64,
        G: Fn(&MultiplierModel, &mut R) -> Vec<f64>,
    {
        let n = self.n_leaves();
        let population_sizes = match &self.population_sizes {
            PopulationSizeModel::Independent { root, leaf } => {
                let leaves = (0..n).map(|_| scalar(leaf, rng)).collect();
                PopulationSizes::Independent {
                    root: scalar(root, rng),
                    leaves,
                }
            }
            PopulationSizeModel::RootRelative {
                leaf,
                relative_root,
            } => {
                let leaves = (0..n).map(|_| scalar(leaf, rng)).collect();
                PopulationSizes::RootRelative {
                    relative_root: scalar(relative_root, rng),
                    leaves,
                }
            }
            PopulationSizeModel::Multipliers { mean, multipliers } => PopulationSizes::Multipliers {
                mean: scalar(mean, rng),
                multipliers: vector(multipliers, rng),
            },
        };
        ComparisonState {
            population_sizes,
            mutation_rate: scalar(&self.mutation_rate, rng),
            freq_1: scalar(&self.freq_1, rng),
        }
    }

    /// Starting values: configured values where given, prior draws otherwise.
    pub fn initial_state<R: Rng>(&self, rng: &mut R) -> ComparisonState {
        self.build_state(rng, ParameterModel::initial_value, |m, _| m.initial_value())
    }

    /// Every estimated parameter drawn from its prior.
    pub fn draw_from_prior<R: Rng>(&self, rng: &mut R) -> ComparisonState {
        self.build_state(rng, ParameterModel::draw, MultiplierModel::draw)
    }

    /// Whether the parameter behind `parameter` is estimated.
    #[must_use]
    pub fn is_estimated(&self, parameter: ComparisonParameter) -> bool {
        match (parameter, &self.population_sizes) {
            (ComparisonParameter::RootSize, PopulationSizeModel::Independent { root, .. }) => {
                root.is_estimated()
            }
            (
                ComparisonParameter::RootSize,
                PopulationSizeModel::RootRelative { relative_root, .. },
            ) => relative_root.is_estimated(),
            (
                ComparisonParameter::LeafSize(i),
                PopulationSizeModel::Independent { leaf, .. }
                | PopulationSizeModel::RootRelative { leaf, .. },
            ) => i < self.n_leaves() && leaf.is_estimated(),
            (ComparisonParameter::MeanSize, PopulationSizeModel::Multipliers { mean, .. }) => {
                mean.is_estimated()
            }
            (ComparisonParameter::MutationRate, _) => self.mutation_rate.is_estimated(),
            (ComparisonParameter::Freq1, _) => self.freq_1.is_estimated(),
            _ => false,
        }
    }

    #[must_use]
    pub fn multipliers_estimated(&self) -> bool {
        matches!(
            &self.population_sizes,
            PopulationSizeModel::Multipliers { multipliers, .. } if multipliers.is_estimated()
        )
    }

    #[must_use]
    pub const fn uses_multipliers(&self) -> bool {
        matches!(self.population_sizes, PopulationSizeModel::Multipliers { .. })
    }

    /// Estimated coordinates that set the absolute scale of the population
    /// sizes; a relative root size is a ratio and is left out.
    #[must_use]
    pub fn size_scale_coordinates(&self) -> Vec<ComparisonParameter> {
        let candidates: Vec<ComparisonParameter> = match &self.population_sizes {
            PopulationSizeModel::Independent { .. } => std::iter::once(ComparisonParameter::RootSize)
                .chain((0..self.n_leaves()).map(ComparisonParameter::LeafSize))
                .collect(),
            PopulationSizeModel::RootRelative { .. } => {
                (0..self.n_leaves()).map(ComparisonParameter::LeafSize).collect()
            }
            PopulationSizeModel::Multipliers { .. } => vec![ComparisonParameter::MeanSize],
        };
        candidates
            .into_iter()
            .filter(|&p| self.is_estimated(p))
            .collect()
    }
}

/// Current population sizes of a comparison.
#[derive(Clone, Debug, PartialEq)]
pub enum PopulationSizes {
    Independent { root: f64, leaves: Vec<f64> },
    RootRelative { relative_root: f64, leaves: Vec<f64> },
    Multipliers { mean: f64, multipliers: Vec<f64> },
}

/// Current values of one comparison's parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct ComparisonState {
    pub population_sizes: PopulationSizes,
    pub mutation_rate: f64,
    pub freq_1: f64,
}

impl ComparisonState {
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn root_size(&self) -> f64 {
        match &self.population_sizes {
            PopulationSizes::Independent { root, .. } => *root,
            PopulationSizes::RootRelative {
                relative_root,
                leaves,
            } => relative_root * leaves.iter().sum::<f64>() / leaves.len() as f64,
            PopulationSizes::Multipliers { mean, multipliers } => {
                mean * multipliers.len() as f64 * multipliers.last().copied().unwrap_or(f64::NAN)
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn leaf_sizes(&self) -> Vec<f64> {
        match &self.population_sizes {
            PopulationSizes::Independent { leaves, .. }
            | PopulationSizes::RootRelative { leaves, .. } => leaves.clone(),
            PopulationSizes::Multipliers { mean, multipliers } => {
                let b = multipliers.len() as f64;
                multipliers[..multipliers.len() - 1]
                    .iter()
                    .map(|p| mean * b * p)
                    .collect()
            }
        }
    }

    #[must_use]
    pub fn multipliers(&self) -> Option<&[f64]> {
        match &self.population_sizes {
            PopulationSizes::Multipliers { multipliers, .. } => Some(multipliers),
            _ => None,
        }
    }

    pub fn multipliers_mut(&mut self) -> Option<&mut Vec<f64>> {
        match &mut self.population_sizes {
            PopulationSizes::Multipliers { multipliers, .. } => Some(multipliers),
            _ => None,
        }
    }
}

/// A scalar coordinate of [`ComparisonState`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComparisonParameter {
    /// The root size, or the relative root size when leaf sizes set the scale.
    RootSize,
    LeafSize(usize),
    MeanSize,
    MutationRate,
    Freq1,
}

impl Lens<ComparisonState, f64> for ComparisonParameter {
    fn get(&self, state: &ComparisonState) -> Option<f64> {
        match (self, &state.population_sizes) {
            (Self::RootSize, PopulationSizes::Independent { root, .. }) => Some(*root),
            (Self::RootSize, PopulationSizes::RootRelative { relative_root, .. }) => {
                Some(*relative_root)
            }
            (
                Self::LeafSize(i),
                PopulationSizes::Independent { leaves, .. }
                | PopulationSizes::RootRelative { leaves, .. },
            ) => leaves.get(*i).copied(),
            (Self::MeanSize, PopulationSizes::Multipliers { mean, .. }) => Some(*mean),
            (Self::MutationRate, _) => Some(state.mutation_rate),
            (Self::Freq1, _) => Some(state.freq_1),
            _ => None,
        }
    }

    fn set(&self, state: &mut ComparisonState, x: f64) {
        match (self, &mut state.population_sizes) {
            (Self::RootSize, PopulationSizes::Independent { root, .. }) => *root = x,
            (Self::RootSize, PopulationSizes::RootRelative { relative_root, .. }) => {
                *relative_root = x;
            }
            (
                Self::LeafSize(i),
                PopulationSizes::Independent { leaves, .. }
                | PopulationSizes::RootRelative { leaves, .. },
            ) => {
                if let Some(leaf) = leaves.get_mut(*i) {
                    *leaf = x;
                }
            }
            (Self::MeanSize, PopulationSizes::Multipliers { mean, .. }) => *mean = x,
            (Self::MutationRate, _) => state.mutation_rate = x,
            (Self::Freq1, _) => state.freq_1 = x,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    fn pair(population_sizes: PopulationSizeModel) -> ComparisonModel {
        ComparisonModel::new(
            String::from("pair"),
            vec![String::from("a"), String::from("b")],
            None,
            population_sizes,
            ParameterModel::fixed(1.0),
            ParameterModel::estimated(Prior::beta(2.0, 2.0).expect("valid"), Some(0.5))
                .expect("valid"),
        )
        .expect("valid comparison")
    }

    fn gamma() -> Prior {
        Prior::gamma(2.0, 0.5).expect("valid")
    }

    #[test]
    fn root_relative_sizes() {
        let state = ComparisonState {
            population_sizes: PopulationSizes::RootRelative {
                relative_root: 2.0,
                leaves: vec![1.0, 3.0],
            },
            mutation_rate: 1.0,
            freq_1: 0.5,
        };
        assert::close(state.root_size(), 4.0, 1e-12);
        assert_eq!(state.leaf_sizes(), vec![1.0, 3.0]);
    }

    #[test]
    fn multiplier_sizes() {
        let state = ComparisonState {
            population_sizes: PopulationSizes::Multipliers {
                mean: 2.0,
                multipliers: vec![0.5, 0.25, 0.25],
            },
            mutation_rate: 1.0,
            freq_1: 0.5,
        };
        assert::close(state.leaf_sizes(), vec![3.0, 1.5], 1e-12);
        assert::close(state.root_size(), 1.5, 1e-12);
    }

    #[test]
    fn lens_reaches_each_coordinate() {
        let mut state = ComparisonState {
            population_sizes: PopulationSizes::Independent {
                root: 1.0,
                leaves: vec![2.0, 3.0],
            },
            mutation_rate: 1.0,
            freq_1: 0.5,
        };
        assert_eq!(ComparisonParameter::LeafSize(1).get(&state), Some(3.0));
        assert_eq!(ComparisonParameter::LeafSize(2).get(&state), None);
        assert_eq!(ComparisonParameter::MeanSize.get(&state), None);

        ComparisonParameter::RootSize.set(&mut state, 5.0);
        ComparisonParameter::Freq1.set(&mut state, 0.25);
        assert::close(state.root_size(), 5.0, 1e-12);
        assert::close(state.freq_1, 0.25, 1e-12);
    }

    #[test]
    fn estimated_coordinates() {
        let model = pair(PopulationSizeModel::RootRelative {
            leaf: ParameterModel::estimated(gamma(), None).expect("valid"),
            relative_root: ParameterModel::estimated(gamma(), Some(1.0)).expect("valid"),
        });
        assert!(model.is_estimated(ComparisonParameter::RootSize));
        assert!(model.is_estimated(ComparisonParameter::LeafSize(1)));
        assert!(!model.is_estimated(ComparisonParameter::LeafSize(2)));
        assert!(!model.is_estimated(ComparisonParameter::MutationRate));
        assert!(model.is_estimated(ComparisonParameter::Freq1));
        assert_eq!(
            model.size_scale_coordinates(),
            vec![ComparisonParameter::LeafSize(0), ComparisonParameter::LeafSize(1)]
        );
    }

    #[test]
    fn prior_draws_are_in_support() {
        let model = pair(PopulationSizeModel::Multipliers {
            mean: ParameterModel::estimated(gamma(), None).expect("valid"),
            multipliers: MultiplierModel::estimated(
                DirichletPrior::new(vec![1.0, 1.0, 1.0]).expect("valid"),
                None,
            )
            .expect("valid"),
        });
        let mut rng = SmallRng::seed_from_u64(0x5EED);
        for _ in 0..100 {
            let state = model.draw_from_prior(&mut rng);
            assert!(model.ln_prior(&state).is_finite());
            assert_eq!(state.mutation_rate, 1.0);
        }
        let initial = model.initial_state(&mut rng);
        assert::close(initial.multipliers().expect("multipliers"), vec![1.0 / 3.0; 3], 1e-12);
    }

    #[test]
    fn multiplier_count_must_match_branches() {
        let result = ComparisonModel::new(
            String::from("single"),
            vec![String::from("a")],
            None,
            PopulationSizeModel::Multipliers {
                mean: ParameterModel::fixed(1.0),
                multipliers: MultiplierModel::fixed(vec![0.2, 0.3, 0.5]).expect("valid"),
            },
            ParameterModel::fixed(1.0),
            ParameterModel::fixed(0.5),
        );
        assert!(result.is_err());
    }

    #[test]
    fn fixed_values_outside_support_are_rejected() {
        let result = ComparisonModel::new(
            String::from("bad"),
            vec![String::from("a")],
            None,
            PopulationSizeModel::Independent {
                root: ParameterModel::fixed(1.0),
                leaf: ParameterModel::fixed(1.0),
            },
            ParameterModel::fixed(1.0),
            ParameterModel::fixed(1.0),
        );
        assert!(result.is_err());
        assert!(ParameterModel::estimated(gamma(), Some(-1.0)).is_err());
    }
}
