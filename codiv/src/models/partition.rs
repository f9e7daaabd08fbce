use std::sync::Arc;

use rand::Rng;

use crate::Lens;
use crate::data::partition::EventPartition;
use crate::error::{CodivError, Result};
use crate::rvs::Prior;
use crate::utils::{draw_category, ln_add_exp, ln_gamma, ln_stirling2_row, ln_stirling2_table};

/// Unnormalised log weights for placing one comparison, given the sizes of
/// the events formed by every other comparison.
#[derive(Clone, Debug, PartialEq)]
pub struct CategoryWeights {
    /// One entry per existing event.
    pub existing: Vec<f64>,
    /// Total weight of opening a new event.
    pub new: f64,
}

/// A prior over partitions of comparisons into events.
pub trait RandomPartitionModel {
    /// Log prior probability of the partition.
    fn ln_prior(&self, partition: &EventPartition) -> f64;

    /// Predictive weights for reassigning one comparison.
    ///
    /// `sizes` are the event sizes with that comparison removed. `None` when
    /// the model does not allow the partition to change.
    fn conditional_category_log_weights(&self, sizes: &[usize]) -> Option<CategoryWeights>;

    /// Draw canonical event labels for `n` comparisons.
    fn draw_labels<R: Rng>(&self, n: usize, rng: &mut R) -> Vec<usize>;
}

/// Partition given by configuration, never changed by the sampler.
#[derive(Clone, Debug, PartialEq)]
pub struct FixedPartition {
    labels: Arc<[usize]>,
}

impl FixedPartition {
    /// `labels` need not be canonical; `[1, 0, 1]` and `[0, 1, 0]` are the same partition.
    pub fn new(labels: &[usize]) -> Result<Self> {
        let k = labels.iter().max().map_or(0, |m| m + 1);
        let times = vec![0.0; k];
        let partition = EventPartition::from_assignments(labels, &times)
            .map_err(|e| CodivError::config(format!("invalid fixed partition: {e}")))?;
        Ok(Self {
            labels: partition.labels().into(),
        })
    }

    #[must_use]
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    #[must_use]
    pub fn n_events(&self) -> usize {
        self.labels.iter().max().map_or(0, |m| m + 1)
    }
}

impl RandomPartitionModel for FixedPartition {
    fn ln_prior(&self, partition: &EventPartition) -> f64 {
        let same = partition.len() == self.labels.len()
            && partition
                .assignments()
                .iter()
                .zip(self.labels.iter())
                .all(|(a, l)| *a == Some(*l));
        if same { 0.0 } else { f64::NEG_INFINITY }
    }

    fn conditional_category_log_weights(&self, _sizes: &[usize]) -> Option<CategoryWeights> {
        None
    }

    fn draw_labels<R: Rng>(&self, _n: usize, _rng: &mut R) -> Vec<usize> {
        self.labels.to_vec()
    }
}

/// Uniform prior over set partitions, tilted by a split weight `ρ`:
/// `P(partition) ∝ ρ^k` for a partition with `k` events.
///
/// With `ρ = 1` every set partition has probability `1 / Bell(n)`.
#[derive(Clone, Debug, PartialEq)]
pub struct UniformPartition {
    split_weight: f64,
    ln_stirling: Arc<[f64]>,
}

impl UniformPartition {
    pub fn new(n: usize, split_weight: f64) -> Result<Self> {
        if !(split_weight.is_finite() && split_weight > 0.0) {
            return Err(CodivError::config(format!(
                "split_weight must be positive, got {split_weight}"
            )));
        }
        Ok(Self {
            split_weight,
            ln_stirling: ln_stirling2_row(n).into(),
        })
    }

    #[must_use]
    pub const fn split_weight(&self) -> f64 {
        self.split_weight
    }

    pub fn set_split_weight(&mut self, split_weight: f64) {
        self.split_weight = split_weight;
    }

    /// Number of comparisons the prior is defined over.
    #[must_use]
    pub fn n_items(&self) -> usize {
        self.ln_stirling.len() - 1
    }

    /// Log normalising constant `ln Σ_k S2(n, k) ρ^k`.
    fn ln_normalizer(&self) -> f64 {
        let ln_rho = self.split_weight.ln();
        self.ln_stirling
            .iter()
            .enumerate()
            .fold(f64::NEG_INFINITY, |acc, (k, s)| {
                #[allow(clippy::cast_precision_loss)]
                ln_add_exp(acc, s + (k as f64) * ln_rho)
            })
    }

    /// Log probability that the partition has exactly `k` events.
    #[must_use]
    pub fn ln_prob_n_events(&self, k: usize) -> f64 {
        if !(self.split_weight > 0.0) || k >= self.ln_stirling.len() {
            return f64::NEG_INFINITY;
        }
        #[allow(clippy::cast_precision_loss)]
        let ln_weight = self.ln_stirling[k] + (k as f64) * self.split_weight.ln();
        ln_weight - self.ln_normalizer()
    }
}

impl RandomPartitionModel for UniformPartition {
    fn ln_prior(&self, partition: &EventPartition) -> f64 {
        if !(self.split_weight.is_finite() && self.split_weight > 0.0)
            || partition.len() + 1 != self.ln_stirling.len()
        {
            return f64::NEG_INFINITY;
        }
        #[allow(clippy::cast_precision_loss)]
        let k = partition.n_events() as f64;
        k * self.split_weight.ln() - self.ln_normalizer()
    }

    fn conditional_category_log_weights(&self, sizes: &[usize]) -> Option<CategoryWeights> {
        Some(CategoryWeights {
            existing: vec![0.0; sizes.len()],
            new: self.split_weight.ln(),
        })
    }

    fn draw_labels<R: Rng>(&self, n: usize, rng: &mut R) -> Vec<usize> {
        let table = ln_stirling2_table(n);
        let ln_rho = self.split_weight.ln();

        #[allow(clippy::cast_precision_loss)]
        let ln_k_weights: Vec<f64> = (0..=n)
            .map(|k| table[n][k] + (k as f64) * ln_rho)
            .collect();
        let mut k = draw_category(&ln_k_weights, rng);

        // Walk items from last to first deciding whether each item opens a
        // block (probability S2(m-1, k-1) / S2(m, k)) or joins one of the k
        // blocks of the remaining items, then replay the choices forwards.
        let mut joins: Vec<Option<usize>> = vec![None; n];
        for m in (1..=n).rev() {
            let ln_open = table[m - 1][k - 1] - table[m][k];
            if rng.random::<f64>() < ln_open.exp() {
                k -= 1;
            } else {
                joins[m - 1] = Some(rng.random_range(0..k));
            }
        }

        let mut n_blocks = 0;
        joins
            .into_iter()
            .map(|join| {
                join.unwrap_or_else(|| {
                    n_blocks += 1;
                    n_blocks - 1
                })
            })
            .collect()
    }
}

/// Dirichlet process (Chinese restaurant process) prior with concentration `α`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirichletProcess {
    concentration: f64,
}

impl DirichletProcess {
    pub fn new(concentration: f64) -> Result<Self> {
        if !(concentration.is_finite() && concentration > 0.0) {
            return Err(CodivError::config(format!(
                "concentration must be positive, got {concentration}"
            )));
        }
        Ok(Self { concentration })
    }

    #[must_use]
    pub const fn concentration(&self) -> f64 {
        self.concentration
    }

    pub fn set_concentration(&mut self, concentration: f64) {
        self.concentration = concentration;
    }

    #[allow(clippy::cast_precision_loss)]
    fn weights(&self, sizes: &[usize]) -> CategoryWeights {
        CategoryWeights {
            existing: sizes.iter().map(|&s| (s as f64).ln()).collect(),
            new: self.concentration.ln(),
        }
    }
}

impl RandomPartitionModel for DirichletProcess {
    #[allow(clippy::cast_precision_loss)]
    fn ln_prior(&self, partition: &EventPartition) -> f64 {
        let alpha = self.concentration;
        if !(alpha.is_finite() && alpha > 0.0) {
            return f64::NEG_INFINITY;
        }
        let n = partition.len() as f64;
        let k = partition.n_events() as f64;
        let ln_sizes: f64 = partition
            .event_sizes()
            .iter()
            .map(|&s| ln_gamma(s as f64))
            .sum();
        k.mul_add(alpha.ln(), ln_sizes) + ln_gamma(alpha) - ln_gamma(alpha + n)
    }

    fn conditional_category_log_weights(&self, sizes: &[usize]) -> Option<CategoryWeights> {
        Some(self.weights(sizes))
    }

    fn draw_labels<R: Rng>(&self, n: usize, rng: &mut R) -> Vec<usize> {
        draw_sequentially(|sizes| self.weights(sizes), n, rng)
    }
}

/// Pitman-Yor process prior with concentration `α` and discount `d`.
///
/// Joining event `i` has weight `n_i - d`, a new event has weight `α + k d`.
/// With `d = 0` this is exactly [`DirichletProcess`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PitmanYorProcess {
    concentration: f64,
    discount: f64,
}

impl PitmanYorProcess {
    pub fn new(concentration: f64, discount: f64) -> Result<Self> {
        if !(concentration.is_finite() && concentration > 0.0) {
            return Err(CodivError::config(format!(
                "concentration must be positive, got {concentration}"
            )));
        }
        if !(0.0..1.0).contains(&discount) {
            return Err(CodivError::config(format!(
                "discount must be in [0, 1), got {discount}"
            )));
        }
        Ok(Self {
            concentration,
            discount,
        })
    }

    #[must_use]
    pub const fn concentration(&self) -> f64 {
        self.concentration
    }

    #[must_use]
    pub const fn discount(&self) -> f64 {
        self.discount
    }

    pub fn set_concentration(&mut self, concentration: f64) {
        self.concentration = concentration;
    }

    pub fn set_discount(&mut self, discount: f64) {
        self.discount = discount;
    }

    #[allow(clippy::cast_precision_loss)]
    fn weights(&self, sizes: &[usize]) -> CategoryWeights {
        let d = self.discount;
        CategoryWeights {
            existing: sizes.iter().map(|&s| (s as f64 - d).ln()).collect(),
            new: (sizes.len() as f64).mul_add(d, self.concentration).ln(),
        }
    }

    fn is_valid(&self) -> bool {
        self.concentration.is_finite()
            && self.concentration > 0.0
            && (0.0..1.0).contains(&self.discount)
    }
}

impl RandomPartitionModel for PitmanYorProcess {
    #[allow(clippy::cast_precision_loss)]
    fn ln_prior(&self, partition: &EventPartition) -> f64 {
        if !self.is_valid() {
            return f64::NEG_INFINITY;
        }
        let (alpha, d) = (self.concentration, self.discount);
        let n = partition.len() as f64;
        let k = partition.n_events();

        let ln_new_tables: f64 = (1..k).map(|i| (i as f64).mul_add(d, alpha).ln()).sum();
        let ln_seating: f64 = partition
            .event_sizes()
            .iter()
            .map(|&s| ln_gamma(s as f64 - d) - ln_gamma(1.0 - d))
            .sum();

        ln_new_tables + ln_seating - (ln_gamma(alpha + n) - ln_gamma(alpha + 1.0))
    }

    fn conditional_category_log_weights(&self, sizes: &[usize]) -> Option<CategoryWeights> {
        Some(self.weights(sizes))
    }

    fn draw_labels<R: Rng>(&self, n: usize, rng: &mut R) -> Vec<usize> {
        draw_sequentially(|sizes| self.weights(sizes), n, rng)
    }
}

/// Seat comparisons one at a time using the predictive weights.
fn draw_sequentially<F, R>(weights_for: F, n: usize, rng: &mut R) -> Vec<usize>
where
    F: Fn(&[usize]) -> CategoryWeights,
    R: Rng,
{
    let mut sizes: Vec<usize> = Vec::new();
    let mut labels = Vec::with_capacity(n);
    for _ in 0..n {
        let weights = weights_for(&sizes);
        let mut ln_weights = weights.existing;
        ln_weights.push(weights.new);

        let label = draw_category(&ln_weights, rng);
        if label == sizes.len() {
            sizes.push(1);
        } else {
            sizes[label] += 1;
        }
        labels.push(label);
    }
    labels
}

/// The configured partition prior with the current values of its
/// hyperparameters.
#[derive(Clone, Debug, PartialEq)]
pub enum PartitionProcess {
    Fixed(FixedPartition),
    Uniform(UniformPartition),
    DirichletProcess(DirichletProcess),
    PitmanYor(PitmanYorProcess),
}

impl PartitionProcess {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Fixed(_) => "fixed",
            Self::Uniform(_) => "uniform",
            Self::DirichletProcess(_) => "dirichlet_process",
            Self::PitmanYor(_) => "pitman_yor_process",
        }
    }

    /// Whether operators may change the partition.
    #[must_use]
    pub const fn is_variable(&self) -> bool {
        !matches!(self, Self::Fixed(_))
    }

    #[must_use]
    pub const fn concentration(&self) -> Option<f64> {
        match self {
            Self::DirichletProcess(dp) => Some(dp.concentration()),
            Self::PitmanYor(pyp) => Some(pyp.concentration()),
            Self::Fixed(_) | Self::Uniform(_) => None,
        }
    }

    #[must_use]
    pub const fn discount(&self) -> Option<f64> {
        match self {
            Self::PitmanYor(pyp) => Some(pyp.discount()),
            _ => None,
        }
    }

    #[must_use]
    pub const fn split_weight(&self) -> Option<f64> {
        match self {
            Self::Uniform(uniform) => Some(uniform.split_weight()),
            _ => None,
        }
    }

    /// Returns `false` when the process has no concentration parameter.
    pub fn set_concentration(&mut self, concentration: f64) -> bool {
        match self {
            Self::DirichletProcess(dp) => dp.set_concentration(concentration),
            Self::PitmanYor(pyp) => pyp.set_concentration(concentration),
            Self::Fixed(_) | Self::Uniform(_) => return false,
        }
        true
    }

    pub fn set_discount(&mut self, discount: f64) -> bool {
        match self {
            Self::PitmanYor(pyp) => {
                pyp.set_discount(discount);
                true
            }
            _ => false,
        }
    }

    pub fn set_split_weight(&mut self, split_weight: f64) -> bool {
        match self {
            Self::Uniform(uniform) => {
                uniform.set_split_weight(split_weight);
                true
            }
            _ => false,
        }
    }
}

impl RandomPartitionModel for PartitionProcess {
    fn ln_prior(&self, partition: &EventPartition) -> f64 {
        match self {
            Self::Fixed(m) => m.ln_prior(partition),
            Self::Uniform(m) => m.ln_prior(partition),
            Self::DirichletProcess(m) => m.ln_prior(partition),
            Self::PitmanYor(m) => m.ln_prior(partition),
        }
    }

    fn conditional_category_log_weights(&self, sizes: &[usize]) -> Option<CategoryWeights> {
        match self {
            Self::Fixed(m) => m.conditional_category_log_weights(sizes),
            Self::Uniform(m) => m.conditional_category_log_weights(sizes),
            Self::DirichletProcess(m) => m.conditional_category_log_weights(sizes),
            Self::PitmanYor(m) => m.conditional_category_log_weights(sizes),
        }
    }

    fn draw_labels<R: Rng>(&self, n: usize, rng: &mut R) -> Vec<usize> {
        match self {
            Self::Fixed(m) => m.draw_labels(n, rng),
            Self::Uniform(m) => m.draw_labels(n, rng),
            Self::DirichletProcess(m) => m.draw_labels(n, rng),
            Self::PitmanYor(m) => m.draw_labels(n, rng),
        }
    }
}

/// A hyperparameter of a [`PartitionProcess`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hyperparameter {
    Concentration,
    Discount,
    SplitWeight,
}

impl Hyperparameter {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Concentration => "concentration",
            Self::Discount => "discount",
            Self::SplitWeight => "split_weight",
        }
    }

    /// Whether `prior` is of the family this hyperparameter takes: Beta for
    /// the discount, Gamma for the positive ones.
    #[must_use]
    pub const fn accepts(self, prior: &Prior) -> bool {
        matches!(
            (self, prior),
            (Self::Discount, Prior::Beta(_))
                | (Self::Concentration | Self::SplitWeight, Prior::Gamma(_))
        )
    }

    const fn family(self) -> &'static str {
        match self {
            Self::Discount => "beta_distribution",
            Self::Concentration | Self::SplitWeight => "gamma_distribution",
        }
    }

    /// Error unless `prior` is of the family this hyperparameter takes.
    pub fn check_prior(self, prior: &Prior) -> Result<()> {
        if self.accepts(prior) {
            Ok(())
        } else {
            Err(CodivError::config(format!(
                "{} takes a {} prior",
                self.name(),
                self.family()
            )))
        }
    }
}

impl Lens<PartitionProcess, f64> for Hyperparameter {
    fn get(&self, process: &PartitionProcess) -> Option<f64> {
        match self {
            Self::Concentration => process.concentration(),
            Self::Discount => process.discount(),
            Self::SplitWeight => process.split_weight(),
        }
    }

    fn set(&self, process: &mut PartitionProcess, x: f64) {
        match self {
            Self::Concentration => process.set_concentration(x),
            Self::Discount => process.set_discount(x),
            Self::SplitWeight => process.set_split_weight(x),
        };
    }
}

/// Every set partition of `n` items as canonical labels, in lexicographic order.
#[must_use]
pub fn set_partitions(n: usize) -> Vec<Vec<usize>> {
    fn extend(prefix: &mut Vec<usize>, max: usize, n: usize, out: &mut Vec<Vec<usize>>) {
        if prefix.len() == n {
            out.push(prefix.clone());
            return;
        }
        let next_max = if prefix.is_empty() { 0 } else { max + 1 };
        for label in 0..=next_max {
            prefix.push(label);
            extend(prefix, max.max(label), n, out);
            prefix.pop();
        }
    }

    let mut out = Vec::new();
    if n > 0 {
        extend(&mut Vec::with_capacity(n), 0, n, &mut out);
    }
    out
}
