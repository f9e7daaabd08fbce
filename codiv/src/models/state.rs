use rand::Rng;

use crate::data::partition::EventPartition;
use crate::error::{CodivError, Result};
use crate::mcmc::PriorModel;
use crate::models::comparison::ComparisonState;
use crate::models::partition::{PartitionProcess, RandomPartitionModel};
use crate::models::{Collection, ComparisonView, Likelihood, Model, ModelSettings};

/// Everything the sampler changes: the partition of comparisons into events,
/// the event times, each comparison's parameters and the current
/// hyperparameters of the partition prior.
#[derive(Clone, Debug, PartialEq)]
pub struct State {
    pub partition: EventPartition,
    pub comparisons: Vec<ComparisonState>,
    pub process: PartitionProcess,
}

impl State {
    /// Check that `state` fits `settings` and is in canonical form.
    pub fn new(
        partition: EventPartition,
        comparisons: Vec<ComparisonState>,
        process: PartitionProcess,
        settings: &ModelSettings,
    ) -> Result<Self> {
        if partition.len() != settings.n_comparisons() || comparisons.len() != partition.len() {
            return Err(CodivError::config(format!(
                "state has {} assignments and {} comparisons, model has {} comparisons",
                partition.len(),
                comparisons.len(),
                settings.n_comparisons()
            )));
        }
        if !partition.is_canonical() {
            return Err(CodivError::config("partition is not in canonical form"));
        }
        Ok(Self {
            partition,
            comparisons,
            process,
        })
    }

    /// Starting state: configured values where given, prior draws otherwise.
    pub fn initial<R: Rng>(settings: &ModelSettings, rng: &mut R) -> Self {
        let process = settings.event_model.process.clone();
        let comparisons = settings
            .comparisons
            .iter()
            .map(|c| c.initial_state(rng))
            .collect();
        Self {
            partition: draw_partition(&process, settings, rng),
            comparisons,
            process,
        }
    }

    /// Every estimated quantity drawn from its prior.
    pub fn draw_from_settings<R: Rng>(settings: &ModelSettings, rng: &mut R) -> Self {
        let mut process = settings.event_model.process.clone();
        let event_model = &settings.event_model;
        if let Some(prior) = &event_model.concentration_prior {
            process.set_concentration(prior.draw(rng));
        }
        if let Some(prior) = &event_model.discount_prior {
            process.set_discount(prior.draw(rng));
        }
        if let Some(prior) = &event_model.split_weight_prior {
            process.set_split_weight(prior.draw(rng));
        }
        let comparisons = settings
            .comparisons
            .iter()
            .map(|c| c.draw_from_prior(rng))
            .collect();
        Self {
            partition: draw_partition(&process, settings, rng),
            comparisons,
            process,
        }
    }

    #[must_use]
    pub fn n_events(&self) -> usize {
        self.partition.n_events()
    }

    /// What a likelihood evaluator sees of comparison `i`.
    #[must_use]
    pub fn view(&self, i: usize) -> ComparisonView {
        self.view_at(i, self.partition.time_of(i))
    }

    /// Comparison `i` as if its event were at `time`.
    #[must_use]
    pub fn view_at(&self, i: usize, time: f64) -> ComparisonView {
        let c = &self.comparisons[i];
        ComparisonView {
            time,
            root_size: c.root_size(),
            leaf_sizes: c.leaf_sizes(),
            mutation_rate: c.mutation_rate,
            freq_1: c.freq_1,
        }
    }

    /// Log joint prior density.
    ///
    /// Sum of the event time priors, the partition prior, every comparison's
    /// parameter priors and the hyperpriors.
    #[must_use]
    pub fn ln_prior(&self, settings: &ModelSettings) -> f64 {
        let ln_partition = self.process.ln_prior(&self.partition);
        if ln_partition == f64::NEG_INFINITY {
            return ln_partition;
        }
        let ln_times: f64 = self
            .partition
            .events()
            .iter()
            .map(|e| settings.event_time_prior.ln_f(e.time))
            .sum();
        let ln_comparisons: f64 = settings
            .comparisons
            .iter()
            .zip(self.comparisons.iter())
            .map(|(model, state)| model.ln_prior(state))
            .sum();

        ln_times + ln_partition + ln_comparisons + settings.event_model.ln_hyperprior(&self.process)
    }
}

fn draw_partition<R: Rng>(
    process: &PartitionProcess,
    settings: &ModelSettings,
    rng: &mut R,
) -> EventPartition {
    let labels = process.draw_labels(settings.n_comparisons(), rng);
    let n_events = labels.iter().max().map_or(0, |m| m + 1);
    let times: Vec<f64> = (0..n_events)
        .map(|_| settings.event_time_prior.draw(rng))
        .collect();
    EventPartition::from_assignments(&labels, &times)
        .expect("partition processes draw canonical labels without gaps")
}

impl<L: Likelihood> Model<Collection<L>> for State {
    fn ln_likelihood(&self, data: &Collection<L>) -> f64 {
        data.comparison_ln_likelihoods(self).into_iter().sum()
    }

    fn ln_prior(&self, data: &Collection<L>) -> f64 {
        Self::ln_prior(self, &data.settings)
    }
}

impl<L: Likelihood> PriorModel<Collection<L>> for State {
    fn draw_from_prior<R: Rng>(data: &Collection<L>, rng: &mut R) -> Self {
        Self::draw_from_settings(&data.settings, rng)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;
    use crate::models::comparison::{ComparisonModel, ParameterModel, PopulationSizeModel};
    use crate::models::partition::{DirichletProcess, FixedPartition};
    use crate::models::{EventModel, IgnoreData};
    use crate::rvs::Prior;

    pub(crate) fn pair(label: &str) -> ComparisonModel {
        let gamma = Prior::gamma(4.0, 0.25).expect("valid");
        ComparisonModel::new(
            label.to_string(),
            vec![format!("{label}a"), format!("{label}b")],
            None,
            PopulationSizeModel::Independent {
                root: ParameterModel::estimated(gamma.clone(), None).expect("valid"),
                leaf: ParameterModel::estimated(gamma, None).expect("valid"),
            },
            ParameterModel::fixed(1.0),
            ParameterModel::fixed(0.5),
        )
        .expect("valid")
    }

    pub(crate) fn dp_settings(n: usize) -> ModelSettings {
        ModelSettings::new(
            (0..n).map(|i| pair(&format!("c{i}"))).collect(),
            Prior::gamma(5.0, 0.1).expect("valid"),
            EventModel::fixed_hyperparameters(PartitionProcess::DirichletProcess(
                DirichletProcess::new(1.0).expect("valid"),
            )),
        )
        .expect("valid settings")
    }

    #[test]
    fn initial_state_is_consistent() {
        let settings = dp_settings(4);
        let mut rng = SmallRng::seed_from_u64(0xABCD);
        let state = State::initial(&settings, &mut rng);
        assert_eq!(state.partition.len(), 4);
        assert!(state.partition.is_canonical());
        assert!(state.ln_prior(&settings).is_finite());

        let collection = Collection::new(settings, IgnoreData);
        assert_eq!(Model::ln_likelihood(&state, &collection), 0.0);
        assert::close(state.ln_score(&collection), state.ln_prior(&collection.settings), 1e-12);
    }

    #[test]
    fn shared_events_share_times() {
        let settings = ModelSettings::new(
            (0..3).map(|i| pair(&format!("c{i}"))).collect(),
            Prior::gamma(5.0, 0.1).expect("valid"),
            EventModel::fixed_hyperparameters(PartitionProcess::Fixed(
                FixedPartition::new(&[0, 1, 0]).expect("valid"),
            )),
        )
        .expect("valid settings");
        let mut rng = SmallRng::seed_from_u64(7);
        let state = State::draw_from_settings(&settings, &mut rng);
        assert_eq!(state.partition.restricted_growth_string(), "010");
        assert_eq!(state.view(0).time, state.view(2).time);
        assert_ne!(state.view(0).time, state.view(1).time);
    }

    #[test]
    fn out_of_support_values_have_no_prior_mass() {
        let settings = dp_settings(2);
        let mut rng = SmallRng::seed_from_u64(11);
        let mut state = State::initial(&settings, &mut rng);
        state.partition.set_event_time(0, -1.0);
        assert_eq!(state.ln_prior(&settings), f64::NEG_INFINITY);
    }

    #[test]
    fn mismatched_states_are_rejected() {
        let settings = dp_settings(2);
        let mut rng = SmallRng::seed_from_u64(3);
        let state = State::initial(&settings, &mut rng);
        let result = State::new(
            state.partition.clone(),
            state.comparisons[..1].to_vec(),
            state.process.clone(),
            &settings,
        );
        assert!(result.is_err());
    }
}
