use rand::Rng;

use crate::Lens;
use crate::mcmc::samplers::{Operator, Proposal, TuningKind, choose};
use crate::models::comparison::ComparisonParameter;
use crate::models::partition::Hyperparameter;
use crate::models::state::State;
use crate::models::{Collection, Likelihood, ModelSettings};

/// Fold `x` back into `[0, 1]` by reflecting at the boundaries.
///
/// Non-finite values are returned unchanged.
#[must_use]
pub fn reflect_unit(mut x: f64) -> f64 {
    while x.is_finite() && !(0.0..=1.0).contains(&x) {
        if x < 0.0 {
            x = -x;
        } else {
            x = 2.0 - x;
        }
    }
    x
}

/// Which unit interval parameter a [`WindowMover`] moves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowTarget {
    /// Ancestral allele frequency of one comparison.
    Freq1,
    Discount,
}

/// Symmetric random walk `x' = x + w (u - 0.5)` reflected into `[0, 1]`.
///
/// Reflection keeps the proposal symmetric, so the Hastings ratio is 1.
/// Landing exactly on 0 or 1 leaves the support and is rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowMover {
    target: WindowTarget,
}

impl WindowMover {
    #[must_use]
    pub const fn new(target: WindowTarget) -> Self {
        Self { target }
    }

    fn freq_candidates(settings: &ModelSettings) -> Vec<usize> {
        settings
            .comparisons
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.is_estimated(ComparisonParameter::Freq1).then_some(i))
            .collect()
    }
}

impl Operator for WindowMover {
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
        let delta = tuning * (rng.random::<f64>() - 0.5);
        let mut proposed = state.clone();

        let moved = match self.target {
            WindowTarget::Freq1 => {
                let Some(i) = choose(&Self::freq_candidates(&collection.settings), rng) else {
                    return Proposal::OutOfSupport;
                };
                let lens = ComparisonParameter::Freq1;
                let x = reflect_unit(state.comparisons[i].freq_1 + delta);
                lens.set(&mut proposed.comparisons[i], x);
                x
            }
            WindowTarget::Discount => {
                let lens = Hyperparameter::Discount;
                let Some(d) = lens.get(&state.process) else {
                    return Proposal::OutOfSupport;
                };
                let x = reflect_unit(d + delta);
                lens.set(&mut proposed.process, x);
                x
            }
        };

        if moved <= 0.0 || moved >= 1.0 {
            return Proposal::OutOfSupport;
        }
        Proposal::Metropolis {
            state: proposed,
            ln_hastings: 0.0,
        }
    }

    fn is_applicable(&self, settings: &ModelSettings) -> bool {
        match self.target {
            WindowTarget::Freq1 => !Self::freq_candidates(settings).is_empty(),
            WindowTarget::Discount => settings.event_model.discount_prior.is_some(),
        }
    }

    fn tuning_kind(&self) -> TuningKind {
        TuningKind::Window
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;
    use crate::models::partition::{PartitionProcess, PitmanYorProcess};
    use crate::models::state::tests::pair;
    use crate::models::{EventModel, IgnoreData};
    use crate::rvs::Prior;

    #[test]
    fn discount_moves_stay_inside_the_unit_interval() {
        let settings = ModelSettings::new(
            vec![pair("a"), pair("b"), pair("c")],
            Prior::gamma(5.0, 0.1).expect("valid"),
            EventModel::new(
                PartitionProcess::PitmanYor(PitmanYorProcess::new(1.0, 0.05).expect("valid")),
                None,
                Some(Prior::beta(1.0, 4.0).expect("valid")),
                None,
            )
            .expect("valid"),
        )
        .expect("valid");
        let collection = Collection::new(settings, IgnoreData);
        let mover = WindowMover::new(WindowTarget::Discount);
        assert!(mover.is_applicable(&collection.settings));
        assert!(!WindowMover::new(WindowTarget::Freq1).is_applicable(&collection.settings));

        let mut rng = SmallRng::seed_from_u64(0x77);
        let state = State::initial(&collection.settings, &mut rng);
        for _ in 0..200 {
            match mover.propose(&state, &collection, 0.5, &mut rng) {
                Proposal::Metropolis { state: proposed, ln_hastings } => {
                    let d = proposed.process.discount().expect("discount");
                    assert!(d > 0.0 && d < 1.0);
                    // a half window of 0.25 from 0.05, folded at 0
                    assert!(d <= 0.3 + 1e-12);
                    assert_eq!(ln_hastings, 0.0);
                    assert_eq!(proposed.comparisons, state.comparisons);
                }
                Proposal::OutOfSupport => {}
                Proposal::Gibbs { .. } => panic!("window moves are Metropolis moves"),
            }
        }
    }

    #[test]
    fn reflection_at_the_edges() {
        assert::close(reflect_unit(-0.2), 0.2, 1e-12);
        assert::close(reflect_unit(1.3), 0.7, 1e-12);
        assert::close(reflect_unit(0.4), 0.4, 1e-12);
        assert::close(reflect_unit(2.25), 0.25, 1e-12);
        assert_eq!(reflect_unit(1.0), 1.0);
    }

    proptest! {
        #[test]
        fn reflection_stays_in_unit_interval(x in 0.0_f64..1.0, delta in -1.0_f64..1.0) {
            let y = reflect_unit(x + delta);
            prop_assert!((0.0..=1.0).contains(&y));
        }
    }
}
