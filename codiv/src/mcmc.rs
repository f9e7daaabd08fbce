use crate::models::{Model, finite_or_neg_infinity};
use rand::Rng;
use rv::misc::{KsAlternative, KsMode, ks_two_sample};
use serde::Serialize;

pub mod chain;
pub mod samplers;
pub mod schedule;

/// Trait for Markov Chain Monte Carlo Samplers.
pub trait Sampler<M, D>: Sized
where
    M: Model<D> + Clone,
{
    /// Step the Sampler.
    fn step<R: Rng>(&mut self, model: M, data: &D, rng: &mut R) -> M;

    /// Warm-up the sampler
    fn multi_step<R: Rng>(&mut self, model: M, data: &D, steps: usize, rng: &mut R) -> M {
        (0..steps).fold(model, |acc, _| self.step(acc, data, rng))
    }

    /// Step forever, mapping every new model through `f`.
    fn iter_sample<'a, T, F, R>(
        &'a mut self,
        model: M,
        data: &'a D,
        rng: &'a mut R,
        f: F,
    ) -> impl Iterator<Item = T> + 'a
    where
        F: Fn(&M) -> T + 'a,
        R: Rng,
        M: 'a,
    {
        (0..).scan(Some(model), move |slot, _: usize| {
            let next = self.step(slot.take()?, data, rng);
            let out = f(&next);
            *slot = Some(next);
            Some(out)
        })
    }
}

/// A model with its log likelihood and log prior evaluated once.
#[derive(Clone, Debug, PartialEq)]
pub struct Link<M> {
    pub model: M,
    pub ln_likelihood: f64,
    pub ln_prior: f64,
}

impl<M> Link<M> {
    /// Score `model`, skipping the likelihood when the prior rules it out.
    pub fn new<D>(model: M, data: &D) -> Self
    where
        M: Model<D>,
    {
        let ln_prior = finite_or_neg_infinity(model.ln_prior(data));
        let ln_likelihood = if ln_prior == f64::NEG_INFINITY {
            f64::NEG_INFINITY
        } else {
            finite_or_neg_infinity(model.ln_likelihood(data))
        };
        Self {
            model,
            ln_likelihood,
            ln_prior,
        }
    }

    #[must_use]
    pub fn ln_posterior(&self) -> f64 {
        finite_or_neg_infinity(self.ln_likelihood + self.ln_prior)
    }
}

impl<M, D> Model<D> for Link<M> {
    fn ln_likelihood(&self, _data: &D) -> f64 {
        self.ln_likelihood
    }

    fn ln_prior(&self, _data: &D) -> f64 {
        self.ln_prior
    }
}

pub trait PriorModel<D>: Model<D> {
    fn draw_from_prior<R: Rng>(data: &D, rng: &mut R) -> Self;
}

impl<M, D> PriorModel<D> for Link<M>
where
    M: PriorModel<D>,
{
    fn draw_from_prior<R: Rng>(data: &D, rng: &mut R) -> Self {
        Self::new(M::draw_from_prior(data, rng), data)
    }
}

#[derive(Clone, Debug, Default)]
pub struct PriorAgreementOptions<F> {
    pub thinning: usize,
    pub n_samples: usize,
    pub burn_in: usize,
    pub min_p_value: f64,
    pub stat_map: F,
}

/// Compare a sampler that targets the prior (the likelihood ignores the
/// data) with independent draws from that prior.
pub trait PriorAgreementTest<M, D>: Sampler<M, D>
where
    M: PriorModel<D> + Clone,
{
    /// Independent draws from the prior.
    fn direct_sampler<R: Rng>(&self, data: &D, iterations: usize, rng: &mut R) -> Vec<M> {
        (0..iterations)
            .map(|_| M::draw_from_prior(data, rng))
            .collect()
    }

    /// Panics when any statistic of the thinned chain differs from its
    /// direct draws under a two sample Kolmogorov-Smirnov test.
    fn assert_prior_agreement<R: Rng, F: Fn(&M) -> Vec<f64>>(
        mut self,
        data: &D,
        options: PriorAgreementOptions<F>,
        rng: &mut R,
    ) {
        let direct: Vec<Vec<f64>> = self
            .direct_sampler(data, options.n_samples, rng)
            .iter()
            .map(&options.stat_map)
            .collect();

        let start = M::draw_from_prior(data, rng);
        let chained: Vec<Vec<f64>> = self
            .iter_sample(start, data, rng, &options.stat_map)
            .skip(options.burn_in)
            .step_by(options.thinning)
            .take(options.n_samples)
            .collect();

        let direct = transpose2(direct);
        let chained = transpose2(chained);

        direct
            .into_iter()
            .zip(chained)
            .enumerate()
            .for_each(|(index, (direct, chained))| {
                let (stat, alpha) =
                    ks_two_sample(&direct, &chained, KsMode::Auto, KsAlternative::TwoSided)
                        .expect("KS Two sample should be valid");

                if alpha < options.min_p_value {
                    #[derive(Serialize)]
                    struct Samples {
                        statistic: usize,
                        direct: Vec<f64>,
                        chained: Vec<f64>,
                    }

                    let mut file =
                        tempfile::NamedTempFile::new().expect("to be able to create a temp file");

                    serde_json::to_writer(
                        &mut file,
                        &Samples {
                            statistic: index,
                            direct,
                            chained,
                        },
                    )
                    .expect("to write to file");

                    let (_, path) = file
                        .keep()
                        .expect("to be able to make a persistent temp file");
                    let path = path.display();

                    panic!(
                        "KS alpha for statistic {index} is lower than bound: {alpha:5.3} < {:5.3} (ks stat = {stat}) (Debug file: {path})",
                        options.min_p_value
                    );
                }
            });
    }
}

impl<M, D, S> PriorAgreementTest<M, D> for S
where
    M: PriorModel<D> + Clone,
    S: Sampler<M, D>,
{
}

fn transpose2<T>(v: Vec<Vec<T>>) -> Vec<Vec<T>> {
    assert!(!v.is_empty());
    let len = v[0].len();
    let mut iters: Vec<_> = v
        .into_iter()
        .map(std::iter::IntoIterator::into_iter)
        .collect();
    (0..len)
        .map(|_| {
            iters
                .iter_mut()
                .map(|n| {
                    n.next()
                        .expect("the 'Matrix' formed by the double vec should be square")
                })
                .collect::<Vec<T>>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Coin(bool);

    impl Model<f64> for Coin {
        fn ln_likelihood(&self, _data: &f64) -> f64 {
            0.0
        }

        fn ln_prior(&self, p: &f64) -> f64 {
            if self.0 { p.ln() } else { (1.0 - p).ln() }
        }
    }

    impl PriorModel<f64> for Coin {
        fn draw_from_prior<R: Rng>(p: &f64, rng: &mut R) -> Self {
            Self(rng.random::<f64>() < *p)
        }
    }

    /// Independence sampler proposing a fair coin flip.
    struct Flip;

    impl Sampler<Coin, f64> for Flip {
        fn step<R: Rng>(&mut self, model: Coin, data: &f64, rng: &mut R) -> Coin {
            let proposed = Coin(rng.random::<bool>());
            if rng.random::<f64>().ln() < proposed.ln_score(data) - model.ln_score(data) {
                proposed
            } else {
                model
            }
        }
    }

    #[test]
    fn link_caches_scores() {
        let link = Link::new(Coin(true), &0.25);
        assert::close(link.ln_prior, 0.25_f64.ln(), 1e-12);
        assert_eq!(link.ln_likelihood, 0.0);
        assert::close(Model::<f64>::ln_score(&link, &0.9), 0.25_f64.ln(), 1e-12);
    }

    #[test]
    fn impossible_links_skip_the_likelihood() {
        let link = Link::new(Coin(true), &0.0);
        assert_eq!(link.ln_prior, f64::NEG_INFINITY);
        assert_eq!(link.ln_posterior(), f64::NEG_INFINITY);
    }

    #[test]
    fn iter_sample_steps_lazily() {
        let mut rng = SmallRng::seed_from_u64(0x1234);
        let mut sampler = Flip;
        let heads = sampler
            .iter_sample(Coin(false), &0.3, &mut rng, |c| f64::from(u8::from(c.0)))
            .take(20_000)
            .sum::<f64>();
        assert::close(heads / 20_000.0, 0.3, 0.02);
    }

    #[test]
    fn prior_agreement_of_coin_flips() {
        let mut rng = SmallRng::seed_from_u64(0xF00D);
        Flip.assert_prior_agreement(
            &0.3,
            PriorAgreementOptions {
                thinning: 5,
                n_samples: 2000,
                burn_in: 100,
                min_p_value: 0.001,
                stat_map: |c: &Coin| vec![f64::from(u8::from(c.0))],
            },
            &mut rng,
        );
    }
}
