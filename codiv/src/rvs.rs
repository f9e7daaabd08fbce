use rand::Rng;
use rv::dist::{Beta, Dirichlet, Gamma};
use rv::traits::{HasDensity, Sampleable};

use crate::error::{CodivError, Result};

/// Prior on a single positive or unit-interval parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum Prior {
    /// Gamma with shape and rate (`rate = 1 / scale`).
    Gamma(Gamma),
    Beta(Beta),
}

impl Prior {
    /// Gamma prior parameterised by shape and scale, as configuration files do.
    pub fn gamma(shape: f64, scale: f64) -> Result<Self> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(CodivError::config(format!(
                "gamma_distribution scale must be positive, got {scale}"
            )));
        }
        Gamma::new(shape, scale.recip())
            .map(Self::Gamma)
            .map_err(|e| CodivError::config(format!("invalid gamma_distribution: {e}")))
    }

    pub fn beta(alpha: f64, beta: f64) -> Result<Self> {
        Beta::new(alpha, beta)
            .map(Self::Beta)
            .map_err(|e| CodivError::config(format!("invalid beta_distribution: {e}")))
    }

    /// Whether `x` lies in the support of the distribution.
    #[must_use]
    pub fn supports(&self, x: f64) -> bool {
        match self {
            Self::Gamma(_) => x.is_finite() && x > 0.0,
            Self::Beta(_) => x > 0.0 && x < 1.0,
        }
    }

    /// Log density, `-inf` outside the support.
    #[must_use]
    pub fn ln_f(&self, x: f64) -> f64 {
        if !self.supports(x) {
            return f64::NEG_INFINITY;
        }
        match self {
            Self::Gamma(gamma) => gamma.ln_f(&x),
            Self::Beta(beta) => beta.ln_f(&x),
        }
    }

    pub fn draw<R: Rng>(&self, rng: &mut R) -> f64 {
        match self {
            Self::Gamma(gamma) => gamma.draw(rng),
            Self::Beta(beta) => beta.draw(rng),
        }
    }

    #[must_use]
    pub fn mean(&self) -> f64 {
        match self {
            Self::Gamma(gamma) => gamma.shape() / gamma.rate(),
            Self::Beta(beta) => beta.alpha() / (beta.alpha() + beta.beta()),
        }
    }

    #[must_use]
    pub fn variance(&self) -> f64 {
        match self {
            Self::Gamma(gamma) => gamma.shape() / (gamma.rate() * gamma.rate()),
            Self::Beta(beta) => {
                let (a, b) = (beta.alpha(), beta.beta());
                a * b / ((a + b).powi(2) * (a + b + 1.0))
            }
        }
    }
}

/// Dirichlet prior over a probability vector.
#[derive(Clone, Debug, PartialEq)]
pub struct DirichletPrior(Dirichlet);

impl DirichletPrior {
    pub fn new(alphas: Vec<f64>) -> Result<Self> {
        if alphas.len() < 2 {
            return Err(CodivError::config(format!(
                "dirichlet_distribution needs at least two alpha values, got {}",
                alphas.len()
            )));
        }
        Dirichlet::new(alphas)
            .map(Self)
            .map_err(|e| CodivError::config(format!("invalid dirichlet_distribution: {e}")))
    }

    #[must_use]
    pub fn k(&self) -> usize {
        self.0.alphas().len()
    }

    #[must_use]
    pub fn alphas(&self) -> &[f64] {
        self.0.alphas()
    }

    /// Log density of a point on the simplex, `-inf` off the simplex.
    #[must_use]
    pub fn ln_f(&self, x: &[f64]) -> f64 {
        if !on_simplex(x) || x.len() != self.k() {
            return f64::NEG_INFINITY;
        }
        self.0.ln_f(&x.to_vec())
    }

    pub fn draw<R: Rng>(&self, rng: &mut R) -> Vec<f64> {
        self.0.draw(rng)
    }
}

/// Every component strictly positive and the total within rounding of one.
#[must_use]
pub fn on_simplex(x: &[f64]) -> bool {
    x.iter().all(|&p| p > 0.0 && p.is_finite()) && (x.iter().sum::<f64>() - 1.0).abs() < 1e-9
}
