//! Bayesian estimation of shared divergence times.
//!
//! Comparisons (pairs of populations or single populations) are grouped into
//! divergence events by a random partition prior. [`mcmc::chain::Chain`]
//! samples the joint posterior of the partition, the event times and every
//! comparison's demographic parameters with a weighted schedule of
//! Metropolis-Hastings, reversible-jump and Gibbs moves.

pub mod config;
pub mod data;
pub mod error;
pub mod io;
pub mod mcmc;
pub mod models;
pub mod rvs;
pub mod utils;

pub use error::{CodivError, Result};

/// Lens to an inner value of a struct.
pub trait Lens<S, X> {
    /// Get the lensed value, `None` when the target does not carry it.
    fn get(&self, state: &S) -> Option<X>;
    /// Set the lensed value.
    fn set(&self, state: &mut S, x: X);
}

impl<M, X, G, S> Lens<M, X> for (G, S)
where
    G: Fn(&M) -> Option<X>,
    S: Fn(&mut M, X),
{
    fn get(&self, state: &M) -> Option<X> {
        self.0(state)
    }

    fn set(&self, state: &mut M, x: X) {
        self.1(state, x);
    }
}
