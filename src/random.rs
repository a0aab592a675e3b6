//! Random number service injected into the step generator.
//!
//! The generator only ever needs three draws: a uniform deviate, a Gaussian
//! and a Poisson count. Keeping them behind a trait lets tests script exact
//! sequences while production code uses a seeded [`StdRng`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Poisson, StandardNormal};

/// Source of random deviates.
pub trait RandomService: Send {
    /// Uniform deviate in `[0, 1)`.
    fn uniform(&mut self) -> f64;

    /// Gaussian deviate with the given mean and standard deviation.
    fn gaussian(&mut self, mean: f64, sigma: f64) -> f64;

    /// Poisson-distributed count with the given mean.
    ///
    /// Non-positive or non-finite means yield zero.
    fn poisson(&mut self, mean: f64) -> u64;
}

/// [`RandomService`] backed by [`StdRng`].
#[derive(Debug, Clone)]
pub struct StdRandomService {
    rng: StdRng,
}

impl StdRandomService {
    /// Deterministic service for a given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Service seeded from the operating system's entropy source.
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl RandomService for StdRandomService {
    fn uniform(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    fn gaussian(&mut self, mean: f64, sigma: f64) -> f64 {
        let z: f64 = StandardNormal.sample(&mut self.rng);
        mean + sigma * z
    }

    fn poisson(&mut self, mean: f64) -> u64 {
        if !(mean > 0.0) || !mean.is_finite() {
            return 0;
        }
        match Poisson::new(mean) {
            Ok(dist) => dist.sample(&mut self.rng) as u64,
            Err(_) => 0,
        }
    }
}
