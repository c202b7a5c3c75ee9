//! Parametric mutation policy.
//!
//! A [`Mutation`] is pure configuration: it holds the ranges used to perturb
//! existing biases and weights and to draw fresh ones. Randomness comes from
//! whatever [`rand::Rng`] the caller passes in, so seeded runs stay
//! reproducible.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Mutation ranges and the bounded random delta transform
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Mutation {
    /// Scale of a bias perturbation
    pub bias_delta: f64,
    /// Scale of a weight perturbation
    pub weight_delta: f64,
    /// Scale of a freshly drawn bias
    pub new_bias_range: f64,
    /// Scale of a freshly drawn weight
    pub new_weight_range: f64,
    /// Clamp applied before the `atanh` transform, in (0, 1)
    pub delta_clamp: f64,
}

impl Default for Mutation {
    fn default() -> Self {
        Self {
            bias_delta: 0.5,
            weight_delta: 0.5,
            new_bias_range: 0.1,
            new_weight_range: 1.0,
            delta_clamp: 0.995,
        }
    }
}

impl Mutation {
    /// Draw a delta in `[-1, 1]`.
    ///
    /// A uniform draw in `[0, 1)` is mapped to `[-1, 1)`, clamped, passed
    /// through `atanh` and renormalised by `atanh(delta_clamp)`. Small values
    /// dominate while the tail still reaches the bounds.
    pub fn delta_random<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let u: f64 = rng.gen();
        let x = (2.0 * u - 1.0).clamp(-self.delta_clamp, self.delta_clamp);
        x.atanh() / self.delta_clamp.atanh()
    }

    /// Perturb a bias in place, returning the applied delta
    pub fn mutate_bias<R: Rng + ?Sized>(&self, bias: &mut f64, rng: &mut R) -> f64 {
        let delta = self.bias_delta * self.delta_random(rng);
        *bias += delta;
        delta
    }

    /// Perturb a weight in place, returning the applied delta
    pub fn mutate_weight<R: Rng + ?Sized>(&self, weight: &mut f64, rng: &mut R) -> f64 {
        let delta = self.weight_delta * self.delta_random(rng);
        *weight += delta;
        delta
    }

    /// Fresh bias for a newly created unit
    pub fn new_bias<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        self.new_bias_range * self.delta_random(rng)
    }

    /// Fresh weight for a newly created synapse
    pub fn new_weight<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        self.new_weight_range * self.delta_random(rng)
    }

    /// Validate ranges
    pub fn validate(&self) -> Result<(), String> {
        if !(self.delta_clamp > 0.0 && self.delta_clamp < 1.0) {
            return Err("mutation.delta_clamp must be in (0, 1)".to_string());
        }
        let ranges = [
            self.bias_delta,
            self.weight_delta,
            self.new_bias_range,
            self.new_weight_range,
        ];
        if ranges.iter().any(|r| !r.is_finite() || *r < 0.0) {
            return Err("mutation ranges must be finite and non-negative".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_delta_random_bounded() {
        let mutation = Mutation::default();
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        for _ in 0..10_000 {
            let d = mutation.delta_random(&mut rng);
            assert!((-1.0..=1.0).contains(&d), "delta out of bounds: {}", d);
        }
    }

    #[test]
    fn test_delta_random_clusters_near_zero() {
        let mutation = Mutation::default();
        let mut rng = ChaCha8Rng::seed_from_u64(11);

        let draws: Vec<f64> = (0..10_000).map(|_| mutation.delta_random(&mut rng)).collect();
        let small = draws.iter().filter(|d| d.abs() < 0.25).count();
        let large = draws.iter().filter(|d| d.abs() > 0.75).count();

        // atanh(0.995) ~ 3, so |d| < 0.25 covers |x| < tanh(0.75) ~ 0.64
        assert!(small > draws.len() / 2);
        assert!(large > 0, "tail should still be reachable");
        assert!(large < small);
    }

    #[test]
    fn test_mutate_weight_applies_scaled_delta() {
        let mutation = Mutation {
            weight_delta: 2.0,
            ..Mutation::default()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        let mut weight = 1.0;
        let delta = mutation.mutate_weight(&mut weight, &mut rng);

        assert!((weight - (1.0 + delta)).abs() < 1e-12);
        assert!(delta.abs() <= 2.0);
    }

    #[test]
    fn test_zero_range_is_noop() {
        let mutation = Mutation {
            bias_delta: 0.0,
            ..Mutation::default()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(5);

        let mut bias = 0.25;
        mutation.mutate_bias(&mut bias, &mut rng);
        assert_eq!(bias, 0.25);
    }

    #[test]
    fn test_validate() {
        assert!(Mutation::default().validate().is_ok());

        let bad = Mutation {
            delta_clamp: 1.0,
            ..Mutation::default()
        };
        assert!(bad.validate().is_err());
    }
}
