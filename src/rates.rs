/*!
Nuisance rates

The sampling fraction and the replacement rate are not inferred directly but
drawn afresh for every simulation from a normal distribution truncated to the
open unit interval. With variance 0 the mean is used as it is.
 */
use crate::error::DomainError;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde_derive::{Deserialize, Serialize};

/// Rejection sampling gives up after this many draws outside (0, 1).
const MAX_REJECTIONS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateDistribution {
    pub mean: f64,
    pub variance: f64,
}

impl RateDistribution {
    pub fn fixed(value: f64) -> Self {
        RateDistribution {
            mean: value,
            variance: 0.,
        }
    }

    /// Draw one rate. `lowest_allowed` and `highest_allowed` say whether the bounds 0 and 1
    /// themselves are acceptable for a fixed rate; random draws always lie
    /// strictly inside.
    pub fn draw<R: Rng + ?Sized>(
        &self,
        name: &'static str,
        lowest_allowed: bool,
        highest_allowed: bool,
        rng: &mut R,
    ) -> Result<f64, DomainError> {
        let degenerate = DomainError::DegenerateDraw {
            name,
            mean: self.mean,
            variance: self.variance,
        };
        if !self.mean.is_finite() || !self.variance.is_finite() || self.variance < 0. {
            return Err(degenerate);
        }
        if self.variance == 0. {
            let m = self.mean;
            let too_low = m < 0. || (m == 0. && !lowest_allowed);
            let too_high = m > 1. || (m == 1. && !highest_allowed);
            return if too_low || too_high {
                Err(degenerate)
            } else {
                Ok(m)
            };
        }
        let normal = match Normal::new(self.mean, self.variance.sqrt()) {
            Ok(n) => n,
            Err(_) => return Err(degenerate),
        };
        for _ in 0..MAX_REJECTIONS {
            let x = normal.sample(rng);
            if 0. < x && x < 1. {
                return Ok(x);
            }
        }
        Err(degenerate)
    }
}
