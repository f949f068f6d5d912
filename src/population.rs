/*!
Population size

Each phase's sample is taken to be a fraction `s` of the population alive at
the end of that phase, so the population estimate of a phase is its sample
size divided by `s`. Between phase ends the population changes linearly, and
before the end of the first phase it stays at the first estimate.
 */
use crate::dataset::FrequencyDataset;
use crate::error::DomainError;
use crate::rates::RateDistribution;
use crate::Steps;
use rand::Rng;
use serde_derive::{Deserialize, Serialize};

/// Population size for every time step `1..=T`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationTrajectory {
    sizes: Vec<u64>,
}

impl PopulationTrajectory {
    /// Population size at time step `t` (1-based).
    pub fn at(&self, t: Steps) -> u64 {
        self.sizes[t as usize - 1]
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    pub fn sizes(&self) -> &[u64] {
        &self.sizes
    }
}

impl From<Vec<u64>> for PopulationTrajectory {
    fn from(sizes: Vec<u64>) -> Self {
        PopulationTrajectory { sizes }
    }
}

/// Population estimate of each phase for a given sampling fraction.
pub fn phase_estimates(
    dataset: &FrequencyDataset,
    sampling_fraction: f64,
) -> Result<Vec<f64>, DomainError> {
    if !(sampling_fraction > 0.) {
        return Err(DomainError::InvalidParameter {
            name: "s".to_string(),
            value: sampling_fraction,
            reason: "the sampling fraction must be positive",
        });
    }
    dataset
        .sample_sizes()
        .iter()
        .enumerate()
        .map(|(phase, &n)| {
            let estimate = n as f64 / sampling_fraction;
            if estimate.is_finite() && estimate.round() >= 1. {
                Ok(estimate)
            } else {
                Err(DomainError::DegeneratePopulation { phase, estimate })
            }
        })
        .collect()
}

/// Interpolate the trajectory through the phase estimates for a fixed
/// sampling fraction.
pub fn interpolate(
    dataset: &FrequencyDataset,
    sampling_fraction: f64,
) -> Result<PopulationTrajectory, DomainError> {
    let estimates = phase_estimates(dataset, sampling_fraction)?;
    let anchors = dataset.timestamps();
    let mut sizes = Vec::with_capacity(dataset.max_timestamp() as usize);

    let mut segment = 0;
    for t in 1..=dataset.max_timestamp() {
        let value = if t <= anchors[0] {
            estimates[0]
        } else {
            while anchors[segment + 1] < t {
                segment += 1;
            }
            if anchors[segment + 1] == t {
                sizes.push(estimates[segment + 1].round() as u64);
                continue;
            }
            let (t0, t1) = (anchors[segment] as f64, anchors[segment + 1] as f64);
            let (y0, y1) = (estimates[segment], estimates[segment + 1]);
            y0 + (y1 - y0) * (t as f64 - t0) / (t1 - t0)
        };
        sizes.push(value.round() as u64);
    }
    Ok(PopulationTrajectory { sizes })
}

/// Draw a sampling fraction and build the trajectory from it.
pub fn estimate<R: Rng + ?Sized>(
    dataset: &FrequencyDataset,
    sampling_fraction: &RateDistribution,
    rng: &mut R,
) -> Result<PopulationTrajectory, DomainError> {
    let s = sampling_fraction.draw("sampling fraction", false, true, rng)?;
    interpolate(dataset, s)
}
