/*!
Variant composition

The simulated population is represented by counts per variant. The first
`k` slots hold the variants observed in the first phase, in column order of
the dataset, followed by one slot that lumps together every variant present
in the population but absent from the first sample. Variants invented during
the simulation are appended after these and dropped again once extinct; the
first `k + 1` slots never move.
 */
use crate::dataset::FrequencyDataset;
use crate::error::DomainError;
use crate::population::PopulationTrajectory;
use crate::Steps;
use rand::seq::index;
use rand::Rng;
use rand_distr::{Binomial, Distribution, Gamma, Hypergeometric};

pub type VariantId = u64;

#[derive(Debug, Clone, PartialEq)]
pub struct VariantComposition {
    ids: Vec<VariantId>,
    counts: Vec<u64>,
    tracked: usize,
    next_id: VariantId,
}

impl VariantComposition {
    /// A composition whose first `tracked` slots are pinned.
    pub fn new(counts: Vec<u64>, tracked: usize) -> Self {
        let n = counts.len() as VariantId;
        VariantComposition {
            ids: (0..n).collect(),
            counts,
            tracked,
            next_id: n,
        }
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn ids(&self) -> &[VariantId] {
        &self.ids
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Number of variant slots currently in the composition.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Number of identities minted so far, including the initial slots.
    pub fn minted(&self) -> VariantId {
        self.next_id
    }

    /// Remove `n` individuals at random, without replacement, by drawing
    /// from the multivariate hypergeometric distribution one slot at a time.
    pub fn remove<R: Rng + ?Sized>(
        &mut self,
        n: u64,
        t: Steps,
        rng: &mut R,
    ) -> Result<(), DomainError> {
        let live = self.total();
        if n > live {
            return Err(DomainError::TurnoverExceedsPopulation { t, remove: n, live });
        }
        let mut remaining_population = live;
        let mut remaining_draws = n;
        for count in self.counts.iter_mut() {
            if remaining_draws == 0 {
                break;
            }
            let taken = if remaining_draws == remaining_population {
                *count
            } else if *count == remaining_population {
                remaining_draws
            } else if *count == 0 {
                0
            } else {
                hypergeometric(remaining_population, *count, remaining_draws, rng)
            };
            remaining_population -= *count;
            *count -= taken;
            remaining_draws -= taken;
        }
        Ok(())
    }

    /// Add `n` individuals. `probabilities` has one entry per slot plus a
    /// final entry for innovation; every innovation founds a new variant of
    /// its own.
    pub fn add<R: Rng + ?Sized>(
        &mut self,
        n: u64,
        probabilities: &[f64],
        rng: &mut R,
    ) -> Result<(), DomainError> {
        let drawn = multinomial(n, probabilities, rng)?;
        let innovations = drawn[drawn.len() - 1];
        for (count, d) in self.counts.iter_mut().zip(drawn.iter()) {
            *count += d;
        }
        for _ in 0..innovations {
            self.ids.push(self.next_id);
            self.counts.push(1);
            self.next_id += 1;
        }
        Ok(())
    }

    /// Forget extinct variants outside the pinned slots.
    pub fn prune(&mut self) {
        let tracked = self.tracked;
        let mut i = 0;
        let counts = &self.counts;
        self.ids.retain(|_| {
            let keep = i < tracked || counts[i] > 0;
            i += 1;
            keep
        });
        let mut i = 0;
        self.counts.retain(|&c| {
            let keep = i < tracked || c > 0;
            i += 1;
            keep
        });
    }
}

/// Number of marked individuals among `n` drawn without replacement from a
/// population of `total` with `marked` marked ones.
///
/// `rand_distr` refuses some ordinary parameter combinations (its geometric
/// sampler underflows for larger populations); those are drawn exactly by
/// sampling the individual indices instead.
pub fn hypergeometric<R: Rng + ?Sized>(total: u64, marked: u64, n: u64, rng: &mut R) -> u64 {
    match Hypergeometric::new(total, marked, n) {
        Ok(h) => h.sample(rng),
        Err(_) => index::sample(rng, total as usize, n as usize)
            .iter()
            .filter(|&i| (i as u64) < marked)
            .count() as u64,
    }
}

/// Draw `n` categories with the given probabilities, as a sequence of
/// conditional binomials.
pub fn multinomial<R: Rng + ?Sized>(
    n: u64,
    probabilities: &[f64],
    rng: &mut R,
) -> Result<Vec<u64>, DomainError> {
    let mut drawn = vec![0; probabilities.len()];
    let mut remaining = n;
    let mut mass: f64 = probabilities.iter().sum();
    for (i, &p) in probabilities.iter().enumerate() {
        if remaining == 0 {
            break;
        }
        if p <= 0. {
            continue;
        }
        let conditional = if mass <= 0. { 1. } else { (p / mass).min(1.) };
        let x = Binomial::new(remaining, conditional)
            .map_err(|e| DomainError::Sampling(e.to_string()))?
            .sample(rng);
        drawn[i] = x;
        remaining -= x;
        mass -= p;
    }
    if remaining > 0 {
        // Floating-point leftovers go to the most probable category.
        let best = probabilities
            .iter()
            .enumerate()
            .fold(0, |best, (i, &p)| if p > probabilities[best] { i } else { best });
        drawn[best] += remaining;
    }
    Ok(drawn)
}

/// Relative population frequencies for the observed first-phase counts plus
/// one unobserved category, drawn from the Dirichlet posterior with
/// concentration `count + alpha` per category.
pub fn dirichlet_proportions<R: Rng + ?Sized>(
    observed: &[u64],
    alpha: f64,
    rng: &mut R,
) -> Result<Vec<f64>, DomainError> {
    if !(alpha > 0.) || !alpha.is_finite() {
        return Err(DomainError::InvalidParameter {
            name: "alpha".to_string(),
            value: alpha,
            reason: "the Dirichlet concentration must be positive",
        });
    }
    let xs: Vec<f64> = observed
        .iter()
        .chain(std::iter::once(&0))
        .map(|&c| {
            Gamma::new(c as f64 + alpha, 1.0)
                .map(|g| g.sample(rng))
                .map_err(|e| DomainError::Sampling(e.to_string()))
        })
        .collect::<Result<_, _>>()?;
    let z: f64 = xs.iter().sum();
    if !(z > 0.) || !z.is_finite() {
        return Err(DomainError::Sampling(
            "Dirichlet draw degenerated to zero".to_string(),
        ));
    }
    Ok(xs.iter().map(|x| x / z).collect())
}

/// The composition at step 1: Dirichlet proportions scaled to the
/// population at step 1 and rounded per category. The rounded counts need
/// not add up to the population size exactly.
pub fn initial_composition<R: Rng + ?Sized>(
    dataset: &FrequencyDataset,
    trajectory: &PopulationTrajectory,
    alpha: f64,
    rng: &mut R,
) -> Result<VariantComposition, DomainError> {
    let proportions = dirichlet_proportions(&dataset.first_phase_counts(), alpha, rng)?;
    let n = trajectory.at(1) as f64;
    let counts: Vec<u64> = proportions.iter().map(|p| (p * n).round() as u64).collect();
    let tracked = counts.len();
    Ok(VariantComposition::new(counts, tracked))
}
