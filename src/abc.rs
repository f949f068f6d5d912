/*!
Approximate Bayesian computation

The rejection scheme: draw `nsim` parameter vectors independently from the
priors, simulate once for each, and keep the draws whose summary statistics
lie closest to the target in Euclidean distance.

Simulations are independent tasks on a rayon pool. Task `i` gets its own
generator, seeded from the run seed and stream `i`, so results do not depend
on the number of workers or on the order in which tasks finish. A simulation
that fails with a [`DomainError`] is left out and counted; if too many fail,
the model is considered misspecified and the whole run fails.
 */
use crate::error::{AbcError, DomainError};
use crate::simulator::Simulate;
use crate::util::{euclidean_distance, mean, quantile, sorted};
use crate::{task_rng, SimulationRng};
use itertools::Itertools;
use log::{debug, info, warn};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde_derive::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

const MAX_PRIOR_REJECTIONS: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriorFamily {
    Uniform,
    LogUniform,
    /// A normal distribution truncated to the bounds.
    Normal { mean: f64, sd: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prior {
    pub name: String,
    pub family: PriorFamily,
    pub lower: f64,
    pub upper: f64,
}

impl Prior {
    pub fn uniform(name: &str, lower: f64, upper: f64) -> Prior {
        Prior {
            name: name.to_string(),
            family: PriorFamily::Uniform,
            lower,
            upper,
        }
    }

    pub fn validate(&self) -> Result<(), AbcError> {
        let invalid = |reason: &str| AbcError::InvalidPrior {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if !self.lower.is_finite() || !self.upper.is_finite() || self.lower > self.upper {
            return Err(invalid("bounds must be finite with lower <= upper"));
        }
        match self.family {
            PriorFamily::Uniform => Ok(()),
            PriorFamily::LogUniform => {
                if self.lower > 0. {
                    Ok(())
                } else {
                    Err(invalid("a log-uniform prior needs a positive lower bound"))
                }
            }
            PriorFamily::Normal { mean, sd } => {
                if !mean.is_finite() || !sd.is_finite() || !(sd > 0.) {
                    Err(invalid("a normal prior needs a finite mean and positive sd"))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Draw one value. The prior must have been validated. A truncated
    /// normal whose bounds hold (almost) no mass is an error.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64, AbcError> {
        if self.lower == self.upper {
            return Ok(self.lower);
        }
        match self.family {
            PriorFamily::Uniform => Ok(rng.gen_range(self.lower..self.upper)),
            PriorFamily::LogUniform => Ok(rng
                .gen_range(self.lower.ln()..self.upper.ln())
                .exp()
                .max(self.lower)
                .min(self.upper)),
            PriorFamily::Normal { mean, sd } => {
                let normal = Normal::new(mean, sd).map_err(|e| AbcError::InvalidPrior {
                    name: self.name.clone(),
                    reason: e.to_string(),
                })?;
                for _ in 0..MAX_PRIOR_REJECTIONS {
                    let x = normal.sample(rng);
                    if self.lower <= x && x <= self.upper {
                        return Ok(x);
                    }
                }
                Err(AbcError::InvalidPrior {
                    name: self.name.clone(),
                    reason: format!(
                        "no draw from normal({}, {}) fell within [{}, {}] in {} tries",
                        mean, sd, self.lower, self.upper, MAX_PRIOR_REJECTIONS
                    ),
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tolerance {
    /// Accept this fraction of all simulations.
    Proportion(f64),
    /// Accept every simulation at most this far from the target.
    Distance(f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AbcSettings {
    pub nsim: usize,
    pub tolerance: Tolerance,
    /// Worker threads; 0 lets rayon decide.
    pub workers: usize,
    pub seed: u64,
    /// Fail the run if more than this fraction of simulations fail.
    pub max_failure_fraction: f64,
}

impl Default for AbcSettings {
    fn default() -> Self {
        AbcSettings {
            nsim: 1000,
            tolerance: Tolerance::Proportion(0.01),
            workers: 0,
            seed: 1,
            max_failure_fraction: 0.5,
        }
    }
}

impl AbcSettings {
    fn validate(&self) -> Result<(), AbcError> {
        if self.nsim == 0 {
            return Err(AbcError::InvalidSettings("nsim must be positive".to_string()));
        }
        match self.tolerance {
            Tolerance::Proportion(p) if !(p > 0. && p <= 1.) => {
                return Err(AbcError::InvalidSettings(format!(
                    "tolerance proportion {} is not in (0, 1]",
                    p
                )))
            }
            Tolerance::Distance(d) if !(d >= 0.) => {
                return Err(AbcError::InvalidSettings(format!(
                    "tolerance distance {} is negative",
                    d
                )))
            }
            _ => {}
        }
        if !(0. ..=1.).contains(&self.max_failure_fraction) {
            return Err(AbcError::InvalidSettings(format!(
                "maximum failure fraction {} is not in [0, 1]",
                self.max_failure_fraction
            )));
        }
        Ok(())
    }
}

/// Accepted draws, closest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbcOutput {
    pub names: Vec<String>,
    pub parameters: Vec<Vec<f64>>,
    pub distances: Vec<f64>,
    pub statistics: Vec<Vec<f64>>,
    pub target: Vec<f64>,
    pub simulated: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSummary {
    pub name: String,
    pub mean: f64,
    pub median: f64,
    pub lower: f64,
    pub upper: f64,
}

impl AbcOutput {
    pub fn accepted(&self) -> usize {
        self.parameters.len()
    }

    /// Values of one parameter across the accepted draws.
    pub fn column(&self, i: usize) -> Vec<f64> {
        self.parameters.iter().map(|theta| theta[i]).collect()
    }

    /// Mean, median and central 95% interval of every parameter.
    pub fn summary(&self) -> Vec<ParameterSummary> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let values = sorted(&self.column(i));
                ParameterSummary {
                    name: name.clone(),
                    mean: mean(&values),
                    median: quantile(&values, 0.5),
                    lower: quantile(&values, 0.025),
                    upper: quantile(&values, 0.975),
                }
            })
            .collect()
    }

    /// Write as JSON, or as bincode if the file name ends in `.bin`.
    pub fn store<P: AsRef<Path>>(&self, path: P) -> Result<(), AbcError> {
        let binary = is_binary(path.as_ref());
        let file = BufWriter::new(File::create(path)?);
        if binary {
            bincode::serialize_into(file, self)?;
        } else {
            serde_json::to_writer_pretty(file, self)?;
        }
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<AbcOutput, AbcError> {
        let binary = is_binary(path.as_ref());
        let file = BufReader::new(File::open(path)?);
        Ok(if binary {
            bincode::deserialize_from(file)?
        } else {
            serde_json::from_reader(file)?
        })
    }
}

fn is_binary(path: &Path) -> bool {
    path.extension().map_or(false, |e| e == "bin")
}

/// Run `f(i, rng)` for tasks `0..n` on a pool of `workers` threads.
pub fn parallel_tasks<T, F>(n: usize, workers: usize, seed: u64, f: F) -> Result<Vec<T>, AbcError>
where
    T: Send,
    F: Fn(usize, &mut SimulationRng) -> T + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| AbcError::ThreadPool(e.to_string()))?;
    Ok(pool.install(|| {
        (0..n)
            .into_par_iter()
            .map(|i| {
                let mut rng = task_rng(seed, i as u64);
                f(i, &mut rng)
            })
            .collect()
    }))
}

/// Check a batch's failure count against the tolerated fraction.
pub fn check_failures(
    failures: usize,
    total: usize,
    limit: f64,
    first: Option<DomainError>,
) -> Result<(), AbcError> {
    match first {
        None => Ok(()),
        Some(first) => {
            if failures == total {
                return Err(AbcError::NoSuccessfulSimulation(total));
            }
            if failures as f64 > limit * total as f64 {
                return Err(AbcError::SystemicFailure {
                    failures,
                    total,
                    limit,
                    first,
                });
            }
            warn!(
                "{} of {} simulations failed and were left out, first: {}",
                failures, total, first
            );
            Ok(())
        }
    }
}

pub fn run_abc<S: Simulate + ?Sized>(
    simulator: &S,
    priors: &[Prior],
    target: &[f64],
    settings: &AbcSettings,
) -> Result<AbcOutput, AbcError> {
    settings.validate()?;
    for prior in priors {
        prior.validate()?;
    }
    if let Some(names) = simulator.parameter_names() {
        if names.len() != priors.len() {
            return Err(AbcError::PriorCount {
                expected: names.len(),
                found: priors.len(),
            });
        }
        for (name, prior) in names.iter().zip(priors.iter()) {
            if *name != prior.name {
                return Err(AbcError::InvalidPrior {
                    name: prior.name.clone(),
                    reason: format!("the simulator expects {} at this position", name),
                });
            }
        }
    }

    info!("Running {} simulations", settings.nsim);
    let runs = parallel_tasks(settings.nsim, settings.workers, settings.seed, |_, rng| {
        let theta = priors
            .iter()
            .map(|p| p.draw(rng))
            .collect::<Result<Vec<f64>, AbcError>>()?;
        let result = simulator.simulate(&theta, rng);
        Ok::<_, AbcError>((theta, result))
    })?
    .into_iter()
    .collect::<Result<Vec<_>, AbcError>>()?;

    let mut failures = 0;
    let mut first_failure = None;
    let mut successes: Vec<(Vec<f64>, Vec<f64>, f64)> = Vec::with_capacity(runs.len());
    for (i, (theta, result)) in runs.into_iter().enumerate() {
        match result {
            Ok(statistic) => {
                if statistic.len() != target.len() {
                    return Err(AbcError::TargetLength {
                        expected: statistic.len(),
                        found: target.len(),
                    });
                }
                let d = euclidean_distance(&statistic, target);
                successes.push((theta, statistic, d));
            }
            Err(e) => {
                debug!("Simulation {} with theta {:?} failed: {}", i, theta, e);
                failures += 1;
                if first_failure.is_none() {
                    first_failure = Some(e);
                }
            }
        }
    }
    check_failures(
        failures,
        settings.nsim,
        settings.max_failure_fraction,
        first_failure,
    )?;

    let ranked = successes
        .into_iter()
        .sorted_by(|a, b| a.2.total_cmp(&b.2))
        .collect::<Vec<_>>();
    let keep = match settings.tolerance {
        Tolerance::Proportion(p) => std::cmp::min(
            (p * settings.nsim as f64).round() as usize,
            ranked.len(),
        ),
        Tolerance::Distance(eps) => ranked.iter().take_while(|s| s.2 <= eps).count(),
    };

    let mut out = AbcOutput {
        names: priors.iter().map(|p| p.name.clone()).collect(),
        parameters: Vec::with_capacity(keep),
        distances: Vec::with_capacity(keep),
        statistics: Vec::with_capacity(keep),
        target: target.to_vec(),
        simulated: settings.nsim,
        failures,
    };
    for (theta, statistic, d) in ranked.into_iter().take(keep) {
        out.parameters.push(theta);
        out.statistics.push(statistic);
        out.distances.push(d);
    }
    info!(
        "Accepted {} of {} simulations ({} failed)",
        out.accepted(),
        settings.nsim,
        failures
    );
    Ok(out)
}
