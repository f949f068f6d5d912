/*!
Posterior predictive checks

Rerun the simulator for parameter vectors from an accepted posterior sample
and collect, for every first-phase variant and every later phase, the
empirical distribution of simulated frequencies. Comparing these against the
observed frequencies (plotting is left to other tools) shows whether the
fitted model reproduces the data at all.
 */
use crate::abc::{check_failures, parallel_tasks};
use crate::dataset::FrequencyDataset;
use crate::error::AbcError;
use crate::simulator::Simulate;
use crate::util::{mean, quantile, sorted};
use crate::Steps;
use log::{debug, info};
use rand::Rng;
use serde_derive::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictiveSettings {
    /// Number of simulations, each for a posterior row drawn with
    /// replacement. `None` simulates once for every row.
    pub draws: Option<usize>,
    pub workers: usize,
    pub seed: u64,
    pub max_failure_fraction: f64,
}

impl Default for PredictiveSettings {
    fn default() -> Self {
        PredictiveSettings {
            draws: None,
            workers: 0,
            seed: 1,
            max_failure_fraction: 0.5,
        }
    }
}

/// Simulated frequencies next to the observed ones. Statistics are
/// variant-major, as everywhere else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictiveCheck {
    pub labels: Vec<String>,
    /// Timestamps of the phases after the first.
    pub timestamps: Vec<Steps>,
    pub observed: Vec<f64>,
    pub simulations: Vec<Vec<f64>>,
    pub failures: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSummary {
    pub label: String,
    pub timestamp: Steps,
    pub observed: f64,
    pub mean: f64,
    pub lower: f64,
    pub median: f64,
    pub upper: f64,
}

impl PredictiveCheck {
    fn index(&self, variant: usize, phase: usize) -> usize {
        variant * self.timestamps.len() + phase
    }

    /// Simulated frequencies of first-phase variant `variant` in later phase
    /// `phase` (0 is the second phase of the dataset).
    pub fn cell(&self, variant: usize, phase: usize) -> Vec<f64> {
        let i = self.index(variant, phase);
        self.simulations.iter().map(|s| s[i]).collect()
    }

    /// Mean, median and central 95% band of every cell.
    pub fn summary(&self) -> Vec<CellSummary> {
        let mut out = Vec::with_capacity(self.observed.len());
        for (v, label) in self.labels.iter().enumerate() {
            for (j, &timestamp) in self.timestamps.iter().enumerate() {
                let values = sorted(&self.cell(v, j));
                out.push(CellSummary {
                    label: label.clone(),
                    timestamp,
                    observed: self.observed[self.index(v, j)],
                    mean: mean(&values),
                    lower: quantile(&values, 0.025),
                    median: quantile(&values, 0.5),
                    upper: quantile(&values, 0.975),
                });
            }
        }
        out
    }

    pub fn store<P: AsRef<Path>>(&self, path: P) -> Result<(), AbcError> {
        let file = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(
            file,
            &Stored {
                check: self,
                summary: self.summary(),
            },
        )?;
        Ok(())
    }
}

#[derive(Serialize)]
struct Stored<'a> {
    check: &'a PredictiveCheck,
    summary: Vec<CellSummary>,
}

pub fn posterior_predictive<S: Simulate + ?Sized>(
    dataset: &FrequencyDataset,
    simulator: &S,
    posterior: &[Vec<f64>],
    settings: &PredictiveSettings,
) -> Result<PredictiveCheck, AbcError> {
    if posterior.is_empty() {
        return Err(AbcError::InvalidSettings(
            "the posterior sample is empty".to_string(),
        ));
    }
    let n = settings.draws.unwrap_or_else(|| posterior.len());
    if n == 0 {
        return Err(AbcError::InvalidSettings("no draws requested".to_string()));
    }
    info!("Running {} posterior predictive simulations", n);
    let subsample = settings.draws.is_some();
    let runs = parallel_tasks(n, settings.workers, settings.seed, |i, rng| {
        let row = if subsample {
            rng.gen_range(0..posterior.len())
        } else {
            i
        };
        simulator.simulate(&posterior[row], rng)
    })?;

    let expected = dataset.statistic_len();
    let mut failures = 0;
    let mut first_failure = None;
    let mut simulations = Vec::with_capacity(n);
    for (i, run) in runs.into_iter().enumerate() {
        match run {
            Ok(s) => {
                if s.len() != expected {
                    return Err(AbcError::TargetLength {
                        expected: s.len(),
                        found: expected,
                    });
                }
                simulations.push(s)
            }
            Err(e) => {
                debug!("Predictive simulation {} failed: {}", i, e);
                failures += 1;
                if first_failure.is_none() {
                    first_failure = Some(e);
                }
            }
        }
    }
    check_failures(failures, n, settings.max_failure_fraction, first_failure)?;

    Ok(PredictiveCheck {
        labels: dataset
            .first_phase_labels()
            .iter()
            .map(|l| l.to_string())
            .collect(),
        timestamps: dataset.timestamps()[1..].to_vec(),
        observed: dataset.target_frequencies().to_vec(),
        simulations,
        failures,
    })
}
