/*!
Cultural change

One simulation runs from step 1, where the population has its estimated
initial composition, to the last phase timestamp. Each step first removes the
individuals scheduled to leave, sampled without replacement, and then adds
the newcomers. The transmission model is evaluated once per step on the
post-removal composition, and all newcomers of that step copy according to
the same probabilities.

At the end of every phase after the first, the relative frequencies of the
first-phase variants within the whole live population are recorded. Other
variants, including the lumped unobserved slot and all innovations, still
take part in the dynamics but are not reported.
 */
use crate::composition::VariantComposition;
use crate::dataset::FrequencyDataset;
use crate::error::DomainError;
use crate::population::PopulationTrajectory;
use crate::transmission::{is_probability_vector, TransmissionModel};
use crate::turnover::TurnoverSchedule;
use crate::Steps;
use rand::Rng;
use serde_derive::{Deserialize, Serialize};

/// How a phase's frequencies are read off the simulated population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Recording {
    /// The composition at the phase timestamp.
    Snapshot,
    /// The composition pooled over the phase's duration, ending at its
    /// timestamp.
    TimeAveraged,
}

impl Default for Recording {
    fn default() -> Self {
        Recording::Snapshot
    }
}

impl std::str::FromStr for Recording {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "snapshot" => Ok(Recording::Snapshot),
            "time-averaged" => Ok(Recording::TimeAveraged),
            _ => Err(format!("Unknown recording mode {}", s)),
        }
    }
}

/// The transmission model together with the parameter values of one run.
pub struct Transmission<'a> {
    pub model: &'a dyn TransmissionModel,
    pub mu: f64,
    pub params: Vec<f64>,
}

pub struct Simulation<'a> {
    dataset: &'a FrequencyDataset,
    trajectory: PopulationTrajectory,
    schedule: TurnoverSchedule,
    transmission: Transmission<'a>,
    recording: Recording,
    max_variants: Option<usize>,

    composition: VariantComposition,
    t: Steps,
    /// The next phase to be recorded.
    phase: usize,
    pooled: Vec<u64>,
    pooled_total: u64,
    records: Vec<Vec<f64>>,
}

impl<'a> Simulation<'a> {
    pub fn new(
        dataset: &'a FrequencyDataset,
        trajectory: PopulationTrajectory,
        schedule: TurnoverSchedule,
        composition: VariantComposition,
        transmission: Transmission<'a>,
        recording: Recording,
        max_variants: Option<usize>,
    ) -> Self {
        let k = dataset.variants_in_first_phase();
        Simulation {
            dataset,
            trajectory,
            schedule,
            transmission,
            recording,
            max_variants,
            composition,
            t: 1,
            phase: 1,
            pooled: vec![0; k],
            pooled_total: 0,
            records: Vec::with_capacity(dataset.phases() - 1),
        }
    }

    pub fn t(&self) -> Steps {
        self.t
    }

    pub fn composition(&self) -> &VariantComposition {
        &self.composition
    }

    pub fn trajectory(&self) -> &PopulationTrajectory {
        &self.trajectory
    }

    pub fn is_finished(&self) -> bool {
        self.t >= self.dataset.max_timestamp()
    }

    /// Frequencies recorded so far, one vector of `k` values per phase.
    pub fn records(&self) -> &[Vec<f64>] {
        &self.records
    }

    /// Advance by one time step.
    pub fn step<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(), DomainError> {
        if self.is_finished() {
            return Ok(());
        }
        let t = self.t + 1;
        let turnover = self.schedule.at(t);

        self.composition.remove(turnover.remove, t, rng)?;

        let p = self.transmission.model.probabilities(
            self.composition.counts(),
            self.transmission.mu,
            &self.transmission.params,
        );
        if !is_probability_vector(&p, self.composition.len() + 1) {
            return Err(DomainError::InvalidProbabilities { t });
        }
        self.composition.add(turnover.add, &p, rng)?;
        self.composition.prune();

        if let Some(limit) = self.max_variants {
            if self.composition.len() > limit {
                return Err(DomainError::TooManyVariants {
                    t,
                    live: self.composition.len(),
                    limit,
                });
            }
        }

        self.t = t;
        self.observe();
        Ok(())
    }

    fn observe(&mut self) {
        if self.phase >= self.dataset.phases() {
            return;
        }
        let end = self.dataset.timestamps()[self.phase];
        let window = match self.recording {
            Recording::Snapshot => 1,
            Recording::TimeAveraged => self.dataset.duration(self.phase),
        };
        if self.t + window <= end {
            return;
        }
        let counts = self.composition.counts();
        for (pooled, &c) in self.pooled.iter_mut().zip(counts.iter()) {
            *pooled += c;
        }
        self.pooled_total += self.composition.total();

        if self.t == end {
            let total = self.pooled_total;
            self.records.push(
                self.pooled
                    .iter()
                    .map(|&c| if total == 0 { 0. } else { c as f64 / total as f64 })
                    .collect(),
            );
            self.pooled.iter_mut().for_each(|c| *c = 0);
            self.pooled_total = 0;
            self.phase += 1;
        }
    }

    /// The summary statistic, variant-major: for each first-phase variant,
    /// its frequency in phase 2, phase 3, and so on.
    pub fn statistic(&self) -> Vec<f64> {
        let k = self.pooled.len();
        let mut out = Vec::with_capacity(k * self.records.len());
        for v in 0..k {
            for record in self.records.iter() {
                out.push(record[v]);
            }
        }
        out
    }

    pub fn run<R: Rng + ?Sized>(mut self, rng: &mut R) -> Result<Vec<f64>, DomainError> {
        while !self.is_finished() {
            self.step(rng)?;
        }
        Ok(self.statistic())
    }
}
