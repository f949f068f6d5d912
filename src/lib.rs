/*!
Model Description
=================

This model description follows the ODD (Overview, Design concept, Details)
protocol (Grimm et al., 2006; Grimm et al., 2010), as far as it applies to a
population-level stochastic model rather than an agent-based one. The model
is documented in the order of that protocol, with the actual code in the
submodules referenced from each section.

# 1. Purpose

Archaeological assemblages record how often different variants of a cultural
trait (decoration styles, projectile point types, …) occur in a handful of
sampling phases, unevenly spaced in time. The purpose of the model is to ask
which rules of cultural transmission, and which rates of innovation, are
consistent with the observed change in variant frequencies.

To that end the model generates, for given parameters, the frequencies that
the first-phase variants would have in the later phases if the population had
evolved under a hypothesized transmission rule. Approximate Bayesian
computation (ABC) then compares many such simulations, under parameters drawn
from prior distributions, with the observed frequencies, and keeps the
parameters that reproduce them best.

 */

use rand::SeedableRng;
use std::sync::Arc;

pub mod error;
pub mod util;

/**
# 2. Entities, state variables, and scales

The model runs in discrete time steps, numbered from 1. There is no fixed
calendar length of a step; the observed phases are placed on the same scale
by the time step at which each ends.

 */
pub type Steps = u32;

/**
## 2.1 Observations

The data are counts of variants per sampling phase, the last time step of
each phase, and for every phase after the first the number of time steps its
sample accumulated over.

 */
pub mod dataset;

/**
## 2.2 Population

The population is not made of agents. It is described by its size in every
time step and by its composition: the number of individuals (or artefacts)
carrying each variant. Variants present in the first sample are tracked
individually, all others present at the start share one lumped slot, and each
innovation founds a new variant.

 */
pub mod population;
pub mod composition;

/**
## 2.3 Parameters

The inferred parameters (`theta`) are named and ordered when a simulator is
constructed. Everything else is held in [`parameters::Parameters`].

 */
pub mod parameters;
pub mod rates;

/**
# 3. Process overview and scheduling

One simulation consists of

 1. drawing a sampling fraction and estimating the population size in every
    time step (Submodel 7.1),
 2. drawing a replacement rate and scheduling, for every step, how many
    individuals leave and join the population (Submodel 7.2),
 3. estimating the composition at step 1 from the first sample (Submodel 7.3),
 4. and then, for every step until the last phase ends, removing the leavers
    at random and letting the newcomers copy a variant according to the
    transmission model (Submodels 7.4 and 7.5).

At the end of each later phase the frequencies of the first-phase variants
are recorded. These, variant by variant, form the summary statistic.

 */
pub mod simulation;

/**
# 4. Design concepts

## 4.1 Basic principles

The population-level description follows the neutral and frequency-biased
models of cultural transmission (Neiman 1995; Bentley et al. 2004; Kandler &
Shennan 2013): every newcomer adopts an existing variant, with a probability
that depends on the variant's current frequency, or invents a new one.

## 4.2 Emergence

Frequency trajectories of the variants, including extinctions of observed
variants and the rise of unobserved or novel ones, emerge from the
repeated stochastic copying.

## 4.3 Stochasticity

Every random quantity is drawn from an explicitly passed generator: the
sampling fraction, the replacement rate, the Dirichlet estimate of the
initial composition, who leaves the population and whom newcomers copy.
Each simulation in a batch gets a generator of its own, seeded from the
batch seed and the simulation's index, so that results are reproducible and
independent of scheduling.

 */
pub type SimulationRng = rand_chacha::ChaCha8Rng;

/// The generator of task `task` in a batch seeded with `seed`.
pub fn task_rng(seed: u64, task: u64) -> SimulationRng {
    let mut rng = SimulationRng::seed_from_u64(seed);
    rng.set_stream(task);
    rng
}

/**
## 4.4 Observation

The model reports only what could have been observed: the relative
frequencies of the variants known from the first phase, at the end of every
later phase. Variants that appear later are part of the denominator but are
not reported individually. With time-averaged recording, the composition is
pooled over the duration of each phase, mimicking a time-averaged deposit.

# 5. Initialization

At step 1 the population has the size estimated for the first phase. Its
composition is drawn from the Dirichlet posterior of the first sample, with
one extra category for variants present but unsampled.

# 6. Input Data

The only input is the frequency table of [`dataset::FrequencyDataset`].

# 7. Submodels

7.1 Population size: [`population`]. 7.2 Turnover: [`turnover`].
7.3 Initial composition: [`composition`]. 7.4 Transmission: [`transmission`].
7.5 Simulation and summary statistic: [`simulation`], wrapped into a
simulator of `theta` by [`simulator::gen_sim`].

 */
pub mod turnover;
pub mod transmission;
pub mod simulator;

/**
# 8. Inference

ABC rejection over the simulator ([`abc`]) and posterior predictive checks
of the accepted sample ([`predictive`]).

 */
pub mod abc;
pub mod predictive;

pub mod cli;

#[cfg(test)]
mod tests;

use abc::AbcOutput;
use dataset::FrequencyDataset;
use error::{AbcError, ConfigurationError};
use parameters::{ModelChoice, RunConfig};
use simulator::FrequencySimulator;
use transmission::{FrequencyBias, Neutral, TransmissionModel};

pub fn transmission_model(choice: ModelChoice) -> Arc<dyn TransmissionModel> {
    match choice {
        ModelChoice::FrequencyBias => Arc::new(FrequencyBias),
        ModelChoice::Neutral => Arc::new(Neutral),
    }
}

/// The simulator described by a run configuration, with the priors' names as
/// free parameters.
pub fn build_simulator(
    dataset: Arc<FrequencyDataset>,
    config: &RunConfig,
) -> Result<FrequencySimulator, ConfigurationError> {
    let fixed: Vec<(&str, f64)> = config
        .fixed
        .iter()
        .map(|(name, value)| (name.as_str(), *value))
        .collect();
    simulator::gen_sim(
        dataset,
        transmission_model(config.model),
        &config.free_parameters(),
        &fixed,
        &config.parameters,
    )
}

pub fn infer(dataset: Arc<FrequencyDataset>, config: &RunConfig) -> Result<AbcOutput, AbcError> {
    let simulator = build_simulator(dataset.clone(), config)?;
    abc::run_abc(
        &simulator,
        &config.priors,
        dataset.target_frequencies(),
        &config.abc,
    )
}
