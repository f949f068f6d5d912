/*!
Simulators

[`gen_sim`] closes over a dataset, a transmission model and the settings of
the nuisance parameters, and returns a simulator that maps a parameter vector
`theta` to a summary statistic comparable to the dataset's target
frequencies. Which symbols are taken from `theta`, and in which order, is
fixed when the simulator is built; naming mistakes surface there and not in
the middle of an ABC run.

Every call is an independent Monte Carlo sample: the sampling fraction, the
replacement rate, the initial composition and the whole stochastic history
are drawn afresh from the generator passed in.

Known symbols are `mu` (innovation rate), the transmission model's own
parameters (such as `b`), `s` (sampling fraction), `r` (replacement rate)
and `alpha` (Dirichlet concentration). `mu` and the model parameters must be
either free or fixed; `s`, `r` and `alpha` fall back to [`Parameters`].
 */
use crate::composition::initial_composition;
use crate::dataset::FrequencyDataset;
use crate::error::{ConfigurationError, DomainError};
use crate::parameters::Parameters;
use crate::population;
use crate::rates::RateDistribution;
use crate::simulation::{Recording, Simulation, Transmission};
use crate::transmission::{self, TransmissionModel};
use crate::turnover;
use crate::SimulationRng;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Anything that turns a parameter vector into a summary statistic. Must be
/// callable from many threads at once.
pub trait Simulate: Sync {
    /// Names of the entries of `theta`, if the simulator knows them.
    fn parameter_names(&self) -> Option<Vec<String>> {
        None
    }

    fn simulate(&self, theta: &[f64], rng: &mut SimulationRng) -> Result<Vec<f64>, DomainError>;
}

impl<F> Simulate for F
where
    F: Fn(&[f64], &mut SimulationRng) -> Result<Vec<f64>, DomainError> + Sync,
{
    fn simulate(&self, theta: &[f64], rng: &mut SimulationRng) -> Result<Vec<f64>, DomainError> {
        self(theta, rng)
    }
}

/// The ordered names of the free parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ThetaSchema {
    names: Vec<String>,
    positions: FxHashMap<String, usize>,
}

impl ThetaSchema {
    pub fn new(names: &[&str]) -> Result<Self, ConfigurationError> {
        let mut positions = FxHashMap::default();
        for (i, name) in names.iter().enumerate() {
            if positions.insert(name.to_string(), i).is_some() {
                return Err(ConfigurationError::DuplicateParameter(name.to_string()));
            }
        }
        Ok(ThetaSchema {
            names: names.iter().map(|n| n.to_string()).collect(),
            positions,
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Source {
    Theta(usize),
    Fixed(f64),
}

impl Source {
    fn value(self, theta: &[f64]) -> f64 {
        match self {
            Source::Theta(i) => theta[i],
            Source::Fixed(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RateSource {
    Theta(usize),
    Drawn(RateDistribution),
}

impl RateSource {
    fn distribution(self, theta: &[f64]) -> RateDistribution {
        match self {
            RateSource::Theta(i) => RateDistribution::fixed(theta[i]),
            RateSource::Drawn(d) => d,
        }
    }
}

pub struct FrequencySimulator {
    dataset: Arc<FrequencyDataset>,
    model: Arc<dyn TransmissionModel>,
    schema: ThetaSchema,
    mu: Source,
    model_parameters: Vec<Source>,
    sampling_fraction: RateSource,
    replacement_rate: RateSource,
    alpha: Source,
    recording: Recording,
    max_variants: Option<usize>,
}

/// Build a simulator for `dataset` under `model`, with `free` taken from
/// theta in the given order and `fixed` symbols held constant.
pub fn gen_sim(
    dataset: Arc<FrequencyDataset>,
    model: Arc<dyn TransmissionModel>,
    free: &[&str],
    fixed: &[(&str, f64)],
    p: &Parameters,
) -> Result<FrequencySimulator, ConfigurationError> {
    let schema = ThetaSchema::new(free)?;
    let model_names = model.parameters();

    let is_known = |name: &str| {
        ["mu", "s", "r", "alpha"].contains(&name) || model_names.iter().any(|m| m == name)
    };
    for name in schema.names() {
        if !is_known(name.as_str()) {
            return Err(ConfigurationError::UnknownParameter(name.clone()));
        }
    }
    let mut fixed_values: FxHashMap<&str, f64> = FxHashMap::default();
    for &(name, value) in fixed {
        if !is_known(name) {
            return Err(ConfigurationError::UnknownParameter(name.to_string()));
        }
        if schema.position(name).is_some() || fixed_values.insert(name, value).is_some() {
            return Err(ConfigurationError::DuplicateParameter(name.to_string()));
        }
    }

    let bind = |name: &str| -> Option<Source> {
        match schema.position(name) {
            Some(i) => Some(Source::Theta(i)),
            None => fixed_values.get(name).map(|&v| Source::Fixed(v)),
        }
    };
    let required = |name: &str| {
        bind(name).ok_or_else(|| ConfigurationError::UnboundParameter(name.to_string()))
    };

    let mu = required("mu")?;
    let model_parameters = model_names
        .iter()
        .map(|name| required(name.as_str()))
        .collect::<Result<Vec<_>, _>>()?;

    let rate = |name: &str, default: RateDistribution| match bind(name) {
        Some(Source::Theta(i)) => RateSource::Theta(i),
        Some(Source::Fixed(v)) => RateSource::Drawn(RateDistribution::fixed(v)),
        None => RateSource::Drawn(default),
    };
    let sampling_fraction = rate("s", p.sampling_fraction);
    let replacement_rate = rate("r", p.replacement_rate);
    let alpha = bind("alpha").unwrap_or(Source::Fixed(p.dirichlet_alpha));

    if let Source::Fixed(a) = alpha {
        if !(a > 0.) || !a.is_finite() {
            return Err(ConfigurationError::InvalidSetting {
                name: "alpha",
                value: a,
                reason: "the Dirichlet concentration must be positive",
            });
        }
    }
    for (name, source) in [("s", sampling_fraction), ("r", replacement_rate)].iter() {
        if let RateSource::Drawn(d) = source {
            if !(d.variance >= 0.) {
                return Err(ConfigurationError::InvalidSetting {
                    name: *name,
                    value: d.variance,
                    reason: "variances must be non-negative",
                });
            }
        }
    }

    // Registration check, with fixed values where they are known.
    let mut trial = model.check_parameters();
    if trial.len() == model_parameters.len() {
        for (value, source) in trial.iter_mut().zip(model_parameters.iter()) {
            if let Source::Fixed(v) = source {
                *value = *v;
            }
        }
    }
    transmission::validate_with(model.as_ref(), &trial)?;

    Ok(FrequencySimulator {
        dataset,
        model,
        schema,
        mu,
        model_parameters,
        sampling_fraction,
        replacement_rate,
        alpha,
        recording: p.recording,
        max_variants: p.max_variants,
    })
}

impl FrequencySimulator {
    pub fn schema(&self) -> &ThetaSchema {
        &self.schema
    }

    pub fn dataset(&self) -> &FrequencyDataset {
        &self.dataset
    }

    /// Set up a simulation at step 1 without running it.
    pub fn prepare(
        &self,
        theta: &[f64],
        rng: &mut SimulationRng,
    ) -> Result<Simulation<'_>, DomainError> {
        if theta.len() != self.schema.len() {
            return Err(DomainError::ThetaLength {
                expected: self.schema.len(),
                found: theta.len(),
            });
        }
        let mu = self.mu.value(theta);
        if !(0. ..=1.).contains(&mu) {
            return Err(DomainError::InvalidParameter {
                name: "mu".to_string(),
                value: mu,
                reason: "the innovation rate must lie in [0, 1]",
            });
        }
        let params: Vec<f64> = self
            .model_parameters
            .iter()
            .map(|s| s.value(theta))
            .collect();

        let trajectory = population::estimate(
            &self.dataset,
            &self.sampling_fraction.distribution(theta),
            rng,
        )?;
        let schedule = turnover::draw_schedule(
            &trajectory,
            &self.replacement_rate.distribution(theta),
            rng,
        )?;
        let composition =
            initial_composition(&self.dataset, &trajectory, self.alpha.value(theta), rng)?;

        Ok(Simulation::new(
            &self.dataset,
            trajectory,
            schedule,
            composition,
            Transmission {
                model: self.model.as_ref(),
                mu,
                params,
            },
            self.recording,
            self.max_variants,
        ))
    }
}

impl Simulate for FrequencySimulator {
    fn parameter_names(&self) -> Option<Vec<String>> {
        Some(self.schema.names().to_vec())
    }

    fn simulate(&self, theta: &[f64], rng: &mut SimulationRng) -> Result<Vec<f64>, DomainError> {
        self.prepare(theta, rng)?.run(rng)
    }
}
