/*!
Transmission models

A transmission model says who is copied when a new individual joins the
population. Given the current counts per variant slot, the innovation rate
`mu` and the model's own parameters, it returns one probability per slot and
a final probability for innovating a variant that has never existed before.

Models are plain values behind the [`TransmissionModel`] trait. Besides the
built-in frequency-biased and neutral models, any closure with the right
signature can be wrapped with [`custom`]. Every model is checked once with
[`validate`] before it is used in a simulation.

```rust
use model::transmission::{FrequencyBias, TransmissionModel};

let p = FrequencyBias.probabilities(&[30, 10, 0], 0.1, &[0.0]);
assert_eq!(p.len(), 4);
assert!((p[0] - 0.675).abs() < 1e-12);
assert!((p[3] - 0.1).abs() < 1e-12);
```
 */
use crate::error::ConfigurationError;

/// Probabilities may deviate from summing to one by this much.
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

pub trait TransmissionModel: Send + Sync {
    fn name(&self) -> &str;

    /// Names of the parameters the model takes in addition to `mu`, in the
    /// order `probabilities` expects them.
    fn parameters(&self) -> Vec<String>;

    /// One probability per slot of `counts`, followed by the innovation
    /// probability.
    fn probabilities(&self, counts: &[u64], mu: f64, params: &[f64]) -> Vec<f64>;

    /// Parameter values used for the registration check.
    fn check_parameters(&self) -> Vec<f64> {
        vec![0.0; self.parameters().len()]
    }
}

/**
Frequency-biased copying: variant `j` with relative frequency `m_j` is copied
with probability proportional to `m_j^(1+b)`, scaled to leave `mu` for
innovation. `b < 0` favours rare variants, `b > 0` common ones and `b = 0` is
unbiased copying.
 */
#[derive(Debug, Clone, Copy, Default)]
pub struct FrequencyBias;

impl TransmissionModel for FrequencyBias {
    fn name(&self) -> &str {
        "frequency-bias"
    }

    fn parameters(&self) -> Vec<String> {
        vec!["b".to_string()]
    }

    fn probabilities(&self, counts: &[u64], mu: f64, params: &[f64]) -> Vec<f64> {
        biased_copying(counts, mu, 1. + params[0])
    }
}

/// Unbiased copying plus innovation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Neutral;

impl TransmissionModel for Neutral {
    fn name(&self) -> &str {
        "neutral"
    }

    fn parameters(&self) -> Vec<String> {
        vec![]
    }

    fn probabilities(&self, counts: &[u64], mu: f64, _params: &[f64]) -> Vec<f64> {
        biased_copying(counts, mu, 1.)
    }
}

fn biased_copying(counts: &[u64], mu: f64, exponent: f64) -> Vec<f64> {
    let mut p = vec![0.0; counts.len() + 1];
    let total: u64 = counts.iter().sum();
    if total == 0 {
        // Nobody left to copy from.
        p[counts.len()] = 1.;
        return p;
    }
    // In log space, so that strong biases neither overflow nor underflow.
    let log_weights: Vec<Option<f64>> = counts
        .iter()
        .map(|&c| {
            if c == 0 {
                None
            } else {
                Some(exponent * (c as f64 / total as f64).ln())
            }
        })
        .collect();
    let max = log_weights
        .iter()
        .filter_map(|w| *w)
        .fold(f64::NEG_INFINITY, f64::max);
    let mut z = 0.;
    for (pi, w) in p.iter_mut().zip(log_weights.iter()) {
        if let Some(w) = w {
            *pi = (w - max).exp();
            z += *pi;
        }
    }
    for pi in p.iter_mut().take(counts.len()) {
        *pi *= (1. - mu) / z;
    }
    p[counts.len()] = mu;
    p
}

type ProbabilityFn = dyn Fn(&[u64], f64, &[f64]) -> Vec<f64> + Send + Sync;

/// A transmission model backed by a closure.
pub struct CustomModel {
    name: String,
    parameters: Vec<String>,
    check: Option<Vec<f64>>,
    f: Box<ProbabilityFn>,
}

impl CustomModel {
    /// Use these parameter values, instead of zeros, for the registration
    /// check.
    pub fn with_check_parameters(mut self, params: Vec<f64>) -> Self {
        self.check = Some(params);
        self
    }
}

impl std::fmt::Debug for CustomModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomModel")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .finish()
    }
}

pub fn custom<F>(name: &str, parameters: &[&str], f: F) -> CustomModel
where
    F: Fn(&[u64], f64, &[f64]) -> Vec<f64> + Send + Sync + 'static,
{
    CustomModel {
        name: name.to_string(),
        parameters: parameters.iter().map(|p| p.to_string()).collect(),
        check: None,
        f: Box::new(f),
    }
}

impl TransmissionModel for CustomModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn parameters(&self) -> Vec<String> {
        self.parameters.clone()
    }

    fn probabilities(&self, counts: &[u64], mu: f64, params: &[f64]) -> Vec<f64> {
        (self.f)(counts, mu, params)
    }

    fn check_parameters(&self) -> Vec<f64> {
        match &self.check {
            Some(p) => p.clone(),
            None => vec![0.0; self.parameters.len()],
        }
    }
}

/// Whether `p` is a probability vector with `slots` entries.
pub fn is_probability_vector(p: &[f64], slots: usize) -> bool {
    p.len() == slots
        && p.iter().all(|x| x.is_finite() && *x >= 0.)
        && (p.iter().sum::<f64>() - 1.).abs() <= PROBABILITY_TOLERANCE
}

/// Call the model once on a small composition and check its answer.
pub fn validate(model: &dyn TransmissionModel) -> Result<(), ConfigurationError> {
    let params = model.check_parameters();
    validate_with(model, &params)
}

pub fn validate_with(
    model: &dyn TransmissionModel,
    params: &[f64],
) -> Result<(), ConfigurationError> {
    let expected = model.parameters().len();
    if params.len() != expected {
        return Err(ConfigurationError::Arity {
            model: model.name().to_string(),
            expected,
            found: params.len(),
        });
    }
    let counts = [5, 3, 1, 0];
    let p = model.probabilities(&counts, 0.05, params);
    if p.len() != counts.len() + 1 {
        return Err(ConfigurationError::ProbabilityLength {
            model: model.name().to_string(),
            expected: counts.len() + 1,
            found: p.len(),
        });
    }
    if p.iter().any(|x| !x.is_finite() || *x < 0.) {
        return Err(ConfigurationError::NegativeProbability {
            model: model.name().to_string(),
        });
    }
    let sum: f64 = p.iter().sum();
    if (sum - 1.).abs() > PROBABILITY_TOLERANCE {
        return Err(ConfigurationError::ProbabilitySum {
            model: model.name().to_string(),
            sum,
        });
    }
    Ok(())
}
