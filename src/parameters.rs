use crate::abc::{AbcSettings, Prior, PriorFamily};
use crate::error::InputError;
use crate::rates::RateDistribution;
use crate::simulation::Recording;
use serde_derive::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Settings of the generative model that are not inferred.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Parameters {
    pub sampling_fraction: RateDistribution,
    pub replacement_rate: RateDistribution,
    pub dirichlet_alpha: f64,
    pub recording: Recording,
    /// Abort a simulation once more variant slots than this are alive.
    pub max_variants: Option<usize>,
}

impl Default for Parameters {
    fn default() -> Parameters {
        Parameters {
            sampling_fraction: RateDistribution::fixed(0.2),
            replacement_rate: RateDistribution::fixed(0.2),
            dirichlet_alpha: 1.0,
            recording: Recording::Snapshot,
            max_variants: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ModelChoice {
    FrequencyBias,
    Neutral,
}

impl std::str::FromStr for ModelChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "frequency-bias" => Ok(ModelChoice::FrequencyBias),
            "neutral" => Ok(ModelChoice::Neutral),
            _ => Err(format!("Unknown transmission model {}", s)),
        }
    }
}

/// Everything the command-line tools need besides the data.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RunConfig {
    pub model: ModelChoice,
    /// Parameters drawn from the priors, in theta order.
    pub priors: Vec<Prior>,
    pub fixed: Vec<(String, f64)>,
    pub abc: AbcSettings,
    pub parameters: Parameters,
}

impl Default for RunConfig {
    fn default() -> RunConfig {
        RunConfig {
            model: ModelChoice::FrequencyBias,
            priors: vec![
                Prior {
                    name: "mu".to_string(),
                    family: PriorFamily::Uniform,
                    lower: 0.0,
                    upper: 0.1,
                },
                Prior {
                    name: "b".to_string(),
                    family: PriorFamily::Uniform,
                    lower: -0.1,
                    upper: 0.1,
                },
            ],
            fixed: vec![],
            abc: AbcSettings::default(),
            parameters: Parameters::default(),
        }
    }
}

impl RunConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<RunConfig, InputError> {
        let file = File::open(path.as_ref())?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn free_parameters(&self) -> Vec<&str> {
        self.priors.iter().map(|p| p.name.as_str()).collect()
    }
}
