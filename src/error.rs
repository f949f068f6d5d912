/*!
Errors

Three kinds of failure are distinguished. Malformed data is rejected when the
dataset is constructed, a misconfigured model is rejected when the simulator
is built, and everything that can only go wrong inside one stochastic run is
a `DomainError` of that single run. The ABC runner adds its own error for
failures of the whole batch.
 */
use crate::Steps;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("the dataset needs at least two phases, found {0}")]
    TooFewPhases(usize),
    #[error("phase {phase} has {found} variants, expected {expected}")]
    RaggedCounts {
        phase: usize,
        expected: usize,
        found: usize,
    },
    #[error("negative count {count} for variant {variant} in phase {phase}")]
    NegativeCount {
        phase: usize,
        variant: usize,
        count: i64,
    },
    #[error("phase {phase} has an empty sample")]
    EmptyPhase { phase: usize },
    #[error("expected {expected} timestamps (one per phase), found {found}")]
    TimestampCount { expected: usize, found: usize },
    #[error("timestamps must start at step 1 or later, found {0}")]
    TimestampBeforeStart(i64),
    #[error("timestamps must be strictly increasing, but phase {phase} ends at {timestamp} after {previous}")]
    NonIncreasingTimestamps {
        phase: usize,
        previous: i64,
        timestamp: i64,
    },
    #[error("expected {expected} durations (one per phase after the first), found {found}")]
    DurationCount { expected: usize, found: usize },
    #[error("duration {duration} of phase {phase} must be at least 1 and at most the gap {gap} to the previous phase")]
    DurationOutOfRange {
        phase: usize,
        duration: i64,
        gap: i64,
    },
    #[error("expected {expected} variant labels, found {found}")]
    LabelCount { expected: usize, found: usize },
}

/// Failure to read a dataset or a run configuration from disk.
#[derive(Debug, Error)]
pub enum InputError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("invalid dataset: {0}")]
    Validation(#[from] ValidationError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomainError {
    #[error("theta has {found} values, but the simulator expects {expected}")]
    ThetaLength { expected: usize, found: usize },
    #[error("parameter {name} = {value} is not usable: {reason}")]
    InvalidParameter {
        name: String,
        value: f64,
        reason: &'static str,
    },
    #[error("could not draw {name} from a normal({mean}, {variance}) truncated to (0, 1)")]
    DegenerateDraw {
        name: &'static str,
        mean: f64,
        variance: f64,
    },
    #[error("the population estimate for phase {phase} is not a positive finite number ({estimate})")]
    DegeneratePopulation { phase: usize, estimate: f64 },
    #[error("at step {t}, {remove} individuals should be removed but only {live} are alive")]
    TurnoverExceedsPopulation { t: Steps, remove: u64, live: u64 },
    #[error("at step {t}, the transmission model returned an invalid probability vector")]
    InvalidProbabilities { t: Steps },
    #[error("at step {t}, {live} variants are alive, more than the limit of {limit}")]
    TooManyVariants { t: Steps, live: usize, limit: usize },
    #[error("sampling failed: {0}")]
    Sampling(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("the transmission model {model} expects {expected} parameters, got {found}")]
    Arity {
        model: String,
        expected: usize,
        found: usize,
    },
    #[error("the transmission model {model} returned {found} probabilities for {expected} slots")]
    ProbabilityLength {
        model: String,
        expected: usize,
        found: usize,
    },
    #[error("the transmission model {model} returned a negative or non-finite probability")]
    NegativeProbability { model: String },
    #[error("the probabilities of transmission model {model} sum to {sum}, not 1")]
    ProbabilitySum { model: String, sum: f64 },
    #[error("unknown parameter {0}")]
    UnknownParameter(String),
    #[error("parameter {0} is listed more than once")]
    DuplicateParameter(String),
    #[error("parameter {0} is neither free nor fixed")]
    UnboundParameter(String),
    #[error("invalid setting {name} = {value}: {reason}")]
    InvalidSetting {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum AbcError {
    #[error("prior for {name} is invalid: {reason}")]
    InvalidPrior { name: String, reason: String },
    #[error("the simulator expects {expected} parameters but {found} priors were given")]
    PriorCount { expected: usize, found: usize },
    #[error("the target has {found} statistics but simulations return {expected}")]
    TargetLength { expected: usize, found: usize },
    #[error("invalid ABC setting: {0}")]
    InvalidSettings(String),
    #[error("{failures} of {total} simulations failed, more than the tolerated fraction {limit}; first failure: {first}")]
    SystemicFailure {
        failures: usize,
        total: usize,
        limit: f64,
        first: DomainError,
    },
    #[error("all {0} simulations failed")]
    NoSuccessfulSimulation(usize),
    #[error("could not build the worker pool: {0}")]
    ThreadPool(String),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Bincode(#[from] bincode::Error),
}
