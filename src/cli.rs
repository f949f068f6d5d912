use crate::abc::Tolerance;
use crate::dataset::FrequencyDataset;
use crate::error::InputError;
use crate::parameters::{ModelChoice, RunConfig};
use crate::simulation::Recording;
use argparse::action::Action::Single;
use argparse::action::ParseResult;
use argparse::action::ParseResult::{Error, Parsed};
use argparse::action::TypedAction;
use argparse::action::{Action, IArgAction};
use log::{info, warn};
use std::cell::RefCell;
use std::rc::Rc;
use std::str::FromStr;

/// Parses `name=value` and appends it, so the option can be given repeatedly.
pub struct CollectFixedAction<'a> {
    pub cell: Rc<RefCell<&'a mut Vec<(String, f64)>>>,
}

impl<'a> IArgAction for CollectFixedAction<'a> {
    fn parse_arg(&self, arg: &str) -> ParseResult {
        match parse_fixed(arg) {
            Some(binding) => {
                self.cell.borrow_mut().push(binding);
                Parsed
            }
            None => Error(format!("Bad value {}, expected name=value", arg)),
        }
    }
}

struct CollectFixed;

impl TypedAction<Vec<(String, f64)>> for CollectFixed {
    fn bind<'x>(&self, cell: Rc<RefCell<&'x mut Vec<(String, f64)>>>) -> Action<'x> {
        Single(Box::new(CollectFixedAction { cell }))
    }
}

pub fn parse_fixed(arg: &str) -> Option<(String, f64)> {
    let mut parts = arg.splitn(2, '=');
    let name = parts.next()?.trim();
    let value = f64::from_str(parts.next()?.trim()).ok()?;
    if name.is_empty() {
        None
    } else {
        Some((name.to_string(), value))
    }
}

/// Command-line settings. Everything optional here overrides the
/// configuration file, which in turn overrides the defaults.
#[derive(Debug, Clone)]
pub struct Options {
    pub data: String,
    pub config: Option<String>,
    pub output: String,
    pub model: Option<ModelChoice>,
    pub nsim: Option<usize>,
    pub tolerance: Option<f64>,
    pub max_distance: Option<f64>,
    pub workers: Option<usize>,
    pub seed: Option<u64>,
    pub sampling_fraction_mean: Option<f64>,
    pub sampling_fraction_variance: Option<f64>,
    pub replacement_rate_mean: Option<f64>,
    pub replacement_rate_variance: Option<f64>,
    pub alpha: Option<f64>,
    pub recording: Option<Recording>,
    pub max_variants: Option<usize>,
    pub fixed: Vec<(String, f64)>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            data: "data.json".to_string(),
            config: None,
            output: "abc.json".to_string(),
            model: None,
            nsim: None,
            tolerance: None,
            max_distance: None,
            workers: None,
            seed: None,
            sampling_fraction_mean: None,
            sampling_fraction_variance: None,
            replacement_rate_mean: None,
            replacement_rate_variance: None,
            alpha: None,
            recording: None,
            max_variants: None,
            fixed: vec![],
        }
    }
}

pub fn parse_args<'a>(o: &'a mut Options) -> argparse::ArgumentParser<'a> {
    let mut parser = argparse::ArgumentParser::new();
    parser.set_description("Fit a cultural transmission model to variant frequencies by ABC");
    parser.refer(&mut o.data).add_option(
        &["--data"],
        argparse::Store,
        "JSON file with counts, timestamps and durations",
    );
    parser.refer(&mut o.config).add_option(
        &["--config"],
        argparse::StoreOption,
        "JSON run configuration (model, priors, fixed parameters, ABC settings)",
    );
    parser.refer(&mut o.output).add_option(
        &["--output"],
        argparse::Store,
        "File to write results to; bincode if it ends in .bin, JSON otherwise",
    );
    parser.refer(&mut o.model).add_option(
        &["--model"],
        argparse::StoreOption,
        "transmission model: frequency-bias or neutral",
    );
    parser.refer(&mut o.nsim).add_option(
        &["--nsim"],
        argparse::StoreOption,
        "number of simulations",
    );
    parser.refer(&mut o.tolerance).add_option(
        &["--tolerance"],
        argparse::StoreOption,
        "proportion of simulations to accept",
    );
    parser.refer(&mut o.max_distance).add_option(
        &["--max-distance"],
        argparse::StoreOption,
        "accept all simulations within this distance instead of a proportion",
    );
    parser.refer(&mut o.workers).add_option(
        &["--workers"],
        argparse::StoreOption,
        "worker threads (0: one per core)",
    );
    parser.refer(&mut o.seed).add_option(
        &["--seed"],
        argparse::StoreOption,
        "random seed",
    );
    parser.refer(&mut o.sampling_fraction_mean).add_option(
        &["--sampling-fraction"],
        argparse::StoreOption,
        "mean of the sampling fraction",
    );
    parser.refer(&mut o.sampling_fraction_variance).add_option(
        &["--sampling-fraction-variance"],
        argparse::StoreOption,
        "variance of the sampling fraction (0: fixed)",
    );
    parser.refer(&mut o.replacement_rate_mean).add_option(
        &["--replacement-rate"],
        argparse::StoreOption,
        "mean of the replacement rate",
    );
    parser.refer(&mut o.replacement_rate_variance).add_option(
        &["--replacement-rate-variance"],
        argparse::StoreOption,
        "variance of the replacement rate (0: fixed)",
    );
    parser.refer(&mut o.alpha).add_option(
        &["--alpha"],
        argparse::StoreOption,
        "Dirichlet concentration for the initial composition",
    );
    parser.refer(&mut o.recording).add_option(
        &["--recording"],
        argparse::StoreOption,
        "snapshot or time-averaged",
    );
    parser.refer(&mut o.max_variants).add_option(
        &["--max-variants"],
        argparse::StoreOption,
        "abort simulations with more live variants than this",
    );
    parser.refer(&mut o.fixed).add_option(
        &["--fix"],
        CollectFixed,
        "hold a parameter at a value, as name=value; may be repeated",
    );
    parser
}

impl Options {
    /// Override `config` with everything given on the command line.
    pub fn apply(&self, config: &mut RunConfig) {
        if let Some(model) = self.model {
            config.model = model;
            let own = crate::transmission_model(model).parameters();
            config.priors.retain(|prior| {
                let keep = ["mu", "s", "r", "alpha"].contains(&prior.name.as_str())
                    || own.contains(&prior.name);
                if !keep {
                    warn!("Dropping prior for {}, unknown to the chosen model", prior.name);
                }
                keep
            });
        }
        if let Some(nsim) = self.nsim {
            config.abc.nsim = nsim;
        }
        if let Some(p) = self.tolerance {
            config.abc.tolerance = Tolerance::Proportion(p);
        }
        if let Some(d) = self.max_distance {
            config.abc.tolerance = Tolerance::Distance(d);
        }
        if let Some(workers) = self.workers {
            config.abc.workers = workers;
        }
        if let Some(seed) = self.seed {
            config.abc.seed = seed;
        }
        let p = &mut config.parameters;
        if let Some(mean) = self.sampling_fraction_mean {
            p.sampling_fraction.mean = mean;
        }
        if let Some(variance) = self.sampling_fraction_variance {
            p.sampling_fraction.variance = variance;
        }
        if let Some(mean) = self.replacement_rate_mean {
            p.replacement_rate.mean = mean;
        }
        if let Some(variance) = self.replacement_rate_variance {
            p.replacement_rate.variance = variance;
        }
        if let Some(alpha) = self.alpha {
            p.dirichlet_alpha = alpha;
        }
        if let Some(recording) = self.recording {
            p.recording = recording;
        }
        if self.max_variants.is_some() {
            p.max_variants = self.max_variants;
        }
        for (name, value) in &self.fixed {
            config.priors.retain(|prior| &prior.name != name);
            config.fixed.retain(|(n, _)| n != name);
            config.fixed.push((name.clone(), *value));
        }
    }

    /// Load the dataset and the configuration, with overrides applied.
    pub fn configure(&self) -> Result<(FrequencyDataset, RunConfig), InputError> {
        let dataset = FrequencyDataset::load(&self.data)?;
        info!(
            "Loaded {} phases with {} variants, {} of them in the first phase",
            dataset.phases(),
            dataset.labels().len(),
            dataset.variants_in_first_phase()
        );
        let mut config = match &self.config {
            Some(path) => RunConfig::load(path)?,
            None => RunConfig::default(),
        };
        self.apply(&mut config);
        info!(
            "Model {:?} with free parameters {:?} and fixed {:?}",
            config.model,
            config.free_parameters(),
            config.fixed
        );
        Ok((dataset, config))
    }
}
