use ::argparse;
use log::info;
use model::abc::AbcOutput;
use model::cli;
use model::predictive::{posterior_predictive, PredictiveSettings};
use std::sync::Arc;

fn main() -> Result<(), String> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut options = cli::Options::default();
    options.output = "predictive.json".to_string();
    let mut results = "abc.json".to_string();
    let mut draws: Option<usize> = None;
    {
        let mut parser = cli::parse_args(&mut options);
        parser.set_description("Check an ABC posterior by simulating from it");
        parser.refer(&mut results).add_option(
            &["--results"],
            argparse::Store,
            "File with the accepted draws of an ABC run",
        );
        parser.refer(&mut draws).add_option(
            &["--draws"],
            argparse::StoreOption,
            "number of simulations, from rows drawn with replacement (default: one per row)",
        );
        parser.parse_args_or_exit();
    }
    let (dataset, config) = options.configure().map_err(|e| e.to_string())?;

    let posterior = AbcOutput::load(&results).map_err(|e| e.to_string())?;
    let free = config.free_parameters();
    if posterior.names != free {
        return Err(format!(
            "{} holds draws of {:?}, but the configuration frees {:?}",
            results, posterior.names, free
        ));
    }

    let dataset = Arc::new(dataset);
    let simulator = model::build_simulator(dataset.clone(), &config).map_err(|e| e.to_string())?;
    let settings = PredictiveSettings {
        draws,
        workers: config.abc.workers,
        seed: config.abc.seed,
        max_failure_fraction: config.abc.max_failure_fraction,
    };
    let check = posterior_predictive(&dataset, &simulator, &posterior.parameters, &settings)
        .map_err(|e| e.to_string())?;
    check.store(&options.output).map_err(|e| e.to_string())?;

    for cell in check.summary() {
        info!(
            "{} at {}: observed {:.3}, simulated median {:.3} [{:.3}, {:.3}]",
            cell.label, cell.timestamp, cell.observed, cell.median, cell.lower, cell.upper
        );
    }
    Ok(())
}
