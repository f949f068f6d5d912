use log::info;
use model::cli;
use std::sync::Arc;

fn main() -> Result<(), String> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut options = cli::Options::default();
    {
        let parser = cli::parse_args(&mut options);
        parser.parse_args_or_exit();
    }
    let (dataset, config) = options.configure().map_err(|e| e.to_string())?;

    let output = model::infer(Arc::new(dataset), &config).map_err(|e| e.to_string())?;
    output.store(&options.output).map_err(|e| e.to_string())?;
    info!("Stored {} accepted draws in {}", output.accepted(), options.output);

    for s in output.summary() {
        info!(
            "{}: mean {:.4}, median {:.4}, 95% interval [{:.4}, {:.4}]",
            s.name, s.mean, s.median, s.lower, s.upper
        );
    }
    Ok(())
}
