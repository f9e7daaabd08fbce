//! # codiv-cli
//!
//! Sample shared divergence times for a set of comparisons.
//!
//! ```bash
//! codiv-cli --ignore-data --seed 1234 --nthreads 4 config.toml
//! ```
//!
//! Chain `i` writes its samples to `<prefix>state-run-<i>.log`.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use clap::Parser;
use codiv::config::{Config, RunSettings};
use codiv::io::read_last_state;
use codiv::mcmc::chain::ChainSet;
use codiv::models::{Collection, IgnoreData};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod error;

use error::{CliError, Result};

#[derive(Parser, Debug)]
#[command(name = "codiv-cli")]
#[command(about = "Bayesian estimation of shared divergence times")]
#[command(version)]
struct Args {
    /// TOML configuration file
    config: PathBuf,

    /// Seed of the first chain; chain i uses seed + i
    #[arg(long)]
    seed: Option<u64>,

    /// Sample from the prior by ignoring the character data
    #[arg(long)]
    ignore_data: bool,

    /// Number of independent chains, each on its own thread
    #[arg(long, default_value = "1")]
    nthreads: usize,

    /// Prefix of the state log files
    #[arg(long, default_value = "")]
    prefix: String,

    /// Continue from the last state of this state log
    #[arg(long)]
    resume: Option<PathBuf>,
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(Args::parse()) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load_config(path: &Path) -> Result<RunSettings> {
    let display = path.display().to_string();
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: display.clone(),
        source,
    })?;
    let config: Config = toml::from_str(&text).map_err(|source| CliError::Toml {
        path: display,
        source,
    })?;
    Ok(config.into_settings()?)
}

fn log_path(prefix: &str, chain: usize) -> PathBuf {
    PathBuf::from(format!("{prefix}state-run-{}.log", chain + 1))
}

fn run(args: Args) -> Result<()> {
    let start = Instant::now();

    if args.nthreads == 0 {
        return Err(CliError::Usage(String::from("--nthreads must be at least 1")));
    }
    if !args.ignore_data {
        return Err(CliError::Usage(String::from(
            "no likelihood evaluator for character data is built in; run with --ignore-data to sample the prior",
        )));
    }

    let settings = load_config(&args.config)?;
    tracing::info!(
        "{} comparisons, {} event model, {} generations",
        settings.model.n_comparisons(),
        settings.model.event_model.process.name(),
        settings.mcmc.chain_length
    );

    let resume = match &args.resume {
        Some(path) => {
            let file = File::open(path).map_err(|source| CliError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let (generation, state) = read_last_state(BufReader::new(file), &settings.model)?;
            tracing::info!("resuming from generation {generation} of {}", path.display());
            Some((generation, state))
        }
        None => None,
    };

    rayon::ThreadPoolBuilder::new()
        .num_threads(args.nthreads)
        .build_global()
        .ok();

    let seed = args.seed.unwrap_or_else(rand::random);
    let collection = Collection::new(settings.model, IgnoreData);
    let chains = ChainSet {
        collection: &collection,
        schedule: &settings.schedule,
        mcmc: settings.mcmc,
        seed,
        resume,
    };

    let stop = AtomicBool::new(false);
    let summaries = chains.run(
        args.nthreads,
        |i| {
            let path = log_path(&args.prefix, i);
            tracing::info!("chain {} writes to {}", i + 1, path.display());
            Ok(BufWriter::new(File::create_new(&path)?))
        },
        &stop,
    )?;

    for (i, summary) in summaries.iter().enumerate() {
        tracing::info!(
            "chain {}: {} samples up to generation {}",
            i + 1,
            summary.n_samples,
            summary.generation
        );
    }
    tracing::info!("completed in {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
event_time_prior = { gamma_distribution = { shape = 5.0, scale = 0.1 } }
event_model_prior = { dirichlet_process = { concentration = { value = 1.0 } } }

[mcmc_settings]
chain_length = 200
sample_frequency = 20

[operator_settings]
auto_optimize_delay = 50

[operator_settings.operators.EventTimeScaler]
weight = 2.0
scale = 0.5

[[comparisons]]
label = "a"
populations = ["a1", "a2"]
population_sizes = { leaf = { prior = { gamma_distribution = { shape = 4.0, scale = 0.25 } } } }

[[comparisons]]
label = "b"
populations = ["b1", "b2"]
population_sizes = { leaf = { value = 1.0 } }
freq_1 = { prior = { beta_distribution = { alpha = 2.0, beta = 2.0 } } }
"#;

    fn write_config(dir: &Path, text: &str) -> PathBuf {
        let path = dir.join("config.toml");
        std::fs::write(&path, text).expect("writable");
        path
    }

    #[test]
    fn toml_configuration_loads() {
        let dir = tempfile::tempdir().expect("temp dir");
        let settings = load_config(&write_config(dir.path(), CONFIG)).expect("valid");
        assert_eq!(settings.model.n_comparisons(), 2);
        assert_eq!(settings.mcmc.n_samples(), 11);
        assert_eq!(settings.schedule.auto_optimize_delay, 50);
    }

    #[test]
    fn malformed_toml_is_reported() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_config(dir.path(), "comparisons = 3");
        assert!(matches!(load_config(&path), Err(CliError::Toml { .. })));
        assert!(matches!(
            load_config(&dir.path().join("missing.toml")),
            Err(CliError::Io { .. })
        ));
    }

    #[test]
    fn runs_write_one_log_per_chain_and_resume() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = write_config(dir.path(), CONFIG);
        let prefix = format!("{}/", dir.path().display());
        let args = |resume: Option<PathBuf>, prefix: &str| Args {
            config: config.clone(),
            seed: Some(3),
            ignore_data: true,
            nthreads: 2,
            prefix: prefix.to_string(),
            resume,
        };

        run(args(None, &prefix)).expect("runs");
        for chain in 0..2 {
            let log = std::fs::read_to_string(log_path(&prefix, chain)).expect("log");
            assert_eq!(log.lines().count(), 12);
        }
        // existing logs are never overwritten
        assert!(run(args(None, &prefix)).is_err());

        let resumed = format!("{prefix}resumed-");
        run(args(Some(log_path(&prefix, 0)), &resumed)).expect("resumes");
        let log = std::fs::read_to_string(log_path(&resumed, 0)).expect("log");
        let last = log.lines().last().expect("rows");
        assert!(last.starts_with("400\t"));
    }

    #[test]
    fn data_cannot_be_analysed_without_an_evaluator() {
        let dir = tempfile::tempdir().expect("temp dir");
        let args = Args {
            config: write_config(dir.path(), CONFIG),
            seed: None,
            ignore_data: false,
            nthreads: 1,
            prefix: String::new(),
            resume: None,
        };
        assert!(matches!(run(args), Err(CliError::Usage(_))));
    }
}
