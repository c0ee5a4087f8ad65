use std::path::PathBuf;

use anyhow::{Context, Result};
use cellfield_app::{SeedSettings, load_config, run_steps, seed_population};
use cellfield_core::{Compartment, GridMethodRegistry, SimulationContext};
use clap::Parser;
use rand::{SeedableRng, rngs::SmallRng};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "cellfield",
    version,
    about = "Run an individual-based diffusion-reaction compartment"
)]
struct Cli {
    /// JSON configuration file; defaults are used when omitted.
    #[arg(short, long, env = "CELLFIELD_CONFIG")]
    config: Option<PathBuf>,

    /// Dot-delimited override applied after loading (e.g. parallel.threads=4).
    #[arg(long = "set", value_name = "PATH=VALUE")]
    overrides: Vec<String>,

    /// Number of macro steps to run.
    #[arg(long, default_value_t = 10)]
    steps: usize,

    /// Agents to seed.
    #[arg(long, default_value_t = 32)]
    agents: usize,

    /// Log a summary every N steps (0 disables).
    #[arg(long, default_value_t = 1)]
    log_every: usize,

    /// Write all step summaries to this JSON file.
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Print the effective configuration and exit.
    #[arg(long)]
    print_config: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        error!(error = %format!("{err:#}"), "cellfield run aborted");
        return Err(err);
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref(), &cli.overrides).context("loading configuration")?;
    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let registry = GridMethodRegistry::with_builtin();
    let mut compartment = Compartment::from_config(&config, &registry).context("building compartment")?;
    let mut rng = SmallRng::seed_from_u64(config.rng_seed.unwrap_or(0xCE11_F1E1_D000_0001_u64));
    let settings = SeedSettings {
        agents: cli.agents,
        ..SeedSettings::default()
    };
    seed_population(&mut compartment, &config, &settings, &mut rng)?;

    let mut ctx = SimulationContext::from_config(&config).context("building simulation context")?;
    info!(steps = cli.steps, time_step = config.time_step, "starting cellfield run");
    let report = run_steps(&mut compartment, &mut ctx, cli.steps, cli.log_every)?;
    if let Some(path) = &cli.summary {
        report.write_json(path)?;
        info!(path = %path.display(), "wrote step summaries");
    }
    if let Some(last) = report.last() {
        info!(
            iteration = last.iteration,
            time = last.time,
            agents = last.agent_count,
            "run finished"
        );
    }
    Ok(())
}
