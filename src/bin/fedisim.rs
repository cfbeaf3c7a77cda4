//! Fedisim CLI
//!
//! Runs the migration simulation end to end.
//!
//! # Usage
//!
//! ```bash
//! # Offline run with canned oracle replies
//! fedisim --profiles user_profiles.json --dry-run --rounds 5
//!
//! # Against a real endpoint, resuming automatically
//! FEDISIM_API_KEY=sk-... fedisim --config fedisim.toml --resume yes
//! ```

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};

use fedisim::agent::load_profiles;
use fedisim::{Config, DryRunOracle, Oracle, OracleClient, Simulation, VERSION};

#[derive(Parser, Debug)]
#[command(name = "fedisim")]
#[command(author, version = VERSION, about = "Opinion dynamics and server migration among LLM-driven agents", long_about = None)]
struct Args {
    /// TOML configuration file (environment variables apply on top)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// JSON array of user profiles
    #[arg(long, short)]
    profiles: Option<PathBuf>,

    /// Directory for checkpoints and reports
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Number of rounds to simulate
    #[arg(long, short)]
    rounds: Option<u32>,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Continue from the latest checkpoint
    #[arg(long, value_enum, default_value = "ask")]
    resume: ResumeMode,

    /// Canned oracle replies, no network access
    #[arg(long)]
    dry_run: bool,

    /// Debug logging
    #[arg(long, short)]
    verbose: bool,

    /// Pause between rounds in milliseconds
    #[arg(long)]
    round_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
enum ResumeMode {
    /// Prompt on stdin when a checkpoint exists
    #[default]
    Ask,
    /// Always continue from the latest checkpoint
    Yes,
    /// Always start from round 1
    No,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let config = build_config(&args)?;
    let profiles = load_profiles(&config.simulation.profiles_file)
        .with_context(|| format!("loading profiles from {}", config.simulation.profiles_file.display()))?;
    tracing::info!("Loaded {} profiles", profiles.len());

    let oracle: Arc<dyn Oracle> = if args.dry_run {
        tracing::info!("Dry run: oracle replies are canned");
        Arc::new(DryRunOracle::new(config.simulation.seed.unwrap_or(0)))
    } else {
        if config.oracle.api_key.is_none() {
            bail!("no API key configured; set FEDISIM_API_KEY or pass --dry-run");
        }
        let client = OracleClient::from_config(&config)?;
        match config.simulation.seed {
            Some(seed) => Arc::new(client.with_seed(seed)),
            None => Arc::new(client),
        }
    };

    let mut sim = Simulation::new(config, profiles, oracle)?;
    if let Some(round) = sim.latest_checkpoint() {
        if should_resume(args.resume, round)? && !sim.resume_from(round) {
            tracing::warn!("Resume failed, starting over");
        }
    }

    let summaries = sim.run().await?;
    let migrations: usize = summaries.iter().map(|s| s.migrations).sum();
    tracing::info!(
        "Ran {} rounds with {} migrations, {} oracle calls",
        summaries.len(),
        migrations,
        sim.oracle().usage().calls
    );
    Ok(())
}

/// File or environment config with CLI flags on top.
fn build_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env(),
    };

    if let Some(profiles) = &args.profiles {
        config.simulation.profiles_file = profiles.clone();
    }
    if let Some(output) = &args.output {
        config.simulation.output_dir = output.clone();
    }
    if let Some(rounds) = args.rounds {
        config.simulation.total_rounds = rounds;
    }
    if let Some(seed) = args.seed {
        config.simulation.seed = Some(seed);
    }
    if let Some(delay) = args.round_delay_ms {
        config.simulation.round_delay_ms = delay;
    }

    config.validate()?;
    Ok(config)
}

fn should_resume(mode: ResumeMode, round: u32) -> anyhow::Result<bool> {
    match mode {
        ResumeMode::Yes => Ok(true),
        ResumeMode::No => Ok(false),
        ResumeMode::Ask => {
            print!("Continue from saved round {}? (y/n) ", round);
            io::stdout().flush()?;
            let mut answer = String::new();
            io::stdin().lock().read_line(&mut answer)?;
            Ok(answer.trim().eq_ignore_ascii_case("y"))
        }
    }
}
