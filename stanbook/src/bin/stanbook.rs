//! stanbook CLI - worked Bayesian examples fitted with CmdStan.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use stanbook::report;
use stanbook::scenario::{self, Example, Scenario};
use stanbook::{CmdStanEngine, Config};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "stanbook")]
#[command(version)]
#[command(about = "Worked hierarchical Bayesian examples fitted with CmdStan")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the worked examples and the models each one fits
    List,

    /// Print the Stan program(s) used by an example
    ShowModel {
        /// Example name
        scenario: String,
    },

    /// Simulate an example's data and emit its CmdStan JSON payload
    Generate {
        /// Example name
        scenario: String,

        /// Data generator seed (overrides config)
        #[arg(long)]
        data_seed: Option<u64>,

        /// Write the payload here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate data, sample with CmdStan and report
    Run(RunArgs),

    /// Show example configuration
    ExampleConfig,
}

#[derive(Args)]
struct RunArgs {
    /// Example name, or `all`
    scenario: String,

    /// Iterations per chain, warm-up included
    #[arg(long)]
    iter: Option<usize>,

    /// Number of chains
    #[arg(long)]
    chains: Option<usize>,

    /// Chains run concurrently
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Data generator seed (overrides config)
    #[arg(long)]
    data_seed: Option<u64>,

    /// CmdStan sampler seed; chain k uses seed + k
    #[arg(long)]
    sampler_seed: Option<u32>,

    /// Directory for draws CSV, line CSV and summary JSON
    #[arg(short, long, default_value = "stanbook-output")]
    output_dir: PathBuf,
}

impl RunArgs {
    /// Command-line values win over the config file.
    fn apply(&self, config: &mut Config) {
        if let Some(iter) = self.iter {
            config.run.iter = iter;
        }
        if let Some(chains) = self.chains {
            config.run.chains = chains;
        }
        if let Some(jobs) = self.jobs {
            config.run.n_jobs = jobs;
        }
        if let Some(seed) = self.data_seed {
            config.data_seed = seed;
        }
        if self.sampler_seed.is_some() {
            config.run.seed = self.sampler_seed;
        }
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::List => list(),
        Commands::ShowModel { scenario } => show_model(&scenario),
        Commands::Generate {
            scenario,
            data_seed,
            output,
        } => generate(&config, &scenario, data_seed, output.as_deref()),
        Commands::Run(args) => {
            let mut config = config;
            args.apply(&mut config);
            config.validate().context("Invalid run settings")?;
            run(&config, &args.scenario, &args.output_dir)
        }
        Commands::ExampleConfig => {
            println!("{}", Config::example_toml());
            Ok(())
        }
    }
}

fn list() -> Result<()> {
    for scenario in Scenario::all() {
        let models: Vec<&str> = scenario.models().iter().map(|m| m.name()).collect();
        println!("{:<26} {}", scenario.name(), models.join(", "));
    }
    Ok(())
}

fn show_model(name: &str) -> Result<()> {
    let scenario = scenario::scenario_by_name(name)?;
    for model in scenario.models() {
        println!("// {}.stan", model.name());
        println!("{}", model.code());
    }
    Ok(())
}

fn generate(config: &Config, name: &str, seed: Option<u64>, output: Option<&Path>) -> Result<()> {
    let scenario = scenario::scenario_by_name(name)?;
    let seed = seed.unwrap_or(config.data_seed);
    let prepared = scenario
        .prepare(seed)
        .with_context(|| format!("Failed to generate data for {name}"))?;

    match output {
        Some(path) => {
            prepared
                .payload
                .write_json(path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), seed, "wrote payload");
        }
        None => println!("{}", prepared.payload.to_json()?),
    }
    Ok(())
}

fn run(config: &Config, name: &str, output_dir: &Path) -> Result<()> {
    let scenarios = if name == "all" {
        Scenario::all()
    } else {
        vec![scenario::scenario_by_name(name)?]
    };

    let engine = CmdStanEngine::locate(config.engine.cmdstan.as_deref(), &config.engine.work_dir)
        .context("CmdStan is required for `run`")?;
    info!(cmdstan = %engine.cmdstan_path().display(), "using CmdStan");

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let examples: Vec<Example> = scenarios
        .into_iter()
        .map(|s| Example::new(s, config.data_seed, config.run.clone()))
        .collect();

    let mut failed = Vec::new();
    for (name, outcome) in scenario::run_sequentially(&examples, &engine) {
        match outcome {
            Ok(outcome) => {
                println!("{}", report::format_outcome(&outcome));
                report::write_outcome(&outcome, output_dir)
                    .with_context(|| format!("Failed to write results for {name}"))?;
            }
            Err(err) => {
                eprintln!("{name} failed: {err}");
                failed.push(name);
            }
        }
    }

    if !failed.is_empty() {
        bail!("{} example(s) failed: {}", failed.len(), failed.join(", "));
    }
    info!(output_dir = %output_dir.display(), "done");
    Ok(())
}
