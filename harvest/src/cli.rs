use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use harvest_config::{Config, MinimalConfig, OverridableConfig};

use crate::setup;
use crate::simulate::{self, SimulationOptions};

/// Runs and inspects the harvest transaction event engine.
#[derive(Debug, Parser)]
#[command(name = "harvest", version, max_term_width = 79)]
struct Cli {
    /// The path to the config folder.
    #[arg(
        short,
        long,
        global = true,
        env = "HARVEST_CONFIG_PATH",
        default_value = ".harvest"
    )]
    config: PathBuf,

    /// The log level for harvest crates.
    #[arg(long, global = true, env = "HARVEST_LOG_LEVEL")]
    log_level: Option<String>,

    /// Hostname and port of the statsd server.
    #[arg(long, global = true, env = "HARVEST_STATSD_ADDR")]
    statsd: Option<String>,

    /// Global reservoir capacity per application.
    #[arg(long, global = true, value_name = "EVENTS")]
    max_samples_stored: Option<String>,

    /// Interval between harvests in seconds.
    #[arg(long, global = true, value_name = "SECS")]
    report_period: Option<String>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn overrides(&self) -> OverridableConfig {
        OverridableConfig {
            log_level: self.log_level.clone(),
            statsd: self.statsd.clone(),
            max_samples_stored: self.max_samples_stored.clone(),
            report_period: self.report_period.clone(),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage the harvest config.
    ///
    /// This command can be used to initialize a new config folder and to print out the effective
    /// config.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Run a load simulation against the engine.
    ///
    /// Producer threads record transactions for a number of applications. After every cycle all
    /// applications are harvested and every transmitted batch is written to stdout as a JSON line.
    Simulate(SimulateArgs),
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Initialize a new config folder.
    Init,

    /// Show the entire config for debugging purposes.
    ///
    /// This includes the values which are not in the config file but filled in from defaults.
    Show {
        /// The output format.
        #[arg(short, long, value_enum, default_value_t = ShowFormat::Yaml)]
        format: ShowFormat,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ShowFormat {
    Yaml,
    Debug,
}

#[derive(Debug, Args)]
struct SimulateArgs {
    /// Number of simulated applications.
    #[arg(long, default_value_t = 3)]
    apps: usize,

    /// Number of producer threads.
    #[arg(long, default_value_t = 4)]
    producers: usize,

    /// Number of harvest cycles.
    #[arg(long, default_value_t = 5)]
    cycles: usize,

    /// Transactions recorded per cycle across all producers.
    #[arg(long, default_value_t = 10_000)]
    events_per_cycle: usize,

    /// Share of transactions coming from synthetic monitors.
    #[arg(long, default_value_t = 0.05)]
    synthetic_ratio: f64,

    /// Share of transmits that fail transiently.
    #[arg(long, default_value_t = 0.0)]
    fail_rate: f64,

    /// Seed for reproducible runs.
    #[arg(long)]
    seed: Option<u64>,
}

impl From<SimulateArgs> for SimulationOptions {
    fn from(args: SimulateArgs) -> Self {
        Self {
            apps: args.apps,
            producers: args.producers,
            cycles: args.cycles,
            events_per_cycle: args.events_per_cycle,
            synthetic_ratio: args.synthetic_ratio,
            fail_rate: args.fail_rate,
            seed: args.seed,
        }
    }
}

/// Loads the config from the config folder and applies command line overrides.
///
/// Falls back to the default config if the folder has no config file.
fn load_config(path: &Path, overrides: OverridableConfig) -> Result<Config> {
    let mut config = if Config::config_exists(path) {
        Config::from_path(path)?
    } else {
        Config::default()
    };

    config.apply_override(overrides)?;
    Ok(config)
}

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let overrides = cli.overrides();

    match cli.command {
        Command::Config(ConfigCommand::Init) => init_config(&cli.config),
        Command::Config(ConfigCommand::Show { format }) => {
            dump_config(&load_config(&cli.config, overrides)?, format)
        }
        Command::Simulate(args) => {
            let config = load_config(&cli.config, overrides)?;
            setup::check_config(&config)?;
            harvest_log::init(config.logging());
            setup::dump_spawn_infos(&config);
            setup::init_metrics(&config)?;
            simulate::run(config, args.into())
        }
    }
}

#[allow(clippy::print_stdout, reason = "command output")]
fn init_config(path: &Path) -> Result<()> {
    if Config::config_exists(path) {
        println!("There is already a config in '{}'", path.display());
        return Ok(());
    }

    MinimalConfig::default()
        .save_in_folder(path)
        .with_context(|| format!("could not initialize config in '{}'", path.display()))?;

    println!("Created new config in '{}'", path.display());
    Ok(())
}

#[allow(clippy::print_stdout, reason = "command output")]
fn dump_config(config: &Config, format: ShowFormat) -> Result<()> {
    match format {
        ShowFormat::Yaml => print!("{}", config.to_yaml_string()?),
        ShowFormat::Debug => println!("{config:#?}"),
    }
    Ok(())
}
