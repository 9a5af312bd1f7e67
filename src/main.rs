use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;

use raftsim::repl::{Console, Repl};
use raftsim::{Cluster, SimConfig};

#[derive(Parser)]
#[command(name = "raftsim")]
#[command(about = "A Raft leader-election simulator with a fault-injecting network")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct SimArgs {
    /// JSON configuration file; missing fields use defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed for every random stream (random when omitted)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Number of nodes to start with
    #[arg(short, long)]
    nodes: Option<usize>,
}

impl SimArgs {
    fn load(&self) -> Result<SimConfig> {
        let mut config = match &self.config {
            Some(path) => SimConfig::load(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => SimConfig::default(),
        };
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(nodes) = self.nodes {
            config.cluster.initial_nodes = nodes;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Start the interactive console
    Repl {
        #[command(flatten)]
        sim: SimArgs,
    },

    /// Run the simulation for a fixed span of simulated time
    Run {
        #[command(flatten)]
        sim: SimArgs,

        /// Simulated time to run for
        #[arg(long, default_value_t = 30_000)]
        duration_ms: u64,

        /// Simulated time per tick
        #[arg(long, default_value_t = 100)]
        tick_ms: u64,

        /// Pace ticks against the wall clock
        #[arg(long)]
        realtime: bool,

        /// Probability that a message is lost
        #[arg(long)]
        drop_rate: Option<f64>,

        /// Extra one-way network latency
        #[arg(long)]
        latency_ms: Option<u64>,
    },

    /// Print the default configuration as JSON
    Config,
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

struct RunOptions {
    duration: Duration,
    tick: Duration,
    realtime: bool,
}

async fn run_batch(mut cluster: Cluster, options: RunOptions) -> Result<()> {
    let RunOptions {
        duration,
        tick,
        realtime,
    } = options;
    let tick = tick.max(Duration::from_millis(1));
    let mut interval = tokio::time::interval(tick);
    let mut elapsed = Duration::ZERO;
    let mut since_status = Duration::ZERO;

    info!("Running for {}ms of simulated time", duration.as_millis());
    while elapsed < duration {
        if realtime {
            interval.tick().await;
        }
        let delta = tick.min(duration - elapsed);
        cluster.advance(delta);
        elapsed += delta;
        since_status += delta;
        if since_status >= Duration::from_secs(1) {
            since_status = Duration::ZERO;
            println!("{}", cluster.statistics());
        }
    }

    println!("{}", serde_json::to_string_pretty(&cluster.statistics())?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Repl { sim } => {
            let config = sim.load()?;
            let step = config.network.latency_step_ms;
            let cluster = Cluster::new(config);
            info!("Starting console (seed {})", cluster.seed());

            let console = Console::new(cluster).with_latency_step(step);
            let mut repl = Repl::new(console)?;
            repl.run().await;
        }
        Command::Run {
            sim,
            duration_ms,
            tick_ms,
            realtime,
            drop_rate,
            latency_ms,
        } => {
            let mut config = sim.load()?;
            if let Some(rate) = drop_rate {
                config.network.drop_rate = rate;
            }
            if let Some(ms) = latency_ms {
                config.network.latency_ms = ms;
            }
            config.validate()?;

            let cluster = Cluster::new(config);
            info!("Starting batch run (seed {})", cluster.seed());
            run_batch(
                cluster,
                RunOptions {
                    duration: Duration::from_millis(duration_ms),
                    tick: Duration::from_millis(tick_ms),
                    realtime,
                },
            )
            .await?;
        }
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&SimConfig::default())?);
        }
    }

    Ok(())
}
