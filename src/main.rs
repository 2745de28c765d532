use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kms_quorum::simulation::{self, display_secret, strip_0x, Scenario};
use kms_quorum::{shamir, ClusterConfig, Share, Topology};

const DEFAULT_SECRET: &str = "correct horse battery staple";

#[derive(Parser)]
#[command(name = "kms-quorum", about = "Threshold secret split / retrieval demo")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Split a secret into `<index>-<hex>` shares.
    Split {
        #[arg(long, default_value = DEFAULT_SECRET)]
        secret: String,
        /// Treat `--secret` as hex bytes.
        #[arg(long)]
        hex: bool,
        #[arg(short = 'm', long, default_value_t = 3)]
        threshold: usize,
        #[arg(short = 'n', long, default_value_t = 10)]
        shares: usize,
    },
    /// Recombine shares printed by `split`.
    Combine {
        #[arg(short = 'm', long)]
        threshold: usize,
        #[arg(required = true)]
        shares: Vec<String>,
    },
    /// Run requester, coordinator and shareholders locally.
    Simulate(SimulateArgs),
}

#[derive(Args)]
struct SimulateArgs {
    /// TOML cluster config; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum)]
    topology: Option<Topology>,
    #[arg(short = 'm', long)]
    threshold: Option<usize>,
    #[arg(short = 'n', long)]
    shares: Option<usize>,
    #[arg(long, default_value = DEFAULT_SECRET)]
    secret: String,
    /// Shareholders that answer immediately (default: threshold).
    #[arg(long)]
    prompt: Option<usize>,
    /// Delay of the slow shareholders in milliseconds.
    #[arg(long, default_value_t = 2000)]
    slow_ms: u64,
    /// Bind every role to an ephemeral port instead of the configured ones.
    #[arg(long)]
    ephemeral: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Split {
            secret,
            hex,
            threshold,
            shares,
        } => {
            let secret = if hex {
                hex::decode(strip_0x(&secret)).context("secret is not valid hex")?
            } else {
                secret.into_bytes()
            };
            for share in shamir::split(&secret, threshold, shares)? {
                println!("{}", share);
            }
        }
        Command::Combine { threshold, shares } => {
            let shares = shares
                .iter()
                .map(|s| s.parse::<Share>())
                .collect::<Result<Vec<_>, _>>()?;
            let secret = shamir::reconstruct(&shares, threshold)?;
            println!("{}", display_secret(&secret));
        }
        Command::Simulate(args) => simulate(args).await?,
    }
    Ok(())
}

async fn simulate(args: SimulateArgs) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => ClusterConfig::load(path)?,
        None => ClusterConfig::default(),
    };
    if let Some(topology) = args.topology {
        config.topology = topology;
    }
    if let Some(threshold) = args.threshold {
        config.threshold = threshold;
    }
    if let Some(shares) = args.shares {
        config.shares = shares;
    }
    if args.ephemeral {
        config.coordinator_port = 0;
        config.shareholder_base_port = 0;
    }
    config.validate()?;

    let prompt = args.prompt.unwrap_or(config.threshold);
    let scenario = Scenario::stragglers(
        config,
        args.secret.as_bytes(),
        prompt,
        Duration::from_millis(args.slow_ms),
    );

    println!("=== {:?} topology ===", scenario.config.topology);
    let outcome = simulation::run(&scenario).await?;
    match &outcome.recovered {
        Ok(secret) => println!("Response is: {}", display_secret(secret)),
        Err(e) => println!("Retrieval failed: {}", e),
    }
    println!("Actual is:   {}", display_secret(&scenario.secret));
    println!("Elapsed:     {:?}", outcome.elapsed);

    if !outcome.matches(&scenario.secret) {
        bail!("recovered secret does not match");
    }
    Ok(())
}
