//! Two-peer match simulator.
//!
//! Runs pairs of player clients against one shared store and ledger, playing
//! random legal moves, then checks that no money was created or lost.

mod logging;
mod metrics;
mod sim;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Error, bail};
use log::info;
use pico_args::Arguments;
use stake_duel::{
    config::{EngineConfig, Tier},
    engine::GameKind,
};

const HELP: &str = "\
Simulate stake duel matches between two bot players

USAGE:
  sd_sim [OPTIONS]

OPTIONS:
  --matches    N           Matches to play                  [default: 5]
  --game       KIND        grid or card                     [default: grid]
  --fee        AMOUNT      Entry fee per player             [default: 10]
  --payout     AMOUNT      Prize paid to the winner         [default: 18]
  --db-url     URL         Use the Postgres ledger          [default: env DATABASE_URL, else in-memory]
  --metrics    IP:PORT     Serve Prometheus metrics here

FLAGS:
  --fast                   Shorten splash and countdown to 100ms
  --leave-rate P           Chance per turn that a bot quits  [default: 0.0]
  -h, --help               Print help information

ENVIRONMENT:
  DUEL_*                   Engine timers and limits (see EngineConfig::from_env)
  RUST_LOG                 Log filter
";

struct Args {
    matches: usize,
    game: GameKind,
    fee: i64,
    payout: i64,
    database_url: Option<String>,
    metrics_addr: Option<SocketAddr>,
    fast: bool,
    leave_rate: f64,
}

fn parse_args() -> Result<Args, Error> {
    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let args = Args {
        matches: pargs.opt_value_from_str("--matches")?.unwrap_or(5),
        game: pargs
            .opt_value_from_str("--game")?
            .unwrap_or(GameKind::Grid),
        fee: pargs.opt_value_from_str("--fee")?.unwrap_or(10),
        payout: pargs.opt_value_from_str("--payout")?.unwrap_or(18),
        database_url: pargs
            .opt_value_from_str("--db-url")?
            .or_else(|| std::env::var("DATABASE_URL").ok()),
        metrics_addr: pargs.opt_value_from_str("--metrics")?,
        fast: pargs.contains("--fast"),
        leave_rate: pargs.opt_value_from_str("--leave-rate")?.unwrap_or(0.0),
    };

    let rest = pargs.finish();
    if !rest.is_empty() {
        bail!("Unexpected arguments: {rest:?}");
    }
    if !(0.0..=1.0).contains(&args.leave_rate) {
        bail!("--leave-rate must be between 0 and 1");
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let args = parse_args()?;
    logging::init();

    if let Some(addr) = args.metrics_addr {
        metrics::init_metrics(addr).map_err(|e| anyhow::anyhow!(e))?;
        info!("Metrics available at http://{}/metrics", addr);
    }

    let mut config = EngineConfig::from_env().context("Invalid engine configuration")?;
    if args.fast {
        config.splash = Duration::from_millis(100);
        config.countdown = Duration::from_millis(100);
    }

    let tier = Tier::new(args.game, args.fee, args.payout).context("Invalid tier")?;
    info!(
        "Simulating {} {} match(es) at tier {} (house edge {})",
        args.matches,
        args.game,
        tier,
        tier.house_edge()
    );

    let backend = sim::Backend::connect(args.database_url.as_deref(), config).await?;
    let report = sim::run(&backend, tier, args.matches, args.leave_rate).await?;

    println!("{report}");
    if !report.is_conserved() {
        log::error!(
            "CRITICAL: balances drifted by {} across the run",
            report.drift()
        );
        std::process::exit(1);
    }

    Ok(())
}
