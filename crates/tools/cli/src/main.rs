//! ShrivenQ CLI - run candle backtests from the command line

#![deny(clippy::all)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::Timeframe;
use engine::{Engine, EngineConfig, ExecutionMode};
use feeds::csv::load_candles;
use feeds::{HistoricalFeed, HistoricalFeedConfig};
use sim::{PaperWallet, WalletConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, info_span, warn};
use tracing_subscriber::EnvFilter;

mod strategy;
use strategy::MovingAverageCross;

#[derive(Parser, Debug)]
#[command(name = "shrivenq")]
#[command(about = "ShrivenQ - candle execution engine")]
#[command(version)]
struct Cli {
    /// Log filter, e.g. `info` or `engine=debug`
    #[arg(long, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay CSV candles through a moving average cross strategy
    Backtest(BacktestArgs),
}

#[derive(clap::Args, Debug)]
struct BacktestArgs {
    /// Candle source as `PAIR=PATH`; repeat for several pairs
    #[arg(long = "csv", value_parser = parse_source, required = true)]
    sources: Vec<(String, PathBuf)>,
    /// Candle timeframe
    #[arg(long, default_value = "1h")]
    timeframe: Timeframe,
    /// Valuation and quote currency
    #[arg(long, default_value = "USDT")]
    base_coin: String,
    /// Starting balance in the base coin
    #[arg(long, default_value_t = 10_000.0)]
    balance: f64,
    /// Maker fee rate
    #[arg(long, default_value_t = 0.0)]
    maker_fee: f64,
    /// Taker fee rate
    #[arg(long, default_value_t = 0.0)]
    taker_fee: f64,
    /// JSON engine configuration; pairs are taken from `--csv`
    #[arg(long)]
    config: Option<PathBuf>,
    /// Fast moving average period
    #[arg(long, default_value_t = 9)]
    fast: usize,
    /// Slow moving average period
    #[arg(long, default_value_t = 21)]
    slow: usize,
}

fn parse_source(value: &str) -> Result<(String, PathBuf), String> {
    let (pair, path) = value
        .split_once('=')
        .ok_or_else(|| format!("expected PAIR=PATH, got {value}"))?;
    let pair = pair.trim().to_uppercase();
    if pair.is_empty() || path.trim().is_empty() {
        return Err(format!("expected PAIR=PATH, got {value}"));
    }
    Ok((pair, PathBuf::from(path.trim())))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .compact()
        .init();

    match cli.command {
        Commands::Backtest(args) => run_backtest(args).await,
    }
}

async fn run_backtest(args: BacktestArgs) -> Result<()> {
    let span = info_span!("backtest", timeframe = %args.timeframe);

    let mut config = match &args.config {
        Some(path) => read_engine_config(path)?,
        None => EngineConfig::default(),
    };
    config.mode = ExecutionMode::Backtest;
    config.pairs = args.sources.iter().map(|(pair, _)| pair.clone()).collect();

    let mut feed = HistoricalFeed::new(HistoricalFeedConfig::default(), span.clone());
    for (pair, path) in &args.sources {
        let candles = load_candles(path, pair)
            .with_context(|| format!("loading {pair} from {}", path.display()))?;
        info!(parent: &span, %pair, candles = candles.len(), path = %path.display(), "candles loaded");
        feed.insert(pair, args.timeframe, candles);
    }

    let wallet_config = WalletConfig::new(args.base_coin.as_str())
        .with_asset(&args.base_coin, args.balance)
        .with_fees(args.maker_fee, args.taker_fee);
    let wallet = Arc::new(PaperWallet::new(wallet_config, span.clone()).with_feeder(Arc::new(feed)));
    let strategy = Arc::new(MovingAverageCross::new(args.timeframe, args.fast, args.slow)?);

    let engine = Engine::new(
        config,
        Arc::clone(&wallet) as Arc<dyn common::Feeder>,
        Arc::clone(&wallet) as Arc<dyn common::Broker>,
        strategy,
        span.clone(),
    )?
    .with_paper_wallet(Arc::clone(&wallet));

    let (shutdown, _) = broadcast::channel(1);
    let interrupt = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping feeds");
            let _ = interrupt.send(());
        }
    });

    engine.run(&shutdown).await?;

    for summary in engine.orders().summaries() {
        info!(parent: &span, "{summary}");
    }
    info!(parent: &span, "\n{}", wallet.summary());
    Ok(())
}

/// Engine settings from a JSON file; the pair list is validated after `--csv` fills it
fn read_engine_config(path: &Path) -> Result<EngineConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("btcusdt=data/btc.csv", Some(("BTCUSDT", "data/btc.csv")))]
    #[case(" ETHUSDT = eth.csv ", Some(("ETHUSDT", "eth.csv")))]
    #[case("BTCUSDT", None)]
    #[case("=a.csv", None)]
    #[case("BTCUSDT=", None)]
    fn test_parse_source(#[case] value: &str, #[case] expected: Option<(&str, &str)>) {
        let parsed = parse_source(value).ok();
        let expected = expected.map(|(pair, path)| (pair.to_string(), PathBuf::from(path)));
        assert_eq!(parsed, expected);
    }

    #[test]
    fn test_cli_parses_backtest_flags() {
        let cli = Cli::try_parse_from([
            "shrivenq",
            "backtest",
            "--csv",
            "BTCUSDT=btc.csv",
            "--csv",
            "ETHUSDT=eth.csv",
            "--timeframe",
            "4h",
            "--fast",
            "5",
        ]);
        let Ok(Cli {
            command: Commands::Backtest(args),
            ..
        }) = cli
        else {
            panic!("backtest arguments rejected");
        };
        assert_eq!(args.sources.len(), 2);
        assert_eq!(args.timeframe, Timeframe::H4);
        assert_eq!((args.fast, args.slow), (5, 21));
        assert_eq!(args.base_coin, "USDT");
    }
}
