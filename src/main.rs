use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use chrono::NaiveDate;
use clap::Parser;
use clap::ValueEnum;
use frontier_rs::portfolio::Constraints;
use frontier_rs::portfolio::CsvLayout;
use frontier_rs::portfolio::GapPolicy;
use frontier_rs::portfolio::OptimizationOutput;
use frontier_rs::portfolio::Periodicity;
use frontier_rs::portfolio::PortfolioEngine;
use frontier_rs::portfolio::PortfolioEngineConfig;
use frontier_rs::portfolio::PortfolioStatistics;
use frontier_rs::portfolio::ReturnConfig;
use frontier_rs::portfolio::ReturnEstimator;
use frontier_rs::portfolio::ReturnKind;
use frontier_rs::portfolio::ShrinkageTarget;
use frontier_rs::portfolio::load_prices;
use frontier_rs::portfolio::prepare_returns;
use frontier_rs::portfolio::series_metrics;
use frontier_rs::qp::SolverBudget;
use prettytable::Table;
use prettytable::row;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Layout {
  Wide,
  Long,
}

impl From<Layout> for CsvLayout {
  fn from(layout: Layout) -> Self {
    match layout {
      Layout::Wide => CsvLayout::Wide,
      Layout::Long => CsvLayout::Long,
    }
  }
}

#[derive(Parser, Debug)]
#[command(
  author,
  version,
  about = "Maximum-Sharpe allocation and efficient frontier from historical prices",
  after_help = "EXAMPLES:
    # Daily closes, one column per ticker
    frontier-rs --prices closes.csv

    # Long layout, 30% cap per asset, JSON report
    frontier-rs --prices prices.csv --format long --max-weight 0.3 --json

    # Compare the allocation with an index column
    frontier-rs --prices closes.csv --benchmark SPY"
)]
struct Args {
  /// CSV file with historical prices
  #[arg(long)]
  prices: PathBuf,

  /// Column layout of the price file
  #[arg(long, value_enum, default_value_t = Layout::Wide)]
  format: Layout,

  /// Ticker in the price file to report as a benchmark instead of optimizing over
  #[arg(long)]
  benchmark: Option<String>,

  /// Annual risk-free rate
  #[arg(long, default_value_t = 0.02)]
  risk_free: f64,

  /// Number of frontier points
  #[arg(long, default_value_t = 50)]
  points: usize,

  /// Lower bound on every weight
  #[arg(long, default_value_t = 0.0)]
  min_weight: f64,

  /// Upper bound on every weight
  #[arg(long, default_value_t = 1.0)]
  max_weight: f64,

  /// Use log returns instead of simple returns
  #[arg(long)]
  log_returns: bool,

  /// Carry prices forward over gaps instead of dropping incomplete dates
  #[arg(long)]
  forward_fill: bool,

  /// Sampling frequency: daily, weekly, monthly, quarterly, annual or periods per year
  #[arg(long, default_value = "daily", value_parser = parse_periodicity)]
  periodicity: Periodicity,

  /// Shrinkage target: constant-correlation or constant-variance
  #[arg(long, default_value = "constant-correlation", value_parser = parse_shrinkage)]
  shrinkage: ShrinkageTarget,

  /// Expected-return model: cagr, mean or ema:<span>
  #[arg(long, default_value = "cagr", value_parser = parse_estimator)]
  estimator: ReturnEstimator,

  /// Minimum aligned return observations (default: twice the asset count)
  #[arg(long)]
  min_observations: Option<usize>,

  /// Iteration cap per quadratic program
  #[arg(long, default_value_t = 500)]
  max_iterations: usize,

  /// Wall-clock budget per quadratic program, in milliseconds
  #[arg(long, default_value_t = 2000)]
  timeout_ms: u64,

  /// Weights below this magnitude are reported as zero
  #[arg(long, default_value_t = 1e-4)]
  cutoff: f64,

  /// Print a JSON report instead of tables
  #[arg(long)]
  json: bool,
}

fn parse_periodicity(s: &str) -> std::result::Result<Periodicity, String> {
  Periodicity::parse(s).ok_or_else(|| format!("unknown periodicity {s:?}"))
}

fn parse_shrinkage(s: &str) -> std::result::Result<ShrinkageTarget, String> {
  ShrinkageTarget::parse(s).ok_or_else(|| format!("unknown shrinkage target {s:?}"))
}

fn parse_estimator(s: &str) -> std::result::Result<ReturnEstimator, String> {
  ReturnEstimator::parse(s).ok_or_else(|| format!("unknown expected-return model {s:?}"))
}

#[derive(Debug, Serialize)]
struct StatsReport {
  expected_return: f64,
  volatility: f64,
  sharpe_ratio: f64,
}

impl From<PortfolioStatistics> for StatsReport {
  fn from(s: PortfolioStatistics) -> Self {
    Self {
      expected_return: s.expected_return,
      volatility: s.volatility,
      sharpe_ratio: s.sharpe_ratio,
    }
  }
}

#[derive(Debug, Serialize)]
struct AssetReport {
  ticker: String,
  weight: f64,
  expected_return: f64,
  volatility: f64,
  sharpe_ratio: f64,
}

#[derive(Debug, Serialize)]
struct BenchmarkReport {
  ticker: String,
  metrics: StatsReport,
}

#[derive(Debug, Serialize)]
struct Report {
  start: NaiveDate,
  end: NaiveDate,
  observations: usize,
  risk_free_rate: f64,
  shrinkage: f64,
  portfolio: StatsReport,
  min_volatility: StatsReport,
  realized_return: f64,
  benchmark: Option<BenchmarkReport>,
  assets: Vec<AssetReport>,
  frontier: Vec<StatsReport>,
  cumulative_returns: Vec<(NaiveDate, f64)>,
}

impl Report {
  fn new(
    out: &OptimizationOutput,
    dates: &[NaiveDate],
    risk_free_rate: f64,
    cutoff: f64,
    benchmark: Option<BenchmarkReport>,
  ) -> Result<Self> {
    let (start, end) = match (dates.first(), dates.last()) {
      (Some(s), Some(e)) => (*s, *e),
      _ => anyhow::bail!("return series has no dates"),
    };
    let weights = out.weights.cleaned(cutoff, 5);
    let assets = out
      .assets
      .iter()
      .map(|a| AssetReport {
        ticker: a.ticker.clone(),
        weight: weights.get(&a.ticker).unwrap_or(0.0),
        expected_return: a.expected_return,
        volatility: a.volatility,
        sharpe_ratio: a.sharpe_ratio,
      })
      .collect();

    Ok(Self {
      start,
      end,
      observations: dates.len(),
      risk_free_rate,
      shrinkage: out.shrinkage,
      portfolio: out.statistics.into(),
      min_volatility: out.min_volatility.statistics().into(),
      realized_return: out.cumulative_returns.last().map_or(0.0, |(_, v)| *v),
      benchmark,
      assets,
      frontier: out.frontier.iter().map(|p| p.statistics().into()).collect(),
      cumulative_returns: out.cumulative_returns.clone(),
    })
  }

  fn print_tables(&self) {
    println!(
      "{} returns from {} to {}, shrinkage {:.4}, realized {}",
      self.observations,
      self.start,
      self.end,
      self.shrinkage,
      pct(self.realized_return)
    );

    let mut allocation = Table::new();
    allocation.set_titles(row!["Ticker", "Weight", "Exp. return", "Volatility", "Sharpe"]);
    for a in &self.assets {
      allocation.add_row(row![
        a.ticker,
        r->pct(a.weight),
        r->pct(a.expected_return),
        r->pct(a.volatility),
        r->format!("{:.3}", a.sharpe_ratio)
      ]);
    }
    allocation.printstd();

    let mut summary = Table::new();
    summary.set_titles(row!["Portfolio", "Exp. return", "Volatility", "Sharpe"]);
    let mut rows = vec![
      ("Max Sharpe".to_string(), &self.portfolio),
      ("Min volatility".to_string(), &self.min_volatility),
    ];
    if let Some(b) = &self.benchmark {
      rows.push((format!("Benchmark {}", b.ticker), &b.metrics));
    }
    for (name, s) in rows {
      summary.add_row(row![
        name,
        r->pct(s.expected_return),
        r->pct(s.volatility),
        r->format!("{:.3}", s.sharpe_ratio)
      ]);
    }
    summary.printstd();

    let mut frontier = Table::new();
    frontier.set_titles(row!["#", "Exp. return", "Volatility", "Sharpe"]);
    for (k, p) in self.frontier.iter().enumerate() {
      frontier.add_row(row![
        r->k,
        r->pct(p.expected_return),
        r->pct(p.volatility),
        r->format!("{:.3}", p.sharpe_ratio)
      ]);
    }
    frontier.printstd();
  }
}

fn pct(v: f64) -> String {
  format!("{:.2}%", v * 100.0)
}

fn main() -> Result<()> {
  let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("frontier_rs=info"));
  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  let mut history = load_prices(&args.prices, args.format.into())?;
  info!(tickers = history.len(), path = ?args.prices, "prices loaded");

  let benchmark = match &args.benchmark {
    Some(ticker) => {
      let observations = history
        .remove(ticker)
        .with_context(|| format!("Benchmark {ticker} is not in {:?}", args.prices))?;
      let metrics = series_metrics(&observations, args.periodicity, args.risk_free)
        .with_context(|| format!("Failed to measure benchmark {ticker}"))?;
      Some(BenchmarkReport {
        ticker: ticker.clone(),
        metrics: metrics.into(),
      })
    }
    None => None,
  };

  let config = PortfolioEngineConfig {
    returns: ReturnConfig {
      kind: if args.log_returns {
        ReturnKind::Log
      } else {
        ReturnKind::Simple
      },
      periodicity: args.periodicity,
      gap_policy: if args.forward_fill {
        GapPolicy::ForwardFill
      } else {
        GapPolicy::Intersect
      },
      min_observations: args.min_observations,
    },
    expected_returns: args.estimator,
    shrinkage_target: args.shrinkage,
    frontier_points: args.points,
    solver: SolverBudget {
      max_iterations: args.max_iterations,
      timeout: Duration::from_millis(args.timeout_ms),
    },
  };
  let constraints = Constraints::default().with_default_bounds(args.min_weight, args.max_weight);

  let series = prepare_returns(&history, &config.returns).context("Failed to prepare returns")?;
  let engine = PortfolioEngine::new(config);
  let out = engine
    .optimize_returns(&series, args.risk_free, &constraints)
    .context("Optimization failed")?;

  let report = Report::new(&out, series.dates(), args.risk_free, args.cutoff, benchmark)?;
  if args.json {
    println!("{}", serde_json::to_string_pretty(&report)?);
  } else {
    report.print_tables();
  }
  Ok(())
}
