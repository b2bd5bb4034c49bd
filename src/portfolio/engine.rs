//! # Portfolio Engine
//!
//! $$
//! \mathbf{w}^\* = \operatorname{MaxSharpe}\big(\hat\mu,\ \hat\Sigma_{LW},\ \mathcal W\big)
//! $$
//!
//! End-to-end pipeline: prices to aligned returns, shrinkage covariance and
//! expected returns, then the maximum-Sharpe portfolio and the efficient
//! frontier. Every request builds its own estimates; nothing is cached.

use chrono::NaiveDate;
use tracing::info;
use tracing::info_span;

use super::constraints::Constraints;
use super::covariance::sample_covariance;
use super::covariance::LedoitWolf;
use super::covariance::ShrinkageTarget;
use super::data::prepare_returns;
use super::data::PriceHistory;
use super::data::ReturnConfig;
use super::data::ReturnSeries;
use super::error::PortfolioError;
use super::error::Result;
use super::expected_returns::estimate_expected_returns;
use super::expected_returns::ReturnEstimator;
use super::frontier::FrontierSolver;
use super::performance::cumulative_returns;
use super::types::AssetSummary;
use super::types::FrontierCurve;
use super::types::FrontierPoint;
use super::types::PortfolioStatistics;
use super::types::WeightVector;
use crate::qp::SolverBudget;

/// Runtime configuration for [`PortfolioEngine`].
#[derive(Clone, Debug, PartialEq)]
pub struct PortfolioEngineConfig {
  /// Return type, periodicity, gap policy and minimum sample size.
  pub returns: ReturnConfig,
  /// Expected-return model.
  pub expected_returns: ReturnEstimator,
  /// Ledoit-Wolf shrinkage target.
  pub shrinkage_target: ShrinkageTarget,
  /// Number of target returns swept along the frontier.
  pub frontier_points: usize,
  /// Per-solve iteration and wall-clock limits.
  pub solver: SolverBudget,
}

impl Default for PortfolioEngineConfig {
  fn default() -> Self {
    Self {
      returns: ReturnConfig::default(),
      expected_returns: ReturnEstimator::default(),
      shrinkage_target: ShrinkageTarget::default(),
      frontier_points: 50,
      solver: SolverBudget::default(),
    }
  }
}

/// Result of [`PortfolioEngine::optimize`].
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizationOutput {
  /// Maximum-Sharpe weights.
  pub weights: WeightVector,
  /// Statistics of `weights`.
  pub statistics: PortfolioStatistics,
  /// Efficient frontier ordered by increasing return.
  pub frontier: FrontierCurve,
  /// Global minimum-variance portfolio.
  pub min_volatility: FrontierPoint,
  /// Ledoit-Wolf intensity actually applied.
  pub shrinkage: f64,
  /// Stand-alone annualized metrics per asset, volatility from the unshrunk
  /// sample covariance.
  pub assets: Vec<AssetSummary>,
  /// Cumulative return of `weights` over the estimation sample.
  pub cumulative_returns: Vec<(NaiveDate, f64)>,
}

/// Single entry point for mean-variance optimization.
#[derive(Clone, Debug, Default)]
pub struct PortfolioEngine {
  config: PortfolioEngineConfig,
}

impl PortfolioEngine {
  /// Construct a new engine with explicit configuration.
  pub fn new(config: PortfolioEngineConfig) -> Self {
    Self { config }
  }

  /// Borrow engine configuration.
  pub fn config(&self) -> &PortfolioEngineConfig {
    &self.config
  }

  /// Optimize from raw price history.
  pub fn optimize(
    &self,
    prices: &PriceHistory,
    risk_free_rate: f64,
    constraints: &Constraints,
  ) -> Result<OptimizationOutput> {
    let span = info_span!("optimize", assets = prices.len(), risk_free_rate);
    let _guard = span.enter();

    let returns = prepare_returns(prices, &self.config.returns)?;
    self.run(&returns, risk_free_rate, constraints)
  }

  /// Optimize from an already aligned return series.
  pub fn optimize_returns(
    &self,
    returns: &ReturnSeries,
    risk_free_rate: f64,
    constraints: &Constraints,
  ) -> Result<OptimizationOutput> {
    let span = info_span!("optimize", assets = returns.n_assets(), risk_free_rate);
    let _guard = span.enter();

    self.run(returns, risk_free_rate, constraints)
  }

  fn run(&self, returns: &ReturnSeries, risk_free_rate: f64, constraints: &Constraints) -> Result<OptimizationOutput> {
    if !risk_free_rate.is_finite() {
      return Err(PortfolioError::invalid("risk-free rate must be finite"));
    }
    info!(
      observations = returns.n_observations(),
      universe = %returns.universe(),
      "optimization started"
    );

    let cov = LedoitWolf::new(self.config.shrinkage_target).estimate(returns)?;
    let mu = estimate_expected_returns(returns, self.config.expected_returns)?;
    let shrinkage = cov.shrinkage();

    let sample = sample_covariance(returns)?;
    let assets = mu
      .universe()
      .iter()
      .enumerate()
      .map(|(i, ticker)| {
        let expected_return = mu.values()[i];
        let volatility = sample[(i, i)].max(0.0).sqrt();
        AssetSummary {
          ticker: ticker.to_string(),
          expected_return,
          volatility,
          sharpe_ratio: if volatility > 1e-15 {
            (expected_return - risk_free_rate) / volatility
          } else {
            0.0
          },
        }
      })
      .collect();

    let solver = FrontierSolver::new(mu, cov, constraints, risk_free_rate, self.config.solver)?;
    let best = solver.solve_max_sharpe()?;
    let min_volatility = solver.min_volatility()?;
    let frontier = solver.efficient_frontier(self.config.frontier_points)?;
    let realized = cumulative_returns(&best.weights, returns)?;

    let statistics = best.statistics();
    info!(
      expected_return = statistics.expected_return,
      volatility = statistics.volatility,
      sharpe_ratio = statistics.sharpe_ratio,
      shrinkage,
      frontier_points = frontier.len(),
      realized = realized.last().map_or(0.0, |(_, v)| *v),
      "optimization finished"
    );

    Ok(OptimizationOutput {
      weights: best.weights,
      statistics,
      frontier,
      min_volatility,
      shrinkage,
      assets,
      cumulative_returns: realized,
    })
  }
}
