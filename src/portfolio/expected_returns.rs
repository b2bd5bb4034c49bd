//! # Expected Returns
//!
//! $$
//! \hat\mu_i = \Big(\prod_{t=1}^T (1 + r_{t,i})\Big)^{f/T} - 1
//! $$
//!
//! Annualized per-asset expected returns. `f` is the periodicity factor from
//! [`Periodicity::periods_per_year`](super::types::Periodicity::periods_per_year)
//! (252 for daily data); the covariance estimator scales by the same factor, so
//! expected return, volatility and the risk-free rate all live on an annual
//! basis.

use nalgebra::DVector;
use ndarray::Axis;

use super::data::ReturnSeries;
use super::error::PortfolioError;
use super::error::Result;
use super::types::AssetUniverse;
use super::types::ReturnKind;

/// Expected-return model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReturnEstimator {
  /// Arithmetic mean of periodic returns times `f`.
  MeanHistorical,
  /// Geometric (CAGR) return: `(Π(1 + r_t))^(f/T) - 1`.
  #[default]
  Compounded,
  /// Exponentially weighted mean (`α = 2 / (span + 1)`, adjusted weights) times `f`.
  Ema { span: usize },
}

impl ReturnEstimator {
  /// Parse a string into a [`ReturnEstimator`]; EMA accepts `ema:<span>`.
  pub fn parse(s: &str) -> Option<Self> {
    let lower = s.to_lowercase();
    match lower.as_str() {
      "mean" | "mean-historical" | "arithmetic" => Some(Self::MeanHistorical),
      "cagr" | "compounded" | "geometric" => Some(Self::Compounded),
      "ema" => Some(Self::Ema { span: 500 }),
      _ => lower
        .strip_prefix("ema:")
        .and_then(|span| span.parse().ok())
        .filter(|span| *span > 0)
        .map(|span| Self::Ema { span }),
    }
  }
}

/// Annualized expected return per asset.
#[derive(Clone, Debug, PartialEq)]
pub struct ExpectedReturns {
  universe: AssetUniverse,
  values: DVector<f64>,
}

impl ExpectedReturns {
  /// Wrap externally supplied annualized expected returns.
  pub fn new(universe: AssetUniverse, values: Vec<f64>) -> Result<Self> {
    if values.len() != universe.len() {
      return Err(PortfolioError::invalid(format!(
        "{} expected returns for {} assets",
        values.len(),
        universe.len()
      )));
    }
    if values.iter().any(|v| !v.is_finite()) {
      return Err(PortfolioError::invalid("expected returns must be finite"));
    }
    Ok(Self {
      universe,
      values: DVector::from_vec(values),
    })
  }

  pub fn universe(&self) -> &AssetUniverse {
    &self.universe
  }

  pub fn values(&self) -> &DVector<f64> {
    &self.values
  }

  pub fn get(&self, ticker: &str) -> Option<f64> {
    self.universe.index_of(ticker).map(|i| self.values[i])
  }

  /// Highest expected return in the universe.
  pub fn max(&self) -> f64 {
    self.values.max()
  }
}

/// Estimate annualized expected returns from an aligned return series.
pub fn estimate_expected_returns(series: &ReturnSeries, estimator: ReturnEstimator) -> Result<ExpectedReturns> {
  let f = series.periodicity().periods_per_year();
  let returns = series.returns();
  let t = returns.nrows();
  if t == 0 {
    return Err(PortfolioError::InsufficientData {
      required: 1,
      actual: 0,
    });
  }

  let values: Vec<f64> = match estimator {
    ReturnEstimator::MeanHistorical => returns
      .mean_axis(Axis(0))
      .map(|m| m.iter().map(|v| v * f).collect())
      .unwrap_or_default(),
    ReturnEstimator::Compounded => returns
      .columns()
      .into_iter()
      .map(|col| {
        let log_growth = match series.kind() {
          ReturnKind::Log => col.sum(),
          ReturnKind::Simple => {
            if col.iter().any(|r| *r <= -1.0) {
              return Err(PortfolioError::invalid(
                "compounded returns need every simple return above -100%",
              ));
            }
            col.iter().map(|r| r.ln_1p()).sum()
          }
        };
        Ok((log_growth * f / t as f64).exp_m1())
      })
      .collect::<Result<_>>()?,
    ReturnEstimator::Ema { span } => {
      if span == 0 {
        return Err(PortfolioError::invalid("EMA span must be positive"));
      }
      let decay = 1.0 - 2.0 / (span as f64 + 1.0);
      let weights: Vec<f64> = (0..t).map(|k| decay.powi((t - 1 - k) as i32)).collect();
      let total: f64 = weights.iter().sum();
      returns
        .columns()
        .into_iter()
        .map(|col| col.iter().zip(&weights).map(|(r, w)| r * w).sum::<f64>() / total * f)
        .collect()
    }
  };

  ExpectedReturns::new(series.universe().clone(), values)
}
