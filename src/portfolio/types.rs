//! # Portfolio Types
//!
//! $$
//! \mathbf{w}^\*=\arg\max_{\mathbf{w}} \frac{\mathbb E[R_p]-r_f}{\sigma_p}
//! $$
//!
//! Asset universe, weight vectors, frontier points and the periodicity
//! conventions shared by every estimator.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use nalgebra::DMatrix;
use nalgebra::DVector;

use super::error::PortfolioError;
use super::error::Result;

/// Ordered, duplicate-free list of tickers. The position of a ticker is its
/// index in every weight vector, expected-return vector and covariance matrix.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AssetUniverse {
  tickers: Arc<[String]>,
}

impl AssetUniverse {
  /// Build a universe, rejecting empty lists and duplicate tickers.
  pub fn new<I, S>(tickers: I) -> Result<Self>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let tickers: Vec<String> = tickers.into_iter().map(Into::into).collect();
    if tickers.is_empty() {
      return Err(PortfolioError::invalid("asset universe is empty"));
    }

    let mut seen = HashSet::with_capacity(tickers.len());
    for t in &tickers {
      if t.trim().is_empty() {
        return Err(PortfolioError::invalid("ticker must not be blank"));
      }
      if !seen.insert(t.as_str()) {
        return Err(PortfolioError::invalid(format!("duplicate ticker {t}")));
      }
    }

    Ok(Self {
      tickers: tickers.into(),
    })
  }

  pub fn len(&self) -> usize {
    self.tickers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tickers.is_empty()
  }

  pub fn tickers(&self) -> &[String] {
    &self.tickers
  }

  /// Position of `ticker` in the universe.
  pub fn index_of(&self, ticker: &str) -> Option<usize> {
    self.tickers.iter().position(|t| t == ticker)
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.tickers.iter().map(String::as_str)
  }
}

impl fmt::Display for AssetUniverse {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[{}]", self.tickers.join(", "))
  }
}

/// Sampling frequency of a return series.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Periodicity {
  #[default]
  Daily,
  Weekly,
  Monthly,
  Quarterly,
  Annual,
  /// Arbitrary number of periods per year.
  Custom(f64),
}

impl Periodicity {
  /// Annualization factor: 252 trading days, 52 weeks, 12 months, 4 quarters.
  ///
  /// Means are scaled by this factor, variances and covariances too, so
  /// volatility scales by its square root.
  pub fn periods_per_year(self) -> f64 {
    match self {
      Self::Daily => 252.0,
      Self::Weekly => 52.0,
      Self::Monthly => 12.0,
      Self::Quarterly => 4.0,
      Self::Annual => 1.0,
      Self::Custom(f) => f,
    }
  }

  /// Parse a string into a [`Periodicity`].
  pub fn parse(s: &str) -> Option<Self> {
    match s.to_lowercase().as_str() {
      "d" | "daily" => Some(Self::Daily),
      "w" | "weekly" => Some(Self::Weekly),
      "m" | "monthly" => Some(Self::Monthly),
      "q" | "quarterly" => Some(Self::Quarterly),
      "a" | "y" | "annual" | "yearly" => Some(Self::Annual),
      _ => s.parse::<f64>().ok().filter(|f| *f > 0.0).map(Self::Custom),
    }
  }
}

/// How periodic returns are computed from consecutive prices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReturnKind {
  /// `p_t / p_{t-1} - 1`
  #[default]
  Simple,
  /// `ln(p_t / p_{t-1})`
  Log,
}

/// Portfolio weights, ordered like the universe they belong to.
#[derive(Clone, Debug, PartialEq)]
pub struct WeightVector {
  universe: AssetUniverse,
  weights: Vec<f64>,
}

impl WeightVector {
  pub fn new(universe: AssetUniverse, weights: Vec<f64>) -> Result<Self> {
    if universe.len() != weights.len() {
      return Err(PortfolioError::invalid(format!(
        "{} weights for {} assets",
        weights.len(),
        universe.len()
      )));
    }
    Ok(Self { universe, weights })
  }

  pub fn universe(&self) -> &AssetUniverse {
    &self.universe
  }

  pub fn as_slice(&self) -> &[f64] {
    &self.weights
  }

  pub fn to_dvector(&self) -> DVector<f64> {
    DVector::from_column_slice(&self.weights)
  }

  pub fn get(&self, ticker: &str) -> Option<f64> {
    self.universe.index_of(ticker).map(|i| self.weights[i])
  }

  pub fn sum(&self) -> f64 {
    self.weights.iter().sum()
  }

  /// `(ticker, weight)` pairs in universe order.
  pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
    self.universe.iter().zip(self.weights.iter().copied())
  }

  /// Zero weights with magnitude below `cutoff` and round the rest to
  /// `decimals` places. The result is not renormalized.
  pub fn cleaned(&self, cutoff: f64, decimals: u32) -> Self {
    let scale = 10f64.powi(decimals as i32);
    let weights = self
      .weights
      .iter()
      .map(|&w| {
        if w.abs() < cutoff {
          0.0
        } else {
          (w * scale).round() / scale
        }
      })
      .collect();
    Self {
      universe: self.universe.clone(),
      weights,
    }
  }
}

/// Headline metrics of a portfolio.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PortfolioStatistics {
  /// Annualized expected return `wᵀμ`.
  pub expected_return: f64,
  /// Annualized volatility `sqrt(wᵀΣw)`.
  pub volatility: f64,
  /// `(expected_return - risk_free) / volatility`, zero when volatility vanishes.
  pub sharpe_ratio: f64,
}

impl PortfolioStatistics {
  pub fn compute(weights: &DVector<f64>, mu: &DVector<f64>, cov: &DMatrix<f64>, risk_free: f64) -> Self {
    let expected_return = weights.dot(mu);
    let volatility = weights.dot(&(cov * weights)).max(0.0).sqrt();
    let sharpe_ratio = if volatility > 1e-15 {
      (expected_return - risk_free) / volatility
    } else {
      0.0
    };

    Self {
      expected_return,
      volatility,
      sharpe_ratio,
    }
  }
}

/// One point of the efficient frontier.
#[derive(Clone, Debug, PartialEq)]
pub struct FrontierPoint {
  pub expected_return: f64,
  pub volatility: f64,
  pub sharpe_ratio: f64,
  pub weights: WeightVector,
}

impl FrontierPoint {
  pub fn statistics(&self) -> PortfolioStatistics {
    PortfolioStatistics {
      expected_return: self.expected_return,
      volatility: self.volatility,
      sharpe_ratio: self.sharpe_ratio,
    }
  }
}

/// Frontier points ordered by increasing target return.
pub type FrontierCurve = Vec<FrontierPoint>;

/// Per-asset annualized metrics, as displayed next to the allocation.
#[derive(Clone, Debug, PartialEq)]
pub struct AssetSummary {
  pub ticker: String,
  pub expected_return: f64,
  pub volatility: f64,
  pub sharpe_ratio: f64,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn universe_rejects_duplicates_and_empty() {
    assert!(AssetUniverse::new(Vec::<String>::new()).is_err());
    assert!(AssetUniverse::new(["AAA", "BBB", "AAA"]).is_err());
    let u = AssetUniverse::new(["AAA", "BBB"]).unwrap();
    assert_eq!(u.index_of("BBB"), Some(1));
    assert_eq!(u.to_string(), "[AAA, BBB]");
  }

  #[test]
  fn cleaned_weights_drop_dust() {
    let u = AssetUniverse::new(["A", "B", "C"]).unwrap();
    let w = WeightVector::new(u, vec![0.00004, 0.333333333, 0.666626667]).unwrap();
    let c = w.cleaned(1e-4, 5);
    assert_eq!(c.as_slice(), &[0.0, 0.33333, 0.66663]);
  }

  #[test]
  fn statistics_handle_zero_volatility() {
    let w = DVector::from_vec(vec![1.0]);
    let mu = DVector::from_vec(vec![0.05]);
    let cov = DMatrix::zeros(1, 1);
    let stats = PortfolioStatistics::compute(&w, &mu, &cov, 0.02);
    assert_eq!(stats.sharpe_ratio, 0.0);
    assert!((stats.expected_return - 0.05).abs() < 1e-15);
  }

  #[test]
  fn periodicity_factors() {
    assert_eq!(Periodicity::Daily.periods_per_year(), 252.0);
    assert_eq!(Periodicity::parse("monthly"), Some(Periodicity::Monthly));
    assert_eq!(Periodicity::parse("26"), Some(Periodicity::Custom(26.0)));
    assert_eq!(Periodicity::parse("nope"), None);
  }
}
