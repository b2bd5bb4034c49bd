//! # Realized Performance
//!
//! $$
//! V_t = \prod_{s \le t}\Big(1 + \sum_i w_i r_{s,i}\Big) - 1
//! $$
//!
//! Backward-looking analytics: stand-alone metrics of a single price series
//! (a benchmark, say) and the cumulative return of holding an allocation over
//! the sample it was estimated on.

use chrono::NaiveDate;
use ndarray::Array1;

use super::data::simple_returns_series;
use super::data::sorted_prices;
use super::data::PriceObservation;
use super::data::ReturnSeries;
use super::error::PortfolioError;
use super::error::Result;
use super::types::Periodicity;
use super::types::PortfolioStatistics;
use super::types::ReturnKind;
use super::types::WeightVector;

/// Annualized CAGR, sample volatility and Sharpe ratio of one price series.
///
/// Volatility is the `T - 1` normalized standard deviation of simple returns
/// scaled by `sqrt(f)`.
pub fn series_metrics(
  observations: &[PriceObservation],
  periodicity: Periodicity,
  risk_free_rate: f64,
) -> Result<PortfolioStatistics> {
  let prices = sorted_prices("series", observations)?;
  let closes: Vec<f64> = prices.values().copied().collect();
  let returns = Array1::from(simple_returns_series(&closes));
  let t = returns.len();
  if t < 2 {
    return Err(PortfolioError::InsufficientData {
      required: 2,
      actual: t,
    });
  }

  let f = periodicity.periods_per_year();
  let (first, last) = (closes[0], closes[t]);
  let expected_return = ((last / first).ln() * f / t as f64).exp_m1();
  let volatility = returns.std(1.0) * f.sqrt();
  let sharpe_ratio = if volatility > 1e-15 {
    (expected_return - risk_free_rate) / volatility
  } else {
    0.0
  };

  Ok(PortfolioStatistics {
    expected_return,
    volatility,
    sharpe_ratio,
  })
}

/// Cumulative simple return of `weights`, rebalanced every period, one value
/// per row of `series`.
pub fn cumulative_returns(weights: &WeightVector, series: &ReturnSeries) -> Result<Vec<(NaiveDate, f64)>> {
  if weights.universe() != series.universe() {
    return Err(PortfolioError::invalid(format!(
      "weights cover {} but returns cover {}",
      weights.universe(),
      series.universe()
    )));
  }

  let simple = match series.kind() {
    ReturnKind::Simple => series.returns().clone(),
    ReturnKind::Log => series.returns().mapv(f64::exp_m1),
  };
  let w = Array1::from(weights.as_slice().to_vec());
  let period_returns = simple.dot(&w);

  let mut growth = 1.0;
  Ok(
    series
      .dates()
      .iter()
      .zip(period_returns.iter())
      .map(|(date, r)| {
        growth *= 1.0 + r;
        (*date, growth - 1.0)
      })
      .collect(),
  )
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::Array2;

  use super::*;
  use crate::portfolio::types::AssetUniverse;

  fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 2, day).unwrap()
  }

  #[test]
  fn series_metrics_match_hand_computation() {
    // Out of date order on purpose.
    let obs = vec![
      PriceObservation::new(d(3), 99.0),
      PriceObservation::new(d(1), 100.0),
      PriceObservation::new(d(2), 110.0),
    ];
    let stats = series_metrics(&obs, Periodicity::Daily, 0.0).unwrap();

    // Returns +10% and -10%, sample std = sqrt(0.02).
    let cagr = (0.99f64.ln() * 252.0 / 2.0).exp_m1();
    let vol = 0.02f64.sqrt() * 252f64.sqrt();
    assert_abs_diff_eq!(stats.expected_return, cagr, epsilon = 1e-12);
    assert_abs_diff_eq!(stats.volatility, vol, epsilon = 1e-12);
    assert_abs_diff_eq!(stats.sharpe_ratio, cagr / vol, epsilon = 1e-12);

    let with_rf = series_metrics(&obs, Periodicity::Daily, 0.02).unwrap();
    assert_abs_diff_eq!(with_rf.sharpe_ratio, (cagr - 0.02) / vol, epsilon = 1e-12);
  }

  #[test]
  fn flat_series_has_zero_sharpe() {
    let obs: Vec<_> = (1..=5).map(|day| PriceObservation::new(d(day), 50.0)).collect();
    let stats = series_metrics(&obs, Periodicity::Monthly, 0.01).unwrap();
    assert_eq!(stats.expected_return, 0.0);
    assert_eq!(stats.volatility, 0.0);
    assert_eq!(stats.sharpe_ratio, 0.0);
  }

  #[test]
  fn series_metrics_need_two_returns() {
    let obs = vec![PriceObservation::new(d(1), 1.0), PriceObservation::new(d(2), 1.1)];
    assert_eq!(
      series_metrics(&obs, Periodicity::Daily, 0.0).unwrap_err(),
      PortfolioError::InsufficientData {
        required: 2,
        actual: 1
      }
    );
  }

  fn two_asset_series(kind: ReturnKind, returns: Vec<f64>) -> ReturnSeries {
    ReturnSeries::from_returns(
      AssetUniverse::new(["A", "B"]).unwrap(),
      vec![d(2), d(3), d(4)],
      Array2::from_shape_vec((3, 2), returns).unwrap(),
      kind,
      Periodicity::Daily,
      1,
    )
    .unwrap()
  }

  #[test]
  fn cumulative_returns_compound_weighted_periods() {
    let series = two_asset_series(ReturnKind::Simple, vec![0.10, 0.0, -0.05, 0.02, 0.0, 0.04]);
    let weights = WeightVector::new(series.universe().clone(), vec![0.5, 0.5]).unwrap();
    let path = cumulative_returns(&weights, &series).unwrap();

    let expected = [1.05, 1.05 * 0.985, 1.05 * 0.985 * 1.02];
    assert_eq!(path.len(), 3);
    for ((date, value), (day, growth)) in path.iter().zip([(2, expected[0]), (3, expected[1]), (4, expected[2])]) {
      assert_eq!(*date, d(day));
      assert_abs_diff_eq!(*value, growth - 1.0, epsilon = 1e-12);
    }
  }

  #[test]
  fn log_returns_are_converted_before_weighting() {
    let ln2 = 2f64.ln();
    let series = two_asset_series(ReturnKind::Log, vec![ln2, 0.0, 0.0, 0.0, 0.0, 0.0]);
    let weights = WeightVector::new(series.universe().clone(), vec![0.5, 0.5]).unwrap();
    let path = cumulative_returns(&weights, &series).unwrap();
    assert_abs_diff_eq!(path[2].1, 0.5, epsilon = 1e-12);
  }

  #[test]
  fn cumulative_returns_reject_other_universes() {
    let series = two_asset_series(ReturnKind::Simple, vec![0.0; 6]);
    let weights = WeightVector::new(AssetUniverse::new(["A", "C"]).unwrap(), vec![0.5, 0.5]).unwrap();
    assert!(matches!(
      cumulative_returns(&weights, &series),
      Err(PortfolioError::InvalidInput(_))
    ));
  }
}
