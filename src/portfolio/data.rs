//! # Portfolio Data Utilities
//!
//! $$
//! r_{t,i} = \frac{p_{t,i}}{p_{t-1,i}} - 1 \quad\text{or}\quad \ln\frac{p_{t,i}}{p_{t-1,i}}
//! $$
//!
//! Price histories, date alignment and periodic return series.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use chrono::NaiveDate;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::Axis;
use tracing::debug;

use super::error::PortfolioError;
use super::error::Result;
use super::types::AssetUniverse;
use super::types::Periodicity;
use super::types::ReturnKind;

/// One dated price.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PriceObservation {
  pub date: NaiveDate,
  pub price: f64,
}

impl PriceObservation {
  pub fn new(date: NaiveDate, price: f64) -> Self {
    Self { date, price }
  }
}

/// Raw per-ticker price observations. Insertion order defines the
/// [`AssetUniverse`] ordering.
#[derive(Clone, Debug, Default)]
pub struct PriceHistory {
  series: Vec<(String, Vec<PriceObservation>)>,
}

impl PriceHistory {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add the observations of one ticker. Fails on a repeated ticker.
  pub fn insert(&mut self, ticker: impl Into<String>, observations: Vec<PriceObservation>) -> Result<()> {
    let ticker = ticker.into();
    if self.series.iter().any(|(t, _)| *t == ticker) {
      return Err(PortfolioError::invalid(format!("duplicate ticker {ticker}")));
    }
    self.series.push((ticker, observations));
    Ok(())
  }

  /// Builder form of [`PriceHistory::insert`].
  pub fn with_series(mut self, ticker: impl Into<String>, observations: Vec<PriceObservation>) -> Result<Self> {
    self.insert(ticker, observations)?;
    Ok(self)
  }

  pub fn len(&self) -> usize {
    self.series.len()
  }

  pub fn is_empty(&self) -> bool {
    self.series.is_empty()
  }

  pub fn universe(&self) -> Result<AssetUniverse> {
    AssetUniverse::new(self.series.iter().map(|(t, _)| t.clone()))
  }

  /// Take one ticker out of the history, e.g. to treat it as a benchmark.
  pub fn remove(&mut self, ticker: &str) -> Option<Vec<PriceObservation>> {
    let idx = self.series.iter().position(|(t, _)| t == ticker)?;
    Some(self.series.remove(idx).1)
  }

  pub fn observations(&self, ticker: &str) -> Option<&[PriceObservation]> {
    self
      .series
      .iter()
      .find(|(t, _)| t == ticker)
      .map(|(_, obs)| obs.as_slice())
  }
}

/// Policy for dates missing from some assets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GapPolicy {
  /// Keep only dates observed for every asset.
  #[default]
  Intersect,
  /// Use every date from the latest first observation onwards and carry the
  /// last known price forward. Never back-fills.
  ForwardFill,
}

/// Return preparation settings.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ReturnConfig {
  pub kind: ReturnKind,
  pub periodicity: Periodicity,
  pub gap_policy: GapPolicy,
  /// Minimum aligned return count; defaults to `max(2, 2 * assets)`.
  pub min_observations: Option<usize>,
}

impl ReturnConfig {
  pub fn required_observations(&self, assets: usize) -> usize {
    self
      .min_observations
      .unwrap_or_else(|| (2 * assets).max(2))
  }
}

/// Date-aligned periodic returns, one column per asset.
#[derive(Clone, Debug, PartialEq)]
pub struct ReturnSeries {
  universe: AssetUniverse,
  dates: Vec<NaiveDate>,
  returns: Array2<f64>,
  kind: ReturnKind,
  periodicity: Periodicity,
}

impl ReturnSeries {
  /// Wrap pre-computed returns (`T x N`, one column per asset).
  pub fn from_returns(
    universe: AssetUniverse,
    dates: Vec<NaiveDate>,
    returns: Array2<f64>,
    kind: ReturnKind,
    periodicity: Periodicity,
    min_observations: usize,
  ) -> Result<Self> {
    let (t, n) = returns.dim();
    if n != universe.len() {
      return Err(PortfolioError::invalid(format!(
        "return matrix has {n} columns for {} assets",
        universe.len()
      )));
    }
    if dates.len() != t {
      return Err(PortfolioError::invalid(format!(
        "{} dates for {t} return rows",
        dates.len()
      )));
    }
    if returns.iter().any(|r| !r.is_finite()) {
      return Err(PortfolioError::invalid("returns must be finite"));
    }
    if t < min_observations {
      return Err(PortfolioError::InsufficientData {
        required: min_observations,
        actual: t,
      });
    }

    Ok(Self {
      universe,
      dates,
      returns,
      kind,
      periodicity,
    })
  }

  pub fn universe(&self) -> &AssetUniverse {
    &self.universe
  }

  /// Period end dates, one per row.
  pub fn dates(&self) -> &[NaiveDate] {
    &self.dates
  }

  /// `T x N` return matrix.
  pub fn returns(&self) -> &Array2<f64> {
    &self.returns
  }

  pub fn kind(&self) -> ReturnKind {
    self.kind
  }

  pub fn periodicity(&self) -> Periodicity {
    self.periodicity
  }

  pub fn n_observations(&self) -> usize {
    self.returns.nrows()
  }

  pub fn n_assets(&self) -> usize {
    self.returns.ncols()
  }

  pub fn asset_returns(&self, ticker: &str) -> Option<ArrayView1<'_, f64>> {
    self
      .universe
      .index_of(ticker)
      .map(|i| self.returns.index_axis(Axis(1), i))
  }
}

/// Convert close prices to log-return series.
pub fn log_returns_series(closes: &[f64]) -> Vec<f64> {
  closes.windows(2).map(|w| (w[1] / w[0]).ln()).collect()
}

/// Convert close prices to simple-return series.
pub fn simple_returns_series(closes: &[f64]) -> Vec<f64> {
  closes.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

pub(crate) fn sorted_prices(ticker: &str, observations: &[PriceObservation]) -> Result<BTreeMap<NaiveDate, f64>> {
  let mut prices = BTreeMap::new();
  for obs in observations {
    if !obs.price.is_finite() || obs.price <= 0.0 {
      return Err(PortfolioError::invalid(format!(
        "{ticker}: price {} on {} must be finite and positive",
        obs.price, obs.date
      )));
    }
    if prices.insert(obs.date, obs.price).is_some() {
      return Err(PortfolioError::invalid(format!(
        "{ticker}: duplicate observation on {}",
        obs.date
      )));
    }
  }
  Ok(prices)
}

/// Align every asset on a common date grid according to `policy`.
///
/// Returns the grid and one price column per asset.
pub fn align_prices(
  per_asset: &[BTreeMap<NaiveDate, f64>],
  policy: GapPolicy,
) -> (Vec<NaiveDate>, Vec<Vec<f64>>) {
  match policy {
    GapPolicy::Intersect => {
      let mut common: BTreeSet<NaiveDate> = per_asset
        .first()
        .map(|p| p.keys().copied().collect())
        .unwrap_or_default();
      for prices in per_asset.iter().skip(1) {
        common.retain(|d| prices.contains_key(d));
      }
      let dates: Vec<NaiveDate> = common.into_iter().collect();
      let columns = per_asset
        .iter()
        .map(|prices| dates.iter().map(|d| prices[d]).collect())
        .collect();
      (dates, columns)
    }
    GapPolicy::ForwardFill => {
      let start = per_asset
        .iter()
        .filter_map(|p| p.keys().next().copied())
        .max();
      let Some(start) = start else {
        return (Vec::new(), vec![Vec::new(); per_asset.len()]);
      };
      let dates: Vec<NaiveDate> = per_asset
        .iter()
        .flat_map(|p| p.range(start..).map(|(d, _)| *d))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
      let columns = per_asset
        .iter()
        .map(|prices| {
          dates
            .iter()
            .map(|d| {
              prices
                .range(..=*d)
                .next_back()
                .map(|(_, p)| *p)
                .unwrap_or(f64::NAN)
            })
            .collect()
        })
        .collect();
      (dates, columns)
    }
  }
}

/// Turn raw price history into an aligned [`ReturnSeries`].
pub fn prepare_returns(history: &PriceHistory, config: &ReturnConfig) -> Result<ReturnSeries> {
  let universe = history.universe()?;
  let per_asset = history
    .series
    .iter()
    .map(|(ticker, obs)| sorted_prices(ticker, obs))
    .collect::<Result<Vec<_>>>()?;

  let required = config.required_observations(universe.len());
  if let Some(i) = per_asset.iter().position(BTreeMap::is_empty) {
    debug!(ticker = %universe.tickers()[i], "asset has no price observations");
    return Err(PortfolioError::InsufficientData { required, actual: 0 });
  }

  let (dates, columns) = align_prices(&per_asset, config.gap_policy);
  let periods = dates.len().saturating_sub(1);
  if periods < required {
    return Err(PortfolioError::InsufficientData {
      required,
      actual: periods,
    });
  }

  let mut returns = Array2::<f64>::zeros((periods, universe.len()));
  for (i, closes) in columns.iter().enumerate() {
    let series = match config.kind {
      ReturnKind::Simple => simple_returns_series(closes),
      ReturnKind::Log => log_returns_series(closes),
    };
    for (t, r) in series.into_iter().enumerate() {
      returns[[t, i]] = r;
    }
  }

  debug!(
    assets = universe.len(),
    observations = periods,
    policy = ?config.gap_policy,
    "prepared return series"
  );

  ReturnSeries::from_returns(
    universe,
    dates.into_iter().skip(1).collect(),
    returns,
    config.kind,
    config.periodicity,
    required,
  )
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
  }

  fn obs(points: &[(u32, f64)]) -> Vec<PriceObservation> {
    points
      .iter()
      .map(|&(day, p)| PriceObservation::new(d(day), p))
      .collect()
  }

  fn cfg(min: usize) -> ReturnConfig {
    ReturnConfig {
      min_observations: Some(min),
      ..ReturnConfig::default()
    }
  }

  #[test]
  fn intersect_drops_dates_missing_anywhere() {
    let history = PriceHistory::new()
      .with_series("A", obs(&[(2, 100.0), (3, 110.0), (4, 121.0), (5, 133.1)]))
      .unwrap()
      .with_series("B", obs(&[(2, 50.0), (4, 55.0), (5, 60.5)]))
      .unwrap();

    let series = prepare_returns(&history, &cfg(2)).unwrap();
    assert_eq!(series.dates(), &[d(4), d(5)]);
    let a = series.asset_returns("A").unwrap();
    assert_abs_diff_eq!(a[0], 0.21, epsilon = 1e-12);
    assert_abs_diff_eq!(a[1], 0.1, epsilon = 1e-12);
    let b = series.asset_returns("B").unwrap();
    assert_abs_diff_eq!(b[0], 0.1, epsilon = 1e-12);
  }

  #[test]
  fn forward_fill_carries_last_price_without_backfill() {
    let history = PriceHistory::new()
      .with_series("A", obs(&[(1, 90.0), (2, 100.0), (3, 110.0), (5, 121.0)]))
      .unwrap()
      .with_series("B", obs(&[(2, 50.0), (4, 55.0), (5, 55.0)]))
      .unwrap();

    let config = ReturnConfig {
      gap_policy: GapPolicy::ForwardFill,
      min_observations: Some(2),
      ..ReturnConfig::default()
    };
    let series = prepare_returns(&history, &config).unwrap();
    // Grid starts at B's first observation (day 2).
    assert_eq!(series.dates(), &[d(3), d(4), d(5)]);
    let a = series.asset_returns("A").unwrap();
    assert_abs_diff_eq!(a[0], 0.1, epsilon = 1e-12);
    assert_abs_diff_eq!(a[1], 0.0, epsilon = 1e-12);
    let b = series.asset_returns("B").unwrap();
    assert_abs_diff_eq!(b[0], 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(b[1], 0.1, epsilon = 1e-12);
  }

  #[test]
  fn log_returns_match_definition() {
    let r = log_returns_series(&[100.0, 110.0]);
    assert_abs_diff_eq!(r[0], (1.1f64).ln(), epsilon = 1e-15);
  }

  #[test]
  fn single_observation_is_insufficient() {
    let history = PriceHistory::new()
      .with_series("A", obs(&[(2, 100.0)]))
      .unwrap()
      .with_series("B", obs(&[(2, 50.0)]))
      .unwrap();

    let err = prepare_returns(&history, &ReturnConfig::default()).unwrap_err();
    assert_eq!(
      err,
      PortfolioError::InsufficientData {
        required: 4,
        actual: 0
      }
    );
  }

  #[test]
  fn asset_without_prices_is_insufficient_under_every_policy() {
    let history = PriceHistory::new()
      .with_series("A", obs(&(1..20).map(|day| (day, 100.0 + day as f64)).collect::<Vec<_>>()))
      .unwrap()
      .with_series("B", Vec::new())
      .unwrap();

    for gap_policy in [GapPolicy::Intersect, GapPolicy::ForwardFill] {
      let config = ReturnConfig {
        gap_policy,
        ..ReturnConfig::default()
      };
      assert_eq!(
        prepare_returns(&history, &config).unwrap_err(),
        PortfolioError::InsufficientData {
          required: 4,
          actual: 0
        },
        "{gap_policy:?}"
      );
    }
  }

  #[test]
  fn default_minimum_is_twice_the_asset_count() {
    let config = ReturnConfig::default();
    assert_eq!(config.required_observations(1), 2);
    assert_eq!(config.required_observations(5), 10);
  }

  #[test]
  fn rejects_bad_prices_and_duplicate_dates() {
    let history = PriceHistory::new()
      .with_series("A", obs(&[(2, 100.0), (3, -1.0)]))
      .unwrap();
    assert!(matches!(
      prepare_returns(&history, &cfg(1)),
      Err(PortfolioError::InvalidInput(_))
    ));

    let history = PriceHistory::new()
      .with_series("A", obs(&[(2, 100.0), (2, 101.0), (3, 102.0)]))
      .unwrap();
    assert!(matches!(
      prepare_returns(&history, &cfg(1)),
      Err(PortfolioError::InvalidInput(_))
    ));
  }

  #[test]
  fn duplicate_ticker_is_rejected() {
    let mut history = PriceHistory::new();
    history.insert("A", obs(&[(2, 1.0)])).unwrap();
    assert!(history.insert("A", obs(&[(3, 1.0)])).is_err());
  }

  #[test]
  fn removed_ticker_leaves_the_universe() {
    let mut history = PriceHistory::new()
      .with_series("A", obs(&[(2, 1.0)]))
      .unwrap()
      .with_series("B", obs(&[(2, 2.0), (3, 2.5)]))
      .unwrap();
    assert_eq!(history.remove("B").map(|o| o.len()), Some(2));
    assert!(history.remove("B").is_none());
    assert_eq!(history.universe().unwrap().tickers(), &["A"]);
  }

  #[test]
  fn from_returns_checks_shape() {
    let u = AssetUniverse::new(["A", "B"]).unwrap();
    let err = ReturnSeries::from_returns(
      u,
      vec![d(2)],
      Array2::zeros((1, 3)),
      ReturnKind::Simple,
      Periodicity::Daily,
      1,
    )
    .unwrap_err();
    assert!(matches!(err, PortfolioError::InvalidInput(_)));
  }
}
