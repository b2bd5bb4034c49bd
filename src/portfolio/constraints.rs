//! # Portfolio Constraints
//!
//! $$
//! \mathbf 1^\top\mathbf w = 1,\qquad l_i \le w_i \le u_i,\qquad
//! L_g \le \sum_{i\in g} w_i \le U_g
//! $$
//!
//! Ticker-level constraint description and its index-based resolution into
//! linear rows, both in weight space and in the homogeneous space used by the
//! maximum-Sharpe reformulation.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use nalgebra::DVector;

use super::error::PortfolioError;
use super::error::Result;
use super::types::AssetUniverse;
use crate::qp::LinearConstraint;
use crate::qp::QuadraticProgram;

/// Slack allowed when checking that bounds can add up to a fully invested book.
const BUDGET_TOLERANCE: f64 = 1e-9;

/// Closed interval `[lower, upper]` for a single weight.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WeightBounds {
  pub lower: f64,
  pub upper: f64,
}

impl WeightBounds {
  pub fn new(lower: f64, upper: f64) -> Self {
    Self { lower, upper }
  }
}

impl Default for WeightBounds {
  fn default() -> Self {
    Self::new(0.0, 1.0)
  }
}

/// Limits on the combined weight of a named set of tickers (e.g. a sector).
#[derive(Clone, Debug, PartialEq)]
pub struct GroupConstraint {
  pub name: String,
  pub members: Vec<String>,
  pub lower: Option<f64>,
  pub upper: Option<f64>,
}

impl GroupConstraint {
  pub fn new<I, S>(name: impl Into<String>, members: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      name: name.into(),
      members: members.into_iter().map(Into::into).collect(),
      lower: None,
      upper: None,
    }
  }

  pub fn with_lower(mut self, lower: f64) -> Self {
    self.lower = Some(lower);
    self
  }

  pub fn with_upper(mut self, upper: f64) -> Self {
    self.upper = Some(upper);
    self
  }
}

/// Feasible-set description supplied by the caller.
///
/// When `fully_invested` is false the weights may sum to less than one and the
/// remainder is held in cash.
#[derive(Clone, Debug, PartialEq)]
pub struct Constraints {
  /// Forbid negative weights. Lower bounds below zero are raised to zero.
  pub long_only: bool,
  /// Require weights to sum to exactly one.
  pub fully_invested: bool,
  /// Bounds for every ticker without an override.
  pub default_bounds: WeightBounds,
  /// Per-ticker overrides of `default_bounds`.
  pub asset_bounds: BTreeMap<String, WeightBounds>,
  pub groups: Vec<GroupConstraint>,
}

impl Default for Constraints {
  fn default() -> Self {
    Self {
      long_only: true,
      fully_invested: true,
      default_bounds: WeightBounds::default(),
      asset_bounds: BTreeMap::new(),
      groups: Vec::new(),
    }
  }
}

impl Constraints {
  /// Fully invested book allowing shorts down to `-1` per asset.
  pub fn long_short() -> Self {
    Self {
      long_only: false,
      default_bounds: WeightBounds::new(-1.0, 1.0),
      ..Self::default()
    }
  }

  pub fn with_default_bounds(mut self, lower: f64, upper: f64) -> Self {
    self.default_bounds = WeightBounds::new(lower, upper);
    self
  }

  pub fn with_bounds(mut self, ticker: impl Into<String>, lower: f64, upper: f64) -> Self {
    self
      .asset_bounds
      .insert(ticker.into(), WeightBounds::new(lower, upper));
    self
  }

  pub fn with_group(mut self, group: GroupConstraint) -> Self {
    self.groups.push(group);
    self
  }

  /// Map tickers to indices of `universe` and validate the result.
  pub fn resolve(&self, universe: &AssetUniverse) -> Result<ResolvedConstraints> {
    for ticker in self.asset_bounds.keys() {
      if universe.index_of(ticker).is_none() {
        return Err(PortfolioError::invalid(format!(
          "bounds given for unknown ticker {ticker}"
        )));
      }
    }

    let mut lower = Vec::with_capacity(universe.len());
    let mut upper = Vec::with_capacity(universe.len());
    for ticker in universe.iter() {
      let b = self
        .asset_bounds
        .get(ticker)
        .copied()
        .unwrap_or(self.default_bounds);
      if !b.lower.is_finite() || !b.upper.is_finite() {
        return Err(PortfolioError::invalid(format!(
          "{ticker}: weight bounds must be finite"
        )));
      }
      let l = if self.long_only { b.lower.max(0.0) } else { b.lower };
      if l > b.upper {
        return Err(PortfolioError::invalid(format!(
          "{ticker}: lower bound {l} exceeds upper bound {}",
          b.upper
        )));
      }
      lower.push(l);
      upper.push(b.upper);
    }

    let groups = self
      .groups
      .iter()
      .map(|g| resolve_group(g, universe))
      .collect::<Result<Vec<_>>>()?;

    let lower_sum: f64 = lower.iter().sum();
    let upper_sum: f64 = upper.iter().sum();
    if lower_sum > 1.0 + BUDGET_TOLERANCE {
      return Err(PortfolioError::invalid(format!(
        "lower bounds sum to {lower_sum}, above the budget of 1"
      )));
    }
    if self.fully_invested && upper_sum < 1.0 - BUDGET_TOLERANCE {
      return Err(PortfolioError::invalid(format!(
        "upper bounds sum to {upper_sum}, a fully invested portfolio is impossible"
      )));
    }

    Ok(ResolvedConstraints {
      long_only: self.long_only,
      fully_invested: self.fully_invested,
      lower,
      upper,
      groups,
    })
  }
}

fn resolve_group(group: &GroupConstraint, universe: &AssetUniverse) -> Result<ResolvedGroup> {
  if group.members.is_empty() {
    return Err(PortfolioError::invalid(format!(
      "group {} has no members",
      group.name
    )));
  }
  let mut members = BTreeSet::new();
  for ticker in &group.members {
    let idx = universe.index_of(ticker).ok_or_else(|| {
      PortfolioError::invalid(format!("group {}: unknown ticker {ticker}", group.name))
    })?;
    if !members.insert(idx) {
      return Err(PortfolioError::invalid(format!(
        "group {}: ticker {ticker} listed twice",
        group.name
      )));
    }
  }
  if group.lower.is_some_and(|l| !l.is_finite()) || group.upper.is_some_and(|u| !u.is_finite()) {
    return Err(PortfolioError::invalid(format!(
      "group {}: limits must be finite",
      group.name
    )));
  }
  if let (Some(l), Some(u)) = (group.lower, group.upper) {
    if l > u {
      return Err(PortfolioError::invalid(format!(
        "group {}: lower limit {l} exceeds upper limit {u}",
        group.name
      )));
    }
  }

  Ok(ResolvedGroup {
    name: group.name.clone(),
    members: members.into_iter().collect(),
    lower: group.lower,
    upper: group.upper,
  })
}

/// Group limits expressed with universe indices.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedGroup {
  pub name: String,
  pub members: Vec<usize>,
  pub lower: Option<f64>,
  pub upper: Option<f64>,
}

impl ResolvedGroup {
  fn indicator(&self, n: usize) -> DVector<f64> {
    let mut row = DVector::zeros(n);
    for &i in &self.members {
      row[i] = 1.0;
    }
    row
  }
}

/// Constraints resolved against a concrete universe.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedConstraints {
  long_only: bool,
  fully_invested: bool,
  lower: Vec<f64>,
  upper: Vec<f64>,
  groups: Vec<ResolvedGroup>,
}

impl ResolvedConstraints {
  pub fn dim(&self) -> usize {
    self.lower.len()
  }

  pub fn long_only(&self) -> bool {
    self.long_only
  }

  pub fn fully_invested(&self) -> bool {
    self.fully_invested
  }

  pub fn lower(&self) -> &[f64] {
    &self.lower
  }

  pub fn upper(&self) -> &[f64] {
    &self.upper
  }

  pub fn groups(&self) -> &[ResolvedGroup] {
    &self.groups
  }

  /// Add the budget, bound and group rows to a program over the weights.
  pub fn apply(&self, mut qp: QuadraticProgram) -> QuadraticProgram {
    let n = self.dim();
    let ones = DVector::from_element(n, 1.0);
    qp = if self.fully_invested {
      qp.subject_to_eq(ones, 1.0)
    } else {
      qp.subject_to_le(ones, 1.0)
    };

    for i in 0..n {
      qp = qp
        .subject_to_ge(unit(n, i), self.lower[i])
        .subject_to_le(unit(n, i), self.upper[i]);
    }

    for g in &self.groups {
      if let Some(l) = g.lower {
        qp = qp.subject_to_ge(g.indicator(n), l);
      }
      if let Some(u) = g.upper {
        qp = qp.subject_to_le(g.indicator(n), u);
      }
    }
    qp
  }

  /// Fail with [`PortfolioError::UnsupportedConstraint`] unless the
  /// homogeneous max-Sharpe reformulation is exact for this set.
  pub fn supports_max_sharpe(&self) -> Result<()> {
    if !self.long_only {
      return Err(PortfolioError::UnsupportedConstraint(
        "short positions are not allowed in the max-Sharpe program".to_string(),
      ));
    }
    if !self.fully_invested {
      return Err(PortfolioError::UnsupportedConstraint(
        "the max-Sharpe program needs a fully invested portfolio".to_string(),
      ));
    }
    if let Some(i) = self.lower.iter().position(|l| *l < 0.0) {
      return Err(PortfolioError::UnsupportedConstraint(format!(
        "negative lower bound for asset {i}"
      )));
    }
    Ok(())
  }

  /// Rows `gᵀy >= 0` describing the cone `{κw : w feasible, κ > 0}`.
  ///
  /// Bounds become `yᵢ - lᵢ·Σy >= 0` and `uᵢ·Σy - yᵢ >= 0`; group limits are
  /// homogenized the same way. Rows that can never bind are skipped.
  pub fn homogeneous_rows(&self) -> Vec<LinearConstraint> {
    let n = self.dim();
    let ones = DVector::from_element(n, 1.0);
    let mut rows: Vec<LinearConstraint> = (0..n).map(|i| LinearConstraint::new(unit(n, i), 0.0)).collect();

    for i in 0..n {
      if self.lower[i] > 0.0 {
        rows.push(LinearConstraint::new(unit(n, i) - &ones * self.lower[i], 0.0));
      }
      if self.upper[i] < 1.0 {
        rows.push(LinearConstraint::new(&ones * self.upper[i] - unit(n, i), 0.0));
      }
    }

    for g in &self.groups {
      let indicator = g.indicator(n);
      if let Some(l) = g.lower.filter(|l| *l > 0.0) {
        rows.push(LinearConstraint::new(&indicator - &ones * l, 0.0));
      }
      if let Some(u) = g.upper.filter(|u| *u < 1.0) {
        rows.push(LinearConstraint::new(&ones * u - &indicator, 0.0));
      }
    }
    rows
  }

  /// Check `weights` against every row within `tol`.
  pub fn is_satisfied(&self, weights: &[f64], tol: f64) -> bool {
    if weights.len() != self.dim() || weights.iter().any(|w| !w.is_finite()) {
      return false;
    }
    let total: f64 = weights.iter().sum();
    let budget_ok = if self.fully_invested {
      (total - 1.0).abs() <= tol
    } else {
      total <= 1.0 + tol
    };
    let bounds_ok = weights
      .iter()
      .zip(self.lower.iter().zip(&self.upper))
      .all(|(w, (l, u))| *w >= l - tol && *w <= u + tol);
    let groups_ok = self.groups.iter().all(|g| {
      let s: f64 = g.members.iter().map(|&i| weights[i]).sum();
      g.lower.map_or(true, |l| s >= l - tol) && g.upper.map_or(true, |u| s <= u + tol)
    });
    budget_ok && bounds_ok && groups_ok
  }
}

fn unit(n: usize, i: usize) -> DVector<f64> {
  let mut e = DVector::zeros(n);
  e[i] = 1.0;
  e
}
