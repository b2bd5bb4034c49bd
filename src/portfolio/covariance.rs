//! # Shrinkage Covariance
//!
//! $$
//! \hat\Sigma = \delta^\* F + (1-\delta^\*) S,\qquad
//! \delta^\* = \max\!\left(0, \min\!\left(1, \frac{\hat\pi-\hat\rho}{T\,\hat\gamma}\right)\right)
//! $$
//!
//! Ledoit-Wolf shrinkage of the sample covariance toward a structured target.
//! The intensity minimizes the expected Frobenius distance to the true
//! covariance and is computed in closed form from the returns; it is never a
//! free parameter.
//!
//! References: Ledoit & Wolf, "Honey, I Shrunk the Sample Covariance Matrix"
//! (2003, constant-correlation target) and "A well-conditioned estimator for
//! large-dimensional covariance matrices" (2004, scaled-identity target).

use nalgebra::DMatrix;
use nalgebra::DVector;
use ndarray::Array2;
use ndarray::Axis;
use tracing::debug;
use tracing::warn;

use super::data::ReturnSeries;
use super::error::PortfolioError;
use super::error::Result;
use super::types::AssetUniverse;

/// Smallest accepted Cholesky pivot, relative to the largest variance.
const PD_PIVOT_FLOOR: f64 = 1e-12;

/// Halvings of `1 - δ` tried before falling back to full shrinkage.
const MAX_ESCALATIONS: i32 = 8;

/// Structured matrix the sample covariance is shrunk toward.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShrinkageTarget {
  /// Sample variances with the average pairwise correlation everywhere else.
  #[default]
  ConstantCorrelation,
  /// Average variance times the identity.
  ConstantVariance,
}

impl ShrinkageTarget {
  /// Parse a string into a [`ShrinkageTarget`].
  pub fn parse(s: &str) -> Option<Self> {
    match s.to_lowercase().as_str() {
      "constant-correlation" | "constant_correlation" | "cc" => Some(Self::ConstantCorrelation),
      "constant-variance" | "constant_variance" | "identity" | "cv" => Some(Self::ConstantVariance),
      _ => None,
    }
  }
}

/// Annualized, symmetric, positive-definite covariance matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct CovarianceMatrix {
  universe: AssetUniverse,
  matrix: DMatrix<f64>,
  shrinkage: f64,
  target: Option<ShrinkageTarget>,
}

impl CovarianceMatrix {
  /// Wrap an externally supplied annualized covariance matrix.
  pub fn new(universe: AssetUniverse, matrix: DMatrix<f64>) -> Result<Self> {
    let n = universe.len();
    if matrix.nrows() != n || matrix.ncols() != n {
      return Err(PortfolioError::invalid(format!(
        "covariance is {}x{}, expected {n}x{n}",
        matrix.nrows(),
        matrix.ncols()
      )));
    }
    if matrix != matrix.transpose() {
      return Err(PortfolioError::CovarianceEstimation(
        "covariance matrix is not symmetric".to_string(),
      ));
    }
    if !is_positive_definite(&matrix) {
      return Err(PortfolioError::CovarianceEstimation(
        "covariance matrix is not positive-definite".to_string(),
      ));
    }

    Ok(Self {
      universe,
      matrix,
      shrinkage: 0.0,
      target: None,
    })
  }

  pub fn universe(&self) -> &AssetUniverse {
    &self.universe
  }

  pub fn matrix(&self) -> &DMatrix<f64> {
    &self.matrix
  }

  /// Shrinkage intensity applied, in `[0, 1]`.
  pub fn shrinkage(&self) -> f64 {
    self.shrinkage
  }

  /// Target used, `None` for externally supplied matrices.
  pub fn target(&self) -> Option<ShrinkageTarget> {
    self.target
  }

  /// Annualized per-asset volatilities.
  pub fn volatilities(&self) -> DVector<f64> {
    self.matrix.diagonal().map(|v| v.max(0.0).sqrt())
  }
}

/// Cholesky decomposability with a pivot floor relative to the largest
/// diagonal entry, so numerically singular matrices are rejected.
pub fn is_positive_definite(m: &DMatrix<f64>) -> bool {
  if !m.is_square() || m.is_empty() {
    return false;
  }
  let max_diag = m.diagonal().max();
  if !max_diag.is_finite() || max_diag <= 0.0 {
    return false;
  }

  match m.clone().cholesky() {
    Some(chol) => chol
      .l()
      .diagonal()
      .iter()
      .all(|l| l * l >= PD_PIVOT_FLOOR * max_diag),
    None => false,
  }
}

/// Demeaned returns and the per-period sample covariance `XmᵀXm / T`.
fn centered_moments(series: &ReturnSeries) -> Result<(Array2<f64>, Array2<f64>)> {
  let x = series.returns();
  let t = x.nrows();
  if t < 2 {
    return Err(PortfolioError::InsufficientData {
      required: 2,
      actual: t,
    });
  }

  let mean = x
    .mean_axis(Axis(0))
    .ok_or_else(|| PortfolioError::invalid("empty return series"))?;
  let xm = x - &mean;
  let s = xm.t().dot(&xm) / t as f64;

  let max_var = s.diag().fold(0.0f64, |acc, v| acc.max(*v));
  for (ticker, v) in series.universe().iter().zip(s.diag().iter()) {
    if *v <= 0.0 || *v < 1e-12 * max_var {
      return Err(PortfolioError::CovarianceEstimation(format!(
        "{ticker} has zero return variance"
      )));
    }
  }

  Ok((xm, s))
}

/// Exactly symmetric, annualized copy of `a`.
fn annualized(a: &Array2<f64>, factor: f64) -> DMatrix<f64> {
  let n = a.nrows();
  DMatrix::from_fn(n, n, |i, j| 0.5 * (a[[i, j]] + a[[j, i]]) * factor)
}

/// Annualized sample covariance (`1/T` normalization), i.e. the zero-intensity
/// end of the shrinkage path.
pub fn sample_covariance(series: &ReturnSeries) -> Result<DMatrix<f64>> {
  let (_, s) = centered_moments(series)?;
  Ok(annualized(&s, series.periodicity().periods_per_year()))
}

/// Ledoit-Wolf shrinkage estimator.
#[derive(Clone, Copy, Debug, Default)]
pub struct LedoitWolf {
  target: ShrinkageTarget,
}

impl LedoitWolf {
  pub fn new(target: ShrinkageTarget) -> Self {
    Self { target }
  }

  pub fn target(&self) -> ShrinkageTarget {
    self.target
  }

  /// Analytical optimal intensity, clipped to `[0, 1]`.
  pub fn shrinkage_intensity(&self, series: &ReturnSeries) -> Result<f64> {
    let (xm, s) = centered_moments(series)?;
    Ok(self.target_and_intensity(&xm, &s).1)
  }

  /// Annualized shrinkage target, the full-intensity end of the path.
  pub fn target_matrix(&self, series: &ReturnSeries) -> Result<DMatrix<f64>> {
    let (xm, s) = centered_moments(series)?;
    let (f, _) = self.target_and_intensity(&xm, &s);
    Ok(annualized(&f, series.periodicity().periods_per_year()))
  }

  /// Shrunk, annualized covariance. If the optimal blend is not
  /// positive-definite the intensity is raised toward 1; failing at full
  /// shrinkage is an error.
  pub fn estimate(&self, series: &ReturnSeries) -> Result<CovarianceMatrix> {
    let (xm, s) = centered_moments(series)?;
    let (f, intensity) = self.target_and_intensity(&xm, &s);
    let factor = series.periodicity().periods_per_year();

    for delta in escalation_schedule(intensity) {
      let blended = &f * delta + &s * (1.0 - delta);
      let matrix = annualized(&blended, factor);
      if !is_positive_definite(&matrix) {
        continue;
      }

      if delta > intensity {
        warn!(
          optimal = intensity,
          applied = delta,
          "raised shrinkage intensity to restore positive-definiteness"
        );
      }
      debug!(
        shrinkage_target = ?self.target,
        shrinkage = delta,
        observations = series.n_observations(),
        assets = series.n_assets(),
        "estimated shrinkage covariance"
      );

      return Ok(CovarianceMatrix {
        universe: series.universe().clone(),
        matrix,
        shrinkage: delta,
        target: Some(self.target),
      });
    }

    Err(PortfolioError::CovarianceEstimation(
      "covariance is not positive-definite even at full shrinkage; check for duplicate or perfectly correlated assets"
        .to_string(),
    ))
  }

  fn target_and_intensity(&self, xm: &Array2<f64>, s: &Array2<f64>) -> (Array2<f64>, f64) {
    match self.target {
      ShrinkageTarget::ConstantCorrelation => constant_correlation(xm, s),
      ShrinkageTarget::ConstantVariance => constant_variance(xm, s),
    }
  }
}

fn escalation_schedule(intensity: f64) -> Vec<f64> {
  let mut schedule = vec![intensity];
  schedule.extend((1..=MAX_ESCALATIONS).map(|k| 1.0 - (1.0 - intensity) / 2f64.powi(k)));
  schedule.push(1.0);
  schedule
}

/// Constant-correlation target and its optimal intensity.
fn constant_correlation(xm: &Array2<f64>, s: &Array2<f64>) -> (Array2<f64>, f64) {
  let (t_len, n) = xm.dim();
  let t = t_len as f64;
  let std: Vec<f64> = (0..n).map(|i| s[[i, i]].sqrt()).collect();

  let r_bar = if n > 1 {
    let mut acc = 0.0;
    for i in 0..n {
      for j in 0..n {
        if i != j {
          acc += s[[i, j]] / (std[i] * std[j]);
        }
      }
    }
    acc / (n * (n - 1)) as f64
  } else {
    0.0
  };

  let f = Array2::from_shape_fn((n, n), |(i, j)| {
    if i == j {
      s[[i, i]]
    } else {
      r_bar * std[i] * std[j]
    }
  });

  // pi_ij = E[(x_i x_j - s_ij)^2], theta_ij = E[(x_i^2 - s_ii)(x_i x_j - s_ij)]
  let mut pi = Array2::<f64>::zeros((n, n));
  let mut theta = Array2::<f64>::zeros((n, n));
  for row in xm.rows() {
    for i in 0..n {
      let sq = row[i] * row[i] - s[[i, i]];
      for j in 0..n {
        let cross = row[i] * row[j] - s[[i, j]];
        pi[[i, j]] += cross * cross;
        if i != j {
          theta[[i, j]] += sq * cross;
        }
      }
    }
  }
  pi /= t;
  theta /= t;

  let pi_hat = pi.sum();
  let mut rho_hat = pi.diag().sum();
  for i in 0..n {
    for j in 0..n {
      if i != j {
        rho_hat += r_bar * (std[j] / std[i]) * theta[[i, j]];
      }
    }
  }
  let gamma_hat = (s - &f).mapv(|v| v * v).sum();

  let intensity = if gamma_hat <= f64::EPSILON * s.diag().sum().powi(2) {
    0.0
  } else {
    ((pi_hat - rho_hat) / gamma_hat / t).clamp(0.0, 1.0)
  };

  (f, intensity)
}

/// Scaled-identity target and its optimal intensity.
fn constant_variance(xm: &Array2<f64>, s: &Array2<f64>) -> (Array2<f64>, f64) {
  let (t_len, n) = xm.dim();
  let t = t_len as f64;
  let mu = s.diag().sum() / n as f64;
  let f = Array2::<f64>::eye(n) * mu;

  // Dispersion of S around the target, per asset.
  let delta = (s - &f).mapv(|v| v * v).sum() / n as f64;
  // Mean squared deviation of the per-period outer products from S, per asset.
  let beta = xm
    .rows()
    .into_iter()
    .map(|row| {
      let norm_sq: f64 = row.iter().map(|v| v * v).sum();
      norm_sq * norm_sq
    })
    .sum::<f64>()
    / t;
  let beta = ((beta - s.mapv(|v| v * v).sum()) / (n as f64 * t)).min(delta);

  let intensity = if delta <= f64::EPSILON * mu * mu {
    0.0
  } else {
    (beta / delta).clamp(0.0, 1.0)
  };

  (f, intensity)
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use chrono::Days;
  use chrono::NaiveDate;
  use rand::rngs::StdRng;
  use rand::SeedableRng;
  use rand_distr::Distribution;
  use rand_distr::StandardNormal;

  use super::*;
  use crate::portfolio::types::Periodicity;
  use crate::portfolio::types::ReturnKind;

  /// `t` draws of correlated returns: assets 0/1 and 2/3 are strongly
  /// correlated pairs, the pairs are independent of each other.
  fn correlated_series(t: usize, seed: u64) -> ReturnSeries {
    let chol = [
      [1.0, 0.0, 0.0, 0.0],
      [0.8, 0.6, 0.0, 0.0],
      [0.0, 0.0, 1.0, 0.0],
      [0.0, 0.0, 0.8, 0.6],
    ];
    let vols = [0.010, 0.015, 0.020, 0.012];
    let mut rng = StdRng::seed_from_u64(seed);
    let mut returns = Array2::<f64>::zeros((t, 4));
    for mut row in returns.rows_mut() {
      let z: Vec<f64> = (0..4).map(|_| StandardNormal.sample(&mut rng)).collect();
      for i in 0..4 {
        let e: f64 = (0..4).map(|k| chol[i][k] * z[k]).sum();
        row[i] = 0.0004 + vols[i] * e;
      }
    }
    series_from(returns)
  }

  fn series_from(returns: Array2<f64>) -> ReturnSeries {
    let n = returns.ncols();
    let tickers: Vec<String> = (0..n).map(|i| format!("A{i}")).collect();
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    let dates = (0..returns.nrows())
      .map(|k| start.checked_add_days(Days::new(k as u64)).unwrap())
      .collect();
    ReturnSeries::from_returns(
      AssetUniverse::new(tickers).unwrap(),
      dates,
      returns,
      ReturnKind::Simple,
      Periodicity::Daily,
      2,
    )
    .unwrap()
  }

  #[test]
  fn shrunk_matrix_is_symmetric_and_positive_definite() {
    for target in [ShrinkageTarget::ConstantCorrelation, ShrinkageTarget::ConstantVariance] {
      let series = correlated_series(60, 7);
      let cov = LedoitWolf::new(target).estimate(&series).unwrap();
      let m = cov.matrix();
      assert_eq!(m, &m.transpose());
      let eigen = m.clone().symmetric_eigen();
      assert!(eigen.eigenvalues.iter().all(|&l| l > 0.0));
      assert!((0.0..=1.0).contains(&cov.shrinkage()));
    }
  }

  #[test]
  fn shrunk_matrix_lies_between_sample_and_target() {
    let series = correlated_series(40, 11);
    let lw = LedoitWolf::default();
    let cov = lw.estimate(&series).unwrap();
    let sample = sample_covariance(&series).unwrap();
    let target = lw.target_matrix(&series).unwrap();
    let delta = cov.shrinkage();

    for i in 0..4 {
      for j in 0..4 {
        let expected = delta * target[(i, j)] + (1.0 - delta) * sample[(i, j)];
        assert_abs_diff_eq!(cov.matrix()[(i, j)], expected, epsilon = 1e-12);
        let lo = sample[(i, j)].min(target[(i, j)]);
        let hi = sample[(i, j)].max(target[(i, j)]);
        assert!(cov.matrix()[(i, j)] >= lo - 1e-12 && cov.matrix()[(i, j)] <= hi + 1e-12);
      }
    }
  }

  #[test]
  fn fewer_observations_do_not_decrease_intensity() {
    let lw = LedoitWolf::default();
    let noisy = lw.shrinkage_intensity(&correlated_series(16, 3)).unwrap();
    let clean = lw.shrinkage_intensity(&correlated_series(4000, 3)).unwrap();
    assert!(noisy >= clean, "noisy {noisy} < clean {clean}");
    assert!(clean < 0.1);
  }

  #[test]
  fn single_asset_needs_no_shrinkage() {
    let returns = Array2::from_shape_vec((4, 1), vec![0.01, -0.02, 0.015, 0.0]).unwrap();
    let cov = LedoitWolf::default().estimate(&series_from(returns)).unwrap();
    assert_eq!(cov.shrinkage(), 0.0);
  }

  #[test]
  fn duplicate_assets_fail_even_at_full_shrinkage() {
    let col = [0.01, -0.02, 0.015, 0.0, 0.004, -0.007];
    let returns = Array2::from_shape_fn((6, 2), |(t, _)| col[t]);
    let err = LedoitWolf::default()
      .estimate(&series_from(returns))
      .unwrap_err();
    assert!(matches!(err, PortfolioError::CovarianceEstimation(_)));
  }

  #[test]
  fn constant_asset_is_rejected() {
    let returns = Array2::from_shape_fn((6, 2), |(t, i)| if i == 0 { 0.0 } else { t as f64 * 0.01 });
    let err = LedoitWolf::default()
      .estimate(&series_from(returns))
      .unwrap_err();
    assert!(matches!(err, PortfolioError::CovarianceEstimation(_)));
  }

  #[test]
  fn external_matrix_validation() {
    let u = AssetUniverse::new(["A", "B"]).unwrap();
    let asym = DMatrix::from_row_slice(2, 2, &[0.04, 0.01, 0.02, 0.09]);
    assert!(CovarianceMatrix::new(u.clone(), asym).is_err());
    let singular = DMatrix::from_row_slice(2, 2, &[0.04, 0.06, 0.06, 0.09]);
    assert!(CovarianceMatrix::new(u.clone(), singular).is_err());
    let ok = DMatrix::from_row_slice(2, 2, &[0.04, 0.01, 0.01, 0.09]);
    let cov = CovarianceMatrix::new(u, ok).unwrap();
    assert_abs_diff_eq!(cov.volatilities()[1], 0.3, epsilon = 1e-15);
  }

  #[test]
  fn estimation_is_deterministic() {
    let series = correlated_series(50, 5);
    let a = LedoitWolf::default().estimate(&series).unwrap();
    let b = LedoitWolf::default().estimate(&series).unwrap();
    assert_eq!(a, b);
  }
}
