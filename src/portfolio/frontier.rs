//! # Efficient Frontier
//!
//! $$
//! \min_{\mathbf w}\ \mathbf w^\top\Sigma\mathbf w
//! \quad\text{s.t.}\quad \mu^\top\mathbf w = r,\ \mathbf w\in\mathcal W
//! $$
//!
//! Mean-variance programs over a resolved constraint set. Maximum Sharpe uses
//! the homogeneous substitution `y = κw`, `κ = Σy`:
//!
//! $$
//! \min_{\mathbf y}\ \mathbf y^\top\Sigma\mathbf y
//! \quad\text{s.t.}\quad (\mu - r_f\mathbf 1)^\top\mathbf y = 1,\ \mathbf y\in\kappa\mathcal W
//! $$
//!
//! which is exact for long-only, fully invested books.

use nalgebra::DMatrix;
use nalgebra::DVector;
use tracing::debug;

use super::constraints::Constraints;
use super::constraints::ResolvedConstraints;
use super::covariance::CovarianceMatrix;
use super::error::PortfolioError;
use super::error::Result;
use super::expected_returns::ExpectedReturns;
use super::types::AssetUniverse;
use super::types::FrontierCurve;
use super::types::FrontierPoint;
use super::types::PortfolioStatistics;
use super::types::WeightVector;
use crate::qp::ActiveSetSolver;
use crate::qp::QpError;
use crate::qp::QuadraticProgram;
use crate::qp::SolverBudget;

/// Curvature of the min/max-return programs. The projection they compute
/// lands on the extreme face whenever expected returns differ by more than
/// this.
const RETURN_REGULARIZATION: f64 = 1e-5;

/// Smallest `Σy` accepted when mapping a max-Sharpe solution back to weights.
const MIN_SCALE: f64 = 1e-12;

/// Mean-variance solver for one set of estimates and constraints.
#[derive(Clone, Debug)]
pub struct FrontierSolver {
  mu: ExpectedReturns,
  cov: CovarianceMatrix,
  constraints: ResolvedConstraints,
  risk_free_rate: f64,
  solver: ActiveSetSolver,
}

impl FrontierSolver {
  pub fn new(
    mu: ExpectedReturns,
    cov: CovarianceMatrix,
    constraints: &Constraints,
    risk_free_rate: f64,
    budget: SolverBudget,
  ) -> Result<Self> {
    if mu.universe() != cov.universe() {
      return Err(PortfolioError::invalid(format!(
        "expected returns cover {} but covariance covers {}",
        mu.universe(),
        cov.universe()
      )));
    }
    if !risk_free_rate.is_finite() {
      return Err(PortfolioError::invalid("risk-free rate must be finite"));
    }
    let constraints = constraints.resolve(mu.universe())?;

    Ok(Self {
      mu,
      cov,
      constraints,
      risk_free_rate,
      solver: ActiveSetSolver::new(budget),
    })
  }

  pub fn universe(&self) -> &AssetUniverse {
    self.mu.universe()
  }

  pub fn constraints(&self) -> &ResolvedConstraints {
    &self.constraints
  }

  pub fn risk_free_rate(&self) -> f64 {
    self.risk_free_rate
  }

  /// Return, volatility and Sharpe ratio of raw weights.
  pub fn statistics(&self, weights: &DVector<f64>) -> PortfolioStatistics {
    PortfolioStatistics::compute(weights, self.mu.values(), self.cov.matrix(), self.risk_free_rate)
  }

  /// Minimum-variance program with `μᵀw = target`.
  pub fn target_return_program(&self, target: f64) -> QuadraticProgram {
    let n = self.universe().len();
    let qp = QuadraticProgram::new(self.cov.matrix().clone(), DVector::zeros(n))
      .subject_to_eq(self.mu.values().clone(), target);
    self.constraints.apply(qp)
  }

  /// Minimum-variance portfolio earning exactly `target`.
  pub fn solve_for_target_return(&self, target: f64) -> Result<FrontierPoint> {
    if !target.is_finite() {
      return Err(PortfolioError::invalid("target return must be finite"));
    }
    let solution = self
      .solver
      .solve(&self.target_return_program(target))
      .map_err(|err| match err {
        QpError::Infeasible => PortfolioError::InfeasibleTarget { target },
        other => PortfolioError::from_solver(other),
      })?;
    debug!(target, iterations = solution.iterations, "target return solved");
    self.point(solution.x)
  }

  /// Homogeneous max-Sharpe program over `y = κw`.
  pub fn max_sharpe_program(&self) -> Result<QuadraticProgram> {
    self.constraints.supports_max_sharpe()?;
    let excess = self.mu.values().add_scalar(-self.risk_free_rate);
    if excess.iter().all(|e| *e <= 0.0) {
      return Err(PortfolioError::NoProfitableSolution {
        risk_free_rate: self.risk_free_rate,
      });
    }

    let n = self.universe().len();
    let mut qp = QuadraticProgram::new(self.cov.matrix().clone(), DVector::zeros(n)).subject_to_eq(excess, 1.0);
    for row in self.constraints.homogeneous_rows() {
      qp = qp.subject_to_ge(row.coefficients, row.rhs);
    }
    Ok(qp)
  }

  /// Tangency portfolio: highest `(μᵀw - r_f) / σ` over the feasible set.
  ///
  /// An empty feasible set is reported as [`PortfolioError::InvalidInput`];
  /// [`PortfolioError::NoProfitableSolution`] only when feasible portfolios
  /// exist but none earns more than the risk-free rate.
  pub fn solve_max_sharpe(&self) -> Result<FrontierPoint> {
    let qp = self
      .max_sharpe_program()
      .map_err(|err| self.unless_infeasible(err))?;
    let solution = match self.solver.solve(&qp) {
      Ok(solution) => solution,
      Err(QpError::Infeasible) => return Err(self.unless_infeasible(self.no_profit())),
      Err(other) => return Err(PortfolioError::from_solver(other)),
    };

    let scale = solution.x.sum();
    if scale <= MIN_SCALE {
      return Err(self.no_profit());
    }
    debug!(iterations = solution.iterations, scale, "max sharpe solved");
    self.point(solution.x / scale)
  }

  fn no_profit(&self) -> PortfolioError {
    PortfolioError::NoProfitableSolution {
      risk_free_rate: self.risk_free_rate,
    }
  }

  /// Keep `err` if the weight-space constraints admit a portfolio, otherwise
  /// report the empty feasible set instead.
  fn unless_infeasible(&self, err: PortfolioError) -> PortfolioError {
    if !matches!(err, PortfolioError::NoProfitableSolution { .. }) {
      return err;
    }
    match self.min_volatility() {
      Ok(_) => err,
      Err(feasibility) => feasibility,
    }
  }

  /// Global minimum-variance portfolio.
  pub fn min_volatility(&self) -> Result<FrontierPoint> {
    let n = self.universe().len();
    let qp = self
      .constraints
      .apply(QuadraticProgram::new(self.cov.matrix().clone(), DVector::zeros(n)));
    let solution = self.solver.solve(&qp).map_err(PortfolioError::from_solver)?;
    self.point(solution.x)
  }

  /// Highest-return feasible portfolio, from `max μᵀw` with a vanishing
  /// `εI` curvature term so the active-set solver applies.
  pub fn max_return(&self) -> Result<FrontierPoint> {
    self.extreme_return(-self.mu.values())
  }

  /// Lowest-return feasible portfolio, the mirror of [`Self::max_return`].
  pub fn min_return(&self) -> Result<FrontierPoint> {
    self.extreme_return(self.mu.values().clone())
  }

  fn extreme_return(&self, linear: DVector<f64>) -> Result<FrontierPoint> {
    let n = self.universe().len();
    let hessian = DMatrix::identity(n, n) * RETURN_REGULARIZATION;
    let qp = self.constraints.apply(QuadraticProgram::new(hessian, linear));
    let solution = self.solver.solve(&qp).map_err(PortfolioError::from_solver)?;
    self.point(solution.x)
  }

  /// `[lowest feasible return, highest feasible return]`.
  pub fn return_range(&self) -> Result<(f64, f64)> {
    let low = self.min_return()?.expected_return;
    let high = self.max_return()?.expected_return;
    Ok((low, high.max(low)))
  }

  /// Sweep `points` evenly spaced targets over [`Self::return_range`].
  ///
  /// Targets below the minimum-variance return trace the lower branch of the
  /// hyperbola. Unreachable targets are skipped; any other failure aborts the
  /// sweep.
  pub fn efficient_frontier(&self, points: usize) -> Result<FrontierCurve> {
    if points == 0 {
      return Err(PortfolioError::invalid("frontier needs at least one point"));
    }
    let (low, high) = self.return_range()?;

    let mut curve = FrontierCurve::with_capacity(points);
    for target in sweep_targets(low, high, points) {
      match self.solve_for_target_return(target) {
        Ok(point) => curve.push(point),
        Err(PortfolioError::InfeasibleTarget { target }) => {
          debug!(target, "discarding unreachable frontier target");
        }
        Err(err) => return Err(err),
      }
    }

    debug!(requested = points, kept = curve.len(), low, high, "frontier traced");
    Ok(curve)
  }

  fn point(&self, x: DVector<f64>) -> Result<FrontierPoint> {
    let stats = self.statistics(&x);
    let weights = WeightVector::new(self.universe().clone(), x.iter().copied().collect())?;
    Ok(FrontierPoint {
      expected_return: stats.expected_return,
      volatility: stats.volatility,
      sharpe_ratio: stats.sharpe_ratio,
      weights,
    })
  }
}

fn sweep_targets(low: f64, high: f64, points: usize) -> Vec<f64> {
  if points == 1 || high - low <= f64::EPSILON * low.abs().max(1.0) {
    return vec![low];
  }
  let step = (high - low) / (points - 1) as f64;
  (0..points)
    .map(|k| if k == points - 1 { high } else { low + step * k as f64 })
    .collect()
}
