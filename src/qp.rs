//! # Quadratic Programming
//!
//! $$
//! \min_{x}\ \tfrac12 x^\top H x + c^\top x
//! \quad\text{s.t.}\quad a_i^\top x = b_i,\ \ g_j^\top x \ge h_j
//! $$
//!
//! Explicit quadratic-program formulation and a dual active-set solver
//! (Goldfarb-Idnani) for strictly convex objectives. The solver starts from the
//! unconstrained minimizer and adds violated constraints one at a time, so no
//! feasible starting point is needed and infeasibility is detected exactly when
//! a violated constraint can be neither reached by a primal step nor freed by a
//! dual step.

use std::time::Duration;
use std::time::Instant;

use nalgebra::DMatrix;
use nalgebra::DVector;
use thiserror::Error;
use tracing::debug;

/// Relative curvature below which a new constraint normal is treated as
/// linearly dependent on the active set.
const DEPENDENCE_EPS: f64 = 1e-12;

/// Failures of [`ActiveSetSolver::solve`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QpError {
  #[error("constraints are infeasible")]
  Infeasible,
  #[error("iteration limit reached after {iterations} iterations ({elapsed:?})")]
  IterationLimit { iterations: usize, elapsed: Duration },
  #[error("time budget exhausted after {iterations} iterations ({elapsed:?})")]
  Timeout { iterations: usize, elapsed: Duration },
  #[error("objective matrix is not positive-definite")]
  NotPositiveDefinite,
  #[error("dimension mismatch: {0}")]
  DimensionMismatch(String),
  #[error("active constraint normals became linearly dependent")]
  Degenerate,
}

/// Single linear constraint row `coefficientsᵀ x (= | >=) rhs`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraint {
  pub coefficients: DVector<f64>,
  pub rhs: f64,
}

impl LinearConstraint {
  pub fn new(coefficients: DVector<f64>, rhs: f64) -> Self {
    Self { coefficients, rhs }
  }

  /// `coefficientsᵀ x - rhs`.
  pub fn slack(&self, x: &DVector<f64>) -> f64 {
    self.coefficients.dot(x) - self.rhs
  }
}

/// Convex QP in the form `min ½xᵀHx + cᵀx` subject to equality rows and
/// `>=` inequality rows.
#[derive(Debug, Clone)]
pub struct QuadraticProgram {
  /// Symmetric positive-definite objective matrix `H`.
  pub hessian: DMatrix<f64>,
  /// Linear objective term `c`.
  pub linear: DVector<f64>,
  /// Rows with `aᵢᵀx = bᵢ`.
  pub equalities: Vec<LinearConstraint>,
  /// Rows with `gⱼᵀx >= hⱼ`.
  pub inequalities: Vec<LinearConstraint>,
}

impl QuadraticProgram {
  pub fn new(hessian: DMatrix<f64>, linear: DVector<f64>) -> Self {
    Self {
      hessian,
      linear,
      equalities: Vec::new(),
      inequalities: Vec::new(),
    }
  }

  /// Number of decision variables.
  pub fn dim(&self) -> usize {
    self.linear.len()
  }

  /// Add `coefficientsᵀ x = rhs`.
  pub fn subject_to_eq(mut self, coefficients: DVector<f64>, rhs: f64) -> Self {
    self.equalities.push(LinearConstraint::new(coefficients, rhs));
    self
  }

  /// Add `coefficientsᵀ x >= rhs`.
  pub fn subject_to_ge(mut self, coefficients: DVector<f64>, rhs: f64) -> Self {
    self.inequalities.push(LinearConstraint::new(coefficients, rhs));
    self
  }

  /// Add `coefficientsᵀ x <= rhs`.
  pub fn subject_to_le(self, coefficients: DVector<f64>, rhs: f64) -> Self {
    self.subject_to_ge(-coefficients, -rhs)
  }

  /// Objective value at `x`.
  pub fn objective(&self, x: &DVector<f64>) -> f64 {
    0.5 * x.dot(&(&self.hessian * x)) + self.linear.dot(x)
  }

  /// Largest constraint violation at `x` (zero when feasible).
  pub fn max_violation(&self, x: &DVector<f64>) -> f64 {
    let eq = self
      .equalities
      .iter()
      .map(|c| c.slack(x).abs())
      .fold(0.0, f64::max);
    self
      .inequalities
      .iter()
      .map(|c| (-c.slack(x)).max(0.0))
      .fold(eq, f64::max)
  }

  fn validate(&self) -> Result<(), QpError> {
    let n = self.dim();
    if self.hessian.nrows() != n || self.hessian.ncols() != n {
      return Err(QpError::DimensionMismatch(format!(
        "hessian is {}x{}, expected {n}x{n}",
        self.hessian.nrows(),
        self.hessian.ncols()
      )));
    }
    let rows = self.equalities.iter().chain(self.inequalities.iter());
    for (i, row) in rows.enumerate() {
      if row.coefficients.len() != n {
        return Err(QpError::DimensionMismatch(format!(
          "constraint {i} has {} coefficients, expected {n}",
          row.coefficients.len()
        )));
      }
      if !row.rhs.is_finite() || row.coefficients.iter().any(|v| !v.is_finite()) {
        return Err(QpError::DimensionMismatch(format!(
          "constraint {i} contains non-finite values"
        )));
      }
    }
    Ok(())
  }
}

/// Iteration and wall-clock limits for a single solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverBudget {
  /// Maximum number of primal/dual steps.
  pub max_iterations: usize,
  /// Hard wall-clock limit.
  pub timeout: Duration,
}

impl Default for SolverBudget {
  fn default() -> Self {
    Self {
      max_iterations: 500,
      timeout: Duration::from_secs(2),
    }
  }
}

/// Optimal point of a [`QuadraticProgram`].
#[derive(Debug, Clone)]
pub struct QpSolution {
  pub x: DVector<f64>,
  pub objective: f64,
  pub iterations: usize,
  /// Active constraint indices; equalities first, then `m_eq + j` for
  /// inequality `j`.
  pub active: Vec<usize>,
}

#[derive(Debug, Clone)]
struct ActiveConstraint {
  index: usize,
  normal: DVector<f64>,
  multiplier: f64,
  equality: bool,
}

#[derive(Debug, Clone)]
struct Violation {
  index: usize,
  normal: DVector<f64>,
  rhs: f64,
  equality: bool,
}

/// Goldfarb-Idnani dual active-set solver.
#[derive(Debug, Clone)]
pub struct ActiveSetSolver {
  budget: SolverBudget,
  tolerance: f64,
}

impl Default for ActiveSetSolver {
  fn default() -> Self {
    Self::new(SolverBudget::default())
  }
}

impl ActiveSetSolver {
  pub fn new(budget: SolverBudget) -> Self {
    Self {
      budget,
      tolerance: 1e-10,
    }
  }

  /// Feasibility tolerance on constraint slacks (scaled by `1 + |rhs|`).
  pub fn with_tolerance(mut self, tolerance: f64) -> Self {
    self.tolerance = tolerance;
    self
  }

  pub fn budget(&self) -> SolverBudget {
    self.budget
  }

  /// Solve `qp` to optimality.
  pub fn solve(&self, qp: &QuadraticProgram) -> Result<QpSolution, QpError> {
    qp.validate()?;
    let started = Instant::now();

    let h_inv = qp
      .hessian
      .clone()
      .cholesky()
      .ok_or(QpError::NotPositiveDefinite)?
      .inverse();
    let mut x = -(&h_inv * &qp.linear);
    let mut active: Vec<ActiveConstraint> = Vec::new();
    let mut iterations = 0usize;

    while let Some(violation) = self.most_violated(qp, &x, &active) {
      let mut added_multiplier = 0.0;

      loop {
        iterations += 1;
        self.check_budget(iterations, started)?;

        let (z, r) = step_directions(&h_inv, &active, &violation.normal)?;

        let mut dual_step = f64::INFINITY;
        let mut blocking = None;
        for (k, (c, &rk)) in active.iter().zip(r.iter()).enumerate() {
          if !c.equality && rk > 0.0 {
            let ratio = c.multiplier / rk;
            if ratio < dual_step {
              dual_step = ratio;
              blocking = Some(k);
            }
          }
        }

        let curvature = z.dot(&violation.normal);
        let scale = violation.normal.dot(&(&h_inv * &violation.normal));
        let primal_step = if curvature <= DEPENDENCE_EPS * scale {
          f64::INFINITY
        } else {
          -(violation.normal.dot(&x) - violation.rhs) / curvature
        };

        let step = primal_step.min(dual_step);
        if !step.is_finite() {
          debug!(iterations, constraint = violation.index, "qp infeasible");
          return Err(QpError::Infeasible);
        }

        if primal_step.is_finite() {
          x.axpy(step, &z, 1.0);
        }
        for (c, &rk) in active.iter_mut().zip(r.iter()) {
          c.multiplier -= step * rk;
          if !c.equality {
            c.multiplier = c.multiplier.max(0.0);
          }
        }
        added_multiplier += step;

        if primal_step <= dual_step {
          active.push(ActiveConstraint {
            index: violation.index,
            normal: violation.normal.clone(),
            multiplier: added_multiplier,
            equality: violation.equality,
          });
          break;
        }

        if let Some(k) = blocking {
          active.remove(k);
        }
      }
    }

    let objective = qp.objective(&x);
    debug!(iterations, active = active.len(), objective, "qp solved");

    Ok(QpSolution {
      x,
      objective,
      iterations,
      active: active.iter().map(|c| c.index).collect(),
    })
  }

  fn check_budget(&self, iterations: usize, started: Instant) -> Result<(), QpError> {
    let elapsed = started.elapsed();
    if iterations > self.budget.max_iterations {
      return Err(QpError::IterationLimit {
        iterations: self.budget.max_iterations,
        elapsed,
      });
    }
    if elapsed > self.budget.timeout {
      return Err(QpError::Timeout {
        iterations,
        elapsed,
      });
    }
    Ok(())
  }

  /// Pick the next constraint to enforce: any unmet equality first, then the
  /// most violated inequality. The returned normal is oriented so that the
  /// constraint reads `normalᵀx >= rhs` with a negative slack.
  fn most_violated(
    &self,
    qp: &QuadraticProgram,
    x: &DVector<f64>,
    active: &[ActiveConstraint],
  ) -> Option<Violation> {
    let is_active = |idx: usize| active.iter().any(|c| c.index == idx);
    let m_eq = qp.equalities.len();

    let mut worst_eq: Option<(usize, f64)> = None;
    for (i, c) in qp.equalities.iter().enumerate() {
      if is_active(i) {
        continue;
      }
      let s = c.slack(x);
      if s.abs() > self.tolerance * (1.0 + c.rhs.abs())
        && worst_eq.map_or(true, |(_, w)| s.abs() > w)
      {
        worst_eq = Some((i, s.abs()));
      }
    }
    if let Some((i, _)) = worst_eq {
      let c = &qp.equalities[i];
      let (normal, rhs) = if c.slack(x) > 0.0 {
        (-&c.coefficients, -c.rhs)
      } else {
        (c.coefficients.clone(), c.rhs)
      };
      return Some(Violation {
        index: i,
        normal,
        rhs,
        equality: true,
      });
    }

    let mut worst_ineq: Option<(usize, f64)> = None;
    for (j, c) in qp.inequalities.iter().enumerate() {
      if is_active(m_eq + j) {
        continue;
      }
      let s = c.slack(x);
      if s < -self.tolerance * (1.0 + c.rhs.abs()) && worst_ineq.map_or(true, |(_, w)| s < w) {
        worst_ineq = Some((j, s));
      }
    }
    worst_ineq.map(|(j, _)| {
      let c = &qp.inequalities[j];
      Violation {
        index: m_eq + j,
        normal: c.coefficients.clone(),
        rhs: c.rhs,
        equality: false,
      }
    })
  }
}

/// Primal direction `z` (keeps active constraints satisfied) and dual
/// direction `r` for adding `normal` to the active set.
fn step_directions(
  h_inv: &DMatrix<f64>,
  active: &[ActiveConstraint],
  normal: &DVector<f64>,
) -> Result<(DVector<f64>, DVector<f64>), QpError> {
  let hn = h_inv * normal;
  if active.is_empty() {
    return Ok((hn, DVector::zeros(0)));
  }

  let n = normal.len();
  let basis = DMatrix::from_fn(n, active.len(), |i, j| active[j].normal[i]);
  let h_basis = h_inv * &basis;
  let gram = basis.transpose() * &h_basis;
  let r = gram
    .cholesky()
    .ok_or(QpError::Degenerate)?
    .solve(&(basis.transpose() * &hn));
  let z = hn - &h_basis * &r;
  Ok((z, r))
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  fn simplex_projection(point: &[f64]) -> QuadraticProgram {
    let n = point.len();
    let mut qp = QuadraticProgram::new(DMatrix::identity(n, n), -DVector::from_row_slice(point))
      .subject_to_eq(DVector::from_element(n, 1.0), 1.0);
    for i in 0..n {
      let mut row = DVector::zeros(n);
      row[i] = 1.0;
      qp = qp.subject_to_ge(row, 0.0);
    }
    qp
  }

  #[test]
  fn unconstrained_minimizer() {
    let qp = QuadraticProgram::new(DMatrix::identity(2, 2), DVector::from_vec(vec![-1.0, -2.0]));
    let sol = ActiveSetSolver::default().solve(&qp).unwrap();
    assert_abs_diff_eq!(sol.x[0], 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(sol.x[1], 2.0, epsilon = 1e-12);
    assert!(sol.active.is_empty());
  }

  #[test]
  fn projects_onto_simplex() {
    let qp = simplex_projection(&[2.0, 0.0, -1.0]);
    let sol = ActiveSetSolver::default().solve(&qp).unwrap();
    assert_abs_diff_eq!(sol.x[0], 1.0, epsilon = 1e-10);
    assert_abs_diff_eq!(sol.x[1], 0.0, epsilon = 1e-10);
    assert_abs_diff_eq!(sol.x[2], 0.0, epsilon = 1e-10);
    assert!(qp.max_violation(&sol.x) < 1e-10);
  }

  #[test]
  fn two_asset_minimum_variance() {
    let hessian = DMatrix::from_row_slice(2, 2, &[0.04, 0.0, 0.0, 0.09]);
    let qp = QuadraticProgram::new(hessian, DVector::zeros(2))
      .subject_to_eq(DVector::from_element(2, 1.0), 1.0)
      .subject_to_ge(DVector::from_vec(vec![1.0, 0.0]), 0.0)
      .subject_to_ge(DVector::from_vec(vec![0.0, 1.0]), 0.0);
    let sol = ActiveSetSolver::default().solve(&qp).unwrap();
    assert_abs_diff_eq!(sol.x[0], 0.09 / 0.13, epsilon = 1e-10);
    assert_abs_diff_eq!(sol.x[1], 0.04 / 0.13, epsilon = 1e-10);
  }

  #[test]
  fn upper_bound_binds_and_releases_mass() {
    // Projection of (1, 1, 0) onto {sum = 1, 0 <= x <= 0.4}.
    let mut qp = simplex_projection(&[1.0, 1.0, 0.0]);
    for i in 0..3 {
      let mut row = DVector::zeros(3);
      row[i] = 1.0;
      qp = qp.subject_to_le(row, 0.4);
    }
    let sol = ActiveSetSolver::default().solve(&qp).unwrap();
    assert_abs_diff_eq!(sol.x[0], 0.4, epsilon = 1e-10);
    assert_abs_diff_eq!(sol.x[1], 0.4, epsilon = 1e-10);
    assert_abs_diff_eq!(sol.x[2], 0.2, epsilon = 1e-10);
  }

  #[test]
  fn detects_infeasibility() {
    let qp = QuadraticProgram::new(DMatrix::identity(1, 1), DVector::zeros(1))
      .subject_to_ge(DVector::from_vec(vec![1.0]), 1.0)
      .subject_to_le(DVector::from_vec(vec![1.0]), 0.0);
    assert_eq!(
      ActiveSetSolver::default().solve(&qp).unwrap_err(),
      QpError::Infeasible
    );
  }

  #[test]
  fn rejects_indefinite_hessian() {
    let hessian = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -1.0]);
    let qp = QuadraticProgram::new(hessian, DVector::zeros(2));
    assert_eq!(
      ActiveSetSolver::default().solve(&qp).unwrap_err(),
      QpError::NotPositiveDefinite
    );
  }

  #[test]
  fn rejects_mismatched_rows() {
    let qp = QuadraticProgram::new(DMatrix::identity(2, 2), DVector::zeros(2))
      .subject_to_eq(DVector::from_element(3, 1.0), 1.0);
    assert!(matches!(
      ActiveSetSolver::default().solve(&qp),
      Err(QpError::DimensionMismatch(_))
    ));
  }

  #[test]
  fn iteration_budget_is_enforced() {
    let qp = simplex_projection(&[2.0, 0.0]);
    let solver = ActiveSetSolver::new(SolverBudget {
      max_iterations: 1,
      timeout: Duration::from_secs(1),
    });
    assert!(matches!(
      solver.solve(&qp),
      Err(QpError::IterationLimit { iterations: 1, .. })
    ));
  }

  #[test]
  fn wall_clock_budget_is_enforced() {
    let qp = simplex_projection(&[2.0, 0.0]);
    let solver = ActiveSetSolver::new(SolverBudget {
      max_iterations: 500,
      timeout: Duration::ZERO,
    });
    assert!(matches!(
      solver.solve(&qp),
      Err(QpError::Timeout { iterations: 1, .. })
    ));
  }

  #[test]
  fn solve_is_deterministic() {
    let qp = simplex_projection(&[0.3, 0.3, 0.3, 0.1]);
    let a = ActiveSetSolver::default().solve(&qp).unwrap();
    let b = ActiveSetSolver::default().solve(&qp).unwrap();
    assert_eq!(a.x, b.x);
  }
}
