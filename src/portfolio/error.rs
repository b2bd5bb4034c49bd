//! # Portfolio Errors
//!
//! Typed failure taxonomy shared by every stage of the optimization pipeline.
//! Nothing here is retried: each variant describes bad input data or a
//! genuinely infeasible problem.

use std::time::Duration;

use thiserror::Error;

use crate::qp::QpError;

/// Errors raised by return preparation, estimation and optimization.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PortfolioError {
  /// Too few aligned observations for a well-conditioned estimate.
  #[error("insufficient data: need at least {required} aligned observations, got {actual}")]
  InsufficientData {
    /// Minimum number of aligned return observations.
    required: usize,
    /// Observations actually available after alignment.
    actual: usize,
  },
  /// Covariance matrix could not be made positive-definite.
  #[error("covariance estimation failed: {0}")]
  CovarianceEstimation(String),
  /// Constraint set incompatible with the max-Sharpe reformulation.
  #[error("unsupported constraint set for max-Sharpe optimization: {0}")]
  UnsupportedConstraint(String),
  /// No feasible portfolio earns more than the risk-free rate.
  #[error("no feasible portfolio is expected to beat the risk-free rate {risk_free_rate}")]
  NoProfitableSolution {
    /// Risk-free rate the portfolios were measured against.
    risk_free_rate: f64,
  },
  /// The QP solve ran out of iterations or wall-clock budget.
  #[error("solver gave up after {iterations} iterations ({elapsed:?})")]
  SolverTimeout {
    /// Iterations performed before giving up.
    iterations: usize,
    /// Wall-clock time spent.
    elapsed: Duration,
  },
  /// Requested target return cannot be reached under the constraints.
  #[error("target return {target} is infeasible under the given constraints")]
  InfeasibleTarget {
    /// Annualized target return.
    target: f64,
  },
  /// Malformed input (empty universe, bad prices, inconsistent dimensions).
  #[error("invalid input: {0}")]
  InvalidInput(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PortfolioError>;

impl PortfolioError {
  pub(crate) fn invalid(msg: impl Into<String>) -> Self {
    Self::InvalidInput(msg.into())
  }

  /// Map a solver failure that is not an infeasibility outcome.
  ///
  /// Infeasibility carries different meaning per program (unreachable target,
  /// no profitable portfolio, empty constraint set) so callers handle
  /// [`QpError::Infeasible`] themselves before falling back to this.
  pub(crate) fn from_solver(err: QpError) -> Self {
    match err {
      QpError::IterationLimit { iterations, elapsed } | QpError::Timeout { iterations, elapsed } => {
        Self::SolverTimeout {
          iterations,
          elapsed,
        }
      }
      QpError::Infeasible => Self::invalid("constraint set admits no feasible portfolio"),
      QpError::NotPositiveDefinite => {
        Self::CovarianceEstimation("objective matrix is not positive-definite".to_string())
      }
      QpError::DimensionMismatch(msg) => Self::InvalidInput(msg),
      QpError::Degenerate => Self::invalid("active constraints became linearly dependent"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn solver_budget_errors_map_to_timeout() {
    let err = PortfolioError::from_solver(QpError::IterationLimit {
      iterations: 12,
      elapsed: Duration::from_millis(3),
    });
    assert!(matches!(
      err,
      PortfolioError::SolverTimeout { iterations: 12, .. }
    ));
  }

  #[test]
  fn messages_are_actionable() {
    let err = PortfolioError::InsufficientData {
      required: 6,
      actual: 1,
    };
    assert_eq!(
      err.to_string(),
      "insufficient data: need at least 6 aligned observations, got 1"
    );
  }
}
