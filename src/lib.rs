//! # frontier-rs
//!
//! $$
//! \max_{\mathbf w}\ \frac{\mu^\top\mathbf w - r_f}{\sqrt{\mathbf w^\top\Sigma\mathbf w}}
//! $$
//!
//! Modern Portfolio Theory on historical prices: Ledoit-Wolf shrinkage
//! covariance, annualized expected returns, the efficient frontier and the
//! maximum-Sharpe allocation, all solved as explicit quadratic programs.

pub mod portfolio;
pub mod qp;
