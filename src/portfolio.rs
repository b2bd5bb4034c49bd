//! # Portfolio
//!
//! $$
//! \sigma_p^2 = \mathbf{w}^\top \Sigma \mathbf{w}
//! $$
//!
//! Mean-variance portfolio optimization: return preparation, shrinkage
//! covariance, expected returns, efficient frontier and maximum Sharpe, plus
//! realized performance of the resulting allocation.

pub mod constraints;
pub mod covariance;
pub mod data;
pub mod engine;
pub mod error;
pub mod expected_returns;
pub mod frontier;
pub mod loader;
pub mod performance;
pub mod types;

pub use constraints::Constraints;
pub use constraints::GroupConstraint;
pub use constraints::ResolvedConstraints;
pub use constraints::WeightBounds;
pub use covariance::CovarianceMatrix;
pub use covariance::LedoitWolf;
pub use covariance::ShrinkageTarget;
pub use covariance::sample_covariance;
pub use data::GapPolicy;
pub use data::PriceHistory;
pub use data::PriceObservation;
pub use data::ReturnConfig;
pub use data::ReturnSeries;
pub use data::prepare_returns;
pub use engine::OptimizationOutput;
pub use engine::PortfolioEngine;
pub use engine::PortfolioEngineConfig;
pub use error::PortfolioError;
pub use expected_returns::ExpectedReturns;
pub use expected_returns::ReturnEstimator;
pub use expected_returns::estimate_expected_returns;
pub use frontier::FrontierSolver;
pub use loader::CsvLayout;
pub use loader::load_prices;
pub use loader::read_prices;
pub use performance::cumulative_returns;
pub use performance::series_metrics;
pub use types::AssetSummary;
pub use types::AssetUniverse;
pub use types::FrontierCurve;
pub use types::FrontierPoint;
pub use types::Periodicity;
pub use types::PortfolioStatistics;
pub use types::ReturnKind;
pub use types::WeightVector;
