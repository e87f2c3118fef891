//! Model training module
//!
//! Provides the regression backend for the ensemble:
//! - Weighted XGBoost-style boosted trees with exact greedy splits
//! - Squared error and squared log error objectives
//! - RMSE / RMSLE evaluation

pub mod metrics;
pub mod objective;
pub mod xgboost;

pub use objective::Objective;
pub use xgboost::{goes_left, TreeNode, XGBoostConfig, XGBoostRegressor};
