//! Regression objectives for second-order boosting

use crate::error::{AttributionError, Result};
use serde::{Deserialize, Serialize};

/// Smallest hessian handed to the tree builder.
const MIN_HESSIAN: f64 = 1e-6;

/// Training loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Objective {
    /// 0.5 * (pred - y)^2
    SquaredError,
    /// 0.5 * (log1p(pred) - log1p(y))^2, for positive heavy-tailed targets
    #[default]
    SquaredLogError,
}

impl Objective {
    /// Parse an XGBoost-style objective name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "reg:squarederror" | "squared_error" => Ok(Objective::SquaredError),
            "reg:squaredlogerror" | "squared_log_error" => Ok(Objective::SquaredLogError),
            other => Err(AttributionError::InvalidParameter {
                name: "objective".to_string(),
                value: other.to_string(),
                reason: "expected reg:squarederror or reg:squaredlogerror".to_string(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Objective::SquaredError => "reg:squarederror",
            Objective::SquaredLogError => "reg:squaredlogerror",
        }
    }

    /// Reject targets the loss is undefined for.
    pub fn validate_target(&self, y: f64) -> Result<()> {
        let ok = match self {
            Objective::SquaredError => y.is_finite(),
            Objective::SquaredLogError => y.is_finite() && y > -1.0,
        };
        if ok {
            Ok(())
        } else {
            Err(AttributionError::InvalidInput(format!(
                "target {y} is not valid for {}",
                self.name()
            )))
        }
    }

    /// First and second derivative of the loss at `pred`.
    pub fn grad_hess(&self, pred: f64, y: f64) -> (f64, f64) {
        match self {
            Objective::SquaredError => (pred - y, 1.0),
            Objective::SquaredLogError => {
                let p = pred.max(-1.0 + MIN_HESSIAN);
                let diff = p.ln_1p() - y.ln_1p();
                let grad = diff / (p + 1.0);
                let hess = ((1.0 - diff) / ((p + 1.0) * (p + 1.0))).max(MIN_HESSIAN);
                (grad, hess)
            }
        }
    }

    /// Constant starting prediction: the loss minimiser over weighted targets.
    pub fn base_score(&self, y: &[f64], weights: &[f64]) -> f64 {
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return 0.0;
        }
        match self {
            Objective::SquaredError => {
                y.iter().zip(weights).map(|(y, w)| y * w).sum::<f64>() / total
            }
            Objective::SquaredLogError => {
                let mean_log = y.iter().zip(weights).map(|(y, w)| y.ln_1p() * w).sum::<f64>() / total;
                mean_log.exp_m1()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_from_name() {
        assert_eq!(Objective::from_name("reg:squarederror").unwrap(), Objective::SquaredError);
        assert_eq!(
            Objective::from_name("reg:squaredlogerror").unwrap(),
            Objective::SquaredLogError
        );
        assert!(Objective::from_name("binary:logistic").is_err());
    }

    #[test]
    fn test_squared_error_derivatives() {
        let (g, h) = Objective::SquaredError.grad_hess(3.0, 1.0);
        assert_eq!(g, 2.0);
        assert_eq!(h, 1.0);
    }

    #[test]
    fn test_squared_log_error_zero_gradient_at_target() {
        let (g, h) = Objective::SquaredLogError.grad_hess(100.0, 100.0);
        assert_relative_eq!(g, 0.0, epsilon = 1e-12);
        assert!(h > 0.0);
    }

    #[test]
    fn test_squared_log_error_sign() {
        let (g_over, _) = Objective::SquaredLogError.grad_hess(200.0, 100.0);
        let (g_under, _) = Objective::SquaredLogError.grad_hess(50.0, 100.0);
        assert!(g_over > 0.0);
        assert!(g_under < 0.0);
    }

    #[test]
    fn test_base_score() {
        let y = [1.0, 3.0];
        let w = [1.0, 1.0];
        assert_relative_eq!(Objective::SquaredError.base_score(&y, &w), 2.0);
        // exp(mean(ln 2, ln 4)) - 1 = sqrt(8) - 1
        assert_relative_eq!(
            Objective::SquaredLogError.base_score(&y, &w),
            8f64.sqrt() - 1.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_validate_target() {
        assert!(Objective::SquaredLogError.validate_target(-1.0).is_err());
        assert!(Objective::SquaredLogError.validate_target(0.5).is_ok());
        assert!(Objective::SquaredError.validate_target(f64::NAN).is_err());
    }
}
