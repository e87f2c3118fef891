//! Weighted regression metrics

use ndarray::Array1;

/// Weighted root mean squared log error.
pub fn rmsle(y_true: &Array1<f64>, y_pred: &Array1<f64>, weights: &Array1<f64>) -> f64 {
    weighted_rms(y_true, y_pred, weights, |t, p| p.max(-1.0 + 1e-6).ln_1p() - t.ln_1p())
}

/// Weighted root mean squared error.
pub fn rmse(y_true: &Array1<f64>, y_pred: &Array1<f64>, weights: &Array1<f64>) -> f64 {
    weighted_rms(y_true, y_pred, weights, |t, p| p - t)
}

fn weighted_rms<F>(y_true: &Array1<f64>, y_pred: &Array1<f64>, weights: &Array1<f64>, residual: F) -> f64
where
    F: Fn(f64, f64) -> f64,
{
    let total: f64 = weights.sum();
    if total <= 0.0 {
        return f64::NAN;
    }
    let sum: f64 = y_true
        .iter()
        .zip(y_pred.iter())
        .zip(weights.iter())
        .map(|((&t, &p), &w)| {
            let r = residual(t, p);
            w * r * r
        })
        .sum();
    (sum / total).sqrt()
}
