//! Evaluation metrics reported next to every fitted model.

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

/// Goodness of fit of a regression on held out rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub metric_mse: f64,
    pub metric_rmse: f64,
    pub metric_mae: f64,
    pub metric_r2: f64,
}

impl RegressionMetrics {
    /// Computes the metrics of `predicted` against `actual`.
    ///
    /// A constant `actual` yields an `r2` of zero rather than NaN.
    pub fn compute(actual: ArrayView1<'_, f64>, predicted: ArrayView1<'_, f64>) -> Self {
        let n = actual.len();
        if n == 0 {
            return Self::default();
        }

        let n = n as f64;
        let mean = actual.sum() / n;

        let (mut sse, mut sae, mut sst) = (0.0, 0.0, 0.0);
        for (a, p) in actual.iter().zip(predicted) {
            let err = a - p;
            sse += err * err;
            sae += err.abs();
            sst += (a - mean) * (a - mean);
        }

        let mse = sse / n;
        Self {
            metric_mse: mse,
            metric_rmse: mse.sqrt(),
            metric_mae: sae / n,
            metric_r2: if sst > 0.0 { 1.0 - sse / sst } else { 0.0 },
        }
    }
}

/// Confusion matrix based metrics of a binary classifier.
///
/// `metric_auc` is computed from hard predictions, where it reduces to the
/// balanced accuracy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub metric_acc: f64,
    pub metric_auc: f64,
    pub metric_sensitivity: f64,
    pub metric_specificity: f64,
    pub metric_npv: f64,
    pub metric_ppv: f64,
}

impl ClassificationMetrics {
    /// Computes the metrics of `predicted` against `actual`, both holding 0/1 labels.
    pub fn compute(actual: ArrayView1<'_, f64>, predicted: ArrayView1<'_, f64>) -> Self {
        let (mut tp, mut tn, mut fp, mut fn_) = (0usize, 0usize, 0usize, 0usize);

        for (&a, &p) in actual.iter().zip(predicted) {
            match (a > 0.5, p > 0.5) {
                (true, true) => tp += 1,
                (false, false) => tn += 1,
                (false, true) => fp += 1,
                (true, false) => fn_ += 1,
            }
        }

        let sensitivity = ratio(tp, tp + fn_);
        let specificity = ratio(tn, tn + fp);

        Self {
            metric_acc: ratio(tp + tn, tp + tn + fp + fn_),
            metric_auc: (sensitivity + specificity) / 2.0,
            metric_sensitivity: sensitivity,
            metric_specificity: specificity,
            metric_npv: ratio(tn, tn + fn_),
            metric_ppv: ratio(tp, tp + fp),
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn perfect_regression() {
        let y = array![1.0, 2.0, 3.0];

        let metrics = RegressionMetrics::compute(y.view(), y.view());

        assert_eq!(metrics.metric_mse, 0.0);
        assert_eq!(metrics.metric_r2, 1.0);
    }

    #[test]
    fn regression_errors() {
        let actual = array![1.0, 2.0, 3.0, 4.0];
        let predicted = array![2.0, 2.0, 3.0, 2.0];

        let metrics = RegressionMetrics::compute(actual.view(), predicted.view());

        assert!((metrics.metric_mse - 1.25).abs() < 1e-12);
        assert!((metrics.metric_mae - 0.75).abs() < 1e-12);
        assert!((metrics.metric_r2 - 0.0).abs() < 1e-12);
    }

    #[test]
    fn confusion_matrix_rates() {
        let actual = array![1.0, 1.0, 1.0, 0.0, 0.0];
        let predicted = array![1.0, 1.0, 0.0, 0.0, 1.0];

        let metrics = ClassificationMetrics::compute(actual.view(), predicted.view());

        assert!((metrics.metric_acc - 0.6).abs() < 1e-12);
        assert!((metrics.metric_sensitivity - 2.0 / 3.0).abs() < 1e-12);
        assert!((metrics.metric_specificity - 0.5).abs() < 1e-12);
        assert!((metrics.metric_ppv - 2.0 / 3.0).abs() < 1e-12);
        assert!((metrics.metric_npv - 0.5).abs() < 1e-12);
        assert!((metrics.metric_auc - 7.0 / 12.0).abs() < 1e-12);
    }

    #[test]
    fn empty_denominators_are_zero() {
        let actual = array![0.0, 0.0];
        let predicted = array![0.0, 0.0];

        let metrics = ClassificationMetrics::compute(actual.view(), predicted.view());

        assert_eq!(metrics.metric_sensitivity, 0.0);
        assert_eq!(metrics.metric_ppv, 0.0);
        assert_eq!(metrics.metric_specificity, 1.0);
    }
}
