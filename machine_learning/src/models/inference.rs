use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use super::{pseudo_r2, sigmoid, softplus};
use crate::{
    MlErr, Result,
    distributions::chi2_sf,
    linalg::{invert_spd, solve_spd, with_intercept},
    wald::WaldTable,
};

/// Coefficient table and likelihood statistics of a maximum likelihood logit fit.
///
/// Coefficients are ordered intercept first, then one per predictor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceFit {
    #[serde(flatten)]
    pub table: WaldTable,
    /// McFadden's pseudo R².
    pub prsquared: f64,
    /// Likelihood ratio statistic against the intercept only model.
    pub llr: f64,
    pub llr_pvalue: f64,
    pub llf: f64,
    pub llnull: f64,
}

impl InferenceFit {
    /// Assembles a fit from its coefficient table and log-likelihoods, deriving
    /// the pseudo R² and the likelihood ratio test with `df` degrees of freedom.
    pub fn from_likelihoods(table: WaldTable, llf: f64, llnull: f64, df: usize) -> Self {
        let llr = -2.0 * (llnull - llf);

        Self {
            table,
            prsquared: pseudo_r2(llf, llnull),
            llr,
            llr_pvalue: chi2_sf(llr, df),
            llf,
            llnull,
        }
    }
}

/// Unpenalised logistic regression fitted by Newton-Raphson for inference.
pub struct LogitInference;

impl LogitInference {
    pub const MAX_ITERATIONS: usize = 35;
    pub const TOLERANCE: f64 = 1e-8;

    /// Fits `P(y = 1) = σ(b0 + x·b)` by maximum likelihood.
    ///
    /// Standard errors come from the inverse of the observed information at
    /// the optimum.
    ///
    /// # Arguments
    /// * `x` - The raw (unstandardized) predictors.
    /// * `y` - The labels, all 0 or 1.
    ///
    /// # Errors
    /// `MlErr::SingleClass` when only one label occurs, `MlErr::NotConverged` when
    /// the likelihood has no finite maximum (e.g. perfect separation),
    /// `MlErr::SingularMatrix` on collinear predictors.
    pub fn fit(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<InferenceFit> {
        if x.nrows() != y.len() {
            return Err(MlErr::SizeMismatch {
                a: "x",
                b: "y",
                got: x.nrows(),
                expected: y.len(),
            });
        }

        let n = y.len() as f64;
        let positives = y.sum();
        if positives <= 0.0 || positives >= n {
            return Err(MlErr::SingleClass);
        }

        let design = with_intercept(x);
        let mut beta = Array1::<f64>::zeros(design.ncols());
        let mut converged = false;

        for _ in 0..Self::MAX_ITERATIONS {
            let (grad, info) = score_and_information(&design, y, &beta);
            let delta = solve_spd(info.view(), grad.view())?;
            beta += &delta;

            if beta.iter().any(|v| !v.is_finite()) {
                return Err(MlErr::NonFinite("logit coefficient"));
            }
            if delta.iter().fold(0.0f64, |m, d| m.max(d.abs())) < Self::TOLERANCE {
                converged = true;
                break;
            }
        }

        if !converged {
            return Err(MlErr::NotConverged {
                iterations: Self::MAX_ITERATIONS,
            });
        }

        let (_, info) = score_and_information(&design, y, &beta);
        let cov = invert_spd(info.view())?;
        let std_err: Vec<f64> = cov.diag().iter().map(|v| v.max(0.0).sqrt()).collect();

        let llf = log_likelihood(&design, y, &beta);
        let p_bar = positives / n;
        let llnull = positives * p_bar.ln() + (n - positives) * (1.0 - p_bar).ln();

        let table = WaldTable::from_estimates(beta.to_vec(), std_err);
        Ok(InferenceFit::from_likelihoods(table, llf, llnull, x.ncols()))
    }
}

fn score_and_information(
    design: &Array2<f64>,
    y: ArrayView1<'_, f64>,
    beta: &Array1<f64>,
) -> (Array1<f64>, Array2<f64>) {
    let p = design.dot(beta).mapv(sigmoid);
    let grad = design.t().dot(&(&y - &p));

    let mut weighted = design.clone();
    for (mut row, &pi) in weighted.rows_mut().into_iter().zip(p.iter()) {
        row *= pi * (1.0 - pi);
    }
    let info = design.t().dot(&weighted);

    (grad, info)
}

fn log_likelihood(design: &Array2<f64>, y: ArrayView1<'_, f64>, beta: &Array1<f64>) -> f64 {
    design
        .dot(beta)
        .iter()
        .zip(y.iter())
        .map(|(&eta, &yi)| yi * eta - softplus(eta))
        .sum()
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn overlapping() -> (Array2<f64>, Array1<f64>) {
        let x = array![
            [-2.0],
            [-1.5],
            [-1.0],
            [-0.5],
            [0.0],
            [0.0],
            [0.5],
            [1.0],
            [1.5],
            [2.0]
        ];
        let y = array![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0];
        (x, y)
    }

    #[test]
    fn score_vanishes_at_the_optimum() {
        let (x, y) = overlapping();

        let fit = LogitInference::fit(x.view(), y.view()).unwrap();

        let design = with_intercept(x.view());
        let beta = Array1::from(fit.table.coef.clone());
        let (grad, _) = score_and_information(&design, y.view(), &beta);
        assert!(grad.iter().all(|g| g.abs() < 1e-6));

        assert_eq!(fit.table.len(), 2);
        assert!(fit.table.coef[1] > 0.0);
        assert!(fit.table.std_err.iter().all(|&se| se > 0.0));
        assert!(fit.llf > fit.llnull);
        assert!(fit.prsquared > 0.0 && fit.prsquared < 1.0);
        assert!((fit.llr - 2.0 * (fit.llf - fit.llnull)).abs() < 1e-12);
        assert!((0.0..=1.0).contains(&fit.llr_pvalue));
    }

    #[test]
    fn null_likelihood_matches_balanced_classes() {
        let (x, y) = overlapping();

        let fit = LogitInference::fit(x.view(), y.view()).unwrap();

        assert!((fit.llnull - 10.0 * 0.5f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn rejects_single_class_and_separation() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];

        assert_eq!(
            LogitInference::fit(x.view(), array![1.0, 1.0, 1.0, 1.0].view()),
            Err(MlErr::SingleClass)
        );
        assert!(LogitInference::fit(x.view(), array![0.0, 0.0, 1.0, 1.0].view()).is_err());
    }
}
