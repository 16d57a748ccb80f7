use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use super::sigmoid;
use crate::{
    MlErr, Result,
    linalg::{solve_spd, with_intercept},
};

/// L2 penalised logistic regression advanced one Newton step per call.
///
/// The loss is `C · Σ logloss + ½‖w‖²` with an unpenalised intercept, so
/// repeatedly stepping from averaged parameters approximates federated
/// averaging of local optimisation steps.
#[derive(Debug, Clone, PartialEq)]
pub struct LogisticRegression {
    coef: Array1<f64>,
    intercept: f64,
    c: f64,
}

impl LogisticRegression {
    /// Inverse regularisation strength.
    pub const DEFAULT_C: f64 = 1.0;

    /// Creates a model with every parameter at zero.
    pub fn new(n_features: usize) -> Self {
        Self::from_parts(Array1::zeros(n_features), 0.0)
    }

    /// Warm starts a model from known parameters.
    pub fn from_parts(coef: Array1<f64>, intercept: f64) -> Self {
        Self {
            coef,
            intercept,
            c: Self::DEFAULT_C,
        }
    }

    /// Takes a single Newton step on the penalised loss.
    ///
    /// # Arguments
    /// * `x` - The (standardized) training features.
    /// * `y` - The training labels, all 0 or 1.
    ///
    /// # Errors
    /// `MlErr::SizeMismatch` if the shapes disagree with each other or with the
    /// model, `MlErr::SingularMatrix` if the Hessian is not positive definite.
    pub fn step(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<()> {
        if x.nrows() != y.len() {
            return Err(MlErr::SizeMismatch {
                a: "x",
                b: "y",
                got: x.nrows(),
                expected: y.len(),
            });
        }
        if x.ncols() != self.coef.len() {
            return Err(MlErr::SizeMismatch {
                a: "features",
                b: "coefficients",
                got: x.ncols(),
                expected: self.coef.len(),
            });
        }

        let design = with_intercept(x);
        let k = design.ncols();

        let mut theta = Array1::zeros(k);
        theta[0] = self.intercept;
        theta.slice_mut(ndarray::s![1..]).assign(&self.coef);

        let p = design.dot(&theta).mapv(sigmoid);
        let residual = &p - &y;

        let mut grad = design.t().dot(&residual) * self.c;
        let mut hessian = Array2::<f64>::zeros((k, k));
        for (row, &pi) in design.rows().into_iter().zip(p.iter()) {
            let w = self.c * pi * (1.0 - pi);
            for a in 0..k {
                for b in 0..=a {
                    hessian[[a, b]] += w * row[a] * row[b];
                }
            }
        }
        for a in 0..k {
            for b in 0..a {
                hessian[[b, a]] = hessian[[a, b]];
            }
        }
        for j in 1..k {
            grad[j] += theta[j];
            hessian[[j, j]] += 1.0;
        }

        let delta = solve_spd(hessian.view(), grad.view())?;
        let theta = theta - delta;
        if theta.iter().any(|v| !v.is_finite()) {
            return Err(MlErr::NonFinite("logistic coefficient"));
        }

        self.intercept = theta[0];
        self.coef = theta.slice(ndarray::s![1..]).to_owned();
        Ok(())
    }

    pub fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        (x.dot(&self.coef) + self.intercept).mapv(sigmoid)
    }

    /// Hard 0/1 predictions at the 0.5 threshold.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        self.predict_proba(x).mapv(|p| if p > 0.5 { 1.0 } else { 0.0 })
    }

    pub fn coef(&self) -> ArrayView1<'_, f64> {
        self.coef.view()
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }
}
