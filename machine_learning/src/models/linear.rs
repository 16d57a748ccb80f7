use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::{
    MlErr, Result,
    linalg::{solve_spd, with_intercept},
};

/// Diagonal load keeping the normal equations solvable when a standardized column is constant.
const RIDGE: f64 = 1e-9;

/// Ordinary least squares regression with an intercept.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearRegression {
    coef: Array1<f64>,
    intercept: f64,
}

impl LinearRegression {
    /// Builds a model from known parameters, e.g. an aggregate.
    pub fn from_parts(coef: Array1<f64>, intercept: f64) -> Self {
        Self { coef, intercept }
    }

    /// Fits the model through the normal equations `(X'X) θ = X'y`.
    ///
    /// # Arguments
    /// * `x` - The (standardized) training features.
    /// * `y` - The training targets.
    ///
    /// # Errors
    /// `MlErr::SizeMismatch` if the rows disagree, `MlErr::SingularMatrix` if the
    /// system can't be solved.
    pub fn fit(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<Self> {
        if x.nrows() != y.len() {
            return Err(MlErr::SizeMismatch {
                a: "x",
                b: "y",
                got: x.nrows(),
                expected: y.len(),
            });
        }
        if x.nrows() == 0 {
            return Err(MlErr::EmptyDataset);
        }

        let design = with_intercept(x);
        let mut gram: Array2<f64> = design.t().dot(&design);
        for j in 1..gram.nrows() {
            gram[[j, j]] += RIDGE;
        }
        let rhs = design.t().dot(&y);

        let theta = solve_spd(gram.view(), rhs.view())?;
        if theta.iter().any(|v| !v.is_finite()) {
            return Err(MlErr::NonFinite("regression coefficient"));
        }

        Ok(Self {
            intercept: theta[0],
            coef: theta.slice(ndarray::s![1..]).to_owned(),
        })
    }

    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        x.dot(&self.coef) + self.intercept
    }

    pub fn coef(&self) -> ArrayView1<'_, f64> {
        self.coef.view()
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }
}
