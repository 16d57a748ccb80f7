//! Dense symmetric solvers for the small normal-equation systems the estimators build.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::{MlErr, Result};

/// Lower triangular Cholesky factor of a symmetric positive definite matrix.
fn cholesky(a: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(MlErr::SizeMismatch {
            a: "rows",
            b: "columns",
            got: a.ncols(),
            expected: n,
        });
    }

    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }

            if i == j {
                if !(sum > 0.0) || !sum.is_finite() {
                    return Err(MlErr::SingularMatrix);
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }

    Ok(l)
}

fn substitute(l: &Array2<f64>, b: ArrayView1<'_, f64>) -> Array1<f64> {
    let n = l.nrows();

    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * z[k];
        }
        z[i] = sum / l[[i, i]];
    }

    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = z[i];
        for k in i + 1..n {
            sum -= l[[k, i]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }

    x
}

/// Solves `a · x = b` for a symmetric positive definite `a`.
///
/// # Errors
/// `MlErr::SingularMatrix` if `a` is not positive definite.
pub fn solve_spd(a: ArrayView2<'_, f64>, b: ArrayView1<'_, f64>) -> Result<Array1<f64>> {
    if b.len() != a.nrows() {
        return Err(MlErr::SizeMismatch {
            a: "matrix",
            b: "rhs",
            got: b.len(),
            expected: a.nrows(),
        });
    }

    let l = cholesky(a)?;
    Ok(substitute(&l, b))
}

/// Inverts a symmetric positive definite matrix.
///
/// # Errors
/// `MlErr::SingularMatrix` if `a` is not positive definite.
pub fn invert_spd(a: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
    let l = cholesky(a)?;
    let n = l.nrows();

    let mut inv = Array2::<f64>::zeros((n, n));
    for col in 0..n {
        let mut e = Array1::<f64>::zeros(n);
        e[col] = 1.0;
        inv.column_mut(col).assign(&substitute(&l, e.view()));
    }

    Ok(inv)
}

/// Prepends a column of ones to `x`.
pub fn with_intercept(x: ArrayView2<'_, f64>) -> Array2<f64> {
    Array2::from_shape_fn((x.nrows(), x.ncols() + 1), |(i, j)| {
        if j == 0 { 1.0 } else { x[[i, j - 1]] }
    })
}
