//! Local estimators fitted by every site on its own training split.

mod inference;
mod linear;
mod logistic;
mod ordinal;

pub use inference::{InferenceFit, LogitInference};
pub use linear::LinearRegression;
pub use logistic::LogisticRegression;
pub use ordinal::{OrdinalFit, OrdinalLogit, OrdinalTarget};

use ndarray::{Array1, ArrayView1};

use crate::{MlErr, Result};

/// Confidence level multiplier of the 95% intervals.
pub const Z_95: f64 = 1.96;

pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// McFadden's pseudo R², `1 − llf / llnull`.
pub(crate) fn pseudo_r2(llf: f64, llnull: f64) -> f64 {
    if llnull != 0.0 { 1.0 - llf / llnull } else { 0.0 }
}

/// `ln(1 + e^z)` without overflow.
pub(crate) fn softplus(z: f64) -> f64 {
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}

/// Maps a two valued target onto `{0, 1}`, the smaller value becoming 0.
///
/// # Errors
/// `MlErr::NonBinaryTarget` if `y` holds more than two distinct values,
/// `MlErr::SingleClass` if it holds only one.
pub fn binary_labels(y: ArrayView1<'_, f64>) -> Result<Array1<f64>> {
    let mut classes: Vec<f64> = y.to_vec();
    classes.sort_by(f64::total_cmp);
    classes.dedup();

    match classes.as_slice() {
        [] => Err(MlErr::EmptyDataset),
        [_] => Err(MlErr::SingleClass),
        [_, high] => Ok(y.mapv(|v| if v == *high { 1.0 } else { 0.0 })),
        _ => Err(MlErr::NonBinaryTarget {
            classes: classes.len(),
        }),
    }
}
