use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug, Clone, PartialEq)]
pub enum MlErr {
    EmptyDataset,
    RaggedRow {
        row: usize,
        got: usize,
        expected: usize,
    },
    NoFeatures,
    NonNumericLabel {
        row: usize,
        value: String,
    },
    NonBinaryTarget {
        classes: usize,
    },
    SingleClass,
    TooFewCategories {
        found: usize,
        min: usize,
    },
    EmptyCategory {
        category: usize,
    },
    SizeMismatch {
        a: &'static str,
        b: &'static str,
        got: usize,
        expected: usize,
    },
    SingularMatrix,
    NotConverged {
        iterations: usize,
    },
    NoInputs,
    DegenerateWeights {
        index: usize,
    },
    NonFinite(&'static str),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MlErr::EmptyDataset => "The dataset has no rows".to_string(),
            MlErr::RaggedRow { row, got, expected } => {
                format!("Row {row} has {got} columns, expected {expected}")
            }
            MlErr::NoFeatures => "The dataset has no usable predictor columns".to_string(),
            MlErr::NonNumericLabel { row, value } => {
                format!("The label of row {row} is not numeric: {value:?}")
            }
            MlErr::NonBinaryTarget { classes } => format!(
                "The target has {classes} classes, a binary model requires at most 2"
            ),
            MlErr::SingleClass => "The target has a single class, nothing to separate".to_string(),
            MlErr::TooFewCategories { found, min } => format!(
                "The target has {found} ordered categories, at least {min} are required"
            ),
            MlErr::EmptyCategory { category } => {
                format!("Category {category} has no observations in the training split")
            }
            MlErr::SizeMismatch {
                a,
                b,
                got,
                expected,
            } => format!(
                "There's a size mismatch between {a} and {b}, got {got} and expected {expected}"
            ),
            MlErr::SingularMatrix => "The system matrix is singular".to_string(),
            MlErr::NotConverged { iterations } => {
                format!("The solver did not converge after {iterations} iterations")
            }
            MlErr::NoInputs => "There are no site results to combine".to_string(),
            MlErr::DegenerateWeights { index } => {
                format!("Every weight of parameter {index} is zero")
            }
            MlErr::NonFinite(what) => format!("Computed a non finite {what}"),
        };

        write!(f, "{s}")
    }
}

impl Error for MlErr {}
