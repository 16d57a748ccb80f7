use log::warn;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use crate::{MlErr, Result};

/// Share of the rows held out for evaluation.
pub const TEST_RATIO: f64 = 0.2;
/// Seed of the train/test shuffle, fixed so every round sees the same split.
pub const SPLIT_SEED: u64 = 42;

/// A tabular dataset: one row per sample, features in `x`, labels in `y`.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    x: Array2<f64>,
    y: Array1<f64>,
}

impl Dataset {
    /// Creates a new `Dataset`.
    ///
    /// # Errors
    /// `MlErr::SizeMismatch` if `x` and `y` disagree on the number of rows.
    pub fn new(x: Array2<f64>, y: Array1<f64>) -> Result<Self> {
        if x.nrows() != y.len() {
            return Err(MlErr::SizeMismatch {
                a: "x",
                b: "y",
                got: x.nrows(),
                expected: y.len(),
            });
        }

        Ok(Self { x, y })
    }

    /// Parses a headerless comma separated table where the last column is the label.
    ///
    /// Predictor columns holding any non numeric cell are dropped so that every site
    /// ends up with the same numeric schema. The label column must be numeric.
    ///
    /// # Arguments
    /// * `text` - The raw file contents.
    ///
    /// # Returns
    /// The dataset and the indices of the dropped predictor columns.
    pub fn parse(text: &str) -> Result<(Self, Vec<usize>)> {
        let rows: Vec<Vec<&str>> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| line.split(',').map(clean_cell).collect())
            .collect();

        let Some(width) = rows.first().map(Vec::len) else {
            return Err(MlErr::EmptyDataset);
        };

        for (row, cells) in rows.iter().enumerate() {
            if cells.len() != width {
                return Err(MlErr::RaggedRow {
                    row,
                    got: cells.len(),
                    expected: width,
                });
            }
        }

        let label_col = width - 1;
        let mut y = Array1::zeros(rows.len());
        for (row, cells) in rows.iter().enumerate() {
            y[row] = parse_number(cells[label_col]).ok_or_else(|| MlErr::NonNumericLabel {
                row,
                value: cells[label_col].to_string(),
            })?;
        }

        let (kept, dropped): (Vec<usize>, Vec<usize>) = (0..label_col)
            .partition(|&col| rows.iter().all(|cells| parse_number(cells[col]).is_some()));

        if !dropped.is_empty() {
            warn!(
                "dropping {} non numeric predictor column(s) {dropped:?}",
                dropped.len()
            );
        }

        if kept.is_empty() {
            return Err(MlErr::NoFeatures);
        }

        let mut x = Array2::zeros((rows.len(), kept.len()));
        for (row, cells) in rows.iter().enumerate() {
            for (j, &col) in kept.iter().enumerate() {
                // Checked by the partition above.
                x[[row, j]] = parse_number(cells[col]).unwrap_or_default();
            }
        }

        Ok((Self { x, y }, dropped))
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }

    pub fn x(&self) -> ArrayView2<'_, f64> {
        self.x.view()
    }

    pub fn y(&self) -> ArrayView1<'_, f64> {
        self.y.view()
    }

    /// The distinct label values, ascending.
    pub fn classes(&self) -> Vec<f64> {
        let mut classes: Vec<f64> = self.y.to_vec();
        classes.sort_by(f64::total_cmp);
        classes.dedup();
        classes
    }

    /// Replaces the labels, keeping the features.
    ///
    /// # Errors
    /// `MlErr::SizeMismatch` if the number of labels changes.
    pub fn with_labels(self, y: Array1<f64>) -> Result<Self> {
        Self::new(self.x, y)
    }

    /// Deterministically shuffles the rows and splits them into train and test sets.
    ///
    /// The test set takes `ceil(len * test_ratio)` rows, always leaving at least one
    /// row for training.
    ///
    /// # Arguments
    /// * `test_ratio` - Share of rows for the test set.
    /// * `seed` - Seed of the shuffle.
    ///
    /// # Returns
    /// The `(train, test)` pair.
    pub fn split(&self, test_ratio: f64, seed: u64) -> (Dataset, Dataset) {
        let n = self.len();
        let n_test = ((n as f64 * test_ratio).ceil() as usize).min(n.saturating_sub(1));

        let mut indices: Vec<usize> = (0..n).collect();
        indices.shuffle(&mut StdRng::seed_from_u64(seed));

        let (test, train) = indices.split_at(n_test);
        (self.select(train), self.select(test))
    }

    fn select(&self, rows: &[usize]) -> Dataset {
        Dataset {
            x: self.x.select(Axis(0), rows),
            y: self.y.select(Axis(0), rows),
        }
    }
}

fn clean_cell(cell: &str) -> &str {
    cell.trim().trim_matches('"')
}

fn parse_number(cell: &str) -> Option<f64> {
    cell.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Centers every column and scales it to unit variance, fitted on training data only.
#[derive(Debug, Clone, PartialEq)]
pub struct Standardizer {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl Standardizer {
    /// Learns the column means and standard deviations of `x`.
    ///
    /// Constant columns get a scale of one so they map to zero instead of NaN.
    pub fn fit(x: ArrayView2<'_, f64>) -> Self {
        let cols = x.ncols();
        let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(cols));
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > f64::EPSILON { s } else { 1.0 });

        Self { mean, scale }
    }

    pub fn transform(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut scaled = x.to_owned();

        for mut row in scaled.rows_mut() {
            row -= &self.mean;
            row /= &self.scale;
        }

        scaled
    }
}
