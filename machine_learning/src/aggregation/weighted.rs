use crate::{MlErr, Result};

/// Sample size weighted mean of parameter vectors, `θ̄ = Σ n_i·θ_i / Σ n_i`.
///
/// Sites are accumulated one at a time, so the result does not depend on
/// their order beyond floating point rounding.
#[derive(Debug, Clone, Default)]
pub struct WeightedAverage {
    sum: Vec<f64>,
    total: u64,
    sites: usize,
}

impl WeightedAverage {
    /// Creates a new empty `WeightedAverage`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulates one site's parameters.
    ///
    /// # Arguments
    /// * `sample_size` - The weight of this site.
    /// * `params` - The site's parameters, flattened.
    ///
    /// # Errors
    /// `MlErr::SizeMismatch` if `params` doesn't match the length of the sites seen so far.
    pub fn add(&mut self, sample_size: u64, params: &[f64]) -> Result<()> {
        if self.sites == 0 {
            self.sum = vec![0.0; params.len()];
        } else if params.len() != self.sum.len() {
            return Err(MlErr::SizeMismatch {
                a: "site parameters",
                b: "accumulated parameters",
                got: params.len(),
                expected: self.sum.len(),
            });
        }

        let n = sample_size as f64;
        for (acc, p) in self.sum.iter_mut().zip(params) {
            *acc += n * p;
        }

        self.total += sample_size;
        self.sites += 1;
        Ok(())
    }

    /// The sum of the weights seen so far.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn sites(&self) -> usize {
        self.sites
    }

    /// Divides the accumulated sum by the total weight.
    ///
    /// # Errors
    /// `MlErr::NoInputs` if nothing was added, `MlErr::DegenerateWeights` if every
    /// sample size was zero, `MlErr::NonFinite` if a parameter isn't finite.
    pub fn finish(self) -> Result<Vec<f64>> {
        if self.sites == 0 {
            return Err(MlErr::NoInputs);
        }
        if self.total == 0 {
            return Err(MlErr::DegenerateWeights { index: 0 });
        }

        let total = self.total as f64;
        let mean: Vec<f64> = self.sum.into_iter().map(|s| s / total).collect();
        if mean.iter().any(|v| !v.is_finite()) {
            return Err(MlErr::NonFinite("averaged parameter"));
        }

        Ok(mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_by_sample_size() {
        let mut avg = WeightedAverage::new();
        avg.add(100, &[1.0, 0.0]).unwrap();
        avg.add(50, &[4.0, 3.0]).unwrap();

        assert_eq!(avg.total(), 150);
        assert_eq!(avg.sites(), 2);

        let mean = avg.finish().unwrap();
        assert!((mean[0] - 2.0).abs() < 1e-12);
        assert!((mean[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn order_does_not_matter() {
        let sites = [(30, [0.3, -1.0]), (70, [1.1, 2.0]), (10, [-4.0, 0.5])];

        let mut forward = WeightedAverage::new();
        for (n, p) in &sites {
            forward.add(*n, p).unwrap();
        }
        let mut backward = WeightedAverage::new();
        for (n, p) in sites.iter().rev() {
            backward.add(*n, p).unwrap();
        }

        let (a, b) = (forward.finish().unwrap(), backward.finish().unwrap());
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn fails_closed() {
        assert_eq!(WeightedAverage::new().finish(), Err(MlErr::NoInputs));

        let mut zero = WeightedAverage::new();
        zero.add(0, &[1.0]).unwrap();
        assert_eq!(zero.finish(), Err(MlErr::DegenerateWeights { index: 0 }));

        let mut ragged = WeightedAverage::new();
        ragged.add(1, &[1.0]).unwrap();
        assert!(matches!(
            ragged.add(1, &[1.0, 2.0]),
            Err(MlErr::SizeMismatch { .. })
        ));
    }
}
