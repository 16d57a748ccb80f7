use serde::{Deserialize, Serialize};

use crate::{distributions::two_sided_p, models::Z_95};

/// Wald inference for a vector of estimates: one entry per coefficient in every column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaldTable {
    #[serde(rename = "coef_")]
    pub coef: Vec<f64>,
    pub std_err: Vec<f64>,
    pub z_values: Vec<f64>,
    pub p_values: Vec<f64>,
    pub conf_int_lower: Vec<f64>,
    pub conf_int_upper: Vec<f64>,
    pub odds_ratios: Vec<f64>,
}

impl WaldTable {
    /// Derives z statistics, two sided p-values, 95% intervals and odds ratios.
    ///
    /// A zero standard error gives a zero z statistic and a p-value of one.
    ///
    /// # Arguments
    /// * `coef` - The point estimates.
    /// * `std_err` - Their standard errors, same length as `coef`.
    pub fn from_estimates(coef: Vec<f64>, std_err: Vec<f64>) -> Self {
        let mut table = Self {
            z_values: Vec::with_capacity(coef.len()),
            p_values: Vec::with_capacity(coef.len()),
            conf_int_lower: Vec::with_capacity(coef.len()),
            conf_int_upper: Vec::with_capacity(coef.len()),
            odds_ratios: Vec::with_capacity(coef.len()),
            ..Default::default()
        };

        for (&b, &se) in coef.iter().zip(&std_err) {
            let z = if se > 0.0 { b / se } else { 0.0 };
            table.z_values.push(z);
            table.p_values.push(two_sided_p(z));
            table.conf_int_lower.push(b - Z_95 * se);
            table.conf_int_upper.push(b + Z_95 * se);
            table.odds_ratios.push(b.exp());
        }

        table.coef = coef;
        table.std_err = std_err;
        table
    }

    pub fn len(&self) -> usize {
        self.coef.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coef.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_every_column() {
        let table = WaldTable::from_estimates(vec![0.5, 0.0], vec![0.25, 0.0]);

        assert_eq!(table.len(), 2);
        assert!((table.z_values[0] - 2.0).abs() < 1e-12);
        assert!((table.p_values[0] - 0.0455).abs() < 1e-4);
        assert!((table.conf_int_lower[0] - 0.01).abs() < 1e-12);
        assert!((table.conf_int_upper[0] - 0.99).abs() < 1e-12);
        assert!((table.odds_ratios[0] - 0.5f64.exp()).abs() < 1e-12);
        assert_eq!(table.z_values[1], 0.0);
        assert_eq!(table.p_values[1], 1.0);
    }

    #[test]
    fn serializes_with_artifact_names() {
        let table = WaldTable::from_estimates(vec![1.0], vec![1.0]);

        let json = serde_json::to_value(&table).unwrap();

        assert!(json.get("coef_").is_some());
        assert!(json.get("conf_int_upper").is_some());
    }
}
