use serde::{Deserialize, Serialize};

use super::features::FeatureTable;

/// Standardizes selected columns to zero mean and unit variance.
///
/// Columns are addressed by name so a fitted scaler stays correct when it
/// is applied to a row laid out in a model's recorded feature order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub columns: Vec<String>,
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
}

impl StandardScaler {
    /// Fits on the named columns of `table`; names absent from the table are skipped.
    pub fn fit(table: &FeatureTable, columns: &[&str]) -> Self {
        let mut scaler = StandardScaler {
            columns: Vec::new(),
            means: Vec::new(),
            scales: Vec::new(),
        };

        for name in columns {
            let Some(idx) = table.feature_names.iter().position(|n| n == name) else {
                continue;
            };
            let values: Vec<f64> = table.rows.iter().map(|r| r[idx]).collect();
            let n = values.len().max(1) as f64;
            let mean = values.iter().sum::<f64>() / n;
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let std = var.sqrt();

            scaler.columns.push(name.to_string());
            scaler.means.push(mean);
            // Constant columns pass through centered but unscaled.
            scaler.scales.push(if std > f64::EPSILON { std } else { 1.0 });
        }

        scaler
    }

    /// Scales `row` in place; `names` gives the layout of `row`.
    pub fn transform_row(&self, names: &[String], row: &mut [f64]) {
        for (i, column) in self.columns.iter().enumerate() {
            if let Some(idx) = names.iter().position(|n| n == column) {
                row[idx] = (row[idx] - self.means[i]) / self.scales[i];
            }
        }
    }

    pub fn transform_table(&self, table: &FeatureTable) -> Vec<Vec<f64>> {
        table
            .rows
            .iter()
            .map(|row| {
                let mut scaled = row.clone();
                self.transform_row(&table.feature_names, &mut scaled);
                scaled
            })
            .collect()
    }

    /// Internal consistency of a deserialized scaler.
    pub fn is_consistent(&self) -> bool {
        self.columns.len() == self.means.len()
            && self.columns.len() == self.scales.len()
            && self.means.iter().all(|m| m.is_finite())
            && self.scales.iter().all(|s| s.is_finite() && *s > 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> FeatureTable {
        FeatureTable {
            feature_names: vec!["price".into(), "lag_7".into(), "month".into()],
            dates: Vec::new(),
            rows: vec![
                vec![10.0, 1.0, 3.0],
                vec![10.0, 3.0, 4.0],
                vec![10.0, 5.0, 5.0],
            ],
            targets: vec![0.0; 3],
        }
    }

    #[test]
    fn scales_only_selected_columns() {
        let t = table();
        let scaler = StandardScaler::fit(&t, &["price", "lag_7"]);
        let scaled = scaler.transform_table(&t);

        // price is constant: centered to zero, not divided by zero
        assert!(scaled.iter().all(|r| r[0] == 0.0));
        let lag: Vec<f64> = scaled.iter().map(|r| r[1]).collect();
        assert!((lag.iter().sum::<f64>()).abs() < 1e-12);
        assert!(lag[0] < 0.0 && lag[2] > 0.0);
        // month untouched
        assert_eq!(scaled[1][2], 4.0);
        assert!(scaler.is_consistent());
    }

    #[test]
    fn transform_follows_names_not_positions() {
        let t = table();
        let scaler = StandardScaler::fit(&t, &["lag_7"]);
        let names = vec!["lag_7".to_string(), "price".to_string()];
        let mut row = vec![3.0, 99.0];
        scaler.transform_row(&names, &mut row);
        assert_eq!(row, vec![0.0, 99.0]);
    }
}
