//! Accuracy metrics for training folds and for recent-forecast evaluation.

use serde::Serialize;

/// Error metrics from one training run or one evaluation window.
/// Values are `None` when there was nothing to score.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationMetrics {
    /// Mean Absolute Error
    pub mae: Option<f64>,
    /// Root Mean Squared Error
    pub rmse: Option<f64>,
    /// Symmetric Mean Absolute Percentage Error, in percent
    pub smape: Option<f64>,
    /// Share of days with actual sales that had a forecast, in percent
    pub coverage: Option<f64>,
    /// Cross-validation folds scored (0 for online evaluation)
    pub folds: usize,
    /// Rows or (forecast, actual) pairs scored
    pub samples: usize,
}

pub fn mae(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    paired(actual, predicted).map(|pairs| {
        pairs.iter().map(|(a, p)| (a - p).abs()).sum::<f64>() / pairs.len() as f64
    })
}

pub fn rmse(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    paired(actual, predicted).map(|pairs| {
        (pairs.iter().map(|(a, p)| (a - p).powi(2)).sum::<f64>() / pairs.len() as f64).sqrt()
    })
}

/// SMAPE in percent. Pairs where both values are zero contribute zero error.
pub fn smape(actual: &[f64], predicted: &[f64]) -> Option<f64> {
    paired(actual, predicted).map(|pairs| {
        let total: f64 = pairs
            .iter()
            .map(|(a, p)| {
                let denom = a.abs() + p.abs();
                if denom == 0.0 {
                    0.0
                } else {
                    2.0 * (a - p).abs() / denom
                }
            })
            .sum();
        100.0 * total / pairs.len() as f64
    })
}

/// `covered / total` in percent; `None` when `total` is zero.
pub fn coverage(covered: usize, total: usize) -> Option<f64> {
    (total > 0).then(|| covered as f64 / total as f64 * 100.0)
}

fn paired(actual: &[f64], predicted: &[f64]) -> Option<Vec<(f64, f64)>> {
    if actual.is_empty() || actual.len() != predicted.len() {
        return None;
    }
    Some(
        actual
            .iter()
            .copied()
            .zip(predicted.iter().copied())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_errors() {
        let actual = [10.0, 20.0, 30.0];
        let predicted = [12.0, 18.0, 30.0];
        assert!((mae(&actual, &predicted).unwrap() - 4.0 / 3.0).abs() < 1e-12);
        assert!((rmse(&actual, &predicted).unwrap() - (8.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn smape_handles_double_zero() {
        assert_eq!(smape(&[0.0, 0.0], &[0.0, 0.0]), Some(0.0));
        assert_eq!(smape(&[0.0], &[5.0]), Some(200.0));
    }

    #[test]
    fn empty_or_mismatched_inputs_score_nothing() {
        assert_eq!(mae(&[], &[]), None);
        assert_eq!(rmse(&[1.0], &[1.0, 2.0]), None);
        assert_eq!(coverage(0, 0), None);
        assert_eq!(coverage(3, 4), Some(75.0));
    }
}
