use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::{debug, info};

use super::features::{FeatureTable, NUMERIC_FEATURES};
use super::gbm::GradientBoostingRegressor;
use super::metrics::{self, EvaluationMetrics};
use super::scaler::StandardScaler;
use crate::config::ModelConfig;
use crate::errors::ForecastError;

/// A fitted regressor with the scaler state and the ordered feature names it
/// was trained on. Never mutated after training; a new run supersedes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub model: GradientBoostingRegressor,
    pub scaler: StandardScaler,
    pub feature_names: Vec<String>,
}

impl TrainedModel {
    /// Raw prediction for `values` laid out in `self.feature_names` order.
    pub fn predict(&self, values: &[f64]) -> f64 {
        let mut row = values.to_vec();
        self.scaler.transform_row(&self.feature_names, &mut row);
        self.model.predict(&row)
    }
}

/// One sequential cross-validation split over a date-ordered table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Range<usize>,
    pub validation: Range<usize>,
}

/// Expanding-window splits over `dates` (ascending). Each validation block
/// starts strictly after the last training date; a boundary that would
/// split rows sharing one date is moved forward. Fewer rows than
/// `n_splits + 1` reduce the number of folds.
pub fn time_series_folds(dates: &[NaiveDate], n_splits: usize) -> Vec<Fold> {
    let n = dates.len();
    if n < 2 || n_splits == 0 {
        return Vec::new();
    }
    let k = n_splits.min(n - 1);
    let test_size = n / (k + 1);

    let mut folds = Vec::with_capacity(k);
    for i in 0..k {
        let mut train_end = n - (k - i) * test_size;
        let val_end = train_end + test_size;
        while train_end < val_end && dates[train_end] == dates[train_end - 1] {
            train_end += 1;
        }
        if train_end >= val_end {
            continue;
        }
        folds.push(Fold {
            train: 0..train_end,
            validation: train_end..val_end,
        });
    }
    folds
}

/// Fits the regressor with time-ordered cross-validation.
#[derive(Debug, Clone)]
pub struct Trainer {
    params: ModelConfig,
    cv_folds: usize,
}

impl Trainer {
    pub fn new(params: ModelConfig, cv_folds: usize) -> Self {
        Self { params, cv_folds }
    }

    /// Scores every fold, then fits once more on the whole table.
    pub fn train(
        &self,
        table: &FeatureTable,
    ) -> Result<(TrainedModel, EvaluationMetrics), ForecastError> {
        if table.is_empty() {
            return Err(ForecastError::InsufficientData(
                "feature table is empty after dropping incomplete rows".to_string(),
            ));
        }

        let folds = time_series_folds(&table.dates, self.cv_folds);
        let mut maes = Vec::with_capacity(folds.len());
        let mut rmses = Vec::with_capacity(folds.len());

        for (i, fold) in folds.iter().enumerate() {
            let train = table.subset(fold.train.clone());
            let validation = table.subset(fold.validation.clone());
            let fitted = self.fit(&train)?;

            let predicted: Vec<f64> = validation
                .rows
                .iter()
                .map(|row| fitted.predict(row))
                .collect();
            if let (Some(mae), Some(rmse)) = (
                metrics::mae(&validation.targets, &predicted),
                metrics::rmse(&validation.targets, &predicted),
            ) {
                debug!(fold = i, train_rows = train.len(), mae, rmse, "Fold scored");
                maes.push(mae);
                rmses.push(rmse);
            }
        }

        let model = self.fit(table)?;
        let evaluation = EvaluationMetrics {
            mae: mean_of(&maes),
            rmse: mean_of(&rmses),
            smape: None,
            coverage: None,
            folds: maes.len(),
            samples: table.len(),
        };

        info!(
            rows = table.len(),
            folds = evaluation.folds,
            "Model trained - Avg MAE: {:.2}, Avg RMSE: {:.2}",
            evaluation.mae.unwrap_or(f64::NAN),
            evaluation.rmse.unwrap_or(f64::NAN)
        );

        Ok((model, evaluation))
    }

    fn fit(&self, table: &FeatureTable) -> Result<TrainedModel, ForecastError> {
        let scaler = StandardScaler::fit(table, &NUMERIC_FEATURES);
        let scaled = scaler.transform_table(table);
        let model = GradientBoostingRegressor::fit(&self.params, &scaled, &table.targets)?;
        Ok(TrainedModel {
            model,
            scaler,
            feature_names: table.feature_names.clone(),
        })
    }
}

fn mean_of(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}
