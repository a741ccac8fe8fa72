/*!
 * # Predictor
 *
 * Point forecast plus confidence score for one product and date. Targets
 * beyond the last observed day are reached by rolling the series forward
 * one day at a time, feeding each (non-negative) prediction back in as
 * that day's demand.
 */

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use super::features::{DataQualityFlag, FeatureBuilder, ObservedDemand};
use super::trainer::TrainedModel;
use crate::config::ConfidenceConfig;
use crate::entities::inventory;
use crate::errors::ForecastError;

/// Everything the predictor needs to know about one product.
#[derive(Debug, Clone, Copy)]
pub struct ProductHistory<'a> {
    pub product_id: Uuid,
    /// Current list price, used for days past the observed series
    pub price: f64,
    pub series: &'a ObservedDemand,
    /// Historical observations backing the confidence score (order lines)
    pub observation_count: usize,
    pub inventory: Option<&'a inventory::Model>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub predicted_demand: i32,
    pub confidence_score: f64,
    pub days_of_supply: Option<f64>,
    pub quality_flags: Vec<DataQualityFlag>,
}

/// Stock divided by average daily sales over `window_days`; unbounded when
/// nothing sold.
pub fn days_of_supply(current_stock: i32, units_sold: f64, window_days: u32) -> f64 {
    let daily = units_sold / f64::from(window_days.max(1));
    if daily > 0.0 {
        f64::from(current_stock) / daily
    } else {
        f64::INFINITY
    }
}

/// Observation-count term capped at `base_cap`, adjusted by days of supply,
/// clamped to `[floor, ceiling]`.
pub fn confidence_score(
    cfg: &ConfidenceConfig,
    observations: usize,
    days_of_supply: Option<f64>,
) -> f64 {
    let mut score = (observations as f64 * cfg.points_per_observation).min(cfg.base_cap);
    if let Some(days) = days_of_supply {
        if days < cfg.fast_moving_days {
            score += cfg.fast_moving_bonus;
        } else if days > cfg.slow_moving_days {
            score -= cfg.slow_moving_penalty;
        }
    }
    score.clamp(cfg.floor, cfg.ceiling)
}

#[derive(Debug, Clone)]
pub struct Predictor {
    builder: FeatureBuilder,
    confidence: ConfidenceConfig,
}

impl Predictor {
    pub fn new(builder: FeatureBuilder, confidence: ConfidenceConfig) -> Self {
        Self {
            builder,
            confidence,
        }
    }

    pub fn predict(
        &self,
        model: &TrainedModel,
        product: &ProductHistory<'_>,
        target_date: NaiveDate,
    ) -> Result<Prediction, ForecastError> {
        let (first, last) = match (product.series.first_date(), product.series.last_date()) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                return Err(ForecastError::insufficient_data(
                    product.product_id,
                    "empty demand series",
                ))
            }
        };
        if target_date <= first {
            return Err(ForecastError::insufficient_data(
                product.product_id,
                format!("target {} is not after first observation {}", target_date, first),
            ));
        }

        let mut flags: Vec<DataQualityFlag> = Vec::new();
        let mut history = product.series.quantities();
        let raw = if target_date <= last {
            let idx = (target_date - first).num_days() as usize;
            history.truncate(idx);
            self.step(model, &history, target_date, product, &mut flags)?
        } else {
            let mut date = last + Duration::days(1);
            loop {
                let value = self.step(model, &history, date, product, &mut flags)?;
                if date == target_date {
                    break value;
                }
                history.push(value.max(0.0));
                date += Duration::days(1);
            }
        };

        let predicted_demand = raw.max(0.0).round().min(f64::from(i32::MAX)) as i32;

        let window = self.confidence.days_of_supply_window;
        let days_of_supply = product.inventory.map(|inv| {
            days_of_supply(
                inv.current_stock,
                product.series.trailing_total(window as usize),
                window,
            )
        });
        let confidence_score =
            confidence_score(&self.confidence, product.observation_count, days_of_supply);

        if !flags.is_empty() {
            warn!(
                product_id = %product.product_id,
                flags = ?flags,
                "Prediction used default feature values"
            );
        }
        debug!(
            product_id = %product.product_id,
            %target_date,
            raw,
            predicted_demand,
            confidence_score,
            "Prediction complete"
        );

        Ok(Prediction {
            predicted_demand,
            confidence_score,
            days_of_supply,
            quality_flags: flags,
        })
    }

    fn step(
        &self,
        model: &TrainedModel,
        history: &[f64],
        date: NaiveDate,
        product: &ProductHistory<'_>,
        flags: &mut Vec<DataQualityFlag>,
    ) -> Result<f64, ForecastError> {
        let (vector, build_flags) =
            self.builder
                .build_prediction_vector(history, date, product.price);
        if !model.feature_names.iter().any(|n| vector.get(n).is_some()) {
            return Err(ForecastError::FeatureMismatch {
                expected: model.feature_names.clone(),
                actual: vector.names().to_vec(),
            });
        }
        let (values, align_flags) = vector.align_to(&model.feature_names);
        for flag in build_flags.into_iter().chain(align_flags) {
            if !flags.contains(&flag) {
                flags.push(flag);
            }
        }

        let raw = model.predict(&values);
        if !raw.is_finite() {
            return Err(ForecastError::InvalidOperation(format!(
                "model produced a non-finite prediction for {}",
                date
            )));
        }
        Ok(raw)
    }
}
