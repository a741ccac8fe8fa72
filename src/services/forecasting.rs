use chrono::{DateTime, Duration, NaiveDate, Utc};
use ::metrics::counter;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{AppConfig, ForecastingConfig, TrainingPolicy};
use crate::entities::demand_forecast;
use crate::errors::{ErrorKind, ForecastError};
use crate::ml::features::{DataQualityFlag, FeatureBuilder, ObservedDemand, WARMUP_DAYS};
use crate::ml::metrics::{self, EvaluationMetrics};
use crate::ml::model_store::{FsModelStore, ModelStore};
use crate::ml::predictor::{Predictor, ProductHistory};
use crate::ml::trainer::{Trainer, TrainedModel};
use crate::ml::CountryCalendar;
use crate::repositories::{
    ForecastRepository, ForecastSink, InventorySnapshots, NewForecast, OrderHistoryRepository,
    ProductCatalog, ProductRepository, SalesHistory,
};

pub const MAX_HORIZON_DAYS: u32 = 365;

/// Lifecycle of a forecast batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchState {
    Idle,
    Running,
    Completed,
    Failed,
}

/// Cooperative stop request, checked between products.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Where the model behind a forecast came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModelSource {
    Trained,
    Stored,
}

/// A product the batch could not forecast, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductFailure {
    pub product_id: Uuid,
    pub kind: ErrorKind,
    pub reason: String,
}

/// Outcome for one successfully forecast product
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductForecast {
    pub product_id: Uuid,
    pub forecast_date: NaiveDate,
    pub predicted_demand: i32,
    pub confidence_score: f64,
    pub model_source: ModelSource,
    /// Cross-validation metrics when the model was trained in this run
    pub training: Option<EvaluationMetrics>,
    pub quality_flags: Vec<DataQualityFlag>,
}

/// Result of one `generate_forecasts` call
#[derive(Debug, Clone, Serialize)]
pub struct ForecastSummary {
    pub batch_id: Uuid,
    pub state: BatchState,
    pub horizon_days: u32,
    pub forecast_date: NaiveDate,
    /// Forecast rows created or updated
    pub created: usize,
    /// Products without enough history
    pub skipped: Vec<ProductFailure>,
    /// Products that failed for any other per-product reason
    pub errors: Vec<ProductFailure>,
    pub cancelled: bool,
    pub forecasts: Vec<ProductForecast>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Accuracy of persisted forecasts against what actually sold.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub products: usize,
    pub metrics: EvaluationMetrics,
}

/// Collaborators of the forecasting service
#[derive(Clone)]
pub struct ForecastingDeps {
    pub history: Arc<dyn SalesHistory>,
    pub catalog: Arc<dyn ProductCatalog>,
    pub inventory: Arc<dyn InventorySnapshots>,
    pub forecasts: Arc<dyn ForecastSink>,
    pub models: Arc<dyn ModelStore>,
    pub clock: Arc<dyn Clock>,
}

impl ForecastingDeps {
    /// Database-backed collaborators and a file-system model store.
    pub fn from_connection(
        db: Arc<DatabaseConnection>,
        config: &AppConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let products = Arc::new(ProductRepository::new(db.clone()));
        Self {
            history: Arc::new(OrderHistoryRepository::new(db.clone(), clock.clone())),
            catalog: products.clone(),
            inventory: products,
            forecasts: Arc::new(ForecastRepository::new(db)),
            models: Arc::new(FsModelStore::new(config.forecasting.model_dir.clone())),
            clock,
        }
    }
}

fn lock_state(state: &Mutex<BatchState>) -> MutexGuard<'_, BatchState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds the RUNNING slot for one batch. Dropping it without `finish`
/// (the batch future was abandoned mid-run) leaves the service FAILED.
struct BatchGuard {
    state: Arc<Mutex<BatchState>>,
    outcome: Option<BatchState>,
}

impl BatchGuard {
    fn acquire(state: &Arc<Mutex<BatchState>>) -> Result<Self, ForecastError> {
        let mut current = lock_state(state);
        if *current == BatchState::Running {
            return Err(ForecastError::InvalidOperation(
                "a forecast batch is already running".to_string(),
            ));
        }
        *current = BatchState::Running;
        Ok(Self {
            state: state.clone(),
            outcome: None,
        })
    }

    fn finish(mut self, outcome: BatchState) {
        self.outcome = Some(outcome);
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        let outcome = match self.outcome {
            Some(outcome) => outcome,
            None => {
                counter!("forecast.batch.abandoned", 1);
                warn!("Forecast batch abandoned before completion");
                BatchState::Failed
            }
        };
        *lock_state(&self.state) = outcome;
    }
}

/// Batch orchestrator: history -> features -> model -> prediction -> upsert,
/// product by product.
#[derive(Clone)]
pub struct ForecastingService {
    deps: ForecastingDeps,
    settings: ForecastingConfig,
    builder: FeatureBuilder,
    trainer: Trainer,
    predictor: Predictor,
    state: Arc<Mutex<BatchState>>,
    cancel: CancellationFlag,
}

impl ForecastingService {
    pub fn new(deps: ForecastingDeps, config: &AppConfig) -> Result<Self, ForecastError> {
        let calendar = Arc::new(CountryCalendar::from_config(&config.forecasting)?);
        let builder = FeatureBuilder::new(calendar);
        Ok(Self {
            trainer: Trainer::new(config.model.clone(), config.forecasting.cv_folds),
            predictor: Predictor::new(builder.clone(), config.confidence.clone()),
            builder,
            settings: config.forecasting.clone(),
            deps,
            state: Arc::new(Mutex::new(BatchState::Idle)),
            cancel: CancellationFlag::new(),
        })
    }

    pub fn from_connection(
        db: Arc<DatabaseConnection>,
        config: &AppConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ForecastError> {
        Self::new(ForecastingDeps::from_connection(db, config, clock), config)
    }

    /// Shared flag; setting it stops the running batch before its next product.
    pub fn cancellation_flag(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    pub async fn state(&self) -> BatchState {
        *lock_state(&self.state)
    }

    pub fn default_horizon_days(&self) -> u32 {
        self.settings.default_horizon_days
    }

    /// Forecasts `today + horizon_days` for `product_ids` (default: every
    /// active product). Per-product failures are recorded in the summary;
    /// infrastructure failures mark the batch FAILED and are returned.
    #[instrument(skip(self, product_ids), fields(product_count = product_ids.as_ref().map(|p| p.len())))]
    pub async fn generate_forecasts(
        &self,
        horizon_days: u32,
        product_ids: Option<Vec<Uuid>>,
    ) -> Result<ForecastSummary, ForecastError> {
        if !(1..=MAX_HORIZON_DAYS).contains(&horizon_days) {
            return Err(ForecastError::InvalidInput(format!(
                "horizon_days must be between 1 and {}, got {}",
                MAX_HORIZON_DAYS, horizon_days
            )));
        }

        let guard = BatchGuard::acquire(&self.state)?;
        counter!("forecast.batch.started", 1);

        let result = self.run_batch(horizon_days, product_ids).await;

        let final_state = if result.is_ok() {
            BatchState::Completed
        } else {
            BatchState::Failed
        };
        guard.finish(final_state);

        match result {
            Ok(mut summary) => {
                summary.state = final_state;
                counter!("forecast.batch.completed", 1);
                info!(
                    batch_id = %summary.batch_id,
                    created = summary.created,
                    skipped = summary.skipped.len(),
                    errors = summary.errors.len(),
                    cancelled = summary.cancelled,
                    "Forecast batch completed"
                );
                Ok(summary)
            }
            Err(e) => {
                counter!("forecast.batch.failed", 1);
                error!(error = %e, "Forecast batch failed");
                Err(e)
            }
        }
    }

    /// Runs a full batch every `every` until `shutdown` resolves and returns
    /// how many batches ran. A shutdown during a batch sets the cancellation
    /// flag and waits for the current product before returning.
    pub async fn run_scheduled<F>(
        &self,
        horizon_days: u32,
        every: std::time::Duration,
        shutdown: impl Future<Output = ()>,
        mut on_batch: F,
    ) -> Result<usize, ForecastError>
    where
        F: FnMut(Result<ForecastSummary, ForecastError>),
    {
        if every.is_zero() {
            return Err(ForecastError::InvalidInput(
                "schedule interval must be positive".to_string(),
            ));
        }
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(every);
        let mut batches = 0;

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(batches, "Scheduler shutdown requested");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let batch = self.generate_forecasts(horizon_days, None);
            tokio::pin!(batch);
            let interrupted = tokio::select! {
                result = &mut batch => {
                    on_batch(result);
                    false
                }
                _ = &mut shutdown => true,
            };
            batches += 1;

            if interrupted {
                warn!("Shutdown requested mid-batch, stopping after the current product");
                self.cancel.cancel();
                on_batch(batch.await);
                break;
            }
        }
        Ok(batches)
    }

    async fn run_batch(
        &self,
        horizon_days: u32,
        product_ids: Option<Vec<Uuid>>,
    ) -> Result<ForecastSummary, ForecastError> {
        let started_at = self.deps.clock.now();
        let forecast_date = self.deps.clock.today() + Duration::days(i64::from(horizon_days));
        let batch_id = Uuid::new_v4();

        let product_ids = match product_ids {
            Some(ids) => ids,
            None => self.deps.catalog.list_product_ids().await?,
        };
        info!(
            %batch_id,
            %forecast_date,
            products = product_ids.len(),
            policy = %self.settings.training_policy,
            "Starting forecast batch"
        );

        let mut summary = ForecastSummary {
            batch_id,
            state: BatchState::Running,
            horizon_days,
            forecast_date,
            created: 0,
            skipped: Vec::new(),
            errors: Vec::new(),
            cancelled: false,
            forecasts: Vec::new(),
            started_at,
            finished_at: started_at,
        };

        for product_id in product_ids {
            if self.cancel.is_cancelled() {
                warn!(%batch_id, "Forecast batch cancelled before product {}", product_id);
                summary.cancelled = true;
                break;
            }

            match self.forecast_product(product_id, forecast_date).await {
                Ok(outcome) => {
                    summary.created += 1;
                    counter!("forecast.products.forecasted", 1);
                    summary.forecasts.push(outcome);
                }
                Err(e) if e.is_recoverable() => {
                    counter!("forecast.products.skipped", 1, "reason" => e.kind().to_string());
                    warn!(product_id = %product_id, error = %e, "Skipping product");
                    let failure = ProductFailure {
                        product_id,
                        kind: e.kind(),
                        reason: e.summary_message(),
                    };
                    if e.kind() == ErrorKind::InsufficientData {
                        summary.skipped.push(failure);
                    } else {
                        summary.errors.push(failure);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        summary.finished_at = self.deps.clock.now();
        Ok(summary)
    }

    /// Runs the full pipeline for one product and persists the forecast.
    #[instrument(skip(self))]
    pub async fn forecast_product(
        &self,
        product_id: Uuid,
        forecast_date: NaiveDate,
    ) -> Result<ProductForecast, ForecastError> {
        let product = self
            .deps
            .catalog
            .find_product(product_id)
            .await?
            .ok_or(ForecastError::ProductNotFound(product_id))?;

        // Today is still trading; the series ends at the last complete day.
        let last_complete_day = self.deps.clock.today() - Duration::days(1);
        let lines: Vec<_> = self
            .deps
            .history
            .load_history(product_id, self.settings.lookback_days)
            .await?
            .into_iter()
            .filter(|line| line.date <= last_complete_day)
            .collect();
        let series = ObservedDemand::from_order_lines(product_id, &lines, last_complete_day);

        let (model, model_source, training) = self.obtain_model(&series).await?;

        let inventory = self.deps.inventory.snapshot(product_id).await?;
        let price = product
            .price
            .to_f64()
            .or_else(|| series.days.last().map(|d| d.price))
            .unwrap_or(0.0);
        let history = ProductHistory {
            product_id,
            price,
            series: &series,
            observation_count: lines.len(),
            inventory: inventory.as_ref(),
        };
        let prediction = self.predictor.predict(&model, &history, forecast_date)?;

        let confidence_score = Decimal::from_f64(prediction.confidence_score)
            .map(|d| d.round_dp(2))
            .ok_or_else(|| {
                ForecastError::InvalidOperation(format!(
                    "confidence {} is not representable",
                    prediction.confidence_score
                ))
            })?;

        self.deps
            .forecasts
            .upsert(&NewForecast {
                product_id,
                forecast_date,
                predicted_demand: prediction.predicted_demand,
                confidence_score,
                algorithm_version: self.settings.algorithm_version.clone(),
                generated_at: self.deps.clock.now(),
            })
            .await?;

        info!(
            product_id = %product_id,
            %forecast_date,
            predicted_demand = prediction.predicted_demand,
            confidence = prediction.confidence_score,
            source = %model_source,
            "Forecast stored"
        );

        Ok(ProductForecast {
            product_id,
            forecast_date,
            predicted_demand: prediction.predicted_demand,
            confidence_score: prediction.confidence_score,
            model_source,
            training,
            quality_flags: prediction.quality_flags,
        })
    }

    /// Stored model under `reuse_stored` when one loads cleanly, otherwise a
    /// freshly trained (and saved) one.
    async fn obtain_model(
        &self,
        series: &ObservedDemand,
    ) -> Result<(TrainedModel, ModelSource, Option<EvaluationMetrics>), ForecastError> {
        let product_id = series.product_id;
        let key = product_id.to_string();

        if self.settings.training_policy == TrainingPolicy::ReuseStored {
            match self.deps.models.load(&key).await {
                Ok(Some(model)) => return Ok((model, ModelSource::Stored, None)),
                Ok(None) => info!(product_id = %product_id, "No stored model, training"),
                Err(e @ ForecastError::ArtifactCorrupt { .. }) => {
                    warn!(product_id = %product_id, error = %e, "Stored model unusable, retraining");
                    self.deps.models.delete(&key).await?;
                }
                Err(e) => return Err(e),
            }
        }

        let table = self.builder.build_training_table(series);
        if table.is_empty() {
            return Err(ForecastError::insufficient_data(
                product_id,
                format!(
                    "{} days of history, need more than {}",
                    series.days.len(),
                    WARMUP_DAYS
                ),
            ));
        }

        let trainer = self.trainer.clone();
        let (model, evaluation) = tokio::task::spawn_blocking(move || trainer.train(&table))
            .await
            .map_err(|e| ForecastError::InvalidOperation(format!("training task failed: {}", e)))??;

        self.deps.models.save(&key, &model).await?;
        Ok((model, ModelSource::Trained, Some(evaluation)))
    }

    /// Compares forecasts dated in the trailing `window_days` with actual
    /// daily demand.
    #[instrument(skip(self, product_ids))]
    pub async fn evaluate_recent(
        &self,
        window_days: u32,
        product_ids: Option<Vec<Uuid>>,
    ) -> Result<EvaluationReport, ForecastError> {
        if window_days == 0 {
            return Err(ForecastError::InvalidInput(
                "window_days must be at least 1".to_string(),
            ));
        }
        let window_end = self.deps.clock.today();
        let window_start = window_end - Duration::days(i64::from(window_days));

        let product_ids = match product_ids {
            Some(ids) => ids,
            None => self.deps.catalog.list_product_ids().await?,
        };
        let forecasts = self
            .deps
            .forecasts
            .find_in_range(window_start, window_end, Some(product_ids.as_slice()))
            .await?;
        let mut by_product: BTreeMap<Uuid, Vec<demand_forecast::Model>> = BTreeMap::new();
        for f in forecasts {
            by_product.entry(f.product_id).or_default().push(f);
        }

        let mut actual = Vec::new();
        let mut predicted = Vec::new();
        let mut sales_days = 0usize;
        let mut covered_days = 0usize;

        for product_id in &product_ids {
            let daily = self.actual_daily_demand(*product_id, window_days, window_start).await?;
            let product_forecasts = by_product.remove(product_id).unwrap_or_default();
            let forecast_dates: BTreeSet<NaiveDate> =
                product_forecasts.iter().map(|f| f.forecast_date).collect();

            for (date, qty) in &daily {
                if *qty > 0.0 {
                    sales_days += 1;
                    if forecast_dates.contains(date) {
                        covered_days += 1;
                    }
                }
            }
            for f in &product_forecasts {
                actual.push(daily.get(&f.forecast_date).copied().unwrap_or(0.0));
                predicted.push(f64::from(f.predicted_demand));
            }
        }

        let report = EvaluationReport {
            window_start,
            window_end,
            products: product_ids.len(),
            metrics: EvaluationMetrics {
                mae: metrics::mae(&actual, &predicted),
                rmse: metrics::rmse(&actual, &predicted),
                smape: metrics::smape(&actual, &predicted),
                coverage: metrics::coverage(covered_days, sales_days),
                folds: 0,
                samples: actual.len(),
            },
        };
        info!(
            samples = report.metrics.samples,
            mae = ?report.metrics.mae,
            coverage = ?report.metrics.coverage,
            "Recent forecasts evaluated"
        );
        Ok(report)
    }

    async fn actual_daily_demand(
        &self,
        product_id: Uuid,
        window_days: u32,
        window_start: NaiveDate,
    ) -> Result<BTreeMap<NaiveDate, f64>, ForecastError> {
        let lines = match self.deps.history.load_history(product_id, window_days).await {
            Ok(lines) => lines,
            Err(ForecastError::InsufficientData(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        let mut daily = BTreeMap::new();
        for line in lines.iter().filter(|l| l.date >= window_start) {
            *daily.entry(line.date).or_insert(0.0) += line.quantity as f64;
        }
        Ok(daily)
    }

    /// Persisted forecasts for one product, optionally bounded by date.
    pub async fn forecasts_for_product(
        &self,
        product_id: Uuid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<demand_forecast::Model>, ForecastError> {
        self.deps
            .forecasts
            .find_for_product(product_id, from, to)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_flag_is_shared() {
        let flag = CancellationFlag::new();
        let other = flag.clone();
        other.cancel();
        assert!(flag.is_cancelled());
        flag.reset();
        assert!(!other.is_cancelled());
    }

    #[test]
    fn batch_state_renders_upper_case() {
        assert_eq!(BatchState::Completed.to_string(), "COMPLETED");
        assert_eq!(
            serde_json::to_value(BatchState::Failed).unwrap(),
            serde_json::json!("FAILED")
        );
    }
}
