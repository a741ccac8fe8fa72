/*!
 * # Machine Learning Module
 *
 * Demand forecasting core: daily demand series and feature engineering,
 * holiday calendars, a deterministic gradient-boosted regressor, time-ordered
 * cross-validation, prediction with confidence scoring, and model
 * persistence.
 */

pub mod features;
pub mod gbm;
pub mod holidays;
pub mod metrics;
pub mod model_store;
pub mod predictor;
pub mod scaler;
pub mod trainer;

pub use features::{
    DataQualityFlag, FeatureBuilder, FeatureTable, FeatureVector, ObservedDemand, FEATURE_NAMES,
};
pub use holidays::{CountryCalendar, HolidayCalendar};
pub use metrics::EvaluationMetrics;
pub use model_store::{FsModelStore, ModelStore};
pub use predictor::{Prediction, Predictor, ProductHistory};
pub use trainer::{Trainer, TrainedModel};
