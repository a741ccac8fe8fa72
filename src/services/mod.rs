// Batch forecast generation and evaluation
pub mod forecasting;

// Downstream consumer of stored forecasts
pub mod reorder;

pub use forecasting::{
    BatchState, CancellationFlag, EvaluationReport, ForecastSummary, ForecastingDeps,
    ForecastingService, ModelSource, ProductFailure, ProductForecast,
};
pub use reorder::{ReorderAdvisor, ReorderReason, ReorderSuggestion};
