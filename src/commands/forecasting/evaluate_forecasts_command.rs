use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use crate::{
    commands::Command,
    errors::ForecastError,
    services::forecasting::{EvaluationReport, ForecastingService},
};

/// Score stored forecasts from the trailing window against actual sales.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EvaluateForecastsCommand {
    #[validate(range(min = 1, max = 3650))]
    pub window_days: u32,
    pub product_ids: Option<Vec<Uuid>>,
}

#[async_trait]
impl Command for EvaluateForecastsCommand {
    type Result = EvaluationReport;

    #[instrument(skip(self, service), fields(window_days = self.window_days))]
    async fn execute(
        &self,
        service: Arc<ForecastingService>,
    ) -> Result<Self::Result, ForecastError> {
        self.validate()?;
        service
            .evaluate_recent(self.window_days, self.product_ids.clone())
            .await
    }
}
