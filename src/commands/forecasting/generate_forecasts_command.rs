use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    commands::Command,
    errors::ForecastError,
    services::forecasting::{ForecastSummary, ForecastingService},
};

/// Generate forecasts `horizon_days` ahead, for every active product or a
/// given subset.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GenerateForecastsCommand {
    #[validate(range(min = 1, max = 365))]
    pub horizon_days: u32,
    #[validate(length(min = 1, message = "product list cannot be empty"))]
    pub product_ids: Option<Vec<Uuid>>,
}

#[async_trait]
impl Command for GenerateForecastsCommand {
    type Result = ForecastSummary;

    #[instrument(skip(self, service), fields(horizon_days = self.horizon_days))]
    async fn execute(
        &self,
        service: Arc<ForecastingService>,
    ) -> Result<Self::Result, ForecastError> {
        self.validate()?;

        info!(
            products = ?self.product_ids.as_ref().map(Vec::len),
            "Generating demand forecasts"
        );
        service
            .generate_forecasts(self.horizon_days, self.product_ids.clone())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_horizon() {
        for horizon_days in [0, 366] {
            let cmd = GenerateForecastsCommand {
                horizon_days,
                product_ids: None,
            };
            assert!(cmd.validate().is_err());
        }
    }

    #[test]
    fn rejects_empty_product_list() {
        let cmd = GenerateForecastsCommand {
            horizon_days: 30,
            product_ids: Some(Vec::new()),
        };
        assert!(cmd.validate().is_err());
    }

    #[test]
    fn accepts_defaults() {
        let cmd = GenerateForecastsCommand {
            horizon_days: 30,
            product_ids: None,
        };
        assert!(cmd.validate().is_ok());
    }
}
