use crate::{errors::ForecastError, services::forecasting::ForecastingService};
use async_trait::async_trait;
use std::sync::Arc;

/// Command trait for implementing the Command Pattern
///
/// A command carries the validated input of one forecasting operation and
/// runs it against the service.
#[async_trait]
pub trait Command: Send + Sync {
    /// The return type of the command when executed successfully
    type Result;

    /// Execute the command
    ///
    /// # Arguments
    /// * `service` - Forecasting service the command runs against
    async fn execute(
        &self,
        service: Arc<ForecastingService>,
    ) -> Result<Self::Result, ForecastError>;
}

pub mod forecasting;
