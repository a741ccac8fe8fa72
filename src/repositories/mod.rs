use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::{demand_forecast, inventory, product};
use crate::errors::ForecastError;

pub mod forecast_repository;
pub mod order_history_repository;
pub mod product_repository;

pub use forecast_repository::{ForecastRepository, NewForecast};
pub use order_history_repository::OrderHistoryRepository;
pub use product_repository::ProductRepository;

/// Repository trait for common database operations
pub trait Repository {
    fn get_db(&self) -> &DatabaseConnection;
}

#[derive(Debug, Clone)]
pub struct BaseRepository {
    db: Arc<DatabaseConnection>,
}

impl BaseRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl Repository for BaseRepository {
    fn get_db(&self) -> &DatabaseConnection {
        &self.db
    }
}

/// One order line as seen by the forecaster.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderLine {
    pub date: NaiveDate,
    pub quantity: i64,
    pub unit_price: Decimal,
}

/// Read access to order-line history.
#[async_trait]
pub trait SalesHistory: Send + Sync {
    /// Order lines for `product_id` dated within `[now - lookback_days, now]`,
    /// oldest first. Fails with `InsufficientData` when there are none.
    async fn load_history(
        &self,
        product_id: Uuid,
        lookback_days: u32,
    ) -> Result<Vec<OrderLine>, ForecastError>;
}

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Identifiers of every product eligible for forecasting.
    async fn list_product_ids(&self) -> Result<Vec<Uuid>, ForecastError>;

    async fn find_product(&self, id: Uuid) -> Result<Option<product::Model>, ForecastError>;
}

#[async_trait]
pub trait InventorySnapshots: Send + Sync {
    async fn snapshot(&self, product_id: Uuid) -> Result<Option<inventory::Model>, ForecastError>;
}

/// Write/read surface of the forecast table.
#[async_trait]
pub trait ForecastSink: Send + Sync {
    /// Insert or overwrite the row keyed by (product_id, forecast_date).
    async fn upsert(&self, forecast: &NewForecast) -> Result<(), ForecastError>;

    async fn find_for_product(
        &self,
        product_id: Uuid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<demand_forecast::Model>, ForecastError>;

    /// Forecasts dated within `[from, to]`, optionally restricted to some products.
    async fn find_in_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        product_ids: Option<&[Uuid]>,
    ) -> Result<Vec<demand_forecast::Model>, ForecastError>;

    /// Forecast with the greatest forecast_date for the product.
    async fn latest_for_product(
        &self,
        product_id: Uuid,
    ) -> Result<Option<demand_forecast::Model>, ForecastError>;
}
