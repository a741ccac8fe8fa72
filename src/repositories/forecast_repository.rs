use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::entities::demand_forecast::{self, Column, Entity as DemandForecast};
use crate::errors::ForecastError;
use crate::repositories::{ForecastSink, Repository};

use super::BaseRepository;

/// Values for one forecast row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewForecast {
    pub product_id: Uuid,
    pub forecast_date: NaiveDate,
    pub predicted_demand: i32,
    pub confidence_score: Decimal,
    pub algorithm_version: String,
    pub generated_at: DateTime<Utc>,
}

/// Repository for the `demand_forecasts` table
#[derive(Debug, Clone)]
pub struct ForecastRepository {
    base: BaseRepository,
}

impl ForecastRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    pub async fn count(&self) -> Result<u64, ForecastError> {
        DemandForecast::find()
            .count(self.base.get_db())
            .await
            .map_err(ForecastError::DatabaseError)
    }
}

#[async_trait]
impl ForecastSink for ForecastRepository {
    #[instrument(skip(self, forecast), fields(product_id = %forecast.product_id, forecast_date = %forecast.forecast_date))]
    async fn upsert(&self, forecast: &NewForecast) -> Result<(), ForecastError> {
        let row = demand_forecast::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(forecast.product_id),
            forecast_date: Set(forecast.forecast_date),
            predicted_demand: Set(forecast.predicted_demand),
            confidence_score: Set(forecast.confidence_score),
            algorithm_version: Set(forecast.algorithm_version.clone()),
            created_at: Set(forecast.generated_at),
            updated_at: Set(forecast.generated_at),
        };

        // Single statement, so concurrent writers for one key cannot interleave.
        DemandForecast::insert(row)
            .on_conflict(
                OnConflict::columns([Column::ProductId, Column::ForecastDate])
                    .update_columns([
                        Column::PredictedDemand,
                        Column::ConfidenceScore,
                        Column::AlgorithmVersion,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.base.get_db())
            .await
            .map_err(ForecastError::DatabaseError)?;

        debug!("Forecast upserted");
        Ok(())
    }

    async fn find_for_product(
        &self,
        product_id: Uuid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<demand_forecast::Model>, ForecastError> {
        let mut query = DemandForecast::find().filter(Column::ProductId.eq(product_id));
        if let Some(from) = from {
            query = query.filter(Column::ForecastDate.gte(from));
        }
        if let Some(to) = to {
            query = query.filter(Column::ForecastDate.lte(to));
        }
        query
            .order_by_asc(Column::ForecastDate)
            .all(self.base.get_db())
            .await
            .map_err(ForecastError::DatabaseError)
    }

    async fn find_in_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        product_ids: Option<&[Uuid]>,
    ) -> Result<Vec<demand_forecast::Model>, ForecastError> {
        let mut query = DemandForecast::find()
            .filter(Column::ForecastDate.gte(from))
            .filter(Column::ForecastDate.lte(to));
        if let Some(ids) = product_ids {
            query = query.filter(Column::ProductId.is_in(ids.iter().copied()));
        }
        query
            .order_by_asc(Column::ProductId)
            .order_by_asc(Column::ForecastDate)
            .all(self.base.get_db())
            .await
            .map_err(ForecastError::DatabaseError)
    }

    async fn latest_for_product(
        &self,
        product_id: Uuid,
    ) -> Result<Option<demand_forecast::Model>, ForecastError> {
        DemandForecast::find()
            .filter(Column::ProductId.eq(product_id))
            .order_by_desc(Column::ForecastDate)
            .one(self.base.get_db())
            .await
            .map_err(ForecastError::DatabaseError)
    }
}
