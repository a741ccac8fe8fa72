use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, FromQueryResult, JoinType, QueryFilter,
    QueryOrder, QuerySelect, RelationTrait,
};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::clock::Clock;
use crate::entities::{order, order_item};
use crate::errors::ForecastError;
use crate::repositories::{OrderLine, Repository, SalesHistory};

use super::BaseRepository;

#[derive(Debug, FromQueryResult)]
struct OrderLineRow {
    quantity: i32,
    unit_price: Decimal,
    order_date: DateTime<Utc>,
}

/// Order-line history backed by the `orders`/`order_items` tables.
#[derive(Debug, Clone)]
pub struct OrderHistoryRepository {
    base: BaseRepository,
    clock: Arc<dyn Clock>,
}

impl OrderHistoryRepository {
    pub fn new(db: Arc<DatabaseConnection>, clock: Arc<dyn Clock>) -> Self {
        Self {
            base: BaseRepository::new(db),
            clock,
        }
    }
}

#[async_trait]
impl SalesHistory for OrderHistoryRepository {
    #[instrument(skip(self))]
    async fn load_history(
        &self,
        product_id: Uuid,
        lookback_days: u32,
    ) -> Result<Vec<OrderLine>, ForecastError> {
        let now = self.clock.now();
        let from = now - Duration::days(i64::from(lookback_days));

        let rows = order_item::Entity::find()
            .select_only()
            .column(order_item::Column::Quantity)
            .column(order_item::Column::UnitPrice)
            .column_as(order::Column::OrderDate, "order_date")
            .join(JoinType::InnerJoin, order_item::Relation::Order.def())
            .filter(order_item::Column::ProductId.eq(product_id))
            .filter(order::Column::OrderDate.gte(from))
            .filter(order::Column::OrderDate.lte(now))
            .filter(order::Column::Status.ne(order::STATUS_CANCELLED))
            .order_by_asc(order::Column::OrderDate)
            .into_model::<OrderLineRow>()
            .all(self.base.get_db())
            .await
            .map_err(ForecastError::DatabaseError)?;

        if rows.is_empty() {
            return Err(ForecastError::insufficient_data(
                product_id,
                format!("no order lines in the last {} days", lookback_days),
            ));
        }

        debug!(product_id = %product_id, lines = rows.len(), "Loaded order history");

        Ok(rows
            .into_iter()
            .map(|row| OrderLine {
                date: row.order_date.date_naive(),
                quantity: i64::from(row.quantity),
                unit_price: row.unit_price,
            })
            .collect())
    }
}
