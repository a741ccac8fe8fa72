use async_trait::async_trait;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::{inventory, product};
use crate::errors::ForecastError;
use crate::repositories::{InventorySnapshots, ProductCatalog, Repository};

use super::BaseRepository;

/// Product catalog and inventory snapshots.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    base: BaseRepository,
}

impl ProductRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }
}

#[async_trait]
impl ProductCatalog for ProductRepository {
    async fn list_product_ids(&self) -> Result<Vec<Uuid>, ForecastError> {
        product::Entity::find()
            .select_only()
            .column(product::Column::Id)
            .filter(product::Column::IsActive.eq(true))
            .order_by_asc(product::Column::Sku)
            .into_tuple::<Uuid>()
            .all(self.base.get_db())
            .await
            .map_err(ForecastError::DatabaseError)
    }

    async fn find_product(&self, id: Uuid) -> Result<Option<product::Model>, ForecastError> {
        product::Entity::find_by_id(id)
            .one(self.base.get_db())
            .await
            .map_err(ForecastError::DatabaseError)
    }
}

#[async_trait]
impl InventorySnapshots for ProductRepository {
    async fn snapshot(&self, product_id: Uuid) -> Result<Option<inventory::Model>, ForecastError> {
        inventory::Entity::find_by_id(product_id)
            .one(self.base.get_db())
            .await
            .map_err(ForecastError::DatabaseError)
    }
}
