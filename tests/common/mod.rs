#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime};
use demand_forecast::{
    clock::{Clock, FixedClock},
    config::{AppConfig, TrainingPolicy},
    db::{self, DbConfig},
    entities::{inventory, order, order_item, product},
    repositories::ForecastRepository,
    services::forecasting::{ForecastingDeps, ForecastingService},
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use tempfile::TempDir;
use uuid::Uuid;

/// Harness backed by an in-memory SQLite database, a temporary model
/// directory and a clock pinned to noon on `today`.
pub struct TestEnv {
    pub db: Arc<DatabaseConnection>,
    pub config: AppConfig,
    pub clock: Arc<FixedClock>,
    pub today: NaiveDate,
    pub model_dir: TempDir,
}

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 30).expect("valid date")
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_policy(TrainingPolicy::Always).await
    }

    pub async fn with_policy(policy: TrainingPolicy) -> Self {
        let pool = db::establish_connection_with_config(&DbConfig::in_memory_sqlite())
            .await
            .expect("failed to open in-memory database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");

        let model_dir = TempDir::new().expect("temp dir");
        let mut config = AppConfig::default();
        config.forecasting.training_policy = policy;
        config.forecasting.model_dir = model_dir.path().to_path_buf();
        config.forecasting.cv_folds = 3;
        // Smaller ensembles keep the suite fast; behaviour is the same.
        config.model.n_estimators = 40;

        let today = today();
        Self {
            db: Arc::new(pool),
            config,
            clock: Arc::new(FixedClock::on(today)),
            today,
            model_dir,
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn deps(&self) -> ForecastingDeps {
        ForecastingDeps::from_connection(self.db.clone(), &self.config, self.clock())
    }

    pub fn service(&self) -> ForecastingService {
        ForecastingService::new(self.deps(), &self.config).expect("service")
    }

    pub fn forecasts(&self) -> ForecastRepository {
        ForecastRepository::new(self.db.clone())
    }

    pub async fn seed_product(&self, sku: &str, price: Decimal) -> Uuid {
        let id = Uuid::new_v4();
        product::ActiveModel {
            id: Set(id),
            name: Set(format!("Product {}", sku)),
            sku: Set(sku.to_string()),
            price: Set(price),
            is_active: Set(true),
            min_order_quantity: Set(None),
            created_at: Set(self.clock.now()),
        }
        .insert(&*self.db)
        .await
        .expect("insert product");
        id
    }

    pub async fn seed_inventory(&self, product_id: Uuid, current_stock: i32, reorder_point: i32) {
        inventory::ActiveModel {
            product_id: Set(product_id),
            current_stock: Set(current_stock),
            safety_stock: Set(10),
            reorder_point: Set(reorder_point),
            updated_at: Set(self.clock.now()),
        }
        .insert(&*self.db)
        .await
        .expect("insert inventory");
    }

    /// One order line per day for the `days` complete days ending yesterday.
    pub async fn seed_daily_sales(
        &self,
        product_id: Uuid,
        days: i64,
        quantity: impl Fn(i64) -> i32,
    ) {
        for i in 0..days {
            let date = self.today - Duration::days(days - i);
            self.seed_order_line(product_id, date, quantity(i), "completed")
                .await;
        }
    }

    pub async fn seed_order_line(&self, product_id: Uuid, date: NaiveDate, quantity: i32, status: &str) {
        let order_id = Uuid::new_v4();
        let placed_at = date
            .and_time(NaiveTime::from_hms_opt(8, 0, 0).expect("valid time"))
            .and_utc();
        order::ActiveModel {
            id: Set(order_id),
            order_number: Set(format!("ORD-{}", &order_id.simple().to_string()[..8])),
            status: Set(status.to_string()),
            order_date: Set(placed_at),
            created_at: Set(placed_at),
        }
        .insert(&*self.db)
        .await
        .expect("insert order");

        order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(product_id),
            quantity: Set(quantity),
            unit_price: Set(Decimal::new(1999, 2)),
        }
        .insert(&*self.db)
        .await
        .expect("insert order item");
    }
}
