mod common;

use assert_matches::assert_matches;
use chrono::Duration;
use common::TestEnv;
use demand_forecast::{
    errors::ForecastError,
    repositories::{
        ForecastSink, NewForecast, OrderHistoryRepository, ProductCatalog, ProductRepository,
        SalesHistory,
    },
};
use rust_decimal::Decimal;

#[tokio::test]
async fn history_excludes_cancelled_and_out_of_window_orders() {
    let env = TestEnv::new().await;
    let product_id = env.seed_product("SKU-H", Decimal::new(500, 2)).await;
    env.seed_order_line(product_id, env.today - Duration::days(3), 4, "completed")
        .await;
    env.seed_order_line(product_id, env.today - Duration::days(1), 6, "shipped")
        .await;
    env.seed_order_line(product_id, env.today - Duration::days(2), 50, "cancelled")
        .await;
    env.seed_order_line(product_id, env.today - Duration::days(400), 9, "completed")
        .await;

    let repo = OrderHistoryRepository::new(env.db.clone(), env.clock());
    let lines = repo.load_history(product_id, 365).await.unwrap();

    let observed: Vec<(i64, i64)> = lines
        .iter()
        .map(|l| ((env.today - l.date).num_days(), l.quantity))
        .collect();
    assert_eq!(observed, vec![(3, 4), (1, 6)]);
}

#[tokio::test]
async fn empty_history_is_insufficient_data() {
    let env = TestEnv::new().await;
    let product_id = env.seed_product("SKU-E", Decimal::new(500, 2)).await;

    let repo = OrderHistoryRepository::new(env.db.clone(), env.clock());
    assert_matches!(
        repo.load_history(product_id, 365).await,
        Err(ForecastError::InsufficientData(_))
    );
}

#[tokio::test]
async fn catalog_lists_products_in_sku_order() {
    let env = TestEnv::new().await;
    let b = env.seed_product("SKU-B", Decimal::new(500, 2)).await;
    let a = env.seed_product("SKU-A", Decimal::new(500, 2)).await;

    let repo = ProductRepository::new(env.db.clone());
    assert_eq!(repo.list_product_ids().await.unwrap(), vec![a, b]);
    assert!(repo.find_product(a).await.unwrap().is_some());
}

#[tokio::test]
async fn upsert_replaces_the_row_for_the_same_day() {
    let env = TestEnv::new().await;
    let product_id = env.seed_product("SKU-U", Decimal::new(500, 2)).await;
    let repo = env.forecasts();
    let date = env.today + Duration::days(30);

    for (demand, version) in [(5, "v1.0"), (8, "v2.0")] {
        repo.upsert(&NewForecast {
            product_id,
            forecast_date: date,
            predicted_demand: demand,
            confidence_score: Decimal::new(7550, 2),
            algorithm_version: version.to_string(),
            generated_at: env.clock.0,
        })
        .await
        .unwrap();
    }

    let rows = repo
        .find_for_product(product_id, Some(date), Some(date))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].predicted_demand, 8);
    assert_eq!(rows[0].algorithm_version, "v2.0");
    assert_eq!(repo.count().await.unwrap(), 1);

    let latest = repo.latest_for_product(product_id).await.unwrap().unwrap();
    assert_eq!(latest.forecast_date, date);
}
