mod common;

use chrono::Duration;
use common::TestEnv;
use demand_forecast::{
    repositories::{ForecastSink, NewForecast},
    services::reorder::{ReorderAdvisor, ReorderReason},
};
use rust_decimal::Decimal;
use uuid::Uuid;

async fn store_forecast(env: &TestEnv, product_id: Uuid, days_ahead: i64, demand: i32) {
    env.forecasts()
        .upsert(&NewForecast {
            product_id,
            forecast_date: env.today + Duration::days(days_ahead),
            predicted_demand: demand,
            confidence_score: Decimal::new(9000, 2),
            algorithm_version: "v2.0".to_string(),
            generated_at: env.clock.0,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn flags_low_stock_using_latest_forecast() {
    let env = TestEnv::new().await;
    let low = env.seed_product("SKU-LOW", Decimal::new(500, 2)).await;
    let healthy = env.seed_product("SKU-OK", Decimal::new(500, 2)).await;
    let untracked = env.seed_product("SKU-NONE", Decimal::new(500, 2)).await;

    env.seed_inventory(low, 20, 20).await;
    env.seed_inventory(healthy, 1_000, 20).await;
    store_forecast(&env, low, 1, 3).await;
    // The later forecast wins.
    store_forecast(&env, low, 30, 10).await;
    store_forecast(&env, healthy, 30, 10).await;
    store_forecast(&env, untracked, 30, 10).await;

    let advisor = ReorderAdvisor::from_deps(&env.deps(), env.config.reorder.clone());
    let suggestions = advisor.suggest(None).await.unwrap();

    assert_eq!(suggestions.len(), 1);
    let s = &suggestions[0];
    assert_eq!(s.product_id, low);
    assert_eq!(s.daily_demand, 10);
    assert_eq!(s.days_of_cover, Some(2.0));
    assert_eq!(s.suggested_quantity, 10 * 30 - 20);
    assert_eq!(
        s.reasons,
        vec![ReorderReason::AtOrBelowReorderPoint, ReorderReason::LowCover]
    );
}

#[tokio::test]
async fn products_without_forecasts_get_no_suggestion() {
    let env = TestEnv::new().await;
    let product_id = env.seed_product("SKU-NEW", Decimal::new(500, 2)).await;
    env.seed_inventory(product_id, 0, 20).await;

    let advisor = ReorderAdvisor::from_deps(&env.deps(), env.config.reorder.clone());
    assert!(advisor.suggest(Some(vec![product_id])).await.unwrap().is_empty());
}
