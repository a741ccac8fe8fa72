mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use common::TestEnv;
use demand_forecast::{
    commands::{
        forecasting::{EvaluateForecastsCommand, GenerateForecastsCommand},
        Command,
    },
    errors::ForecastError,
};
use rust_decimal::Decimal;

#[tokio::test]
async fn generate_command_runs_a_batch_for_selected_products() {
    let env = TestEnv::new().await;
    let chosen = env.seed_product("SKU-X", Decimal::new(700, 2)).await;
    let other = env.seed_product("SKU-Y", Decimal::new(700, 2)).await;
    env.seed_daily_sales(chosen, 60, |i| 2 + (i % 5) as i32).await;
    env.seed_daily_sales(other, 60, |_| 3).await;

    let command = GenerateForecastsCommand {
        horizon_days: 7,
        product_ids: Some(vec![chosen]),
    };
    let summary = command.execute(Arc::new(env.service())).await.unwrap();

    assert_eq!(summary.created, 1);
    assert_eq!(summary.forecasts[0].product_id, chosen);
}

#[tokio::test]
async fn invalid_commands_are_rejected_before_running() {
    let env = TestEnv::new().await;
    let service = Arc::new(env.service());

    let generate = GenerateForecastsCommand {
        horizon_days: 0,
        product_ids: None,
    };
    assert_matches!(
        generate.execute(service.clone()).await,
        Err(ForecastError::InvalidInput(_))
    );

    let evaluate = EvaluateForecastsCommand {
        window_days: 0,
        product_ids: None,
    };
    assert_matches!(
        evaluate.execute(service).await,
        Err(ForecastError::InvalidInput(_))
    );
}
