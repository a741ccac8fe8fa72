use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::config::ReorderConfig;
use crate::errors::ForecastError;
use crate::repositories::{ForecastSink, InventorySnapshots, ProductCatalog};
use crate::services::forecasting::ForecastingDeps;

/// Why a product was flagged for reorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReorderReason {
    AtOrBelowReorderPoint,
    LowCover,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReorderSuggestion {
    pub product_id: Uuid,
    pub sku: String,
    pub current_stock: i32,
    pub reorder_point: i32,
    pub daily_demand: i32,
    /// `None` when the latest forecast predicts no demand
    pub days_of_cover: Option<f64>,
    pub suggested_quantity: i32,
    pub reasons: Vec<ReorderReason>,
}

/// Turns the latest stored forecast per product into reorder suggestions.
#[derive(Clone)]
pub struct ReorderAdvisor {
    catalog: Arc<dyn ProductCatalog>,
    inventory: Arc<dyn InventorySnapshots>,
    forecasts: Arc<dyn ForecastSink>,
    config: ReorderConfig,
}

impl ReorderAdvisor {
    pub fn new(
        catalog: Arc<dyn ProductCatalog>,
        inventory: Arc<dyn InventorySnapshots>,
        forecasts: Arc<dyn ForecastSink>,
        config: ReorderConfig,
    ) -> Self {
        Self {
            catalog,
            inventory,
            forecasts,
            config,
        }
    }

    pub fn from_deps(deps: &ForecastingDeps, config: ReorderConfig) -> Self {
        Self::new(
            deps.catalog.clone(),
            deps.inventory.clone(),
            deps.forecasts.clone(),
            config,
        )
    }

    /// Flagged products only. Products without an inventory row or a stored
    /// forecast are left out.
    #[instrument(skip(self, product_ids))]
    pub async fn suggest(
        &self,
        product_ids: Option<Vec<Uuid>>,
    ) -> Result<Vec<ReorderSuggestion>, ForecastError> {
        let product_ids = match product_ids {
            Some(ids) => ids,
            None => self.catalog.list_product_ids().await?,
        };

        let mut suggestions = Vec::new();
        for product_id in product_ids {
            let Some(product) = self.catalog.find_product(product_id).await? else {
                debug!(%product_id, "Unknown product, no suggestion");
                continue;
            };
            let Some(stock) = self.inventory.snapshot(product_id).await? else {
                debug!(%product_id, "No inventory snapshot");
                continue;
            };
            let Some(forecast) = self.forecasts.latest_for_product(product_id).await? else {
                debug!(%product_id, "No forecast stored");
                continue;
            };

            let min_order = product
                .min_order_quantity
                .unwrap_or(self.config.min_order_quantity)
                .max(1);
            if let Some(suggestion) = evaluate(
                &self.config,
                product_id,
                product.sku,
                stock.current_stock,
                stock.reorder_point,
                forecast.predicted_demand,
                min_order,
            ) {
                suggestions.push(suggestion);
            }
        }

        info!(flagged = suggestions.len(), "Reorder suggestions computed");
        Ok(suggestions)
    }
}

fn evaluate(
    config: &ReorderConfig,
    product_id: Uuid,
    sku: String,
    current_stock: i32,
    reorder_point: i32,
    daily_demand: i32,
    min_order_quantity: i32,
) -> Option<ReorderSuggestion> {
    let daily_demand = daily_demand.max(0);
    let days_of_cover =
        (daily_demand > 0).then(|| f64::from(current_stock) / f64::from(daily_demand));

    let mut reasons = Vec::new();
    if current_stock <= reorder_point {
        reasons.push(ReorderReason::AtOrBelowReorderPoint);
    }
    if days_of_cover.is_some_and(|cover| cover < config.low_cover_days) {
        reasons.push(ReorderReason::LowCover);
    }
    if reasons.is_empty() {
        return None;
    }

    let needed = i64::from(daily_demand) * i64::from(config.coverage_days) - i64::from(current_stock);
    let suggested_quantity =
        i32::try_from(needed.max(i64::from(min_order_quantity))).unwrap_or(i32::MAX);

    Some(ReorderSuggestion {
        product_id,
        sku,
        current_stock,
        reorder_point,
        daily_demand,
        days_of_cover,
        suggested_quantity,
        reasons,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn run(stock: i32, reorder_point: i32, daily: i32) -> Option<ReorderSuggestion> {
        evaluate(
            &ReorderConfig::default(),
            Uuid::nil(),
            "SKU-1".to_string(),
            stock,
            reorder_point,
            daily,
            1,
        )
    }

    #[test]
    fn healthy_stock_is_not_flagged() {
        assert!(run(500, 20, 10).is_none());
    }

    #[test]
    fn low_cover_orders_a_full_coverage_period() {
        let s = run(50, 20, 10).expect("flagged");
        assert_eq!(s.reasons, vec![ReorderReason::LowCover]);
        assert_eq!(s.days_of_cover, Some(5.0));
        assert_eq!(s.suggested_quantity, 10 * 30 - 50);
    }

    #[rstest]
    #[case(20, 20, 0, 1)]
    #[case(5, 20, 0, 1)]
    #[case(0, 20, 1, 30)]
    fn reorder_point_breach_respects_minimum(
        #[case] stock: i32,
        #[case] reorder_point: i32,
        #[case] daily: i32,
        #[case] expected: i32,
    ) {
        let s = run(stock, reorder_point, daily).expect("flagged");
        assert!(s.reasons.contains(&ReorderReason::AtOrBelowReorderPoint));
        assert_eq!(s.suggested_quantity, expected);
    }

    #[test]
    fn zero_demand_has_no_cover_figure() {
        let s = run(10, 20, 0).expect("flagged");
        assert_eq!(s.days_of_cover, None);
        assert_eq!(s.reasons, vec![ReorderReason::AtOrBelowReorderPoint]);
    }
}
