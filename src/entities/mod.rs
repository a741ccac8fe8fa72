pub mod demand_forecast;
pub mod inventory;
pub mod order;
pub mod order_item;
pub mod product;
