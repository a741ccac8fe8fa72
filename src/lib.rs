//! Demand forecasting engine
//!
//! Turns per-product order history into daily demand forecasts with a
//! confidence score, persists them per (product, date), and derives reorder
//! suggestions from the stored forecasts.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod clock;
pub mod commands;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod migrator;
pub mod ml;
pub mod repositories;
pub mod services;

pub use errors::{ErrorKind, ForecastError};
pub use services::forecasting::{ForecastSummary, ForecastingService};
