/*!
 * # Feature Builder
 *
 * Turns an order-line history into a daily demand series and then into the
 * supervised-learning table the trainer consumes. The same lag/rolling code
 * path builds the single vector used at prediction time, so training and
 * prediction can never disagree on how a feature is computed.
 */

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use super::holidays::HolidayCalendar;
use crate::repositories::OrderLine;

/// Ordered feature list. Models record this list and predictions are
/// aligned against the recorded copy, never by position alone.
pub const FEATURE_NAMES: [&str; 9] = [
    "price",
    "lag_7",
    "lag_30",
    "rolling_mean_7",
    "rolling_std_7",
    "day_of_week",
    "month",
    "is_weekend",
    "is_holiday",
];

/// Continuous features; the scaler standardizes these and leaves the
/// calendar flags untouched.
pub const NUMERIC_FEATURES: [&str; 5] = [
    "price",
    "lag_7",
    "lag_30",
    "rolling_mean_7",
    "rolling_std_7",
];

pub const SHORT_LAG_DAYS: usize = 7;
pub const LONG_LAG_DAYS: usize = 30;
pub const ROLLING_WINDOW_DAYS: usize = 7;

/// Value used for a feature that cannot be computed from the available history.
pub const FEATURE_DEFAULT: f64 = 0.0;

/// Days at the head of a series that cannot have every lag/rolling feature.
pub const WARMUP_DAYS: usize = max_usize(
    max_usize(SHORT_LAG_DAYS, LONG_LAG_DAYS),
    ROLLING_WINDOW_DAYS,
);

const fn max_usize(a: usize, b: usize) -> usize {
    if a > b {
        a
    } else {
        b
    }
}

pub fn feature_names() -> Vec<String> {
    FEATURE_NAMES.iter().map(|n| n.to_string()).collect()
}

/// Data-quality signals raised while building a prediction vector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "feature", rename_all = "snake_case")]
pub enum DataQualityFlag {
    /// History too short for this feature; the default was used
    Defaulted(String),
    /// The model expects a feature the builder does not produce
    MissingFromVector(String),
    /// The builder produced a feature the model was not trained on
    UnexpectedInVector(String),
}

/// One day of observed demand
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyDemand {
    pub date: NaiveDate,
    pub quantity: f64,
    pub revenue: f64,
    /// Realized unit price; carried forward on days without sales
    pub price: f64,
}

/// Contiguous daily demand series for one product. Days without sales are
/// present with zero quantity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservedDemand {
    pub product_id: Uuid,
    pub days: Vec<DailyDemand>,
}

impl ObservedDemand {
    /// Aggregates order lines per day and fills every missing day from the
    /// first observed date through `through` with zero demand.
    pub fn from_order_lines(product_id: Uuid, lines: &[OrderLine], through: NaiveDate) -> Self {
        let mut per_day: BTreeMap<NaiveDate, (f64, f64)> = BTreeMap::new();
        for line in lines.iter().filter(|l| l.date <= through) {
            let qty = line.quantity as f64;
            let price = line.unit_price.to_f64().unwrap_or(0.0);
            let entry = per_day.entry(line.date).or_insert((0.0, 0.0));
            entry.0 += qty;
            entry.1 += qty * price;
        }

        let first = match per_day.keys().next() {
            Some(first) => *first,
            None => {
                return Self {
                    product_id,
                    days: Vec::new(),
                }
            }
        };

        let mut days = Vec::with_capacity(((through - first).num_days() + 1).max(0) as usize);
        let mut last_price = 0.0;
        let mut date = first;
        while date <= through {
            let (quantity, revenue) = per_day.get(&date).copied().unwrap_or((0.0, 0.0));
            if quantity > 0.0 {
                last_price = revenue / quantity;
            }
            days.push(DailyDemand {
                date,
                quantity,
                revenue,
                price: last_price,
            });
            date += Duration::days(1);
        }

        Self { product_id, days }
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.days.first().map(|d| d.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.days.last().map(|d| d.date)
    }

    pub fn quantities(&self) -> Vec<f64> {
        self.days.iter().map(|d| d.quantity).collect()
    }

    /// Units sold over the trailing `window` days ending at the last observed day.
    pub fn trailing_total(&self, window: usize) -> f64 {
        let start = self.days.len().saturating_sub(window);
        self.days[start..].iter().map(|d| d.quantity).sum()
    }
}

/// Calendar attributes of a single date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarFeatures {
    /// Monday = 0 .. Sunday = 6
    pub day_of_week: u32,
    pub month: u32,
    pub day_of_month: u32,
    pub is_weekend: bool,
    pub is_holiday: bool,
}

/// Named feature values in a fixed order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    names: Vec<String>,
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn new(names: Vec<String>, values: Vec<f64>) -> Self {
        debug_assert_eq!(names.len(), values.len());
        Self { names, values }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| self.values[idx])
    }

    /// Reorders values to `expected`. Names the vector lacks get the default;
    /// every difference between the two lists is reported.
    pub fn align_to(&self, expected: &[String]) -> (Vec<f64>, Vec<DataQualityFlag>) {
        let mut flags = Vec::new();
        let values = expected
            .iter()
            .map(|name| match self.get(name) {
                Some(v) => v,
                None => {
                    flags.push(DataQualityFlag::MissingFromVector(name.clone()));
                    FEATURE_DEFAULT
                }
            })
            .collect();
        for name in &self.names {
            if !expected.contains(name) {
                flags.push(DataQualityFlag::UnexpectedInVector(name.clone()));
            }
        }
        (values, flags)
    }
}

/// Supervised-learning table: one row per date, columns in `feature_names` order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureTable {
    pub feature_names: Vec<String>,
    pub dates: Vec<NaiveDate>,
    pub rows: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Copy of the rows at `indices`, in order.
    pub fn subset(&self, indices: std::ops::Range<usize>) -> FeatureTable {
        FeatureTable {
            feature_names: self.feature_names.clone(),
            dates: self.dates[indices.clone()].to_vec(),
            rows: self.rows[indices.clone()].to_vec(),
            targets: self.targets[indices].to_vec(),
        }
    }
}

/// Lag and rolling features for the day following `history`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct HistoryFeatures {
    lag_7: Option<f64>,
    lag_30: Option<f64>,
    rolling_mean_7: Option<f64>,
    rolling_std_7: Option<f64>,
}

fn history_features(history: &[f64]) -> HistoryFeatures {
    let n = history.len();
    let lag = |days: usize| (n >= days).then(|| history[n - days]);
    let window = (n >= ROLLING_WINDOW_DAYS).then(|| &history[n - ROLLING_WINDOW_DAYS..]);

    HistoryFeatures {
        lag_7: lag(SHORT_LAG_DAYS),
        lag_30: lag(LONG_LAG_DAYS),
        rolling_mean_7: window.map(mean),
        rolling_std_7: window.map(sample_std),
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator).
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Builds training tables and prediction vectors.
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    calendar: Arc<dyn HolidayCalendar>,
}

impl FeatureBuilder {
    pub fn new(calendar: Arc<dyn HolidayCalendar>) -> Self {
        Self { calendar }
    }

    pub fn calendar_features(&self, date: NaiveDate) -> CalendarFeatures {
        let weekday = date.weekday();
        CalendarFeatures {
            day_of_week: weekday.num_days_from_monday(),
            month: date.month(),
            day_of_month: date.day(),
            is_weekend: matches!(weekday, Weekday::Sat | Weekday::Sun),
            is_holiday: self.calendar.is_holiday(date),
        }
    }

    /// One row per day after the warm-up period. Rows whose lag or rolling
    /// features would be undefined are never emitted, so the table is empty
    /// for series shorter than the warm-up.
    pub fn build_training_table(&self, series: &ObservedDemand) -> FeatureTable {
        let quantities = series.quantities();
        let mut table = FeatureTable {
            feature_names: feature_names(),
            ..Default::default()
        };

        for (idx, day) in series.days.iter().enumerate().skip(WARMUP_DAYS) {
            let hist = history_features(&quantities[..idx]);
            let (lag_7, lag_30, mean_7, std_7) = match (
                hist.lag_7,
                hist.lag_30,
                hist.rolling_mean_7,
                hist.rolling_std_7,
            ) {
                (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
                _ => continue,
            };
            let cal = self.calendar_features(day.date);
            table.dates.push(day.date);
            table.rows.push(vec![
                day.price,
                lag_7,
                lag_30,
                mean_7,
                std_7,
                f64::from(cal.day_of_week),
                f64::from(cal.month),
                flag(cal.is_weekend),
                flag(cal.is_holiday),
            ]);
            table.targets.push(day.quantity);
        }

        table
    }

    /// Feature vector for `date` given the daily quantities of every day
    /// before it (oldest first, ending the day before `date`).
    pub fn build_prediction_vector(
        &self,
        history: &[f64],
        date: NaiveDate,
        price: f64,
    ) -> (FeatureVector, Vec<DataQualityFlag>) {
        let hist = history_features(history);
        let cal = self.calendar_features(date);
        let mut flags = Vec::new();
        let mut or_default = |name: &str, value: Option<f64>| match value {
            Some(v) => v,
            None => {
                flags.push(DataQualityFlag::Defaulted(name.to_string()));
                FEATURE_DEFAULT
            }
        };

        let values = vec![
            price,
            or_default("lag_7", hist.lag_7),
            or_default("lag_30", hist.lag_30),
            or_default("rolling_mean_7", hist.rolling_mean_7),
            or_default("rolling_std_7", hist.rolling_std_7),
            f64::from(cal.day_of_week),
            f64::from(cal.month),
            flag(cal.is_weekend),
            flag(cal.is_holiday),
        ];

        (FeatureVector::new(feature_names(), values), flags)
    }
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}
