use chrono::NaiveDate;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::ml::holidays::Country;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_DATABASE_URL: &str = "sqlite://forecast.db?mode=rwc";
const DEFAULT_MODEL_DIR: &str = "data/ml_models";
const DEFAULT_ALGORITHM_VERSION: &str = "v2.0";
const DEFAULT_HOLIDAY_COUNTRY: &str = "KE";

/// Database connection settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[serde(default = "default_database_url")]
    #[validate(length(min = 1))]
    pub url: String,

    /// Pool: max connections
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1))]
    pub max_connections: u32,

    /// Pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_db_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_db_max_connections(),
            min_connections: default_db_min_connections(),
            connect_timeout_secs: default_db_connect_timeout_secs(),
            idle_timeout_secs: default_db_idle_timeout_secs(),
            acquire_timeout_secs: default_db_acquire_timeout_secs(),
            auto_migrate: false,
        }
    }
}

/// Whether a batch retrains every product or reuses stored models when present
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TrainingPolicy {
    #[default]
    Always,
    ReuseStored,
}

/// Forecasting pipeline settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ForecastingConfig {
    /// Trailing days of order history read per product
    #[serde(default = "default_lookback_days")]
    #[validate(range(min = 31, max = 3650))]
    pub lookback_days: u32,

    /// Horizon used when the caller does not pass one
    #[serde(default = "default_horizon_days")]
    #[validate(range(min = 1, max = 365))]
    pub default_horizon_days: u32,

    /// Tag written to every forecast row
    #[serde(default = "default_algorithm_version")]
    #[validate(length(min = 1, max = 50))]
    pub algorithm_version: String,

    /// Number of sequential cross-validation folds
    #[serde(default = "default_cv_folds")]
    #[validate(range(min = 2, max = 20))]
    pub cv_folds: usize,

    #[serde(default)]
    pub training_policy: TrainingPolicy,

    /// Root directory for model artifacts
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    /// Holiday calendar country code ("KE" or "none")
    #[serde(default = "default_holiday_country")]
    #[validate(custom = "validate_holiday_country")]
    pub holiday_country: String,

    /// Additional holiday dates (YYYY-MM-DD)
    #[serde(default)]
    pub extra_holidays: Vec<NaiveDate>,
}

impl Default for ForecastingConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            default_horizon_days: default_horizon_days(),
            algorithm_version: default_algorithm_version(),
            cv_folds: default_cv_folds(),
            training_policy: TrainingPolicy::default(),
            model_dir: default_model_dir(),
            holiday_country: default_holiday_country(),
            extra_holidays: Vec::new(),
        }
    }
}

/// Gradient boosting hyper-parameters
#[derive(Clone, Debug, Deserialize, Validate, serde::Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    #[serde(default = "default_n_estimators")]
    #[validate(range(min = 1, max = 5000))]
    pub n_estimators: usize,

    #[serde(default = "default_learning_rate")]
    #[validate(custom = "validate_learning_rate")]
    pub learning_rate: f64,

    #[serde(default = "default_max_depth")]
    #[validate(range(min = 1, max = 16))]
    pub max_depth: usize,

    #[serde(default = "default_min_samples_split")]
    #[validate(range(min = 2))]
    pub min_samples_split: usize,

    #[serde(default = "default_min_samples_leaf")]
    #[validate(range(min = 1))]
    pub min_samples_leaf: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_estimators: default_n_estimators(),
            learning_rate: default_learning_rate(),
            max_depth: default_max_depth(),
            min_samples_split: default_min_samples_split(),
            min_samples_leaf: default_min_samples_leaf(),
        }
    }
}

/// Constants of the confidence heuristic. The floor and ceiling keep the score
/// away from both "certain" and "uninformative".
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ConfidenceConfig {
    #[serde(default = "default_points_per_observation")]
    pub points_per_observation: f64,
    #[serde(default = "default_base_cap")]
    pub base_cap: f64,
    #[serde(default = "default_fast_moving_days")]
    pub fast_moving_days: f64,
    #[serde(default = "default_fast_moving_bonus")]
    pub fast_moving_bonus: f64,
    #[serde(default = "default_slow_moving_days")]
    pub slow_moving_days: f64,
    #[serde(default = "default_slow_moving_penalty")]
    pub slow_moving_penalty: f64,
    #[serde(default = "default_confidence_floor")]
    #[validate(range(min = 0.0, max = 100.0))]
    pub floor: f64,
    #[serde(default = "default_confidence_ceiling")]
    #[validate(range(min = 0.0, max = 100.0))]
    pub ceiling: f64,
    /// Trailing days used to estimate daily demand for days-of-supply
    #[serde(default = "default_days_of_supply_window")]
    #[validate(range(min = 1))]
    pub days_of_supply_window: u32,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            points_per_observation: default_points_per_observation(),
            base_cap: default_base_cap(),
            fast_moving_days: default_fast_moving_days(),
            fast_moving_bonus: default_fast_moving_bonus(),
            slow_moving_days: default_slow_moving_days(),
            slow_moving_penalty: default_slow_moving_penalty(),
            floor: default_confidence_floor(),
            ceiling: default_confidence_ceiling(),
            days_of_supply_window: default_days_of_supply_window(),
        }
    }
}

/// Reorder suggestion settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ReorderConfig {
    /// Days of demand a reorder should cover
    #[serde(default = "default_coverage_days")]
    #[validate(range(min = 1, max = 365))]
    pub coverage_days: u32,
    /// Products with fewer days of cover than this are flagged
    #[serde(default = "default_low_cover_days")]
    pub low_cover_days: f64,
    #[serde(default = "default_min_order_quantity")]
    #[validate(range(min = 1))]
    pub min_order_quantity: i32,
}

impl Default for ReorderConfig {
    fn default() -> Self {
        Self {
            coverage_days: default_coverage_days(),
            low_cover_days: default_low_cover_days(),
            min_order_quantity: default_min_order_quantity(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    #[serde(default)]
    #[validate]
    pub database: DatabaseConfig,

    #[serde(default)]
    #[validate]
    pub forecasting: ForecastingConfig,

    #[serde(default)]
    #[validate]
    pub model: ModelConfig,

    #[serde(default)]
    #[validate]
    pub confidence: ConfidenceConfig,

    #[serde(default)]
    #[validate]
    pub reorder: ReorderConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            log_level: default_log_level(),
            log_json: false,
            database: DatabaseConfig::default(),
            forecasting: ForecastingConfig::default(),
            model: ModelConfig::default(),
            confidence: ConfidenceConfig::default(),
            reorder: ReorderConfig::default(),
        }
    }
}

impl AppConfig {
    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.confidence.floor > self.confidence.ceiling {
            let mut err = ValidationError::new("confidence_bounds");
            err.message = Some("confidence.floor must not exceed confidence.ceiling".into());
            errors.add("confidence", err);
        }

        if self.confidence.fast_moving_days >= self.confidence.slow_moving_days {
            let mut err = ValidationError::new("days_of_supply_thresholds");
            err.message =
                Some("confidence.fast_moving_days must be below confidence.slow_moving_days".into());
            errors.add("confidence", err);
        }

        if self.database.min_connections > self.database.max_connections {
            let mut err = ValidationError::new("pool_bounds");
            err.message =
                Some("database.min_connections must not exceed database.max_connections".into());
            errors.add("database", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Runs derive-based and cross-field validation.
    pub fn validate_all(&self) -> Result<(), AppConfigError> {
        self.validate().map_err(|e| {
            error!("Configuration validation failed: {:?}", e);
            AppConfigError::Validation(e)
        })?;
        self.validate_additional_constraints().map_err(|e| {
            error!("Configuration consistency validation failed: {:?}", e);
            AppConfigError::Validation(e)
        })
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_database_url() -> String {
    DEFAULT_DATABASE_URL.to_string()
}

fn default_db_max_connections() -> u32 {
    8
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_lookback_days() -> u32 {
    365
}

fn default_horizon_days() -> u32 {
    30
}

fn default_algorithm_version() -> String {
    DEFAULT_ALGORITHM_VERSION.to_string()
}

fn default_cv_folds() -> usize {
    5
}

fn default_model_dir() -> PathBuf {
    PathBuf::from(DEFAULT_MODEL_DIR)
}

fn default_holiday_country() -> String {
    DEFAULT_HOLIDAY_COUNTRY.to_string()
}

fn default_n_estimators() -> usize {
    200
}
fn default_learning_rate() -> f64 {
    0.05
}
fn default_max_depth() -> usize {
    5
}
fn default_min_samples_split() -> usize {
    2
}
fn default_min_samples_leaf() -> usize {
    1
}

fn default_points_per_observation() -> f64 {
    2.0
}
fn default_base_cap() -> f64 {
    90.0
}
fn default_fast_moving_days() -> f64 {
    7.0
}
fn default_fast_moving_bonus() -> f64 {
    5.0
}
fn default_slow_moving_days() -> f64 {
    30.0
}
fn default_slow_moving_penalty() -> f64 {
    10.0
}
fn default_confidence_floor() -> f64 {
    50.0
}
fn default_confidence_ceiling() -> f64 {
    95.0
}
fn default_days_of_supply_window() -> u32 {
    30
}

fn default_coverage_days() -> u32 {
    30
}
fn default_low_cover_days() -> f64 {
    7.0
}
fn default_min_order_quantity() -> i32 {
    1
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_holiday_country(code: &str) -> Result<(), ValidationError> {
    match code.trim().parse::<Country>() {
        Ok(_) => Ok(()),
        Err(_) => {
            let mut err = ValidationError::new("holiday_country");
            err.message = Some("Must be one of: KE, none".into());
            Err(err)
        }
    }
}

fn validate_learning_rate(rate: f64) -> Result<(), ValidationError> {
    if !rate.is_finite() || rate <= 0.0 || rate > 1.0 {
        let mut err = ValidationError::new("learning_rate");
        err.message = Some("learning_rate must be a finite value in (0.0, 1.0]".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("demand_forecast={},sea_orm=warn", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    load_config_from(Path::new(CONFIG_DIR), &run_env)
}

/// Loads configuration from an explicit directory and profile.
pub fn load_config_from(config_dir: &Path, run_env: &str) -> Result<AppConfig, AppConfigError> {
    if !config_dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir.display()
        );
    }

    let config = Config::builder()
        .set_default("environment", run_env)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::from(config_dir.join("default")).required(false))
        .add_source(File::from(config_dir.join(run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;
    app_config.validate_all()?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate_all().is_ok());
        assert_eq!(cfg.forecasting.default_horizon_days, 30);
        assert_eq!(cfg.model.n_estimators, 200);
        assert_eq!(cfg.confidence.floor, 50.0);
        assert_eq!(cfg.confidence.ceiling, 95.0);
    }

    #[test]
    fn inverted_confidence_bounds_are_rejected() {
        let mut cfg = AppConfig::default();
        cfg.confidence.floor = 96.0;
        assert!(matches!(
            cfg.validate_all(),
            Err(AppConfigError::Validation(_))
        ));
    }

    #[test]
    fn unknown_holiday_country_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.forecasting.holiday_country = "atlantis".into();
        assert!(cfg.validate_all().is_err());
    }

    #[test]
    fn learning_rate_must_be_positive() {
        let mut cfg = AppConfig::default();
        cfg.model.learning_rate = 0.0;
        assert!(cfg.validate_all().is_err());
    }

    #[test]
    fn profile_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let mut default = std::fs::File::create(dir.path().join("default.toml")).unwrap();
        writeln!(
            default,
            r#"
            log_level = "debug"

            [forecasting]
            lookback_days = 180
            training_policy = "reuse_stored"
            extra_holidays = ["2024-03-15"]

            [model]
            n_estimators = 50
            "#
        )
        .unwrap();
        let mut staging = std::fs::File::create(dir.path().join("staging.toml")).unwrap();
        writeln!(
            staging,
            r#"
            [forecasting]
            lookback_days = 90
            "#
        )
        .unwrap();

        let cfg = load_config_from(dir.path(), "staging").unwrap();
        assert_eq!(cfg.environment, "staging");
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.forecasting.lookback_days, 90);
        assert_eq!(cfg.forecasting.training_policy, TrainingPolicy::ReuseStored);
        assert_eq!(
            cfg.forecasting.extra_holidays,
            vec![NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()]
        );
        assert_eq!(cfg.model.n_estimators, 50);
        assert_eq!(cfg.model.max_depth, 5);
    }
}
