use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{ArgAction, Args, Parser, Subcommand};
use demand_forecast::{
    clock::SystemClock,
    commands::{
        forecasting::{EvaluateForecastsCommand, GenerateForecastsCommand},
        Command,
    },
    config::{self, AppConfig},
    db::{self, DbPool},
    errors::ForecastError,
    services::{
        forecasting::{EvaluationReport, ForecastSummary, ForecastingDeps, ForecastingService},
        reorder::ReorderAdvisor,
    },
};
use serde::Serialize;
use tokio::signal;
use tracing::{error, info, warn};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.db)
                .await
                .context("failed to run migrations")?;
            println!("Migrations applied");
        }
        Commands::Generate(args) => handle_generate(&context, args, cli.json).await?,
        Commands::Evaluate(args) => handle_evaluate(&context, args, cli.json).await?,
        Commands::Reorders(args) => handle_reorders(&context, args, cli.json).await?,
        Commands::Forecasts(args) => handle_forecasts(&context, args, cli.json).await?,
        Commands::Schedule(args) => handle_schedule(&context, args, cli.json).await?,
    }

    Ok(())
}

#[derive(Parser)]
#[command(
    name = "demand-forecast",
    about = "Per-product demand forecasting and reorder suggestions",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations
    Migrate,
    /// Train models and store forecasts
    Generate(GenerateArgs),
    /// Score recent forecasts against actual sales
    Evaluate(EvaluateArgs),
    /// List products that should be reordered
    Reorders(ReordersArgs),
    /// Show stored forecasts for a product
    Forecasts(ForecastsArgs),
    /// Run `generate` on a fixed interval until interrupted
    Schedule(ScheduleArgs),
}

#[derive(Args)]
struct GenerateArgs {
    #[arg(long, help = "Days ahead to forecast (defaults to configuration)")]
    horizon: Option<u32>,
    #[arg(long = "product", value_parser = clap::value_parser!(Uuid), help = "Restrict to a product (repeatable)")]
    products: Vec<Uuid>,
}

#[derive(Args)]
struct EvaluateArgs {
    #[arg(long, default_value_t = 30, help = "Trailing window in days")]
    window: u32,
    #[arg(long = "product", value_parser = clap::value_parser!(Uuid), help = "Restrict to a product (repeatable)")]
    products: Vec<Uuid>,
}

#[derive(Args)]
struct ReordersArgs {
    #[arg(long = "product", value_parser = clap::value_parser!(Uuid), help = "Restrict to a product (repeatable)")]
    products: Vec<Uuid>,
}

#[derive(Args)]
struct ForecastsArgs {
    #[arg(long, value_parser = clap::value_parser!(Uuid), help = "Product identifier")]
    product: Uuid,
    #[arg(long, help = "First forecast date (YYYY-MM-DD)")]
    from: Option<NaiveDate>,
    #[arg(long, help = "Last forecast date (YYYY-MM-DD)")]
    to: Option<NaiveDate>,
}

#[derive(Args)]
struct ScheduleArgs {
    #[arg(long, default_value_t = 24, value_parser = clap::value_parser!(u64).range(1..), help = "Hours between batches")]
    every_hours: u64,
    #[arg(long, help = "Days ahead to forecast (defaults to configuration)")]
    horizon: Option<u32>,
}

struct CliContext {
    config: AppConfig,
    db: Arc<DbPool>,
    deps: ForecastingDeps,
    service: Arc<ForecastingService>,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        db::check_connection(&db_pool)
            .await
            .context("database is not reachable")?;
        if config.database.auto_migrate {
            db::run_migrations(&db_pool).await.map_err(|e| {
                error!("Failed running migrations: {}", e);
                e
            })?;
        }
        let db = Arc::new(db_pool);

        let deps = ForecastingDeps::from_connection(db.clone(), &config, Arc::new(SystemClock));
        let service = Arc::new(
            ForecastingService::new(deps.clone(), &config)
                .context("failed to build forecasting service")?,
        );

        Ok(Self {
            config,
            db,
            deps,
            service,
        })
    }

    fn horizon(&self, requested: Option<u32>) -> u32 {
        requested.unwrap_or(self.config.forecasting.default_horizon_days)
    }
}

fn product_filter(products: Vec<Uuid>) -> Option<Vec<Uuid>> {
    (!products.is_empty()).then_some(products)
}

async fn handle_generate(context: &CliContext, args: GenerateArgs, json: bool) -> Result<()> {
    let command = GenerateForecastsCommand {
        horizon_days: context.horizon(args.horizon),
        product_ids: product_filter(args.products),
    };

    let cancel = context.service.cancellation_flag();
    let watcher = tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Shutdown signal received, stopping after the current product");
        cancel.cancel();
    });

    let summary = command
        .execute(context.service.clone())
        .await
        .context("forecast generation failed");
    watcher.abort();

    let summary = summary?;
    if json {
        print_json(&summary)?;
    } else {
        render_summary(&summary);
    }
    Ok(())
}

async fn handle_evaluate(context: &CliContext, args: EvaluateArgs, json: bool) -> Result<()> {
    let command = EvaluateForecastsCommand {
        window_days: args.window,
        product_ids: product_filter(args.products),
    };
    let report = command
        .execute(context.service.clone())
        .await
        .context("forecast evaluation failed")?;

    if json {
        print_json(&report)?;
    } else {
        render_evaluation(&report);
    }
    Ok(())
}

async fn handle_reorders(context: &CliContext, args: ReordersArgs, json: bool) -> Result<()> {
    let advisor = ReorderAdvisor::from_deps(&context.deps, context.config.reorder.clone());
    let suggestions = advisor
        .suggest(product_filter(args.products))
        .await
        .context("failed to compute reorder suggestions")?;

    if json {
        print_json(&suggestions)?;
    } else if suggestions.is_empty() {
        println!("No products need reordering");
    } else {
        for s in &suggestions {
            let cover = s
                .days_of_cover
                .map(|d| format!("{:.1} days", d))
                .unwrap_or_else(|| "n/a".to_string());
            let reasons: Vec<String> = s.reasons.iter().map(ToString::to_string).collect();
            println!(
                "- {} ({}) • stock {} • reorder point {} • demand {}/day • cover {} • order {} [{}]",
                s.sku,
                s.product_id,
                s.current_stock,
                s.reorder_point,
                s.daily_demand,
                cover,
                s.suggested_quantity,
                reasons.join(", ")
            );
        }
    }
    Ok(())
}

async fn handle_forecasts(context: &CliContext, args: ForecastsArgs, json: bool) -> Result<()> {
    let rows = context
        .service
        .forecasts_for_product(args.product, args.from, args.to)
        .await
        .context("failed to load forecasts")?;

    if json {
        print_json(&rows)?;
    } else if rows.is_empty() {
        println!("No forecasts stored for {}", args.product);
    } else {
        for row in &rows {
            println!(
                "- {} • demand {} • confidence {} • {}",
                row.forecast_date, row.predicted_demand, row.confidence_score, row.algorithm_version
            );
        }
    }
    Ok(())
}

async fn handle_schedule(context: &CliContext, args: ScheduleArgs, json: bool) -> Result<()> {
    let horizon_days = context.horizon(args.horizon);
    let interval = Duration::from_secs(args.every_hours * 3600);

    info!(every_hours = args.every_hours, horizon_days, "Forecast scheduler started");
    let batches = context
        .service
        .run_scheduled(horizon_days, interval, shutdown_signal(), |result| {
            if let Err(e) = report_scheduled_batch(result, json) {
                error!(error = %e, "Failed to render batch summary");
            }
        })
        .await
        .context("forecast scheduler failed")?;

    info!(batches, "Forecast scheduler stopped");
    Ok(())
}

fn report_scheduled_batch(result: Result<ForecastSummary, ForecastError>, json: bool) -> Result<()> {
    match result {
        Ok(summary) if json => print_json(&summary)?,
        Ok(summary) => render_summary(&summary),
        // A failed batch is retried on the next tick.
        Err(e) => error!(error = %e, "Scheduled batch failed"),
    }
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_summary(summary: &ForecastSummary) {
    println!(
        "Batch {} {} • forecast date {} • created {} • skipped {} • errors {}{}",
        summary.batch_id,
        summary.state,
        summary.forecast_date,
        summary.created,
        summary.skipped.len(),
        summary.errors.len(),
        if summary.cancelled { " • cancelled" } else { "" }
    );
    for f in &summary.forecasts {
        println!(
            "- {} • demand {} • confidence {:.2} • {}",
            f.product_id, f.predicted_demand, f.confidence_score, f.model_source
        );
    }
    for failure in summary.skipped.iter().chain(&summary.errors) {
        println!("! {} • {} • {}", failure.product_id, failure.kind, failure.reason);
    }
}

fn render_evaluation(report: &EvaluationReport) {
    let fmt = |v: Option<f64>| v.map(|x| format!("{:.2}", x)).unwrap_or_else(|| "n/a".into());
    println!(
        "Window {} to {} • {} products • {} samples",
        report.window_start, report.window_end, report.products, report.metrics.samples
    );
    println!(
        "MAE {} • RMSE {} • SMAPE {}% • coverage {}%",
        fmt(report.metrics.mae),
        fmt(report.metrics.rmse),
        fmt(report.metrics.smape),
        fmt(report.metrics.coverage)
    );
}
