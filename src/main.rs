mod config;
mod db;
mod domain;
mod services;
mod state;
mod time_utils;
mod web;

use crate::config::AppConfig;
use crate::db::{PgPlanStore, PlanStore};
use crate::services::agent::PlanAgent;
use crate::services::llm::{ChatModel, OpenAiCompatModel};
use crate::services::planner::WeeklyPlanner;
use crate::state::{AppState, SharedState};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to run database migrations: {}", e);
            e
        })?;
    tracing::info!("Database migrations completed");

    let store: Arc<dyn PlanStore> = Arc::new(PgPlanStore::new(pool));
    let llm: Arc<dyn ChatModel> = Arc::new(OpenAiCompatModel::new(&config.llm));
    let planner = WeeklyPlanner::new(store.clone(), llm.clone());
    let agent = PlanAgent::new(store.clone(), llm);

    let shared: SharedState = Arc::new(AppState {
        store,
        planner,
        agent,
        session_key: config.session_key.clone(),
        cron: config.cron.clone(),
    });

    // In-process fallback for the external scheduler: Sunday 13:00 UTC is
    // 21:00 in the default Asia/Shanghai plan timezone.
    let scheduler = JobScheduler::new().await?;
    let shared_for_weekly = shared.clone();
    scheduler
        .add(Job::new_async("0 0 13 * * SUN", move |_uuid, _l| {
            let state = shared_for_weekly.clone();
            Box::pin(async move {
                let timezone = state.cron.timezone.clone();
                let Some(week_start) =
                    time_utils::compute_next_monday_week_start(chrono::Utc::now(), &timezone)
                else {
                    tracing::error!("Failed to compute week start for timezone {timezone}");
                    return;
                };
                tracing::info!("Starting weekly plan generation for week {week_start}...");
                match state.planner.generate_for_all(week_start, &timezone).await {
                    Ok(count) => {
                        tracing::info!("Weekly plan generation completed: {count} users")
                    }
                    Err(e) => tracing::error!("Weekly plan generation failed: {e}"),
                }
            })
        })?)
        .await?;
    scheduler.start().await?;
    tracing::info!("Scheduler started:");
    tracing::info!("  - Weekly plan generation: Sundays 13:00 UTC");

    let app = Router::new()
        .merge(web::routes(shared.clone()))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
