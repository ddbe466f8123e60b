use std::sync::Arc;

use anyhow::Context;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use subseq_orgchart::api::{HasPool, OrgChartApp};
use subseq_orgchart::config::OrgChartConfig;
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
struct DemoApp {
    pool: Arc<PgPool>,
    granted_roles: Option<Vec<String>>,
}

impl HasPool for DemoApp {
    fn pool(&self) -> Arc<PgPool> {
        Arc::clone(&self.pool)
    }
}

impl OrgChartApp for DemoApp {
    fn granted_roles(&self) -> Option<Vec<String>> {
        self.granted_roles.clone()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,subseq_orgchart=debug")),
        )
        .init();

    let config = OrgChartConfig::from_env().context("invalid orgchart configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to postgres")?;

    subseq_orgchart::db::create_orgchart_tables(&pool)
        .await
        .context("failed to run orgchart migrations")?;

    let app_state = DemoApp {
        pool: Arc::new(pool),
        granted_roles: config.granted_roles.clone(),
    };

    let api_v1 = Router::new()
        .route("/healthz", get(health_handler))
        .merge(subseq_orgchart::api::routes::<DemoApp>());

    let app = Router::new().nest("/api/v1", api_v1).with_state(app_state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.bind_addr))?;

    tracing::info!(
        bind_addr = %config.bind_addr,
        restricted = config.granted_roles.is_some(),
        "orgchart demo server listening; api base path /api/v1"
    );

    axum::serve(listener, app)
        .await
        .context("demo server failed")
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "ok": true
    }))
}
