use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use axum_prometheus::PrometheusMetricLayer;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

use welcomepage_backend::config;
use welcomepage_backend::publishing::{
    spawn_publish_queue_scheduler, BillingGateway, PgSubmissionStore, PublicationSink,
    PublishPolicy, PublishingContext, SlackPublicationSink, StripeBillingGateway,
};
use welcomepage_backend::routes::api_routes;

async fn root() -> &'static str {
    "Welcomepage API"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    // Fail fast if the JWT secret is missing
    let _ = config::JWT_SECRET.as_str();
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(config::DATABASE_URL.as_str())
        .await?;

    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(error.into());
        }
    }

    let billing: Arc<dyn BillingGateway> = Arc::new(
        StripeBillingGateway::from_env()
            .ok_or_else(|| anyhow::anyhow!("STRIPE_SECRET_KEY must be set"))?,
    );
    let sink: Arc<dyn PublicationSink> = Arc::new(SlackPublicationSink::from_env()?);
    let publishing = PublishingContext::new(
        Arc::new(PgSubmissionStore::new(pool.clone())),
        billing,
        sink,
        PublishPolicy::from_env(),
        config::CRON_SECRET.clone(),
    );
    if publishing.worker_secret.is_none() {
        tracing::warn!("CRON_SECRET not set; the queue worker endpoint will refuse triggers");
    }

    let scan_interval = *config::PUBLISH_QUEUE_SCAN_INTERVAL_SECS;
    if scan_interval > 0 {
        spawn_publish_queue_scheduler(publishing.worker.clone(), scan_interval);
        tracing::info!(scan_interval, "in-process publish queue scheduler started");
    }

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = Router::new()
        .route("/", get(root))
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .merge(api_routes())
        .layer(prometheus_layer)
        .layer(Extension(publishing));

    let addr: SocketAddr =
        format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT).parse()?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
