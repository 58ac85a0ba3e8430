use api::{create_router_with_cors, ApiDoc, AppState};
use services::billing::StripeBillingProvider;
use services::entitlement::{EntitlementServiceImpl, service::EntitlementServiceConfig};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
        eprintln!("Continuing with environment variables...");
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,api=debug,services=debug,database=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting API server...");

    // Load configuration from environment
    let config = config::Config::from_env();

    tracing::info!(
        "Database: {}:{}/{}",
        config.database.host,
        config.database.port,
        config.database.database
    );
    tracing::info!("Server: {}:{}", config.server.host, config.server.port);

    if !config.stripe.is_configured() {
        tracing::warn!("Stripe secrets not configured; webhook and checkout will fail");
    }

    // Create database and run migrations
    tracing::info!("Connecting to database...");
    let db = database::Database::from_config(&config.database)?;

    tracing::info!("Running migrations...");
    db.run_migrations().await?;

    // Get repositories
    let profile_repo = Arc::new(database::repositories::PostgresProfileRepository::new(
        db.pool().clone(),
    ));
    let snapshot_repo = Arc::new(database::repositories::PostgresSnapshotRepository::new(
        db.pool().clone(),
    ));
    let plan_limits_repo = Arc::new(database::repositories::PostgresPlanLimitsRepository::new(
        db.pool().clone(),
    ));
    let session_repo = Arc::new(database::repositories::PostgresSessionRepository::new(
        db.pool().clone(),
    ));

    // Create services
    tracing::info!("Initializing services...");
    let billing = Arc::new(StripeBillingProvider::new(
        config.stripe.secret_key.clone(),
        config.stripe.webhook_secret.clone(),
    ));

    let entitlement_service = Arc::new(EntitlementServiceImpl::new(EntitlementServiceConfig {
        profile_repo,
        snapshot_repo,
        plan_limits_repo,
        billing,
        price_monthly: config.stripe.price_monthly.clone(),
        price_quarterly: config.stripe.price_quarterly.clone(),
        price_semiannual: config.stripe.price_semiannual.clone(),
    }));

    // Create application state
    let app_state = AppState {
        entitlement_service,
        session_repository: session_repo,
    };

    // Create router
    let app = create_router_with_cors(app_state, config.cors.clone())
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/docs", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
