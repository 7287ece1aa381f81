use std::net::SocketAddr;
use std::sync::Arc;

use brightcall_bitrix_bridge::{
    api,
    bitrix_client::BitrixClient,
    config::Config,
    handlers::AppState,
    recording::DefaultRecordingStore,
};
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the application.
///
/// This function initializes:
/// - Logging and tracing.
/// - Configuration loading.
/// - The Bitrix24 client and recording store.
/// - HTTP routes and middleware (CORS, body limit, rate limiting).
///
/// It then starts the Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "brightcall_bitrix_bridge=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env()?);

    let crm = BitrixClient::from_config(&config)?;
    tracing::info!(
        "✓ Bitrix client initialized: {}",
        config.bitrix_webhook_url.host_str().unwrap_or("<unknown host>")
    );

    let recordings = DefaultRecordingStore::from_config(&config)?;

    // Build application state
    let app_state = Arc::new(AppState {
        config: config.clone(),
        crm: Arc::new(crm),
        recordings: Arc::new(recordings),
    });

    // Configure rate limiter: 20 requests/second per IP, burst of 50
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(20)
            .burst_size(50)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    let app = api::router(app_state)
        .layer(
            ServiceBuilder::new()
                // Request size limit: 5MB max payload
                .layer(RequestBodyLimitLayer::new(5 * 1024 * 1024))
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
