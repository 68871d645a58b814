use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod routes;
mod schemas;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings = Arc::new(dynamis_core::Settings::from_env()?);
    tracing::info!(
        app = %settings.app_name,
        version = %settings.app_version,
        "starting dispatch service"
    );
    if settings.entra.is_none() {
        tracing::warn!(
            "AZURE_TENANT_ID/AZURE_CLIENT_ID/AZURE_CLIENT_SECRET not set; \
             Graph and ARM actions will fail until credentials are configured"
        );
    }

    let registry = Arc::new(dynamis_core::build_registry(settings.clone())?);
    tracing::info!(actions = registry.action_count(), "action registry built");

    let state = routes::AppState {
        registry,
        settings: settings.clone(),
    };
    let app = routes::router(state).layer(CorsLayer::permissive());

    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
