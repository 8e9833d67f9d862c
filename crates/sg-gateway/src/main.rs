use actix_web::{middleware::Logger, web, App, HttpServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sg_gateway::{config::GatewayConfig, metrics::register_metrics, routes, state::AppState};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    let port = config.port;

    tracing::info!("Starting sg-gateway on port {}", port);
    tracing::info!("Token validation: {}", config.validation_url);
    tracing::info!("Forwarding mode: {:?}", config.forwarding);
    tracing::info!("Static services: {}", config.services.len());
    tracing::info!(
        "Envelope cipher: {}",
        if config.envelope.enabled() {
            "enabled"
        } else {
            "disabled"
        }
    );

    register_metrics();

    let state = match AppState::new(config) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("failed to initialize gateway: {e}");
            std::process::exit(1);
        }
    };
    let state_data = web::Data::new(state);

    HttpServer::new(move || {
        App::new()
            .app_data(state_data.clone())
            .app_data(web::PayloadConfig::new(10 * 1024 * 1024)) // 10MB body limit
            .wrap(Logger::default())
            .wrap(sg_gateway::cors::build_cors())
            .configure(routes::health::configure)
            .configure(routes::gateway::configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
