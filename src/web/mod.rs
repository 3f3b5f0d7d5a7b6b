//! Web server module

mod error;
mod extract;
mod middleware;
mod routes;

use anyhow::{Context, Result};
use axum::{
    routing::{get, patch, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::auth::JwtAuth;
use crate::config::Config;
use crate::db::Database;
use crate::realtime::{ws_handler, RealtimeHub};

use middleware::RequestLoggingLayer;

pub struct AppState {
    pub db: Database,
    pub auth: Arc<JwtAuth>,
    pub hub: Arc<RealtimeHub>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Realtime push
        .route("/ws", get(ws_handler))
        .route("/api/health", get(routes::api_health))
        .route("/api/vehicles", get(routes::api_vehicles).post(routes::api_create_vehicle))
        .route("/api/vehicles/:vehicle_id", patch(routes::api_update_vehicle))
        .route("/api/telemetry", get(routes::api_telemetry).post(routes::api_create_telemetry))
        .route("/api/alerts", get(routes::api_alerts).post(routes::api_create_alert))
        .route("/api/alerts/escalate", post(routes::api_escalate_alert))
        .route("/api/alerts/:id/acknowledge", patch(routes::api_acknowledge_alert))
        .route("/api/detections", get(routes::api_detections).post(routes::api_create_detection))
        .route("/api/risk-zones", get(routes::api_risk_zones).post(routes::api_create_risk_zone))
        .route("/api/routes", get(routes::api_routes).post(routes::api_create_route))
        .route(
            "/api/vehicle-assignments",
            get(routes::api_vehicle_assignments).post(routes::api_create_vehicle_assignment),
        )
        .route("/api/vehicle-assignments/:id", patch(routes::api_update_vehicle_assignment))
        .layer(RequestLoggingLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(config: &Config, state: Arc<AppState>) -> Result<()> {
    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();

    let addr = tokio::net::lookup_host((config.server.host.as_str(), config.server.http_port))
        .await?
        .next()
        .with_context(|| format!("Could not resolve {}:{}", config.server.host, config.server.http_port))?;

    if config.tls_enabled() {
        let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(&config.server.tls_cert, &config.server.tls_key)
            .await
            .context("Failed to load TLS certificate")?;
        info!("Web server starting on https://{} (wss://{}/ws)", addr, addr);
        axum_server::bind_rustls(addr, tls).serve(app).await?;
    } else {
        info!("Web server starting on http://{} (ws://{}/ws)", addr, addr);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
    }

    Ok(())
}
