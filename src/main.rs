//! CITGuard - fleet security monitoring for cash-in-transit vehicles
//!
//! Ingests telemetry and camera detections, raises alerts, and:
//! - Pushes live updates to authenticated dashboards over WebSocket
//! - Emails critical alerts, suppressing repeats within a cooldown window
//! - Serves a JSON API for fleet, route, zone and assignment management

mod alerts;
mod auth;
mod config;
mod db;
mod realtime;
mod validation;
mod web;

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::alerts::{AlertDistributor, EmailSender, LogMailer, SmtpMailer};
use crate::auth::JwtAuth;
use crate::realtime::{HubSettings, RealtimeHub};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before any other initialization)
    let _ = dotenvy::dotenv();

    let config = config::Config::load()?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    // Use LOG_FORMAT=gcp for structured GCP Cloud Logging
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "gcp" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Starting CITGuard...");
    info!("Configuration loaded");

    let db = db::Database::new();
    if config.seed.demo {
        db::seed_demo_data(&db).await;
    }
    info!("Store initialized");

    let auth = Arc::new(JwtAuth::new(&config.auth));
    if config.auth.issue_dev_tokens {
        warn!("Issuing development tokens, do not enable this in production");
        for user in db.get_users().await {
            let token = auth.generate_token(user.id)?;
            info!(user_id = user.id, username = %user.username, "Dev token: {}", token);
        }
    }

    let mailer: Arc<dyn EmailSender> = if config.email.enabled {
        info!("Email delivery via {}:{}", config.email.smtp_host, config.email.smtp_port);
        Arc::new(SmtpMailer::new(&config.email)?)
    } else {
        info!("Email delivery disabled, alert emails will only be logged");
        Arc::new(LogMailer)
    };
    if config.alerts.recipients.is_empty() {
        warn!("No alert recipients configured");
    }

    let distributor = Arc::new(AlertDistributor::from_config(&config.alerts, mailer));
    let hub = Arc::new(RealtimeHub::new(
        db.clone(),
        auth.clone(),
        distributor,
        HubSettings::from_config(&config),
    ));

    let state = Arc::new(web::AppState { db, auth, hub });

    // Start web server (blocking)
    web::start_server(&config, state).await?;

    Ok(())
}
