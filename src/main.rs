//! Infetech site server
//!
//! Serves personalization, the lead form and the admin API over REST.
//! - Storage: sled trees standing in for the browser's local/session storage
//! - Networking: Axum + Tokio on port 11111
//! - Geo: built-in IP table, optional ip-api style lookup
//!
//! Usage:
//!   cargo run --bin load_data       # seed admin + demo records
//!   cargo run --bin infetech_site   # start server
//!   cargo run --bin site-cli -- login --email admin@infetech.com --password admin123

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use infetech_site::config::{AppConfig, LOG_DIR_ENV_VAR, LOG_ENV_VAR, LOG_JSON_ENV_VAR};
use infetech_site::geo::{GeoLocator, HttpLocationProvider};
use infetech_site::rest::{create_router, AppState};
use infetech_site::storage::Storage;

/// Install the subscriber: `SITE_LOG` filter, JSON lines when `SITE_LOG_JSON`
/// is set, plus a daily file under `SITE_LOG_DIR` when given.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_JSON_ENV_VAR).is_ok_and(|v| v != "0" && !v.is_empty());

    let (file_layer, guard) = match std::env::var(LOG_DIR_ENV_VAR) {
        Ok(dir) if !dir.is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "infetech_site.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        _ => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
    guard
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;
    let _log_guard = init_tracing();

    info!(bind = %config.bind, data = %config.data_path, "Infetech site server starting");

    // Shared by every handler (sled handles are cheap clones)
    let storage = Storage::open(&config.data_path)?;

    let mut geo = GeoLocator::new().fallback_to_default(config.geo_fallback);
    if !config.geo_lookup_url.is_empty() {
        geo = geo.with_provider(Box::new(HttpLocationProvider::new(
            &config.geo_lookup_url,
            config.geo_timeout,
        )?));
    }

    let state = AppState::new(storage.clone(), &config, geo);
    if state.auth.seed_default_admin(&config.admin_email, &config.admin_password)? {
        warn!(email = %config.admin_email, "default admin created; change its password");
    }

    let app = create_router(Arc::new(state));
    let listener = TcpListener::bind(config.bind).await?;
    info!("REST API listening on {}", config.bind);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down...");
        })
        .await?;

    storage.flush()?;
    Ok(())
}
