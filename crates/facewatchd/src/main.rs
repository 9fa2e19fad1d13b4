use anyhow::{Context, Result};
use facewatch_core::{spawn_engine, FaceNetExtractor, IdentificationService, SqliteStore};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod alert;
mod config;
mod http;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facewatchd starting");

    let config = config::Config::from_env();

    let store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("opening gallery at {}", config.db_path.display()))?;

    let model_path = config.model_path.clone();
    let engine = spawn_engine(
        config.extract_workers,
        config.queue_depth,
        config.extract_timeout(),
        || FaceNetExtractor::load(&model_path),
    )
    .context("starting extraction engine")?;
    tracing::info!(
        workers = config.extract_workers,
        timeout = ?config.extract_timeout(),
        "extraction engine ready"
    );

    let service = IdentificationService::new(engine, Arc::new(store), config.service_config());

    let notifier = alert::WhatsAppNotifier::from_config(&config.alert)?.map(Arc::new);
    match &notifier {
        None => tracing::warn!("WHATSAPP_TOKEN/WHATSAPP_ID not set; /send_alert is disabled"),
        Some(n) if !n.places_calls() => {
            tracing::warn!("FACEWATCH_ALERT_CALL_SDP not set; alerts are text only, no call")
        }
        Some(_) => tracing::info!("alerts send a message followed by a call"),
    }

    let app = http::create_app(http::AppState::new(service, notifier), config.max_upload_bytes);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;

    tracing::info!(
        addr = %config.listen_addr,
        threshold = config.threshold,
        name_mode = config.name_mode.as_str(),
        "facewatchd ready"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            // Keep running until signaled
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("facewatchd shutting down");

    Ok(())
}
