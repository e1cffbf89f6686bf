//! Event ingestion service: authenticates client payloads, normalizes them,
//! groups them into issues, and writes them to the configured stores.

pub mod api;
pub mod auth;
pub mod body;
pub mod config;
pub mod errors;
pub mod event;
pub mod grouping;
pub mod metrics_defs;
pub mod origin;
pub mod pipeline;
pub mod security;
pub mod tags;

#[cfg(test)]
pub mod testutils;

use crate::grouping::DefaultFingerprinter;
use crate::pipeline::{EventProcessor, ProcessorOptions, Stores};
use shared::admin_service::AdminService;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use store::events::MemoryEventStore;
use store::groups::MemoryGroupStore;
use store::keys::MemoryKeyStore;
use store::tags::MemoryTagStore;
use time::Duration;
use tokio::net::TcpListener;

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] config::ValidationError),
}

/// Runs the ingestion API and the admin listener until either fails.
///
/// `/ready` on the admin listener reports 503 until the API listener is
/// bound.
pub async fn run(config: config::Config) -> Result<(), ServerError> {
    config.validate()?;

    let keys = MemoryKeyStore::new();
    for key in &config.keys {
        keys.insert(key.clone().into());
    }

    let stores = Stores {
        keys: Arc::new(keys),
        groups: Arc::new(MemoryGroupStore::new()),
        tags: Arc::new(MemoryTagStore::new()),
        events: Arc::new(MemoryEventStore::new()),
    };
    let options = ProcessorOptions {
        allow_origin: config.allow_origin.clone(),
        max_event_bytes: config.max_event_bytes,
        max_clock_skew: Duration::seconds(config.max_clock_skew_secs as i64),
    };
    let processor = Arc::new(EventProcessor::new(
        stores,
        Arc::new(DefaultFingerprinter),
        options,
    ));

    let app = api::create_router(api::AppState { processor });

    let ready = Arc::new(AtomicBool::new(false));

    let admin_ready = ready.clone();
    let admin_task = shared::http::run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        AdminService::new(move || admin_ready.load(Ordering::Relaxed)),
    );

    let api_task = async {
        let listener =
            TcpListener::bind(format!("{}:{}", config.listener.host, config.listener.port))
                .await?;
        tracing::info!(
            host = %config.listener.host,
            port = config.listener.port,
            "event ingestion listening"
        );
        ready.store(true, Ordering::Relaxed);
        axum::serve(listener, app).await
    };

    tokio::try_join!(api_task, admin_task)?;
    Ok(())
}
