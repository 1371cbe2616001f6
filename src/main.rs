//! casegraph - case workflow service
//!
//! Runs the fully automated case workflow against an in-memory store.
//! Reply messages are read from stdin, one JSON document per line.

use casegraph_core::{BlobSource, CaseStore, Clock, DocumentStore, RequestStore, SystemClock};
use casegraph_service::{CaseService, Collaborators, Config, Scheduler};
use casegraph_storage::{LogTransport, MemoryStore};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if CASEGRAPH_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            if let Ok(path) = std::env::var("CASEGRAPH_CONFIG") {
                tracing::error!("Failed to load config from {}: {}", path, e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    tracing::info!("Starting casegraph");
    tracing::info!("  Case type: {}", config.workflow.case_type);
    tracing::info!("  Request queue: {}", config.dispatch.request_queue);
    tracing::info!(
        "  Retries: up to {} exceptions, {}s apart",
        config.retry.max_exceptions,
        config.retry.delay_secs
    );
    if config.expiry.enabled {
        tracing::info!("  Expiry sweep: {}", config.expiry.cron);
    } else {
        tracing::info!("  Expiry sweep: disabled");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(MemoryStore::with_clock(Arc::clone(&clock)));

    let snapshot_path = config.storage.snapshot_path.clone();
    if let Some(path) = &snapshot_path {
        if store.load_from(path)? {
            tracing::info!(
                "  Restored {} cases from {}",
                store.case_count(),
                path.display()
            );
        }
    }

    let collaborators = Collaborators {
        cases: Arc::clone(&store) as Arc<dyn CaseStore>,
        requests: Arc::clone(&store) as Arc<dyn RequestStore>,
        documents: Arc::clone(&store) as Arc<dyn DocumentStore>,
        blobs: Arc::clone(&store) as Arc<dyn BlobSource>,
        transport: Arc::new(LogTransport),
        clock,
    };
    let service = Arc::new(CaseService::new(
        config,
        collaborators,
        Scheduler::current()?,
    )?);
    service.startup()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(body) if body.trim().is_empty() => continue,
                Some(body) => {
                    let svc = Arc::clone(&service);
                    tokio::task::spawn_blocking(move || svc.apply_message(&body)).await?;
                }
                None => {
                    tracing::info!("Input closed, stopping...");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal, stopping...");
                break;
            }
        }
    }

    service.shutdown();

    if let Some(path) = &snapshot_path {
        if let Err(e) = store.save_to(path) {
            tracing::error!("Failed to save snapshot to {}: {}", path.display(), e);
        } else {
            tracing::info!("Saved snapshot to {}", path.display());
        }
    }

    tracing::info!("casegraph stopped");
    Ok(())
}
