//! Server wiring and lifecycle
//!
//! Builds the component graph, starts the transport and the background
//! tick task, routes inbound commands (ingest goes to a dedicated worker
//! so `invoke` and `stats` stay responsive), and persists everything on
//! shutdown.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context};
use hibikido_common::config::ServerConfig;
use hibikido_common::db::Store;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::embedding::{SentenceEmbedder, TextEmbedder, VectorIndex};
use crate::handlers::{Controller, Flow};
use crate::orchestrator::{clock::Clock, MonotonicClock, Orchestrator};
use crate::osc::{Command, OscTransport, Outbound};

pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let store = Arc::new(Mutex::new(
        Store::open(&config.database.data_dir).context("failed to open store")?,
    ));

    let embedder: Arc<dyn TextEmbedder> = {
        let model_name = config.embedding.model_name.clone();
        let embedder = tokio::task::spawn_blocking(move || SentenceEmbedder::new(&model_name))
            .await
            .context("embedder task failed")?
            .context("failed to load embedding model")?;
        Arc::new(embedder)
    };

    let index = Arc::new(Mutex::new(VectorIndex::load_or_empty(
        &config.embedding.index_file,
        embedder.dim(),
    )));

    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let orchestrator = Arc::new(Orchestrator::new(
        config.orchestrator.bark_similarity_threshold,
        clock,
    ));

    let (transport, mut commands) = OscTransport::spawn(&config.transport).await?;
    let outbound = transport.sender();

    // Manifest sink: each authorized announcement goes out as /manifest
    // followed by its /niche occupancy message.
    {
        let tx = outbound.clone();
        orchestrator.on_manifest(Box::new(move |announcement| {
            tx.send(Outbound::Manifest(announcement.clone()))
                .map_err(|_| anyhow!("outbound channel closed"))?;
            tx.send(Outbound::Niche {
                segment_id: announcement.segment_id,
                bark_raw: announcement.bark_raw.clone(),
            })
            .map_err(|_| anyhow!("outbound channel closed"))?;
            Ok(())
        }));
    }

    let controller = Arc::new(Controller::new(
        config.clone(),
        store,
        index,
        embedder,
        orchestrator.clone(),
        outbound.clone(),
    ));

    // Niches must expire even when no invocations arrive
    let tick_orchestrator = orchestrator.clone();
    let tick_period = Duration::from_secs_f64(config.orchestrator.tick_interval_seconds.max(0.01));
    let tick_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_period);
        loop {
            interval.tick().await;
            tick_orchestrator.tick();
        }
    });

    // Ingest worker: analysis-heavy commands run here, serialized, so the
    // dispatch task stays responsive.
    let (ingest_tx, mut ingest_rx) = mpsc::channel::<Command>(32);
    let ingest_controller = controller.clone();
    let ingest_worker = tokio::spawn(async move {
        while let Some(command) = ingest_rx.recv().await {
            ingest_controller.handle(command).await;
        }
    });

    let _ = outbound.send(Outbound::Confirm("hibikido_server_ready".to_string()));
    info!(
        listen = %transport.listen_addr(),
        model = %config.embedding.model_name,
        threshold = config.orchestrator.bark_similarity_threshold,
        "hibikido server ready, waiting for invocations"
    );

    while let Some(command) = commands.recv().await {
        if command.is_long_running() {
            if ingest_tx.send(command).await.is_err() {
                warn!("ingest worker gone");
                break;
            }
        } else if controller.handle(command).await == Flow::Stop {
            info!("stop requested");
            break;
        }
    }

    // Clean shutdown: stop accepting, drain in-flight ingest, persist.
    drop(ingest_tx);
    let _ = ingest_worker.await;
    tick_task.abort();
    controller.persist().context("failed to persist on shutdown")?;
    info!("shutdown complete");
    Ok(())
}
