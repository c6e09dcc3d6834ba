// src/main.rs

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fallwatch::{
    broadcast::{self, Registry},
    camera::{start_capture_thread, CameraSource},
    config::{self, Config},
    detector::YoloDetector,
    pipeline,
    server::{router, AppState},
    state::PipelineStatus,
    store::FrameStore,
};

fn start_pipeline(
    config: &Config,
    store: Arc<FrameStore>,
    status: Arc<PipelineStatus>,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let source = CameraSource::open(&config.source)?;
    let detector = YoloDetector::load(&config.model, config.confidence, config.threads)?;
    let worker = start_capture_thread(Box::new(source), config.capture_buffer);
    Ok(pipeline::spawn(
        worker,
        Box::new(detector),
        config.clone(),
        store,
        status,
        running,
    ))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fallwatch=info")),
        )
        .init();

    let config = config::resolve(config::parse_args()?)?;

    let store = Arc::new(FrameStore::new());
    let registry = Arc::new(Registry::new());
    let status = Arc::new(PipelineStatus::default());
    let running = Arc::new(AtomicBool::new(true));

    // A startup failure keeps the pipeline down but leaves the server up so
    // stats and health stay reachable.
    let producer = match start_pipeline(
        &config,
        Arc::clone(&store),
        Arc::clone(&status),
        Arc::clone(&running),
    ) {
        Ok(handle) => Some(handle),
        Err(err) => {
            error!("pipeline failed to start: {err:#}");
            None
        }
    };

    let broadcaster = tokio::spawn(broadcast::run(
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::clone(&status),
        config.patient_id.clone(),
        Duration::from_secs_f32(config.alerts.cooldown_secs),
        Duration::from_millis(config.alerts.poll_ms),
        Arc::clone(&running),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let app = router(AppState {
        store,
        registry,
        status,
        stream_fps: config.stream.fps,
        shutdown: shutdown_rx,
    });

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!("listening on http://{}", listener.local_addr()?);
    let stop_flag = Arc::clone(&running);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Loops observe the flag and exit; client connections drain so
            // the server can finish.
            stop_flag.store(false, Ordering::Relaxed);
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // The camera is released only once the producer (and with it the
    // capture worker) has been joined.
    running.store(false, Ordering::Relaxed);
    if let Some(handle) = producer {
        let joined = tokio::task::spawn_blocking(move || handle.join()).await;
        if !matches!(joined, Ok(Ok(()))) {
            error!("producer thread did not shut down cleanly");
        }
    }
    let _ = broadcaster.await;
    info!("shutdown complete");

    Ok(())
}
