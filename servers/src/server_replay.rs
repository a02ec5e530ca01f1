//! # Replay Gateway
//!
//! Replays a recorded page-session dataset as a live telemetry feed. Every
//! send interval a batch is pulled from the dataset, handed to the persistence
//! backend (when configured), and pushed to WebSocket and SSE subscribers.
//!
//! Routes:
//! - `GET /health`
//! - `GET /ws` shared topic socket, `{"event", "data"}` frames, `{"type":"ping"}` answered with `pong`
//! - `GET /api/sse/connect` dedicated event stream
//! - `POST /scenario/{start,stop,restart}`, `GET /scenario/status`
//! - `POST /scenario/{slow-country,error-spike,tcp-error,browser-issue,recover}`

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::oneshot;
use tokio_graceful::{Shutdown, ShutdownGuard};
use tracing::{error, info, warn};

use lib_replay::core::{BatchSink, NullSink};
use lib_replay::ingestors::load_all;
use lib_replay::retrieve::HttpBackendSink;

mod replay_logic;
use replay_logic::config::{self, Settings};
use replay_logic::{downstream, logger, state::AppState};

/// Loads `.env`, then the platform file (`.env.windows` / `.env.linux`).
fn load_dotenv() {
    let dotenv_os: &str = if cfg!(target_os = "windows") {
        ".env.windows"
    } else {
        ".env.linux"
    };
    dotenvy::dotenv().ok();
    dotenvy::from_filename(dotenv_os).ok();
}

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();

    let settings = config::load_config().context("Failed to load configuration")?;
    let _log_guard = logger::setup_logging(&settings.log_dir, &settings.log_level)?;
    info!(?settings, "Configuration loaded");

    let failed = Arc::new(AtomicBool::new(false));
    let (fatal_tx, fatal_rx) = oneshot::channel::<()>();
    let shutdown = Shutdown::new(shutdown_signal(fatal_rx));

    let task_failed = Arc::clone(&failed);
    shutdown.spawn_task_fn(move |guard| async move {
        if let Err(e) = tokio_main(settings, guard).await {
            error!("Replay gateway failed: {:#}", e);
            task_failed.store(true, Ordering::SeqCst);
        }
        let _ = fatal_tx.send(());
    });

    match shutdown.shutdown_with_limit(Duration::from_secs(10)).await {
        Ok(elapsed) => {
            info!(
                "shutdown: gracefully {}s after shutdown signal received",
                elapsed.as_secs_f64()
            );
        }
        Err(e) => {
            warn!("shutdown: forcefully due to timeout: {}", e);
        }
    }

    if failed.load(Ordering::SeqCst) {
        anyhow::bail!("Replay gateway stopped after a fatal error");
    }
    info!("Bye!");
    Ok(())
}

/// Wires the engine, starts the ticker and serves HTTP until shutdown.
async fn tokio_main(settings: Settings, guard: ShutdownGuard) -> Result<()> {
    let records = match load_all(&settings.dataset).await {
        Ok(records) => {
            info!(dataset = %settings.dataset, records = records.len(), "Dataset loaded");
            records
        }
        Err(e) => {
            error!(dataset = %settings.dataset, error = %e, "Dataset load failed; replay will be empty");
            Vec::new()
        }
    };

    let sink: Arc<dyn BatchSink> = match &settings.backend_url {
        Some(url) => {
            info!(backend = %url, "Persisting emitted batches");
            Arc::new(
                HttpBackendSink::new(url, settings.backend_timeout)
                    .context("Failed to build backend sink")?,
            )
        }
        None => {
            info!("No backend URL configured; persistence disabled");
            Arc::new(NullSink)
        }
    };

    let state = AppState::new(&settings, records, sink).context("Failed to wire replay state")?;

    let ticker_guard = guard.clone_weak();
    let ticker = state
        .scheduler
        .run_every(settings.send_interval, async move {
            ticker_guard.cancelled().await;
        });

    if settings.auto_start {
        state.scheduler.start().await;
    }

    let served = downstream::serve(&settings, state.clone(), guard).await;

    state.scheduler.stop().await;
    ticker.abort();
    served
}

/// Resolves on Ctrl-C, SIGTERM, or when the main task reports it has ended.
async fn shutdown_signal(fatal: oneshot::Receiver<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received, initiating shutdown."),
        _ = terminate => info!("SIGTERM received, initiating shutdown."),
        _ = fatal => info!("Main task ended, initiating shutdown."),
    }
}
