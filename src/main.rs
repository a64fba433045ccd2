use clap::{Parser, ValueEnum};
use dotenvy::dotenv;
use healthion_ingest::config::AppConfig;
use healthion_ingest::infrastructure::{load_aws_config, queue, storage};
use healthion_ingest::services::conversion::{ConversionService, TracingMonitor};
use healthion_ingest::services::dispatcher::WorkerPool;
use healthion_ingest::services::poller::NotificationPoller;
use healthion_ingest::services::worker::BackgroundWorker;
use healthion_ingest::{AppState, create_app};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    Api,
    Worker,
    All,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Service type to run (api, worker, all)
    #[arg(short, long, value_enum, default_value_t = Mode::All)]
    mode: Mode,

    /// Address for the API server
    #[arg(long, default_value = "0.0.0.0")]
    host: std::net::IpAddr,

    /// Port for the API server
    #[arg(short, long, default_value_t = 8000)]
    port: u16,

    /// Use the local MinIO / LocalStack config instead of the environment
    #[arg(long)]
    dev: bool,
}

fn load_config(args: &Args) -> AppConfig {
    if args.dev {
        AppConfig::development()
    } else {
        AppConfig::from_env()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Environment & logging
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "healthion_ingest=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting healthion ingest [Mode: {:?}]...", args.mode);

    let config = load_config(&args);
    info!(
        "⚙️  Config: bucket={}, region={}, ack_policy={:?}, workers={}",
        config.bucket_name, config.region, config.ack_policy, config.worker_concurrency
    );

    // 2. Clients
    let sdk = load_aws_config(&config).await;
    let object_store = storage::setup_storage(&config, &sdk);
    let notification_queue = queue::setup_queue(&config, &sdk);

    // 3. Shutdown channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut handles = Vec::new();

    // 4. Conversion pool and poller (only meaningful with a queue)
    let mut pool_handle = None;
    let poller = match notification_queue {
        Some(queue) => {
            let converter = Arc::new(ConversionService::new(
                object_store.clone(),
                Arc::new(TracingMonitor),
                config.conversion_batch_rows,
                config.scratch_dir.clone(),
            ));
            let (pool, handle) = WorkerPool::start(
                converter,
                config.worker_concurrency,
                config.worker_queue_capacity,
                shutdown_rx.clone(),
            );
            pool_handle = Some(handle);

            Some(Arc::new(NotificationPoller::new(
                queue,
                pool,
                config.queue_max_messages,
                config.queue_wait_seconds,
                config.ack_policy,
            )))
        }
        None => None,
    };

    // 5. Background poll loop
    if matches!(args.mode, Mode::Worker | Mode::All) {
        match &poller {
            Some(poller) => {
                let worker = BackgroundWorker::new(
                    poller.clone(),
                    Duration::from_secs(config.poll_interval_seconds),
                    shutdown_rx.clone(),
                );
                handles.push(tokio::spawn(worker.run()));
                info!("👷 Worker service initialized.");
            }
            None => warn!("👷 Worker mode requested but no queue is configured"),
        }
    }

    // 6. API server
    if matches!(args.mode, Mode::Api | Mode::All) {
        let state = AppState::new(object_store.clone(), poller.clone());

        let app = create_app(state);
        let addr = SocketAddr::new(args.host, args.port);
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!("✅ API Server listening on: http://{}", addr);
        info!("📖 Swagger UI documentation: http://{}/swagger-ui", addr);

        let mut server_shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = server_shutdown.changed().await;
                })
                .await
            {
                error!("❌ Server runtime error: {}", e);
            }
        }));
    }

    // 7. Wait for a signal, then drain
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    info!("🛑 Shutting down services...");

    for handle in handles {
        let _ = handle.await;
    }
    if let Some(handle) = pool_handle {
        let _ = handle.await;
    }

    info!("👋 Exited cleanly.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, starting graceful shutdown...");
        },
    }
}
