//! ORDERFLOW Service Entry Point
//!
//! Connects to PostgreSQL, Redis and Kafka, starts the ingestion worker and
//! serves the HTTP API until SIGINT/SIGTERM.

use std::process::ExitCode;
use std::sync::Arc;

use orderflow_api::telemetry::{init_tracing, OrderflowMetrics};
use orderflow_api::{
    create_api_router, create_producer, AppConfig, AppState, IngestionWorker, KafkaPublisher,
    KafkaSubscription, PgOrderRepository, RedisCache, StartupError,
};
use orderflow_core::OrderValidator;
use orderflow_storage::OrderRepository;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[tokio::main]
async fn main() -> ExitCode {
    let config = AppConfig::load();
    if let Err(e) = init_tracing(config.log_format) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "ORDERFLOW failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: AppConfig) -> Result<(), StartupError> {
    let validator = OrderValidator::new()?;
    let metrics = Arc::new(OrderflowMetrics::new()?);

    let repo = PgOrderRepository::from_config(&config.db)
        .map_err(|e| StartupError::Database(e.to_string()))?;
    repo.ping()
        .await
        .map_err(|e| StartupError::Database(e.to_string()))?;
    if config.db.apply_schema {
        repo.apply_schema()
            .await
            .map_err(|e| StartupError::Schema(e.to_string()))?;
    }
    let repo: Arc<dyn OrderRepository> = Arc::new(repo);

    let cache = Arc::new(
        RedisCache::connect(&config.cache)
            .await
            .map_err(|e| StartupError::Cache(e.to_string()))?,
    );

    let producer =
        create_producer(&config.kafka).map_err(|e| StartupError::Channel(e.to_string()))?;
    let publisher = Arc::new(KafkaPublisher::new(
        producer.clone(),
        config.kafka.topic.clone(),
        config.kafka.message_timeout,
    ));
    let dead_letter = Arc::new(KafkaPublisher::new(
        producer,
        config.kafka.dead_letter_topic.clone(),
        config.kafka.message_timeout,
    ));
    let subscription = Arc::new(
        KafkaSubscription::subscribe(&config.kafka)
            .map_err(|e| StartupError::Channel(e.to_string()))?,
    );

    let worker = IngestionWorker::new(
        subscription,
        repo.clone(),
        cache.clone(),
        dead_letter,
        metrics.clone(),
    )
    .with_retry_policy(config.ingest.retry_policy())
    .with_fetch_retry_delay(config.ingest.fetch_retry_delay);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_task = tokio::spawn(async move { worker.run(shutdown_rx).await });

    let state = AppState::new(validator, repo, cache, publisher, metrics);
    let app = create_api_router(state, &config.server);

    let addr = config.server.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: addr.clone(),
            source,
        })?;
    tracing::info!(%addr, "Starting ORDERFLOW API server");

    let mut server_shutdown = shutdown_tx.subscribe();
    let mut server_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    let early_exit = tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received");
            None
        }
        result = &mut server_task => Some(result),
    };
    let _ = shutdown_tx.send(true);

    // Server and worker share one grace period.
    let deadline = Instant::now() + config.server.shutdown_grace;
    let server_drain = async move {
        match early_exit {
            Some(result) => Some(result),
            None => drain("HTTP server", server_task, deadline).await,
        }
    };
    let (served, drained) = tokio::join!(
        server_drain,
        drain("Ingestion worker", worker_task, deadline)
    );

    if let Some(Ok(summary)) = drained {
        tracing::info!(
            persisted = summary.persisted,
            dead_lettered = summary.dead_lettered,
            "Ingestion drained"
        );
    }

    let served = served.unwrap_or(Ok(Ok(())));
    match served {
        Ok(result) => result.map_err(StartupError::Serve),
        Err(join) => Err(StartupError::Serve(std::io::Error::other(join.to_string()))),
    }
}

/// Wait until `deadline` for a task, aborting it if it overruns.
async fn drain<T>(
    name: &str,
    mut task: JoinHandle<T>,
    deadline: Instant,
) -> Option<Result<T, tokio::task::JoinError>> {
    match tokio::time::timeout_at(deadline, &mut task).await {
        Ok(result) => Some(result),
        Err(_) => {
            tracing::warn!(task = name, "Grace period elapsed, aborting");
            task.abort();
            None
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
