//! Smart Climate Prediction Service - Main Entry Point
//!
//! Loads both models once, then answers prediction and history requests over
//! NATS request/reply while tracking sessions announced by the credential
//! service.

use anyhow::{Context, Result};
use smart_climate_service::{
    config::{AppConfig, LoggingConfig},
    consumer::RequestConsumer,
    gate::AccessGate,
    handler::RequestHandler,
    metrics::{MetricsReporter, ServiceMetrics},
    models::ModelRegistry,
    producer::ReplyPublisher,
    service::PredictionService,
    store::{JsonlPredictionStore, PredictionStore},
    FEATURE_NAMES,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!("warn,smart_climate_service={}", logging.level))
            .context("Invalid logging level")?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.logging)?;

    info!("Starting Smart Climate Prediction Service");
    info!(features = ?FEATURE_NAMES, "Feature order");

    // Models are loaded once, before any request is accepted
    let registry = Arc::new(ModelRegistry::load(
        &config.models.paths(),
        config.models.onnx_threads,
    ));
    if !registry.availability().all_ready() {
        warn!("Not all models loaded; affected predictions will be refused until restart");
    }

    let store: Arc<dyn PredictionStore> = Arc::new(
        JsonlPredictionStore::open(&config.store.path).context("Failed to open prediction store")?,
    );
    let gate = Arc::new(AccessGate::new(chrono::Duration::seconds(
        config.sessions.ttl_secs,
    )));
    let metrics = Arc::new(ServiceMetrics::new());
    let service = Arc::new(PredictionService::new(registry.clone(), store.clone()));
    let handler = Arc::new(RequestHandler::new(
        gate.clone(),
        service,
        store,
        metrics.clone(),
    ));

    let client = async_nats::connect(&config.nats.url)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", config.nats.url))?;
    info!("Connected to NATS at {}", config.nats.url);
    let publisher = ReplyPublisher::new(client.clone());

    // Start metrics reporter
    let reporter = MetricsReporter::new(metrics.clone(), config.pipeline.metrics_interval_secs);
    tokio::spawn(reporter.start());

    // Purge expired sessions periodically
    let purge_gate = gate.clone();
    let purge_every = Duration::from_secs(config.sessions.purge_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(purge_every);
        loop {
            interval.tick().await;
            purge_gate.purge_expired();
        }
    });

    // Session lifecycle events
    let mut sessions = RequestConsumer::subscribe(&client, &config.nats.session_subject).await?;
    let session_handler = handler.clone();
    tokio::spawn(async move {
        while let Some(message) = sessions.next_message().await {
            session_handler.handle_session_payload(&message.payload);
        }
    });

    // History requests
    let mut history = RequestConsumer::subscribe(&client, &config.nats.history_subject).await?;
    let history_handler = handler.clone();
    let history_publisher = publisher.clone();
    tokio::spawn(async move {
        while let Some(request) = history.next_request().await {
            let handler = history_handler.clone();
            let payload = request.message.payload;
            let response =
                tokio::task::spawn_blocking(move || handler.handle_history_payload(&payload)).await;

            match response {
                Ok(response) => {
                    if let Err(e) = history_publisher.reply(request.reply, &response).await {
                        error!(error = %e, "Failed to publish history reply");
                    }
                }
                Err(e) => error!(error = %e, "History handler panicked"),
            }
        }
    });

    // Prediction requests, bounded by the worker count
    let num_workers = config.pipeline.workers.max(1);
    let semaphore = Arc::new(Semaphore::new(num_workers));
    let mut predictions =
        RequestConsumer::subscribe(&client, &config.nats.predict_subject).await?;
    info!(
        workers = num_workers,
        subject = %config.nats.predict_subject,
        "Serving prediction requests"
    );

    let serve = async {
        while let Some(request) = predictions.next_request().await {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };

            let handler = handler.clone();
            let publisher = publisher.clone();
            tokio::spawn(async move {
                let payload = request.message.payload;
                // Inference and the store write are synchronous
                let response =
                    tokio::task::spawn_blocking(move || handler.handle_predict_payload(&payload))
                        .await;

                match response {
                    Ok(response) => {
                        if let Err(e) = publisher.reply(request.reply, &response).await {
                            error!(error = %e, "Failed to publish prediction reply");
                        }
                    }
                    Err(e) => error!(error = %e, "Prediction handler panicked"),
                }

                drop(permit);
            });
        }
    };

    tokio::select! {
        _ = serve => warn!("Prediction subscription closed"),
        _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
    }

    info!("Service shutting down...");
    metrics.print_summary();

    Ok(())
}
